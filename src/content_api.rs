use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const PHOTOS_QUERY: &str = r#"query ($ids: [String!]!) {
  assets(ids: $ids) {
    id
    type
    title
    ... on video {
      credit
      promoBrief
      videoStill
      title
    }
    ... on image {
      caption
      credit
      crops {
        name
        path
        width
        height
      }
    }
  }
}"#;

const ARTICLES_QUERY: &str = r#"query ($ids: [String!]!) {
  assets(ids: $ids) {
    headline
    shortHeadline
    title
    pageURL {
      long
    }
    links {
      photoId
    }
  }
}"#;

/// Client for the asset/content lookup service. Every call is a fresh
/// request with a timeout and a single retry; failures bubble up so the
/// caller can degrade the one item they were resolving.
pub struct ContentApi {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    site_code: String,
}

impl ContentApi {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>, site_code: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            site_code,
        }
    }

    /// Look up photo/video assets by id. An empty id short-circuits to an
    /// empty result without touching the network.
    pub async fn get_photos(&self, id: &str) -> Result<Vec<PhotoAsset>> {
        if id.is_empty() {
            return Ok(Vec::new());
        }
        self.query_assets(PHOTOS_QUERY, id).await
    }

    /// Look up article assets by id, for related-link resolution.
    pub async fn get_articles(&self, id: &str) -> Result<Vec<ArticleAsset>> {
        if id.is_empty() {
            return Ok(Vec::new());
        }
        self.query_assets(ARTICLES_QUERY, id).await
    }

    async fn query_assets<T: DeserializeOwned>(&self, query: &str, id: &str) -> Result<Vec<T>> {
        match self.post_assets(query, id).await {
            Ok(assets) => Ok(assets),
            Err(e) => {
                warn!("asset lookup for {id} failed, retrying once: {e:#}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.post_assets(query, id).await
            }
        }
    }

    async fn post_assets<T: DeserializeOwned>(&self, query: &str, id: &str) -> Result<Vec<T>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("x-sitecode", self.site_code.as_str())
            .json(&json!({ "query": query, "variables": { "ids": [id] } }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key.as_str());
        }

        let envelope: Envelope<T> = request
            .send()
            .await
            .with_context(|| format!("asset service request for {id}"))?
            .error_for_status()
            .with_context(|| format!("asset service rejected lookup of {id}"))?
            .json()
            .await
            .with_context(|| format!("asset service payload for {id}"))?;

        Ok(envelope
            .data
            .and_then(|data| data.assets)
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<AssetList<T>>,
}

#[derive(Deserialize)]
struct AssetList<T> {
    assets: Option<Vec<T>>,
}

/// A photo or video asset as returned by the lookup service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAsset {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
    #[serde(default)]
    pub promo_brief: Option<String>,
    #[serde(default)]
    pub video_still: Option<String>,
    #[serde(default)]
    pub crops: Vec<Crop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crop {
    pub name: String,
    pub path: String,
    pub width: f64,
    pub height: f64,
}

/// An article asset, used when a related link is given as an asset id
/// instead of an explicit URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleAsset {
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub short_headline: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "pageURL", default)]
    pub page_url: Option<PageUrl>,
    #[serde(default)]
    pub links: Option<AssetLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageUrl {
    #[serde(default)]
    pub long: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetLinks {
    #[serde(rename = "photoId", default)]
    pub photo_id: Option<String>,
}

/// Select the named crop from a set of crops. Falls back to the first
/// available crop when the name is not found; `None` only when there are no
/// crops at all.
pub fn pick_crop<'a>(name: &str, crops: &'a [Crop]) -> Option<&'a Crop> {
    crops
        .iter()
        .find(|c| c.name == name)
        .or_else(|| crops.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop(name: &str) -> Crop {
        Crop {
            name: name.to_string(),
            path: format!("https://cdn.example.com/{name}.jpg"),
            width: 400.0,
            height: 300.0,
        }
    }

    #[test]
    fn pick_crop_exact_match() {
        let crops = vec![crop("bestCrop"), crop("4_3")];
        assert_eq!(pick_crop("4_3", &crops).unwrap().name, "4_3");
    }

    #[test]
    fn pick_crop_falls_back_to_first() {
        let crops = vec![crop("bestCrop"), crop("16_9")];
        assert_eq!(pick_crop("4_3", &crops).unwrap().name, "bestCrop");
    }

    #[test]
    fn pick_crop_empty() {
        assert!(pick_crop("4_3", &[]).is_none());
    }

    #[test]
    fn photo_asset_deserializes_service_shape() {
        let raw = r#"{
            "type": "image",
            "caption": "A caption",
            "credit": "AP",
            "crops": [{ "name": "bestCrop", "path": "https://cdn/x.jpg", "width": 800, "height": 600 }]
        }"#;
        let asset: PhotoAsset = serde_json::from_str(raw).unwrap();
        assert_eq!(asset.kind, "image");
        assert_eq!(asset.crops.len(), 1);
        assert_eq!(asset.crops[0].width, 800.0);
    }

    #[test]
    fn article_asset_deserializes_service_shape() {
        let raw = r#"{
            "headline": "Full headline",
            "shortHeadline": "Short",
            "pageURL": { "long": "https://example.com/story" },
            "links": { "photoId": "abc123" }
        }"#;
        let asset: ArticleAsset = serde_json::from_str(raw).unwrap();
        assert_eq!(asset.short_headline.as_deref(), Some("Short"));
        assert_eq!(asset.page_url.unwrap().long.as_deref(), Some("https://example.com/story"));
        assert_eq!(asset.links.unwrap().photo_id.as_deref(), Some("abc123"));
    }
}
