use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use crate::content_api::{pick_crop, ContentApi, PhotoAsset};

/// The uncropped service crop; CDN URLs get no crop param for it either.
pub const BEST_CROP: &str = "bestCrop";

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

static CROP_SEP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[Xx_]").unwrap());

/// Everything the spreadsheet can say about one piece of media. Caller-supplied
/// caption/credit/alt always beat whatever the asset service reports.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub image: String,
    pub caption: String,
    pub alt: String,
    pub credit: String,
    pub title: String,
    pub crop: String,
}

impl Default for MediaRequest {
    fn default() -> Self {
        Self {
            image: String::new(),
            caption: String::new(),
            alt: String::new(),
            credit: String::new(),
            title: String::new(),
            crop: BEST_CROP.to_string(),
        }
    }
}

/// Resolve an image/video reference into a normalized media descriptor.
/// Absolute URLs are treated as direct CDN references; anything else is an
/// opaque asset id for the lookup service. Failures never propagate: the
/// descriptor degrades (CDN path) or comes back empty (service path), and
/// absent fields mean "no media".
pub async fn resolve_media(client: &Client, api: &ContentApi, req: &MediaRequest) -> Value {
    if req.image.contains("http") {
        return resolve_cdn_image(client, req).await;
    }

    let assets = match api.get_photos(&req.image).await {
        Ok(assets) => assets,
        Err(e) => {
            warn!("trouble fetching image {}: {e:#}", req.image);
            return json!({});
        }
    };

    match assets.into_iter().next() {
        Some(media) if media.kind == "video" => video_descriptor(req, &media),
        Some(media) => image_descriptor(req, &media),
        // Lookup came back empty; that is "no data", not an error.
        None => json!({}),
    }
}

fn video_descriptor(req: &MediaRequest, media: &PhotoAsset) -> Value {
    json!({
        "type": media.kind,
        "credit": prefer(&req.credit, media.credit.as_deref()),
        "caption": prefer(&req.caption, media.promo_brief.as_deref()),
        "poster": media.video_still,
        "json": serde_json::to_string(media).unwrap_or_default(),
        "title": prefer(&req.title, media.title.as_deref()),
    })
}

fn image_descriptor(req: &MediaRequest, media: &PhotoAsset) -> Value {
    let Some(crop) = pick_crop(&req.crop, &media.crops) else {
        return json!({});
    };
    let caption = prefer(&req.caption, media.caption.as_deref());
    let alt = if req.alt.is_empty() { caption.clone() } else { req.alt.clone() };
    json!({
        "type": media.kind,
        "src": crop.path,
        "height": crop.height,
        "width": crop.width,
        "aspectRatio": crop.width / crop.height,
        "caption": caption,
        "credit": prefer(&req.credit, media.credit.as_deref()),
        "alt": alt,
    })
}

async fn resolve_cdn_image(client: &Client, req: &MediaRequest) -> Value {
    let src = match cdn_src(&req.image, &req.crop) {
        Ok(url) => url,
        Err(e) => {
            warn!("problem parsing cdn image url {}: {e}", req.image);
            return degraded_descriptor(req, &req.image);
        }
    };

    match fetch_dimensions(client, src.as_str()).await {
        Ok((width, height)) => json!({
            "src": src.as_str(),
            "caption": req.caption,
            "credit": req.credit,
            "alt": req.alt,
            "width": width,
            "height": height,
            "aspectRatio": width as f64 / height as f64,
            "type": "image",
        }),
        Err(e) => {
            warn!("problem getting cdn image dimensions for {}: {e:#}", src);
            degraded_descriptor(req, src.as_str())
        }
    }
}

/// Strict-parse a CDN image URL, adding the content-aware crop transform
/// param for non-default crops. Crop names come in as two dimensions joined
/// by `_` (or `x`/`X`); the CDN wants a colon-joined ratio with a `smart`
/// hint.
fn cdn_src(image: &str, crop: &str) -> Result<Url, url::ParseError> {
    let mut src = Url::parse(image)?;
    if crop != BEST_CROP {
        let ratio = CROP_SEP_RE.replace_all(crop, ":");
        src.query_pairs_mut()
            .append_pair("crop", &format!("{ratio},smart"));
    }
    Ok(src)
}

/// The mostly-empty descriptor when a CDN image can't be measured.
fn degraded_descriptor(req: &MediaRequest, src: &str) -> Value {
    json!({
        "src": src,
        "caption": req.caption,
        "credit": req.credit,
        "alt": req.alt,
        "height": null,
        "width": null,
        "type": "image",
    })
}

async fn fetch_dimensions(client: &Client, url: &str) -> Result<(usize, usize)> {
    let bytes = match fetch_bytes(client, url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("retrying image fetch for {url}: {e:#}");
            tokio::time::sleep(RETRY_BACKOFF).await;
            fetch_bytes(client, url).await?
        }
    };
    let size = imagesize::blob_size(&bytes)
        .with_context(|| format!("could not read image dimensions from {url}"))?;
    Ok((size.width, size.height))
}

async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let bytes = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}

fn prefer(override_value: &str, service_value: Option<&str>) -> String {
    if override_value.is_empty() {
        service_value.unwrap_or_default().to_string()
    } else {
        override_value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_api::Crop;

    #[test]
    fn cdn_src_adds_smart_crop_param() {
        let src = cdn_src("https://cdn.example.com/photo.jpg", "4_3").unwrap();
        assert_eq!(src.query(), Some("crop=4%3A3%2Csmart"));
    }

    #[test]
    fn cdn_src_accepts_x_separators() {
        let src = cdn_src("https://cdn.example.com/photo.jpg", "16x9").unwrap();
        assert!(src.query().unwrap().starts_with("crop=16%3A9"));
    }

    #[test]
    fn cdn_src_leaves_best_crop_alone() {
        let src = cdn_src("https://cdn.example.com/photo.jpg", BEST_CROP).unwrap();
        assert_eq!(src.query(), None);
    }

    #[test]
    fn spreadsheet_fields_beat_service_fields() {
        let media = PhotoAsset {
            kind: "image".to_string(),
            caption: Some("service caption".to_string()),
            credit: Some("service credit".to_string()),
            crops: vec![Crop {
                name: BEST_CROP.to_string(),
                path: "https://cdn/x.jpg".to_string(),
                width: 800.0,
                height: 600.0,
            }],
            ..Default::default()
        };
        let req = MediaRequest {
            caption: "sheet caption".to_string(),
            ..Default::default()
        };
        let descriptor = image_descriptor(&req, &media);
        assert_eq!(descriptor["caption"], "sheet caption");
        assert_eq!(descriptor["credit"], "service credit");
        // No explicit alt: falls back to the winning caption.
        assert_eq!(descriptor["alt"], "sheet caption");
        assert_eq!(descriptor["aspectRatio"], json!(800.0 / 600.0));
    }

    #[test]
    fn image_without_crops_is_empty_descriptor() {
        let media = PhotoAsset {
            kind: "image".to_string(),
            ..Default::default()
        };
        assert_eq!(image_descriptor(&MediaRequest::default(), &media), json!({}));
    }

    #[test]
    fn video_descriptor_uses_promo_brief_for_caption() {
        let media = PhotoAsset {
            kind: "video".to_string(),
            promo_brief: Some("brief".to_string()),
            video_still: Some("https://cdn/still.jpg".to_string()),
            title: Some("service title".to_string()),
            ..Default::default()
        };
        let descriptor = video_descriptor(&MediaRequest::default(), &media);
        assert_eq!(descriptor["caption"], "brief");
        assert_eq!(descriptor["poster"], "https://cdn/still.jpg");
        assert_eq!(descriptor["title"], "service title");
    }

    #[tokio::test]
    async fn cdn_fetch_failure_degrades_gracefully() {
        // Port 9 (discard) refuses connections immediately; no DNS involved.
        let client = Client::new();
        let req = MediaRequest {
            image: "http://127.0.0.1:9/photo.jpg".to_string(),
            caption: "cap".to_string(),
            alt: "alt".to_string(),
            credit: "credit".to_string(),
            ..Default::default()
        };
        let descriptor = resolve_cdn_image(&client, &req).await;
        assert_eq!(descriptor["src"], "http://127.0.0.1:9/photo.jpg");
        assert_eq!(descriptor["caption"], "cap");
        assert_eq!(descriptor["credit"], "credit");
        assert_eq!(descriptor["alt"], "alt");
        assert_eq!(descriptor["height"], Value::Null);
        assert_eq!(descriptor["width"], Value::Null);
        assert_eq!(descriptor["type"], "image");
    }
}
