use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::content_api::REQUEST_TIMEOUT;
use crate::util::Row;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Fetch the raw tab data for a run: tab name -> rows. Thin transport only;
/// the classifier imposes whatever schema there is.
pub async fn fetch(config: &Config) -> Result<HashMap<String, Vec<Row>>> {
    if let Some(path) = &config.snapshot {
        info!("reading tab snapshot from {}", path.display());
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("could not read snapshot {}", path.display()))?;
        return parse_tabs(&raw);
    }

    let Some(gateway) = &config.gateway else {
        bail!("no sheet gateway configured (pass --gateway, set SHEET_GATEWAY, or use --snapshot)");
    };
    let url = format!("{}/{}", gateway.trim_end_matches('/'), config.source_id);
    info!("fetching tab data from {url}");

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let body = match fetch_body(&client, &url).await {
        Ok(body) => body,
        Err(e) => {
            warn!("sheet gateway fetch failed, retrying once: {e:#}");
            tokio::time::sleep(RETRY_BACKOFF).await;
            fetch_body(&client, &url).await?
        }
    };
    parse_tabs(&body)
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<String> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body)
}

fn parse_tabs(raw: &str) -> Result<HashMap<String, Vec<Row>>> {
    // A blank spreadsheet tab shows up as something other than a row list and
    // fails here; the message should point at the payload, not the pipeline.
    serde_json::from_str(raw).context("tab payload is not a tab -> rows JSON mapping")
}
