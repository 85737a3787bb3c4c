use std::path::PathBuf;

use anyhow::{bail, Result};

/// Source spreadsheet per content group (newsroom).
const SOURCE_IDS: &[(&str, &str)] = &[
    ("azcentral", "1dtu1TmmOi30Cewr612pYlLNDA20MJv4GyOeblCN6ezk"),
    ("savannahnow", "1avByth7vtATmNq7z_PAEwE7jCUSpNKZEZ3bE_ekTYSY"),
    ("usatoday", "1OL6mTeI-Z1Tn4CHO6PJNLcErvZE15i53xuy4APW_eLA"),
    ("dev", "1xoWhAT1jp9KW1vI_NNwCssRhUg4v23snOcrHLSTfTxA"),
];

const ASSETS_ENDPOINT: &str = "https://content-api.gannettdigital.com/assets";
const DEFAULT_SITE_CODE: &str = "USAT";

/// Everything a pipeline run needs, resolved once at startup. Core logic
/// never reads the environment; it all comes through here.
#[derive(Debug, Clone)]
pub struct Config {
    pub group: String,
    pub source_id: String,
    /// Base URL of the sheet gateway; `GET {gateway}/{source_id}` returns
    /// the tab -> rows JSON mapping.
    pub gateway: Option<String>,
    /// Local tab snapshot, used instead of the gateway when set.
    pub snapshot: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub assets_endpoint: String,
    pub api_key: Option<String>,
    pub site_code: String,
}

impl Config {
    pub fn for_group(
        group: &str,
        gateway: Option<String>,
        snapshot: Option<PathBuf>,
        out_dir: PathBuf,
    ) -> Result<Self> {
        let Some((_, source_id)) = SOURCE_IDS.iter().find(|(name, _)| *name == group) else {
            bail!("no spreadsheet configured for content group: {group}");
        };

        Ok(Self {
            group: group.to_string(),
            source_id: source_id.to_string(),
            gateway: gateway.or_else(|| std::env::var("SHEET_GATEWAY").ok()),
            snapshot,
            out_dir,
            assets_endpoint: ASSETS_ENDPOINT.to_string(),
            api_key: std::env::var("CONTENT_API_KEY").ok(),
            site_code: DEFAULT_SITE_CODE.to_string(),
        })
    }

    pub fn group_names() -> Vec<&'static str> {
        SOURCE_IDS.iter().map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_group_resolves() {
        let config = Config::for_group("dev", None, None, PathBuf::from("data")).unwrap();
        assert_eq!(config.group, "dev");
        assert!(!config.source_id.is_empty());
    }

    #[test]
    fn unknown_group_is_fatal_and_named() {
        let err = Config::for_group("elsewhere", None, None, PathBuf::from("data")).unwrap_err();
        assert!(err.to_string().contains("elsewhere"), "{err}");
    }
}
