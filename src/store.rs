use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

/// Write one race document to its key-addressed location:
/// `{out_dir}/{group}/{race}.json`, pretty-printed, unconditionally
/// overwriting whatever was there. Last writer wins by design.
pub async fn write_document(
    out_dir: &Path,
    group: &str,
    race: &str,
    doc: &Value,
) -> Result<PathBuf> {
    let dir = out_dir.join(group.to_lowercase());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("could not create {}", dir.display()))?;

    let path = dir.join(format!("{}.json", race.to_lowercase()));
    let json = serde_json::to_string_pretty(doc)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("could not write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_and_overwrites_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let doc = json!({ "title": "Race", "prompts": [] });

        let path = write_document(dir.path(), "USAT", "Governor", &doc)
            .await
            .unwrap();
        assert!(path.ends_with("usat/governor.json"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("  \"title\""), "expected 2-space indent: {written}");
        let round_trip: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(round_trip, doc);

        // Second run replaces the document outright.
        let doc2 = json!({ "title": "Race 2" });
        let path2 = write_document(dir.path(), "USAT", "Governor", &doc2)
            .await
            .unwrap();
        assert_eq!(path, path2);
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, doc2);
    }
}
