//! Epoch boundary seed file

use anyhow::{Context, Result};
use epochsync_api::EpochBoundary;
use std::path::Path;

/// Read a JSON epoch boundary (`epoch_id`, `start_timestamp`, `end_timestamp`,
/// optional `locked_ranking`) from disk
pub async fn read_epoch_file(path: &Path) -> Result<EpochBoundary> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read epoch file {:?}", path))?;
    let boundary: EpochBoundary = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse epoch file {:?}", path))?;
    boundary
        .validate()
        .with_context(|| format!("Invalid epoch in {:?}", path))?;
    Ok(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn reads_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"epoch_id":"round-2","start_timestamp":1767225600000,"end_timestamp":1767229200000}}"#
        )
        .unwrap();

        let boundary = read_epoch_file(file.path()).await.unwrap();
        assert_eq!(boundary.epoch_id.as_str(), "round-2");
    }

    #[tokio::test]
    async fn rejects_reversed_boundaries() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"epoch_id":"round-2","start_timestamp":1767229200000,"end_timestamp":1767225600000}}"#
        )
        .unwrap();

        let err = read_epoch_file(file.path()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid epoch"));
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let err = read_epoch_file(Path::new("/nonexistent/epoch.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/epoch.json"));
    }
}
