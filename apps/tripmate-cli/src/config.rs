//! Store configuration assembled from a JSON file and command-line overrides

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tripmate_store::StoreConfig;

/// Command-line overrides applied on top of the file configuration
#[derive(Debug, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub offline: bool,
}

pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str::<StoreConfig>(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => StoreConfig::default(),
    };

    if let Some(db_path) = overrides.db_path {
        config.db_path = db_path;
    }
    if let Some(media_root) = overrides.media_root {
        config.media_root = media_root;
    }
    if overrides.offline {
        config.exchange_rate_endpoint = None;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = load(None, Overrides::default()).unwrap();
        assert_eq!(config.message_history_limit, 100);
        assert!(config.exchange_rate_endpoint.is_some());
    }

    #[test]
    fn file_values_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tripmate.json");
        std::fs::write(&path, r#"{"db_path": "trip.db", "message_history_limit": 20}"#).unwrap();

        let config = load(
            Some(&path),
            Overrides {
                media_root: Some(PathBuf::from("/tmp/trip-media")),
                offline: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("trip.db"));
        assert_eq!(config.message_history_limit, 20);
        assert_eq!(config.media_root, PathBuf::from("/tmp/trip-media"));
        assert!(config.exchange_rate_endpoint.is_none());
        assert_eq!(config.change_feed_capacity, 256);
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load(Some(&path), Overrides::default()).is_err());
    }
}
