use std::path::PathBuf;

use lodge_core::AppError;

/// Configuration for the local storage directory.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub storage_dir: PathBuf,
    pub dataset: String,
    pub key_value_store: String,
    /// Clear previous contents of the dataset and key-value store on open.
    pub purge_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./storage"),
            dataset: "default".into(),
            key_value_store: "default".into(),
            purge_on_start: true,
        }
    }
}

impl StoreConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `LODGE_STORAGE_DIR` (optional, defaults to `./storage`)
    /// - `LODGE_PURGE_ON_START` (optional, `true`/`false`/`1`/`0`, defaults to true)
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LODGE_STORAGE_DIR")
            && !dir.trim().is_empty()
        {
            config.storage_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var("LODGE_PURGE_ON_START") {
            config.purge_on_start = parse_flag(&raw).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid LODGE_PURGE_ON_START '{raw}': expected true/false/1/0"
                ))
            })?;
        }

        Ok(config)
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.storage_dir.join("datasets").join(&self.dataset)
    }

    pub fn key_value_store_dir(&self) -> PathBuf {
        self.storage_dir
            .join("key_value_stores")
            .join(&self.key_value_store)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
