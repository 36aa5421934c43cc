//! Filesystem sink in the local-storage layout of actor runtimes:
//!
//! ```text
//! <storage>/datasets/<dataset>/000000001.json       one file per record
//! <storage>/key_value_stores/<store>/<KEY>.json     one file per key
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lodge_core::error::AppError;
use lodge_core::traits::Sink;
use serde_json::Value;

use crate::config::StoreConfig;

const MAX_KEY_LEN: usize = 256;

/// Run input lives in the key-value store and survives a purge.
pub const INPUT_FILE: &str = "INPUT.json";

/// Dataset + key-value store on local disk. Clones share the record counter.
#[derive(Debug, Clone)]
pub struct FileSink {
    dataset_dir: Arc<PathBuf>,
    key_value_dir: Arc<PathBuf>,
    next_index: Arc<AtomicU64>,
}

impl FileSink {
    /// Creates the directories, purging previous contents if configured.
    /// Without a purge, numbering continues after the highest existing record.
    pub async fn open(config: &StoreConfig) -> Result<Self, AppError> {
        let dataset_dir = config.dataset_dir();
        let key_value_dir = config.key_value_store_dir();

        if config.purge_on_start {
            purge_dir(&dataset_dir, &[]).await?;
            purge_dir(&key_value_dir, &[INPUT_FILE]).await?;
        }
        for dir in [&dataset_dir, &key_value_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error("create", dir, e))?;
        }

        let last = record_indices(&dataset_dir).await?.into_iter().max().unwrap_or(0);
        tracing::info!(
            dataset = %dataset_dir.display(),
            key_value_store = %key_value_dir.display(),
            existing_records = last,
            "Opened local storage"
        );

        Ok(Self {
            dataset_dir: Arc::new(dataset_dir),
            key_value_dir: Arc::new(key_value_dir),
            next_index: Arc::new(AtomicU64::new(last + 1)),
        })
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn key_value_dir(&self) -> &Path {
        &self.key_value_dir
    }

    /// All dataset records in append order.
    pub async fn items(&self) -> Result<Vec<Value>, AppError> {
        let mut indices = record_indices(&self.dataset_dir).await?;
        indices.sort_unstable();

        let mut items = Vec::with_capacity(indices.len());
        for index in indices {
            let path = self.dataset_dir.join(record_file_name(index));
            items.push(read_json(&path).await?);
        }
        Ok(items)
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, AppError> {
        validate_key(key)?;
        let path = self.key_value_dir.join(format!("{key}.json"));
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_json(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(io_error("stat", &path, e)),
        }
    }
}

impl Sink for FileSink {
    async fn append(&self, record: &Value) -> Result<(), AppError> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let path = self.dataset_dir.join(record_file_name(index));
        write_json_atomic(&path, record).await
    }

    async fn set_value(&self, key: &str, value: &Value) -> Result<(), AppError> {
        validate_key(key)?;
        let path = self.key_value_dir.join(format!("{key}.json"));
        write_json_atomic(&path, value).await
    }
}

fn record_file_name(index: u64) -> String {
    format!("{index:09}.json")
}

/// Keys may contain letters, digits and `!-_.'()`, up to 256 characters.
fn validate_key(key: &str) -> Result<(), AppError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!-_.'()".contains(c));
    if valid {
        Ok(())
    } else {
        Err(AppError::SinkError(format!("Invalid key-value store key '{key}'")))
    }
}

async fn record_indices(dir: &Path) -> Result<Vec<u64>, AppError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("list", dir, e))?;
    let mut indices = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("list", dir, e))?
    {
        let name = entry.file_name();
        if let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_suffix(".json"))
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            indices.push(index);
        }
    }
    Ok(indices)
}

async fn read_json(path: &Path) -> Result<Value, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| io_error("read", path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Writes to a temporary sibling and renames, so readers never see a
/// half-written file.
async fn write_json_atomic(path: &Path, value: &Value) -> Result<(), AppError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::SinkError(format!("Bad path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| io_error("write", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error("rename", path, e))
}

/// Deletes everything in `dir` except the file names in `keep`. A missing
/// directory is already clean.
async fn purge_dir(dir: &Path, keep: &[&str]) -> Result<(), AppError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error("purge", dir, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("purge", dir, e))?
    {
        if entry.file_name().to_str().is_some_and(|n| keep.contains(&n)) {
            continue;
        }
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map_err(|e| io_error("purge", &path, e))?
            .is_dir();
        let removed = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        removed.map_err(|e| io_error("purge", &path, e))?;
    }
    Ok(())
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::SinkError(format!("Failed to {action} {}: {e}", path.display()))
}
