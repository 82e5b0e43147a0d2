use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageFormat;
use crate::utils;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config mutex poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where event files, trackers and logs live. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub formats: Vec<StorageFormat>,
    pub timestamp_files: bool,
    pub digest_max_events: Option<usize>,
    pub photographer_email: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            formats: vec![StorageFormat::Json, StorageFormat::Csv],
            timestamp_files: true,
            digest_max_events: Some(25),
            photographer_email: None,
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(utils::data_root)
    }

    pub fn digest_tracking_path(&self) -> PathBuf {
        self.data_dir().join("digest_tracking.json")
    }

    pub fn selections_path(&self) -> PathBuf {
        self.data_dir().join("selections.json")
    }

    pub fn outreach_tracking_path(&self) -> PathBuf {
        self.data_dir().join("outreach_sent.json")
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    /// Falls back to defaults when the file is missing or unreadable.
    pub fn load_from(path: PathBuf) -> Self {
        let data = match read_config(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), "using default config: {err}");
                AppConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.data.lock().map_err(|_| ConfigError::Poisoned)?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path)?;
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load_from(dir.path().join("config.json"));
        let config = store.read();
        assert_eq!(config.formats, vec![StorageFormat::Json, StorageFormat::Csv]);
        assert!(config.timestamp_files);
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::load_from(path.clone());
        store
            .update(|config| {
                config.formats = vec![StorageFormat::Sqlite];
                config.photographer_email = Some("photo@example.com".to_string());
            })
            .expect("update config");

        let reloaded = ConfigStore::load_from(path).read();
        assert_eq!(reloaded.formats, vec![StorageFormat::Sqlite]);
        assert_eq!(
            reloaded.photographer_email.as_deref(),
            Some("photo@example.com")
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"digest_max_events": 10}"#).expect("write");
        let config = ConfigStore::load_from(path).read();
        assert_eq!(config.digest_max_events, Some(10));
        assert_eq!(config.formats.len(), 2);
    }
}
