use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GbcConfig {
    pub database: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Lock-contention handling of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub busy_timeout_ms: u64,
    pub retry_on_busy: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 200,
            busy_timeout_ms: 5000,
            retry_on_busy: true,
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.retry_on_busy,
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("gbc.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".gbc").join("gbc.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<GbcConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: GbcConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &GbcConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("gbc.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gbc.toml");
        let config = GbcConfig {
            database: Some(".gbc/gbc.db".to_string()),
            store: StoreConfig {
                max_retries: 2,
                ..StoreConfig::default()
            },
        };
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.database.as_deref(), Some(".gbc/gbc.db"));
        assert_eq!(loaded.store.max_retries, 2);
        assert_eq!(loaded.store.busy_timeout(), Duration::from_millis(5000));

        std::fs::write(&path, "database = \"x.db\"\n").unwrap();
        let partial = load_config(Some(&path)).unwrap().unwrap();
        let policy = partial.store.retry_policy();
        assert!(policy.enabled);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_ensure_db_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = default_database_path_in(dir.path());
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
