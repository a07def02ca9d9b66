//! HarnessConfig - TOML 設定
//!
//! 全フィールドにデフォルトがあるので、空ファイルでも有効な設定になる。
//!
//! ```toml
//! [pool]
//! size = 4
//! thread_name_prefix = "fixed-io"
//!
//! [store]
//! backend = "sqlite"
//! path = "wal_test.db"
//! wal = true
//! # 省略時は busy な writer を無期限に待つ
//! busy_timeout_ms = 30000
//!
//! [coordinator]
//! thread_name = "coordinator"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::delivery::DEFAULT_COORDINATOR_THREAD;
use crate::domain::HarnessError;
use crate::pool::{DEFAULT_POOL_SIZE, DEFAULT_THREAD_PREFIX};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub pool: PoolConfig,
    pub store: StoreConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
    /// Database file for the sqlite backend.
    pub path: PathBuf,
    pub wal: bool,
    /// Give up on a busy writer lock after this long. Unset waits forever.
    pub busy_timeout_ms: Option<u64>,
    /// Memory backend only: publish inserted values one character per step.
    pub torn_write_step_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: PathBuf::from("wal_test.db"),
            wal: true,
            busy_timeout_ms: None,
            torn_write_step_ms: None,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }

    pub fn torn_write_step(&self) -> Option<Duration> {
        self.torn_write_step_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub thread_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_COORDINATOR_THREAD.to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, HarnessError> {
        let config: Self =
            toml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.pool.size == 0 {
            return Err(HarnessError::Config("pool.size must be at least 1".into()));
        }
        if self.pool.thread_name_prefix.is_empty() {
            return Err(HarnessError::Config(
                "pool.thread_name_prefix must not be empty".into(),
            ));
        }
        if self.store.backend == Backend::Sqlite && self.store.torn_write_step_ms.is_some() {
            return Err(HarnessError::Config(
                "store.torn_write_step_ms only applies to the memory backend".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_text_gives_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.pool.thread_name_prefix, "fixed-io");
        assert_eq!(config.store.busy_timeout(), None);
        assert!(config.store.wal);
        assert_eq!(config.coordinator.thread_name, "coordinator");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [store]
            backend = "sqlite"
            path = "/tmp/x.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, Backend::Sqlite);
        assert_eq!(config.store.path, PathBuf::from("/tmp/x.db"));
        assert!(config.store.wal);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn busy_timeout_is_opt_in() {
        let config = HarnessConfig::from_toml_str("[store]\nbusy_timeout_ms = 250").unwrap();
        assert_eq!(config.store.busy_timeout(), Some(Duration::from_millis(250)));
    }

    #[rstest]
    #[case::zero_pool("[pool]\nsize = 0")]
    #[case::empty_prefix("[pool]\nthread_name_prefix = \"\"")]
    #[case::torn_on_sqlite("[store]\nbackend = \"sqlite\"\ntorn_write_step_ms = 5")]
    #[case::bad_backend("[store]\nbackend = \"postgres\"")]
    fn invalid_configs_are_rejected(#[case] text: &str) {
        assert!(matches!(
            HarnessConfig::from_toml_str(text),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        fs::write(&path, "[pool]\nsize = 2\n[store]\ntorn_write_step_ms = 10\n").unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.store.torn_write_step(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = HarnessConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, HarnessError::Config(msg) if msg.contains("here.toml")));
    }
}
