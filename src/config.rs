//! TOML configuration. Every field has a default, so an empty file is valid.

use crate::metrics::logs::DEFAULT_MAX_ENTRIES;
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub logs: LogsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Time between collection cycles.
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogsConfig {
    /// File paths, or `journal` for the systemd journal.
    pub sources: Vec<String>,
    /// Entry cap, applied per source and to the merged list.
    pub max_entries: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            sources: vec!["/var/log/syslog".to_string(), "journal".to_string()],
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            sys_root: PathBuf::from("/sys"),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::load_from_str(&s).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.monitor.interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.monitor.interval_ms > 0,
            "monitor.interval_ms must be > 0, got {}",
            self.monitor.interval_ms
        );
        anyhow::ensure!(
            self.logs.max_entries > 0,
            "logs.max_entries must be > 0, got {}",
            self.logs.max_entries
        );
        anyhow::ensure!(
            !self.paths.proc_root.as_os_str().is_empty(),
            "paths.proc_root must be non-empty"
        );
        anyhow::ensure!(
            !self.paths.sys_root.as_os_str().is_empty(),
            "paths.sys_root must be non-empty"
        );
        Ok(())
    }
}
