use crate::constants::{self, normalize_extension};
use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, read from `dropwatch.toml`.
///
/// Every section is optional; missing keys fall back to the values in
/// `constants.rs`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub handlers: HandlersConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// How new files are observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// OS change notifications, with an initial listing at start-up
    #[default]
    Notify,
    /// Full directory listing every cycle
    Poll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub dir: PathBuf,
    pub source: SourceKind,
    pub poll_delay_ms: u64,
    pub dedupe_window_ms: u64,
    pub in_progress_extensions: Vec<String>,
    pub ignored_extensions: Vec<String>,
    /// Defaults to `<dir>/quarantine`
    pub quarantine_dir: Option<PathBuf>,
    /// Defaults to `<dir>/.dropwatch_seen.json`
    pub store_path: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::DEFAULT_WATCH_DIR),
            source: SourceKind::default(),
            poll_delay_ms: constants::DEFAULT_POLL_DELAY_MS,
            dedupe_window_ms: constants::DEFAULT_DEDUPE_WINDOW_MS,
            in_progress_extensions: constants::default_in_progress_extensions(),
            ignored_extensions: constants::default_ignored_extensions(),
            quarantine_dir: None,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    /// Directory scanned for `*.toml` handler definitions
    pub dir: PathBuf,
    /// Parent of every handler's archive directory. Defaults to `<watch.dir>/archive`
    pub archive_root: Option<PathBuf>,
    /// Move a file to quarantine after this many failed dispatches.
    /// Unset means retry every cycle.
    pub quarantine_after_failures: Option<u32>,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::DEFAULT_HANDLERS_DIR),
            archive_root: None,
            quarantine_after_failures: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    /// Write the JSON log file next to console output
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::DEFAULT_LOG_DIR),
            file: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint, e.g. "127.0.0.1:9898"
    pub listen: Option<String>,
}

impl Config {
    /// Load configuration from an explicit file. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, otherwise `dropwatch.toml` when present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(addr) = std::env::var("DROPWATCH_METRICS_ADDR") {
            if !addr.trim().is_empty() {
                config.metrics.listen = Some(addr);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        for list in [
            &mut self.watch.in_progress_extensions,
            &mut self.watch.ignored_extensions,
        ] {
            *list = list.iter().map(|e| normalize_extension(e)).collect();
            list.retain(|e| !e.is_empty());
            list.sort();
            list.dedup();
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.poll_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_delay_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(ext) = self
            .watch
            .in_progress_extensions
            .iter()
            .find(|e| self.watch.ignored_extensions.contains(e))
        {
            return Err(ConfigError::Invalid(format!(
                "extension '{}' is listed as both in-progress and ignored",
                ext
            )));
        }
        if self.handlers.quarantine_after_failures == Some(0) {
            return Err(ConfigError::Invalid(
                "handlers.quarantine_after_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.watch.poll_delay_ms)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.watch.dedupe_window_ms)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.watch
            .quarantine_dir
            .clone()
            .unwrap_or_else(|| self.watch.dir.join(constants::QUARANTINE_DIR_NAME))
    }

    pub fn store_path(&self) -> PathBuf {
        self.watch
            .store_path
            .clone()
            .unwrap_or_else(|| self.watch.dir.join(constants::SEEN_STORE_FILE_NAME))
    }

    pub fn archive_root(&self) -> PathBuf {
        self.handlers
            .archive_root
            .clone()
            .unwrap_or_else(|| self.watch.dir.join(constants::ARCHIVE_DIR_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.watch.dir, PathBuf::from("drop"));
        assert_eq!(config.watch.source, SourceKind::Notify);
        assert_eq!(config.poll_delay(), Duration::from_millis(5_000));
        assert_eq!(config.quarantine_dir(), PathBuf::from("drop/quarantine"));
        assert_eq!(config.archive_root(), PathBuf::from("drop/archive"));
        assert!(config.watch.in_progress_extensions.contains(&"crdownload".to_string()));
    }

    #[test]
    fn sections_override_defaults_and_extensions_are_normalized() {
        let config = Config::from_toml_str(
            r#"
            [watch]
            dir = "/srv/inbox"
            source = "poll"
            poll_delay_ms = 1500
            in_progress_extensions = [".PART", "part"]
            ignored_extensions = [".Ini"]
            quarantine_dir = "/srv/quarantine"

            [handlers]
            dir = "/etc/dropwatch/handlers"
            quarantine_after_failures = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.watch.source, SourceKind::Poll);
        assert_eq!(config.watch.in_progress_extensions, vec!["part".to_string()]);
        assert_eq!(config.watch.ignored_extensions, vec!["ini".to_string()]);
        assert_eq!(config.quarantine_dir(), PathBuf::from("/srv/quarantine"));
        assert_eq!(config.store_path(), PathBuf::from("/srv/inbox/.dropwatch_seen.json"));
        assert_eq!(config.handlers.quarantine_after_failures, Some(3));
    }

    #[test]
    fn overlapping_extension_sets_are_rejected() {
        let err = Config::from_toml_str(
            r#"
            [watch]
            in_progress_extensions = ["tmp"]
            ignored_extensions = ["TMP"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_poll_delay_is_rejected() {
        assert!(Config::from_toml_str("[watch]\npoll_delay_ms = 0").is_err());
    }
}
