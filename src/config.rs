//! Layered configuration for the workspace watcher.
//!
//! Sources, lowest to highest precedence:
//! - Built-in defaults
//! - `.workspace-watch/settings.toml` (searched from the current directory upward)
//! - Environment variables
//! - CLI flags (applied by the command handlers)
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `WSW_` and use double underscores
//! to separate nested levels:
//! - `WSW_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `WSW_WATCH__POLL_INTERVAL_MS=10000` sets `watch.poll_interval_ms`
//! - `WSW_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".workspace-watch";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "WSW_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watcher timing and filtering
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timing and filtering knobs for [`crate::WorkspaceWatcher`].
///
/// The defaults are the reference constants: a 500 ms quiet period and a
/// 4 s safety poll.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Quiet period after the last native event before notifying
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Safety poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Drop events under any path component starting with `.`
    #[serde(default = "default_true")]
    pub skip_hidden: bool,

    /// Directory names whose events are dropped
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Buffer between the native callback and the per-watch forwarder
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `workspace_watch::watcher = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    4000
}
fn default_true() -> bool {
    true
}
fn default_ignored_dirs() -> Vec<String> {
    vec!["node_modules".to_string()]
}
fn default_channel_capacity() -> usize {
    100
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            skip_hidden: default_true(),
            ignored_dirs: default_ignored_dirs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load configuration from defaults, the workspace settings file and the environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting levels; single underscores stay in field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.workspace-watch/settings.toml` from the current directory up to root.
    pub fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Write the settings as pretty TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `root`.
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watch.debounce(), Duration::from_millis(500));
        assert_eq!(settings.watch.poll_interval(), Duration::from_millis(4000));
        assert!(settings.watch.skip_hidden);
        assert_eq!(settings.watch.ignored_dirs, vec!["node_modules"]);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[watch]
debounce_ms = 250
poll_interval_ms = 10000
skip_hidden = false
ignored_dirs = ["vendor", "target"]

[logging]
default = "info"

[logging.modules]
"workspace_watch::watcher" = "trace"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.watch.debounce_ms, 250);
        assert_eq!(settings.watch.poll_interval_ms, 10000);
        assert!(!settings.watch.skip_hidden);
        assert_eq!(settings.watch.ignored_dirs, vec!["vendor", "target"]);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(
            settings.logging.modules.get("workspace_watch::watcher"),
            Some(&"trace".to_string())
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        fs::write(&config_path, "[watch]\ndebounce_ms = 100\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.watch.debounce_ms, 100);
        assert_eq!(settings.watch.poll_interval_ms, 4000);
        assert_eq!(settings.watch.ignored_dirs, vec!["node_modules"]);
        assert_eq!(settings.version, 1);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watch.debounce_ms, 500);
        assert_eq!(settings.watch.poll_interval_ms, 4000);
    }

    #[test]
    fn test_save_settings_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.watch.poll_interval_ms = 1234;
        settings.watch.ignored_dirs.push("vendor".to_string());
        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.watch.poll_interval_ms, 1234);
        assert_eq!(loaded.watch.ignored_dirs, vec!["node_modules", "vendor"]);
    }

    #[test]
    fn test_init_config_file_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();

        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.ends_with(".workspace-watch/settings.toml"));
        assert!(path.exists());

        assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watch]\nchannel_capacity = 10\n").unwrap();

        // Only fields no other test asserts on, since the environment is process-wide
        unsafe {
            std::env::set_var("WSW_WATCH__CHANNEL_CAPACITY", "42");
            std::env::set_var("WSW_LOGGING__DEFAULT", "debug");
        }

        let settings = Settings::load_from(&config_path).unwrap();

        unsafe {
            std::env::remove_var("WSW_WATCH__CHANNEL_CAPACITY");
            std::env::remove_var("WSW_LOGGING__DEFAULT");
        }

        assert_eq!(settings.watch.channel_capacity, 42);
        assert_eq!(settings.logging.default, "debug");
    }
}
