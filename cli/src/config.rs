// Configuration management for relayshare
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/relayshare/config.json
// - Linux: ~/.config/relayshare/config.json
// - Windows: %APPDATA%\relayshare\config.json
//
// RELAYSHARE_CONFIG (or --config) points at another file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RELAYSHARE_CONFIG";

/// Accepted values for `log.level`.
pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name announced to the relay; the relay uses our address when unset
    pub name: Option<String>,

    /// Relay to dial: `host:port` or a full `ws://`/`wss://` URL
    pub server: String,

    /// Address the relay binds when running `serve`
    pub listen: String,

    /// Shared passphrase; unset or empty sends packets unencrypted
    pub password: Option<String>,

    /// History file path, defaults to the data directory
    pub history_file: Option<String>,

    pub clipboard: ClipboardConfig,

    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipboardConfig {
    /// Receive clipboard packets into history only, never the clipboard
    pub readonly: bool,

    /// How often the local clipboard is checked for changes
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of `debug`, `info`, `warn`, `error`; `RUST_LOG` takes precedence
    pub level: String,

    /// Write logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: None,
            server: "127.0.0.1:6679".to_string(),
            listen: relayshare_core::relay::DEFAULT_LISTEN_ADDR.to_string(),
            password: None,
            history_file: None,
            clipboard: ClipboardConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            poll_interval_ms: 500,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("relayshare"))
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        Ok(dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("relayshare"))
    }

    /// Resolve the config file: explicit path, then `RELAYSHARE_CONFIG`,
    /// then the platform default.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(Self::config_dir()?.join("config.json")),
        }
    }

    /// Load config from `path`. A missing file yields the defaults and is
    /// not created.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        if path.is_dir() {
            anyhow::bail!("Config file {} is a directory", path.display());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save config to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create config directory")?;
            }
        }
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Check the fields that have no usable fallback.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            anyhow::bail!("Config field \"server\" is required");
        }
        if self.listen.trim().is_empty() {
            anyhow::bail!("Config field \"listen\" is required");
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            anyhow::bail!(
                "Invalid log.level {:?}, expected one of {}",
                self.log.level,
                LOG_LEVELS.join(", ")
            );
        }
        if self.clipboard.poll_interval_ms == 0 {
            anyhow::bail!("Config field \"clipboard.poll_interval_ms\" must be positive");
        }
        Ok(())
    }

    /// Websocket URL for `server`.
    pub fn server_url(&self) -> String {
        let server = self.server.trim();
        if server.contains("://") {
            server.to_string()
        } else {
            format!("ws://{}/", server)
        }
    }

    /// History file location.
    pub fn history_path(&self) -> Result<PathBuf> {
        match self.history_file.as_deref() {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(Self::data_dir()?.join("history")),
        }
    }

    /// Set a config value by dotted key. The result is validated; nothing
    /// is changed when validation fails.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        match key {
            "name" => next.name = optional(value),
            "server" => next.server = value.to_string(),
            "listen" => next.listen = value.to_string(),
            "password" => next.password = optional(value),
            "history_file" => next.history_file = optional(value),
            "clipboard.readonly" => {
                next.clipboard.readonly = value.parse()
                    .context("Invalid boolean value")?;
            }
            "clipboard.poll_interval_ms" => {
                next.clipboard.poll_interval_ms = value.parse()
                    .context("Invalid number")?;
            }
            "log.level" => next.log.level = value.to_lowercase(),
            "log.file" => next.log.file = optional(value),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Get a config value. The password is masked; `None` means the key is
    /// unset or unknown (see [`KEYS`]).
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "name" => self.name.clone(),
            "server" => Some(self.server.clone()),
            "listen" => Some(self.listen.clone()),
            "password" => self
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|_| MASK.to_string()),
            "history_file" => self.history_file.clone(),
            "clipboard.readonly" => Some(self.clipboard.readonly.to_string()),
            "clipboard.poll_interval_ms" => Some(self.clipboard.poll_interval_ms.to_string()),
            "log.level" => Some(self.log.level.clone()),
            "log.file" => self.log.file.clone(),
            _ => None,
        }
    }

    /// List all config values. The password is masked.
    pub fn list(&self) -> Vec<(String, String)> {
        let auto = || "(auto)".to_string();
        vec![
            ("name".to_string(), self.name.clone().unwrap_or_else(|| "(remote addr)".to_string())),
            ("server".to_string(), self.server_url()),
            ("listen".to_string(), self.listen.clone()),
            (
                "password".to_string(),
                match self.password.as_deref() {
                    Some(p) if !p.is_empty() => MASK.to_string(),
                    _ => "(none, insecure)".to_string(),
                },
            ),
            ("history_file".to_string(), self.history_file.clone().unwrap_or_else(auto)),
            ("clipboard.readonly".to_string(), self.clipboard.readonly.to_string()),
            (
                "clipboard.poll_interval_ms".to_string(),
                format!("{}ms", self.clipboard.poll_interval_ms),
            ),
            ("log.level".to_string(), self.log.level.clone()),
            ("log.file".to_string(), self.log.file.clone().unwrap_or_else(|| "(stderr)".to_string())),
        ]
    }
}

/// Every key `get`, `set` and `list` understand.
pub const KEYS: [&str; 9] = [
    "name",
    "server",
    "listen",
    "password",
    "history_file",
    "clipboard.readonly",
    "clipboard.poll_interval_ms",
    "log.level",
    "log.file",
];

const MASK: &str = "********";

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "0.0.0.0:6679");
        assert_eq!(config.log.level, "info");
        assert!(!config.clipboard.readonly);
        assert!(config.password.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_yields_defaults_without_creating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server":"relay.lan:7000","clipboard":{"readonly":true}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server, "relay.lan:7000");
        assert!(config.clipboard.readonly);
        assert_eq!(config.clipboard.poll_interval_ms, 500);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");

        let mut config = Config::default();
        config.set("name", "laptop").unwrap();
        config.set("password", "hunter2").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_server_url_expansion() {
        let mut config = Config::default();
        config.server = "10.0.0.2:6679".to_string();
        assert_eq!(config.server_url(), "ws://10.0.0.2:6679/");

        config.server = "wss://relay.example.com/share".to_string();
        assert_eq!(config.server_url(), "wss://relay.example.com/share");
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut config = Config::default();
        config.server = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.listen = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.clipboard.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_get_by_dotted_key() {
        let mut config = Config::default();
        config.set("clipboard.readonly", "true").unwrap();
        config.set("log.level", "DEBUG").unwrap();
        config.set("log.file", "/tmp/relayshare.log").unwrap();

        assert_eq!(config.get("clipboard.readonly").as_deref(), Some("true"));
        assert_eq!(config.get("log.level").as_deref(), Some("debug"));
        assert_eq!(config.get("log.file").as_deref(), Some("/tmp/relayshare.log"));

        config.set("log.file", "").unwrap();
        assert!(config.get("log.file").is_none());
        assert!(config.get("nope").is_none());
    }

    #[test]
    fn test_set_rejects_invalid_values_unchanged() {
        let mut config = Config::default();
        assert!(config.set("clipboard.poll_interval_ms", "0").is_err());
        assert!(config.set("clipboard.readonly", "maybe").is_err());
        assert!(config.set("log.level", "loud").is_err());
        assert!(config.set("unknown", "x").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_masks_password() {
        let mut config = Config::default();
        config.set("password", "hunter2").unwrap();

        let listed = config.list();
        let password = listed.iter().find(|(k, _)| k == "password").unwrap();
        assert_eq!(password.1, "********");
        assert!(listed.iter().all(|(_, v)| !v.contains("hunter2")));
    }

    #[test]
    fn test_get_masks_password() {
        let mut config = Config::default();
        assert!(config.get("password").is_none());

        config.set("password", "hunter2").unwrap();
        assert_eq!(config.get("password").as_deref(), Some("********"));
        assert_eq!(config.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_keys_cover_every_setting() {
        let config = Config::default();
        let listed: Vec<String> = config.list().into_iter().map(|(k, _)| k).collect();
        assert_eq!(listed, KEYS);

        for key in KEYS {
            let value = match key {
                "clipboard.readonly" => "true",
                "clipboard.poll_interval_ms" => "500",
                "log.level" => "info",
                "server" | "listen" => "127.0.0.1:7000",
                _ => "x",
            };
            let mut config = Config::default();
            config.set(key, value).unwrap();
            assert!(config.get(key).is_some(), "{} not readable", key);
        }
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/custom.json");
        assert_eq!(Config::resolve_path(Some(path)).unwrap(), path);
    }
}
