// src/config.rs
//! Configuration for the eden launcher
//!
//! The state directory passed with `--config-dir` may contain an
//! `edenfs.toml` file with the following sections:
//! - [core] - Daemon binary override
//! - [systemd] - Experimental systemd mode, systemctl program, unit directory
//! - [startup] - Startup timeout
//!
//! The `EDEN_EXPERIMENTAL_SYSTEMD` environment variable takes precedence
//! over `[systemd] enabled`.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable toggling the experimental systemd mode
pub const SYSTEMD_ENV_VAR: &str = "EDEN_EXPERIMENTAL_SYSTEMD";

/// Name of the configuration file inside the state directory
pub const CONFIG_FILE_NAME: &str = "edenfs.toml";

/// Default state directory name under the user's home
pub const DEFAULT_STATE_DIR_NAME: &str = ".eden";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EdenConfig {
    /// Core settings
    #[serde(default)]
    pub core: CoreSection,

    /// Systemd integration settings
    #[serde(default)]
    pub systemd: SystemdSection,

    /// Daemon startup settings
    #[serde(default)]
    pub startup: StartupSection,
}

/// Core configuration section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreSection {
    /// Path to the edenfs executable
    #[serde(default)]
    pub daemon_binary: Option<PathBuf>,
}

/// Systemd configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct SystemdSection {
    /// Run edenfs as a user service
    #[serde(default)]
    pub enabled: bool,

    /// systemctl program used to talk to the user service manager
    #[serde(default = "default_systemctl")]
    pub systemctl: PathBuf,

    /// Directory where the unit template is installed
    #[serde(default)]
    pub unit_dir: Option<PathBuf>,
}

impl Default for SystemdSection {
    fn default() -> Self {
        Self {
            enabled: false,
            systemctl: default_systemctl(),
            unit_dir: None,
        }
    }
}

fn default_systemctl() -> PathBuf {
    PathBuf::from("systemctl")
}

/// Startup configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct StartupSection {
    /// Seconds to wait for the daemon to report startup
    #[serde(default = "default_startup_timeout")]
    pub timeout_secs: u64,
}

impl Default for StartupSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_startup_timeout(),
        }
    }
}

fn default_startup_timeout() -> u64 {
    60
}

impl EdenConfig {
    /// Load `edenfs.toml` from a state directory
    ///
    /// A missing file yields the default configuration.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EdenConfig =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.startup.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "startup.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.systemd.systemctl.as_os_str().is_empty() {
            return Err(Error::ConfigError(
                "systemd.systemctl must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the experimental systemd mode is active for this process
    pub fn systemd_enabled(&self) -> bool {
        self.systemd_enabled_with(std::env::var(SYSTEMD_ENV_VAR).ok().as_deref())
    }

    /// Resolve systemd mode against an explicit environment value
    pub fn systemd_enabled_with(&self, env_value: Option<&str>) -> bool {
        match env_value {
            Some(value) => parse_env_flag(value),
            None => self.systemd.enabled,
        }
    }

    /// Startup timeout as a duration
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup.timeout_secs)
    }

    /// Directory holding user unit files
    pub fn unit_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.systemd.unit_dir {
            return Ok(dir.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("systemd").join("user"))
            .ok_or_else(|| Error::ConfigError("cannot determine user config directory".to_string()))
    }
}

/// Default state directory (`$HOME/.eden`)
pub fn default_config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_STATE_DIR_NAME))
        .ok_or_else(|| Error::ConfigError("cannot determine home directory".to_string()))
}

fn parse_env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EdenConfig::default();
        assert!(config.core.daemon_binary.is_none());
        assert!(!config.systemd.enabled);
        assert_eq!(config.systemd.systemctl, PathBuf::from("systemctl"));
        assert_eq!(config.startup_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[core]
daemon_binary = "/usr/local/bin/edenfs"

[systemd]
enabled = true
systemctl = "/tmp/fake-systemctl"
unit_dir = "/tmp/units"

[startup]
timeout_secs = 5
"#;
        let config = EdenConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(
            config.core.daemon_binary,
            Some(PathBuf::from("/usr/local/bin/edenfs"))
        );
        assert!(config.systemd.enabled);
        assert_eq!(config.unit_dir().unwrap(), PathBuf::from("/tmp/units"));
        assert_eq!(config.startup_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_timeout() {
        let toml_str = r#"
[startup]
timeout_secs = 0
"#;
        assert!(EdenConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = EdenConfig::default();
        assert!(config.systemd_enabled_with(Some("1")));
        assert!(config.systemd_enabled_with(Some("true")));
        assert!(!config.systemd_enabled_with(Some("0")));
        assert!(!config.systemd_enabled_with(None));

        config.systemd.enabled = true;
        assert!(config.systemd_enabled_with(None));
        assert!(!config.systemd_enabled_with(Some("")));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = EdenConfig::load(temp_dir.path()).unwrap();
        assert!(!config.systemd.enabled);
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "[systemd\n").unwrap();
        let err = EdenConfig::load(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
