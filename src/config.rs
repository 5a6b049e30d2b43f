//! Configuration loading.
//!
//! Settings live in a TOML file. Every field has a default, so an empty or
//! missing default file is a valid configuration.

use crate::error::{Result, SavannahError};
use crate::session::SessionOption;
use crate::throttle::DEFAULT_MAX_STRIDE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SAVANNAH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionDefaults,
    pub transfer: TransferConfig,
    pub refresh: RefreshConfig,
}

/// Persisted session-model option values. Restored after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub replace: bool,
    pub version: bool,
    pub diff: bool,
    pub checksum: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            replace: false,
            version: false,
            diff: true,
            checksum: false,
        }
    }
}

impl SessionDefaults {
    pub fn get(&self, option: SessionOption) -> bool {
        match option {
            SessionOption::Replace => self.replace,
            SessionOption::Version => self.version,
            SessionOption::Diff => self.diff,
            SessionOption::Checksum => self.checksum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Working directory the session returns to after a GET into another directory
    pub default_directory: PathBuf,
    /// Ask once per batch whether to cancel the rest after an identical file
    pub prompt_on_identical: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_directory: PathBuf::from("."),
            prompt_on_identical: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub max_stride: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_stride: DEFAULT_MAX_STRIDE,
        }
    }
}

impl Config {
    /// Load from an explicit path, `$SAVANNAH_CONFIG`, or the per-user config dir.
    ///
    /// Only the per-user default may be absent; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&env_path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            SavannahError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/savannah/config.toml` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("savannah").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.refresh.max_stride == 0 {
            return Err(SavannahError::Config(
                "refresh.max_stride must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.session.diff);
        assert!(!config.session.replace);
        assert_eq!(config.refresh.max_stride, 20);
        assert!(config.transfer.prompt_on_identical);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            [session]
            replace = true

            [refresh]
            max_stride = 8
            "#,
        )
        .unwrap();

        assert!(config.session.replace);
        assert!(config.session.diff);
        assert_eq!(config.refresh.max_stride, 8);
        assert_eq!(config.transfer.default_directory, PathBuf::from("."));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let err = Config::parse("[refresh]\nmax_stride = 0\n").unwrap_err();
        assert!(matches!(err, SavannahError::Config(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::parse("[session\nreplace = ").unwrap_err();
        assert!(matches!(err, SavannahError::Toml(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, SavannahError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        fs::write(&path, "[transfer]\nprompt_on_identical = false\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let config = Config::load(None);
        std::env::remove_var(CONFIG_ENV);

        assert!(!config.unwrap().transfer.prompt_on_identical);
    }

    #[test]
    fn test_session_defaults_lookup() {
        let defaults = SessionDefaults {
            replace: true,
            version: false,
            diff: false,
            checksum: true,
        };
        assert!(defaults.get(SessionOption::Replace));
        assert!(!defaults.get(SessionOption::Version));
        assert!(!defaults.get(SessionOption::Diff));
        assert!(defaults.get(SessionOption::Checksum));
    }
}
