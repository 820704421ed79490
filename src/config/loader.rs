//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ConfigPatch;

/// Error type for configuration loading and merging.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidOption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Load a configuration patch from a TOML file.
pub fn load_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_patch(&content)
}

/// Parse a configuration patch from TOML text.
pub fn parse_patch(content: &str) -> Result<ConfigPatch, ConfigError> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_patch_from_file() {
        let path = std::env::temp_dir().join(format!("routekit-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "logs = \"tiny\"\nstatic = \"public\"\n").unwrap();
        let patch = load_patch(&path).unwrap();
        assert_eq!(patch.get("logs"), Some(&json!("tiny")));
        assert_eq!(patch.get("static"), Some(&json!("public")));
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_patch(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        assert!(matches!(parse_patch("port = "), Err(ConfigError::Parse(_))));
    }
}
