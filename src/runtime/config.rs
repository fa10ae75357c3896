use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const MAX_STACK_SIZE: usize = 256;
pub const MAX_CALL_DEPTH: usize = 64;

/// VM limits and module search paths.
///
/// Every field is optional in the JSON form; missing ones take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Operand stack capacity. One more push faults.
    pub max_stack_size: usize,

    /// Nesting limit for modules run by CALL.
    pub max_call_depth: usize,

    /// Directory IMPORT names are resolved against.
    pub module_root: PathBuf,

    /// Directory CALL names are resolved against.
    pub function_root: PathBuf,

    /// Extension appended to CALL names (and tried for bare IMPORT names).
    pub function_extension: String,

    /// Log every decoded instruction at debug level.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_stack_size: MAX_STACK_SIZE,
            max_call_depth: MAX_CALL_DEPTH,
            module_root: PathBuf::from("."),
            function_root: PathBuf::from("colib"),
            function_extension: "col".to_string(),
            trace: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl VmConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_stack_size, 256);
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.function_root, PathBuf::from("colib"));
        assert_eq!(config.function_extension, "col");
        assert!(!config.trace);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VmConfig::from_json_str(r#"{ "max_stack_size": 16, "trace": true }"#).unwrap();
        assert_eq!(config.max_stack_size, 16);
        assert!(config.trace);
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.module_root, PathBuf::from("."));
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(VmConfig::from_json_str("{}").unwrap(), VmConfig::default());
    }

    #[test]
    fn test_bad_json() {
        assert!(VmConfig::from_json_str(r#"{ "max_stack_size": "big" }"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "function_root": "lib", "function_extension": "cb" }}"#).unwrap();
        let config = VmConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.function_root, PathBuf::from("lib"));
        assert_eq!(config.function_extension, "cb");
    }

    #[test]
    fn test_missing_file() {
        let err = VmConfig::from_json_file(Path::new("/no/such/covi.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
