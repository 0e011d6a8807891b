//! TOML configuration for the execution core.
//!
//! ```toml
//! [vm.interpreter]
//! max_call_depth = 1000
//!
//! [vm.jit]
//! enabled = true
//! compilation_threshold = 10
//! sync = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::jit::types::JitConfig;

/// Top-level configuration, loadable from the `[vm]` table of a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub interpreter: InterpreterConfig,
    pub jit: JitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Maximum nesting of method and block activations (default: 1_000).
    /// Nested activations grow the native stack on demand, so the limit is
    /// not bounded by the size of the calling thread's stack.
    pub max_call_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read vm config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse vm config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid vm config: {0}")]
    Invalid(String),
}

impl VmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.max_call_depth must be > 0".to_string(),
            ));
        }
        if self.jit.compilation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "jit.compilation_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a `VmConfig` from an optional TOML file path.
///
/// If `path` is `None`, returns the default config.
pub fn load_config(path: Option<&Path>) -> Result<VmConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(VmConfig::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents)?;
    tracing::debug!(path = %path.display(), ?config, "loaded vm config");
    Ok(config)
}

/// Parse and validate a TOML document. A missing `[vm]` table yields the
/// defaults.
pub fn parse_config(contents: &str) -> Result<VmConfig, ConfigError> {
    let wrapper: TomlWrapper = toml::from_str(contents)?;
    let config = wrapper.vm.unwrap_or_default();
    config.validate()?;
    Ok(config)
}

/// Wrapper for the top-level TOML structure: `[vm]` table.
#[derive(Debug, Deserialize)]
struct TomlWrapper {
    vm: Option<VmConfig>,
}
