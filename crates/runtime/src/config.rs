//! Runtime configuration
//!
//! Read from a TOML file; every field has a default so an empty file (or no
//! file) is valid:
//!
//! ```toml
//! [gc]
//! ballast = 3000000
//! verify_marks = false
//! leak_policy = "report"   # or "panic"
//!
//! [symbols]
//! initial_capacity = 1024
//!
//! [eval]
//! max_depth = 256
//! data_stack_capacity = 256
//! ```
//!
//! `REN_CONFIG` names a file to load when the host does not pass one.

use ren_core::{HeapConfig, LeakPolicy};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "REN_CONFIG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakSetting {
    #[default]
    Report,
    Panic,
}

impl From<LeakSetting> for LeakPolicy {
    fn from(s: LeakSetting) -> Self {
        match s {
            LeakSetting::Report => LeakPolicy::Report,
            LeakSetting::Panic => LeakPolicy::Panic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Bytes of allocation between automatic collections.
    pub ballast: usize,
    pub verify_marks: bool,
    pub leak_policy: LeakSetting,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            ballast: ren_core::heap::DEFAULT_BALLAST,
            verify_marks: cfg!(debug_assertions),
            leak_policy: LeakSetting::Report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SymbolConfig {
    pub initial_capacity: usize,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        SymbolConfig {
            initial_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// Nested evaluations allowed before a stack-overflow error.
    pub max_depth: usize,
    pub data_stack_capacity: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: 256,
            data_stack_capacity: ren_core::data_stack::DEFAULT_DATA_STACK_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub gc: GcConfig,
    pub symbols: SymbolConfig,
    pub eval: EvalConfig,
}

impl RuntimeConfig {
    pub fn from_toml(source: &str) -> Result<Self, String> {
        let config: RuntimeConfig =
            toml::from_str(source).map_err(|e| format!("Failed to parse runtime config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml(&source)
    }

    /// Load the file named by `REN_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, String> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.eval.max_depth == 0 {
            return Err("eval.max_depth must be at least 1".to_string());
        }
        if self.symbols.initial_capacity == 0 {
            return Err("symbols.initial_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn heap_config(&self) -> HeapConfig {
        HeapConfig {
            ballast: self.gc.ballast,
            symbol_capacity: self.symbols.initial_capacity,
            verify_marks: self.gc.verify_marks,
            leak_policy: self.gc.leak_policy.into(),
            data_stack_capacity: self.eval.data_stack_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_source_gives_defaults() {
        let config = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.eval.max_depth, 256);
    }

    #[test]
    fn test_partial_sections() {
        let config = RuntimeConfig::from_toml(
            r#"
            [gc]
            ballast = 4096
            leak_policy = "panic"
            "#,
        )
        .unwrap();
        assert_eq!(config.gc.ballast, 4096);
        assert_eq!(config.gc.leak_policy, LeakSetting::Panic);
        assert_eq!(config.symbols, SymbolConfig::default());

        let heap = config.heap_config();
        assert_eq!(heap.ballast, 4096);
        assert_eq!(heap.leak_policy, LeakPolicy::Panic);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = RuntimeConfig::from_toml("[gc]\nballast_bytes = 1\n").unwrap_err();
        assert!(err.contains("Failed to parse runtime config"));
    }

    #[test]
    fn test_zero_depth_rejected() {
        let err = RuntimeConfig::from_toml("[eval]\nmax_depth = 0\n").unwrap_err();
        assert!(err.contains("max_depth"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[symbols]\ninitial_capacity = 64").unwrap();
        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.symbols.initial_capacity, 64);
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_file(Path::new("/nonexistent/ren.toml")).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[eval]\nmax_depth = 32").unwrap();

        // SAFETY: serialized with the other environment tests.
        unsafe { std::env::set_var(CONFIG_ENV, file.path()) };
        let config = RuntimeConfig::from_env().unwrap();
        assert_eq!(config.eval.max_depth, 32);

        unsafe { std::env::remove_var(CONFIG_ENV) };
        assert_eq!(RuntimeConfig::from_env().unwrap(), RuntimeConfig::default());
    }
}
