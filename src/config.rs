//! Process-wide runtime configuration.
//!
//! Resolved once, on first use: an optional JSON file named by `DNNP_CONFIG`
//! provides the base values, then `DNNP_VERBOSE`, `DNNP_MAX_CPU_ISA` and
//! `DNNP_NUM_THREADS` override individual fields.

use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::isa::CpuIsa;

pub const ENV_CONFIG: &str = "DNNP_CONFIG";
pub const ENV_VERBOSE: &str = "DNNP_VERBOSE";
pub const ENV_MAX_CPU_ISA: &str = "DNNP_MAX_CPU_ISA";
pub const ENV_NUM_THREADS: &str = "DNNP_NUM_THREADS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 0: silent; 1: log every execution; 2: also log descriptor creation.
    pub verbose: u8,
    /// Upper bound on the ISA CPU implementations may use.
    pub max_cpu_isa: Option<CpuIsa>,
    /// Worker count for new streams; `None` uses the rayon default.
    pub num_threads: Option<usize>,
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::invalid(format!("runtime config: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid(format!("runtime config {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Runtime(format!("runtime config: {e}")))
    }

    /// Apply overrides from a variable lookup. Unparsable values are
    /// reported and skipped.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_VERBOSE) {
            match v.trim().parse::<u8>() {
                Ok(level) => self.verbose = level,
                Err(_) => log::warn!("ignoring {ENV_VERBOSE}={v}: not a level"),
            }
        }
        if let Some(v) = lookup(ENV_MAX_CPU_ISA) {
            match CpuIsa::from_name(&v) {
                Some(isa) => self.max_cpu_isa = Some(isa),
                None => log::warn!("ignoring {ENV_MAX_CPU_ISA}={v}: unknown isa"),
            }
        }
        if let Some(v) = lookup(ENV_NUM_THREADS) {
            match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.num_threads = Some(n),
                _ => log::warn!("ignoring {ENV_NUM_THREADS}={v}: expected a positive count"),
            }
        }
    }

    /// Configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = match std::env::var(ENV_CONFIG) {
            Ok(path) => Self::load(&path).unwrap_or_else(|e| {
                log::warn!("{e}; using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg
    }
}

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// The process configuration, resolved on first call.
pub fn config() -> &'static RuntimeConfig {
    CONFIG.get_or_init(|| {
        let cfg = RuntimeConfig::from_env();
        log::debug!("runtime config: {cfg:?}");
        cfg
    })
}

/// Logging level for descriptor creation lines.
pub(crate) fn verbose_create() -> bool {
    config().verbose >= 2
}

/// Logging level for execution lines.
pub(crate) fn verbose_exec() -> bool {
    config().verbose >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_json_partial_fields_default() {
        let cfg = RuntimeConfig::from_json(r#"{ "verbose": 2 }"#).unwrap();
        assert_eq!(cfg.verbose, 2);
        assert_eq!(cfg.max_cpu_isa, None);
        assert_eq!(cfg.num_threads, None);
    }

    #[test]
    fn test_json_isa_names() {
        let cfg = RuntimeConfig::from_json(r#"{ "max_cpu_isa": "avx512_core", "num_threads": 3 }"#)
            .unwrap();
        assert_eq!(cfg.max_cpu_isa, Some(CpuIsa::Avx512Core));
        assert_eq!(cfg.num_threads, Some(3));
        let back = RuntimeConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_bad_json_is_invalid_arguments() {
        assert!(matches!(
            RuntimeConfig::from_json("{ verbose: }"),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_VERBOSE, "1"),
            (ENV_MAX_CPU_ISA, "avx2"),
            (ENV_NUM_THREADS, "0"),
        ]
        .into_iter()
        .collect();
        let mut cfg = RuntimeConfig {
            num_threads: Some(4),
            ..Default::default()
        };
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.verbose, 1);
        assert_eq!(cfg.max_cpu_isa, Some(CpuIsa::Avx2));
        // zero threads is rejected, previous value kept
        assert_eq!(cfg.num_threads, Some(4));
    }
}
