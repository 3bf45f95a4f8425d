//! CPU instruction-set detection and the process-wide ISA cap.
//!
//! Detection runs once. The cap comes from [`set_max_cpu_isa`] or, if that
//! was never called, from [`RuntimeConfig::max_cpu_isa`](crate::config::RuntimeConfig).
//! Once any ISA query has been answered the cap is frozen.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuIsa {
    Scalar,
    Sse41,
    Avx,
    Avx2,
    Avx512Core,
    Neon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IsaFamily {
    Generic,
    X86,
    Arm,
}

impl CpuIsa {
    pub fn name(self) -> &'static str {
        match self {
            CpuIsa::Scalar => "scalar",
            CpuIsa::Sse41 => "sse41",
            CpuIsa::Avx => "avx",
            CpuIsa::Avx2 => "avx2",
            CpuIsa::Avx512Core => "avx512_core",
            CpuIsa::Neon => "neon",
        }
    }

    /// Parse the names accepted by `DNNP_MAX_CPU_ISA` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "scalar" | "any" => Some(CpuIsa::Scalar),
            "sse41" | "sse4.1" => Some(CpuIsa::Sse41),
            "avx" => Some(CpuIsa::Avx),
            "avx2" => Some(CpuIsa::Avx2),
            "avx512_core" | "avx512" => Some(CpuIsa::Avx512Core),
            "neon" | "asimd" => Some(CpuIsa::Neon),
            _ => None,
        }
    }

    /// Number of f32 lanes per vector register.
    pub fn vlen_f32(self) -> usize {
        match self {
            CpuIsa::Scalar => 1,
            CpuIsa::Sse41 | CpuIsa::Neon => 4,
            CpuIsa::Avx | CpuIsa::Avx2 => 8,
            CpuIsa::Avx512Core => 16,
        }
    }

    fn family(self) -> IsaFamily {
        match self {
            CpuIsa::Scalar => IsaFamily::Generic,
            CpuIsa::Sse41 | CpuIsa::Avx | CpuIsa::Avx2 | CpuIsa::Avx512Core => IsaFamily::X86,
            CpuIsa::Neon => IsaFamily::Arm,
        }
    }

    fn rank(self) -> u8 {
        match self {
            CpuIsa::Scalar => 0,
            CpuIsa::Sse41 | CpuIsa::Neon => 1,
            CpuIsa::Avx => 2,
            CpuIsa::Avx2 => 3,
            CpuIsa::Avx512Core => 4,
        }
    }

    /// True when code written for `self` runs on a machine offering `other`.
    fn is_subset_of(self, other: CpuIsa) -> bool {
        self == CpuIsa::Scalar || (self.family() == other.family() && self.rank() <= other.rank())
    }
}

static DETECTED: OnceLock<CpuIsa> = OnceLock::new();
static MAX_ISA: OnceLock<Option<CpuIsa>> = OnceLock::new();
static EFFECTIVE: OnceLock<CpuIsa> = OnceLock::new();

/// Best ISA the host supports, ignoring any cap.
pub fn detected_isa() -> CpuIsa {
    *DETECTED.get_or_init(detect_isa_features)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_isa_features() -> CpuIsa {
    if is_x86_feature_detected!("avx512f")
        && is_x86_feature_detected!("avx512bw")
        && is_x86_feature_detected!("avx512vl")
    {
        CpuIsa::Avx512Core
    } else if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        CpuIsa::Avx2
    } else if is_x86_feature_detected!("avx") {
        CpuIsa::Avx
    } else if is_x86_feature_detected!("sse4.1") {
        CpuIsa::Sse41
    } else {
        CpuIsa::Scalar
    }
}

#[cfg(target_arch = "aarch64")]
fn detect_isa_features() -> CpuIsa {
    CpuIsa::Neon
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_isa_features() -> CpuIsa {
    CpuIsa::Scalar
}

/// Cap the ISA used by CPU implementations.
///
/// Succeeds only once and only before the first ISA query; afterwards the
/// cap is fixed and this returns [`Error::InvalidArguments`].
pub fn set_max_cpu_isa(isa: CpuIsa) -> Result<()> {
    MAX_ISA.set(Some(isa)).map_err(|_| {
        Error::invalid(format!(
            "max cpu isa can be set only once, before first use (requested {})",
            isa.name()
        ))
    })?;
    log::info!("max cpu isa set to {}", isa.name());
    Ok(())
}

fn max_isa_cap() -> Option<CpuIsa> {
    *MAX_ISA.get_or_init(|| config::config().max_cpu_isa)
}

/// ISA CPU implementations may use: the detected ISA limited by the cap.
///
/// A cap from a different ISA family than the host is ignored.
pub fn max_cpu_isa() -> CpuIsa {
    *EFFECTIVE.get_or_init(effective_isa)
}

fn effective_isa() -> CpuIsa {
    let detected = detected_isa();
    match max_isa_cap() {
        Some(cap) if cap.is_subset_of(detected) => cap,
        Some(cap) if cap.family() != detected.family() => {
            log::warn!(
                "max cpu isa {} does not apply to host isa {}, ignoring",
                cap.name(),
                detected.name()
            );
            detected
        }
        // Cap above the host level: the host is the limit.
        _ => detected,
    }
}

/// True when kernels written for `isa` may run.
pub fn mayiuse(isa: CpuIsa) -> bool {
    isa.is_subset_of(max_cpu_isa())
}
