//! Enumerations shared by every primitive: data types, propagation and
//! primitive kinds, algorithm kinds, and the numeric argument ABI.

use std::fmt;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// Logical dimension size or index.
pub type Dim = i64;

/// Maximum tensor rank a memory descriptor can carry.
pub const MAX_NDIMS: usize = 12;

/// Fixed-capacity dimension array; slots past `ndims` stay zero.
pub type Dims = [Dim; MAX_NDIMS];

// =============================================================================
// Data types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Undef,
    F16,
    Bf16,
    F32,
    S32,
    S8,
    U8,
}

impl DataType {
    /// Element size in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Undef => 0,
            DataType::F16 | DataType::Bf16 => 2,
            DataType::F32 | DataType::S32 => 4,
            DataType::S8 | DataType::U8 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Undef => "undef",
            DataType::F16 => "f16",
            DataType::Bf16 => "bf16",
            DataType::F32 => "f32",
            DataType::S32 => "s32",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(self, DataType::S32 | DataType::S8 | DataType::U8)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F16 | DataType::Bf16 | DataType::F32)
    }

    /// Decode one element stored little-endian at the start of `bytes`.
    #[inline]
    pub fn load_f32(self, bytes: &[u8]) -> f32 {
        match self {
            DataType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            DataType::F16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            DataType::Bf16 => bf16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
            DataType::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            DataType::S8 => bytes[0] as i8 as f32,
            DataType::U8 => bytes[0] as f32,
            DataType::Undef => 0.0,
        }
    }

    /// Encode `v` at the start of `bytes`. Integer targets round half to
    /// even and saturate.
    #[inline]
    pub fn store_f32(self, v: f32, bytes: &mut [u8]) {
        match self {
            DataType::F32 => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            DataType::F16 => bytes[..2].copy_from_slice(&f16::from_f32(v).to_le_bytes()),
            DataType::Bf16 => bytes[..2].copy_from_slice(&bf16::from_f32(v).to_le_bytes()),
            // `as` casts from float saturate and map NaN to zero.
            DataType::S32 => bytes[..4].copy_from_slice(&(v.round_ties_even() as i32).to_le_bytes()),
            DataType::S8 => bytes[0] = (v.round_ties_even() as i8) as u8,
            DataType::U8 => bytes[0] = v.round_ties_even() as u8,
            DataType::Undef => {}
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Propagation / primitive kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropKind {
    #[default]
    Undef,
    ForwardTraining,
    ForwardInference,
    /// Backward pass computing both data and weights gradients.
    Backward,
    BackwardData,
    BackwardWeights,
}

impl PropKind {
    pub fn is_fwd(self) -> bool {
        matches!(self, PropKind::ForwardTraining | PropKind::ForwardInference)
    }

    pub fn is_bwd(self) -> bool {
        matches!(
            self,
            PropKind::Backward | PropKind::BackwardData | PropKind::BackwardWeights
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PropKind::Undef => "undef",
            PropKind::ForwardTraining => "forward_training",
            PropKind::ForwardInference => "forward_inference",
            PropKind::Backward => "backward",
            PropKind::BackwardData => "backward_data",
            PropKind::BackwardWeights => "backward_weights",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Reorder,
    BatchNormalization,
    Convolution,
    Softmax,
    Gemm,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Reorder => "reorder",
            PrimitiveKind::BatchNormalization => "batch_normalization",
            PrimitiveKind::Convolution => "convolution",
            PrimitiveKind::Softmax => "softmax",
            PrimitiveKind::Gemm => "gemm",
        }
    }
}

// =============================================================================
// Algorithm kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftmaxAlg {
    Softmax,
    LogSoftmax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvAlg {
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EltwiseAlg {
    /// `x > 0 ? x : alpha * x`
    Relu,
    /// `alpha * x + beta`
    Linear,
}

impl EltwiseAlg {
    #[inline]
    pub fn apply(self, x: f32, alpha: f32, beta: f32) -> f32 {
        match self {
            EltwiseAlg::Relu => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            EltwiseAlg::Linear => alpha * x + beta,
        }
    }
}

// =============================================================================
// Argument ABI
// =============================================================================

/// Numeric execution-argument identifier.
///
/// Values are stable; several names alias the same slot (mean is the second
/// source, scale-shift is the first weights slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgId(pub i32);

impl ArgId {
    pub const SRC_0: ArgId = ArgId(1);
    pub const SRC: ArgId = ArgId::SRC_0;
    pub const FROM: ArgId = ArgId::SRC_0;
    pub const SRC_1: ArgId = ArgId(2);
    pub const SRC_2: ArgId = ArgId(3);

    pub const DST_0: ArgId = ArgId(17);
    pub const DST: ArgId = ArgId::DST_0;
    pub const TO: ArgId = ArgId::DST_0;
    pub const DST_1: ArgId = ArgId(18);
    pub const DST_2: ArgId = ArgId(19);

    pub const WEIGHTS_0: ArgId = ArgId(33);
    pub const WEIGHTS: ArgId = ArgId::WEIGHTS_0;
    pub const SCALE_SHIFT: ArgId = ArgId::WEIGHTS_0;
    pub const WEIGHTS_1: ArgId = ArgId(34);
    pub const BIAS: ArgId = ArgId::WEIGHTS_1;

    pub const MEAN: ArgId = ArgId::SRC_1;
    pub const VARIANCE: ArgId = ArgId::SRC_2;

    pub const WORKSPACE: ArgId = ArgId(64);
    pub const SCRATCHPAD: ArgId = ArgId(80);

    pub const DIFF_SRC_0: ArgId = ArgId(129);
    pub const DIFF_SRC: ArgId = ArgId::DIFF_SRC_0;
    pub const DIFF_DST_0: ArgId = ArgId(145);
    pub const DIFF_DST: ArgId = ArgId::DIFF_DST_0;
    pub const DIFF_WEIGHTS_0: ArgId = ArgId(161);
    pub const DIFF_WEIGHTS: ArgId = ArgId::DIFF_WEIGHTS_0;
    pub const DIFF_SCALE_SHIFT: ArgId = ArgId::DIFF_WEIGHTS_0;
    pub const DIFF_WEIGHTS_1: ArgId = ArgId(162);
    pub const DIFF_BIAS: ArgId = ArgId::DIFF_WEIGHTS_1;

    /// Every slot a primitive in this crate may bind.
    pub const ALL: [ArgId; 14] = [
        ArgId::SRC_0,
        ArgId::SRC_1,
        ArgId::SRC_2,
        ArgId::DST_0,
        ArgId::DST_1,
        ArgId::DST_2,
        ArgId::WEIGHTS_0,
        ArgId::WEIGHTS_1,
        ArgId::WORKSPACE,
        ArgId::SCRATCHPAD,
        ArgId::DIFF_SRC_0,
        ArgId::DIFF_DST_0,
        ArgId::DIFF_WEIGHTS_0,
        ArgId::DIFF_WEIGHTS_1,
    ];

    pub fn name(self) -> &'static str {
        match self.0 {
            1 => "src",
            2 => "src_1",
            3 => "src_2",
            17 => "dst",
            18 => "dst_1",
            19 => "dst_2",
            33 => "weights",
            34 => "weights_1",
            64 => "workspace",
            80 => "scratchpad",
            129 => "diff_src",
            145 => "diff_dst",
            161 => "diff_weights",
            162 => "diff_weights_1",
            _ => "undef",
        }
    }
}

impl fmt::Display for ArgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a primitive uses one argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgUsage {
    Input,
    Output,
    Unused,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(dt: DataType, v: f32) -> f32 {
        let mut buf = [0u8; 4];
        dt.store_f32(v, &mut buf);
        dt.load_f32(&buf)
    }

    #[test]
    fn test_integer_saturation_and_rounding() {
        assert_eq!(roundtrip(DataType::S8, 300.0), 127.0);
        assert_eq!(roundtrip(DataType::S8, -300.0), -128.0);
        assert_eq!(roundtrip(DataType::U8, -3.0), 0.0);
        assert_eq!(roundtrip(DataType::U8, 2.5), 2.0);
        assert_eq!(roundtrip(DataType::U8, 3.5), 4.0);
        assert_eq!(roundtrip(DataType::S32, -7.5), -8.0);
        assert_eq!(roundtrip(DataType::S8, f32::NAN), 0.0);
    }

    #[test]
    fn test_half_precision_roundtrip() {
        assert_eq!(roundtrip(DataType::F16, 1.5), 1.5);
        assert_eq!(roundtrip(DataType::Bf16, -2.0), -2.0);
        assert_eq!(roundtrip(DataType::F32, 0.1), 0.1);
    }

    #[test]
    fn test_arg_aliases_share_slots() {
        assert_eq!(ArgId::MEAN, ArgId::SRC_1);
        assert_eq!(ArgId::VARIANCE, ArgId::SRC_2);
        assert_eq!(ArgId::SCALE_SHIFT, ArgId::WEIGHTS);
        assert_eq!(ArgId::DIFF_SCALE_SHIFT, ArgId::DIFF_WEIGHTS);
        assert_eq!(ArgId::WORKSPACE.0, 64);
        assert_eq!(ArgId::DIFF_DST.name(), "diff_dst");
    }

    #[test]
    fn test_prop_kind_classes() {
        assert!(PropKind::ForwardInference.is_fwd());
        assert!(!PropKind::ForwardInference.is_bwd());
        assert!(PropKind::BackwardData.is_bwd());
        assert!(!PropKind::Undef.is_fwd());
    }

    #[test]
    fn test_eltwise_apply() {
        assert_eq!(EltwiseAlg::Relu.apply(-2.0, 0.5, 0.0), -1.0);
        assert_eq!(EltwiseAlg::Relu.apply(3.0, 0.5, 0.0), 3.0);
        assert_eq!(EltwiseAlg::Linear.apply(3.0, 2.0, 1.0), 7.0);
    }
}
