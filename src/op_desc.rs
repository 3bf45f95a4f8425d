//! Operation descriptors: what to compute, independent of how.
//!
//! Constructors validate shapes and reject an `any` layout on arguments that
//! are pure inputs. Output slots may stay `any` for an implementation to
//! resolve.

use std::ops::BitOr;

use crate::error::{Error, Result};
use crate::memory_desc::{FormatTag, MemoryDesc, MemoryDescWrapper};
use crate::types::{ConvAlg, DataType, Dim, PrimitiveKind, PropKind, SoftmaxAlg};

/// Batch-normalization flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BatchNormFlags(u32);

impl BatchNormFlags {
    pub const NONE: BatchNormFlags = BatchNormFlags(0);
    /// Mean and variance are inputs instead of being computed.
    pub const USE_GLOBAL_STATS: BatchNormFlags = BatchNormFlags(0x1);
    pub const USE_SCALESHIFT: BatchNormFlags = BatchNormFlags(0x2);
    /// Apply ReLU to the result; training keeps the mask in the workspace.
    pub const FUSE_NORM_RELU: BatchNormFlags = BatchNormFlags(0x4);

    pub fn contains(self, other: BatchNormFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !0x7 == 0).then_some(BatchNormFlags(bits))
    }
}

impl BitOr for BatchNormFlags {
    type Output = BatchNormFlags;

    fn bitor(self, rhs: Self) -> Self {
        BatchNormFlags(self.0 | rhs.0)
    }
}

fn require_concrete(md: &MemoryDesc, what: &str) -> Result<()> {
    if md.is_zero() {
        return Err(Error::invalid(format!("{what} descriptor is missing")));
    }
    if md.is_any() {
        return Err(Error::invalid(format!(
            "{what} is an input and cannot use the any layout"
        )));
    }
    Ok(())
}

// =============================================================================
// Batch normalization
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormDesc {
    pub prop_kind: PropKind,
    pub data_desc: MemoryDesc,
    /// Zero for forward propagation.
    pub diff_data_desc: MemoryDesc,
    pub data_scaleshift_desc: MemoryDesc,
    /// Non-zero only for `PropKind::Backward` with `USE_SCALESHIFT`.
    pub diff_data_scaleshift_desc: MemoryDesc,
    pub stat_desc: MemoryDesc,
    pub epsilon: f32,
    pub flags: BatchNormFlags,
}

impl BatchNormDesc {
    pub fn forward(
        prop_kind: PropKind,
        data_desc: &MemoryDesc,
        epsilon: f32,
        flags: BatchNormFlags,
    ) -> Result<Self> {
        if !prop_kind.is_fwd() {
            return Err(Error::invalid(format!(
                "{} is not a forward propagation kind",
                prop_kind.name()
            )));
        }
        Self::init(prop_kind, None, data_desc, epsilon, flags)
    }

    pub fn backward(
        prop_kind: PropKind,
        diff_data_desc: &MemoryDesc,
        data_desc: &MemoryDesc,
        epsilon: f32,
        flags: BatchNormFlags,
    ) -> Result<Self> {
        if !matches!(prop_kind, PropKind::Backward | PropKind::BackwardData) {
            return Err(Error::invalid(format!(
                "{} is not a batch normalization backward kind",
                prop_kind.name()
            )));
        }
        Self::init(prop_kind, Some(diff_data_desc), data_desc, epsilon, flags)
    }

    fn init(
        prop_kind: PropKind,
        diff_data_desc: Option<&MemoryDesc>,
        data_desc: &MemoryDesc,
        epsilon: f32,
        flags: BatchNormFlags,
    ) -> Result<Self> {
        require_concrete(data_desc, "batch normalization data")?;
        if !(2..=5).contains(&data_desc.ndims) {
            return Err(Error::invalid(format!(
                "batch normalization supports 2 to 5 dims, got {}",
                data_desc.ndims
            )));
        }
        if !(epsilon.is_finite() && epsilon >= 0.0) {
            return Err(Error::invalid(format!("epsilon {epsilon} must be finite and >= 0")));
        }
        if let Some(diff) = diff_data_desc {
            if diff.is_zero() || diff.dims() != data_desc.dims() {
                return Err(Error::invalid(
                    "diff data descriptor must have the data dimensions",
                ));
            }
        }

        let c = data_desc.dims[1];
        let stat_desc = MemoryDesc::any(&[c], DataType::F32)?;
        let data_scaleshift_desc = MemoryDesc::any(&[2, c], DataType::F32)?;
        let diff_data_scaleshift_desc = if prop_kind == PropKind::Backward
            && flags.contains(BatchNormFlags::USE_SCALESHIFT)
        {
            data_scaleshift_desc
        } else {
            MemoryDesc::zero()
        };

        Ok(Self {
            prop_kind,
            data_desc: *data_desc,
            diff_data_desc: diff_data_desc.copied().unwrap_or_default(),
            data_scaleshift_desc,
            diff_data_scaleshift_desc,
            stat_desc,
            epsilon,
            flags,
        })
    }

    /// Mean and variance are supplied by the caller.
    pub fn stats_is_src(&self) -> bool {
        self.flags.contains(BatchNormFlags::USE_GLOBAL_STATS)
    }

    pub fn use_scaleshift(&self) -> bool {
        self.flags.contains(BatchNormFlags::USE_SCALESHIFT)
    }

    pub fn fuse_norm_relu(&self) -> bool {
        self.flags.contains(BatchNormFlags::FUSE_NORM_RELU)
    }

    pub fn is_training(&self) -> bool {
        self.prop_kind == PropKind::ForwardTraining
    }
}

// =============================================================================
// Softmax
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxDesc {
    pub prop_kind: PropKind,
    pub alg: SoftmaxAlg,
    /// Source for forward, destination for backward.
    pub data_desc: MemoryDesc,
    /// Zero for forward propagation.
    pub diff_desc: MemoryDesc,
    pub axis: usize,
}

impl SoftmaxDesc {
    pub fn forward(prop_kind: PropKind, alg: SoftmaxAlg, data_desc: &MemoryDesc, axis: usize) -> Result<Self> {
        if !prop_kind.is_fwd() {
            return Err(Error::invalid(format!(
                "{} is not a forward propagation kind",
                prop_kind.name()
            )));
        }
        require_concrete(data_desc, "softmax source")?;
        Self::check_axis(data_desc, axis)?;
        Ok(Self {
            prop_kind,
            alg,
            data_desc: *data_desc,
            diff_desc: MemoryDesc::zero(),
            axis,
        })
    }

    pub fn backward(alg: SoftmaxAlg, diff_desc: &MemoryDesc, data_desc: &MemoryDesc, axis: usize) -> Result<Self> {
        require_concrete(data_desc, "softmax destination")?;
        Self::check_axis(data_desc, axis)?;
        if diff_desc.is_zero() || diff_desc.dims() != data_desc.dims() {
            return Err(Error::invalid("softmax diff descriptor must match data dims"));
        }
        Ok(Self {
            prop_kind: PropKind::BackwardData,
            alg,
            data_desc: *data_desc,
            diff_desc: *diff_desc,
            axis,
        })
    }

    fn check_axis(md: &MemoryDesc, axis: usize) -> Result<()> {
        if axis >= md.ndims {
            return Err(Error::invalid(format!(
                "softmax axis {axis} out of range for {} dims",
                md.ndims
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Convolution
// =============================================================================

/// Spatial parameters are stored for up to three spatial dims; unused
/// trailing entries are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionDesc {
    pub prop_kind: PropKind,
    pub alg: ConvAlg,
    pub src_desc: MemoryDesc,
    pub weights_desc: MemoryDesc,
    /// Zero when the convolution has no bias.
    pub bias_desc: MemoryDesc,
    pub dst_desc: MemoryDesc,
    pub strides: [Dim; 3],
    /// Dilation as extra gaps between kernel taps; 0 means dense.
    pub dilates: [Dim; 3],
    pub padding_l: [Dim; 3],
    pub padding_r: [Dim; 3],
    pub accum_data_type: DataType,
}

pub struct ConvShape<'a> {
    pub strides: &'a [Dim],
    pub dilates: &'a [Dim],
    pub padding_l: &'a [Dim],
    pub padding_r: &'a [Dim],
}

impl ConvolutionDesc {
    pub fn forward(
        prop_kind: PropKind,
        alg: ConvAlg,
        src_desc: &MemoryDesc,
        weights_desc: &MemoryDesc,
        bias_desc: Option<&MemoryDesc>,
        dst_desc: &MemoryDesc,
        shape: &ConvShape<'_>,
    ) -> Result<Self> {
        if !prop_kind.is_fwd() {
            return Err(Error::invalid(format!(
                "{} is not a forward propagation kind",
                prop_kind.name()
            )));
        }
        require_concrete(src_desc, "convolution source")?;
        require_concrete(weights_desc, "convolution weights")?;
        if let Some(bias) = bias_desc {
            require_concrete(bias, "convolution bias")?;
        }
        if dst_desc.is_zero() {
            return Err(Error::invalid("convolution destination descriptor is missing"));
        }

        let nd = src_desc.ndims;
        if !(3..=5).contains(&nd) || weights_desc.ndims != nd || dst_desc.ndims != nd {
            return Err(Error::invalid(format!(
                "convolution ranks src {nd} weights {} dst {} are not supported",
                weights_desc.ndims, dst_desc.ndims
            )));
        }
        let nsp = nd - 2;
        for (name, v) in [
            ("strides", shape.strides),
            ("dilates", shape.dilates),
            ("padding_l", shape.padding_l),
            ("padding_r", shape.padding_r),
        ] {
            if v.len() != nsp {
                return Err(Error::invalid(format!(
                    "{name} has {} entries for {nsp} spatial dims",
                    v.len()
                )));
            }
        }
        if shape.strides.iter().any(|&s| s <= 0)
            || shape.dilates.iter().any(|&d| d < 0)
            || shape.padding_l.iter().chain(shape.padding_r).any(|&p| p < 0)
        {
            return Err(Error::invalid("negative padding or non-positive stride"));
        }

        let (src, wei, dst) = (src_desc.dims(), weights_desc.dims(), dst_desc.dims());
        let (oc, ic) = (wei[0], wei[1]);
        if src[0] != dst[0] || src[1] != ic || dst[1] != oc {
            return Err(Error::invalid(format!(
                "convolution channel mismatch: src {src:?} weights {wei:?} dst {dst:?}"
            )));
        }
        if let Some(bias) = bias_desc {
            if bias.dims() != [oc] {
                return Err(Error::invalid(format!("bias dims {:?} != [{oc}]", bias.dims())));
            }
        }
        for i in 0..nsp {
            let ker_range = (wei[2 + i] - 1) * (shape.dilates[i] + 1) + 1;
            let span = src[2 + i] - ker_range + shape.padding_l[i] + shape.padding_r[i];
            let out = if span < 0 { 0 } else { span / shape.strides[i] + 1 };
            if out != dst[2 + i] {
                return Err(Error::invalid(format!(
                    "spatial dim {i}: expected output {out}, destination has {}",
                    dst[2 + i]
                )));
            }
        }

        let accum_data_type = if src_desc.data_type.is_integral() {
            DataType::S32
        } else {
            DataType::F32
        };
        let mut d = Self {
            prop_kind,
            alg,
            src_desc: *src_desc,
            weights_desc: *weights_desc,
            bias_desc: bias_desc.copied().unwrap_or_default(),
            dst_desc: *dst_desc,
            strides: [0; 3],
            dilates: [0; 3],
            padding_l: [0; 3],
            padding_r: [0; 3],
            accum_data_type,
        };
        d.strides[..nsp].copy_from_slice(shape.strides);
        d.dilates[..nsp].copy_from_slice(shape.dilates);
        d.padding_l[..nsp].copy_from_slice(shape.padding_l);
        d.padding_r[..nsp].copy_from_slice(shape.padding_r);
        Ok(d)
    }

    pub fn with_bias(&self) -> bool {
        !self.bias_desc.is_zero()
    }
}

// =============================================================================
// Gemm (matrix multiplication)
// =============================================================================

/// `dst[b, m, n] = sum_k src[b, m, k] * weights[b, k, n] (+ bias)`, with an
/// optional leading batch dim. Weights and bias broadcast over size-1 dims.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmDesc {
    pub src_desc: MemoryDesc,
    pub weights_desc: MemoryDesc,
    pub bias_desc: MemoryDesc,
    pub dst_desc: MemoryDesc,
    pub accum_data_type: DataType,
}

impl GemmDesc {
    pub fn new(
        src_desc: &MemoryDesc,
        weights_desc: &MemoryDesc,
        bias_desc: Option<&MemoryDesc>,
        dst_desc: &MemoryDesc,
    ) -> Result<Self> {
        require_concrete(src_desc, "gemm source")?;
        require_concrete(weights_desc, "gemm weights")?;
        if let Some(bias) = bias_desc {
            require_concrete(bias, "gemm bias")?;
        }
        if dst_desc.is_zero() {
            return Err(Error::invalid("gemm destination descriptor is missing"));
        }
        let nd = src_desc.ndims;
        if !(2..=3).contains(&nd) || weights_desc.ndims != nd || dst_desc.ndims != nd {
            return Err(Error::invalid("gemm operands must all be 2D or all 3D"));
        }
        let (src, wei, dst) = (src_desc.dims(), weights_desc.dims(), dst_desc.dims());
        let (m, k) = (src[nd - 2], src[nd - 1]);
        let (wk, n) = (wei[nd - 2], wei[nd - 1]);
        if k != wk || dst[nd - 2] != m || dst[nd - 1] != n {
            return Err(Error::invalid(format!(
                "gemm shape mismatch: src {src:?} weights {wei:?} dst {dst:?}"
            )));
        }
        if nd == 3 && (dst[0] != src[0] || (wei[0] != src[0] && wei[0] != 1)) {
            return Err(Error::invalid("gemm batch dims do not broadcast"));
        }
        if let Some(bias) = bias_desc {
            let ok = bias.ndims == nd
                && bias
                    .dims()
                    .iter()
                    .zip(dst)
                    .all(|(&b, &d)| b == 1 || b == d);
            if !ok {
                return Err(Error::invalid(format!(
                    "bias dims {:?} do not broadcast to {dst:?}",
                    bias.dims()
                )));
            }
        }
        let accum_data_type = if src_desc.data_type.is_integral() {
            DataType::S32
        } else {
            DataType::F32
        };
        Ok(Self {
            src_desc: *src_desc,
            weights_desc: *weights_desc,
            bias_desc: bias_desc.copied().unwrap_or_default(),
            dst_desc: *dst_desc,
            accum_data_type,
        })
    }

    pub fn with_bias(&self) -> bool {
        !self.bias_desc.is_zero()
    }
}

// =============================================================================
// Tagged union
// =============================================================================

/// Operation descriptor handed to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum OpDesc {
    BatchNormalization(BatchNormDesc),
    Softmax(SoftmaxDesc),
    Convolution(ConvolutionDesc),
    Gemm(GemmDesc),
}

impl OpDesc {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            OpDesc::BatchNormalization(_) => PrimitiveKind::BatchNormalization,
            OpDesc::Softmax(_) => PrimitiveKind::Softmax,
            OpDesc::Convolution(_) => PrimitiveKind::Convolution,
            OpDesc::Gemm(_) => PrimitiveKind::Gemm,
        }
    }

    pub fn prop_kind(&self) -> PropKind {
        match self {
            OpDesc::BatchNormalization(d) => d.prop_kind,
            OpDesc::Softmax(d) => d.prop_kind,
            OpDesc::Convolution(d) => d.prop_kind,
            OpDesc::Gemm(_) => PropKind::ForwardInference,
        }
    }
}

impl From<BatchNormDesc> for OpDesc {
    fn from(d: BatchNormDesc) -> Self {
        OpDesc::BatchNormalization(d)
    }
}

impl From<SoftmaxDesc> for OpDesc {
    fn from(d: SoftmaxDesc) -> Self {
        OpDesc::Softmax(d)
    }
}

impl From<ConvolutionDesc> for OpDesc {
    fn from(d: ConvolutionDesc) -> Self {
        OpDesc::Convolution(d)
    }
}

impl From<GemmDesc> for OpDesc {
    fn from(d: GemmDesc) -> Self {
        OpDesc::Gemm(d)
    }
}

/// Resolve an `any` descriptor to the plain layout of its rank; concrete
/// descriptors are returned unchanged.
pub(crate) fn resolve_any_plain(md: &MemoryDesc) -> Result<MemoryDesc> {
    if !md.is_any() {
        return Ok(*md);
    }
    let tag = FormatTag::plain_for_ndims(md.ndims)
        .ok_or_else(|| Error::unimplemented(format!("no default layout for rank {}", md.ndims)))?;
    MemoryDesc::new(md.dims(), md.data_type, tag)
}

/// Resolve an `any` descriptor to the layout of `like`, keeping its own data
/// type.
pub(crate) fn resolve_any_like(md: &MemoryDesc, like: &MemoryDesc) -> Result<MemoryDesc> {
    if !md.is_any() {
        return Ok(*md);
    }
    if !MemoryDescWrapper::new(like).is_blocking_desc() || md.dims() != like.dims() {
        return resolve_any_plain(md);
    }
    Ok(like.with_data_type(md.data_type))
}
