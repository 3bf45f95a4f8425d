//! Candidate implementations, one module per primitive kind.
//!
//! Each module owns the resolved per-kind descriptor (the variant payload of
//! [`PdKind`]), the factories registered in the candidate lists, and the
//! host kernels that execute them.

pub(crate) mod batch_norm;
pub(crate) mod convolution;
pub(crate) mod gemm;
pub(crate) mod reorder;
pub(crate) mod softmax;

use crate::engine::{Engine, EngineKind};
use crate::error::{Error, Result};
use crate::memory_desc::{MemoryDesc, ZERO_MD};
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, PropKind};

/// Per-kind half of the primitive descriptor contract.
///
/// `arg_usage` and `arg_md` return `None` for arguments the kind does not
/// define, letting [`PrimitiveDesc`] apply the common fallbacks. Descriptor
/// accessors default to the zero descriptor.
pub(crate) trait PdContract {
    fn prop_kind(&self) -> PropKind;

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage>;

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc>;

    fn src_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn dst_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn weights_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn diff_src_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn diff_dst_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn diff_weights_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn workspace_md(&self, _index: usize) -> &MemoryDesc {
        &ZERO_MD
    }

    fn n_inputs(&self) -> usize;

    fn n_outputs(&self) -> usize;

    fn has_zero_dim_memory(&self) -> bool;
}

/// Reject the configuration with `Unimplemented` unless `ok`.
pub(crate) fn ensure(ok: bool, impl_name: &str, reason: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::unimplemented(format!("{impl_name}: {reason}")))
    }
}

pub(crate) fn ensure_engine(engine: &Engine, kind: EngineKind, impl_name: &str) -> Result<()> {
    ensure(
        engine.kind() == kind,
        impl_name,
        &format!("not available on {} engines", engine.kind().name()),
    )
}

/// Floating-point types the reference kernels compute through f32.
pub(crate) fn is_ref_float(dt: DataType) -> bool {
    matches!(dt, DataType::F32 | DataType::Bf16 | DataType::F16)
}

/// Run the kernel behind `pd`.
pub(crate) fn execute(pd: &PrimitiveDesc, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    match &pd.kind {
        PdKind::Reorder(p) => reorder::execute(p, pd.attr(), ctx),
        PdKind::BatchNormFwd(p) => batch_norm::execute_fwd(p, ctx),
        PdKind::BatchNormBwd(p) => batch_norm::execute_bwd(p, ctx),
        PdKind::SoftmaxFwd(p) => softmax::execute_fwd(p, ctx),
        PdKind::SoftmaxBwd(p) => softmax::execute_bwd(p, ctx),
        PdKind::ConvolutionFwd(p) => convolution::execute(p, pd.attr(), ctx),
        PdKind::Gemm(p) => gemm::execute(p, pd.attr(), ctx),
    }
}
