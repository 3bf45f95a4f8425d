//! Primitive descriptors: one resolved configuration of one implementation.
//!
//! A `PrimitiveDesc` is a closed variant over primitive kinds. Each variant
//! struct answers the per-argument contract (usage, memory descriptor,
//! argument counts) for its kind; the kind-independent fallbacks (workspace,
//! scratchpad, unknown arguments) live here and apply to every variant.

use std::fmt;

use crate::attr::{PrimitiveAttr, ScratchpadMode};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::impls::batch_norm::{BatchNormBwdPd, BatchNormFwdPd};
use crate::impls::convolution::ConvolutionFwdPd;
use crate::impls::gemm::GemmPd;
use crate::impls::reorder::ReorderPd;
use crate::impls::softmax::{SoftmaxBwdPd, SoftmaxFwdPd};
use crate::impls::PdContract;
use crate::memory_desc::{FormatTag, MemoryDesc, ZERO_MD};
use crate::op_desc::OpDesc;
use crate::types::{ArgId, ArgUsage, DataType, Dim, PrimitiveKind, PropKind};

#[derive(Debug, Clone)]
pub(crate) enum PdKind {
    Reorder(ReorderPd),
    BatchNormFwd(BatchNormFwdPd),
    BatchNormBwd(BatchNormBwdPd),
    SoftmaxFwd(SoftmaxFwdPd),
    SoftmaxBwd(SoftmaxBwdPd),
    ConvolutionFwd(ConvolutionFwdPd),
    Gemm(GemmPd),
}

macro_rules! with_kind {
    ($kind:expr, $pd:ident => $body:expr) => {
        match $kind {
            PdKind::Reorder($pd) => $body,
            PdKind::BatchNormFwd($pd) => $body,
            PdKind::BatchNormBwd($pd) => $body,
            PdKind::SoftmaxFwd($pd) => $body,
            PdKind::SoftmaxBwd($pd) => $body,
            PdKind::ConvolutionFwd($pd) => $body,
            PdKind::Gemm($pd) => $body,
        }
    };
}

/// Fields that can be queried on a primitive descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    PrimitiveKind,
    PropKind,
    OpDesc,
    Engine,
    ReorderSrcEngine,
    ReorderDstEngine,
    ImplInfo,
    NumInputs,
    NumOutputs,
    /// Bytes of scratchpad the primitive allocates itself.
    MemoryConsumption,
    SrcMd,
    DstMd,
    WeightsMd,
    DiffSrcMd,
    DiffDstMd,
    DiffWeightsMd,
    WorkspaceMd,
    ScratchpadMd,
    ExecArgMd(ArgId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryValue<'a> {
    PrimitiveKind(PrimitiveKind),
    PropKind(PropKind),
    OpDesc(&'a OpDesc),
    Engine(Engine),
    ImplInfo(&'a str),
    Count(usize),
    Bytes(usize),
    Md(&'a MemoryDesc),
}

#[derive(Debug, Clone)]
pub struct PrimitiveDesc {
    pub(crate) kind: PdKind,
    op_desc: Option<OpDesc>,
    attr: PrimitiveAttr,
    engine: Engine,
    impl_name: String,
    scratchpad_size: usize,
    scratchpad_md: MemoryDesc,
}

impl PrimitiveDesc {
    /// Finalize a descriptor built by a candidate. Fails with
    /// `Unimplemented` if any argument layout is still `any`.
    pub(crate) fn new(
        kind: PdKind,
        op_desc: Option<OpDesc>,
        attr: &PrimitiveAttr,
        engine: &Engine,
        impl_name: impl Into<String>,
        scratchpad_size: usize,
    ) -> Result<Self> {
        let scratchpad_md = if scratchpad_size > 0 && attr.scratchpad_mode() == ScratchpadMode::User
        {
            MemoryDesc::new(&[scratchpad_size as Dim], DataType::U8, FormatTag::X)?
        } else {
            MemoryDesc::zero()
        };
        let pd = Self {
            kind,
            op_desc,
            attr: attr.clone(),
            engine: *engine,
            impl_name: impl_name.into(),
            scratchpad_size,
            scratchpad_md,
        };
        for arg in ArgId::ALL {
            if pd.arg_md(arg).is_any() {
                return Err(Error::unimplemented(format!(
                    "{}: {arg} layout left unresolved",
                    pd.impl_name
                )));
            }
        }
        Ok(pd)
    }

    pub fn kind(&self) -> PrimitiveKind {
        match &self.kind {
            PdKind::Reorder(_) => PrimitiveKind::Reorder,
            PdKind::BatchNormFwd(_) | PdKind::BatchNormBwd(_) => PrimitiveKind::BatchNormalization,
            PdKind::SoftmaxFwd(_) | PdKind::SoftmaxBwd(_) => PrimitiveKind::Softmax,
            PdKind::ConvolutionFwd(_) => PrimitiveKind::Convolution,
            PdKind::Gemm(_) => PrimitiveKind::Gemm,
        }
    }

    pub fn prop_kind(&self) -> PropKind {
        with_kind!(&self.kind, pd => pd.prop_kind())
    }

    pub fn is_fwd(&self) -> bool {
        self.prop_kind().is_fwd()
    }

    /// Copy of the operation descriptor; `None` for reorders.
    pub fn op_desc(&self) -> Option<&OpDesc> {
        self.op_desc.as_ref()
    }

    pub fn attr(&self) -> &PrimitiveAttr {
        &self.attr
    }

    /// Engine the primitive executes on.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Name of the implementation that accepted the configuration.
    pub fn impl_info(&self) -> &str {
        &self.impl_name
    }

    // -------------------------------------------------------------------
    // Argument contract
    // -------------------------------------------------------------------

    pub fn arg_usage(&self, arg: ArgId) -> ArgUsage {
        if arg != ArgId::SCRATCHPAD {
            if let Some(usage) = with_kind!(&self.kind, pd => pd.arg_usage(arg)) {
                return usage;
            }
        }
        if arg == ArgId::SCRATCHPAD && !self.scratchpad_md.is_zero() {
            return ArgUsage::Output;
        }
        ArgUsage::Unused
    }

    pub fn arg_md(&self, arg: ArgId) -> &MemoryDesc {
        if arg != ArgId::SCRATCHPAD {
            if let Some(md) = with_kind!(&self.kind, pd => pd.arg_md(arg)) {
                return md;
            }
        }
        match arg {
            ArgId::WORKSPACE => self.workspace_md(0).unwrap_or(&ZERO_MD),
            ArgId::SCRATCHPAD => &self.scratchpad_md,
            _ => &ZERO_MD,
        }
    }

    pub fn src_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.src_md(index))
    }

    pub fn dst_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.dst_md(index))
    }

    pub fn weights_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.weights_md(index))
    }

    pub fn diff_src_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.diff_src_md(index))
    }

    pub fn diff_dst_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.diff_dst_md(index))
    }

    pub fn diff_weights_md(&self, index: usize) -> &MemoryDesc {
        with_kind!(&self.kind, pd => pd.diff_weights_md(index))
    }

    /// Workspace descriptor, `None` when the primitive needs no workspace.
    pub fn workspace_md(&self, index: usize) -> Option<&MemoryDesc> {
        let md = with_kind!(&self.kind, pd => pd.workspace_md(index));
        (!md.is_zero()).then_some(md)
    }

    /// Scratchpad the caller must supply; zero in library mode.
    pub fn scratchpad_md(&self) -> &MemoryDesc {
        &self.scratchpad_md
    }

    /// Scratchpad bytes the implementation needs, whoever provides them.
    pub fn scratchpad_size(&self) -> usize {
        self.scratchpad_size
    }

    pub fn n_inputs(&self) -> usize {
        with_kind!(&self.kind, pd => pd.n_inputs())
    }

    pub fn n_outputs(&self) -> usize {
        with_kind!(&self.kind, pd => pd.n_outputs())
    }

    /// Some tensor has a zero dimension; execution is a no-op.
    pub fn has_zero_dim_memory(&self) -> bool {
        with_kind!(&self.kind, pd => pd.has_zero_dim_memory())
    }

    /// Whether this (backward) descriptor may consume the workspace written
    /// by `fwd_pd`.
    ///
    /// True when no workspace is needed; otherwise the forward descriptor
    /// must exist and declare a structurally identical workspace.
    pub fn compare_ws(&self, fwd_pd: Option<&PrimitiveDesc>) -> bool {
        let Some(ws) = self.workspace_md(0) else {
            return true;
        };
        fwd_pd
            .and_then(|fwd| fwd.workspace_md(0))
            .is_some_and(|fwd_ws| fwd_ws == ws)
    }

    /// Source and destination engines of a reorder.
    pub fn reorder_engines(&self) -> Option<(&Engine, &Engine)> {
        match &self.kind {
            PdKind::Reorder(pd) => Some((&pd.src_engine, &pd.dst_engine)),
            _ => None,
        }
    }

    pub fn query(&self, what: Query, index: usize) -> Result<QueryValue<'_>> {
        let unimplemented = || Error::unimplemented(format!("query {what:?} on {}", self.impl_name));
        let value = match what {
            Query::PrimitiveKind => QueryValue::PrimitiveKind(self.kind()),
            Query::PropKind => match self.prop_kind() {
                PropKind::Undef => return Err(unimplemented()),
                p => QueryValue::PropKind(p),
            },
            Query::OpDesc => QueryValue::OpDesc(self.op_desc.as_ref().ok_or_else(unimplemented)?),
            Query::Engine => QueryValue::Engine(self.engine),
            Query::ReorderSrcEngine => {
                QueryValue::Engine(*self.reorder_engines().ok_or_else(unimplemented)?.0)
            }
            Query::ReorderDstEngine => {
                QueryValue::Engine(*self.reorder_engines().ok_or_else(unimplemented)?.1)
            }
            Query::ImplInfo => QueryValue::ImplInfo(&self.impl_name),
            Query::NumInputs => QueryValue::Count(self.n_inputs()),
            Query::NumOutputs => QueryValue::Count(self.n_outputs()),
            Query::MemoryConsumption => QueryValue::Bytes(match self.attr.scratchpad_mode() {
                ScratchpadMode::Library => self.scratchpad_size,
                ScratchpadMode::User => 0,
            }),
            Query::SrcMd => QueryValue::Md(self.src_md(index)),
            Query::DstMd => QueryValue::Md(self.dst_md(index)),
            Query::WeightsMd => QueryValue::Md(self.weights_md(index)),
            Query::DiffSrcMd => QueryValue::Md(self.diff_src_md(index)),
            Query::DiffDstMd => QueryValue::Md(self.diff_dst_md(index)),
            Query::DiffWeightsMd => QueryValue::Md(self.diff_weights_md(index)),
            Query::WorkspaceMd => QueryValue::Md(self.workspace_md(index).unwrap_or(&ZERO_MD)),
            Query::ScratchpadMd => QueryValue::Md(&self.scratchpad_md),
            Query::ExecArgMd(arg) => QueryValue::Md(self.arg_md(arg)),
        };
        Ok(value)
    }

    /// Arguments the primitive reads or writes, in ABI order.
    pub fn used_args(&self) -> Vec<(ArgId, ArgUsage)> {
        ArgId::ALL
            .iter()
            .map(|&arg| (arg, self.arg_usage(arg)))
            .filter(|&(_, usage)| usage != ArgUsage::Unused)
            .collect()
    }
}

/// One-line summary: `engine,kind,impl,prop,arg:md ...`.
impl fmt::Display for PrimitiveDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},",
            self.engine,
            self.kind().name(),
            self.impl_name,
            self.prop_kind().name()
        )?;
        for (i, (arg, _)) in self.used_args().into_iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{arg}:{}", self.arg_md(arg))?;
        }
        Ok(())
    }
}
