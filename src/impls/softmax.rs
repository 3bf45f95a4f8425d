//! Softmax and logsoftmax along one axis.
//!
//! The tensor is viewed as `outer x channels x inner` around the axis.

use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::impl_list::PdCreateArgs;
use crate::impls::{ensure, is_ref_float, PdContract};
use crate::memory_desc::{FormatTag, MemoryDesc, MemoryDescWrapper, ZERO_MD};
use crate::op_desc::{resolve_any_like, OpDesc, SoftmaxDesc};
use crate::parallel::{for_each_unit_run, map_units};
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, Dim, PropKind, SoftmaxAlg};

const F32: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SoftmaxImpl {
    /// Row-major f32 with the axis innermost.
    Dense,
    Generic,
}

/// `(outer, channels, inner)` around `axis`.
fn split_axis(dims: &[Dim], axis: usize) -> (Dim, Dim, Dim) {
    (
        dims[..axis].iter().product(),
        dims[axis],
        dims[axis + 1..].iter().product(),
    )
}

fn as_softmax<'a>(args: &PdCreateArgs<'a>, name: &str) -> Result<&'a SoftmaxDesc> {
    match args.op_desc {
        OpDesc::Softmax(d) => Ok(d),
        other => Err(Error::unimplemented(format!(
            "{name}: {} is not softmax",
            other.kind().name()
        ))),
    }
}

// =============================================================================
// Forward
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct SoftmaxFwdPd {
    desc: SoftmaxDesc,
    data_md: MemoryDesc,
    imp: SoftmaxImpl,
}

impl PdContract for SoftmaxFwdPd {
    fn prop_kind(&self) -> PropKind {
        self.desc.prop_kind
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        match arg {
            ArgId::SRC => Some(ArgUsage::Input),
            ArgId::DST => Some(ArgUsage::Output),
            _ => None,
        }
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        match arg {
            ArgId::SRC => Some(self.src_md(0)),
            ArgId::DST => Some(self.dst_md(0)),
            _ => None,
        }
    }

    fn src_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.data_md
        } else {
            &ZERO_MD
        }
    }

    fn dst_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.data_md
        } else {
            &ZERO_MD
        }
    }

    fn n_inputs(&self) -> usize {
        1
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn has_zero_dim_memory(&self) -> bool {
        MemoryDescWrapper::new(&self.data_md).has_zero_dim()
    }
}

pub(crate) fn create_dense_fwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = as_softmax(args, name)?;
    let data = MemoryDescWrapper::new(&desc.data_desc);
    let (_, _, inner) = split_axis(data.dims(), desc.axis);
    ensure(args.engine.kind() == EngineKind::Cpu, name, "cpu only")?;
    ensure(inner == 1, name, "axis is not innermost")?;
    ensure(data.data_type() == DataType::F32, name, "unsupported data type")?;
    let row_major = FormatTag::plain_for_ndims(data.ndims()).is_some_and(|t| data.matches_tag(t));
    ensure(row_major, name, "layout is not row-major")?;
    create_fwd(args, desc, name, SoftmaxImpl::Dense)
}

pub(crate) fn create_generic_fwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = as_softmax(args, name)?;
    let data = MemoryDescWrapper::new(&desc.data_desc);
    ensure(is_ref_float(data.data_type()), name, "unsupported data type")?;
    ensure(data.is_blocking_desc(), name, "layout is not blocked")?;
    create_fwd(args, desc, name, SoftmaxImpl::Generic)
}

fn create_fwd(
    args: &PdCreateArgs<'_>,
    desc: &SoftmaxDesc,
    name: &'static str,
    imp: SoftmaxImpl,
) -> Result<PrimitiveDesc> {
    ensure(desc.prop_kind.is_fwd(), name, "not a forward descriptor")?;
    ensure(args.attr.has_default_values(), name, "unsupported attributes")?;
    let (outer, _, inner) = split_axis(desc.data_desc.dims(), desc.axis);
    // running max and denominator per (outer, inner) position
    let scratchpad_size = match imp {
        SoftmaxImpl::Dense => 0,
        SoftmaxImpl::Generic => 2 * (outer * inner) as usize * F32,
    };
    let pd = SoftmaxFwdPd {
        desc: desc.clone(),
        data_md: desc.data_desc,
        imp,
    };
    PrimitiveDesc::new(
        PdKind::SoftmaxFwd(pd),
        Some(args.op_desc.clone()),
        args.attr,
        args.engine,
        name,
        scratchpad_size,
    )
}

#[inline]
fn finish(alg: SoftmaxAlg, x: f32, max: f32, denom: f32) -> f32 {
    match alg {
        SoftmaxAlg::Softmax => (x - max).exp() / denom,
        SoftmaxAlg::LogSoftmax => x - max - denom.ln(),
    }
}

#[inline]
fn load(bytes: &[u8], i: usize) -> f32 {
    DataType::F32.load_f32(&bytes[i * F32..(i + 1) * F32])
}

#[inline]
fn store(bytes: &mut [u8], i: usize, v: f32) {
    DataType::F32.store_f32(v, &mut bytes[i * F32..(i + 1) * F32]);
}

pub(crate) fn execute_fwd(pd: &SoftmaxFwdPd, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let src = ctx.args.get_input(ArgId::SRC)?;
    let dst = ctx.args.take_output(ArgId::DST)?;
    let data = MemoryDescWrapper::new(&pd.data_md);
    let (outer, channels, inner) = split_axis(data.dims(), pd.desc.axis);
    let alg = pd.desc.alg;

    match pd.imp {
        SoftmaxImpl::Dense => {
            let ch = channels as usize;
            for_each_unit_run(dst.as_bytes_mut(), ch * F32, |u0, run| {
                for (i, row) in run.chunks_exact_mut(ch * F32).enumerate() {
                    let base = ((u0 + i) * ch) as Dim;
                    let mut max = f32::NEG_INFINITY;
                    for c in 0..channels {
                        max = max.max(src.read_f32(base + c));
                    }
                    let mut denom = 0.0f32;
                    for c in 0..channels {
                        denom += (src.read_f32(base + c) - max).exp();
                    }
                    if denom == 0.0 {
                        denom = 1.0;
                    }
                    for c in 0..ch {
                        store(row, c, finish(alg, src.read_f32(base + c as Dim), max, denom));
                    }
                }
            });
        }
        SoftmaxImpl::Generic => {
            let inn = inner as usize;
            let at = |ou: Dim, c: Dim, i: Dim| data.off_l((ou * channels + c) * inner + i);
            let scratch = &mut ctx.scratchpad[..2 * (outer * inner) as usize * F32];
            for_each_unit_run(scratch, 2 * inn * F32, |u0, run| {
                for (k, space) in run.chunks_exact_mut(2 * inn * F32).enumerate() {
                    let ou = (u0 + k) as Dim;
                    for i in 0..inn {
                        let mut max = f32::NEG_INFINITY;
                        for c in 0..channels {
                            max = max.max(src.read_f32(at(ou, c, i as Dim)));
                        }
                        let mut denom = 0.0f32;
                        for c in 0..channels {
                            denom += (src.read_f32(at(ou, c, i as Dim)) - max).exp();
                        }
                        store(space, i, max);
                        store(space, inn + i, if denom == 0.0 { 1.0 } else { denom });
                    }
                }
            });

            let space: &[u8] = scratch;
            let rows = map_units(outer as usize, |ou| {
                let base = ou * 2 * inn;
                let mut out = Vec::with_capacity(channels as usize * inn);
                for c in 0..channels {
                    for i in 0..inn {
                        let x = src.read_f32(at(ou as Dim, c, i as Dim));
                        let max = load(space, base + i);
                        let denom = load(space, base + inn + i);
                        out.push(finish(alg, x, max, denom));
                    }
                }
                out
            });
            for (ou, row) in rows.iter().enumerate() {
                for (j, &v) in row.iter().enumerate() {
                    let l = ou as Dim * channels * inner + j as Dim;
                    dst.write_f32(data.off_l(l), v);
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Backward
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct SoftmaxBwdPd {
    desc: SoftmaxDesc,
    dst_md: MemoryDesc,
    diff_md: MemoryDesc,
}

impl PdContract for SoftmaxBwdPd {
    fn prop_kind(&self) -> PropKind {
        self.desc.prop_kind
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        match arg {
            ArgId::DST | ArgId::DIFF_DST => Some(ArgUsage::Input),
            ArgId::DIFF_SRC => Some(ArgUsage::Output),
            _ => None,
        }
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        match arg {
            ArgId::DST => Some(self.dst_md(0)),
            ArgId::DIFF_DST => Some(self.diff_dst_md(0)),
            ArgId::DIFF_SRC => Some(self.diff_src_md(0)),
            _ => None,
        }
    }

    fn dst_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.dst_md
        } else {
            &ZERO_MD
        }
    }

    fn diff_dst_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.diff_md
        } else {
            &ZERO_MD
        }
    }

    fn diff_src_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.diff_md
        } else {
            &ZERO_MD
        }
    }

    fn n_inputs(&self) -> usize {
        2
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn has_zero_dim_memory(&self) -> bool {
        MemoryDescWrapper::new(&self.dst_md).has_zero_dim()
    }
}

pub(crate) fn create_generic_bwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = as_softmax(args, name)?;
    ensure(desc.prop_kind.is_bwd(), name, "not a backward descriptor")?;
    ensure(args.attr.has_default_values(), name, "unsupported attributes")?;
    let diff_md = resolve_any_like(&desc.diff_desc, &desc.data_desc)?;
    let (dst, diff) = (
        MemoryDescWrapper::new(&desc.data_desc),
        MemoryDescWrapper::new(&diff_md),
    );
    ensure(
        is_ref_float(dst.data_type()) && is_ref_float(diff.data_type()),
        name,
        "unsupported data type",
    )?;
    ensure(
        dst.is_blocking_desc() && diff.is_blocking_desc(),
        name,
        "layout is not blocked",
    )?;
    let pd = SoftmaxBwdPd {
        desc: desc.clone(),
        dst_md: desc.data_desc,
        diff_md,
    };
    PrimitiveDesc::new(
        PdKind::SoftmaxBwd(pd),
        Some(args.op_desc.clone()),
        args.attr,
        args.engine,
        name,
        0,
    )
}

pub(crate) fn execute_bwd(pd: &SoftmaxBwdPd, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let dst = ctx.args.get_input(ArgId::DST)?;
    let diff_dst = ctx.args.get_input(ArgId::DIFF_DST)?;
    let data = MemoryDescWrapper::new(&pd.dst_md);
    let diff = MemoryDescWrapper::new(&pd.diff_md);
    let (outer, channels, inner) = split_axis(data.dims(), pd.desc.axis);
    let alg = pd.desc.alg;
    let idx = |ou: Dim, c: Dim, i: Dim| (ou * channels + c) * inner + i;

    let rows = map_units(outer as usize, |ou| {
        let ou = ou as Dim;
        let mut out = vec![0.0f32; (channels * inner) as usize];
        for i in 0..inner {
            let y = |c: Dim| dst.read_f32(data.off_l(idx(ou, c, i)));
            let dy = |c: Dim| diff_dst.read_f32(diff.off_l(idx(ou, c, i)));
            let sbr: f32 = match alg {
                SoftmaxAlg::Softmax => (0..channels).map(|c| dy(c) * y(c)).sum(),
                SoftmaxAlg::LogSoftmax => (0..channels).map(dy).sum(),
            };
            for c in 0..channels {
                out[(c * inner + i) as usize] = match alg {
                    SoftmaxAlg::Softmax => y(c) * (dy(c) - sbr),
                    SoftmaxAlg::LogSoftmax => dy(c) - y(c).exp() * sbr,
                };
            }
        }
        out
    });

    let diff_src = ctx.args.take_output(ArgId::DIFF_SRC)?;
    for (ou, row) in rows.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            let l = ou as Dim * channels * inner + j as Dim;
            diff_src.write_f32(diff.off_l(l), v);
        }
    }
    Ok(())
}
