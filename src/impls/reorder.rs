//! Reorder: copy a tensor between layouts, data types and engines.
//!
//! `dst = output_scale * src (+ sum_scale * dst)`. Candidates are ordered
//! from the most restrictive (byte copy) to the generic offset-walking one.

use crate::attr::PrimitiveAttr;
use crate::engine::Engine;
use crate::error::Result;
use crate::impl_list::ReorderCreateArgs;
use crate::impls::{ensure, PdContract};
use crate::memory_desc::{MemoryDesc, MemoryDescWrapper, ZERO_MD};
use crate::parallel::{for_each_unit_run, map_units};
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, Dim, PropKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReorderImpl {
    /// Same layout and data type: raw byte copy.
    DirectCopy,
    /// Same layout: element-wise conversion over the dense buffer.
    DirectCopyCvt,
    /// Any pair of blocked layouts.
    Ref,
}

#[derive(Debug, Clone)]
pub(crate) struct ReorderPd {
    pub(crate) src_engine: Engine,
    pub(crate) dst_engine: Engine,
    src_md: MemoryDesc,
    dst_md: MemoryDesc,
    imp: ReorderImpl,
}

impl PdContract for ReorderPd {
    fn prop_kind(&self) -> PropKind {
        PropKind::Undef
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        match arg {
            ArgId::FROM => Some(ArgUsage::Input),
            ArgId::TO => Some(ArgUsage::Output),
            _ => None,
        }
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        match arg {
            ArgId::FROM => Some(self.src_md(0)),
            ArgId::TO => Some(self.dst_md(0)),
            _ => None,
        }
    }

    fn src_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.src_md
        } else {
            &ZERO_MD
        }
    }

    fn dst_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.dst_md
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
        MemoryDescWrapper::new(&self.src_md).has_zero_dim()
    }
}

/// Output scale anything, post-ops empty or a single sum.
fn scale_and_sum_only(attr: &PrimitiveAttr) -> bool {
    let ops = attr.post_ops().entries();
    ops.is_empty() || (ops.len() == 1 && ops[0].is_sum())
}

fn sum_scale(attr: &PrimitiveAttr) -> Option<f32> {
    match attr.post_ops().entries().first() {
        Some(crate::attr::PostOp::Sum { scale }) => Some(*scale),
        _ => None,
    }
}

fn finish(args: &ReorderCreateArgs<'_>, name: &'static str, imp: ReorderImpl) -> Result<PrimitiveDesc> {
    let pd = ReorderPd {
        src_engine: *args.src_engine,
        dst_engine: *args.dst_engine,
        src_md: *args.src_md,
        dst_md: *args.dst_md,
        imp,
    };
    PrimitiveDesc::new(PdKind::Reorder(pd), None, args.attr, args.engine, name, 0)
}

pub(crate) fn create_direct_copy(args: &ReorderCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let src = MemoryDescWrapper::new(args.src_md);
    let dst = MemoryDescWrapper::new(args.dst_md);
    ensure(src.similar_to(&dst, true, true), name, "layouts differ")?;
    ensure(src.is_dense(true) && dst.is_dense(true), name, "not dense")?;
    ensure(args.attr.has_default_values(), name, "unsupported attributes")?;
    finish(args, name, ReorderImpl::DirectCopy)
}

pub(crate) fn create_direct_copy_cvt(args: &ReorderCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let src = MemoryDescWrapper::new(args.src_md);
    let dst = MemoryDescWrapper::new(args.dst_md);
    ensure(src.similar_to(&dst, true, false), name, "layouts differ")?;
    ensure(src.is_dense(true) && dst.is_dense(true), name, "not dense")?;
    ensure(scale_and_sum_only(args.attr), name, "unsupported post-ops")?;
    finish(args, name, ReorderImpl::DirectCopyCvt)
}

pub(crate) fn create_ref(args: &ReorderCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let src = MemoryDescWrapper::new(args.src_md);
    let dst = MemoryDescWrapper::new(args.dst_md);
    ensure(
        src.is_blocking_desc() && dst.is_blocking_desc(),
        name,
        "layout is not blocked",
    )?;
    ensure(
        src.data_type() != DataType::Undef && dst.data_type() != DataType::Undef,
        name,
        "undefined data type",
    )?;
    ensure(scale_and_sum_only(args.attr), name, "unsupported post-ops")?;
    finish(args, name, ReorderImpl::Ref)
}

pub(crate) fn execute(pd: &ReorderPd, attr: &PrimitiveAttr, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let src = ctx.args.get_input(ArgId::FROM)?;
    let dst = ctx.args.take_output(ArgId::TO)?;
    let scale = attr.output_scale();
    let beta = sum_scale(attr);
    let convert = |x: f32, prev: f32| scale * x + beta.map_or(0.0, |b| b * prev);

    match pd.imp {
        ReorderImpl::DirectCopy => {
            let from = src.as_bytes();
            let unit = pd.dst_md.data_type.size();
            for_each_unit_run(dst.as_bytes_mut(), unit, |u0, run| {
                let at = u0 * unit;
                run.copy_from_slice(&from[at..at + run.len()]);
            });
        }
        ReorderImpl::DirectCopyCvt => {
            let (sdt, ddt) = (pd.src_md.data_type, pd.dst_md.data_type);
            let (ss, ds) = (sdt.size(), ddt.size());
            let from = src.as_bytes();
            for_each_unit_run(dst.as_bytes_mut(), ds, |u0, run| {
                for (i, out) in run.chunks_exact_mut(ds).enumerate() {
                    let at = (u0 + i) * ss;
                    let x = sdt.load_f32(&from[at..at + ss]);
                    let prev = if beta.is_some() { ddt.load_f32(out) } else { 0.0 };
                    ddt.store_f32(convert(x, prev), out);
                }
            });
        }
        ReorderImpl::Ref => {
            let s = MemoryDescWrapper::new(&pd.src_md);
            let d = MemoryDescWrapper::new(&pd.dst_md);
            let n = s.nelems(false) as usize;
            let prev_dst: &crate::memory::Memory = dst;
            let values = map_units(n, |l| {
                let l = l as Dim;
                let prev = if beta.is_some() {
                    prev_dst.read_f32(d.off_l(l))
                } else {
                    0.0
                };
                convert(src.read_f32(s.off_l(l)), prev)
            });
            for (l, v) in values.into_iter().enumerate() {
                dst.write_f32(d.off_l(l as Dim), v);
            }
        }
    }
    Ok(())
}
