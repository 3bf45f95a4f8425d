//! Batch normalization: resolved descriptors, candidates and kernels.
//!
//! Two implementations per direction. `ncsp` accepts plain channels-second
//! layouts only and keeps a bit-packed ReLU mask; `ref` accepts any blocked
//! layout and keeps one mask byte per element. A backward descriptor can
//! only reuse a forward workspace of the same shape, which is what
//! [`PrimitiveDesc::compare_ws`] checks during dispatch.

use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::impl_list::PdCreateArgs;
use crate::impls::{ensure, ensure_engine, is_ref_float, PdContract};
use crate::memory_desc::{FormatTag, MemoryDesc, MemoryDescWrapper, ZERO_MD};
use crate::op_desc::{resolve_any_like, resolve_any_plain, BatchNormDesc, OpDesc};
use crate::parallel::map_units;
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, Dim, PropKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BnormImpl {
    Ncsp,
    Ref,
}

impl BnormImpl {
    /// Workspace bits per data element.
    fn ws_bits(self) -> Dim {
        match self {
            BnormImpl::Ncsp => 1,
            BnormImpl::Ref => 8,
        }
    }
}

const NCSP_TAGS: [FormatTag; 4] = [
    FormatTag::ab,
    FormatTag::abc,
    FormatTag::abcd,
    FormatTag::abcde,
];

/// One-dimensional u8 workspace with `bits` bits per padded element of
/// `data_md`, rounded up to whole bytes.
pub(crate) fn init_default_ws(data_md: &MemoryDesc, bits: Dim) -> Result<MemoryDesc> {
    let nelems = MemoryDescWrapper::new(data_md).nelems(true);
    let size = nelems
        .checked_mul(bits)
        .and_then(|b| b.checked_add(7))
        .ok_or_else(|| Error::invalid(format!("workspace for {nelems} elements overflows")))?
        / 8;
    MemoryDesc::new(&[size], DataType::U8, FormatTag::X)
}

fn as_bnorm<'a>(args: &PdCreateArgs<'a>, name: &str) -> Result<&'a BatchNormDesc> {
    match args.op_desc {
        OpDesc::BatchNormalization(d) => Ok(d),
        other => Err(Error::unimplemented(format!(
            "{name}: {} is not batch normalization",
            other.kind().name()
        ))),
    }
}

fn check_data(data: &MemoryDescWrapper<'_>, imp: BnormImpl, name: &str) -> Result<()> {
    match imp {
        BnormImpl::Ncsp => {
            ensure(
                matches!(data.data_type(), DataType::F32 | DataType::Bf16),
                name,
                "unsupported data type",
            )?;
            ensure(
                data.matches_one_of_tag(&NCSP_TAGS).is_some(),
                name,
                "layout is not ncsp",
            )
        }
        BnormImpl::Ref => {
            ensure(is_ref_float(data.data_type()), name, "unsupported data type")?;
            ensure(data.is_blocking_desc(), name, "layout is not blocked")
        }
    }
}

#[inline]
fn phys(imp: BnormImpl, mdw: &MemoryDescWrapper<'_>, l: Dim) -> Dim {
    match imp {
        BnormImpl::Ncsp => l,
        BnormImpl::Ref => mdw.off_l(l),
    }
}

#[inline]
fn set_mask(ws: &mut [u8], imp: BnormImpl, l: usize, on: bool) {
    match imp {
        BnormImpl::Ncsp => {
            let bit = 1u8 << (l % 8);
            if on {
                ws[l / 8] |= bit;
            } else {
                ws[l / 8] &= !bit;
            }
        }
        BnormImpl::Ref => ws[l] = on as u8,
    }
}

#[inline]
fn get_mask(ws: &[u8], imp: BnormImpl, l: usize) -> bool {
    match imp {
        BnormImpl::Ncsp => ws[l / 8] & (1u8 << (l % 8)) != 0,
        BnormImpl::Ref => ws[l] != 0,
    }
}

/// `(mb, channels, spatial)` of an `N x C x ...` tensor.
fn shape(data: &MemoryDescWrapper<'_>) -> (Dim, Dim, Dim) {
    let dims = data.dims();
    (dims[0], dims[1], dims[2..].iter().product())
}

// =============================================================================
// Forward
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct BatchNormFwdPd {
    desc: BatchNormDesc,
    data_md: MemoryDesc,
    stat_md: MemoryDesc,
    scaleshift_md: MemoryDesc,
    ws_md: MemoryDesc,
    with_relu_post_op: bool,
    imp: BnormImpl,
}

impl PdContract for BatchNormFwdPd {
    fn prop_kind(&self) -> PropKind {
        self.desc.prop_kind
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        let d = &self.desc;
        let usage = match arg {
            ArgId::SRC => ArgUsage::Input,
            ArgId::MEAN | ArgId::VARIANCE => {
                if d.stats_is_src() {
                    ArgUsage::Input
                } else if d.is_training() {
                    ArgUsage::Output
                } else {
                    ArgUsage::Unused
                }
            }
            ArgId::SCALE_SHIFT if d.use_scaleshift() => ArgUsage::Input,
            ArgId::WORKSPACE if d.is_training() && d.fuse_norm_relu() => ArgUsage::Output,
            ArgId::DST => ArgUsage::Output,
            _ => return None,
        };
        Some(usage)
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        let stats_is_src = self.desc.stats_is_src();
        let md = match arg {
            ArgId::MEAN if stats_is_src => self.src_md(1),
            ArgId::MEAN => self.dst_md(1),
            ArgId::VARIANCE if stats_is_src => self.src_md(2),
            ArgId::VARIANCE => self.dst_md(2),
            ArgId::SRC => self.src_md(0),
            ArgId::SCALE_SHIFT => self.weights_md(0),
            ArgId::DST => self.dst_md(0),
            _ => return None,
        };
        Some(md)
    }

    fn src_md(&self, index: usize) -> &MemoryDesc {
        match index {
            0 => &self.data_md,
            1 | 2 if self.desc.stats_is_src() => &self.stat_md,
            _ => &ZERO_MD,
        }
    }

    fn dst_md(&self, index: usize) -> &MemoryDesc {
        match index {
            0 => &self.data_md,
            1 | 2 if !self.desc.stats_is_src() && self.desc.is_training() => &self.stat_md,
            _ => &ZERO_MD,
        }
    }

    fn weights_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.scaleshift_md
        } else {
            &ZERO_MD
        }
    }

    fn workspace_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.ws_md
        } else {
            &ZERO_MD
        }
    }

    fn n_inputs(&self) -> usize {
        let d = &self.desc;
        1 + 2 * d.stats_is_src() as usize + d.use_scaleshift() as usize
    }

    fn n_outputs(&self) -> usize {
        let d = &self.desc;
        1 + (d.fuse_norm_relu() as usize + 2 * !d.stats_is_src() as usize) * d.is_training() as usize
    }

    fn has_zero_dim_memory(&self) -> bool {
        MemoryDescWrapper::new(&self.data_md).has_zero_dim()
    }
}

pub(crate) fn create_ncsp_fwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    create_fwd(args, name, BnormImpl::Ncsp)
}

pub(crate) fn create_ref_fwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    create_fwd(args, name, BnormImpl::Ref)
}

fn create_fwd(args: &PdCreateArgs<'_>, name: &'static str, imp: BnormImpl) -> Result<PrimitiveDesc> {
    let desc = as_bnorm(args, name)?;
    ensure(desc.prop_kind.is_fwd(), name, "not a forward descriptor")?;
    if imp == BnormImpl::Ncsp {
        ensure_engine(args.engine, EngineKind::Cpu, name)?;
    }
    check_data(&MemoryDescWrapper::new(&desc.data_desc), imp, name)?;

    let attr = args.attr;
    let with_relu_post_op = attr.with_relu_post_op();
    ensure(
        attr.output_scale() == 1.0
            && (attr.post_ops().is_empty() || (with_relu_post_op && !desc.is_training())),
        name,
        "unsupported attributes",
    )?;

    let ws_md = if desc.is_training() && desc.fuse_norm_relu() {
        init_default_ws(&desc.data_desc, imp.ws_bits())?
    } else {
        MemoryDesc::zero()
    };
    let pd = BatchNormFwdPd {
        desc: desc.clone(),
        data_md: desc.data_desc,
        stat_md: resolve_any_plain(&desc.stat_desc)?,
        scaleshift_md: resolve_any_plain(&desc.data_scaleshift_desc)?,
        ws_md,
        with_relu_post_op,
        imp,
    };
    PrimitiveDesc::new(
        PdKind::BatchNormFwd(pd),
        Some(args.op_desc.clone()),
        attr,
        args.engine,
        name,
        0,
    )
}

struct ChannelFwd {
    mean: f32,
    var: f32,
    /// Normalized values in `(n, spatial)` order.
    out: Vec<f32>,
}

pub(crate) fn execute_fwd(pd: &BatchNormFwdPd, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let desc = &pd.desc;
    let src = ctx.args.get_input(ArgId::SRC)?;
    let scaleshift = if desc.use_scaleshift() {
        Some(ctx.args.get_input(ArgId::SCALE_SHIFT)?)
    } else {
        None
    };
    let stats_in = if desc.stats_is_src() {
        Some((
            ctx.args.get_input(ArgId::MEAN)?,
            ctx.args.get_input(ArgId::VARIANCE)?,
        ))
    } else {
        None
    };

    let data = MemoryDescWrapper::new(&pd.data_md);
    let stat = MemoryDescWrapper::new(&pd.stat_md);
    let ss = MemoryDescWrapper::new(&pd.scaleshift_md);
    let (mb, ch, sp) = shape(&data);
    let relu = desc.fuse_norm_relu() || pd.with_relu_post_op;
    let eps = desc.epsilon;
    let imp = pd.imp;

    let channels = map_units(ch as usize, |c| {
        let c = c as Dim;
        let at = |n: Dim, s: Dim| phys(imp, &data, (n * ch + c) * sp + s);
        let (mean, var) = match stats_in {
            Some((m, v)) => {
                let off = stat.off_v(&[c], false);
                (m.read_f32(off), v.read_f32(off))
            }
            None => {
                let count = (mb * sp) as f32;
                let mut sum = 0.0f32;
                for n in 0..mb {
                    for s in 0..sp {
                        sum += src.read_f32(at(n, s));
                    }
                }
                let mean = sum / count;
                let mut sq = 0.0f32;
                for n in 0..mb {
                    for s in 0..sp {
                        let d = src.read_f32(at(n, s)) - mean;
                        sq += d * d;
                    }
                }
                (mean, sq / count)
            }
        };
        let (gamma, beta) = match scaleshift {
            Some(m) => (
                m.read_f32(ss.off_v(&[0, c], false)),
                m.read_f32(ss.off_v(&[1, c], false)),
            ),
            None => (1.0, 0.0),
        };
        let inv_std = 1.0 / (var + eps).sqrt();
        let mut out = Vec::with_capacity((mb * sp) as usize);
        for n in 0..mb {
            for s in 0..sp {
                let v = gamma * (src.read_f32(at(n, s)) - mean) * inv_std + beta;
                out.push(if relu { v.max(0.0) } else { v });
            }
        }
        ChannelFwd { mean, var, out }
    });

    let dst = ctx.args.take_output(ArgId::DST)?;
    for (c, st) in channels.iter().enumerate() {
        let c = c as Dim;
        for n in 0..mb {
            for s in 0..sp {
                let l = (n * ch + c) * sp + s;
                dst.write_f32(phys(imp, &data, l), st.out[(n * sp + s) as usize]);
            }
        }
    }

    if desc.is_training() && !desc.stats_is_src() {
        let mean = ctx.args.take_output(ArgId::MEAN)?;
        for (c, st) in channels.iter().enumerate() {
            mean.write_f32(stat.off_v(&[c as Dim], false), st.mean);
        }
        let var = ctx.args.take_output(ArgId::VARIANCE)?;
        for (c, st) in channels.iter().enumerate() {
            var.write_f32(stat.off_v(&[c as Dim], false), st.var);
        }
    }

    if desc.is_training() && desc.fuse_norm_relu() {
        let ws_mem = ctx.args.take_output(ArgId::WORKSPACE)?;
        let ws = ws_mem.as_bytes_mut();
        for (c, st) in channels.iter().enumerate() {
            let c = c as Dim;
            for n in 0..mb {
                for s in 0..sp {
                    let l = (n * ch + c) * sp + s;
                    set_mask(ws, imp, l as usize, st.out[(n * sp + s) as usize] > 0.0);
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
pub(crate) struct BatchNormBwdPd {
    desc: BatchNormDesc,
    data_md: MemoryDesc,
    diff_data_md: MemoryDesc,
    stat_md: MemoryDesc,
    scaleshift_md: MemoryDesc,
    diff_scaleshift_md: MemoryDesc,
    ws_md: MemoryDesc,
    imp: BnormImpl,
}

impl PdContract for BatchNormBwdPd {
    fn prop_kind(&self) -> PropKind {
        self.desc.prop_kind
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        let d = &self.desc;
        let usage = match arg {
            ArgId::SRC | ArgId::MEAN | ArgId::VARIANCE | ArgId::DIFF_DST => ArgUsage::Input,
            ArgId::SCALE_SHIFT if d.use_scaleshift() => ArgUsage::Input,
            ArgId::WORKSPACE if d.fuse_norm_relu() => ArgUsage::Input,
            ArgId::DIFF_SRC => ArgUsage::Output,
            ArgId::DIFF_SCALE_SHIFT if !self.diff_scaleshift_md.is_zero() => ArgUsage::Output,
            _ => return None,
        };
        Some(usage)
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        let md = match arg {
            ArgId::SRC => self.src_md(0),
            ArgId::MEAN => self.src_md(1),
            ArgId::VARIANCE => self.src_md(2),
            ArgId::SCALE_SHIFT => self.weights_md(0),
            ArgId::DIFF_DST => self.diff_dst_md(0),
            ArgId::DIFF_SRC => self.diff_src_md(0),
            ArgId::DIFF_SCALE_SHIFT => self.diff_weights_md(0),
            _ => return None,
        };
        Some(md)
    }

    fn src_md(&self, index: usize) -> &MemoryDesc {
        match index {
            0 => &self.data_md,
            1 | 2 => &self.stat_md,
            _ => &ZERO_MD,
        }
    }

    fn weights_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.scaleshift_md
        } else {
            &ZERO_MD
        }
    }

    fn diff_src_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.diff_data_md
        } else {
            &ZERO_MD
        }
    }

    fn diff_dst_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.diff_data_md
        } else {
            &ZERO_MD
        }
    }

    fn diff_weights_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.diff_scaleshift_md
        } else {
            &ZERO_MD
        }
    }

    fn workspace_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.ws_md
        } else {
            &ZERO_MD
        }
    }

    fn n_inputs(&self) -> usize {
        let d = &self.desc;
        4 + d.use_scaleshift() as usize + d.fuse_norm_relu() as usize
    }

    fn n_outputs(&self) -> usize {
        1 + !self.diff_weights_md(0).is_zero() as usize
    }

    fn has_zero_dim_memory(&self) -> bool {
        MemoryDescWrapper::new(&self.data_md).has_zero_dim()
    }
}

pub(crate) fn create_ncsp_bwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    create_bwd(args, name, BnormImpl::Ncsp)
}

pub(crate) fn create_ref_bwd(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    create_bwd(args, name, BnormImpl::Ref)
}

fn create_bwd(args: &PdCreateArgs<'_>, name: &'static str, imp: BnormImpl) -> Result<PrimitiveDesc> {
    let desc = as_bnorm(args, name)?;
    ensure(desc.prop_kind.is_bwd(), name, "not a backward descriptor")?;
    if imp == BnormImpl::Ncsp {
        ensure_engine(args.engine, EngineKind::Cpu, name)?;
    }
    let diff_data_md = resolve_any_like(&desc.diff_data_desc, &desc.data_desc)?;
    check_data(&MemoryDescWrapper::new(&desc.data_desc), imp, name)?;
    check_data(&MemoryDescWrapper::new(&diff_data_md), imp, name)?;
    ensure(args.attr.has_default_values(), name, "unsupported attributes")?;

    let ws_md = if desc.fuse_norm_relu() {
        init_default_ws(&desc.data_desc, imp.ws_bits())?
    } else {
        MemoryDesc::zero()
    };
    let pd = BatchNormBwdPd {
        desc: desc.clone(),
        data_md: desc.data_desc,
        diff_data_md,
        stat_md: resolve_any_plain(&desc.stat_desc)?,
        scaleshift_md: resolve_any_plain(&desc.data_scaleshift_desc)?,
        diff_scaleshift_md: resolve_any_plain(&desc.diff_data_scaleshift_desc)?,
        ws_md,
        imp,
    };
    PrimitiveDesc::new(
        PdKind::BatchNormBwd(pd),
        Some(args.op_desc.clone()),
        args.attr,
        args.engine,
        name,
        0,
    )
}

struct ChannelBwd {
    diff_gamma: f32,
    diff_beta: f32,
    diff_src: Vec<f32>,
}

pub(crate) fn execute_bwd(pd: &BatchNormBwdPd, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let desc = &pd.desc;
    let src = ctx.args.get_input(ArgId::SRC)?;
    let mean = ctx.args.get_input(ArgId::MEAN)?;
    let var = ctx.args.get_input(ArgId::VARIANCE)?;
    let diff_dst = ctx.args.get_input(ArgId::DIFF_DST)?;
    let scaleshift = if desc.use_scaleshift() {
        Some(ctx.args.get_input(ArgId::SCALE_SHIFT)?)
    } else {
        None
    };
    let ws = if desc.fuse_norm_relu() {
        Some(ctx.args.get_input(ArgId::WORKSPACE)?.as_bytes())
    } else {
        None
    };

    let data = MemoryDescWrapper::new(&pd.data_md);
    let diff = MemoryDescWrapper::new(&pd.diff_data_md);
    let stat = MemoryDescWrapper::new(&pd.stat_md);
    let ss = MemoryDescWrapper::new(&pd.scaleshift_md);
    let (mb, ch, sp) = shape(&data);
    let calculate_diff_stats = !desc.stats_is_src();
    let eps = desc.epsilon;
    let imp = pd.imp;

    let channels = map_units(ch as usize, |c| {
        let c = c as Dim;
        let m = mean.read_f32(stat.off_v(&[c], false));
        let v = var.read_f32(stat.off_v(&[c], false));
        let gamma = scaleshift.map_or(1.0, |mem| mem.read_f32(ss.off_v(&[0, c], false)));
        let inv_std = 1.0 / (v + eps).sqrt();
        let count = (mb * sp) as f32;

        let dd = |n: Dim, s: Dim| -> f32 {
            let l = (n * ch + c) * sp + s;
            if ws.is_some_and(|w| !get_mask(w, imp, l as usize)) {
                0.0
            } else {
                diff_dst.read_f32(phys(imp, &diff, l))
            }
        };
        let x = |n: Dim, s: Dim| src.read_f32(phys(imp, &data, (n * ch + c) * sp + s));

        let mut diff_gamma = 0.0f32;
        let mut diff_beta = 0.0f32;
        for n in 0..mb {
            for s in 0..sp {
                let g = dd(n, s);
                diff_gamma += (x(n, s) - m) * g;
                diff_beta += g;
            }
        }
        diff_gamma *= inv_std;

        let mut diff_src = Vec::with_capacity((mb * sp) as usize);
        for n in 0..mb {
            for s in 0..sp {
                let mut g = dd(n, s);
                if calculate_diff_stats {
                    g -= diff_beta / count + (x(n, s) - m) * diff_gamma * inv_std / count;
                }
                diff_src.push(gamma * inv_std * g);
            }
        }
        ChannelBwd {
            diff_gamma,
            diff_beta,
            diff_src,
        }
    });

    let diff_src = ctx.args.take_output(ArgId::DIFF_SRC)?;
    for (c, st) in channels.iter().enumerate() {
        let c = c as Dim;
        for n in 0..mb {
            for s in 0..sp {
                let l = (n * ch + c) * sp + s;
                diff_src.write_f32(phys(imp, &diff, l), st.diff_src[(n * sp + s) as usize]);
            }
        }
    }

    if !pd.diff_scaleshift_md.is_zero() {
        let dss = MemoryDescWrapper::new(&pd.diff_scaleshift_md);
        let out = ctx.args.take_output(ArgId::DIFF_SCALE_SHIFT)?;
        for (c, st) in channels.iter().enumerate() {
            let c = c as Dim;
            out.write_f32(dss.off_v(&[0, c], false), st.diff_gamma);
            out.write_f32(dss.off_v(&[1, c], false), st.diff_beta);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::PrimitiveAttr;
    use crate::engine::Engine;
    use crate::op_desc::BatchNormFlags;

    fn data(tag: FormatTag) -> MemoryDesc {
        MemoryDesc::new(&[2, 5, 3, 3], DataType::F32, tag).unwrap()
    }

    fn fwd_pd(prop: PropKind, flags: BatchNormFlags, imp: BnormImpl) -> PrimitiveDesc {
        let op: OpDesc = BatchNormDesc::forward(prop, &data(FormatTag::NCHW), 1e-5, flags)
            .unwrap()
            .into();
        let args = PdCreateArgs {
            op_desc: &op,
            attr: &PrimitiveAttr::default(),
            engine: &Engine::cpu(),
        };
        create_fwd(&args, "test", imp).unwrap()
    }

    fn count(pd: &PrimitiveDesc, usage: ArgUsage) -> usize {
        ArgId::ALL.iter().filter(|&&a| pd.arg_usage(a) == usage).count()
    }

    #[test]
    fn test_default_ws_size() {
        let d = data(FormatTag::NCHW);
        let one_bit = init_default_ws(&d, 1).unwrap();
        assert_eq!(one_bit.dims(), &[(90 + 7) / 8]);
        assert_eq!(one_bit.data_type, DataType::U8);
        assert_eq!(init_default_ws(&d, 8).unwrap().dims(), &[90]);
        // padded channels count
        let blocked = data(FormatTag::N_CHW16C);
        assert_eq!(init_default_ws(&blocked, 8).unwrap().dims(), &[2 * 16 * 9]);
    }

    #[test]
    fn test_default_ws_overflow() {
        let huge = MemoryDesc::new(&[1 << 61, 2], DataType::U8, FormatTag::ab).unwrap();
        assert!(matches!(
            init_default_ws(&huge, 8),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_fwd_arg_counts_for_every_flag_combination() {
        for bits in 0..8 {
            let flags = BatchNormFlags::from_bits(bits).unwrap();
            for prop in [PropKind::ForwardTraining, PropKind::ForwardInference] {
                let pd = fwd_pd(prop, flags, BnormImpl::Ref);
                let stats = flags.contains(BatchNormFlags::USE_GLOBAL_STATS) as usize;
                let ss = flags.contains(BatchNormFlags::USE_SCALESHIFT) as usize;
                let fuse = flags.contains(BatchNormFlags::FUSE_NORM_RELU) as usize;
                let training = (prop == PropKind::ForwardTraining) as usize;
                assert_eq!(pd.n_inputs(), 1 + 2 * stats + ss, "{flags:?} {prop:?}");
                assert_eq!(pd.n_outputs(), 1 + (fuse + 2 * (1 - stats)) * training);
                assert_eq!(count(&pd, ArgUsage::Input), pd.n_inputs());
                assert_eq!(count(&pd, ArgUsage::Output), pd.n_outputs());
                for arg in ArgId::ALL {
                    if pd.arg_usage(arg) != ArgUsage::Unused {
                        assert!(!pd.arg_md(arg).is_zero(), "{arg} of {flags:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_fwd_stats_md_follow_direction() {
        let pd = fwd_pd(PropKind::ForwardTraining, BatchNormFlags::NONE, BnormImpl::Ref);
        assert!(pd.src_md(1).is_zero());
        assert_eq!(pd.arg_md(ArgId::MEAN), pd.dst_md(1));
        let pd = fwd_pd(PropKind::ForwardTraining, BatchNormFlags::USE_GLOBAL_STATS, BnormImpl::Ref);
        assert!(pd.dst_md(1).is_zero());
        assert_eq!(pd.arg_md(ArgId::VARIANCE), pd.src_md(2));
        let pd = fwd_pd(PropKind::ForwardInference, BatchNormFlags::NONE, BnormImpl::Ref);
        assert!(pd.arg_md(ArgId::MEAN).is_zero());
    }

    #[test]
    fn test_workspace_only_when_training_with_fused_relu() {
        let fuse = BatchNormFlags::FUSE_NORM_RELU;
        let pd = fwd_pd(PropKind::ForwardTraining, fuse, BnormImpl::Ncsp);
        assert_eq!(pd.workspace_md(0).unwrap().dims(), &[12]);
        assert_eq!(pd.arg_usage(ArgId::WORKSPACE), ArgUsage::Output);
        let pd = fwd_pd(PropKind::ForwardInference, fuse, BnormImpl::Ncsp);
        assert!(pd.workspace_md(0).is_none());
        assert_eq!(pd.arg_usage(ArgId::WORKSPACE), ArgUsage::Unused);
    }

    #[test]
    fn test_bwd_arg_counts() {
        let d = data(FormatTag::NCHW);
        for bits in 0..8 {
            let flags = BatchNormFlags::from_bits(bits).unwrap();
            for prop in [PropKind::Backward, PropKind::BackwardData] {
                let op: OpDesc = BatchNormDesc::backward(prop, &d, &d, 1e-5, flags).unwrap().into();
                let args = PdCreateArgs {
                    op_desc: &op,
                    attr: &PrimitiveAttr::default(),
                    engine: &Engine::cpu(),
                };
                let pd = create_bwd(&args, "test", BnormImpl::Ref).unwrap();
                let ss = flags.contains(BatchNormFlags::USE_SCALESHIFT) as usize;
                let fuse = flags.contains(BatchNormFlags::FUSE_NORM_RELU) as usize;
                assert_eq!(pd.n_inputs(), 4 + ss + fuse);
                assert_eq!(count(&pd, ArgUsage::Input), pd.n_inputs());
                assert_eq!(count(&pd, ArgUsage::Output), pd.n_outputs());
                let full = (prop == PropKind::Backward) as usize;
                assert_eq!(pd.n_outputs(), 1 + ss * full);
            }
        }
    }

    #[test]
    fn test_ncsp_rejects_blocked_layout() {
        let op: OpDesc = BatchNormDesc::forward(
            PropKind::ForwardInference,
            &data(FormatTag::N_CHW8C),
            1e-5,
            BatchNormFlags::NONE,
        )
        .unwrap()
        .into();
        let args = PdCreateArgs {
            op_desc: &op,
            attr: &PrimitiveAttr::default(),
            engine: &Engine::cpu(),
        };
        assert!(matches!(
            create_ncsp_fwd(&args, "ncsp"),
            Err(Error::Unimplemented(_))
        ));
        assert!(create_ref_fwd(&args, "ref").is_ok());
    }

    #[test]
    fn test_mask_bits() {
        let mut ws = vec![0xffu8; 2];
        set_mask(&mut ws, BnormImpl::Ncsp, 9, false);
        assert_eq!(ws, vec![0xff, 0xfd]);
        assert!(!get_mask(&ws, BnormImpl::Ncsp, 9));
        assert!(get_mask(&ws, BnormImpl::Ncsp, 8));
        set_mask(&mut ws, BnormImpl::Ref, 0, false);
        assert!(!get_mask(&ws, BnormImpl::Ref, 0));
    }
}
