//! Matrix multiplication with optional batch, bias, output scale and
//! post-ops.
//!
//! The blocked kernel decodes weights to f32 once and accumulates whole
//! destination rows in `vlen`-wide lanes sized for the active CPU ISA; the
//! reference kernel walks logical offsets and accepts any layout.

use crate::attr::PrimitiveAttr;
use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::impl_list::PdCreateArgs;
use crate::impls::{ensure, ensure_engine, PdContract};
use crate::isa::{max_cpu_isa, CpuIsa};
use crate::memory::Memory;
use crate::memory_desc::{FormatTag, MemoryDesc, MemoryDescWrapper, ZERO_MD};
use crate::op_desc::{resolve_any_plain, GemmDesc, OpDesc};
use crate::parallel::{for_each_unit_run2, map_units};
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, Dim, PropKind};

const F32: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GemmImpl {
    Blocked { vlen: usize },
    Ref,
}

#[derive(Debug, Clone)]
pub(crate) struct GemmPd {
    desc: GemmDesc,
    dst_md: MemoryDesc,
    imp: GemmImpl,
}

impl PdContract for GemmPd {
    fn prop_kind(&self) -> PropKind {
        PropKind::ForwardInference
    }

    fn arg_usage(&self, arg: ArgId) -> Option<ArgUsage> {
        let usage = match arg {
            ArgId::SRC | ArgId::WEIGHTS => ArgUsage::Input,
            ArgId::BIAS if self.desc.with_bias() => ArgUsage::Input,
            ArgId::DST => ArgUsage::Output,
            _ => return None,
        };
        Some(usage)
    }

    fn arg_md(&self, arg: ArgId) -> Option<&MemoryDesc> {
        let md = match arg {
            ArgId::SRC => self.src_md(0),
            ArgId::WEIGHTS => self.weights_md(0),
            ArgId::BIAS => self.weights_md(1),
            ArgId::DST => self.dst_md(0),
            _ => return None,
        };
        Some(md)
    }

    fn src_md(&self, index: usize) -> &MemoryDesc {
        if index == 0 {
            &self.desc.src_desc
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

    fn weights_md(&self, index: usize) -> &MemoryDesc {
        match index {
            0 => &self.desc.weights_desc,
            1 => &self.desc.bias_desc,
            _ => &ZERO_MD,
        }
    }

    fn n_inputs(&self) -> usize {
        2 + self.desc.with_bias() as usize
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn has_zero_dim_memory(&self) -> bool {
        [&self.desc.src_desc, &self.desc.weights_desc, &self.dst_md]
            .into_iter()
            .any(|md| MemoryDescWrapper::new(md).has_zero_dim())
    }
}

fn as_gemm<'a>(args: &PdCreateArgs<'a>, name: &str) -> Result<&'a GemmDesc> {
    match args.op_desc {
        OpDesc::Gemm(d) => Ok(d),
        other => Err(Error::unimplemented(format!(
            "{name}: {} is not gemm",
            other.kind().name()
        ))),
    }
}

fn is_row_major(md: &MemoryDesc) -> bool {
    let mdw = MemoryDescWrapper::new(md);
    FormatTag::plain_for_ndims(mdw.ndims()).is_some_and(|t| mdw.matches_tag(t))
}

fn finish(args: &PdCreateArgs<'_>, desc: &GemmDesc, dst_md: MemoryDesc, name: String, imp: GemmImpl) -> Result<PrimitiveDesc> {
    ensure(
        args.attr.post_ops().is_eltwise_chain_with_leading_sum(),
        &name,
        "unsupported post-ops",
    )?;
    let pd = GemmPd {
        desc: desc.clone(),
        dst_md,
        imp,
    };
    PrimitiveDesc::new(PdKind::Gemm(pd), Some(args.op_desc.clone()), args.attr, args.engine, name, 0)
}

/// Vector-ISA kernel; the implementation name carries the ISA in use.
pub(crate) fn create_blocked(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = as_gemm(args, name)?;
    ensure_engine(args.engine, EngineKind::Cpu, name)?;
    let isa = max_cpu_isa();
    ensure(isa != CpuIsa::Scalar, name, "no vector ISA available")?;
    let dst_md = resolve_any_plain(&desc.dst_desc)?;
    let all_f32 = [&desc.src_desc, &desc.weights_desc, &dst_md]
        .into_iter()
        .chain(desc.with_bias().then_some(&desc.bias_desc))
        .all(|md| md.data_type == DataType::F32);
    ensure(all_f32, name, "f32 only")?;
    ensure(
        is_row_major(&desc.src_desc) && is_row_major(&desc.weights_desc) && is_row_major(&dst_md),
        name,
        "operands are not row-major",
    )?;
    let impl_name = format!("gemm:{}", isa.name());
    finish(args, desc, dst_md, impl_name, GemmImpl::Blocked { vlen: isa.vlen_f32() })
}

pub(crate) fn create_ref(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = as_gemm(args, name)?;
    let dst_md = resolve_any_plain(&desc.dst_desc)?;
    let ok = [&desc.src_desc, &desc.weights_desc, &dst_md]
        .into_iter()
        .all(|md| md.data_type != DataType::Undef && MemoryDescWrapper::new(md).is_blocking_desc());
    ensure(ok, name, "unsupported operands")?;
    finish(args, desc, dst_md, name.to_string(), GemmImpl::Ref)
}

/// Problem sizes shared by both kernels.
struct Dims3 {
    batch: Dim,
    m: Dim,
    k: Dim,
    n: Dim,
    wei_batch: Dim,
    nd: usize,
}

impl Dims3 {
    fn new(desc: &GemmDesc) -> Self {
        let (src, wei) = (desc.src_desc.dims(), desc.weights_desc.dims());
        let nd = src.len();
        Self {
            batch: if nd == 3 { src[0] } else { 1 },
            m: src[nd - 2],
            k: src[nd - 1],
            n: wei[nd - 1],
            wei_batch: if nd == 3 { wei[0] } else { 1 },
            nd,
        }
    }

    /// Logical position of `(b, row, col)` in a tensor of this rank.
    #[inline]
    fn pos(&self, b: Dim, row: Dim, col: Dim) -> ([Dim; 3], usize) {
        if self.nd == 3 {
            ([b, row, col], 3)
        } else {
            ([row, col, 0], 2)
        }
    }
}

/// Offset of the bias element broadcast to `(b, m, n)`.
fn bias_off(bias: &MemoryDescWrapper<'_>, d: &Dims3, b: Dim, m: Dim, n: Dim) -> Dim {
    let (mut p, len) = d.pos(b, m, n);
    for (i, &bd) in bias.dims().iter().enumerate() {
        if bd == 1 {
            p[i] = 0;
        }
    }
    bias.off_v(&p[..len], false)
}

pub(crate) fn execute(pd: &GemmPd, attr: &PrimitiveAttr, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let src = ctx.args.get_input(ArgId::SRC)?;
    let wei = ctx.args.get_input(ArgId::WEIGHTS)?;
    let bias = if pd.desc.with_bias() {
        Some(ctx.args.get_input(ArgId::BIAS)?)
    } else {
        None
    };
    let dst = ctx.args.take_output(ArgId::DST)?;
    match pd.imp {
        GemmImpl::Blocked { vlen } => execute_blocked(pd, attr, src, wei, bias, dst, vlen),
        GemmImpl::Ref => {
            execute_ref(pd, attr, src, wei, bias, dst);
            Ok(())
        }
    }
}

fn execute_ref(pd: &GemmPd, attr: &PrimitiveAttr, src: &Memory, wei: &Memory, bias: Option<&Memory>, dst: &mut Memory) {
    let d = Dims3::new(&pd.desc);
    let src_d = MemoryDescWrapper::new(&pd.desc.src_desc);
    let wei_d = MemoryDescWrapper::new(&pd.desc.weights_desc);
    let bias_d = MemoryDescWrapper::new(&pd.desc.bias_desc);
    let dst_d = MemoryDescWrapper::new(&pd.dst_md);
    let scale = attr.output_scale();
    let post_ops = attr.post_ops();
    let with_sum = post_ops.find_sum().is_some();
    let prev: &Memory = dst;

    let rows = map_units((d.batch * d.m) as usize, |r| {
        let (b, m) = (r as Dim / d.m, r as Dim % d.m);
        let wb = if d.wei_batch == 1 { 0 } else { b };
        (0..d.n)
            .map(|n| {
                let mut acc = 0.0f32;
                for k in 0..d.k {
                    let (sp, sl) = d.pos(b, m, k);
                    let (wp, wl) = d.pos(wb, k, n);
                    acc += src.read_f32(src_d.off_v(&sp[..sl], false))
                        * wei.read_f32(wei_d.off_v(&wp[..wl], false));
                }
                if let Some(bm) = bias {
                    acc += bm.read_f32(bias_off(&bias_d, &d, b, m, n));
                }
                let (dp, dl) = d.pos(b, m, n);
                let old = if with_sum {
                    prev.read_f32(dst_d.off_v(&dp[..dl], false))
                } else {
                    0.0
                };
                post_ops.apply(acc * scale, old)
            })
            .collect::<Vec<f32>>()
    });

    for (r, row) in rows.iter().enumerate() {
        let (b, m) = (r as Dim / d.m, r as Dim % d.m);
        for (n, &v) in row.iter().enumerate() {
            let (dp, dl) = d.pos(b, m, n as Dim);
            dst.write_f32(dst_d.off_v(&dp[..dl], false), v);
        }
    }
}

fn decode_f32(mem: &Memory, count: usize) -> Result<Vec<f32>> {
    let bytes = mem.as_bytes();
    let mut out = Vec::new();
    out.try_reserve_exact(count)
        .map_err(|_| Error::out_of_memory(format!("{count} f32 weights")))?;
    out.extend((0..count).map(|i| DataType::F32.load_f32(&bytes[i * F32..(i + 1) * F32])));
    Ok(out)
}

fn execute_blocked(
    pd: &GemmPd,
    attr: &PrimitiveAttr,
    src: &Memory,
    wei: &Memory,
    bias: Option<&Memory>,
    dst: &mut Memory,
    vlen: usize,
) -> Result<()> {
    let d = Dims3::new(&pd.desc);
    let (m, k, n) = (d.m as usize, d.k as usize, d.n as usize);
    let weights = decode_f32(wei, d.wei_batch as usize * k * n)?;
    let bias_d = MemoryDescWrapper::new(&pd.desc.bias_desc);
    let scale = attr.output_scale();
    let post_ops = attr.post_ops();
    let src_bytes = src.as_bytes();
    let mut acc_all = zeroed_f32(d.batch as usize * m * n)?;

    let run = |r0: usize, dst_rows: &mut [u8], acc_rows: &mut [f32]| {
        for (i, (row, acc)) in dst_rows.chunks_exact_mut(n * F32).zip(acc_rows.chunks_exact_mut(n)).enumerate() {
            let r = r0 + i;
            let (b, mm) = (r / m, r % m);
            let wb = if d.wei_batch == 1 { 0 } else { b };
            let wbase = wb * k * n;
            for kk in 0..k {
                let at = ((b * m + mm) * k + kk) * F32;
                let a = DataType::F32.load_f32(&src_bytes[at..at + F32]);
                let wrow = &weights[wbase + kk * n..wbase + (kk + 1) * n];
                let mut acc_lanes = acc.chunks_exact_mut(vlen);
                let mut w_lanes = wrow.chunks_exact(vlen);
                for (lane, w) in (&mut acc_lanes).zip(&mut w_lanes) {
                    for (c, &wv) in lane.iter_mut().zip(w) {
                        *c += a * wv;
                    }
                }
                for (c, &wv) in acc_lanes.into_remainder().iter_mut().zip(w_lanes.remainder()) {
                    *c += a * wv;
                }
            }
            for (j, out) in row.chunks_exact_mut(F32).enumerate() {
                let mut v = acc[j];
                if let Some(bm) = bias {
                    v += bm.read_f32(bias_off(&bias_d, &d, b as Dim, mm as Dim, j as Dim));
                }
                let old = DataType::F32.load_f32(out);
                DataType::F32.store_f32(post_ops.apply(v * scale, old), out);
            }
        }
    };

    for_each_unit_run2(dst.as_bytes_mut(), n * F32, &mut acc_all, n, run);
    Ok(())
}

/// Zeroed f32 accumulator storage, failing with `OutOfMemory`.
fn zeroed_f32(count: usize) -> Result<Vec<f32>> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| Error::out_of_memory(format!("{count} f32 accumulators")))?;
    v.resize(count, 0.0);
    Ok(v)
}
