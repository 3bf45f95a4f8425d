//! Direct forward convolution over 1 to 3 spatial dims.

use crate::attr::PrimitiveAttr;
use crate::error::{Error, Result};
use crate::impl_list::PdCreateArgs;
use crate::impls::{ensure, PdContract};
use crate::memory_desc::{MemoryDesc, MemoryDescWrapper, ZERO_MD};
use crate::op_desc::{resolve_any_plain, ConvolutionDesc, OpDesc};
use crate::parallel::map_units;
use crate::primitive::ExecCtx;
use crate::primitive_desc::{PdKind, PrimitiveDesc};
use crate::types::{ArgId, ArgUsage, DataType, Dim, PropKind};

#[derive(Debug, Clone)]
pub(crate) struct ConvolutionFwdPd {
    desc: ConvolutionDesc,
    dst_md: MemoryDesc,
}

impl PdContract for ConvolutionFwdPd {
    fn prop_kind(&self) -> PropKind {
        self.desc.prop_kind
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

/// Source/weights type pairs the reference kernel accepts.
fn supported_types(src: DataType, wei: DataType, dst: DataType) -> bool {
    let float = src.is_float() && wei.is_float() && dst.is_float();
    let int8 = matches!(src, DataType::U8 | DataType::S8)
        && wei == DataType::S8
        && dst != DataType::Undef;
    float || int8
}

pub(crate) fn create_ref(args: &PdCreateArgs<'_>, name: &'static str) -> Result<PrimitiveDesc> {
    let desc = match args.op_desc {
        OpDesc::Convolution(d) => d,
        other => {
            return Err(Error::unimplemented(format!(
                "{name}: {} is not convolution",
                other.kind().name()
            )))
        }
    };
    ensure(desc.prop_kind.is_fwd(), name, "not a forward descriptor")?;
    let dst_md = resolve_any_plain(&desc.dst_desc)?;
    ensure(
        supported_types(desc.src_desc.data_type, desc.weights_desc.data_type, dst_md.data_type),
        name,
        "unsupported data types",
    )?;
    ensure(
        args.attr.post_ops().is_eltwise_chain_with_leading_sum(),
        name,
        "unsupported post-ops",
    )?;
    let pd = ConvolutionFwdPd {
        desc: desc.clone(),
        dst_md,
    };
    PrimitiveDesc::new(
        PdKind::ConvolutionFwd(pd),
        Some(args.op_desc.clone()),
        args.attr,
        args.engine,
        name,
        0,
    )
}

/// Spatial sizes padded to three dims (leading 1s).
fn spatial3(dims: &[Dim]) -> [Dim; 3] {
    let sp = &dims[2..];
    let mut out = [1; 3];
    out[3 - sp.len()..].copy_from_slice(sp);
    out
}

/// Per-dim parameters padded like [`spatial3`] with `fill` at the front.
fn params3(v: &[Dim; 3], nsp: usize, fill: Dim) -> [Dim; 3] {
    let mut out = [fill; 3];
    out[3 - nsp..].copy_from_slice(&v[..nsp]);
    out
}

/// Logical position `(a, b, spatial...)` for a tensor with `nsp` spatial dims.
#[inline]
fn pos(a: Dim, b: Dim, sp: [Dim; 3], nsp: usize) -> ([Dim; 5], usize) {
    let mut p = [a, b, 0, 0, 0];
    p[2..2 + nsp].copy_from_slice(&sp[3 - nsp..]);
    (p, 2 + nsp)
}

pub(crate) fn execute(pd: &ConvolutionFwdPd, attr: &PrimitiveAttr, ctx: &mut ExecCtx<'_, '_>) -> Result<()> {
    let desc = &pd.desc;
    let src = ctx.args.get_input(ArgId::SRC)?;
    let wei = ctx.args.get_input(ArgId::WEIGHTS)?;
    let bias = if desc.with_bias() {
        Some(ctx.args.get_input(ArgId::BIAS)?)
    } else {
        None
    };
    let dst = ctx.args.take_output(ArgId::DST)?;

    let src_d = MemoryDescWrapper::new(&desc.src_desc);
    let wei_d = MemoryDescWrapper::new(&desc.weights_desc);
    let bias_d = MemoryDescWrapper::new(&desc.bias_desc);
    let dst_d = MemoryDescWrapper::new(&pd.dst_md);

    let nsp = src_d.ndims() - 2;
    let (mb, ic, oc) = (src_d.dims()[0], src_d.dims()[1], dst_d.dims()[1]);
    let isz = spatial3(src_d.dims());
    let osz = spatial3(dst_d.dims());
    let ksz = spatial3(wei_d.dims());
    let strides = params3(&desc.strides, nsp, 1);
    let dilates = params3(&desc.dilates, nsp, 0);
    let pad_l = params3(&desc.padding_l, nsp, 0);

    let scale = attr.output_scale();
    let post_ops = attr.post_ops();
    let with_sum = post_ops.find_sum().is_some();
    let prev: &crate::memory::Memory = dst;
    let ospatial = (osz[0] * osz[1] * osz[2]) as usize;

    let units = map_units((mb * oc) as usize, |u| {
        let (n, o) = (u as Dim / oc, u as Dim % oc);
        let b = bias.map_or(0.0, |m| m.read_f32(bias_d.off_v(&[o], false)));
        let mut out = Vec::with_capacity(ospatial);
        for od in 0..osz[0] {
            for oh in 0..osz[1] {
                for ow in 0..osz[2] {
                    let o_sp = [od, oh, ow];
                    let mut acc = 0.0f32;
                    for i in 0..ic {
                        for kd in 0..ksz[0] {
                            for kh in 0..ksz[1] {
                                for kw in 0..ksz[2] {
                                    let k_sp = [kd, kh, kw];
                                    let mut i_sp = [0; 3];
                                    let mut inside = true;
                                    for d in 0..3 {
                                        i_sp[d] = o_sp[d] * strides[d] - pad_l[d]
                                            + k_sp[d] * (dilates[d] + 1);
                                        inside &= (0..isz[d]).contains(&i_sp[d]);
                                    }
                                    if !inside {
                                        continue;
                                    }
                                    let (sp, sn) = pos(n, i, i_sp, nsp);
                                    let (wp, wn) = pos(o, i, k_sp, nsp);
                                    acc += src.read_f32(src_d.off_v(&sp[..sn], false))
                                        * wei.read_f32(wei_d.off_v(&wp[..wn], false));
                                }
                            }
                        }
                    }
                    let (dp, dn) = pos(n, o, o_sp, nsp);
                    let old = if with_sum {
                        prev.read_f32(dst_d.off_v(&dp[..dn], false))
                    } else {
                        0.0
                    };
                    out.push(post_ops.apply((acc + b) * scale, old));
                }
            }
        }
        out
    });

    for (u, values) in units.iter().enumerate() {
        let (n, o) = (u as Dim / oc, u as Dim % oc);
        let mut j = 0;
        for od in 0..osz[0] {
            for oh in 0..osz[1] {
                for ow in 0..osz[2] {
                    let (dp, dn) = pos(n, o, [od, oh, ow], nsp);
                    dst.write_f32(dst_d.off_v(&dp[..dn], false), values[j]);
                    j += 1;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_padding_helpers() {
        assert_eq!(spatial3(&[2, 3, 7]), [1, 1, 7]);
        assert_eq!(spatial3(&[2, 3, 5, 7]), [1, 5, 7]);
        assert_eq!(params3(&[2, 3, 0], 2, 1), [1, 2, 3]);
        let (p, n) = pos(1, 2, [1, 5, 6], 2);
        assert_eq!(&p[..n], &[1, 2, 5, 6]);
    }

    #[test]
    fn test_type_combinations() {
        assert!(supported_types(DataType::F32, DataType::F32, DataType::F32));
        assert!(supported_types(DataType::Bf16, DataType::Bf16, DataType::F32));
        assert!(supported_types(DataType::U8, DataType::S8, DataType::S32));
        assert!(!supported_types(DataType::U8, DataType::U8, DataType::S32));
        assert!(!supported_types(DataType::F32, DataType::S8, DataType::F32));
    }
}
