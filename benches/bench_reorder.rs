//! Execution throughput of reorder and gemm kernels.
//!
//! Reports bytes moved for reorders and FLOPs (2*M*N*K) for gemm.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use dnn_primitives::{
    create_primitive_desc, create_reorder_primitive_desc, ArgId, DataType, Engine, ExecArgs,
    FormatTag, GemmDesc, Memory, MemoryDesc, OpDesc, Primitive, Stream,
};

const REORDERS: &[(&str, FormatTag, DataType, FormatTag, DataType)] = &[
    ("direct_copy", FormatTag::NCHW, DataType::F32, FormatTag::NCHW, DataType::F32),
    ("f32_to_bf16", FormatTag::NCHW, DataType::F32, FormatTag::NCHW, DataType::Bf16),
    ("nchw_to_nChw16c", FormatTag::NCHW, DataType::F32, FormatTag::N_CHW16C, DataType::F32),
];

const GEMM_SIZES: &[(i64, i64, i64)] = &[(64, 64, 64), (128, 128, 128), (32, 512, 512)];

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec/reorder");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(3));
    let cpu = Engine::cpu();
    let stream = Stream::new(&cpu).unwrap();
    let dims = [16, 64, 28, 28];

    for &(label, stag, sdt, dtag, ddt) in REORDERS {
        let src_md = MemoryDesc::new(&dims, sdt, stag).unwrap();
        let dst_md = MemoryDesc::new(&dims, ddt, dtag).unwrap();
        let pd = create_reorder_primitive_desc(Some(&src_md), Some(&cpu), Some(&dst_md), Some(&cpu), None)
            .unwrap();
        let prim = Primitive::new(&pd).unwrap();
        let src = Memory::new(&src_md, &cpu).unwrap();
        let mut dst = Memory::new(&dst_md, &cpu).unwrap();

        group.throughput(Throughput::Bytes((src.as_bytes().len() + dst.as_bytes().len()) as u64));
        group.bench_function(BenchmarkId::from_parameter(label), |b| {
            b.iter(|| {
                prim.execute(
                    &stream,
                    ExecArgs::new().input(ArgId::FROM, &src).output(ArgId::TO, &mut dst),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec/gemm");
    group.sample_size(10);
    let cpu = Engine::cpu();
    let stream = Stream::new(&cpu).unwrap();

    for &(m, n, k) in GEMM_SIZES {
        let a_md = MemoryDesc::new(&[m, k], DataType::F32, FormatTag::NC).unwrap();
        let w_md = MemoryDesc::new(&[k, n], DataType::F32, FormatTag::NC).unwrap();
        let d_md = MemoryDesc::new(&[m, n], DataType::F32, FormatTag::NC).unwrap();
        let op: OpDesc = GemmDesc::new(&a_md, &w_md, None, &d_md).unwrap().into();
        let pd = create_primitive_desc(Some(&op), None, Some(&cpu), None).unwrap();
        let prim = Primitive::new(&pd).unwrap();
        let a = Memory::new(&a_md, &cpu).unwrap();
        let w = Memory::new(&w_md, &cpu).unwrap();
        let mut d = Memory::new(&d_md, &cpu).unwrap();

        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        let id = BenchmarkId::new(pd.impl_info().to_string(), format!("{m}x{n}x{k}"));
        group.bench_function(id, |b| {
            b.iter(|| {
                prim.execute(
                    &stream,
                    ExecArgs::new()
                        .input(ArgId::SRC, &a)
                        .input(ArgId::WEIGHTS, &w)
                        .output(ArgId::DST, &mut d),
                )
                .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reorder, bench_gemm);
criterion_main!(benches);
