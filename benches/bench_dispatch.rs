//! Descriptor creation latency: candidate-list walk for common requests.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use dnn_primitives::{
    create_primitive_desc, create_reorder_primitive_desc, BatchNormDesc, BatchNormFlags, DataType,
    Engine, FormatTag, GemmDesc, MemoryDesc, OpDesc, PropKind, SoftmaxAlg, SoftmaxDesc,
};

const REORDER_TAGS: &[(&str, FormatTag, FormatTag)] = &[
    ("identity", FormatTag::NCHW, FormatTag::NCHW),
    ("nchw_to_nhwc", FormatTag::NCHW, FormatTag::NHWC),
    ("nchw_to_nChw16c", FormatTag::NCHW, FormatTag::N_CHW16C),
];

fn bench_reorder_pd(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/reorder");
    group.warm_up_time(Duration::from_millis(300));
    let cpu = Engine::cpu();
    for &(label, from, to) in REORDER_TAGS {
        let src = MemoryDesc::new(&[8, 64, 14, 14], DataType::F32, from).unwrap();
        let dst = MemoryDesc::new(&[8, 64, 14, 14], DataType::F32, to).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(label), &(src, dst), |b, (s, d)| {
            b.iter(|| {
                create_reorder_primitive_desc(Some(s), Some(&cpu), Some(d), Some(&cpu), None).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_bnorm_fwd_bwd(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/batch_norm");
    let cpu = Engine::cpu();
    let data = MemoryDesc::new(&[8, 64, 14, 14], DataType::F32, FormatTag::NCHW).unwrap();
    let flags = BatchNormFlags::FUSE_NORM_RELU | BatchNormFlags::USE_SCALESHIFT;
    let fwd_op: OpDesc = BatchNormDesc::forward(PropKind::ForwardTraining, &data, 1e-5, flags)
        .unwrap()
        .into();
    let bwd_op: OpDesc = BatchNormDesc::backward(PropKind::Backward, &data, &data, 1e-5, flags)
        .unwrap()
        .into();

    group.bench_function("forward", |b| {
        b.iter(|| create_primitive_desc(Some(black_box(&fwd_op)), None, Some(&cpu), None).unwrap())
    });
    let fwd = create_primitive_desc(Some(&fwd_op), None, Some(&cpu), None).unwrap();
    group.bench_function("backward_with_hint", |b| {
        b.iter(|| {
            create_primitive_desc(Some(black_box(&bwd_op)), None, Some(&cpu), Some(&fwd)).unwrap()
        })
    });
    group.finish();
}

fn bench_fallthrough(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch/fallthrough");
    let cpu = Engine::cpu();

    // axis 0 skips the dense candidate
    let md = MemoryDesc::new(&[64, 1000], DataType::F32, FormatTag::NC).unwrap();
    let softmax: OpDesc = SoftmaxDesc::forward(PropKind::ForwardInference, SoftmaxAlg::Softmax, &md, 0)
        .unwrap()
        .into();
    group.bench_function("softmax_generic", |b| {
        b.iter(|| create_primitive_desc(Some(&softmax), None, Some(&cpu), None).unwrap())
    });

    // transposed weights skip the blocked gemm
    let a = MemoryDesc::new(&[128, 256], DataType::F32, FormatTag::NC).unwrap();
    let w = MemoryDesc::new(&[256, 128], DataType::F32, FormatTag::CN).unwrap();
    let d = MemoryDesc::any(&[128, 128], DataType::F32).unwrap();
    let gemm: OpDesc = GemmDesc::new(&a, &w, None, &d).unwrap().into();
    group.bench_function("gemm_ref", |b| {
        b.iter(|| create_primitive_desc(Some(&gemm), None, Some(&cpu), None).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_reorder_pd, bench_bnorm_fwd_bwd, bench_fallthrough);
criterion_main!(benches);
