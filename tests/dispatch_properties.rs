//! Dispatch-level properties: argument counts, workspace negotiation,
//! candidate order, reorder engine selection, argument validation.

use dnn_primitives::{
    create_primitive_desc, create_reorder_primitive_desc, impl_names, reorder_engine, ArgId,
    ArgUsage, BatchNormDesc, BatchNormFlags, DataType, Engine, EngineKind, Error, ExecArgs,
    FormatTag, Memory, MemoryDesc, OpDesc, Primitive, PrimitiveAttr, PrimitiveDesc,
    PrimitiveDescIterator, PrimitiveKind, PropKind, Query, QueryValue, SoftmaxAlg, SoftmaxDesc,
    Status, Stream,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn nchw(dims: &[i64]) -> MemoryDesc {
    MemoryDesc::new(dims, DataType::F32, FormatTag::NCHW).unwrap()
}

fn bnorm_fwd(prop: PropKind, data: &MemoryDesc, flags: BatchNormFlags) -> PrimitiveDesc {
    let op: OpDesc = BatchNormDesc::forward(prop, data, 1e-5, flags).unwrap().into();
    create_primitive_desc(Some(&op), None, Some(&Engine::cpu()), None).unwrap()
}

fn bnorm_bwd(
    diff: &MemoryDesc,
    data: &MemoryDesc,
    flags: BatchNormFlags,
    hint: Option<&PrimitiveDesc>,
) -> dnn_primitives::Result<PrimitiveDesc> {
    let op: OpDesc = BatchNormDesc::backward(PropKind::Backward, diff, data, 1e-5, flags)
        .unwrap()
        .into();
    create_primitive_desc(Some(&op), None, Some(&Engine::cpu()), hint)
}

fn count(pd: &PrimitiveDesc, usage: ArgUsage) -> usize {
    pd.used_args().iter().filter(|(_, u)| *u == usage).count()
}

// =============================================================================
// Argument counts
// =============================================================================

#[test]
fn test_bnorm_fwd_arg_count_table() {
    init_logger();
    let data = nchw(&[2, 4, 3, 3]);
    for bits in 0..8 {
        let flags = BatchNormFlags::from_bits(bits).unwrap();
        let stats = flags.contains(BatchNormFlags::USE_GLOBAL_STATS) as usize;
        let ss = flags.contains(BatchNormFlags::USE_SCALESHIFT) as usize;
        let fuse = flags.contains(BatchNormFlags::FUSE_NORM_RELU) as usize;
        for (prop, training) in [(PropKind::ForwardTraining, 1), (PropKind::ForwardInference, 0)] {
            let pd = bnorm_fwd(prop, &data, flags);
            assert_eq!(pd.n_inputs(), 1 + 2 * stats + ss, "{flags:?} {prop:?}");
            assert_eq!(pd.n_outputs(), 1 + (fuse + 2 * (1 - stats)) * training, "{flags:?} {prop:?}");
            assert_eq!(count(&pd, ArgUsage::Input), pd.n_inputs());
            assert_eq!(count(&pd, ArgUsage::Output), pd.n_outputs());
        }
    }
}

#[test]
fn test_unknown_arguments_are_unused_with_zero_md() {
    let pd = bnorm_fwd(PropKind::ForwardInference, &nchw(&[1, 2, 2, 2]), BatchNormFlags::NONE);
    for arg in [ArgId::DIFF_SRC, ArgId::DST_2, ArgId::WEIGHTS_1, ArgId::SCRATCHPAD, ArgId(999)] {
        assert_eq!(pd.arg_usage(arg), ArgUsage::Unused, "{arg}");
        assert!(pd.arg_md(arg).is_zero(), "{arg}");
    }
}

// =============================================================================
// Workspace negotiation
// =============================================================================

#[test]
fn test_bwd_workspace_matches_forward_byte_exactly() {
    init_logger();
    let data = nchw(&[2, 3, 5, 5]);
    let flags = BatchNormFlags::FUSE_NORM_RELU | BatchNormFlags::USE_SCALESHIFT;
    let fwd = bnorm_fwd(PropKind::ForwardTraining, &data, flags);
    let bwd = bnorm_bwd(&data, &data, flags, Some(&fwd)).unwrap();
    assert_eq!(bwd.impl_info(), fwd.impl_info());
    assert_eq!(bwd.workspace_md(0), fwd.workspace_md(0));
    assert_eq!(bwd.arg_usage(ArgId::WORKSPACE), ArgUsage::Input);
    assert_eq!(bwd.arg_md(ArgId::WORKSPACE), fwd.arg_md(ArgId::WORKSPACE));
    assert!(bwd.compare_ws(Some(&fwd)));
}

#[test]
fn test_blocked_layout_negotiates_reference_workspace() {
    let data = MemoryDesc::new(&[2, 3, 5, 5], DataType::F32, FormatTag::N_CHW8C).unwrap();
    let flags = BatchNormFlags::FUSE_NORM_RELU;
    let fwd = bnorm_fwd(PropKind::ForwardTraining, &data, flags);
    assert_eq!(fwd.impl_info(), "ref:any");
    let bwd = bnorm_bwd(&data, &data, flags, Some(&fwd)).unwrap();
    assert_eq!(bwd.impl_info(), "ref:any");
    // one byte per padded element
    assert_eq!(bwd.workspace_md(0).unwrap().dims(), &[2 * 8 * 25]);
}

#[test]
fn test_bwd_workspace_mismatch_is_unimplemented() {
    init_logger();
    let data = nchw(&[2, 3, 5, 5]);
    let flags = BatchNormFlags::FUSE_NORM_RELU;
    let fwd = bnorm_fwd(PropKind::ForwardTraining, &data, flags);
    assert_eq!(fwd.impl_info(), "ncsp_bnorm:any");

    // a blocked diff layout rules out ncsp; ref wants an 8-bit mask the
    // forward pass never wrote
    let diff = MemoryDesc::new(&[2, 3, 5, 5], DataType::F32, FormatTag::N_CHW8C).unwrap();
    let err = bnorm_bwd(&diff, &data, flags, Some(&fwd)).unwrap_err();
    assert!(matches!(err, Error::Unimplemented(_)), "{err}");
    assert_eq!(err.status(), Status::Unimplemented);
}

#[test]
fn test_bwd_with_workspace_needs_hint() {
    let data = nchw(&[1, 2, 3, 3]);
    let flags = BatchNormFlags::FUSE_NORM_RELU;
    assert!(matches!(
        bnorm_bwd(&data, &data, flags, None),
        Err(Error::Unimplemented(_))
    ));
    // no workspace: no hint needed
    assert!(bnorm_bwd(&data, &data, BatchNormFlags::NONE, None).is_ok());
}

#[test]
fn test_hint_must_be_forward_of_same_kind() {
    let data = nchw(&[1, 2, 3, 3]);
    let fwd = bnorm_fwd(PropKind::ForwardTraining, &data, BatchNormFlags::NONE);
    let bwd = bnorm_bwd(&data, &data, BatchNormFlags::NONE, None).unwrap();
    assert!(matches!(
        bnorm_bwd(&data, &data, BatchNormFlags::NONE, Some(&bwd)),
        Err(Error::InvalidArguments(_))
    ));

    let md = MemoryDesc::new(&[2, 6], DataType::F32, FormatTag::NC).unwrap();
    let sm: OpDesc = SoftmaxDesc::backward(SoftmaxAlg::Softmax, &md, &md, 1).unwrap().into();
    assert!(matches!(
        create_primitive_desc(Some(&sm), None, Some(&Engine::cpu()), Some(&fwd)),
        Err(Error::InvalidArguments(_))
    ));
}

// =============================================================================
// Candidate order
// =============================================================================

#[test]
fn test_identity_reorder_uses_direct_copy() {
    let cpu = Engine::cpu();
    for md in [
        nchw(&[2, 16, 3, 3]),
        MemoryDesc::new(&[2, 16, 3, 3], DataType::F32, FormatTag::N_CHW16C).unwrap(),
        MemoryDesc::new(&[7], DataType::S8, FormatTag::X).unwrap(),
    ] {
        let pd = create_reorder_primitive_desc(Some(&md), Some(&cpu), Some(&md), Some(&cpu), None)
            .unwrap();
        assert_eq!(pd.impl_info(), "direct_copy", "{md}");
        assert_eq!(pd.kind(), PrimitiveKind::Reorder);
    }
}

#[test]
fn test_reorder_candidates_fall_through_in_order() {
    let cpu = Engine::cpu();
    let src = nchw(&[2, 16, 3, 3]);
    let bf16 = src.with_data_type(DataType::Bf16);
    let pd = create_reorder_primitive_desc(Some(&src), Some(&cpu), Some(&bf16), Some(&cpu), None)
        .unwrap();
    assert_eq!(pd.impl_info(), "direct_copy_cvt");

    // a non-default scale skips the byte copy even for identical layouts
    let mut attr = PrimitiveAttr::new();
    attr.set_output_scale(0.5).unwrap();
    let pd = create_reorder_primitive_desc(Some(&src), Some(&cpu), Some(&src), Some(&cpu), Some(&attr))
        .unwrap();
    assert_eq!(pd.impl_info(), "direct_copy_cvt");

    let blocked = MemoryDesc::new(&[2, 16, 3, 3], DataType::F32, FormatTag::N_CHW16C).unwrap();
    let pd = create_reorder_primitive_desc(Some(&src), Some(&cpu), Some(&blocked), Some(&cpu), None)
        .unwrap();
    assert_eq!(pd.impl_info(), "ref:any");
}

#[test]
fn test_iterator_lists_every_accepting_candidate() {
    let md = MemoryDesc::new(&[3, 10], DataType::F32, FormatTag::NC).unwrap();
    let op: OpDesc = SoftmaxDesc::forward(PropKind::ForwardTraining, SoftmaxAlg::LogSoftmax, &md, 1)
        .unwrap()
        .into();
    let names: Vec<String> = PrimitiveDescIterator::new(Some(&op), None, Some(&Engine::cpu()), None)
        .unwrap()
        .map(|pd| pd.unwrap().impl_info().to_string())
        .collect();
    assert_eq!(names, ["ref:dense", "ref:any"]);
    assert_eq!(
        impl_names(EngineKind::Cpu, PrimitiveKind::Softmax),
        ["ref:dense", "ref:any", "ref:any"]
    );
}

#[test]
fn test_gpu_engine_uses_gpu_list() {
    let md = MemoryDesc::new(&[3, 10], DataType::F32, FormatTag::NC).unwrap();
    let op: OpDesc = SoftmaxDesc::forward(PropKind::ForwardInference, SoftmaxAlg::Softmax, &md, 1)
        .unwrap()
        .into();
    let pd = create_primitive_desc(Some(&op), None, Some(&Engine::gpu(0)), None).unwrap();
    assert_eq!(pd.impl_info(), "ocl:ref:any");
    assert_eq!(*pd.engine(), Engine::gpu(0));
}

// =============================================================================
// Reorder engines
// =============================================================================

#[test]
fn test_reorder_engine_selection() {
    let (cpu, gpu) = (Engine::cpu(), Engine::gpu(0));
    assert_eq!(reorder_engine(&cpu, &cpu), cpu);
    assert_eq!(reorder_engine(&cpu, &gpu), gpu);
    assert_eq!(reorder_engine(&gpu, &cpu), gpu);
    assert_eq!(reorder_engine(&gpu, &Engine::gpu(1)), gpu);

    let md = nchw(&[1, 2, 2, 2]);
    let pd = create_reorder_primitive_desc(Some(&md), Some(&cpu), Some(&md), Some(&gpu), None)
        .unwrap();
    assert_eq!(*pd.engine(), gpu);
    assert_eq!(pd.impl_info(), "ocl:ref:any");
    assert_eq!(pd.query(Query::ReorderSrcEngine, 0).unwrap(), QueryValue::Engine(cpu));
    assert_eq!(pd.query(Query::ReorderDstEngine, 0).unwrap(), QueryValue::Engine(gpu));
    assert!(matches!(pd.query(Query::PropKind, 0), Err(Error::Unimplemented(_))));
}

// =============================================================================
// Argument validation
// =============================================================================

#[test]
fn test_missing_reorder_arguments_are_invalid() {
    let cpu = Engine::cpu();
    let md = nchw(&[1, 2, 2, 2]);
    let cases = [
        create_reorder_primitive_desc(Some(&md), Some(&cpu), Some(&md), None, None),
        create_reorder_primitive_desc(None, Some(&cpu), Some(&md), Some(&cpu), None),
        create_reorder_primitive_desc(Some(&md), None, Some(&md), Some(&cpu), None),
        create_reorder_primitive_desc(Some(&md), Some(&cpu), None, Some(&cpu), None),
    ];
    for r in cases {
        assert!(matches!(r, Err(Error::InvalidArguments(_))));
    }
}

#[test]
fn test_inconsistent_reorder_descriptors_are_invalid() {
    let cpu = Engine::cpu();
    let a = nchw(&[1, 2, 2, 2]);
    let b = nchw(&[1, 2, 2, 3]);
    assert!(matches!(
        create_reorder_primitive_desc(Some(&a), Some(&cpu), Some(&b), Some(&cpu), None),
        Err(Error::InvalidArguments(_))
    ));
    let zero = MemoryDesc::default();
    assert!(matches!(
        create_reorder_primitive_desc(Some(&zero), Some(&cpu), Some(&a), Some(&cpu), None),
        Err(Error::InvalidArguments(_))
    ));
}

#[test]
fn test_missing_op_desc_or_engine_is_invalid() {
    let md = nchw(&[1, 2, 2, 2]);
    let op: OpDesc = BatchNormDesc::forward(PropKind::ForwardInference, &md, 0.0, BatchNormFlags::NONE)
        .unwrap()
        .into();
    assert!(matches!(
        create_primitive_desc(None, None, Some(&Engine::cpu()), None),
        Err(Error::InvalidArguments(_))
    ));
    assert!(matches!(
        create_primitive_desc(Some(&op), None, None, None),
        Err(Error::InvalidArguments(_))
    ));
}

#[test]
fn test_unsupported_attributes_are_unimplemented() {
    let md = nchw(&[1, 2, 2, 2]);
    let op: OpDesc = SoftmaxDesc::forward(PropKind::ForwardInference, SoftmaxAlg::Softmax, &md, 1)
        .unwrap()
        .into();
    let mut attr = PrimitiveAttr::new();
    attr.set_output_scale(2.0).unwrap();
    assert!(matches!(
        create_primitive_desc(Some(&op), Some(&attr), Some(&Engine::cpu()), None),
        Err(Error::Unimplemented(_))
    ));
}

// =============================================================================
// Zero-dim memory
// =============================================================================

#[test]
fn test_zero_dim_reorder_is_a_no_op() {
    let cpu = Engine::cpu();
    let src_md = MemoryDesc::new(&[0, 3], DataType::F32, FormatTag::NC).unwrap();
    let dst_md = MemoryDesc::new(&[0, 3], DataType::F32, FormatTag::CN).unwrap();
    let pd = create_reorder_primitive_desc(Some(&src_md), Some(&cpu), Some(&dst_md), Some(&cpu), None)
        .unwrap();
    assert!(pd.has_zero_dim_memory());

    let src = Memory::new(&src_md, &cpu).unwrap();
    let mut dst = Memory::new(&dst_md, &cpu).unwrap();
    let stream = Stream::new(&cpu).unwrap();
    Primitive::new(&pd)
        .unwrap()
        .execute(&stream, ExecArgs::new().input(ArgId::FROM, &src).output(ArgId::TO, &mut dst))
        .unwrap();
    assert!(dst.as_bytes().is_empty());
}

#[test]
fn test_zero_dim_bnorm_reports_zero_dim_memory() {
    let pd = bnorm_fwd(PropKind::ForwardTraining, &nchw(&[0, 4, 2, 2]), BatchNormFlags::NONE);
    assert!(pd.has_zero_dim_memory());
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn test_queries() {
    let data = nchw(&[2, 3, 4, 4]);
    let flags = BatchNormFlags::USE_SCALESHIFT;
    let pd = bnorm_fwd(PropKind::ForwardTraining, &data, flags);
    assert_eq!(
        pd.query(Query::PrimitiveKind, 0).unwrap(),
        QueryValue::PrimitiveKind(PrimitiveKind::BatchNormalization)
    );
    assert_eq!(
        pd.query(Query::PropKind, 0).unwrap(),
        QueryValue::PropKind(PropKind::ForwardTraining)
    );
    assert_eq!(pd.query(Query::NumInputs, 0).unwrap(), QueryValue::Count(2));
    assert_eq!(pd.query(Query::NumOutputs, 0).unwrap(), QueryValue::Count(3));
    assert_eq!(pd.query(Query::SrcMd, 0).unwrap(), QueryValue::Md(&data));
    assert_eq!(
        pd.query(Query::ExecArgMd(ArgId::SCALE_SHIFT), 0).unwrap(),
        QueryValue::Md(pd.weights_md(0))
    );
    assert_eq!(pd.weights_md(0).dims(), &[2, 3]);
    assert!(matches!(
        pd.query(Query::ReorderSrcEngine, 0),
        Err(Error::Unimplemented(_))
    ));
    match pd.query(Query::OpDesc, 0).unwrap() {
        QueryValue::OpDesc(OpDesc::BatchNormalization(d)) => assert_eq!(d.flags, flags),
        other => panic!("unexpected {other:?}"),
    }
    let line = pd.to_string();
    assert!(line.starts_with("cpu:0,batch_normalization,ncsp_bnorm:any,forward_training,"), "{line}");
}
