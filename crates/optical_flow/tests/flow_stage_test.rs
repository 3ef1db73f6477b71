use common_io::{Stage, VideoBuffer};
use gpu_context::FaultPlan;
use optical_flow::{
    FlowError, FlowFieldMeta, FramePairState, MotionVector, OpticalFlowConfig, OpticalFlowStage,
    PairState, VectorGridSize,
};
use testsupport::{host_context, make_gpu_frame, make_host_frame, ScriptedFlowProvider};

fn started_stage(
    ctx: &std::sync::Arc<gpu_context::GpuContext>,
) -> OpticalFlowStage<ScriptedFlowProvider> {
    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig::default(),
        ctx.clone(),
        ScriptedFlowProvider::new(VectorGridSize::One),
    );
    stage.start().unwrap();
    stage
}

fn flow_of(buffer: &VideoBuffer) -> Option<Vec<MotionVector>> {
    buffer
        .attached::<FlowFieldMeta>()
        .map(|m| m.flow().download_vectors().unwrap())
}

#[test]
fn consecutive_frames_are_paired_in_order() {
    let (_backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);

    let out1 = stage.process(make_gpu_frame(&ctx, 8, 4, 1));
    assert!(out1.attached::<FlowFieldMeta>().is_none());
    assert_eq!(stage.pair_state(), PairState::Armed);

    let out2 = stage.process(make_gpu_frame(&ctx, 8, 4, 2));
    let out3 = stage.process(make_gpu_frame(&ctx, 8, 4, 3));

    assert_eq!(stage.provider().pairs(), vec![(1, 2), (2, 3)]);
    assert!(flow_of(&out2)
        .unwrap()
        .iter()
        .all(|v| *v == MotionVector::new(1.0, 2.0)));
    assert!(flow_of(&out3)
        .unwrap()
        .iter()
        .all(|v| *v == MotionVector::new(2.0, 3.0)));
}

#[test]
fn retained_frame_is_a_private_copy() {
    let (_backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);

    let out1 = stage.process(make_gpu_frame(&ctx, 8, 4, 1));
    assert!(out1.is_writable());
    drop(out1);
    let out2 = stage.process(make_gpu_frame(&ctx, 8, 4, 2));
    assert!(out2.is_writable());

    let call = stage.provider().calls[0];
    assert_eq!((call.previous_fill, call.current_fill), (1, 2));
}

#[test]
fn provider_is_initialized_lazily_and_reset_on_stop() {
    let (_backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);
    assert_eq!(stage.provider().initialized, 0);

    stage.process(make_gpu_frame(&ctx, 4, 4, 0));
    assert_eq!(stage.provider().initialized, 0);
    stage.process(make_gpu_frame(&ctx, 4, 4, 1));
    stage.process(make_gpu_frame(&ctx, 4, 4, 2));
    assert_eq!(stage.provider().initialized, 1);

    stage.stop().unwrap();
    assert_eq!(stage.pair_state(), PairState::Idle);
    let resets = stage.provider().resets;

    stage.start().unwrap();
    assert_eq!(stage.provider().resets, resets + 1);
    let out = stage.process(make_gpu_frame(&ctx, 4, 4, 10));
    assert!(out.attached::<FlowFieldMeta>().is_none());
    stage.process(make_gpu_frame(&ctx, 4, 4, 11));
    assert_eq!(stage.provider().initialized, 2);
    assert_eq!(stage.provider().pairs(), vec![(0, 1), (1, 2), (10, 11)]);
}

#[test]
fn host_memory_is_unsupported_and_stream_continues() {
    let (_backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);

    let mut host_frame = make_host_frame(4, 4, 0);
    let err = stage.process_frame(&mut host_frame).unwrap_err();
    assert!(matches!(err, FlowError::UnsupportedInput(_)));
    assert_eq!(stage.pair_state(), PairState::Idle);

    let out = stage.process(make_host_frame(4, 4, 1));
    assert!(out.metas().is_empty());
}

#[test]
fn memory_from_another_context_is_unsupported() {
    let (_backend, ctx) = host_context();
    let (_other_backend, other) = host_context();
    let mut stage = started_stage(&ctx);

    let mut foreign = make_gpu_frame(&other, 4, 4, 0);
    assert!(matches!(
        stage.process_frame(&mut foreign),
        Err(FlowError::UnsupportedInput(_))
    ));
}

#[test]
fn provider_failure_costs_one_frame() {
    let (_backend, ctx) = host_context();
    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig::default(),
        ctx.clone(),
        ScriptedFlowProvider::new(VectorGridSize::One).failing_on(2),
    );
    stage.start().unwrap();

    stage.process(make_gpu_frame(&ctx, 4, 4, 1));
    let out2 = stage.process(make_gpu_frame(&ctx, 4, 4, 2));
    assert!(out2.attached::<FlowFieldMeta>().is_none());
    let out3 = stage.process(make_gpu_frame(&ctx, 4, 4, 3));
    assert!(out3.attached::<FlowFieldMeta>().is_some());
    assert_eq!(stage.provider().pairs(), vec![(1, 2), (2, 3)]);
}

#[test]
fn context_failure_does_not_pair_across_the_dropped_frame() {
    let (backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);
    stage.process(make_gpu_frame(&ctx, 4, 4, 1));

    let mut frame = make_gpu_frame(&ctx, 4, 4, 2);
    backend.set_faults(FaultPlan {
        fail_context_push: true,
        ..FaultPlan::default()
    });
    assert!(matches!(
        stage.process_frame(&mut frame),
        Err(FlowError::Context(_))
    ));
    backend.clear_faults();
    assert_eq!(backend.context_depth(), 0);
    assert_eq!(stage.pair_state(), PairState::Idle);

    let out3 = stage.process(make_gpu_frame(&ctx, 4, 4, 3));
    assert!(out3.attached::<FlowFieldMeta>().is_none());
    let out4 = stage.process(make_gpu_frame(&ctx, 4, 4, 4));
    assert!(out4.attached::<FlowFieldMeta>().is_some());
    assert_eq!(stage.provider().pairs(), vec![(3, 4)]);
}

#[test]
fn initialisation_failure_keeps_pairing_consecutive() {
    let (_backend, ctx) = host_context();
    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig::default(),
        ctx.clone(),
        ScriptedFlowProvider::new(VectorGridSize::One).failing_initialize(1),
    );
    stage.start().unwrap();

    stage.process(make_gpu_frame(&ctx, 4, 4, 1));
    let mut frame2 = make_gpu_frame(&ctx, 4, 4, 2);
    assert!(matches!(
        stage.process_frame(&mut frame2),
        Err(FlowError::Provider { .. })
    ));
    assert!(frame2.attached::<FlowFieldMeta>().is_none());
    assert_eq!(stage.pair_state(), PairState::Armed);

    let out3 = stage.process(make_gpu_frame(&ctx, 4, 4, 3));
    assert_eq!(stage.provider().initialized, 1);
    assert_eq!(stage.provider().pairs(), vec![(2, 3)]);
    assert!(flow_of(&out3)
        .unwrap()
        .iter()
        .all(|v| *v == MotionVector::new(2.0, 3.0)));
}

#[test]
fn processing_before_start_is_rejected() {
    let (_backend, ctx) = host_context();
    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig::default(),
        ctx.clone(),
        ScriptedFlowProvider::new(VectorGridSize::One),
    );
    let mut frame = make_gpu_frame(&ctx, 4, 4, 0);
    assert!(matches!(
        stage.process_frame(&mut frame),
        Err(FlowError::Configuration(_))
    ));
}

#[test]
fn start_validates_configuration() {
    let (_backend, ctx) = host_context();
    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig {
            output_vector_grid_size: VectorGridSize::Eight,
            ..OpticalFlowConfig::default()
        },
        ctx.clone(),
        ScriptedFlowProvider::new(VectorGridSize::One),
    );
    assert!(matches!(stage.start(), Err(FlowError::Configuration(_))));

    let mut stage = OpticalFlowStage::new(
        OpticalFlowConfig {
            device_id: 3,
            ..OpticalFlowConfig::default()
        },
        ctx,
        ScriptedFlowProvider::new(VectorGridSize::One),
    );
    assert!(matches!(stage.start(), Err(FlowError::Configuration(_))));
}

#[test]
fn config_from_toml() {
    let config: OpticalFlowConfig = toml::from_str("output_vector_grid_size = 4").unwrap();
    assert_eq!(config.device_id, -1);
    assert_eq!(config.output_vector_grid_size, VectorGridSize::Four);
    assert!(toml::from_str::<OpticalFlowConfig>("output_vector_grid_size = 3").is_err());
}

#[test]
fn flow_metadata_is_deep_copied_on_branch() {
    let (backend, ctx) = host_context();
    let mut stage = started_stage(&ctx);
    stage.process(make_gpu_frame(&ctx, 4, 4, 1));
    let out = stage.process(make_gpu_frame(&ctx, 4, 4, 2));

    let live = backend.live_allocations();
    let branch = out.duplicate();
    assert_eq!(backend.live_allocations(), live + 1);

    let original = out.attached::<FlowFieldMeta>().unwrap();
    let copied = branch.attached::<FlowFieldMeta>().unwrap();
    assert!(!std::sync::Arc::ptr_eq(original, copied));
    assert_eq!(
        original.flow().download_vectors().unwrap(),
        copied.flow().download_vectors().unwrap()
    );

    drop(branch);
    assert_eq!(backend.live_allocations(), live);
}

#[test]
fn pair_state_machine_on_its_own() {
    let (_backend, ctx) = host_context();
    let mut pairs = FramePairState::new();
    assert_eq!(pairs.state(), PairState::Idle);

    let first = make_gpu_frame(&ctx, 2, 2, 5);
    let result = pairs
        .advance(&first, |p, c| Ok((p.meta.frame_idx, c.meta.frame_idx)))
        .unwrap();
    assert_eq!(result, None);
    assert_ne!(pairs.previous().unwrap().id(), first.id());

    let second = make_gpu_frame(&ctx, 2, 2, 6);
    let result = pairs
        .advance(&second, |p, c| Ok((p.meta.frame_idx, c.meta.frame_idx)))
        .unwrap();
    assert_eq!(result, Some((5, 6)));
    assert_eq!(pairs.previous().unwrap().meta.frame_idx, 6);

    pairs.reset();
    assert!(!pairs.is_armed());
}
