//! Scatter engine integration tests
//!
//! Includes the scatter-then-gather round trip over relay plans.

mod common;

use common::*;
use proptest::prelude::*;
use sparse_comm::{
    CommError, CommState, DeviceBuffer, DeviceContext, GatherEngine, PlanError, ScatterEngine,
    TransferPlan,
};

/// Scatter `data` from the plan's main device into fresh destinations
/// padded with `-1.0`
fn build_scatter(
    ctx: &DeviceContext,
    data: &[f32],
    counts: &[usize],
    main_gpu: usize,
    padding: usize,
) -> anyhow::Result<(DeviceBuffer, Vec<DeviceBuffer>)> {
    let src = upload(ctx, main_gpu, data)?;
    let dsts = counts
        .iter()
        .enumerate()
        .map(|(device, &count)| filled(ctx, device, count + padding, -1.0))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok((src, dsts))
}

#[test]
fn test_two_device_scatter() -> anyhow::Result<()> {
    init_test_logging();
    let ctx = DeviceContext::new(2)?;
    let (src, dsts) = build_scatter(&ctx, &[1.0, 2.0, 3.0, 4.0], &[2, 2], 0, 0)?;

    let mut engine = ScatterEngine::new(
        ctx,
        TransferPlan::direct_scatter(2, 0),
        2,
        src,
        4,
        vec![2, 2],
        dsts.clone(),
        vec![2, 2],
    )?;
    engine.exec_async()?;
    engine.sync()?;

    assert_eq!(dsts[0].to_host_vec()?, vec![1.0, 2.0]);
    assert_eq!(dsts[1].to_host_vec()?, vec![3.0, 4.0]);
    Ok(())
}

#[test]
fn test_relayed_scatter() -> anyhow::Result<()> {
    let counts = [3, 2, 4, 1];
    let data = pattern(0, counts.iter().sum());
    let ctx = chain_context(4)?;
    let (src, dsts) = build_scatter(&ctx, &data, &counts, 0, 2)?;

    let mut engine = ScatterEngine::new(
        ctx,
        chain_scatter_plan(4),
        4,
        src,
        data.len(),
        counts.to_vec(),
        dsts.clone(),
        counts.iter().map(|c| c + 2).collect(),
    )?;
    // Device 1 relays the slices of 2 and 3, device 2 the slice of 3
    assert_eq!(engine.staging_lengths(), &[0, 5, 1, 0]);

    engine.exec_async()?;
    engine.sync()?;

    for (device, dst) in dsts.iter().enumerate() {
        let host = dst.to_host_vec()?;
        let start = prefix(&counts, device);
        assert_eq!(&host[..counts[device]], &data[start..start + counts[device]]);
        assert!(host[counts[device]..].iter().all(|&v| v == -1.0));
    }
    Ok(())
}

#[test]
fn test_scatter_from_non_zero_main() -> anyhow::Result<()> {
    let counts = [1, 2, 3];
    let data = pattern(7, 6);
    let ctx = DeviceContext::new(3)?;
    let (src, dsts) = build_scatter(&ctx, &data, &counts, 1, 0)?;

    let mut engine = ScatterEngine::new(
        ctx,
        TransferPlan::direct_scatter(3, 1),
        3,
        src,
        6,
        counts.to_vec(),
        dsts.clone(),
        counts.to_vec(),
    )?;
    engine.exec_async()?;
    engine.sync()?;

    assert_eq!(dsts[0].to_host_vec()?, &data[0..1]);
    assert_eq!(dsts[1].to_host_vec()?, &data[1..3]);
    assert_eq!(dsts[2].to_host_vec()?, &data[3..6]);
    Ok(())
}

#[test]
fn test_repeated_launches() -> anyhow::Result<()> {
    let ctx = chain_context(3)?;
    let (src, dsts) = build_scatter(&ctx, &pattern(0, 6), &[2, 2, 2], 0, 0)?;
    let mut engine = ScatterEngine::new(
        ctx,
        chain_scatter_plan(3),
        3,
        src.clone(),
        6,
        vec![2, 2, 2],
        dsts.clone(),
        vec![2, 2, 2],
    )?;

    for round in 0..3 {
        src.copy_from_host(&pattern(round, 6))?;
        engine.exec_async()?;
        engine.sync()?;
        assert_eq!(dsts[2].to_host_vec()?, &pattern(round, 6)[4..6]);
    }
    Ok(())
}

#[test]
fn test_smaller_counts_repack_source() -> anyhow::Result<()> {
    let data = pattern(0, 9);
    let ctx = chain_context(3)?;
    let (src, dsts) = build_scatter(&ctx, &data, &[3, 3, 3], 0, 0)?;
    let mut engine = ScatterEngine::new(
        ctx,
        chain_scatter_plan(3),
        3,
        src,
        9,
        vec![3, 3, 3],
        dsts.clone(),
        vec![3, 3, 3],
    )?;

    engine.exec_async_with(&[1, 0, 2])?;
    engine.sync()?;

    assert_eq!(&dsts[0].to_host_vec()?[..1], &data[0..1]);
    assert_eq!(dsts[1].to_host_vec()?, vec![-1.0; 3]);
    assert_eq!(&dsts[2].to_host_vec()?[..2], &data[1..3]);
    Ok(())
}

#[test]
fn test_larger_counts_rejected() -> anyhow::Result<()> {
    let ctx = DeviceContext::new(2)?;
    let (src, dsts) = build_scatter(&ctx, &pattern(0, 4), &[2, 2], 0, 0)?;
    let mut engine = ScatterEngine::new(
        ctx,
        TransferPlan::direct_scatter(2, 0),
        2,
        src,
        4,
        vec![2, 2],
        dsts,
        vec![2, 2],
    )?;
    let err = engine.exec_async_with(&[2, 3]).unwrap_err();
    assert!(matches!(err, CommError::PreconditionViolation(_)));
    Ok(())
}

#[test]
fn test_sync_twice_and_busy_exec() -> anyhow::Result<()> {
    let ctx = DeviceContext::new(2)?;
    let (src, dsts) = build_scatter(&ctx, &pattern(0, 4), &[2, 2], 0, 0)?;
    let mut engine = ScatterEngine::new(
        ctx,
        TransferPlan::direct_scatter(2, 0),
        2,
        src,
        4,
        vec![2, 2],
        dsts,
        vec![2, 2],
    )?;

    engine.exec_async()?;
    assert!(matches!(
        engine.exec_async(),
        Err(CommError::PreconditionViolation(_))
    ));
    engine.sync()?;
    engine.sync()?;
    assert_eq!(engine.state(), CommState::Idle);
    Ok(())
}

#[test]
fn test_scatter_plan_wrong_main_endpoint() -> anyhow::Result<()> {
    let ctx = DeviceContext::new(2)?;
    let (src, dsts) = build_scatter(&ctx, &pattern(0, 2), &[1, 1], 0, 0)?;
    // Sequences start at device 1 but the plan claims device 0 is main
    let plan = TransferPlan::new(
        sparse_comm::PlanKind::Scatter,
        2,
        0,
        1,
        1,
        vec![
            sparse_comm::TransferSequence::new(vec![1, 0], 1),
            sparse_comm::TransferSequence::new(vec![1, 1], 1),
        ],
    );
    let err = ScatterEngine::new(ctx, plan, 2, src, 2, vec![1, 1], dsts, vec![1, 1]).unwrap_err();
    assert!(matches!(
        err,
        CommError::PlanInvalid(PlanError::WrongEndpoint { .. })
    ));
    Ok(())
}

#[test]
fn test_destination_on_wrong_device_rejected() -> anyhow::Result<()> {
    let ctx = DeviceContext::new(2)?;
    let src = upload(&ctx, 0, &pattern(0, 2))?;
    let dsts = vec![ctx.allocate(1, 1)?, ctx.allocate(1, 1)?];
    let err = ScatterEngine::new(
        ctx,
        TransferPlan::direct_scatter(2, 0),
        2,
        src,
        2,
        vec![1, 1],
        dsts,
        vec![1, 1],
    )
    .unwrap_err();
    assert!(matches!(err, CommError::PreconditionViolation(_)));
    Ok(())
}

/// Scatter `data` over a chain, gather it back, return what arrived
fn round_trip(data: &[f32], counts: &[usize]) -> anyhow::Result<Vec<f32>> {
    let num_gpu = counts.len();

    let scatter_ctx = chain_context(num_gpu)?;
    let (src, shards) = build_scatter(&scatter_ctx, data, counts, 0, 0)?;
    let mut scatter = ScatterEngine::new(
        scatter_ctx,
        chain_scatter_plan(num_gpu),
        num_gpu,
        src,
        data.len(),
        counts.to_vec(),
        shards.clone(),
        counts.to_vec(),
    )?;
    scatter.exec_async()?;
    scatter.sync()?;

    let gather_ctx = chain_context(num_gpu)?;
    let srcs = shards
        .iter()
        .enumerate()
        .map(|(device, shard)| upload(&gather_ctx, device, &shard.to_host_vec()?))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let dst = gather_ctx.allocate(0, data.len())?;
    let mut gather = GatherEngine::new(
        gather_ctx,
        chain_gather_plan(num_gpu),
        num_gpu,
        srcs,
        counts.to_vec(),
        counts.to_vec(),
        dst.clone(),
        data.len(),
    )?;
    gather.exec_async()?;
    gather.sync()?;

    Ok(dst.to_host_vec()?)
}

#[test]
fn test_scatter_gather_round_trip() -> anyhow::Result<()> {
    let counts = [2, 0, 5, 3];
    let data: Vec<f32> = (0..10).map(|i| i as f32 * 0.5).collect();
    assert_eq!(round_trip(&data, &counts)?, data);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_round_trip_properties(
        counts in prop::collection::vec(0usize..12, 1..5),
        seed in -100.0f32..100.0f32
    ) {
        let total: usize = counts.iter().sum();
        let data: Vec<f32> = (0..total).map(|i| seed + i as f32).collect();
        prop_assert_eq!(round_trip(&data, &counts).unwrap(), data);
    }
}
