//! Integration tests for catalog verification through the full pipeline.

use std::sync::Arc;
use std::time::Duration;

use assembly_kernel::{
    AssemblyPipeline, AssemblyPolicyV1, ColorId, GridPos, InMemoryCatalogVerifier, Mesh,
    PipelineError, UnitCatalog, UnitCategory, UnitType, UnitTypeId, VerificationSettings,
    VoxelCloud,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn slab_catalog() -> Arc<UnitCatalog> {
    Arc::new(
        UnitCatalog::new(vec![
            UnitType::new("3001", "Brick 2x4", 4, 2, UnitCategory::Standard),
            UnitType::new("3003", "Brick 2x2", 2, 2, UnitCategory::Standard),
            UnitType::new("3004", "Brick 1x2", 2, 1, UnitCategory::Standard),
            UnitType::new("3005", "Brick 1x1", 1, 1, UnitCategory::Standard),
        ])
        .unwrap(),
    )
}

fn policy(timeout_ms: u64) -> AssemblyPolicyV1 {
    AssemblyPolicyV1 {
        parallel: false,
        verification: VerificationSettings {
            max_concurrency: 4,
            timeout_ms,
            memo_capacity: 64,
        },
        ..AssemblyPolicyV1::default()
    }
}

fn red_slab() -> VoxelCloud {
    let mut cloud = VoxelCloud::new();
    for y in 0..2 {
        for x in 0..8 {
            cloud.insert(GridPos::new(x, y, 0), ColorId(4));
        }
    }
    cloud
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_all_available_marks_every_unit_verified() {
    let verifier = Arc::new(InMemoryCatalogVerifier::all_available());
    let pipeline =
        AssemblyPipeline::with_verifier(slab_catalog(), policy(1000), verifier.clone()).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert_eq!(output.manifest.total_units, 2);
    assert!(output.manifest.units.iter().all(|u| u.verified));
    assert_eq!(output.manifest.stats.unverified_units, 0);
    // Both units share one (unit, color) pair.
    assert_eq!(verifier.call_count(), 1);
}

#[tokio::test]
async fn test_offline_pipeline_never_verifies() {
    let pipeline = AssemblyPipeline::offline(slab_catalog(), policy(1000)).unwrap();
    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert!(output.manifest.units.iter().all(|u| !u.verified));
    assert_eq!(output.manifest.stats.unverified_units, 2);
    assert!(!output.diagnostics.has_code("UNIT_UNVERIFIED"));
}

#[tokio::test]
async fn test_unavailable_unit_is_tiled_with_smaller_units() {
    let verifier = Arc::new(
        InMemoryCatalogVerifier::all_available().with_entry("3001", ColorId(4), false),
    );
    let pipeline = AssemblyPipeline::with_verifier(slab_catalog(), policy(1000), verifier).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    let manifest = &output.manifest;

    assert_eq!(manifest.stats.substitutions, 2);
    assert_eq!(manifest.quantity_of(&UnitTypeId::new("3003"), ColorId(4)), 4);
    assert_eq!(manifest.quantity_of(&UnitTypeId::new("3001"), ColorId(4)), 0);
    assert!(manifest.units.iter().all(|u| u.verified));
    assert_eq!(output.diagnostics.with_code("SUBSTITUTION").count(), 2);
}

#[tokio::test]
async fn test_substitution_skips_unavailable_sizes() {
    // 2x4 and 2x2 missing in red: the 2x4 is tiled with 1x2 bricks.
    let verifier = Arc::new(
        InMemoryCatalogVerifier::all_available()
            .with_entry("3001", ColorId(4), false)
            .with_entry("3003", ColorId(4), false),
    );
    let pipeline = AssemblyPipeline::with_verifier(slab_catalog(), policy(1000), verifier).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert_eq!(
        output.manifest.quantity_of(&UnitTypeId::new("3004"), ColorId(4)),
        8
    );
    assert_eq!(output.manifest.stats.unverified_units, 0);
}

#[tokio::test]
async fn test_no_substitute_keeps_unit_unverified() {
    let verifier = Arc::new(InMemoryCatalogVerifier::none_available());
    let pipeline = AssemblyPipeline::with_verifier(slab_catalog(), policy(1000), verifier).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert_eq!(output.manifest.total_units, 2);
    assert!(output.manifest.units.iter().all(|u| !u.verified));
    assert_eq!(output.diagnostics.with_code("UNIT_UNVERIFIED").count(), 2);
    assert_eq!(output.manifest.stats.substitutions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_catalog_times_out_without_failing() {
    let verifier = Arc::new(
        InMemoryCatalogVerifier::all_available().with_delay(Duration::from_secs(30)),
    );
    let pipeline = AssemblyPipeline::with_verifier(slab_catalog(), policy(250), verifier).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert_eq!(output.manifest.total_units, 2);
    assert!(output.manifest.units.iter().all(|u| !u.verified));
    assert!(output.diagnostics.has_code("VERIFICATION_TIMEOUT"));
}

#[tokio::test]
async fn test_unreachable_catalog_degrades_to_unverified() {
    let verifier = Arc::new(InMemoryCatalogVerifier::all_available().with_unreachable("3001"));
    let pipeline = AssemblyPipeline::with_verifier(slab_catalog(), policy(1000), verifier).unwrap();

    let output = pipeline.run_voxels(red_slab()).await.unwrap();
    assert!(output.manifest.units.iter().all(|u| !u.verified));
    assert!(output.diagnostics.has_code("VERIFICATION_FAILED"));
}

#[tokio::test]
async fn test_verified_runs_are_deterministic() {
    let verifier = Arc::new(
        InMemoryCatalogVerifier::all_available().with_entry("3001", ColorId(15), false),
    );
    let pipeline = AssemblyPipeline::with_verifier(UnitCatalog::shared(), policy(1000), verifier).unwrap();
    let mesh = Mesh::axis_aligned_box([0.0, 0.0, 0.0], [6.0, 4.0, 3.0]);

    let first = pipeline.run_mesh(&mesh, 1.0).await.unwrap().manifest;
    for _ in 0..10 {
        let again = pipeline.run_mesh(&mesh, 1.0).await.unwrap().manifest;
        assert_eq!(first.to_canonical_json(), again.to_canonical_json());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation and errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancelled_pipeline_discards_run() {
    let pipeline = AssemblyPipeline::offline(slab_catalog(), policy(1000)).unwrap();
    let cancel = pipeline.cancel_flag();
    cancel.cancel();
    assert!(matches!(
        pipeline.run_voxels(red_slab()).await,
        Err(PipelineError::Cancelled)
    ));

    cancel.reset();
    assert!(pipeline.run_voxels(red_slab()).await.is_ok());
}

#[tokio::test]
async fn test_malformed_mesh_aborts() {
    let pipeline = AssemblyPipeline::offline(slab_catalog(), policy(1000)).unwrap();
    let mesh = Mesh::new(
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [f64::NAN, 1.0, 0.0]],
        vec![[0, 1, 2]],
    );
    assert!(matches!(
        pipeline.run_mesh(&mesh, 1.0).await,
        Err(PipelineError::Geometry(_))
    ));

    let box_mesh = Mesh::axis_aligned_box([0.0; 3], [1.0; 3]);
    assert!(matches!(
        pipeline.run_mesh(&box_mesh, 0.0).await,
        Err(PipelineError::Geometry(_))
    ));
}
