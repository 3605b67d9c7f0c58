//! End-to-end assembly: mesh or voxels in, manifest out.
//!
//! ## Stages
//!
//! 1. Voxelize the mesh (skipped for voxel input)
//! 2. Fit every layer independently
//! 3. Interlock audit, after all layers are fitted
//! 4. Connectivity audit, after the interlock audit
//! 5. Verify availability and assemble the manifest
//!
//! Only geometry, catalog and color-parse errors abort a run. Voxel input
//! with a coordinate beyond `COORD_LIMIT` is a geometry error. Everything
//! else is reported through the returned [`Diagnostics`]. No state is kept
//! between runs apart from the shared [`CancelFlag`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::assembler::ManifestAssembler;
use crate::catalog::{CatalogError, UnitCatalog};
use crate::connectivity::ConnectivityAuditor;
use crate::fitter::GreedyLayerFitter;
use crate::interlock::InterlockAuditor;
use crate::occupancy::OverlapError;
use crate::policy::{AssemblyPolicyV1, PolicyError};
use crate::types::{
    ColorParseError, DiagnosticKind, Diagnostics, GeometryError, HexVoxel, Manifest,
    ManifestStats, Mesh, Palette, PlacedUnit, UnitType, VoxelCloud,
};
use crate::verifier::{CatalogVerifier, NoVerifier};
use crate::voxelizer::{GridExtents, MeshVoxelizer};

const STAGE: &str = "pipeline";

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed mesh or resolution.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Catalog cannot support fitting.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Bad hex color in voxel input.
    #[error(transparent)]
    ColorParse(#[from] ColorParseError),

    /// Units handed to an auditor overlap.
    #[error(transparent)]
    Overlap(#[from] OverlapError),

    /// Policy out of range.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The run was cancelled; partial results were discarded.
    #[error("Assembly cancelled")]
    Cancelled,
}

/// Shared cancellation flag, checked between layers and stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    /// The manifest.
    pub manifest: Manifest,
    /// Non-fatal notes from every stage.
    pub diagnostics: Diagnostics,
    /// Grid placement, for mesh input.
    pub extents: Option<GridExtents>,
}

/// Configured assembly pipeline.
pub struct AssemblyPipeline<V: CatalogVerifier = NoVerifier> {
    policy: AssemblyPolicyV1,
    voxelizer: MeshVoxelizer,
    fitter: GreedyLayerFitter,
    support: UnitType,
    assembler: ManifestAssembler<V>,
    cancel: CancelFlag,
}

impl AssemblyPipeline<NoVerifier> {
    /// Pipeline without catalog verification.
    pub fn offline(catalog: Arc<UnitCatalog>, policy: AssemblyPolicyV1) -> Result<Self, PipelineError> {
        Self::build(catalog, policy, None)
    }
}

impl<V> AssemblyPipeline<V>
where
    V: CatalogVerifier + 'static,
{
    /// Pipeline verifying availability through `verifier`.
    pub fn with_verifier(
        catalog: Arc<UnitCatalog>,
        policy: AssemblyPolicyV1,
        verifier: Arc<V>,
    ) -> Result<Self, PipelineError> {
        Self::build(catalog, policy, Some(verifier))
    }

    fn build(
        catalog: Arc<UnitCatalog>,
        policy: AssemblyPolicyV1,
        verifier: Option<Arc<V>>,
    ) -> Result<Self, PipelineError> {
        policy.validate()?;
        let fitter = GreedyLayerFitter::new(&catalog, &policy.fit_categories, policy.match_color)?;
        let support = catalog
            .single_cell(&policy.fit_categories)
            .cloned()
            .ok_or_else(|| CatalogError::MissingSingleCell(policy.fit_categories.clone()))?;
        let voxelizer = MeshVoxelizer::new(Palette::standard(), policy.default_color)
            .with_parallel(policy.parallel)
            .with_max_cells(policy.max_grid_cells);
        let assembler = ManifestAssembler::from_parts(
            catalog,
            verifier,
            policy.verification.clone(),
            policy.params_hash(),
        );

        tracing::debug!(
            policy = %policy.policy_id(),
            params_hash = %policy.params_hash(),
            candidates = fitter.candidates().len(),
            "Assembly pipeline configured"
        );

        Ok(Self {
            policy,
            voxelizer,
            fitter,
            support,
            assembler,
            cancel: CancelFlag::new(),
        })
    }

    /// Use a different palette for mesh colors.
    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.voxelizer = MeshVoxelizer::new(palette, self.policy.default_color)
            .with_parallel(self.policy.parallel)
            .with_max_cells(self.policy.max_grid_cells);
        self
    }

    /// Share an existing cancel flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for cancelling runs of this pipeline.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The active policy.
    pub fn policy(&self) -> &AssemblyPolicyV1 {
        &self.policy
    }

    /// Voxelize a mesh and assemble it.
    pub async fn run_mesh(&self, mesh: &Mesh, resolution: f64) -> Result<AssemblyOutput, PipelineError> {
        self.cancel.check()?;
        let voxelized = self.voxelizer.voxelize(mesh, resolution)?;
        let reason = if mesh.is_empty() {
            "mesh has no faces".to_string()
        } else {
            format!("no cell centers inside the mesh at resolution {resolution}")
        };
        self.run_cloud(voxelized.cloud, voxelized.extents, reason).await
    }

    /// Assemble a prepared voxel cloud.
    pub async fn run_voxels(&self, cloud: VoxelCloud) -> Result<AssemblyOutput, PipelineError> {
        self.run_cloud(cloud, None, "voxel input is empty".to_string())
            .await
    }

    /// Assemble `(x, y, z, hex_color)` records.
    pub async fn run_hex_voxels(&self, voxels: &[HexVoxel]) -> Result<AssemblyOutput, PipelineError> {
        let cloud = VoxelCloud::from_hex_voxels(
            voxels,
            self.voxelizer.palette(),
            self.policy.default_color,
        )?;
        self.run_voxels(cloud).await
    }

    async fn run_cloud(
        &self,
        cloud: VoxelCloud,
        extents: Option<GridExtents>,
        empty_reason: String,
    ) -> Result<AssemblyOutput, PipelineError> {
        let mut diagnostics = Diagnostics::new();

        if cloud.is_empty() {
            diagnostics.record(DiagnosticKind::EmptyResult { reason: empty_reason }, STAGE);
            let manifest = self
                .assembler
                .assemble(Vec::new(), ManifestStats::default(), &mut diagnostics)
                .await;
            return Ok(AssemblyOutput {
                manifest,
                diagnostics,
                extents,
            });
        }

        cloud.check_coordinates()?;

        tracing::info!(
            voxels = cloud.len(),
            layers = cloud.layer_indices().len(),
            "Assembly started"
        );

        let fits = self
            .fitter
            .fit_cloud(&cloud, self.policy.parallel, &self.cancel, &mut diagnostics)?;
        let single_cell_fallbacks = fits.iter().map(|l| l.single_cell_fallbacks).sum();
        let units: Vec<PlacedUnit> = fits.into_iter().flat_map(|l| l.units).collect();

        self.cancel.check()?;
        let interlock = InterlockAuditor::from_fitter(
            &self.fitter,
            self.policy.seam_tolerance,
            self.policy.max_interlock_merges,
        )
        .audit(units, &self.cancel, &mut diagnostics)?;

        self.cancel.check()?;
        let connectivity = ConnectivityAuditor::new(self.policy.anchor_layer, self.support.clone())
            .audit(interlock.units, &self.cancel, &mut diagnostics)?;

        self.cancel.check()?;
        let stats = ManifestStats {
            interlock_units_added: interlock.units_added,
            connectivity_supports_added: connectivity.supports_added,
            single_cell_fallbacks,
            ..ManifestStats::default()
        };
        let manifest = self
            .assembler
            .assemble(connectivity.units, stats, &mut diagnostics)
            .await;

        Ok(AssemblyOutput {
            manifest,
            diagnostics,
            extents,
        })
    }
}
