//! # assembly-kernel
//!
//! Deterministic mesh-to-brick assembly planning.
//!
//! The kernel answers one question:
//!
//! > Given a solid mesh, which catalog units, placed where, build it?
//!
//! ## Core Contract
//!
//! 1. Voxelize the mesh into a colored grid (parity ray casting)
//! 2. Cover each layer exactly with catalog units, largest first
//! 3. Stagger seams between layers and connect every cell to the anchor layer
//! 4. Export a stable, ordered manifest with a content fingerprint
//!
//! ## Architecture
//!
//! ```text
//! Mesh → Voxelizer → VoxelCloud → LayerFitter → InterlockAuditor
//!                                                      ↓
//!          Manifest ← ManifestAssembler ← ConnectivityAuditor
//!                            ↓
//!                  CatalogVerifier (optional)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same mesh + same catalog + same policy → identical manifest fingerprint
//! - Units are ordered by anchor `(z, y, x)`, inventory by `(unit_id, color_id)`
//! - Parallel and sequential runs produce the same result

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod policy;
pub mod catalog;
pub mod voxelizer;
pub mod occupancy;
pub mod fitter;
pub mod interlock;
pub mod connectivity;
pub mod verifier;
pub mod assembler;
pub mod pipeline;
pub mod canonical;
pub mod telemetry;

// Re-exports
pub use types::{
    ColorId, ColorParseError, Palette, PaletteColor, Rgb,
    Diagnostic, DiagnosticKind, Diagnostics, SeamAxis, Severity,
    GridBounds, GridPos, Rotation, COORD_LIMIT,
    BuildStep, InventoryEntry, Manifest, ManifestBuilder, ManifestStats, ManifestUnit, StepKind,
    GeometryError, Mesh, MeshColors,
    Footprint, PlacedUnit, UnitCategory, UnitType, UnitTypeId,
    HexVoxel, Voxel, VoxelCloud,
};
pub use policy::{AssemblyPolicyV1, PolicyError, VerificationSettings};
pub use catalog::{CatalogError, UnitCatalog};
pub use voxelizer::{GridExtents, MeshVoxelizer, VoxelizeOutput, DEFAULT_MAX_GRID_CELLS};
pub use occupancy::{OccupancyIndex, OverlapError};
pub use fitter::{greedy_tile, GreedyLayerFitter, LayerFit, Placement, Tiling};
pub use interlock::{InterlockAuditor, InterlockOutcome, SeamEdge, SeamRun};
pub use connectivity::{unreachable_cells, ConnectivityAuditor, ConnectivityOutcome};
pub use verifier::{
    Availability, CatalogVerifier, InMemoryCatalogVerifier, InMemoryVerifierError,
    NoVerifier, VerificationMemo,
};
pub use assembler::ManifestAssembler;
pub use pipeline::{AssemblyOutput, AssemblyPipeline, CancelFlag, PipelineError};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use telemetry::{init_tracing, LogFormat, TelemetryError};

/// Schema version of the manifest.
/// Increment on breaking changes to any manifest type.
pub const MANIFEST_SCHEMA_VERSION: &str = "1.0.0";

/// Default policy version identifier.
pub const DEFAULT_POLICY_VERSION: &str = "assembly_policy_v1";
