//! Core value types for the assembly kernel.

pub mod color;
pub mod diagnostics;
pub mod grid;
pub mod manifest;
pub mod mesh;
pub mod unit;
pub mod voxel;

pub use color::{ColorId, ColorParseError, Palette, PaletteColor, Rgb};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, SeamAxis, Severity};
pub use grid::{GridBounds, GridPos, Rotation, COORD_LIMIT};
pub use manifest::{
    BuildStep, InventoryEntry, Manifest, ManifestBuilder, ManifestStats, ManifestUnit, StepKind,
};
pub use mesh::{validate_resolution, GeometryError, Mesh, MeshColors};
pub use unit::{Footprint, PlacedUnit, UnitCategory, UnitType, UnitTypeId};
pub use voxel::{HexVoxel, Voxel, VoxelCloud};
