//! Greedy Layer Fitter.
//!
//! Covers every occupied cell of one layer exactly once with catalog units,
//! largest footprint first.
//!
//! ## Algorithm
//!
//! 1. Candidates are sorted by area (descending), width, then id.
//! 2. Uncovered cells are scanned row-major (`y`, then `x`). The first
//!    uncovered cell is the anchor.
//! 3. Each candidate is tried in every rotation (0° first) with its lowest
//!    corner on the anchor. It fits if every covered cell is occupied, not
//!    yet covered, and (with color matching) the anchor's color.
//! 4. The first fit is placed. A single-cell candidate always fits, so the
//!    scan terminates with full coverage.
//!
//! Because the anchor is the first uncovered cell in row-major order, every
//! cell before it is already covered, so anchoring rectangles at their lowest
//! corner loses no placements.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{CatalogError, UnitCatalog};
use crate::pipeline::{CancelFlag, PipelineError};
use crate::types::{
    ColorId, DiagnosticKind, Diagnostics, GridPos, PlacedUnit, Rotation, UnitCategory, UnitType,
    VoxelCloud,
};

/// Diagnostic stage name.
const STAGE: &str = "fitter";

/// Decision for one anchor cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A multi-cell candidate at a rotation.
    Fit {
        /// Index into the candidate list.
        candidate: usize,
        /// Rotation applied.
        rotation: Rotation,
    },
    /// The single-cell candidate.
    Fallback {
        /// Index into the candidate list.
        candidate: usize,
    },
}

impl Placement {
    /// Candidate index.
    pub fn candidate(&self) -> usize {
        match *self {
            Self::Fit { candidate, .. } | Self::Fallback { candidate } => candidate,
        }
    }

    /// Rotation applied.
    pub fn rotation(&self) -> Rotation {
        match *self {
            Self::Fit { rotation, .. } => rotation,
            Self::Fallback { .. } => Rotation::R0,
        }
    }
}

/// Result of tiling a cell set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tiling {
    /// Units placed, in placement order.
    pub units: Vec<PlacedUnit>,
    /// Cells no candidate could cover.
    pub uncovered: Vec<GridPos>,
    /// Single-cell units placed.
    pub fallbacks: usize,
}

impl Tiling {
    /// Whether every cell was covered.
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }
}

/// Choose a placement anchored at `anchor`.
///
/// `free` holds the cells still available. Returns `None` if no candidate
/// fits.
pub fn choose_placement(
    anchor: GridPos,
    free: &BTreeSet<GridPos>,
    colors: &BTreeMap<GridPos, ColorId>,
    candidates: &[UnitType],
    match_color: bool,
) -> Option<Placement> {
    let color = colors.get(&anchor).copied();
    let fits = |cells: &[GridPos]| {
        cells.iter().all(|c| {
            free.contains(c) && (!match_color || colors.get(c).copied() == color)
        })
    };

    for (candidate, unit_type) in candidates.iter().enumerate() {
        if unit_type.footprint.is_single() {
            if free.contains(&anchor) {
                return Some(Placement::Fallback { candidate });
            }
            continue;
        }
        for rotation in Rotation::ALL {
            if fits(&unit_type.footprint.cells_at(anchor, rotation)) {
                return Some(Placement::Fit { candidate, rotation });
            }
        }
    }
    None
}

/// Greedily tile a set of same-layer cells with the given candidates.
///
/// `candidates` must already be in preference order. Cells no candidate
/// can cover are reported in [`Tiling::uncovered`].
pub fn greedy_tile(
    cells: &BTreeMap<GridPos, ColorId>,
    candidates: &[UnitType],
    match_color: bool,
) -> Tiling {
    let mut free: BTreeSet<GridPos> = cells.keys().copied().collect();
    let mut tiling = Tiling::default();

    while let Some(anchor) = free.first().copied() {
        match choose_placement(anchor, &free, cells, candidates, match_color) {
            Some(placement) => {
                let unit_type = &candidates[placement.candidate()];
                let unit = PlacedUnit::new(unit_type, anchor, placement.rotation(), cells[&anchor]);
                for cell in unit.cells() {
                    free.remove(&cell);
                }
                if matches!(placement, Placement::Fallback { .. }) {
                    tiling.fallbacks += 1;
                }
                tiling.units.push(unit);
            }
            None => {
                free.remove(&anchor);
                tiling.uncovered.push(anchor);
            }
        }
    }

    tiling
}

/// Units fitted to one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerFit {
    /// Layer.
    pub z: i32,
    /// Units covering the layer.
    pub units: Vec<PlacedUnit>,
    /// Single-cell units among them.
    pub single_cell_fallbacks: usize,
}

/// Fits layers of a voxel cloud with catalog units.
#[derive(Debug, Clone)]
pub struct GreedyLayerFitter {
    candidates: Vec<UnitType>,
    match_color: bool,
}

impl GreedyLayerFitter {
    /// Create a fitter over the catalog types in `categories`.
    ///
    /// Fails if no single-cell type is available, since full coverage could
    /// not be guaranteed.
    pub fn new(
        catalog: &UnitCatalog,
        categories: &[UnitCategory],
        match_color: bool,
    ) -> Result<Self, CatalogError> {
        if catalog.single_cell(categories).is_none() {
            return Err(CatalogError::MissingSingleCell(categories.to_vec()));
        }
        Ok(Self {
            candidates: catalog.candidates(categories),
            match_color,
        })
    }

    /// Candidates in preference order.
    pub fn candidates(&self) -> &[UnitType] {
        &self.candidates
    }

    /// Whether units are restricted to one color.
    pub fn match_color(&self) -> bool {
        self.match_color
    }

    /// Fit one layer.
    pub fn fit_layer(&self, z: i32, cells: &BTreeMap<GridPos, ColorId>) -> LayerFit {
        let tiling = greedy_tile(cells, &self.candidates, self.match_color);
        debug_assert!(tiling.is_complete(), "single-cell candidate always fits");

        tracing::debug!(
            z,
            cells = cells.len(),
            units = tiling.units.len(),
            fallbacks = tiling.fallbacks,
            "Fitted layer"
        );

        LayerFit {
            z,
            units: tiling.units,
            single_cell_fallbacks: tiling.fallbacks,
        }
    }

    /// Fit every layer of a cloud, bottom-up order in the result.
    ///
    /// Layers are independent, so with `parallel` they are fitted on the
    /// rayon pool. The cancel flag is checked before each layer.
    pub fn fit_cloud(
        &self,
        cloud: &VoxelCloud,
        parallel: bool,
        cancel: &CancelFlag,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<LayerFit>, PipelineError> {
        let layers = cloud.layers();

        let fit = |(z, cells): &(i32, BTreeMap<GridPos, ColorId>)| {
            if cancel.is_cancelled() {
                None
            } else {
                Some(self.fit_layer(*z, cells))
            }
        };

        let fits: Option<Vec<LayerFit>> = if parallel {
            layers.par_iter().map(fit).collect()
        } else {
            layers.iter().map(fit).collect()
        };
        let fits = fits.ok_or(PipelineError::Cancelled)?;

        for layer in &fits {
            if layer.single_cell_fallbacks > 0 {
                diagnostics.record(
                    DiagnosticKind::FittingFallback {
                        z: layer.z,
                        single_cell_units: layer.single_cell_fallbacks,
                    },
                    STAGE,
                );
            }
        }

        tracing::info!(
            layers = fits.len(),
            units = fits.iter().map(|l| l.units.len()).sum::<usize>(),
            "Layer fitting complete"
        );

        Ok(fits)
    }
}
