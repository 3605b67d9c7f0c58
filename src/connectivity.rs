//! Connectivity Auditor: make every occupied cell reachable from the anchor.
//!
//! ## Algorithm
//!
//! 1. Flood-fill from every anchor-layer cell over 6-connected occupied
//!    cells, using an explicit worklist and visited set.
//! 2. Group unreached cells into 6-connected clusters.
//! 3. For each cluster above the anchor, drop a column of single-cell
//!    synthetic supports from below its lowest cell until an occupied cell
//!    is met or the anchor layer is filled. Clusters below the anchor get a
//!    column upward from their highest cell.
//! 4. Repeat until nothing is unreached.
//!
//! A column always adds at least one support: the cell beyond a cluster's
//! extreme cell cannot be occupied, or that cell would belong to the
//! cluster or make it reachable. So every pass shrinks the unreached set.
//!
//! Support color comes from the horizontally nearest anchor-layer cell, or
//! from the cluster's own extreme cell if the anchor layer is empty.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::occupancy::{OccupancyIndex, OverlapError};
use crate::pipeline::{CancelFlag, PipelineError};
use crate::types::{
    ColorId, DiagnosticKind, Diagnostics, GridBounds, GridPos, PlacedUnit, Rotation, UnitType,
};

const STAGE: &str = "connectivity";

/// Result of a connectivity audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityOutcome {
    /// Input units followed by synthetic supports.
    pub units: Vec<PlacedUnit>,
    /// Synthetic supports added.
    pub supports_added: usize,
    /// Disconnected clusters found.
    pub clusters: usize,
    /// Anchor layer used. `None` when there were no units.
    pub anchor_z: Option<i32>,
}

/// Cells reachable from the anchor layer.
fn flood_fill(occupied: &HashMap<GridPos, ColorId>, anchor_z: i32) -> HashSet<GridPos> {
    let mut visited: HashSet<GridPos> = HashSet::new();
    let mut worklist: VecDeque<GridPos> = VecDeque::new();

    let mut seeds: Vec<GridPos> = occupied.keys().copied().filter(|p| p.z == anchor_z).collect();
    seeds.sort();
    for seed in seeds {
        visited.insert(seed);
        worklist.push_back(seed);
    }

    while let Some(cell) = worklist.pop_front() {
        for next in cell.face_neighbors() {
            if occupied.contains_key(&next) && visited.insert(next) {
                worklist.push_back(next);
            }
        }
    }
    visited
}

/// 6-connected components of `cells`, each sorted, ordered by lowest cell.
fn clusters(cells: &BTreeSet<GridPos>) -> Vec<Vec<GridPos>> {
    let mut seen: HashSet<GridPos> = HashSet::new();
    let mut out = Vec::new();

    for &start in cells {
        if !seen.insert(start) {
            continue;
        }
        let mut cluster = vec![start];
        let mut worklist = VecDeque::from([start]);
        while let Some(cell) = worklist.pop_front() {
            for next in cell.face_neighbors() {
                if cells.contains(&next) && seen.insert(next) {
                    cluster.push(next);
                    worklist.push_back(next);
                }
            }
        }
        cluster.sort();
        out.push(cluster);
    }
    out
}

fn cell_colors(units: &[PlacedUnit]) -> HashMap<GridPos, ColorId> {
    units
        .iter()
        .flat_map(|u| u.cells().into_iter().map(move |c| (c, u.color)))
        .collect()
}

/// Occupied cells of `units` not reachable from layer `anchor_z`.
pub fn unreachable_cells(
    units: &[PlacedUnit],
    anchor_z: i32,
) -> Result<BTreeSet<GridPos>, OverlapError> {
    OccupancyIndex::build(units)?;
    let occupied = cell_colors(units);
    let reached = flood_fill(&occupied, anchor_z);
    Ok(occupied
        .keys()
        .copied()
        .filter(|p| !reached.contains(p))
        .collect())
}

/// Adds synthetic supports so every cell connects to the anchor layer.
#[derive(Debug, Clone)]
pub struct ConnectivityAuditor {
    anchor_layer: Option<i32>,
    support: UnitType,
}

impl ConnectivityAuditor {
    /// Create an auditor. `support` must be a single-cell type.
    ///
    /// With `anchor_layer` unset the lowest occupied layer is used.
    pub fn new(anchor_layer: Option<i32>, support: UnitType) -> Self {
        debug_assert!(support.footprint.is_single());
        Self {
            anchor_layer,
            support,
        }
    }

    /// Audit a unit set.
    pub fn audit(
        &self,
        mut units: Vec<PlacedUnit>,
        cancel: &CancelFlag,
        diagnostics: &mut Diagnostics,
    ) -> Result<ConnectivityOutcome, PipelineError> {
        OccupancyIndex::build(&units)?;
        let mut occupied = cell_colors(&units);

        let Some(lowest_z) = occupied.keys().map(|p| p.z).min() else {
            return Ok(ConnectivityOutcome {
                units,
                supports_added: 0,
                clusters: 0,
                anchor_z: None,
            });
        };
        let anchor_z = self.anchor_layer.unwrap_or(lowest_z);

        let mut supports_added = 0;
        let mut cluster_count = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let reached = flood_fill(&occupied, anchor_z);
            let unreached: BTreeSet<GridPos> = occupied
                .keys()
                .copied()
                .filter(|p| !reached.contains(p))
                .collect();
            if unreached.is_empty() {
                break;
            }

            let anchor_cells: Vec<(GridPos, ColorId)> = {
                let mut cells: Vec<(GridPos, ColorId)> = occupied
                    .iter()
                    .filter(|(p, _)| p.z == anchor_z)
                    .map(|(&p, &c)| (p, c))
                    .collect();
                cells.sort();
                cells
            };

            let mut pass_added = 0;
            for cluster in clusters(&unreached) {
                cluster_count += 1;
                let column = self.support_column(&cluster, anchor_z, &occupied);
                let color = nearest_anchor_color(&anchor_cells, &column)
                    .unwrap_or_else(|| occupied[&extreme_cell(&cluster, anchor_z)]);

                for &pos in &column {
                    occupied.insert(pos, color);
                    units.push(
                        PlacedUnit::new(&self.support, pos, Rotation::R0, color).synthetic(),
                    );
                }
                pass_added += column.len();

                diagnostics.record(
                    DiagnosticKind::DisconnectedCluster {
                        cell_count: cluster.len(),
                        lowest: cluster[0],
                        bounds: GridBounds::from_positions(cluster.iter().copied())
                            .unwrap_or(GridBounds::point(cluster[0])),
                        supports_added: column.len(),
                    },
                    STAGE,
                );
            }

            supports_added += pass_added;
            if pass_added == 0 {
                tracing::warn!(
                    unreached = unreached.len(),
                    "Connectivity pass made no progress"
                );
                break;
            }
        }

        tracing::info!(
            anchor_z,
            clusters = cluster_count,
            supports_added,
            "Connectivity audit complete"
        );

        Ok(ConnectivityOutcome {
            units,
            supports_added,
            clusters: cluster_count,
            anchor_z: Some(anchor_z),
        })
    }

    /// Support cells for one cluster, nearest the cluster first.
    fn support_column(
        &self,
        cluster: &[GridPos],
        anchor_z: i32,
        occupied: &HashMap<GridPos, ColorId>,
    ) -> Vec<GridPos> {
        let start = extreme_cell(cluster, anchor_z);
        let step = if start.z > anchor_z { -1 } else { 1 };

        let mut column = Vec::new();
        let mut pos = start.offset(0, 0, step);
        loop {
            if occupied.contains_key(&pos) {
                break;
            }
            column.push(pos);
            if pos.z == anchor_z {
                break;
            }
            pos = pos.offset(0, 0, step);
        }
        column
    }
}

/// Lowest cell of a cluster above the anchor, or the highest cell (lowest
/// `y`, `x` among them) of a cluster below it.
fn extreme_cell(cluster: &[GridPos], anchor_z: i32) -> GridPos {
    let lowest = cluster[0];
    if lowest.z > anchor_z {
        return lowest;
    }
    let top = cluster.iter().map(|p| p.z).max().unwrap_or(lowest.z);
    cluster
        .iter()
        .copied()
        .find(|p| p.z == top)
        .unwrap_or(lowest)
}

/// Color of the anchor cell horizontally nearest the column (first in
/// row-major order on ties).
fn nearest_anchor_color(anchor_cells: &[(GridPos, ColorId)], column: &[GridPos]) -> Option<ColorId> {
    let target = column.first()?;
    anchor_cells
        .iter()
        .min_by_key(|(p, _)| (p.planar_distance_sq(*target), *p))
        .map(|&(_, c)| c)
}
