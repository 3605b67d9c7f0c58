//! Interlock Auditor: stagger seams between vertically adjacent layers.
//!
//! A seam is the edge between two horizontally adjacent cells covered by
//! different units. When the same edges are seams on layer `z` and `z + 1`,
//! the two layers split along a common plane. Runs of such coincident edges
//! longer than the tolerance are remediated on the upper layer by bridging:
//! the two units either side of one offending edge are replaced by a
//! strictly larger catalog unit that spans the edge, and whatever their
//! union leaves over is refilled greedily.
//!
//! Layer pairs are processed bottom-up and only the upper layer of a pair is
//! modified, so a pair stays resolved once processed. Edges whose bridge
//! fails are not retried. Runs still offending afterwards are reported as
//! `UnresolvedSeam` diagnostics.

use std::collections::{BTreeMap, BTreeSet};

use crate::fitter::{greedy_tile, GreedyLayerFitter};
use crate::occupancy::{OccupancyIndex, OverlapError};
use crate::pipeline::{CancelFlag, PipelineError};
use crate::types::{
    ColorId, DiagnosticKind, Diagnostics, GridPos, PlacedUnit, Rotation, SeamAxis, UnitType,
};

const STAGE: &str = "interlock";

/// One seam edge within a layer.
///
/// For `SeamAxis::X` the edge separates `(line, along)` from
/// `(line + 1, along)`; for `SeamAxis::Y` it separates `(along, line)` from
/// `(along, line + 1)`. Ordering groups edges of one boundary line together,
/// consecutive along the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeamEdge {
    /// Orientation.
    pub axis: SeamAxis,
    /// Boundary line coordinate.
    pub line: i32,
    /// Position along the boundary line.
    pub along: i32,
}

impl SeamEdge {
    /// The two cells this edge separates, low side first.
    pub fn cells(&self, z: i32) -> (GridPos, GridPos) {
        match self.axis {
            SeamAxis::X => (
                GridPos::new(self.line, self.along, z),
                GridPos::new(self.line + 1, self.along, z),
            ),
            SeamAxis::Y => (
                GridPos::new(self.along, self.line, z),
                GridPos::new(self.along, self.line + 1, z),
            ),
        }
    }

    fn follows(&self, prev: &SeamEdge) -> bool {
        self.axis == prev.axis && self.line == prev.line && self.along == prev.along + 1
    }
}

/// A maximal run of consecutive coincident edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeamRun {
    /// Edges in order along the line.
    pub edges: Vec<SeamEdge>,
}

impl SeamRun {
    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether the run is empty (never true for computed runs).
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Seam edges of one layer.
pub fn layer_seams(units: &[PlacedUnit]) -> Result<BTreeSet<SeamEdge>, OverlapError> {
    let index = OccupancyIndex::build(units)?;
    let mut seams = BTreeSet::new();
    for (owner, unit) in units.iter().enumerate() {
        for cell in unit.cells() {
            let neighbors = [
                (SeamAxis::X, cell.offset(1, 0, 0), cell.x, cell.y),
                (SeamAxis::Y, cell.offset(0, 1, 0), cell.y, cell.x),
            ];
            for (axis, neighbor, line, along) in neighbors {
                if matches!(index.unit_at(neighbor), Some(other) if other != owner) {
                    seams.insert(SeamEdge { axis, line, along });
                }
            }
        }
    }
    Ok(seams)
}

/// Maximal runs of edges seamed in both layers.
pub fn coincident_runs(
    lower: &[PlacedUnit],
    upper: &[PlacedUnit],
) -> Result<Vec<SeamRun>, OverlapError> {
    let lower_seams = layer_seams(lower)?;
    let upper_seams = layer_seams(upper)?;

    let mut runs: Vec<SeamRun> = Vec::new();
    for edge in lower_seams.intersection(&upper_seams) {
        match runs.last_mut() {
            Some(run) if run.edges.last().is_some_and(|prev| edge.follows(prev)) => {
                run.edges.push(*edge);
            }
            _ => runs.push(SeamRun { edges: vec![*edge] }),
        }
    }
    Ok(runs)
}

/// Result of an interlock audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterlockOutcome {
    /// Adjusted units, grouped by layer ascending.
    pub units: Vec<PlacedUnit>,
    /// Bridging units placed.
    pub units_added: usize,
    /// Offending runs left in place.
    pub unresolved_runs: usize,
}

/// Staggers seams between adjacent layers.
#[derive(Debug, Clone)]
pub struct InterlockAuditor {
    candidates: Vec<UnitType>,
    tolerance: usize,
    max_merges: usize,
    match_color: bool,
}

/// A planned bridge: units to remove and units replacing them.
struct Bridge {
    removed: [usize; 2],
    bridge: PlacedUnit,
    refill: Vec<PlacedUnit>,
}

impl InterlockAuditor {
    /// Create an auditor.
    ///
    /// `candidates` must be in fitting preference order and should include a
    /// single-cell type so leftover cells can always be refilled.
    pub fn new(
        candidates: Vec<UnitType>,
        tolerance: usize,
        max_merges: usize,
        match_color: bool,
    ) -> Self {
        Self {
            candidates,
            tolerance,
            max_merges,
            match_color,
        }
    }

    /// Create an auditor using a fitter's candidates and color rule.
    pub fn from_fitter(fitter: &GreedyLayerFitter, tolerance: usize, max_merges: usize) -> Self {
        Self::new(
            fitter.candidates().to_vec(),
            tolerance,
            max_merges,
            fitter.match_color(),
        )
    }

    /// Runs longer than the tolerance.
    pub fn offending_runs(
        &self,
        lower: &[PlacedUnit],
        upper: &[PlacedUnit],
    ) -> Result<Vec<SeamRun>, OverlapError> {
        Ok(coincident_runs(lower, upper)?
            .into_iter()
            .filter(|run| run.len() > self.tolerance)
            .collect())
    }

    /// Audit all layers.
    pub fn audit(
        &self,
        units: Vec<PlacedUnit>,
        cancel: &CancelFlag,
        diagnostics: &mut Diagnostics,
    ) -> Result<InterlockOutcome, PipelineError> {
        let mut layers: BTreeMap<i32, Vec<PlacedUnit>> = BTreeMap::new();
        for unit in units {
            layers.entry(unit.z()).or_default().push(unit);
        }

        let mut units_added = 0;
        let mut unresolved_runs = 0;
        let zs: Vec<i32> = layers.keys().copied().collect();

        for z in zs {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(mut upper) = layers.remove(&(z + 1)) else {
                continue;
            };
            let lower = layers.get(&z).map(Vec::as_slice).unwrap_or_default();

            let merges = self.resolve_pair(lower, &mut upper, z + 1)?;
            units_added += merges;

            for run in self.offending_runs(lower, &upper)? {
                unresolved_runs += 1;
                let (start, _) = run.edges[0].cells(z);
                diagnostics.record(
                    DiagnosticKind::UnresolvedSeam {
                        lower_z: z,
                        start,
                        axis: run.edges[0].axis,
                        run_length: run.len(),
                    },
                    STAGE,
                );
            }

            if merges > 0 {
                tracing::debug!(lower_z = z, merges, "Bridged coincident seams");
            }
            layers.insert(z + 1, upper);
        }

        tracing::info!(units_added, unresolved_runs, "Interlock audit complete");

        Ok(InterlockOutcome {
            units: layers.into_values().flatten().collect(),
            units_added,
            unresolved_runs,
        })
    }

    /// Bridge offending edges on `upper` until none remain or every
    /// remaining edge has failed. Returns the number of bridges placed.
    fn resolve_pair(
        &self,
        lower: &[PlacedUnit],
        upper: &mut Vec<PlacedUnit>,
        upper_z: i32,
    ) -> Result<usize, OverlapError> {
        let mut failed: BTreeSet<SeamEdge> = BTreeSet::new();
        let mut merges = 0;

        while merges < self.max_merges {
            let runs = self.offending_runs(lower, upper)?;
            let Some(edge) = runs
                .iter()
                .flat_map(|run| run.edges.iter())
                .find(|edge| !failed.contains(edge))
                .copied()
            else {
                break;
            };

            let index = OccupancyIndex::build(upper)?;
            match self.plan_bridge(upper, &index, edge, upper_z) {
                Some(plan) => {
                    let [a, b] = plan.removed;
                    upper.remove(a.max(b));
                    upper.remove(a.min(b));
                    upper.push(plan.bridge);
                    upper.extend(plan.refill);
                    merges += 1;
                }
                None => {
                    failed.insert(edge);
                }
            }
        }

        Ok(merges)
    }

    fn plan_bridge(
        &self,
        upper: &[PlacedUnit],
        index: &OccupancyIndex,
        edge: SeamEdge,
        z: i32,
    ) -> Option<Bridge> {
        let (a, b) = edge.cells(z);
        let i = index.unit_at(a)?;
        let j = index.unit_at(b)?;
        if i == j {
            return None;
        }
        let (u1, u2) = (&upper[i], &upper[j]);
        if self.match_color && u1.color != u2.color {
            return None;
        }

        let union: BTreeMap<GridPos, ColorId> = u1
            .cells()
            .into_iter()
            .map(|c| (c, u1.color))
            .chain(u2.cells().into_iter().map(|c| (c, u2.color)))
            .collect();
        let floor = u1.area().max(u2.area());

        for unit_type in self
            .candidates
            .iter()
            .filter(|t| t.area() > floor && t.area() as usize <= union.len())
        {
            for rotation in Rotation::ALL {
                let (w, d) = unit_type.footprint.rotated_dims(rotation);
                let (w, d) = (w as i32, d as i32);
                for ay in (b.y - d + 1)..=a.y {
                    for ax in (b.x - w + 1)..=a.x {
                        let anchor = GridPos::new(ax, ay, z);
                        let cells = unit_type.footprint.cells_at(anchor, rotation);
                        if !cells.iter().all(|c| union.contains_key(c)) {
                            continue;
                        }

                        let mut leftover = union.clone();
                        for c in &cells {
                            leftover.remove(c);
                        }
                        let refill = greedy_tile(&leftover, &self.candidates, self.match_color);
                        if !refill.is_complete() {
                            continue;
                        }

                        return Some(Bridge {
                            removed: [i, j],
                            bridge: PlacedUnit::new(unit_type, anchor, rotation, u1.color),
                            refill: refill.units,
                        });
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitCategory;

    fn ty(id: &str, w: u32, d: u32) -> UnitType {
        UnitType::new(id, id, w, d, UnitCategory::Standard)
    }

    fn place(t: &UnitType, x: i32, y: i32, z: i32) -> PlacedUnit {
        PlacedUnit::new(t, GridPos::new(x, y, z), Rotation::R0, ColorId(1))
    }

    fn aligned_pair(square: &UnitType) -> Vec<PlacedUnit> {
        vec![
            place(square, 0, 0, 0),
            place(square, 2, 0, 0),
            place(square, 0, 0, 1),
            place(square, 2, 0, 1),
        ]
    }

    #[test]
    fn test_layer_seams() {
        let square = ty("2x2", 2, 2);
        let seams = layer_seams(&[place(&square, 0, 0, 0), place(&square, 2, 0, 0)]).unwrap();
        assert_eq!(
            seams.into_iter().collect::<Vec<_>>(),
            vec![
                SeamEdge { axis: SeamAxis::X, line: 1, along: 0 },
                SeamEdge { axis: SeamAxis::X, line: 1, along: 1 },
            ]
        );
    }

    #[test]
    fn test_coincident_runs_group_consecutive_edges() {
        let square = ty("2x2", 2, 2);
        let units = aligned_pair(&square);
        let runs = coincident_runs(&units[..2], &units[2..]).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 2);
    }

    #[test]
    fn test_aligned_seams_are_bridged() {
        let square = ty("2x2", 2, 2);
        let auditor = InterlockAuditor::new(
            vec![ty("2x4", 4, 2), square.clone(), ty("1x1", 1, 1)],
            0,
            1024,
            true,
        );
        let mut diagnostics = Diagnostics::new();
        let out = auditor
            .audit(aligned_pair(&square), &CancelFlag::new(), &mut diagnostics)
            .unwrap();

        assert_eq!(out.units_added, 1);
        assert_eq!(out.unresolved_runs, 0);
        assert!(diagnostics.is_empty());

        let upper: Vec<&PlacedUnit> = out.units.iter().filter(|u| u.z() == 1).collect();
        assert_eq!(upper.len(), 1);
        assert_eq!(upper[0].unit_id.as_str(), "2x4");
        assert_eq!(upper[0].position, GridPos::new(0, 0, 1));
    }

    #[test]
    fn test_unbridgeable_seam_is_reported() {
        let square = ty("2x2", 2, 2);
        let auditor =
            InterlockAuditor::new(vec![square.clone(), ty("1x1", 1, 1)], 0, 1024, true);
        let mut diagnostics = Diagnostics::new();
        let out = auditor
            .audit(aligned_pair(&square), &CancelFlag::new(), &mut diagnostics)
            .unwrap();

        assert_eq!(out.units_added, 0);
        assert_eq!(out.unresolved_runs, 1);
        assert_eq!(out.units, aligned_pair(&square));
        assert!(diagnostics.has_code("UNRESOLVED_SEAM"));
    }

    #[test]
    fn test_tolerance_allows_short_runs() {
        let square = ty("2x2", 2, 2);
        let auditor =
            InterlockAuditor::new(vec![square.clone(), ty("1x1", 1, 1)], 2, 1024, true);
        let mut diagnostics = Diagnostics::new();
        let out = auditor
            .audit(aligned_pair(&square), &CancelFlag::new(), &mut diagnostics)
            .unwrap();
        assert_eq!(out.unresolved_runs, 0);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_color_mismatch_blocks_bridge() {
        let square = ty("2x2", 2, 2);
        let mut units = aligned_pair(&square);
        units[3].color = ColorId(4);
        let auditor = InterlockAuditor::new(
            vec![ty("2x4", 4, 2), square.clone(), ty("1x1", 1, 1)],
            0,
            1024,
            true,
        );
        let out = auditor
            .audit(units, &CancelFlag::new(), &mut Diagnostics::new())
            .unwrap();
        assert_eq!(out.units_added, 0);
        assert_eq!(out.unresolved_runs, 1);
    }

    #[test]
    fn test_bridge_refills_leftover_cells() {
        // Upper layer: 2x2 and 1x2 (rotated 2x1) side by side, union 3x2.
        let square = ty("2x2", 2, 2);
        let bar = ty("2x1", 2, 1);
        let three = ty("3x2", 3, 2);
        let units = vec![
            place(&square, 0, 0, 0),
            PlacedUnit::new(&bar, GridPos::new(2, 0, 0), Rotation::R90, ColorId(1)),
            place(&square, 0, 0, 1),
            PlacedUnit::new(&bar, GridPos::new(2, 0, 1), Rotation::R90, ColorId(1)),
        ];
        let auditor = InterlockAuditor::new(
            vec![three, square, bar, ty("1x1", 1, 1)],
            0,
            1024,
            true,
        );
        let out = auditor
            .audit(units, &CancelFlag::new(), &mut Diagnostics::new())
            .unwrap();
        assert_eq!(out.units_added, 1);
        let upper: Vec<&PlacedUnit> = out.units.iter().filter(|u| u.z() == 1).collect();
        assert_eq!(upper.len(), 1);
        assert_eq!(upper[0].unit_id.as_str(), "3x2");
    }

    #[test]
    fn test_merge_cap_is_respected() {
        let square = ty("2x2", 2, 2);
        let auditor = InterlockAuditor::new(
            vec![ty("2x4", 4, 2), square.clone(), ty("1x1", 1, 1)],
            0,
            0,
            true,
        );
        let out = auditor
            .audit(aligned_pair(&square), &CancelFlag::new(), &mut Diagnostics::new())
            .unwrap();
        assert_eq!(out.units_added, 0);
        assert_eq!(out.unresolved_runs, 1);
    }
}
