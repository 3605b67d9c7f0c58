//! Occupancy Index: which placed unit covers each grid cell.

use std::collections::HashMap;

use crate::types::{GridPos, PlacedUnit};

/// A cell was already covered by another unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cell {cell} is already covered by unit #{existing}")]
pub struct OverlapError {
    /// The contested cell.
    pub cell: GridPos,
    /// Index of the covering unit.
    pub existing: usize,
}

/// Map from covered cell to the index of the covering unit.
///
/// Indices refer to the unit slice the index was built from. The index is
/// transient: it is rebuilt by each stage that needs it and never stored.
#[derive(Debug, Clone, Default)]
pub struct OccupancyIndex {
    cells: HashMap<GridPos, usize>,
}

impl OccupancyIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a unit set, failing on the first double-covered cell.
    pub fn build(units: &[PlacedUnit]) -> Result<Self, OverlapError> {
        let mut index = Self::new();
        for (i, unit) in units.iter().enumerate() {
            index.insert(i, unit)?;
        }
        Ok(index)
    }

    /// Record a unit's cells. Nothing is recorded if any cell is taken.
    pub fn insert(&mut self, idx: usize, unit: &PlacedUnit) -> Result<(), OverlapError> {
        let cells = unit.cells();
        if let Some(&cell) = cells.iter().find(|c| self.cells.contains_key(c)) {
            return Err(OverlapError {
                cell,
                existing: self.cells[&cell],
            });
        }
        for cell in cells {
            self.cells.insert(cell, idx);
        }
        Ok(())
    }

    /// Index of the unit covering a cell.
    pub fn unit_at(&self, pos: GridPos) -> Option<usize> {
        self.cells.get(&pos).copied()
    }

    /// Covered cell count.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether nothing is covered.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
