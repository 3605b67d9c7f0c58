//! Unit types, footprints and placed units.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::color::ColorId;
use super::grid::{GridPos, Rotation};

/// Catalog identifier of a unit type (e.g. a part number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitTypeId(pub String);

impl UnitTypeId {
    /// Create an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitTypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unit shape family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    /// Full-height rectangular unit.
    Standard,
    /// Reduced-height rectangular unit.
    Thin,
    /// Unit with an angled top.
    Sloped,
    /// Round unit.
    Cylindrical,
}

impl UnitCategory {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Thin => "thin",
            Self::Sloped => "sloped",
            Self::Cylindrical => "cylindrical",
        }
    }
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rectangular footprint in grid cells at 0° rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Footprint {
    /// Cells along x.
    pub width: u32,
    /// Cells along y.
    pub depth: u32,
}

impl Footprint {
    /// The 1×1 footprint.
    pub const SINGLE: Footprint = Footprint { width: 1, depth: 1 };

    /// Create a footprint.
    pub const fn new(width: u32, depth: u32) -> Self {
        Self { width, depth }
    }

    /// Covered cell count.
    pub const fn area(&self) -> u32 {
        self.width * self.depth
    }

    /// Whether this is a single cell.
    pub const fn is_single(&self) -> bool {
        self.width == 1 && self.depth == 1
    }

    /// Width and depth after rotation.
    pub const fn rotated_dims(&self, rotation: Rotation) -> (u32, u32) {
        if rotation.is_quarter_turn() {
            (self.depth, self.width)
        } else {
            (self.width, self.depth)
        }
    }

    /// Planar offsets covered at a rotation, before normalisation.
    pub fn rotated_offsets(&self, rotation: Rotation) -> Vec<(i32, i32)> {
        let mut offsets = Vec::with_capacity(self.area() as usize);
        for dy in 0..self.depth as i32 {
            for dx in 0..self.width as i32 {
                offsets.push(rotation.apply(dx, dy));
            }
        }
        offsets
    }

    /// Absolute cells covered when anchored at `anchor` with `rotation`.
    ///
    /// The rotated offsets are translated so that their lowest corner lands
    /// on the anchor. Cells are returned row-major.
    pub fn cells_at(&self, anchor: GridPos, rotation: Rotation) -> Vec<GridPos> {
        let offsets = self.rotated_offsets(rotation);
        let min_x = offsets.iter().map(|o| o.0).min().unwrap_or(0);
        let min_y = offsets.iter().map(|o| o.1).min().unwrap_or(0);
        let mut cells: Vec<GridPos> = offsets
            .into_iter()
            .map(|(dx, dy)| anchor.offset(dx - min_x, dy - min_y, 0))
            .collect();
        cells.sort();
        cells
    }
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.depth)
    }
}

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitType {
    /// Identifier.
    pub id: UnitTypeId,
    /// Display name.
    pub name: String,
    /// Footprint at 0°.
    pub footprint: Footprint,
    /// Shape family.
    pub category: UnitCategory,
    /// Slope angle in degrees, for sloped units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

impl UnitType {
    /// Create a rectangular unit type.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        width: u32,
        depth: u32,
        category: UnitCategory,
    ) -> Self {
        Self {
            id: UnitTypeId::new(id),
            name: name.into(),
            footprint: Footprint::new(width, depth),
            category,
            angle: None,
        }
    }

    /// Set the slope angle.
    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = Some(angle);
        self
    }

    /// Covered cell count.
    pub fn area(&self) -> u32 {
        self.footprint.area()
    }
}

/// A unit placed on the grid.
///
/// Only `verified` and `color` change after placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacedUnit {
    /// Catalog type.
    pub unit_id: UnitTypeId,
    /// Footprint of the type at 0°.
    pub footprint: Footprint,
    /// Lowest-coordinate corner of the covered cells.
    pub position: GridPos,
    /// Rotation about the vertical axis.
    pub rotation: Rotation,
    /// Palette color.
    pub color: ColorId,
    /// Confirmed available by the catalog collaborator.
    pub verified: bool,
    /// Inserted by an auditor as structural support.
    pub synthetic: bool,
}

impl PlacedUnit {
    /// Place a unit of `unit_type`.
    pub fn new(unit_type: &UnitType, position: GridPos, rotation: Rotation, color: ColorId) -> Self {
        Self {
            unit_id: unit_type.id.clone(),
            footprint: unit_type.footprint,
            position,
            rotation,
            color,
            verified: false,
            synthetic: false,
        }
    }

    /// Mark as auditor-inserted support.
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    /// Covered cells.
    pub fn cells(&self) -> Vec<GridPos> {
        self.footprint.cells_at(self.position, self.rotation)
    }

    /// Layer of this unit.
    pub fn z(&self) -> i32 {
        self.position.z
    }

    /// Covered cell count.
    pub fn area(&self) -> u32 {
        self.footprint.area()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_at_zero_rotation() {
        let cells = Footprint::new(4, 2).cells_at(GridPos::new(10, 20, 3), Rotation::R0);
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], GridPos::new(10, 20, 3));
        assert_eq!(cells[7], GridPos::new(13, 21, 3));
    }

    #[test]
    fn test_quarter_turn_swaps_dims_and_keeps_anchor_corner() {
        let fp = Footprint::new(4, 2);
        for rotation in [Rotation::R90, Rotation::R270] {
            let cells = fp.cells_at(GridPos::new(0, 0, 0), rotation);
            assert_eq!(cells.len(), 8);
            assert!(cells.iter().all(|c| (0..2).contains(&c.x) && (0..4).contains(&c.y)));
            assert_eq!(fp.rotated_dims(rotation), (2, 4));
        }
    }

    #[test]
    fn test_half_turn_covers_same_rectangle() {
        let fp = Footprint::new(3, 2);
        assert_eq!(
            fp.cells_at(GridPos::new(1, 1, 0), Rotation::R0),
            fp.cells_at(GridPos::new(1, 1, 0), Rotation::R180)
        );
    }

    #[test]
    fn test_placed_unit_defaults() {
        let ty = UnitType::new("3001", "Brick 2x4", 4, 2, UnitCategory::Standard);
        let unit = PlacedUnit::new(&ty, GridPos::new(0, 0, 0), Rotation::R0, ColorId(4));
        assert!(!unit.verified);
        assert!(!unit.synthetic);
        assert!(unit.clone().synthetic().synthetic);
        assert_eq!(unit.area(), 8);
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&UnitCategory::Cylindrical).unwrap();
        assert_eq!(json, "\"cylindrical\"");
    }
}
