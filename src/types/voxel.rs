//! Voxels and the deduplicated voxel cloud.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::color::{ColorId, ColorParseError, Palette};
use super::grid::{GridBounds, GridPos, COORD_LIMIT};
use super::mesh::GeometryError;

/// A single occupied grid cell with its color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    /// Grid position.
    pub pos: GridPos,
    /// Palette color.
    pub color: ColorId,
}

/// Voxel supplied directly by a host, with a hex color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexVoxel {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Layer.
    pub z: i32,
    /// Color as `#RRGGBB`.
    pub hex_color: String,
}

/// Occupied cells keyed by coordinate.
///
/// Iteration order is `(z, y, x)`. Inserting an already-occupied coordinate
/// keeps the first color.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Voxel>", into = "Vec<Voxel>")]
pub struct VoxelCloud {
    cells: BTreeMap<GridPos, ColorId>,
}

impl VoxelCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a voxel. Returns false if the cell was already occupied.
    pub fn insert(&mut self, pos: GridPos, color: ColorId) -> bool {
        match self.cells.entry(pos) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(color);
                true
            }
        }
    }

    /// Build from hex-colored records, mapping each color to the palette.
    pub fn from_hex_voxels(
        voxels: &[HexVoxel],
        palette: &Palette,
        fallback: ColorId,
    ) -> Result<Self, ColorParseError> {
        let mut cloud = Self::new();
        for v in voxels {
            let color = palette.nearest_hex(&v.hex_color)?.unwrap_or(fallback);
            cloud.insert(GridPos::new(v.x, v.y, v.z), color);
        }
        Ok(cloud)
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no cell is occupied.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Color at a position.
    pub fn get(&self, pos: GridPos) -> Option<ColorId> {
        self.cells.get(&pos).copied()
    }

    /// Whether a position is occupied.
    pub fn contains(&self, pos: GridPos) -> bool {
        self.cells.contains_key(&pos)
    }

    /// All voxels in `(z, y, x)` order.
    pub fn iter(&self) -> impl Iterator<Item = Voxel> + '_ {
        self.cells.iter().map(|(&pos, &color)| Voxel { pos, color })
    }

    /// Distinct occupied layers, ascending.
    pub fn layer_indices(&self) -> Vec<i32> {
        let mut zs: Vec<i32> = self.cells.keys().map(|p| p.z).collect();
        zs.dedup();
        zs
    }

    /// Cells of one layer, row-major.
    pub fn layer(&self, z: i32) -> BTreeMap<GridPos, ColorId> {
        let lo = GridPos::new(i32::MIN, i32::MIN, z);
        let hi = GridPos::new(i32::MAX, i32::MAX, z);
        self.cells
            .range(lo..=hi)
            .map(|(&p, &c)| (p, c))
            .collect()
    }

    /// All layers, ascending.
    pub fn layers(&self) -> Vec<(i32, BTreeMap<GridPos, ColorId>)> {
        let mut out: Vec<(i32, BTreeMap<GridPos, ColorId>)> = Vec::new();
        for (&pos, &color) in &self.cells {
            match out.last_mut() {
                Some((z, cells)) if *z == pos.z => {
                    cells.insert(pos, color);
                }
                _ => out.push((pos.z, BTreeMap::from([(pos, color)]))),
            }
        }
        out
    }

    /// Bounds of occupied cells.
    pub fn bounds(&self) -> Option<GridBounds> {
        GridBounds::from_positions(self.cells.keys().copied())
    }

    /// Reject clouds with a cell beyond `±COORD_LIMIT` on any axis.
    pub fn check_coordinates(&self) -> Result<(), GeometryError> {
        let out_of_range = |p: &GridPos| {
            [p.x, p.y, p.z]
                .iter()
                .any(|c| !(-COORD_LIMIT..=COORD_LIMIT).contains(c))
        };
        match self.cells.keys().find(|p| out_of_range(p)) {
            Some(&pos) => Err(GeometryError::CoordinateOutOfRange { pos }),
            None => Ok(()),
        }
    }
}

impl FromIterator<Voxel> for VoxelCloud {
    fn from_iter<I: IntoIterator<Item = Voxel>>(iter: I) -> Self {
        let mut cloud = Self::new();
        for v in iter {
            cloud.insert(v.pos, v.color);
        }
        cloud
    }
}

impl From<Vec<Voxel>> for VoxelCloud {
    fn from(voxels: Vec<Voxel>) -> Self {
        voxels.into_iter().collect()
    }
}

impl From<VoxelCloud> for Vec<Voxel> {
    fn from(cloud: VoxelCloud) -> Self {
        cloud.iter().collect()
    }
}
