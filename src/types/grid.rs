//! Grid coordinates, rotations and bounds.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Largest accepted coordinate magnitude on any axis.
///
/// Leaves headroom below `i32::MAX` so footprint offsets, neighbor lookups
/// and support columns never overflow.
pub const COORD_LIMIT: i32 = 1 << 24;

/// Integer grid coordinate. `z` is the vertical (layer) axis.
///
/// Implements `Ord` as `(z, y, x)` so that ordered collections iterate
/// layer by layer, and row-major within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct GridPos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Layer.
    pub z: i32,
}

impl GridPos {
    /// Create a new grid position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Offset this position.
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The same column and row on another layer.
    pub const fn with_z(self, z: i32) -> Self {
        Self::new(self.x, self.y, z)
    }

    /// Cell directly below.
    pub const fn below(self) -> Self {
        self.offset(0, 0, -1)
    }

    /// Cell directly above.
    pub const fn above(self) -> Self {
        self.offset(0, 0, 1)
    }

    /// The four lateral neighbors (-x, +x, -y, +y).
    pub fn lateral_neighbors(self) -> [Self; 4] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
        ]
    }

    /// The six face-adjacent neighbors: four lateral, below, above.
    pub fn face_neighbors(self) -> [Self; 6] {
        let [a, b, c, d] = self.lateral_neighbors();
        [a, b, c, d, self.below(), self.above()]
    }

    /// Squared horizontal distance to another position (z ignored).
    pub fn planar_distance_sq(self, other: Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }
}

impl Ord for GridPos {
    fn cmp(&self, other: &Self) -> Ordering {
        self.z
            .cmp(&other.z)
            .then_with(|| self.y.cmp(&other.y))
            .then_with(|| self.x.cmp(&other.x))
    }
}

impl PartialOrd for GridPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<[i32; 3]> for GridPos {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<GridPos> for [i32; 3] {
    fn from(pos: GridPos) -> Self {
        [pos.x, pos.y, pos.z]
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Rotation about the vertical axis.
///
/// Serializes as integer degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    /// 0 degrees.
    R0,
    /// 90 degrees.
    R90,
    /// 180 degrees.
    R180,
    /// 270 degrees.
    R270,
}

impl Rotation {
    /// All rotations in preference order (0° first).
    pub const ALL: [Rotation; 4] = [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270];

    /// Rotation in degrees.
    pub const fn degrees(self) -> u16 {
        match self {
            Self::R0 => 0,
            Self::R90 => 90,
            Self::R180 => 180,
            Self::R270 => 270,
        }
    }

    /// Parse from degrees.
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::R0),
            90 => Some(Self::R90),
            180 => Some(Self::R180),
            270 => Some(Self::R270),
            _ => None,
        }
    }

    /// Rotate a planar offset counter-clockwise about the origin.
    pub const fn apply(self, dx: i32, dy: i32) -> (i32, i32) {
        match self {
            Self::R0 => (dx, dy),
            Self::R90 => (-dy, dx),
            Self::R180 => (-dx, -dy),
            Self::R270 => (dy, -dx),
        }
    }

    /// Whether this rotation swaps width and depth.
    pub const fn is_quarter_turn(self) -> bool {
        matches!(self, Self::R90 | Self::R270)
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::R0
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees).ok_or_else(|| format!("invalid rotation: {degrees}"))
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Inclusive integer bounding box over grid positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridBounds {
    /// Lowest corner.
    pub min: GridPos,
    /// Highest corner (inclusive).
    pub max: GridPos,
}

impl GridBounds {
    /// Bounds of a single position.
    pub const fn point(pos: GridPos) -> Self {
        Self { min: pos, max: pos }
    }

    /// Smallest bounds containing every position, or `None` if empty.
    pub fn from_positions<I: IntoIterator<Item = GridPos>>(positions: I) -> Option<Self> {
        let mut iter = positions.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::point(first), |bounds, pos| bounds.including(pos)))
    }

    /// Grow to include a position.
    pub fn including(self, pos: GridPos) -> Self {
        Self {
            min: GridPos::new(self.min.x.min(pos.x), self.min.y.min(pos.y), self.min.z.min(pos.z)),
            max: GridPos::new(self.max.x.max(pos.x), self.max.y.max(pos.y), self.max.z.max(pos.z)),
        }
    }

    /// Whether a position lies inside.
    pub fn contains(&self, pos: GridPos) -> bool {
        (self.min.x..=self.max.x).contains(&pos.x)
            && (self.min.y..=self.max.y).contains(&pos.y)
            && (self.min.z..=self.max.z).contains(&pos.z)
    }

    /// Size along each axis, in cells.
    pub fn size(&self) -> [u32; 3] {
        [
            self.max.x.abs_diff(self.min.x) + 1,
            self.max.y.abs_diff(self.min.y) + 1,
            self.max.z.abs_diff(self.min.z) + 1,
        ]
    }
}
