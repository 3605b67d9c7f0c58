//! Unit Catalog: the read-only table of placeable unit types.
//!
//! Loaded once and shared by every stage. All lookups are deterministic:
//! candidate lists are ordered by area (descending), then width
//! (descending), then id.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::types::{Footprint, UnitCategory, UnitType, UnitTypeId};

/// Catalog construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// No unit types supplied.
    #[error("Catalog is empty")]
    Empty,

    /// Two entries share an id.
    #[error("Duplicate unit type id: {0}")]
    DuplicateId(UnitTypeId),

    /// A footprint with zero width or depth.
    #[error("Unit type {0} has a zero-size footprint")]
    ZeroFootprint(UnitTypeId),

    /// Fitting needs a 1×1 unit among the fitted categories.
    #[error("No single-cell unit type in categories {0:?}")]
    MissingSingleCell(Vec<UnitCategory>),
}

/// Read-only table of unit types.
#[derive(Debug, Clone)]
pub struct UnitCatalog {
    types: Vec<UnitType>,
    by_id: BTreeMap<UnitTypeId, usize>,
}

impl UnitCatalog {
    /// Build a catalog, validating ids and footprints.
    pub fn new(types: Vec<UnitType>) -> Result<Self, CatalogError> {
        if types.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut types = types;
        types.sort_by(|a, b| ordering_key(a).cmp(&ordering_key(b)));

        let mut by_id = BTreeMap::new();
        for (i, ty) in types.iter().enumerate() {
            if ty.footprint.width == 0 || ty.footprint.depth == 0 {
                return Err(CatalogError::ZeroFootprint(ty.id.clone()));
            }
            if by_id.insert(ty.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateId(ty.id.clone()));
            }
        }

        Ok(Self { types, by_id })
    }

    /// The built-in brick catalog.
    pub fn standard() -> Self {
        Self::new(standard_types()).expect("built-in catalog is valid")
    }

    /// Shared instance of the built-in catalog.
    pub fn shared() -> Arc<UnitCatalog> {
        static SHARED: OnceLock<Arc<UnitCatalog>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::standard())).clone()
    }

    /// Look up a type by id.
    pub fn get(&self, id: &UnitTypeId) -> Option<&UnitType> {
        self.by_id.get(id).map(|&i| &self.types[i])
    }

    /// All types, in candidate order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitType> {
        self.types.iter()
    }

    /// Number of types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the catalog has no types. Always false for a constructed catalog.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types of one category, in candidate order.
    pub fn by_category(&self, category: UnitCategory) -> Vec<&UnitType> {
        self.types.iter().filter(|t| t.category == category).collect()
    }

    /// Types with a given footprint area.
    pub fn with_area(&self, area: u32) -> Vec<&UnitType> {
        self.types.iter().filter(|t| t.area() == area).collect()
    }

    /// Types with exactly this footprint (either orientation).
    pub fn with_footprint(&self, footprint: Footprint) -> Vec<&UnitType> {
        self.types
            .iter()
            .filter(|t| {
                t.footprint == footprint
                    || (t.footprint.width == footprint.depth && t.footprint.depth == footprint.width)
            })
            .collect()
    }

    /// Fitting candidates from the given categories, largest first.
    pub fn candidates(&self, categories: &[UnitCategory]) -> Vec<UnitType> {
        let wanted: HashSet<UnitCategory> = categories.iter().copied().collect();
        self.types
            .iter()
            .filter(|t| wanted.contains(&t.category))
            .cloned()
            .collect()
    }

    /// Single-cell type among the categories (first in candidate order).
    pub fn single_cell(&self, categories: &[UnitCategory]) -> Option<&UnitType> {
        self.types
            .iter()
            .filter(|t| categories.contains(&t.category))
            .find(|t| t.footprint.is_single())
    }

    /// Same-category types with a strictly smaller area, largest first.
    pub fn smaller_than(&self, unit: &UnitType) -> Vec<&UnitType> {
        self.types
            .iter()
            .filter(|t| t.category == unit.category && t.area() < unit.area())
            .collect()
    }
}

fn ordering_key(t: &UnitType) -> (std::cmp::Reverse<u32>, std::cmp::Reverse<u32>, UnitTypeId) {
    (
        std::cmp::Reverse(t.area()),
        std::cmp::Reverse(t.footprint.width),
        t.id.clone(),
    )
}

fn standard_types() -> Vec<UnitType> {
    use UnitCategory::*;
    vec![
        UnitType::new("3005", "Brick 1x1", 1, 1, Standard),
        UnitType::new("3004", "Brick 1x2", 2, 1, Standard),
        UnitType::new("3003", "Brick 2x2", 2, 2, Standard),
        UnitType::new("3010", "Brick 1x4", 4, 1, Standard),
        UnitType::new("3009", "Brick 1x6", 6, 1, Standard),
        UnitType::new("3008", "Brick 1x8", 8, 1, Standard),
        UnitType::new("3001", "Brick 2x4", 4, 2, Standard),
        UnitType::new("2456", "Brick 2x6", 6, 2, Standard),
        UnitType::new("3007", "Brick 2x8", 8, 2, Standard),
        UnitType::new("3006", "Brick 2x10", 10, 2, Standard),
        UnitType::new("3024", "Plate 1x1", 1, 1, Thin),
        UnitType::new("3023", "Plate 1x2", 2, 1, Thin),
        UnitType::new("3022", "Plate 2x2", 2, 2, Thin),
        UnitType::new("3710", "Plate 1x4", 4, 1, Thin),
        UnitType::new("3020", "Plate 2x4", 4, 2, Thin),
        UnitType::new("3795", "Plate 2x6", 6, 2, Thin),
        UnitType::new("3034", "Plate 2x8", 8, 2, Thin),
        UnitType::new("3460", "Plate 1x8", 8, 1, Thin),
        UnitType::new("3040", "Slope 45 2x1", 1, 2, Sloped).with_angle(45.0),
        UnitType::new("3039", "Slope 45 2x2", 2, 2, Sloped).with_angle(45.0),
        UnitType::new("3037", "Slope 45 2x4", 4, 2, Sloped).with_angle(45.0),
        UnitType::new("3298", "Slope 33 3x2", 2, 3, Sloped).with_angle(33.0),
        UnitType::new("3062", "Round Brick 1x1", 1, 1, Cylindrical),
        UnitType::new("3941", "Round Brick 2x2", 2, 2, Cylindrical),
    ]
}
