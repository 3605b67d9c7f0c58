//! The versioned assembly manifest.
//!
//! A manifest is built once from the final placed-unit set and is immutable
//! afterwards. Everything in it is ordered (units by `(z, y, x)`, inventory by
//! `(unit_id, color_id)`, layers by `z`) so that identical inputs serialize to
//! identical bytes. The `fingerprint` is the xxHash64 of that content.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::{canonical_hash_hex, to_canonical_bytes};
use crate::MANIFEST_SCHEMA_VERSION;

use super::color::ColorId;
use super::grid::{GridBounds, GridPos, Rotation};
use super::unit::{PlacedUnit, UnitTypeId};

/// One placed unit as it appears in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestUnit {
    /// Catalog type.
    pub unit_id: UnitTypeId,
    /// Anchor `[x, y, z]`.
    pub position: GridPos,
    /// Rotation in degrees.
    pub rotation: Rotation,
    /// Palette color.
    pub color_id: ColorId,
    /// Confirmed available.
    pub verified: bool,
    /// Auditor-inserted support.
    pub synthetic: bool,
}

impl From<&PlacedUnit> for ManifestUnit {
    fn from(unit: &PlacedUnit) -> Self {
        Self {
            unit_id: unit.unit_id.clone(),
            position: unit.position,
            rotation: unit.rotation,
            color_id: unit.color,
            verified: unit.verified,
            synthetic: unit.synthetic,
        }
    }
}

/// Aggregated quantity of one `(unit type, color)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Catalog type.
    pub unit_id: UnitTypeId,
    /// Palette color.
    pub color_id: ColorId,
    /// Units needed.
    pub quantity: usize,
}

/// Kind of build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Only fitted units.
    Standard,
    /// Only synthetic supports.
    StructuralSupport,
    /// Both.
    Mixed,
}

/// One layer of build instructions, bottom-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    /// 1-based step number.
    pub step_number: usize,
    /// Layer built in this step.
    pub layer_z: i32,
    /// Units placed in this step.
    pub unit_count: usize,
    /// Step kind.
    pub kind: StepKind,
}

/// Run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    /// Bounds of all covered cells.
    pub bounding_box: Option<GridBounds>,
    /// Units placed by the interlock auditor.
    pub interlock_units_added: usize,
    /// Synthetic supports placed by the connectivity auditor.
    pub connectivity_supports_added: usize,
    /// Units replaced after failed availability checks.
    pub substitutions: usize,
    /// Units not confirmed available.
    pub unverified_units: usize,
    /// Single-cell units placed by the fitter.
    pub single_cell_fallbacks: usize,
}

/// The assembly manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version.
    pub version: String,
    /// Number of units.
    pub total_units: usize,
    /// Units ordered by anchor `(z, y, x)`.
    pub units: Vec<ManifestUnit>,
    /// Units per layer.
    pub layer_counts: BTreeMap<i32, usize>,
    /// Aggregated inventory.
    pub inventory: Vec<InventoryEntry>,
    /// Run statistics.
    pub stats: ManifestStats,
    /// Build steps, bottom-up.
    pub steps: Vec<BuildStep>,
    /// Hash of the policy parameters used.
    pub policy_params_hash: String,
    /// xxHash64 of the content above.
    pub fingerprint: String,
}

impl Manifest {
    /// Canonical JSON bytes.
    pub fn to_canonical_json(&self) -> Vec<u8> {
        to_canonical_bytes(self)
    }

    /// Recompute the fingerprint and compare.
    pub fn verify_fingerprint(&self) -> bool {
        self.fingerprint == content_fingerprint(self)
    }

    /// Whether the manifest has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Inventory quantity for a `(unit type, color)` pair.
    pub fn quantity_of(&self, unit_id: &UnitTypeId, color_id: ColorId) -> usize {
        self.inventory
            .iter()
            .find(|e| &e.unit_id == unit_id && e.color_id == color_id)
            .map_or(0, |e| e.quantity)
    }
}

fn content_fingerprint(manifest: &Manifest) -> String {
    let content = (
        &manifest.version,
        manifest.total_units,
        &manifest.units,
        &manifest.layer_counts,
        &manifest.inventory,
        &manifest.stats,
        &manifest.steps,
        &manifest.policy_params_hash,
    );
    canonical_hash_hex(&content)
}

/// Builder for manifests.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    units: Vec<PlacedUnit>,
    stats: ManifestStats,
    policy_params_hash: String,
}

impl ManifestBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the final unit set.
    pub fn units(mut self, units: Vec<PlacedUnit>) -> Self {
        self.units = units;
        self
    }

    /// Set the run statistics. Bounds and unverified count are recomputed.
    pub fn stats(mut self, stats: ManifestStats) -> Self {
        self.stats = stats;
        self
    }

    /// Set the policy hash.
    pub fn policy_params_hash(mut self, hash: impl Into<String>) -> Self {
        self.policy_params_hash = hash.into();
        self
    }

    /// Build the manifest.
    pub fn build(self) -> Manifest {
        let mut units = self.units;
        units.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });

        let mut layer_counts: BTreeMap<i32, usize> = BTreeMap::new();
        let mut layer_kinds: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
        let mut inventory: BTreeMap<(UnitTypeId, ColorId), usize> = BTreeMap::new();

        for unit in &units {
            *layer_counts.entry(unit.z()).or_default() += 1;
            let kinds = layer_kinds.entry(unit.z()).or_default();
            if unit.synthetic {
                kinds.1 += 1;
            } else {
                kinds.0 += 1;
            }
            *inventory
                .entry((unit.unit_id.clone(), unit.color))
                .or_default() += 1;
        }

        let steps = layer_kinds
            .iter()
            .enumerate()
            .map(|(i, (&z, &(fitted, synthetic)))| BuildStep {
                step_number: i + 1,
                layer_z: z,
                unit_count: fitted + synthetic,
                kind: match (fitted, synthetic) {
                    (_, 0) => StepKind::Standard,
                    (0, _) => StepKind::StructuralSupport,
                    _ => StepKind::Mixed,
                },
            })
            .collect();

        let mut stats = self.stats;
        stats.bounding_box = GridBounds::from_positions(units.iter().flat_map(|u| u.cells()));
        stats.unverified_units = units.iter().filter(|u| !u.verified).count();

        let mut manifest = Manifest {
            version: MANIFEST_SCHEMA_VERSION.to_string(),
            total_units: units.len(),
            units: units.iter().map(ManifestUnit::from).collect(),
            layer_counts,
            inventory: inventory
                .into_iter()
                .map(|((unit_id, color_id), quantity)| InventoryEntry {
                    unit_id,
                    color_id,
                    quantity,
                })
                .collect(),
            stats,
            steps,
            policy_params_hash: self.policy_params_hash,
            fingerprint: String::new(),
        };
        manifest.fingerprint = content_fingerprint(&manifest);
        manifest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::unit::{UnitCategory, UnitType};

    fn brick() -> UnitType {
        UnitType::new("3003", "Brick 2x2", 2, 2, UnitCategory::Standard)
    }

    fn placed(x: i32, y: i32, z: i32, color: u32) -> PlacedUnit {
        PlacedUnit::new(&brick(), GridPos::new(x, y, z), Rotation::R0, ColorId(color))
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = ManifestBuilder::new().build();
        assert_eq!(manifest.total_units, 0);
        assert!(manifest.is_empty());
        assert!(manifest.layer_counts.is_empty());
        assert!(manifest.stats.bounding_box.is_none());
        assert_eq!(manifest.version, MANIFEST_SCHEMA_VERSION);
        assert!(manifest.verify_fingerprint());
    }

    #[test]
    fn test_units_sorted_and_aggregated() {
        let support = placed(0, 0, 0, 4).synthetic();
        let manifest = ManifestBuilder::new()
            .units(vec![placed(2, 0, 1, 4), placed(0, 0, 1, 4), placed(0, 0, 0, 1), support])
            .policy_params_hash("abc")
            .build();

        assert_eq!(manifest.total_units, 4);
        assert_eq!(manifest.units[0].position.z, 0);
        assert_eq!(manifest.units[2].position, GridPos::new(0, 0, 1));
        assert_eq!(manifest.layer_counts.get(&0), Some(&2));
        assert_eq!(manifest.layer_counts.get(&1), Some(&2));
        assert_eq!(manifest.quantity_of(&"3003".into(), ColorId(4)), 3);
        assert_eq!(manifest.quantity_of(&"3003".into(), ColorId(1)), 1);
        assert_eq!(manifest.steps[0].kind, StepKind::Mixed);
        assert_eq!(manifest.steps[1].kind, StepKind::Standard);
        assert_eq!(manifest.stats.unverified_units, 4);
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = ManifestBuilder::new()
            .units(vec![placed(0, 0, 0, 1), placed(2, 0, 0, 1)])
            .build();
        let b = ManifestBuilder::new()
            .units(vec![placed(2, 0, 0, 1), placed(0, 0, 0, 1)])
            .build();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.to_canonical_json(), b.to_canonical_json());
    }

    #[test]
    fn test_tampering_breaks_fingerprint() {
        let mut manifest = ManifestBuilder::new().units(vec![placed(0, 0, 0, 1)]).build();
        manifest.units[0].verified = true;
        assert!(!manifest.verify_fingerprint());
    }

    #[test]
    fn test_wire_shape() {
        let manifest = ManifestBuilder::new().units(vec![placed(1, 2, 3, 4)]).build();
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["units"][0]["position"], serde_json::json!([1, 2, 3]));
        assert_eq!(value["units"][0]["rotation"], 0);
        assert_eq!(value["units"][0]["color_id"], 4);
        assert_eq!(value["layer_counts"]["3"], 1);
    }
}
