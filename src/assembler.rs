//! Manifest Assembler: verification, substitution and manifest output.
//!
//! With a catalog-verification collaborator configured, every distinct
//! `(unit type, color)` pair in the final unit set is checked once. Calls run
//! concurrently on tokio, bounded by a semaphore, each under a timeout. A
//! failed or timed-out call leaves the affected units unverified; it never
//! aborts the run.
//!
//! Units reported unavailable are replaced by a greedy tiling of their own
//! footprint using smaller same-category types that are available in the
//! same color. If no complete tiling exists the unit is kept, unverified.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::UnitCatalog;
use crate::fitter::greedy_tile;
use crate::policy::VerificationSettings;
use crate::types::{
    ColorId, DiagnosticKind, Diagnostics, GridPos, Manifest, ManifestBuilder, ManifestStats,
    PlacedUnit, UnitType, UnitTypeId,
};
use crate::verifier::{Availability, CatalogVerifier, NoVerifier, VerificationMemo};

const STAGE: &str = "assembler";

type VerifyKey = (UnitTypeId, ColorId);

/// Answer from one verification task.
enum CallOutcome {
    Answer(bool),
    Failed(String),
    TimedOut,
}

/// Builds manifests, optionally verifying availability first.
pub struct ManifestAssembler<V: CatalogVerifier = NoVerifier> {
    catalog: Arc<UnitCatalog>,
    verifier: Option<Arc<V>>,
    settings: VerificationSettings,
    policy_params_hash: String,
}

impl ManifestAssembler<NoVerifier> {
    /// Assembler without a collaborator: every unit stays unverified.
    pub fn offline(catalog: Arc<UnitCatalog>, policy_params_hash: impl Into<String>) -> Self {
        Self::from_parts(
            catalog,
            None,
            VerificationSettings::default(),
            policy_params_hash.into(),
        )
    }
}

impl<V: CatalogVerifier> ManifestAssembler<V> {
    pub(crate) fn from_parts(
        catalog: Arc<UnitCatalog>,
        verifier: Option<Arc<V>>,
        settings: VerificationSettings,
        policy_params_hash: String,
    ) -> Self {
        Self {
            catalog,
            verifier,
            settings,
            policy_params_hash,
        }
    }
}

impl<V> ManifestAssembler<V>
where
    V: CatalogVerifier + 'static,
{
    /// Assembler that verifies through `verifier`.
    pub fn with_verifier(
        catalog: Arc<UnitCatalog>,
        verifier: Arc<V>,
        settings: VerificationSettings,
        policy_params_hash: impl Into<String>,
    ) -> Self {
        Self::from_parts(catalog, Some(verifier), settings, policy_params_hash.into())
    }

    /// Build the manifest for a final unit set.
    ///
    /// `stats` carries counts from earlier stages; substitutions, bounds and
    /// the unverified count are filled in here.
    pub async fn assemble(
        &self,
        mut units: Vec<PlacedUnit>,
        mut stats: ManifestStats,
        diagnostics: &mut Diagnostics,
    ) -> Manifest {
        units.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });

        let units = match &self.verifier {
            Some(verifier) => {
                self.verify_and_substitute(verifier, units, &mut stats, diagnostics)
                    .await
            }
            None => units,
        };

        let manifest = ManifestBuilder::new()
            .units(units)
            .stats(stats)
            .policy_params_hash(self.policy_params_hash.clone())
            .build();

        tracing::info!(
            total_units = manifest.total_units,
            unverified = manifest.stats.unverified_units,
            substitutions = manifest.stats.substitutions,
            fingerprint = %manifest.fingerprint,
            "Manifest assembled"
        );
        manifest
    }

    async fn verify_and_substitute(
        &self,
        verifier: &Arc<V>,
        units: Vec<PlacedUnit>,
        stats: &mut ManifestStats,
        diagnostics: &mut Diagnostics,
    ) -> Vec<PlacedUnit> {
        let memo = VerificationMemo::new(self.settings.memo_capacity);

        let keys: BTreeSet<VerifyKey> = units
            .iter()
            .map(|u| (u.unit_id.clone(), u.color))
            .collect();
        let mut outcomes = self.verify_keys(verifier, keys, &memo, diagnostics).await;

        // Substitutes for unavailable units need their own checks.
        let mut needed: BTreeSet<VerifyKey> = BTreeSet::new();
        for unit in &units {
            if outcomes.get(&(unit.unit_id.clone(), unit.color)) != Some(&Availability::Unavailable) {
                continue;
            }
            if let Some(unit_type) = self.catalog.get(&unit.unit_id) {
                for smaller in self.catalog.smaller_than(unit_type) {
                    needed.insert((smaller.id.clone(), unit.color));
                }
            }
        }
        needed.retain(|key| !outcomes.contains_key(key));
        if !needed.is_empty() {
            let extra = self.verify_keys(verifier, needed, &memo, diagnostics).await;
            outcomes.extend(extra);
        }

        let mut out = Vec::with_capacity(units.len());
        for mut unit in units {
            let outcome = outcomes
                .get(&(unit.unit_id.clone(), unit.color))
                .copied()
                .unwrap_or(Availability::Unknown);
            match outcome {
                Availability::Available => {
                    unit.verified = true;
                    out.push(unit);
                }
                Availability::Unknown => out.push(unit),
                Availability::Unavailable => match self.substitute(&unit, &outcomes) {
                    Some(replacements) => {
                        stats.substitutions += 1;
                        diagnostics.record(
                            DiagnosticKind::Substitution {
                                original: unit.unit_id.clone(),
                                position: unit.position,
                                replacements: replacements.iter().map(|u| u.unit_id.clone()).collect(),
                            },
                            STAGE,
                        );
                        out.extend(replacements);
                    }
                    None => {
                        diagnostics.record(
                            DiagnosticKind::UnitUnverified {
                                unit_id: unit.unit_id.clone(),
                                color_id: unit.color,
                                position: unit.position,
                            },
                            STAGE,
                        );
                        out.push(unit);
                    }
                },
            }
        }

        let memo_stats = memo.stats();
        tracing::debug!(
            memo_entries = memo_stats.len,
            memo_hits = memo_stats.hits,
            "Verification memo"
        );
        out
    }

    /// Replace an unavailable unit with smaller available units covering
    /// exactly its cells.
    fn substitute(
        &self,
        unit: &PlacedUnit,
        outcomes: &BTreeMap<VerifyKey, Availability>,
    ) -> Option<Vec<PlacedUnit>> {
        let unit_type = self.catalog.get(&unit.unit_id)?;
        let candidates: Vec<UnitType> = self
            .catalog
            .smaller_than(unit_type)
            .into_iter()
            .filter(|t| {
                outcomes.get(&(t.id.clone(), unit.color)) == Some(&Availability::Available)
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let cells: BTreeMap<GridPos, ColorId> =
            unit.cells().into_iter().map(|c| (c, unit.color)).collect();
        let tiling = greedy_tile(&cells, &candidates, true);
        if !tiling.is_complete() {
            return None;
        }

        Some(
            tiling
                .units
                .into_iter()
                .map(|mut u| {
                    u.verified = true;
                    u.synthetic = unit.synthetic;
                    u
                })
                .collect(),
        )
    }

    /// Check each key once, concurrently, consulting the memo first.
    async fn verify_keys(
        &self,
        verifier: &Arc<V>,
        keys: BTreeSet<VerifyKey>,
        memo: &VerificationMemo,
        diagnostics: &mut Diagnostics,
    ) -> BTreeMap<VerifyKey, Availability> {
        let mut outcomes: BTreeMap<VerifyKey, Availability> = BTreeMap::new();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let mut tasks: JoinSet<(VerifyKey, CallOutcome)> = JoinSet::new();

        for key in &keys {
            if let Some(known) = memo.get(&key.0, key.1) {
                outcomes.insert(key.clone(), known);
                continue;
            }

            let verifier = Arc::clone(verifier);
            let semaphore = Arc::clone(&semaphore);
            let key = key.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (key, CallOutcome::Failed("verification pool closed".into()));
                };
                let call = verifier.is_available(&key.0, key.1);
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(available)) => CallOutcome::Answer(available),
                    Ok(Err(e)) => CallOutcome::Failed(e.to_string()),
                    Err(_) => CallOutcome::TimedOut,
                };
                (key, outcome)
            });
        }

        let mut notes: BTreeMap<VerifyKey, DiagnosticKind> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (key, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "Verification task failed");
                    continue;
                }
            };
            let availability = match outcome {
                CallOutcome::Answer(available) => Availability::from_bool(available),
                CallOutcome::Failed(error) => {
                    notes.insert(
                        key.clone(),
                        DiagnosticKind::VerificationFailed {
                            unit_id: key.0.clone(),
                            color_id: key.1,
                            error,
                        },
                    );
                    Availability::Unknown
                }
                CallOutcome::TimedOut => {
                    notes.insert(
                        key.clone(),
                        DiagnosticKind::VerificationTimeout {
                            unit_id: key.0.clone(),
                            color_id: key.1,
                            timeout_ms: self.settings.timeout_ms,
                        },
                    );
                    Availability::Unknown
                }
            };
            memo.put(&key.0, key.1, availability);
            outcomes.insert(key, availability);
        }

        for key in keys {
            if !outcomes.contains_key(&key) {
                notes.insert(
                    key.clone(),
                    DiagnosticKind::VerificationFailed {
                        unit_id: key.0.clone(),
                        color_id: key.1,
                        error: "verification task aborted".into(),
                    },
                );
                outcomes.insert(key, Availability::Unknown);
            }
        }
        for note in notes.into_values() {
            diagnostics.record(note, STAGE);
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rotation, UnitCategory};
    use crate::verifier::InMemoryCatalogVerifier;

    fn catalog() -> Arc<UnitCatalog> {
        Arc::new(
            UnitCatalog::new(vec![
                UnitType::new("3001", "Brick 2x4", 4, 2, UnitCategory::Standard),
                UnitType::new("3003", "Brick 2x2", 2, 2, UnitCategory::Standard),
                UnitType::new("3005", "Brick 1x1", 1, 1, UnitCategory::Standard),
            ])
            .unwrap(),
        )
    }

    fn brick(catalog: &UnitCatalog, id: &str, x: i32, color: u32) -> PlacedUnit {
        let ty = catalog.get(&id.into()).unwrap();
        PlacedUnit::new(ty, GridPos::new(x, 0, 0), Rotation::R0, ColorId(color))
    }

    fn settings(timeout_ms: u64) -> VerificationSettings {
        VerificationSettings {
            max_concurrency: 2,
            timeout_ms,
            memo_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_offline_leaves_units_unverified() {
        let catalog = catalog();
        let assembler = ManifestAssembler::offline(catalog.clone(), "hash");
        let units = vec![brick(&catalog, "3001", 0, 4)];
        let mut diagnostics = Diagnostics::new();
        let manifest = assembler
            .assemble(units, ManifestStats::default(), &mut diagnostics)
            .await;
        assert_eq!(manifest.total_units, 1);
        assert!(!manifest.units[0].verified);
        assert_eq!(manifest.stats.unverified_units, 1);
        assert_eq!(manifest.policy_params_hash, "hash");
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_available_units_are_verified_once_per_pair() {
        let catalog = catalog();
        let verifier = Arc::new(InMemoryCatalogVerifier::all_available());
        let assembler =
            ManifestAssembler::with_verifier(catalog.clone(), verifier.clone(), settings(1000), "h");
        let units = vec![
            brick(&catalog, "3001", 0, 4),
            brick(&catalog, "3001", 4, 4),
            brick(&catalog, "3001", 8, 1),
        ];
        let manifest = assembler
            .assemble(units, ManifestStats::default(), &mut Diagnostics::new())
            .await;
        assert!(manifest.units.iter().all(|u| u.verified));
        assert_eq!(verifier.call_count(), 2);
        assert_eq!(manifest.stats.unverified_units, 0);
    }

    #[tokio::test]
    async fn test_unavailable_unit_is_substituted() {
        let catalog = catalog();
        let verifier = Arc::new(
            InMemoryCatalogVerifier::all_available().with_entry("3001", ColorId(4), false),
        );
        let assembler =
            ManifestAssembler::with_verifier(catalog.clone(), verifier, settings(1000), "h");
        let mut diagnostics = Diagnostics::new();
        let manifest = assembler
            .assemble(
                vec![brick(&catalog, "3001", 0, 4)],
                ManifestStats::default(),
                &mut diagnostics,
            )
            .await;

        assert_eq!(manifest.total_units, 2);
        assert!(manifest.units.iter().all(|u| u.unit_id.as_str() == "3003" && u.verified));
        assert_eq!(manifest.units[1].position, GridPos::new(2, 0, 0));
        assert_eq!(manifest.stats.substitutions, 1);
        assert!(diagnostics.has_code("SUBSTITUTION"));
    }

    #[tokio::test]
    async fn test_unsubstitutable_unit_is_kept_unverified() {
        let catalog = catalog();
        let verifier = Arc::new(InMemoryCatalogVerifier::none_available());
        let assembler =
            ManifestAssembler::with_verifier(catalog.clone(), verifier, settings(1000), "h");
        let mut diagnostics = Diagnostics::new();
        let manifest = assembler
            .assemble(
                vec![brick(&catalog, "3001", 0, 4)],
                ManifestStats::default(),
                &mut diagnostics,
            )
            .await;

        assert_eq!(manifest.total_units, 1);
        assert_eq!(manifest.units[0].unit_id.as_str(), "3001");
        assert!(!manifest.units[0].verified);
        assert!(diagnostics.has_code("UNIT_UNVERIFIED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_unverified() {
        let catalog = catalog();
        let verifier = Arc::new(
            InMemoryCatalogVerifier::all_available().with_delay(Duration::from_secs(10)),
        );
        let assembler =
            ManifestAssembler::with_verifier(catalog.clone(), verifier, settings(100), "h");
        let mut diagnostics = Diagnostics::new();
        let manifest = assembler
            .assemble(
                vec![brick(&catalog, "3003", 0, 1)],
                ManifestStats::default(),
                &mut diagnostics,
            )
            .await;

        assert_eq!(manifest.total_units, 1);
        assert!(!manifest.units[0].verified);
        assert!(diagnostics.has_code("VERIFICATION_TIMEOUT"));
    }

    #[tokio::test]
    async fn test_backend_error_degrades_to_unverified() {
        let catalog = catalog();
        let verifier = Arc::new(InMemoryCatalogVerifier::all_available().with_unreachable("3005"));
        let assembler =
            ManifestAssembler::with_verifier(catalog.clone(), verifier, settings(1000), "h");
        let mut diagnostics = Diagnostics::new();
        let manifest = assembler
            .assemble(
                vec![brick(&catalog, "3005", 0, 1), brick(&catalog, "3003", 1, 1)],
                ManifestStats::default(),
                &mut diagnostics,
            )
            .await;

        let single = manifest.units.iter().find(|u| u.unit_id.as_str() == "3005").unwrap();
        assert!(!single.verified);
        let square = manifest.units.iter().find(|u| u.unit_id.as_str() == "3003").unwrap();
        assert!(square.verified);
        assert!(diagnostics.has_code("VERIFICATION_FAILED"));
    }
}
