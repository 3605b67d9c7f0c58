//! In-memory catalog verifier for testing and offline hosts.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::CatalogVerifier;
use crate::types::{ColorId, UnitTypeId};

/// Error type for the in-memory verifier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryVerifierError {
    /// Simulated unreachable backend for this unit type.
    #[error("Catalog backend unreachable for unit {0}")]
    Unreachable(UnitTypeId),
}

/// Availability table held in memory.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. Lookups for
/// pairs not in the table answer `default_available`.
#[derive(Debug, Default)]
pub struct InMemoryCatalogVerifier {
    /// Explicit answers by `(unit, color)`.
    table: BTreeMap<(UnitTypeId, ColorId), bool>,
    /// Unit types that are unavailable in every color.
    unavailable_units: BTreeSet<UnitTypeId>,
    /// Unit types whose lookups fail.
    unreachable: BTreeSet<UnitTypeId>,
    /// Answer for pairs not in the table.
    default_available: bool,
    /// Artificial latency per call.
    delay: Option<Duration>,
    /// Calls received.
    calls: AtomicUsize,
}

impl InMemoryCatalogVerifier {
    /// Verifier that reports everything available.
    pub fn all_available() -> Self {
        Self {
            default_available: true,
            ..Self::default()
        }
    }

    /// Verifier that reports everything unavailable.
    pub fn none_available() -> Self {
        Self::default()
    }

    /// Set the answer for one `(unit, color)` pair.
    pub fn with_entry(mut self, unit_id: impl Into<String>, color: ColorId, available: bool) -> Self {
        self.table.insert((UnitTypeId::new(unit_id), color), available);
        self
    }

    /// Mark a unit type unavailable in every color not explicitly listed.
    pub fn with_unavailable_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.unavailable_units.insert(UnitTypeId::new(unit_id));
        self
    }

    /// Make lookups for a unit type fail.
    pub fn with_unreachable(mut self, unit_id: impl Into<String>) -> Self {
        self.unreachable.insert(UnitTypeId::new(unit_id));
        self
    }

    /// Delay every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of lookups received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogVerifier for InMemoryCatalogVerifier {
    type Error = InMemoryVerifierError;

    async fn is_available(&self, unit_id: &UnitTypeId, color: ColorId) -> Result<bool, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable.contains(unit_id) {
            return Err(InMemoryVerifierError::Unreachable(unit_id.clone()));
        }

        if let Some(&answer) = self.table.get(&(unit_id.clone(), color)) {
            return Ok(answer);
        }
        if self.unavailable_units.contains(unit_id) {
            return Ok(false);
        }
        Ok(self.default_available)
    }
}
