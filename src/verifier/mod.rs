//! Catalog-verification collaborators.
//!
//! The assembler may ask an external service whether a unit type is
//! obtainable in a color. The service is optional: running without one
//! (see [`NoVerifier`]) leaves every unit unverified.

pub mod memo;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ColorId, UnitTypeId};

/// Outcome of one availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Confirmed available.
    Available,
    /// Confirmed unavailable.
    Unavailable,
    /// No answer (error or timeout).
    Unknown,
}

impl Availability {
    /// From a collaborator's boolean answer.
    pub fn from_bool(available: bool) -> Self {
        if available {
            Self::Available
        } else {
            Self::Unavailable
        }
    }
}

/// Trait for catalog-verification collaborators.
///
/// Implementations are typically network-bound; the assembler bounds their
/// concurrency and applies a per-call timeout.
#[async_trait]
pub trait CatalogVerifier: Send + Sync {
    /// Error type for failed lookups.
    type Error: std::error::Error + Send + Sync;

    /// Whether `unit_id` is obtainable in `color`.
    async fn is_available(&self, unit_id: &UnitTypeId, color: ColorId) -> Result<bool, Self::Error>;
}

/// Marker for running without a collaborator. Cannot be constructed.
#[derive(Debug, Clone, Copy)]
pub enum NoVerifier {}

#[async_trait]
impl CatalogVerifier for NoVerifier {
    type Error = std::convert::Infallible;

    async fn is_available(&self, _: &UnitTypeId, _: ColorId) -> Result<bool, Self::Error> {
        match *self {}
    }
}

pub use memo::{MemoStats, VerificationMemo};
pub use memory::{InMemoryCatalogVerifier, InMemoryVerifierError};
