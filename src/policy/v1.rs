//! AssemblyPolicy v1: knobs for fitting, auditing and verification.
//!
//! ## Params Hash
//!
//! `params_hash` covers only the fields that change the manifest. Execution
//! knobs (`parallel`, `max_grid_cells`, the verification concurrency,
//! timeout and memo size) are excluded, so a manifest's recorded hash identifies the build rules
//! regardless of how the run was scheduled.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::types::{ColorId, UnitCategory};
use crate::voxelizer::DEFAULT_MAX_GRID_CELLS;
use crate::DEFAULT_POLICY_VERSION;

/// Error loading a policy.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Malformed JSON.
    #[error("Invalid policy JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field is out of range.
    #[error("Invalid policy: {0}")]
    Invalid(String),
}

/// Catalog verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSettings {
    /// Maximum in-flight verification calls.
    pub max_concurrency: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Per-run memo capacity.
    pub memo_capacity: usize,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout_ms: 2000,
            memo_capacity: 4096,
        }
    }
}

/// Hashed subset of the policy.
#[derive(Debug, Clone, Serialize)]
struct HashedPolicyParams<'a> {
    version: &'a str,
    anchor_layer: Option<i32>,
    seam_tolerance: usize,
    max_interlock_merges: usize,
    fit_categories: &'a [UnitCategory],
    match_color: bool,
    default_color: ColorId,
}

/// Assembly policy version 1.
///
/// ## Parameters
///
/// - `anchor_layer`: Layer connectivity is measured from (`None` = lowest occupied)
/// - `seam_tolerance`: Longest allowed run of coincident seams
/// - `max_interlock_merges`: Bridge budget per layer pair
/// - `fit_categories`: Unit categories the fitter may place
/// - `match_color`: Restrict each unit to cells of one color
/// - `default_color`: Color for uncolored meshes
/// - `parallel`: Fit and voxelize on the rayon pool
/// - `max_grid_cells`: Largest voxel grid a mesh may be sampled into
/// - `verification`: Catalog verification limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyPolicyV1 {
    /// Policy version identifier.
    pub version: String,
    /// Anchor layer.
    pub anchor_layer: Option<i32>,
    /// Allowed coincident seam run length.
    pub seam_tolerance: usize,
    /// Maximum bridges per layer pair.
    pub max_interlock_merges: usize,
    /// Categories used for fitting.
    pub fit_categories: Vec<UnitCategory>,
    /// Single-colored units only.
    pub match_color: bool,
    /// Color for uncolored input.
    pub default_color: ColorId,
    /// Use data parallelism.
    pub parallel: bool,
    /// Cap on sampled grid cells per mesh.
    pub max_grid_cells: u64,
    /// Verification limits.
    pub verification: VerificationSettings,
}

impl AssemblyPolicyV1 {
    /// Get the policy ID.
    pub fn policy_id(&self) -> &str {
        &self.version
    }

    /// Parse from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.fit_categories.is_empty() {
            return Err(PolicyError::Invalid("fit_categories is empty".into()));
        }
        if self.max_grid_cells == 0 {
            return Err(PolicyError::Invalid("max_grid_cells must be positive".into()));
        }
        if self.verification.max_concurrency == 0 {
            return Err(PolicyError::Invalid(
                "verification.max_concurrency must be positive".into(),
            ));
        }
        if self.verification.timeout_ms == 0 {
            return Err(PolicyError::Invalid(
                "verification.timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Hash of the output-affecting parameters.
    pub fn params_hash(&self) -> String {
        let mut categories = self.fit_categories.clone();
        categories.sort();
        categories.dedup();
        canonical_hash_hex(&HashedPolicyParams {
            version: &self.version,
            anchor_layer: self.anchor_layer,
            seam_tolerance: self.seam_tolerance,
            max_interlock_merges: self.max_interlock_merges,
            fit_categories: &categories,
            match_color: self.match_color,
            default_color: self.default_color,
        })
    }

    /// Sequential policy for tests.
    #[cfg(test)]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

impl Default for AssemblyPolicyV1 {
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            anchor_layer: Some(0),
            seam_tolerance: 0,
            max_interlock_merges: 1024,
            fit_categories: vec![UnitCategory::Standard],
            match_color: true,
            default_color: ColorId(15),
            parallel: true,
            max_grid_cells: DEFAULT_MAX_GRID_CELLS,
            verification: VerificationSettings::default(),
        }
    }
}
