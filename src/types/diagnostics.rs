//! Non-fatal conditions recorded during a run.
//!
//! Only geometry errors abort a run. Everything else the pipeline notices is
//! recorded here and returned alongside the manifest.
//!
//! | Kind | Severity | Raised by |
//! |------|----------|-----------|
//! | `EmptyResult` | WARNING | pipeline |
//! | `FittingFallback` | INFO | fitter |
//! | `UnresolvedSeam` | WARNING | interlock auditor |
//! | `DisconnectedCluster` | INFO | connectivity auditor |
//! | `VerificationTimeout` | WARNING | assembler |
//! | `VerificationFailed` | WARNING | assembler |
//! | `Substitution` | INFO | assembler |
//! | `UnitUnverified` | WARNING | assembler |

use serde::{Deserialize, Serialize};

use super::color::ColorId;
use super::grid::{GridBounds, GridPos};
use super::unit::UnitTypeId;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational.
    Info,
    /// Degraded output, still usable.
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
        }
    }
}

/// Seam orientation. `X` is the edge between `(x, y)` and `(x + 1, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeamAxis {
    /// Edge crossing the x axis.
    X,
    /// Edge crossing the y axis.
    Y,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// No occupied cells; the manifest is empty.
    EmptyResult {
        /// Why nothing was produced.
        reason: String,
    },
    /// A layer needed single-cell units.
    FittingFallback {
        /// Layer.
        z: i32,
        /// Single-cell units placed in the layer.
        single_cell_units: usize,
    },
    /// A coincident seam run could not be bridged.
    UnresolvedSeam {
        /// Lower layer of the pair.
        lower_z: i32,
        /// First edge of the run.
        start: GridPos,
        /// Edge orientation.
        axis: SeamAxis,
        /// Edges in the run.
        run_length: usize,
    },
    /// Cells not reachable from the anchor layer were supported.
    DisconnectedCluster {
        /// Cells in the cluster.
        cell_count: usize,
        /// Lowest cell of the cluster.
        lowest: GridPos,
        /// Cluster bounds.
        bounds: GridBounds,
        /// Support units inserted for it.
        supports_added: usize,
    },
    /// Catalog collaborator did not answer in time.
    VerificationTimeout {
        /// Unit type queried.
        unit_id: UnitTypeId,
        /// Color queried.
        color_id: ColorId,
        /// Timeout applied.
        timeout_ms: u64,
    },
    /// Catalog collaborator returned an error.
    VerificationFailed {
        /// Unit type queried.
        unit_id: UnitTypeId,
        /// Color queried.
        color_id: ColorId,
        /// Error message.
        error: String,
    },
    /// An unavailable unit was replaced by smaller available units.
    Substitution {
        /// Replaced type.
        original: UnitTypeId,
        /// Anchor of the replaced unit.
        position: GridPos,
        /// Replacement types, in placement order.
        replacements: Vec<UnitTypeId>,
    },
    /// An unavailable unit had no substitute and is kept unverified.
    UnitUnverified {
        /// Unit type.
        unit_id: UnitTypeId,
        /// Color.
        color_id: ColorId,
        /// Anchor.
        position: GridPos,
    },
}

impl DiagnosticKind {
    /// Severity of this kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::FittingFallback { .. }
            | Self::DisconnectedCluster { .. }
            | Self::Substitution { .. } => Severity::Info,
            Self::EmptyResult { .. }
            | Self::UnresolvedSeam { .. }
            | Self::VerificationTimeout { .. }
            | Self::VerificationFailed { .. }
            | Self::UnitUnverified { .. } => Severity::Warning,
        }
    }

    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyResult { .. } => "EMPTY_RESULT",
            Self::FittingFallback { .. } => "FITTING_FALLBACK",
            Self::UnresolvedSeam { .. } => "UNRESOLVED_SEAM",
            Self::DisconnectedCluster { .. } => "DISCONNECTED_CLUSTER",
            Self::VerificationTimeout { .. } => "VERIFICATION_TIMEOUT",
            Self::VerificationFailed { .. } => "VERIFICATION_FAILED",
            Self::Substitution { .. } => "SUBSTITUTION",
            Self::UnitUnverified { .. } => "UNIT_UNVERIFIED",
        }
    }
}

/// A recorded non-fatal condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// What happened.
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    /// Severity level.
    pub severity: Severity,
    /// Stable machine code.
    pub code: String,
    /// Pipeline stage that raised it.
    pub stage: String,
}

impl Diagnostic {
    /// Create a diagnostic.
    pub fn new(kind: DiagnosticKind, stage: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            code: kind.code().to_string(),
            stage: stage.into(),
            kind,
        }
    }

    /// Log this diagnostic as a structured event.
    pub fn log(&self) {
        match self.severity {
            Severity::Info => tracing::info!(
                code = %self.code,
                stage = %self.stage,
                detail = ?self.kind,
                "assembly diagnostic"
            ),
            Severity::Warning => tracing::warn!(
                code = %self.code,
                stage = %self.stage,
                detail = ?self.kind,
                "assembly diagnostic"
            ),
        }
    }
}

/// Ordered list of diagnostics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a diagnostic.
    pub fn record(&mut self, kind: DiagnosticKind, stage: &str) {
        let diagnostic = Diagnostic::new(kind, stage);
        diagnostic.log();
        self.0.push(diagnostic);
    }

    /// Append another list.
    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// All diagnostics in record order.
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Diagnostics with a given code.
    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.0.iter().filter(move |d| d.code == code)
    }

    /// Whether any diagnostic has the code.
    pub fn has_code(&self, code: &str) -> bool {
        self.with_code(code).next().is_some()
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest severity present.
    pub fn max_severity(&self) -> Option<Severity> {
        self.0.iter().map(|d| d.severity).max()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        let fallback = DiagnosticKind::FittingFallback { z: 0, single_cell_units: 2 };
        assert_eq!(fallback.severity(), Severity::Info);

        let seam = DiagnosticKind::UnresolvedSeam {
            lower_z: 0,
            start: GridPos::new(1, 0, 0),
            axis: SeamAxis::X,
            run_length: 2,
        };
        assert_eq!(seam.severity(), Severity::Warning);
        assert_eq!(seam.code(), "UNRESOLVED_SEAM");
    }

    #[test]
    fn test_serializes_tagged() {
        let d = Diagnostic::new(
            DiagnosticKind::EmptyResult { reason: "no cells".into() },
            "pipeline",
        );
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value["type"], "empty_result");
        assert_eq!(value["severity"], "WARNING");
        assert_eq!(value["code"], "EMPTY_RESULT");
        assert_eq!(value["reason"], "no cells");
    }

    #[test]
    fn test_collection_queries() {
        let mut list = Diagnostics::new();
        assert_eq!(list.max_severity(), None);
        list.record(DiagnosticKind::FittingFallback { z: 1, single_cell_units: 1 }, "fitter");
        list.record(DiagnosticKind::FittingFallback { z: 2, single_cell_units: 3 }, "fitter");
        assert_eq!(list.len(), 2);
        assert_eq!(list.with_code("FITTING_FALLBACK").count(), 2);
        assert!(!list.has_code("EMPTY_RESULT"));
        assert_eq!(list.max_severity(), Some(Severity::Info));
    }
}
