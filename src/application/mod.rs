//! Application layer (use-cases, policies).
//!
//! The reconciliation engine lives here: pairing, baseline resolution, the
//! diff orchestrator, the upload pipeline and the review state machine.

pub mod catalog;
pub mod diff;
pub mod ingest;
pub mod ports;
pub mod reconcile;
pub mod resolver;
pub mod review;
pub mod tree;

pub use catalog::Catalog;
pub use diff::{DiffOrchestrator, DiffOutcome};
pub use ingest::{ComparisonSettings, SnapshotProcessor, SnapshotUpload};
pub use reconcile::{ComparisonPair, PairKind, reconcile, reconcile_with_diff_dir};
pub use resolver::BaselineResolver;
pub use review::{BatchReviewReport, ReviewOutcome, ReviewStateMachine};
pub use tree::{TreeReport, compare_trees};

#[cfg(test)]
mod tests;
