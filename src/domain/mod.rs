//! Domain types for diffit.
//! Projects own builds and baselines; builds own snapshots.

pub mod baseline;
pub mod build;
pub mod error;
pub mod pagination;
pub mod project;
pub mod snapshot;

pub use baseline::*;
pub use build::*;
pub use error::*;
pub use pagination::*;
pub use project::*;
pub use snapshot::*;
