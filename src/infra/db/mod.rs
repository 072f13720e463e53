//! SQLite persistence (infrastructure).

pub mod database;
pub mod repository;

pub use database::Database;
pub use repository::{
    BaselineRepository, BuildRepository, DbConn, ProjectRepository, SnapshotFilter,
    SnapshotRepository,
};
