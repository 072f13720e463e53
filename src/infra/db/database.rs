//! SQLite database setup and connection management for diffit.
//! Handles database initialization, schema creation, and connection management.

use super::repository::{
    BaselineRepository, BuildRepository, DbConn, ProjectRepository, SnapshotRepository,
};
use anyhow::{Result, bail};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

const SCHEMA_VERSION: i32 = 1;

/// Database wrapper that manages the shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: DbConn,
}

impl Database {
    /// Create an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Create or open the database at a specific path
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let db = Self::from_connection(conn)?;
        log::debug!("Opened database at {}", path.display());
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

        let existing_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if existing_version == 0 {
            Self::create_schema(&conn)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if existing_version > SCHEMA_VERSION {
            bail!(
                "Database schema version {existing_version} is newer than supported version {SCHEMA_VERSION}"
            );
        }

        Ok(())
    }

    /// Get a handle to the shared connection
    pub fn connection(&self) -> DbConn {
        self.conn.clone()
    }

    pub fn project_repo(&self) -> ProjectRepository {
        ProjectRepository::new(self.connection())
    }

    pub fn build_repo(&self) -> BuildRepository {
        BuildRepository::new(self.connection())
    }

    pub fn snapshot_repo(&self) -> SnapshotRepository {
        SnapshotRepository::new(self.connection())
    }

    pub fn baseline_repo(&self) -> BaselineRepository {
        BaselineRepository::new(self.connection())
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                repository_url TEXT,
                default_branch TEXT NOT NULL DEFAULT 'main',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS builds (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                build_number INTEGER NOT NULL,
                branch TEXT NOT NULL,
                commit_sha TEXT,
                commit_message TEXT,
                pull_request_number INTEGER,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','processing','completed','failed')),
                total_snapshots INTEGER NOT NULL DEFAULT 0,
                changed_snapshots INTEGER NOT NULL DEFAULT 0,
                approved_snapshots INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT,
                UNIQUE(project_id, build_number),
                FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS baselines (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                branch TEXT NOT NULL,
                browser TEXT,
                viewport TEXT,
                image_path TEXT NOT NULL,
                width INTEGER,
                height INTEGER,
                source_snapshot_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                build_id TEXT NOT NULL,
                baseline_id TEXT,
                name TEXT NOT NULL,
                width INTEGER,
                height INTEGER,
                browser TEXT,
                viewport TEXT,
                base_image_path TEXT,
                comparison_image_path TEXT,
                diff_image_path TEXT,
                diff_percentage REAL,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending','processing','completed','failed')),
                review_status TEXT NOT NULL DEFAULT 'unreviewed' CHECK (review_status IN ('unreviewed','approved','rejected')),
                reviewed_by TEXT,
                reviewed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (review_status <> 'approved' OR comparison_image_path IS NOT NULL),
                FOREIGN KEY(build_id) REFERENCES builds(id) ON DELETE CASCADE,
                FOREIGN KEY(baseline_id) REFERENCES baselines(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_builds_project_branch ON builds(project_id, branch);
            CREATE INDEX IF NOT EXISTS idx_baselines_variant ON baselines(project_id, name, branch, browser, viewport);
            CREATE INDEX IF NOT EXISTS idx_snapshots_build_id ON snapshots(build_id);
            CREATE INDEX IF NOT EXISTS idx_snapshots_baseline_id ON snapshots(baseline_id);
            "#,
        )?;
        Ok(())
    }
}
