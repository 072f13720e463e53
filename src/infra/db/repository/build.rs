use super::{DbConn, new_id, now, parse_column, total_count};
use crate::domain::{Build, BuildStats, BuildStatus, NewBuild, Page, Pagination};
use anyhow::Result;
use rusqlite::{OptionalExtension, TransactionBehavior};

const BUILD_COLUMNS: &str = "id, project_id, build_number, branch, commit_sha, commit_message, \
     pull_request_number, status, total_snapshots, changed_snapshots, approved_snapshots, \
     created_at, updated_at, finished_at";

/// Repository for build operations.
pub struct BuildRepository {
    conn: DbConn,
}

impl BuildRepository {
    pub fn new(conn: DbConn) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Build> {
        Ok(Build {
            id: row.get(0)?,
            project_id: row.get(1)?,
            build_number: row.get(2)?,
            branch: row.get(3)?,
            commit_sha: row.get(4)?,
            commit_message: row.get(5)?,
            pull_request_number: row.get(6)?,
            status: parse_column(row, 7)?,
            stats: BuildStats {
                total_snapshots: row.get(8)?,
                changed_snapshots: row.get(9)?,
                approved_snapshots: row.get(10)?,
            },
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            finished_at: row.get(13)?,
        })
    }

    /// Insert a pending build numbered one past the project's highest build.
    pub fn create(&self, input: &NewBuild) -> Result<Build> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let build_number: u32 = tx.query_row(
            "SELECT COALESCE(MAX(build_number), 0) + 1 FROM builds WHERE project_id = ?1",
            [&input.project_id],
            |row| row.get(0),
        )?;

        let now = now();
        let build = Build {
            id: new_id(),
            project_id: input.project_id.clone(),
            build_number,
            branch: input.branch.clone(),
            commit_sha: input.commit_sha.clone(),
            commit_message: input.commit_message.clone(),
            pull_request_number: input.pull_request_number,
            status: BuildStatus::Pending,
            stats: BuildStats::default(),
            created_at: now.clone(),
            updated_at: now,
            finished_at: None,
        };

        tx.execute(
            r#"
            INSERT INTO builds (
                id, project_id, build_number, branch, commit_sha, commit_message,
                pull_request_number, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            rusqlite::params![
                build.id,
                build.project_id,
                build.build_number,
                build.branch,
                build.commit_sha,
                build.commit_message,
                build.pull_request_number,
                build.status.to_string(),
                build.created_at,
                build.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(build)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Build>> {
        let conn = self.conn.lock();
        let build = conn
            .query_row(
                &format!("SELECT {BUILD_COLUMNS} FROM builds WHERE id = ?1"),
                [id],
                Self::map_row,
            )
            .optional()?;
        Ok(build)
    }

    /// Builds of a project, highest build number first.
    pub fn list_by_project(&self, project_id: &str, pagination: Pagination) -> Result<Page<Build>> {
        let conn = self.conn.lock();
        let total = total_count(
            &conn,
            "SELECT COUNT(*) FROM builds WHERE project_id = ?1",
            [project_id],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {BUILD_COLUMNS} FROM builds WHERE project_id = ?1 \
             ORDER BY build_number DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![project_id, pagination.limit(), pagination.offset()],
            Self::map_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    pub fn list_by_branch(
        &self,
        project_id: &str,
        branch: &str,
        pagination: Pagination,
    ) -> Result<Page<Build>> {
        let conn = self.conn.lock();
        let total = total_count(
            &conn,
            "SELECT COUNT(*) FROM builds WHERE project_id = ?1 AND branch = ?2",
            [project_id, branch],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {BUILD_COLUMNS} FROM builds WHERE project_id = ?1 AND branch = ?2 \
             ORDER BY build_number DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![project_id, branch, pagination.limit(), pagination.offset()],
            Self::map_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    pub fn latest_by_branch(&self, project_id: &str, branch: &str) -> Result<Option<Build>> {
        let conn = self.conn.lock();
        let build = conn
            .query_row(
                &format!(
                    "SELECT {BUILD_COLUMNS} FROM builds WHERE project_id = ?1 AND branch = ?2 \
                     ORDER BY build_number DESC LIMIT 1"
                ),
                [project_id, branch],
                Self::map_row,
            )
            .optional()?;
        Ok(build)
    }

    /// Write a status; terminal statuses also stamp `finished_at`.
    /// Transition rules are enforced by the caller.
    pub fn update_status(&self, id: &str, status: BuildStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let now = now();
        let finished_at = status.is_terminal().then(|| now.clone());
        let changed = conn.execute(
            r#"
            UPDATE builds SET
                status = ?2,
                finished_at = COALESCE(?3, finished_at),
                updated_at = ?4
            WHERE id = ?1
            "#,
            rusqlite::params![id, status.to_string(), finished_at, now],
        )?;
        Ok(changed > 0)
    }

    /// Recompute the cached counters from the build's snapshot rows.
    pub fn update_stats(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            r#"
            UPDATE builds SET
                total_snapshots = (SELECT COUNT(*) FROM snapshots WHERE build_id = ?1),
                changed_snapshots = (
                    SELECT COUNT(*) FROM snapshots WHERE build_id = ?1 AND diff_percentage > 0
                ),
                approved_snapshots = (
                    SELECT COUNT(*) FROM snapshots WHERE build_id = ?1 AND review_status = 'approved'
                ),
                updated_at = ?2
            WHERE id = ?1
            "#,
            rusqlite::params![id, now()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM builds WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}
