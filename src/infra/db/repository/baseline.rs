use super::{DbConn, new_id, now, total_count};
use crate::application::ports::BaselineLookup;
use crate::domain::{Baseline, BaselineUpsert, Page, Pagination, VariantKey};
use anyhow::Result;
use rusqlite::{OptionalExtension, TransactionBehavior};

const BASELINE_COLUMNS: &str = "id, project_id, name, branch, browser, viewport, image_path, \
     width, height, source_snapshot_id, created_at, updated_at";

// `IS` so that a NULL browser or viewport only matches NULL.
const KEY_PREDICATE: &str =
    "project_id = ?1 AND name = ?2 AND branch = ?3 AND browser IS ?4 AND viewport IS ?5";

/// Repository for baseline operations.
pub struct BaselineRepository {
    conn: DbConn,
}

impl BaselineRepository {
    pub fn new(conn: DbConn) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Baseline> {
        Ok(Baseline {
            id: row.get(0)?,
            key: VariantKey {
                project_id: row.get(1)?,
                name: row.get(2)?,
                branch: row.get(3)?,
                browser: row.get(4)?,
                viewport: row.get(5)?,
            },
            image_path: row.get(6)?,
            width: row.get(7)?,
            height: row.get(8)?,
            source_snapshot_id: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    /// Insert or update the baseline for `input.key`.
    ///
    /// Returns the stored baseline and the image path it replaced, if that path
    /// differs from the new one.
    pub fn upsert(&self, input: &BaselineUpsert) -> Result<(Baseline, Option<String>)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = &input.key;
        let now = now();

        let existing: Option<(String, String, String)> = tx
            .query_row(
                &format!("SELECT id, image_path, created_at FROM baselines WHERE {KEY_PREDICATE}"),
                rusqlite::params![key.project_id, key.name, key.branch, key.browser, key.viewport],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (id, created_at, replaced) = match existing {
            Some((id, old_path, created_at)) => {
                tx.execute(
                    r#"
                    UPDATE baselines SET
                        image_path = ?2,
                        width = ?3,
                        height = ?4,
                        source_snapshot_id = ?5,
                        updated_at = ?6
                    WHERE id = ?1
                    "#,
                    rusqlite::params![
                        id,
                        input.image_path,
                        input.width,
                        input.height,
                        input.source_snapshot_id,
                        now,
                    ],
                )?;
                let replaced = (old_path != input.image_path).then_some(old_path);
                (id, created_at, replaced)
            }
            None => {
                let id = new_id();
                tx.execute(
                    r#"
                    INSERT INTO baselines (
                        id, project_id, name, branch, browser, viewport, image_path,
                        width, height, source_snapshot_id, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                    "#,
                    rusqlite::params![
                        id,
                        key.project_id,
                        key.name,
                        key.branch,
                        key.browser,
                        key.viewport,
                        input.image_path,
                        input.width,
                        input.height,
                        input.source_snapshot_id,
                        now,
                    ],
                )?;
                (id, now.clone(), None)
            }
        };
        tx.commit()?;

        let baseline = Baseline {
            id,
            key: key.clone(),
            image_path: input.image_path.clone(),
            width: input.width,
            height: input.height,
            source_snapshot_id: input.source_snapshot_id.clone(),
            created_at,
            updated_at: now,
        };
        Ok((baseline, replaced))
    }

    pub fn find_by_key(&self, key: &VariantKey) -> Result<Option<Baseline>> {
        let conn = self.conn.lock();
        let baseline = conn
            .query_row(
                &format!("SELECT {BASELINE_COLUMNS} FROM baselines WHERE {KEY_PREDICATE}"),
                rusqlite::params![key.project_id, key.name, key.branch, key.browser, key.viewport],
                Self::map_row,
            )
            .optional()?;
        Ok(baseline)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Baseline>> {
        let conn = self.conn.lock();
        let baseline = conn
            .query_row(
                &format!("SELECT {BASELINE_COLUMNS} FROM baselines WHERE id = ?1"),
                [id],
                Self::map_row,
            )
            .optional()?;
        Ok(baseline)
    }

    /// Baselines of a project ordered by name, optionally restricted to one branch.
    pub fn list(
        &self,
        project_id: &str,
        branch: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Baseline>> {
        let conn = self.conn.lock();
        let total = total_count(
            &conn,
            "SELECT COUNT(*) FROM baselines WHERE project_id = ?1 AND (?2 IS NULL OR branch = ?2)",
            rusqlite::params![project_id, branch],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {BASELINE_COLUMNS} FROM baselines \
             WHERE project_id = ?1 AND (?2 IS NULL OR branch = ?2) \
             ORDER BY name, branch, id LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![project_id, branch, pagination.limit(), pagination.offset()],
            Self::map_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM baselines WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

impl BaselineLookup for BaselineRepository {
    fn find_by_key(&self, key: &VariantKey) -> Result<Option<Baseline>> {
        BaselineRepository::find_by_key(self, key)
    }
}
