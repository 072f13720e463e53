use super::{DbConn, new_id, now, parse_column, total_count};
use crate::domain::{
    NewSnapshot, Page, Pagination, ReviewDecision, ReviewStatus, Snapshot, SnapshotImages,
    SnapshotStatus,
};
use anyhow::Result;
use rusqlite::OptionalExtension;

const SNAPSHOT_COLUMNS: &str = "id, build_id, baseline_id, name, width, height, browser, \
     viewport, base_image_path, comparison_image_path, diff_image_path, diff_percentage, \
     status, review_status, reviewed_by, reviewed_at, created_at, updated_at";

/// Optional narrowing for snapshot listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub review_status: Option<ReviewStatus>,
}

/// Repository for snapshot operations.
pub struct SnapshotRepository {
    conn: DbConn,
}

impl SnapshotRepository {
    pub fn new(conn: DbConn) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
        Ok(Snapshot {
            id: row.get(0)?,
            build_id: row.get(1)?,
            baseline_id: row.get(2)?,
            name: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            browser: row.get(6)?,
            viewport: row.get(7)?,
            base_image_path: row.get(8)?,
            comparison_image_path: row.get(9)?,
            diff_image_path: row.get(10)?,
            diff_percentage: row.get(11)?,
            status: parse_column(row, 12)?,
            review_status: parse_column(row, 13)?,
            reviewed_by: row.get(14)?,
            reviewed_at: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    /// Insert a pending, unreviewed snapshot.
    pub fn create(&self, build_id: &str, input: &NewSnapshot) -> Result<Snapshot> {
        let now = now();
        let snapshot = Snapshot {
            id: new_id(),
            build_id: build_id.to_string(),
            baseline_id: None,
            name: input.name.clone(),
            width: input.width,
            height: input.height,
            browser: input.browser.clone(),
            viewport: input.viewport.clone(),
            base_image_path: None,
            comparison_image_path: None,
            diff_image_path: None,
            diff_percentage: None,
            status: SnapshotStatus::Pending,
            review_status: ReviewStatus::Unreviewed,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO snapshots (
                id, build_id, name, width, height, browser, viewport,
                status, review_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            rusqlite::params![
                snapshot.id,
                snapshot.build_id,
                snapshot.name,
                snapshot.width,
                snapshot.height,
                snapshot.browser,
                snapshot.viewport,
                snapshot.status.to_string(),
                snapshot.review_status.to_string(),
                snapshot.created_at,
                snapshot.updated_at,
            ],
        )?;
        Ok(snapshot)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE id = ?1"),
                [id],
                Self::map_row,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Snapshots of a build ordered by name.
    pub fn list_by_build(
        &self,
        build_id: &str,
        filter: SnapshotFilter,
        pagination: Pagination,
    ) -> Result<Page<Snapshot>> {
        let review = filter.review_status.map(|s| s.to_string());
        let conn = self.conn.lock();
        let total = total_count(
            &conn,
            "SELECT COUNT(*) FROM snapshots WHERE build_id = ?1 AND (?2 IS NULL OR review_status = ?2)",
            rusqlite::params![build_id, review],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots \
             WHERE build_id = ?1 AND (?2 IS NULL OR review_status = ?2) \
             ORDER BY name, id LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![build_id, review, pagination.limit(), pagination.offset()],
            Self::map_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Snapshots that differ from their baseline or have none.
    pub fn list_changed(&self, build_id: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots \
             WHERE build_id = ?1 AND (diff_percentage > 0 OR baseline_id IS NULL) \
             ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([build_id], Self::map_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Stored image paths of every snapshot in a build.
    pub fn image_paths_for_build(&self, build_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT comparison_image_path, diff_image_path FROM snapshots WHERE build_id = ?1
            "#,
        )?;
        let rows = stmt.query_map([build_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
            ))
        })?;

        let mut paths = Vec::new();
        for row in rows {
            let (comparison, diff) = row?;
            paths.extend(comparison);
            paths.extend(diff);
        }
        Ok(paths)
    }

    pub fn update_status(&self, id: &str, status: SnapshotStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE snapshots SET status = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![id, status.to_string(), now()],
        )?;
        Ok(changed > 0)
    }

    /// Persist processing results together with the final status.
    pub fn update_images(
        &self,
        id: &str,
        images: &SnapshotImages,
        status: SnapshotStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            r#"
            UPDATE snapshots SET
                baseline_id = ?2,
                base_image_path = ?3,
                comparison_image_path = ?4,
                diff_image_path = ?5,
                diff_percentage = ?6,
                status = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
            rusqlite::params![
                id,
                images.baseline_id,
                images.base_image_path,
                images.comparison_image_path,
                images.diff_image_path,
                images.diff_percentage,
                status.to_string(),
                now(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn update_review(&self, id: &str, decision: &ReviewDecision) -> Result<bool> {
        let conn = self.conn.lock();
        let now = now();
        let changed = conn.execute(
            r#"
            UPDATE snapshots SET
                review_status = ?2,
                reviewed_by = ?3,
                reviewed_at = ?4,
                updated_at = ?4
            WHERE id = ?1
            "#,
            rusqlite::params![id, decision.status.to_string(), decision.reviewed_by, now],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM snapshots WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}
