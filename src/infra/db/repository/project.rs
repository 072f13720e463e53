use super::{DbConn, new_id, now, total_count};
use crate::domain::{DEFAULT_BRANCH, NewProject, Page, Pagination, Project, ProjectUpdate};
use anyhow::Result;
use rusqlite::OptionalExtension;

const PROJECT_COLUMNS: &str =
    "id, name, slug, repository_url, default_branch, created_at, updated_at";

/// Repository for project operations.
pub struct ProjectRepository {
    conn: DbConn,
}

impl ProjectRepository {
    pub fn new(conn: DbConn) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            repository_url: row.get(3)?,
            default_branch: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn create(&self, input: &NewProject) -> Result<Project> {
        let now = now();
        let project = Project {
            id: new_id(),
            name: input.name.clone(),
            slug: input.slug.clone(),
            repository_url: input.repository_url.clone(),
            default_branch: input
                .default_branch
                .clone()
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            created_at: now.clone(),
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO projects (id, name, slug, repository_url, default_branch, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                project.id,
                project.name,
                project.slug,
                project.repository_url,
                project.default_branch,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(project)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                [id],
                Self::map_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        let project = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE slug = ?1"),
                [slug],
                Self::map_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn slug_exists(&self, slug: &str) -> Result<bool> {
        Ok(self.find_by_slug(slug)?.is_some())
    }

    /// Newest first.
    pub fn list(&self, pagination: Pagination) -> Result<Page<Project>> {
        let conn = self.conn.lock();
        let total = total_count(&conn, "SELECT COUNT(*) FROM projects", [])?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(
            [pagination.limit(), pagination.offset()],
            Self::map_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, pagination))
    }

    /// Apply a partial update. Returns `None` when the project does not exist.
    pub fn update(&self, id: &str, update: &ProjectUpdate) -> Result<Option<Project>> {
        {
            let conn = self.conn.lock();
            let changed = conn.execute(
                r#"
                UPDATE projects SET
                    name = COALESCE(?2, name),
                    repository_url = COALESCE(?3, repository_url),
                    default_branch = COALESCE(?4, default_branch),
                    updated_at = ?5
                WHERE id = ?1
                "#,
                rusqlite::params![
                    id,
                    update.name,
                    update.repository_url,
                    update.default_branch,
                    now(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
        }
        self.find_by_id(id)
    }

    /// Deletes the row; builds, snapshots and baselines cascade.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}
