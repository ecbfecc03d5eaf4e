//! Database query functions for the `sections` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{NewSection, Section, SectionStatus};

/// Completion counts for the children of one parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildProgress {
    pub total: i64,
    pub completed: i64,
}

impl ChildProgress {
    pub(crate) fn from_rows(rows: &[(String, i64)]) -> Self {
        let mut progress = Self::default();
        for (status, count) in rows {
            if status == "COMPLETED" {
                progress.completed = *count;
            }
            progress.total += count;
        }
        progress
    }
}

/// Insert `sections` numbered 1..N in slice order.
///
/// Intended to run inside a transaction after
/// [`delete_sections_for_content`], so numbering never has gaps.
pub async fn insert_sections(
    conn: &mut PgConnection,
    content_id: Uuid,
    sections: &[NewSection],
) -> Result<Vec<Section>> {
    let mut inserted = Vec::with_capacity(sections.len());
    for (index, section) in sections.iter().enumerate() {
        let number = i32::try_from(index + 1).context("section number out of range")?;
        let row = sqlx::query_as::<_, Section>(
            "INSERT INTO sections (content_id, number, title, summary, style_description) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING *",
        )
        .bind(content_id)
        .bind(number)
        .bind(&section.title)
        .bind(&section.summary)
        .bind(section.style_description.as_deref())
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to insert section {number}"))?;
        inserted.push(row);
    }
    Ok(inserted)
}

pub async fn delete_sections_for_content(conn: &mut PgConnection, content_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sections WHERE content_id = $1")
        .bind(content_id)
        .execute(conn)
        .await
        .context("failed to delete sections")?;

    Ok(result.rows_affected())
}

/// Number of scenes that exist anywhere under `content_id`.
pub async fn count_scenes_for_content<'e, E: PgExecutor<'e>>(
    executor: E,
    content_id: Uuid,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes WHERE content_id = $1")
        .bind(content_id)
        .fetch_one(executor)
        .await
        .context("failed to count scenes for content")?;

    Ok(count)
}

pub async fn get_section(pool: &PgPool, id: Uuid) -> Result<Option<Section>> {
    let section = sqlx::query_as::<_, Section>("SELECT * FROM sections WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch section")?;

    Ok(section)
}

pub async fn get_section_by_number(
    pool: &PgPool,
    content_id: Uuid,
    number: i32,
) -> Result<Option<Section>> {
    let section = sqlx::query_as::<_, Section>(
        "SELECT * FROM sections WHERE content_id = $1 AND number = $2",
    )
    .bind(content_id)
    .bind(number)
    .fetch_optional(pool)
    .await
    .context("failed to fetch section by number")?;

    Ok(section)
}

/// All sections of a job, in number order.
pub async fn list_sections(pool: &PgPool, content_id: Uuid) -> Result<Vec<Section>> {
    let sections = sqlx::query_as::<_, Section>(
        "SELECT * FROM sections WHERE content_id = $1 ORDER BY number",
    )
    .bind(content_id)
    .fetch_all(pool)
    .await
    .context("failed to list sections")?;

    Ok(sections)
}

/// Sections numbered strictly below `number`, in number order.
pub async fn list_sections_before(
    pool: &PgPool,
    content_id: Uuid,
    number: i32,
) -> Result<Vec<Section>> {
    let sections = sqlx::query_as::<_, Section>(
        "SELECT * FROM sections WHERE content_id = $1 AND number < $2 ORDER BY number",
    )
    .bind(content_id)
    .bind(number)
    .fetch_all(pool)
    .await
    .context("failed to list earlier sections")?;

    Ok(sections)
}

/// Optimistic status change; see
/// [`transition_content_status`](super::contents::transition_content_status).
pub async fn transition_section_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    from: SectionStatus,
    to: SectionStatus,
    error: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE sections \
         SET status = $1, error = $2, updated_at = now() \
         WHERE id = $3 AND status = $4",
    )
    .bind(to)
    .bind(error)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition section status")?;

    Ok(result.rows_affected())
}

/// Promote a section from `SCENES_COMPLETED` to `COMPLETED` when it has at
/// least one scene and every scene has prose.
pub async fn complete_section_if_scenes_done(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sections s \
         SET status = 'COMPLETED', error = NULL, updated_at = now() \
         WHERE s.id = $1 \
           AND s.status = 'SCENES_COMPLETED' \
           AND EXISTS (SELECT 1 FROM scenes sc WHERE sc.section_id = s.id) \
           AND NOT EXISTS ( \
               SELECT 1 FROM scenes sc \
               WHERE sc.section_id = s.id AND sc.status != 'COMPLETED' \
           )",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to complete section")?;

    Ok(result.rows_affected() > 0)
}

/// Section completion counts for a job.
pub async fn get_section_progress(pool: &PgPool, content_id: Uuid) -> Result<ChildProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) \
         FROM sections \
         WHERE content_id = $1 \
         GROUP BY status",
    )
    .bind(content_id)
    .fetch_all(pool)
    .await
    .context("failed to get section progress")?;

    Ok(ChildProgress::from_rows(&rows))
}

/// Fail every section stuck in `GENERATING_SCENES` since before
/// `older_than`.
pub async fn reset_stuck_sections(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<Section>> {
    let sections = sqlx::query_as::<_, Section>(
        "UPDATE sections \
         SET status = 'FAILED', error = $1, updated_at = now() \
         WHERE status = 'GENERATING_SCENES' AND updated_at < $2 \
         RETURNING *",
    )
    .bind(reason)
    .bind(older_than)
    .fetch_all(pool)
    .await
    .context("failed to reset stuck sections")?;

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_counts_every_status_in_total() {
        let rows = vec![
            ("COMPLETED".to_owned(), 2),
            ("FAILED".to_owned(), 1),
            ("PENDING".to_owned(), 3),
        ];
        let progress = ChildProgress::from_rows(&rows);
        assert_eq!(
            progress,
            ChildProgress {
                total: 6,
                completed: 2,
            }
        );
    }

    #[test]
    fn progress_of_nothing_is_zero() {
        assert_eq!(ChildProgress::from_rows(&[]), ChildProgress::default());
    }
}
