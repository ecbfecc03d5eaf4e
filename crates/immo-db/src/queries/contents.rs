//! Database query functions for the `contents` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Content, ContentStatus, NewContent};

/// Insert a new job in `PENDING`.
pub async fn insert_content(pool: &PgPool, new: &NewContent<'_>) -> Result<Content> {
    let content = sqlx::query_as::<_, Content>(
        "INSERT INTO contents (description, sections_count, style) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(new.description)
    .bind(new.sections_count)
    .bind(new.style)
    .fetch_one(pool)
    .await
    .context("failed to insert content")?;

    Ok(content)
}

pub async fn get_content(pool: &PgPool, id: Uuid) -> Result<Option<Content>> {
    let content = sqlx::query_as::<_, Content>("SELECT * FROM contents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch content")?;

    Ok(content)
}

/// Page through jobs, newest first.
pub async fn list_contents(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Content>> {
    let contents = sqlx::query_as::<_, Content>(
        "SELECT * FROM contents ORDER BY created_at DESC, id LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("failed to list contents")?;

    Ok(contents)
}

/// Move a job from `from` to `to`, replacing its error text.
///
/// Optimistic: returns the number of rows affected, which is 0 when the
/// job is missing or no longer in `from`.
pub async fn transition_content_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    from: ContentStatus,
    to: ContentStatus,
    error: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE contents \
         SET status = $1, error = $2, updated_at = now() \
         WHERE id = $3 AND status = $4",
    )
    .bind(to)
    .bind(error)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition content status")?;

    Ok(result.rows_affected())
}

/// Store the generated title and outline and finish the outline stage in
/// the same statement.
pub async fn save_outline(
    conn: &mut PgConnection,
    id: Uuid,
    title: &str,
    outline: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE contents \
         SET title = $1, outline = $2, status = 'OUTLINE_COMPLETED', error = NULL, \
             updated_at = now() \
         WHERE id = $3 AND status = 'PROCESSING_OUTLINE'",
    )
    .bind(title)
    .bind(outline)
    .bind(id)
    .execute(conn)
    .await
    .context("failed to save outline")?;

    Ok(result.rows_affected())
}

/// Delete a job; sections and scenes cascade.
pub async fn delete_content(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM contents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete content")?;

    Ok(result.rows_affected() > 0)
}

/// Fail every job that has sat in a processing status since before
/// `older_than`. Returns the jobs that were reset.
pub async fn reset_stuck_contents(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<Content>> {
    let contents = sqlx::query_as::<_, Content>(
        "UPDATE contents \
         SET status = 'FAILED', error = $1, updated_at = now() \
         WHERE status IN ('PROCESSING_OUTLINE', 'PROCESSING_SECTIONS', \
                          'PROCESSING_SCENES', 'PROCESSING_PROSE') \
           AND updated_at < $2 \
         RETURNING *",
    )
    .bind(reason)
    .bind(older_than)
    .fetch_all(pool)
    .await
    .context("failed to reset stuck contents")?;

    Ok(contents)
}
