//! Database query functions for the `scenes` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{NewScene, Scene, SceneStatus, encode_characters};
use crate::queries::sections::ChildProgress;

/// Insert `scenes` numbered 1..M in slice order under one section.
pub async fn insert_scenes(
    conn: &mut PgConnection,
    content_id: Uuid,
    section_id: Uuid,
    scenes: &[NewScene],
) -> Result<Vec<Scene>> {
    let mut inserted = Vec::with_capacity(scenes.len());
    for (index, scene) in scenes.iter().enumerate() {
        let number = i32::try_from(index + 1).context("scene number out of range")?;
        let row = sqlx::query_as::<_, Scene>(
            "INSERT INTO scenes \
                 (content_id, section_id, number, heading, setting, characters, \
                  key_events, emotional_tone) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING *",
        )
        .bind(content_id)
        .bind(section_id)
        .bind(number)
        .bind(&scene.heading)
        .bind(&scene.setting)
        .bind(encode_characters(&scene.characters))
        .bind(&scene.key_events)
        .bind(&scene.emotional_tone)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to insert scene {number}"))?;
        inserted.push(row);
    }
    Ok(inserted)
}

pub async fn delete_scenes_for_section(conn: &mut PgConnection, section_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM scenes WHERE section_id = $1")
        .bind(section_id)
        .execute(conn)
        .await
        .context("failed to delete scenes")?;

    Ok(result.rows_affected())
}

pub async fn get_scene(pool: &PgPool, id: Uuid) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>("SELECT * FROM scenes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch scene")?;

    Ok(scene)
}

pub async fn get_scene_by_number(
    pool: &PgPool,
    section_id: Uuid,
    number: i32,
) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(
        "SELECT * FROM scenes WHERE section_id = $1 AND number = $2",
    )
    .bind(section_id)
    .bind(number)
    .fetch_optional(pool)
    .await
    .context("failed to fetch scene by number")?;

    Ok(scene)
}

/// Scenes of one section, in number order.
pub async fn list_scenes(pool: &PgPool, section_id: Uuid) -> Result<Vec<Scene>> {
    let scenes = sqlx::query_as::<_, Scene>(
        "SELECT * FROM scenes WHERE section_id = $1 ORDER BY number",
    )
    .bind(section_id)
    .fetch_all(pool)
    .await
    .context("failed to list scenes")?;

    Ok(scenes)
}

/// Scenes of one section numbered strictly below `number`.
pub async fn list_scenes_before(
    pool: &PgPool,
    section_id: Uuid,
    number: i32,
) -> Result<Vec<Scene>> {
    let scenes = sqlx::query_as::<_, Scene>(
        "SELECT * FROM scenes WHERE section_id = $1 AND number < $2 ORDER BY number",
    )
    .bind(section_id)
    .bind(number)
    .fetch_all(pool)
    .await
    .context("failed to list earlier scenes")?;

    Ok(scenes)
}

/// Count of scenes with prose anywhere under a job.
pub async fn count_completed_scenes_for_content(pool: &PgPool, content_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM scenes WHERE content_id = $1 AND status = 'COMPLETED'",
    )
    .bind(content_id)
    .fetch_one(pool)
    .await
    .context("failed to count completed scenes")?;

    Ok(count)
}

/// Optimistic status change; see
/// [`transition_content_status`](super::contents::transition_content_status).
pub async fn transition_scene_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
    from: SceneStatus,
    to: SceneStatus,
    error: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE scenes \
         SET status = $1, error = $2, updated_at = now() \
         WHERE id = $3 AND status = $4",
    )
    .bind(to)
    .bind(error)
    .bind(id)
    .bind(from)
    .execute(executor)
    .await
    .context("failed to transition scene status")?;

    Ok(result.rows_affected())
}

/// Store prose and mark the scene `COMPLETED` in one statement. Only a
/// scene still in `GENERATING` is written.
pub async fn save_prose(pool: &PgPool, id: Uuid, prose: &str) -> Result<Option<Scene>> {
    let scene = sqlx::query_as::<_, Scene>(
        "UPDATE scenes \
         SET content = $1, status = 'COMPLETED', error = NULL, updated_at = now() \
         WHERE id = $2 AND status = 'GENERATING' \
         RETURNING *",
    )
    .bind(prose)
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to save prose")?;

    Ok(scene)
}

/// Scene completion counts for a section.
pub async fn get_scene_progress(pool: &PgPool, section_id: Uuid) -> Result<ChildProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) \
         FROM scenes \
         WHERE section_id = $1 \
         GROUP BY status",
    )
    .bind(section_id)
    .fetch_all(pool)
    .await
    .context("failed to get scene progress")?;

    Ok(ChildProgress::from_rows(&rows))
}

/// Fail every scene stuck in `GENERATING` since before `older_than`.
pub async fn reset_stuck_scenes(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<Scene>> {
    let scenes = sqlx::query_as::<_, Scene>(
        "UPDATE scenes \
         SET status = 'FAILED', error = $1, updated_at = now() \
         WHERE status = 'GENERATING' AND updated_at < $2 \
         RETURNING *",
    )
    .bind(reason)
    .bind(older_than)
    .fetch_all(pool)
    .await
    .context("failed to reset stuck scenes")?;

    Ok(scenes)
}
