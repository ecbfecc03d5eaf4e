//! Status state machines for contents, sections and scenes.
//!
//! Entering a stage's working status is always allowed: re-running a stage
//! is the caller's decision. Leaving it is only allowed along the edges
//! below, and every write is optimistic on the status the caller last
//! observed, so a stale writer cannot overwrite a newer outcome.

use sqlx::PgPool;
use uuid::Uuid;

use immo_db::models::{ContentStatus, SceneStatus, SectionStatus};
use immo_db::queries::{contents, scenes, sections};

use crate::error::{GenerationError, Result};

/// Content transitions.
///
/// ```text
/// *                   -> PROCESSING_OUTLINE | PROCESSING_SECTIONS
///                        | PROCESSING_SCENES | PROCESSING_PROSE
/// PROCESSING_OUTLINE  -> OUTLINE_COMPLETED
/// PROCESSING_SECTIONS -> SECTIONS_COMPLETED
/// PROCESSING_SCENES   -> SCENES_COMPLETED
/// PROCESSING_PROSE    -> COMPLETED
/// PROCESSING_*        -> FAILED | PARTIALLY_COMPLETED
/// settled             -> COMPLETED | PARTIALLY_COMPLETED   (finalize)
/// ```
///
/// "Settled" is any status that is neither `PENDING` nor a processing
/// status.
pub struct ContentStateMachine;

impl ContentStateMachine {
    pub fn is_valid_transition(from: ContentStatus, to: ContentStatus) -> bool {
        use ContentStatus::*;

        if to.is_processing() {
            return true;
        }
        let settled = from != Pending && !from.is_processing();
        matches!(
            (from, to),
            (ProcessingOutline, OutlineCompleted)
                | (ProcessingSections, SectionsCompleted)
                | (ProcessingScenes, ScenesCompleted)
                | (ProcessingProse, Completed)
        ) || (from.is_processing() && matches!(to, Failed | PartiallyCompleted))
            || (settled && matches!(to, Completed | PartiallyCompleted))
    }

    /// Validate and apply a transition, recording `error` (or clearing it).
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: ContentStatus,
        to: ContentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            return Err(GenerationError::precondition(format!(
                "invalid content transition {from} -> {to} for {id}"
            )));
        }
        let rows = contents::transition_content_status(pool, id, from, to, error).await?;
        if rows == 0 {
            return match contents::get_content(pool, id).await? {
                None => Err(GenerationError::not_found(format!("content {id}"))),
                Some(c) => Err(lock_failed("content", id, c.status, from)),
            };
        }
        Ok(())
    }
}

/// Section transitions.
///
/// ```text
/// *                 -> GENERATING_SCENES
/// GENERATING_SCENES -> SCENES_COMPLETED | FAILED
/// SCENES_COMPLETED  -> COMPLETED
/// ```
pub struct SectionStateMachine;

impl SectionStateMachine {
    pub fn is_valid_transition(from: SectionStatus, to: SectionStatus) -> bool {
        use SectionStatus::*;

        to == GeneratingScenes
            || matches!(
                (from, to),
                (GeneratingScenes, ScenesCompleted)
                    | (GeneratingScenes, Failed)
                    | (ScenesCompleted, Completed)
            )
    }

    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: SectionStatus,
        to: SectionStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            return Err(GenerationError::precondition(format!(
                "invalid section transition {from} -> {to} for {id}"
            )));
        }
        let rows = sections::transition_section_status(pool, id, from, to, error).await?;
        if rows == 0 {
            return match sections::get_section(pool, id).await? {
                None => Err(GenerationError::not_found(format!("section {id}"))),
                Some(s) => Err(lock_failed("section", id, s.status, from)),
            };
        }
        Ok(())
    }
}

/// Scene transitions.
///
/// ```text
/// *          -> GENERATING
/// GENERATING -> COMPLETED | FAILED
/// ```
pub struct SceneStateMachine;

impl SceneStateMachine {
    pub fn is_valid_transition(from: SceneStatus, to: SceneStatus) -> bool {
        use SceneStatus::*;

        to == Generating || (from == Generating && matches!(to, Completed | Failed))
    }

    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: SceneStatus,
        to: SceneStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            return Err(GenerationError::precondition(format!(
                "invalid scene transition {from} -> {to} for {id}"
            )));
        }
        let rows = scenes::transition_scene_status(pool, id, from, to, error).await?;
        if rows == 0 {
            return match scenes::get_scene(pool, id).await? {
                None => Err(GenerationError::not_found(format!("scene {id}"))),
                Some(s) => Err(lock_failed("scene", id, s.status, from)),
            };
        }
        Ok(())
    }
}

fn lock_failed(kind: &str, id: Uuid, actual: impl std::fmt::Display, expected: impl std::fmt::Display) -> GenerationError {
    GenerationError::precondition(format!(
        "{kind} {id} is {actual}, expected {expected}; another invocation got there first"
    ))
}
