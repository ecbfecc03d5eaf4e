//! The generation coordinator.
//!
//! Owns the content pipeline: every stage loads its entity, checks the
//! stage's preconditions, moves the entity into its working status, calls
//! the provider, and writes the result and the finishing status together.
//! A stage that fails after it started records `FAILED` plus the error
//! text on the entity it was working on and hands the error back.
//!
//! The coordinator never spawns; see [`crate::jobs`] for background use.

mod stages;
mod streaming;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use immo_db::models::{Content, ContentStatus, NewContent, Scene, SceneStatus, Section, SectionStatus};
use immo_db::queries::{contents, scenes, sections};

use crate::error::{GenerationError, Result};
use crate::llm::{GenerationClient, GenerationRequest};
use crate::prompts::{CONTENT_SYSTEM_PROMPT, PROSE_SYSTEM_PROMPT};
use crate::state::{ContentStateMachine, SceneStateMachine, SectionStateMachine};
use crate::views::{ContentView, SceneView, SectionView};

pub use streaming::{EventStream, StreamEvent};

pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MIN_SECTIONS: i32 = 1;
pub const MAX_SECTIONS: i32 = 20;
pub const DEFAULT_SECTIONS: i32 = 5;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Per-stage sampling settings and system prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub outline_temperature: f32,
    pub sections_temperature: f32,
    pub scenes_temperature: f32,
    pub prose_temperature: f32,
    pub content_system_prompt: String,
    pub prose_system_prompt: String,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            outline_temperature: 0.7,
            sections_temperature: 0.7,
            scenes_temperature: 0.75,
            prose_temperature: 0.8,
            content_system_prompt: CONTENT_SYSTEM_PROMPT.to_owned(),
            prose_system_prompt: PROSE_SYSTEM_PROMPT.to_owned(),
            max_tokens: 4000,
        }
    }
}

/// A request to start a new content job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContent {
    pub description: String,
    pub style: Option<String>,
    pub sections_count: i32,
}

impl CreateContent {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            style: None,
            sections_count: DEFAULT_SECTIONS,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_sections_count(mut self, sections_count: i32) -> Self {
        self.sections_count = sections_count;
        self
    }

    /// Description length is counted in characters after trimming.
    pub fn validate(&self) -> Result<()> {
        let len = self.description.trim().chars().count();
        if !(MIN_DESCRIPTION_CHARS..=MAX_DESCRIPTION_CHARS).contains(&len) {
            return Err(GenerationError::validation(format!(
                "description must be {MIN_DESCRIPTION_CHARS}-{MAX_DESCRIPTION_CHARS} characters, got {len}"
            )));
        }
        validate_sections_count(self.sections_count)
    }
}

pub fn validate_sections_count(count: i32) -> Result<()> {
    if !(MIN_SECTIONS..=MAX_SECTIONS).contains(&count) {
        return Err(GenerationError::validation(format!(
            "sections_count must be between {MIN_SECTIONS} and {MAX_SECTIONS}, got {count}"
        )));
    }
    Ok(())
}

/// What `reset_stuck` flipped to `FAILED`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub contents: usize,
    pub sections: usize,
    pub scenes: usize,
}

impl ResetReport {
    pub fn total(&self) -> usize {
        self.contents + self.sections + self.scenes
    }
}

/// Drives content jobs through outline, sections, scenes and prose.
#[derive(Clone)]
pub struct Coordinator {
    pool: PgPool,
    client: Arc<dyn GenerationClient>,
    settings: GenerationSettings,
}

impl Coordinator {
    pub fn new(pool: PgPool, client: Arc<dyn GenerationClient>) -> Self {
        Self {
            pool,
            client,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Validate and store a new job in `PENDING`. No provider call is made.
    pub async fn create(&self, request: CreateContent) -> Result<ContentView> {
        request.validate()?;
        let style = request.style.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let content = contents::insert_content(
            &self.pool,
            &NewContent {
                description: request.description.trim(),
                sections_count: request.sections_count,
                style,
            },
        )
        .await?;
        tracing::info!(
            content_id = %content.id,
            sections_count = content.sections_count,
            "content created"
        );
        self.content_view(content.id).await
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub async fn get_content(&self, content_id: Uuid) -> Result<ContentView> {
        self.content_view(content_id).await
    }

    /// Newest first. `limit` is capped at [`MAX_PAGE_SIZE`].
    pub async fn list_contents(&self, limit: i64, offset: i64) -> Result<Vec<ContentView>> {
        if limit < 1 || offset < 0 {
            return Err(GenerationError::validation(format!(
                "limit must be positive and offset non-negative, got limit={limit} offset={offset}"
            )));
        }
        let rows = contents::list_contents(&self.pool, limit.min(MAX_PAGE_SIZE), offset).await?;
        let mut views = Vec::with_capacity(rows.len());
        for content in rows {
            let progress = sections::get_section_progress(&self.pool, content.id).await?;
            views.push(ContentView::new(content, progress, self.model()));
        }
        Ok(views)
    }

    pub async fn list_sections(&self, content_id: Uuid) -> Result<Vec<SectionView>> {
        self.load_content(content_id).await?;
        let rows = sections::list_sections(&self.pool, content_id).await?;
        let mut views = Vec::with_capacity(rows.len());
        for section in rows {
            let progress = scenes::get_scene_progress(&self.pool, section.id).await?;
            views.push(SectionView::new(section, progress));
        }
        Ok(views)
    }

    pub async fn get_section(&self, content_id: Uuid, section_number: i32) -> Result<SectionView> {
        let section = self.load_section(content_id, section_number).await?;
        let progress = scenes::get_scene_progress(&self.pool, section.id).await?;
        Ok(SectionView::new(section, progress))
    }

    pub async fn list_scenes(&self, content_id: Uuid, section_number: i32) -> Result<Vec<SceneView>> {
        let section = self.load_section(content_id, section_number).await?;
        let rows = scenes::list_scenes(&self.pool, section.id).await?;
        Ok(rows.into_iter().map(SceneView::from).collect())
    }

    pub async fn get_scene(
        &self,
        content_id: Uuid,
        section_number: i32,
        scene_number: i32,
    ) -> Result<SceneView> {
        let section = self.load_section(content_id, section_number).await?;
        let scene = self.load_scene(&section, scene_number).await?;
        Ok(scene.into())
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Settle a job that is not running into `COMPLETED` (every section
    /// completed) or `PARTIALLY_COMPLETED` (some section or scene completed).
    pub async fn finalize_content(&self, content_id: Uuid) -> Result<ContentView> {
        let content = self.load_content(content_id).await?;
        if content.status == ContentStatus::Pending || content.status.is_processing() {
            return Err(GenerationError::precondition(format!(
                "content {content_id} is {}; only settled content can be finalized",
                content.status
            )));
        }

        let progress = sections::get_section_progress(&self.pool, content_id).await?;
        let target = if progress.total > 0 && progress.completed == progress.total {
            ContentStatus::Completed
        } else if progress.completed > 0
            || scenes::count_completed_scenes_for_content(&self.pool, content_id).await? > 0
        {
            ContentStatus::PartiallyCompleted
        } else {
            return Err(GenerationError::precondition(format!(
                "content {content_id} has no completed sections or scenes"
            )));
        };

        ContentStateMachine::transition(
            &self.pool,
            content_id,
            content.status,
            target,
            content.error.as_deref(),
        )
        .await?;
        tracing::info!(content_id = %content_id, status = %target, "content finalized");
        self.content_view(content_id).await
    }

    /// Fail everything that has sat in a working status for longer than
    /// `older_than`, so it can be re-run.
    pub async fn reset_stuck(&self, older_than: Duration) -> Result<ResetReport> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|_| GenerationError::validation("reset threshold is out of range"))?;
        let cutoff = chrono::Utc::now() - age;
        let reason = format!("reset after {}s without progress", older_than.as_secs());

        let report = ResetReport {
            contents: contents::reset_stuck_contents(&self.pool, cutoff, &reason).await?.len(),
            sections: sections::reset_stuck_sections(&self.pool, cutoff, &reason).await?.len(),
            scenes: scenes::reset_stuck_scenes(&self.pool, cutoff, &reason).await?.len(),
        };
        if report.total() > 0 {
            tracing::warn!(
                contents = report.contents,
                sections = report.sections,
                scenes = report.scenes,
                "reset stuck entities"
            );
        }
        Ok(report)
    }

    /// Remove a job with its sections and scenes.
    pub async fn delete_content(&self, content_id: Uuid) -> Result<()> {
        if !contents::delete_content(&self.pool, content_id).await? {
            return Err(GenerationError::not_found(format!("content {content_id}")));
        }
        tracing::info!(content_id = %content_id, "content deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn load_content(&self, content_id: Uuid) -> Result<Content> {
        contents::get_content(&self.pool, content_id)
            .await?
            .ok_or_else(|| GenerationError::not_found(format!("content {content_id}")))
    }

    pub(crate) async fn load_section(&self, content_id: Uuid, number: i32) -> Result<Section> {
        sections::get_section_by_number(&self.pool, content_id, number)
            .await?
            .ok_or_else(|| {
                GenerationError::not_found(format!("section {number} of content {content_id}"))
            })
    }

    pub(crate) async fn load_scene(&self, section: &Section, number: i32) -> Result<Scene> {
        scenes::get_scene_by_number(&self.pool, section.id, number)
            .await?
            .ok_or_else(|| {
                GenerationError::not_found(format!(
                    "scene {number} of section {} of content {}",
                    section.number, section.content_id
                ))
            })
    }

    pub(crate) async fn content_view(&self, content_id: Uuid) -> Result<ContentView> {
        let content = self.load_content(content_id).await?;
        let progress = sections::get_section_progress(&self.pool, content_id).await?;
        Ok(ContentView::new(content, progress, self.model()))
    }

    fn request(&self, prompt: String, system_prompt: &str, temperature: f32) -> GenerationRequest {
        GenerationRequest::new(prompt, system_prompt)
            .temperature(temperature)
            .max_tokens(self.settings.max_tokens)
    }

    /// Pass `result` through, first recording a failure on the content
    /// if the stage that produced it left the content in `from`.
    async fn settle_content<T>(
        &self,
        content_id: Uuid,
        from: ContentStatus,
        result: Result<T>,
    ) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let message = err.to_string();
        match ContentStateMachine::transition(
            &self.pool,
            content_id,
            from,
            ContentStatus::Failed,
            Some(&message),
        )
        .await
        {
            Ok(()) => tracing::warn!(
                content_id = %content_id,
                stage = %from,
                kind = err.kind(),
                error = %err,
                "content failed"
            ),
            Err(e) => tracing::warn!(
                content_id = %content_id,
                error = %err,
                record_error = %e,
                "could not record content failure"
            ),
        }
        Err(err)
    }

    async fn settle_section<T>(&self, section_id: Uuid, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let message = err.to_string();
        match SectionStateMachine::transition(
            &self.pool,
            section_id,
            SectionStatus::GeneratingScenes,
            SectionStatus::Failed,
            Some(&message),
        )
        .await
        {
            Ok(()) => tracing::warn!(
                section_id = %section_id,
                kind = err.kind(),
                error = %err,
                "scene breakdown failed"
            ),
            Err(e) => tracing::warn!(
                section_id = %section_id,
                error = %err,
                record_error = %e,
                "could not record section failure"
            ),
        }
        Err(err)
    }

    async fn settle_scene<T>(&self, scene_id: Uuid, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let message = err.to_string();
        match SceneStateMachine::transition(
            &self.pool,
            scene_id,
            SceneStatus::Generating,
            SceneStatus::Failed,
            Some(&message),
        )
        .await
        {
            Ok(()) => tracing::warn!(
                scene_id = %scene_id,
                kind = err.kind(),
                error = %err,
                "prose generation failed"
            ),
            Err(e) => tracing::warn!(
                scene_id = %scene_id,
                error = %err,
                record_error = %e,
                "could not record scene failure"
            ),
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_bounds() {
        assert!(CreateContent::new("too short").validate().is_err());
        assert!(CreateContent::new("exactly 10").validate().is_ok());
        assert!(CreateContent::new("x".repeat(1000)).validate().is_ok());
        let err = CreateContent::new("x".repeat(1001)).validate().unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
    }

    #[test]
    fn description_is_measured_trimmed_in_characters() {
        assert!(CreateContent::new("   short   ").validate().is_err());
        assert!(CreateContent::new("é".repeat(10)).validate().is_ok());
    }

    #[test]
    fn sections_count_bounds() {
        let base = CreateContent::new("A detective investigates a murder.");
        assert!(base.clone().with_sections_count(0).validate().is_err());
        assert!(base.clone().with_sections_count(1).validate().is_ok());
        assert!(base.clone().with_sections_count(20).validate().is_ok());
        assert!(base.with_sections_count(21).validate().is_err());
    }

    #[test]
    fn default_settings() {
        let settings = GenerationSettings::default();
        assert_eq!(settings.outline_temperature, 0.7);
        assert_eq!(settings.scenes_temperature, 0.75);
        assert_eq!(settings.prose_temperature, 0.8);
        assert_eq!(settings.prose_system_prompt, "You are a professional writer.");
        assert_eq!(settings.max_tokens, 4000);
    }

    #[test]
    fn reset_report_total() {
        let report = ResetReport {
            contents: 1,
            sections: 2,
            scenes: 3,
        };
        assert_eq!(report.total(), 6);
    }
}
