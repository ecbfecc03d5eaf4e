//! The four generation stages and the full pipeline.

use serde_json::Value;
use uuid::Uuid;

use immo_db::models::{Content, ContentStatus, NewScene, NewSection, Scene, SceneStatus, Section, SectionStatus};
use immo_db::queries::{contents, scenes, sections};

use super::{Coordinator, validate_sections_count};
use crate::context::{
    OutlineContext, ProseContext, SceneGenerationContext, SectionsContext, build_previous_context,
};
use crate::error::{GenerationError, Result};
use crate::llm::GenerationRequest;
use crate::prompts;
use crate::response::{parse_outline, parse_scenes, parse_sections};
use crate::state::{ContentStateMachine, SceneStateMachine, SectionStateMachine};
use crate::views::{ContentView, SceneView, SectionView};

/// A prose generation that has been started and is waiting on the
/// provider.
pub(super) struct ProseJob {
    pub(super) section_id: Uuid,
    pub(super) scene_id: Uuid,
    pub(super) request: GenerationRequest,
}

impl Coordinator {
    // -----------------------------------------------------------------------
    // Outline
    // -----------------------------------------------------------------------

    /// Generate title, outline and the section list for a job.
    ///
    /// Sections from a previous outline are replaced. Refused once any
    /// scene exists, since replacing sections would drop generated work.
    pub async fn generate_outline(&self, content_id: Uuid) -> Result<ContentView> {
        let content = self.begin_outline(content_id).await?;
        let request = self.outline_request(&content);
        let result = match self.client.generate_json(&request).await {
            Ok(value) => self.finish_outline(content_id, value).await,
            Err(e) => Err(e),
        };
        self.settle_content(content_id, ContentStatus::ProcessingOutline, result)
            .await?;
        self.content_view(content_id).await
    }

    pub(super) async fn begin_outline(&self, content_id: Uuid) -> Result<Content> {
        let content = self.load_content(content_id).await?;
        ensure_content_idle(&content)?;
        ensure_no_scenes(&self.pool, content_id, "regenerate the outline").await?;

        ContentStateMachine::transition(
            &self.pool,
            content_id,
            content.status,
            ContentStatus::ProcessingOutline,
            None,
        )
        .await?;
        tracing::info!(content_id = %content_id, "outline generation started");
        Ok(content)
    }

    pub(super) fn outline_request(&self, content: &Content) -> GenerationRequest {
        let prompt = prompts::outline_prompt(&OutlineContext::from_content(content));
        self.request(
            prompt,
            &self.settings.content_system_prompt,
            self.settings.outline_temperature,
        )
    }

    /// Validate the outline, replace the section list and store title and
    /// outline in one transaction.
    pub(super) async fn finish_outline(&self, content_id: Uuid, value: Value) -> Result<()> {
        let parsed = parse_outline(value)?;

        let mut tx = self.pool.begin().await?;
        let existing = sections::count_scenes_for_content(&mut *tx, content_id).await?;
        if existing > 0 {
            return Err(GenerationError::precondition(format!(
                "content {content_id} gained {existing} scenes while its outline was generated"
            )));
        }
        sections::delete_sections_for_content(&mut tx, content_id).await?;
        let inserted = sections::insert_sections(&mut tx, content_id, &parsed.sections).await?;
        let rows = contents::save_outline(&mut tx, content_id, &parsed.title, &parsed.outline).await?;
        if rows == 0 {
            return Err(GenerationError::precondition(format!(
                "content {content_id} left PROCESSING_OUTLINE before its outline was saved"
            )));
        }
        tx.commit().await?;

        tracing::info!(
            content_id = %content_id,
            title = %parsed.title,
            sections = inserted.len(),
            "outline completed"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sections
    // -----------------------------------------------------------------------

    /// Elaborate the outline into `requested_count` sections (default: the
    /// job's `sections_count`), replacing any existing ones all at once.
    pub async fn generate_sections(
        &self,
        content_id: Uuid,
        requested_count: Option<i32>,
    ) -> Result<Vec<SectionView>> {
        let content = self.load_content(content_id).await?;
        let count = requested_count.unwrap_or(content.sections_count);
        validate_sections_count(count)?;
        if !content.has_outline() {
            return Err(GenerationError::precondition("outline must be generated first"));
        }
        ensure_content_idle(&content)?;
        ensure_no_scenes(&self.pool, content_id, "regenerate sections").await?;

        ContentStateMachine::transition(
            &self.pool,
            content_id,
            content.status,
            ContentStatus::ProcessingSections,
            None,
        )
        .await?;
        tracing::info!(content_id = %content_id, count, "sections generation started");

        let ctx = SectionsContext {
            content_title: content.title.clone().unwrap_or_default(),
            content_outline: content.outline.clone().unwrap_or_default(),
            style: content.style.clone(),
            sections_count: count,
        };
        let request = self.request(
            prompts::sections_prompt(&ctx),
            &self.settings.content_system_prompt,
            self.settings.sections_temperature,
        );

        let result: Result<()> = async {
            let value = self.client.generate_json(&request).await?;
            let parsed = parse_sections(value)?;
            self.replace_sections(content_id, &parsed).await
        }
        .await;
        self.settle_content(content_id, ContentStatus::ProcessingSections, result)
            .await?;
        self.list_sections(content_id).await
    }

    async fn replace_sections(&self, content_id: Uuid, new_sections: &[NewSection]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing = sections::count_scenes_for_content(&mut *tx, content_id).await?;
        if existing > 0 {
            return Err(GenerationError::precondition(format!(
                "content {content_id} gained {existing} scenes while sections were generated"
            )));
        }
        sections::delete_sections_for_content(&mut tx, content_id).await?;
        let inserted = sections::insert_sections(&mut tx, content_id, new_sections).await?;
        let rows = contents::transition_content_status(
            &mut *tx,
            content_id,
            ContentStatus::ProcessingSections,
            ContentStatus::SectionsCompleted,
            None,
        )
        .await?;
        if rows == 0 {
            return Err(GenerationError::precondition(format!(
                "content {content_id} left PROCESSING_SECTIONS before its sections were saved"
            )));
        }
        tx.commit().await?;

        tracing::info!(content_id = %content_id, sections = inserted.len(), "sections completed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scenes
    // -----------------------------------------------------------------------

    /// Break one section into scenes, replacing any it already has.
    ///
    /// Failure marks the section `FAILED`; the content is not touched.
    pub async fn generate_scenes_for_section(
        &self,
        content_id: Uuid,
        section_number: i32,
    ) -> Result<Vec<SceneView>> {
        let content = self.load_content(content_id).await?;
        let section = self.load_section(content_id, section_number).await?;
        if !content.has_outline() {
            return Err(GenerationError::precondition("outline must be generated first"));
        }
        ensure_sections_stable(&content)?;
        if section.status == SectionStatus::GeneratingScenes {
            return Err(GenerationError::precondition(format!(
                "section {section_number} of content {content_id} is already generating scenes"
            )));
        }

        SectionStateMachine::transition(
            &self.pool,
            section.id,
            section.status,
            SectionStatus::GeneratingScenes,
            None,
        )
        .await?;
        tracing::info!(
            content_id = %content_id,
            section = section_number,
            "scene breakdown started"
        );

        let ctx = SceneGenerationContext {
            content_title: content.title.clone().unwrap_or_default(),
            content_outline: content.outline.clone().unwrap_or_default(),
            section_number: section.number,
            section_title: section.title.clone(),
            section_summary: section.summary.clone(),
        };
        let request = self.request(
            prompts::scene_breakdown_prompt(&ctx),
            &self.settings.content_system_prompt,
            self.settings.scenes_temperature,
        );

        let result: Result<()> = async {
            let value = self.client.generate_json(&request).await?;
            let parsed = parse_scenes(value)?;
            self.replace_scenes(&section, &parsed).await
        }
        .await;
        self.settle_section(section.id, result).await?;
        self.list_scenes(content_id, section_number).await
    }

    async fn replace_scenes(&self, section: &Section, new_scenes: &[NewScene]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        scenes::delete_scenes_for_section(&mut tx, section.id).await?;
        let inserted =
            scenes::insert_scenes(&mut tx, section.content_id, section.id, new_scenes).await?;
        let rows = sections::transition_section_status(
            &mut *tx,
            section.id,
            SectionStatus::GeneratingScenes,
            SectionStatus::ScenesCompleted,
            None,
        )
        .await?;
        if rows == 0 {
            return Err(GenerationError::precondition(format!(
                "section {} left GENERATING_SCENES before its scenes were saved",
                section.id
            )));
        }
        tx.commit().await?;

        tracing::info!(
            content_id = %section.content_id,
            section = section.number,
            scenes = inserted.len(),
            "scene breakdown completed"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Prose
    // -----------------------------------------------------------------------

    /// Write prose for one scene, with everything before it as context.
    ///
    /// Failure marks only this scene `FAILED`. When the last scene of a
    /// section gets its prose the section becomes `COMPLETED`.
    pub async fn generate_prose_for_scene(
        &self,
        content_id: Uuid,
        section_number: i32,
        scene_number: i32,
    ) -> Result<SceneView> {
        let job = self
            .begin_prose(content_id, section_number, scene_number)
            .await?;
        let result = match self.client.generate_text(&job.request).await {
            Ok(prose) => self.finish_prose(&job, &prose).await,
            Err(e) => Err(e),
        };
        let scene = self.settle_scene(job.scene_id, result).await?;
        Ok(scene.into())
    }

    pub(super) async fn begin_prose(
        &self,
        content_id: Uuid,
        section_number: i32,
        scene_number: i32,
    ) -> Result<ProseJob> {
        let content = self.load_content(content_id).await?;
        let section = self.load_section(content_id, section_number).await?;
        let scene = self.load_scene(&section, scene_number).await?;
        ensure_sections_stable(&content)?;
        if section.title.trim().is_empty() || section.summary.trim().is_empty() {
            return Err(GenerationError::precondition(format!(
                "section {section_number} of content {content_id} has no title or summary"
            )));
        }
        if scene.status == SceneStatus::Generating {
            return Err(GenerationError::precondition(format!(
                "scene {scene_number} of section {section_number} is already generating"
            )));
        }

        SceneStateMachine::transition(
            &self.pool,
            scene.id,
            scene.status,
            SceneStatus::Generating,
            None,
        )
        .await?;
        tracing::info!(
            content_id = %content_id,
            section = section_number,
            scene = scene_number,
            "prose generation started"
        );

        let request = self.prose_request(&content, &section, &scene).await;
        let request = self.settle_scene(scene.id, request).await?;
        Ok(ProseJob {
            section_id: section.id,
            scene_id: scene.id,
            request,
        })
    }

    async fn prose_request(
        &self,
        content: &Content,
        section: &Section,
        scene: &Scene,
    ) -> Result<GenerationRequest> {
        let earlier_sections =
            sections::list_sections_before(&self.pool, content.id, section.number).await?;
        let earlier_scenes = scenes::list_scenes_before(&self.pool, section.id, scene.number).await?;
        let previous_context = build_previous_context(
            section.number,
            scene.number,
            &earlier_sections,
            &earlier_scenes,
        );

        let ctx = ProseContext {
            content_title: content.title.clone().unwrap_or_default(),
            content_outline: content.outline.clone().unwrap_or_default(),
            section_number: section.number,
            section_title: section.title.clone(),
            section_style: section.style_description.clone(),
            scene_heading: scene.heading.clone(),
            setting: scene.setting.clone(),
            characters: scene.character_names(),
            key_events: scene.key_events.clone(),
            emotional_tone: scene.emotional_tone.clone(),
            previous_context,
            style: content.style.clone(),
        };
        Ok(self.request(
            prompts::prose_prompt(&ctx),
            &self.settings.prose_system_prompt,
            self.settings.prose_temperature,
        ))
    }

    /// Store the prose verbatim and promote the section if it is done.
    pub(super) async fn finish_prose(&self, job: &ProseJob, prose: &str) -> Result<Scene> {
        if prose.trim().is_empty() {
            return Err(GenerationError::malformed("provider returned empty prose"));
        }
        let scene = scenes::save_prose(&self.pool, job.scene_id, prose)
            .await?
            .ok_or_else(|| {
                GenerationError::precondition(format!(
                    "scene {} left GENERATING before its prose was saved",
                    job.scene_id
                ))
            })?;
        tracing::info!(
            scene_id = %scene.id,
            scene = scene.number,
            chars = prose.chars().count(),
            "prose completed"
        );

        if sections::complete_section_if_scenes_done(&self.pool, job.section_id).await? {
            tracing::info!(section_id = %job.section_id, "section completed");
        }
        Ok(scene)
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Run every stage in order: outline, then for each section its scene
    /// breakdown followed by prose for each of its scenes.
    ///
    /// A job that already has an outline and sections resumes instead:
    /// completed sections are skipped, a section whose scenes exist goes
    /// straight to prose, and only scenes without finished prose are
    /// written. The first error stops the run and marks the content
    /// `FAILED`; work finished before it is kept.
    pub async fn process_content(&self, content_id: Uuid) -> Result<ContentView> {
        let content = self.load_content(content_id).await?;
        ensure_content_idle(&content)?;

        let existing = sections::list_sections(&self.pool, content_id).await?;
        let mut current = if content.has_outline() && !existing.is_empty() {
            tracing::info!(
                content_id = %content_id,
                status = %content.status,
                "pipeline resumed"
            );
            content.status
        } else {
            tracing::info!(content_id = %content_id, "pipeline started");
            self.generate_outline(content_id).await?;
            ContentStatus::OutlineCompleted
        };

        let outcome: Result<()> = async {
            let section_list = sections::list_sections(&self.pool, content_id).await?;
            for section in &section_list {
                if section.status == SectionStatus::Completed {
                    continue;
                }
                let scene_list = if section.status == SectionStatus::ScenesCompleted {
                    self.list_scenes(content_id, section.number).await?
                } else {
                    self.advance(content_id, &mut current, ContentStatus::ProcessingScenes)
                        .await?;
                    self.generate_scenes_for_section(content_id, section.number)
                        .await?
                };

                self.advance(content_id, &mut current, ContentStatus::ProcessingProse)
                    .await?;
                for scene in scene_list.iter().filter(|s| s.status != SceneStatus::Completed) {
                    self.generate_prose_for_scene(content_id, section.number, scene.number)
                        .await?;
                }
                sections::complete_section_if_scenes_done(&self.pool, section.id).await?;
            }
            if current != ContentStatus::Completed {
                self.advance(content_id, &mut current, ContentStatus::Completed)
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            return self.settle_content(content_id, current, Err(err)).await;
        }
        tracing::info!(content_id = %content_id, "pipeline completed");
        self.content_view(content_id).await
    }

    async fn advance(
        &self,
        content_id: Uuid,
        current: &mut ContentStatus,
        to: ContentStatus,
    ) -> Result<()> {
        ContentStateMachine::transition(&self.pool, content_id, *current, to, None).await?;
        *current = to;
        Ok(())
    }
}

fn ensure_content_idle(content: &Content) -> Result<()> {
    if content.status.is_processing() {
        return Err(GenerationError::precondition(format!(
            "content {} is already {}",
            content.id, content.status
        )));
    }
    Ok(())
}

/// Refuse work on a section while the outline or sections stage may be
/// replacing the section list.
fn ensure_sections_stable(content: &Content) -> Result<()> {
    if matches!(
        content.status,
        ContentStatus::ProcessingOutline | ContentStatus::ProcessingSections
    ) {
        return Err(GenerationError::precondition(format!(
            "content {} is {}; its sections may be replaced",
            content.id, content.status
        )));
    }
    Ok(())
}

async fn ensure_no_scenes(pool: &sqlx::PgPool, content_id: Uuid, action: &str) -> Result<()> {
    let existing = sections::count_scenes_for_content(pool, content_id).await?;
    if existing > 0 {
        return Err(GenerationError::precondition(format!(
            "content {content_id} already has {existing} scenes; cannot {action}"
        )));
    }
    Ok(())
}
