//! Read-only projections returned by the coordinator's accessors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use immo_db::models::{Content, ContentStatus, Scene, SceneStatus, Section, SectionStatus};
use immo_db::queries::sections::ChildProgress;

/// Where an entity sits for progress purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Done,
    Idle,
    Working,
}

impl From<ContentStatus> for Phase {
    fn from(status: ContentStatus) -> Self {
        match status {
            ContentStatus::Completed => Phase::Done,
            ContentStatus::Pending | ContentStatus::Failed => Phase::Idle,
            _ => Phase::Working,
        }
    }
}

impl From<SectionStatus> for Phase {
    fn from(status: SectionStatus) -> Self {
        match status {
            SectionStatus::Completed => Phase::Done,
            SectionStatus::Pending | SectionStatus::Failed => Phase::Idle,
            _ => Phase::Working,
        }
    }
}

impl From<SceneStatus> for Phase {
    fn from(status: SceneStatus) -> Self {
        match status {
            SceneStatus::Completed => Phase::Done,
            SceneStatus::Pending | SceneStatus::Failed => Phase::Idle,
            SceneStatus::Generating => Phase::Working,
        }
    }
}

/// 100 when done, 0 when pending or failed, otherwise the share of
/// completed children rounded down.
pub fn progress_percent(phase: Phase, children: ChildProgress) -> u8 {
    match phase {
        Phase::Done => 100,
        Phase::Idle => 0,
        Phase::Working if children.total <= 0 => 0,
        Phase::Working => {
            let pct = children.completed.clamp(0, children.total) * 100 / children.total;
            u8::try_from(pct).unwrap_or(100)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentView {
    pub id: Uuid,
    pub description: String,
    pub sections_count: i32,
    pub style: Option<String>,
    pub status: ContentStatus,
    pub title: Option<String>,
    pub outline: Option<String>,
    pub error: Option<String>,
    pub progress: u8,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentView {
    pub fn new(content: Content, sections: ChildProgress, model: &str) -> Self {
        Self {
            progress: progress_percent(content.status.into(), sections),
            id: content.id,
            description: content.description,
            sections_count: content.sections_count,
            style: content.style,
            status: content.status,
            title: content.title,
            outline: content.outline,
            error: content.error,
            model: model.to_owned(),
            created_at: content.created_at,
            updated_at: content.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionView {
    pub id: Uuid,
    pub content_id: Uuid,
    pub number: i32,
    pub title: String,
    pub summary: String,
    pub style_description: Option<String>,
    pub status: SectionStatus,
    pub error: Option<String>,
    pub scene_count: i64,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SectionView {
    pub fn new(section: Section, scenes: ChildProgress) -> Self {
        Self {
            progress: progress_percent(section.status.into(), scenes),
            scene_count: scenes.total,
            id: section.id,
            content_id: section.content_id,
            number: section.number,
            title: section.title,
            summary: section.summary,
            style_description: section.style_description,
            status: section.status,
            error: section.error,
            created_at: section.created_at,
            updated_at: section.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneView {
    pub id: Uuid,
    pub content_id: Uuid,
    pub section_id: Uuid,
    pub number: i32,
    pub heading: String,
    pub setting: String,
    pub characters: Vec<String>,
    pub key_events: String,
    pub emotional_tone: String,
    pub content: Option<String>,
    pub status: SceneStatus,
    pub error: Option<String>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Scene> for SceneView {
    fn from(scene: Scene) -> Self {
        Self {
            progress: progress_percent(scene.status.into(), ChildProgress::default()),
            characters: scene.character_names(),
            id: scene.id,
            content_id: scene.content_id,
            section_id: scene.section_id,
            number: scene.number,
            heading: scene.heading,
            setting: scene.setting,
            key_events: scene.key_events,
            emotional_tone: scene.emotional_tone,
            content: scene.content,
            status: scene.status,
            error: scene.error,
            created_at: scene.created_at,
            updated_at: scene.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn children(total: i64, completed: i64) -> ChildProgress {
        ChildProgress { total, completed }
    }

    #[test]
    fn completed_is_always_full() {
        assert_eq!(progress_percent(ContentStatus::Completed.into(), children(0, 0)), 100);
        assert_eq!(progress_percent(SceneStatus::Completed.into(), children(0, 0)), 100);
    }

    #[test]
    fn pending_and_failed_are_empty() {
        assert_eq!(progress_percent(ContentStatus::Pending.into(), children(3, 3)), 0);
        assert_eq!(progress_percent(ContentStatus::Failed.into(), children(3, 2)), 0);
        assert_eq!(progress_percent(SectionStatus::Failed.into(), children(4, 1)), 0);
    }

    #[test]
    fn in_flight_is_share_of_completed_children() {
        let phase = Phase::from(ContentStatus::ProcessingProse);
        assert_eq!(progress_percent(phase, children(3, 1)), 33);
        assert_eq!(progress_percent(phase, children(4, 2)), 50);
        assert_eq!(progress_percent(phase, children(0, 0)), 0);
        assert_eq!(
            progress_percent(ContentStatus::PartiallyCompleted.into(), children(5, 4)),
            80
        );
    }

    #[test]
    fn generating_scene_has_no_children() {
        assert_eq!(progress_percent(SceneStatus::Generating.into(), ChildProgress::default()), 0);
    }
}
