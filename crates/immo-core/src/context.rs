//! Typed inputs for each stage's prompt, and the previous-context text
//! that carries continuity from earlier sections and scenes.

use immo_db::models::{Content, Scene, Section};

/// Inputs to the outline prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineContext {
    pub description: String,
    pub style: Option<String>,
    pub sections_count: i32,
}

impl OutlineContext {
    pub fn from_content(content: &Content) -> Self {
        Self {
            description: content.description.clone(),
            style: content.style.clone(),
            sections_count: content.sections_count,
        }
    }
}

/// Inputs to the sections-elaboration prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionsContext {
    pub content_title: String,
    pub content_outline: String,
    pub style: Option<String>,
    pub sections_count: i32,
}

/// Inputs to the scene-breakdown prompt for one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneGenerationContext {
    pub content_title: String,
    pub content_outline: String,
    pub section_number: i32,
    pub section_title: String,
    pub section_summary: String,
}

/// Inputs to the prose prompt for one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProseContext {
    pub content_title: String,
    pub content_outline: String,
    pub section_number: i32,
    pub section_title: String,
    /// Section-level style note from the sections stage.
    pub section_style: Option<String>,
    pub scene_heading: String,
    pub setting: String,
    pub characters: Vec<String>,
    pub key_events: String,
    pub emotional_tone: String,
    pub previous_context: String,
    pub style: Option<String>,
}

/// Assemble the continuity text for scene `scene_number` of section
/// `section_number`.
///
/// In order: every section numbered below `section_number` as a
/// `Section N: Title` header followed by its summary, then every scene of
/// the current section numbered below `scene_number` that already has
/// prose, as a `Scene N: Heading` header followed by that prose. Parts are
/// separated by blank lines. Rows outside those bounds are ignored, so
/// callers may pass whole listings.
pub fn build_previous_context(
    section_number: i32,
    scene_number: i32,
    sections: &[Section],
    scenes: &[Scene],
) -> String {
    let mut earlier_sections: Vec<&Section> = sections
        .iter()
        .filter(|s| s.number < section_number)
        .collect();
    earlier_sections.sort_by_key(|s| s.number);

    let mut earlier_scenes: Vec<&Scene> = scenes
        .iter()
        .filter(|s| s.number < scene_number && s.has_prose())
        .collect();
    earlier_scenes.sort_by_key(|s| s.number);

    let mut parts: Vec<String> = Vec::new();
    for section in earlier_sections {
        parts.push(format!("Section {}: {}", section.number, section.title));
        parts.push(section.summary.clone());
    }
    for scene in earlier_scenes {
        parts.push(format!("Scene {}: {}", scene.number, scene.heading));
        parts.push(scene.content.clone().unwrap_or_default());
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use immo_db::models::{SceneStatus, SectionStatus};
    use uuid::Uuid;

    fn section(number: i32, title: &str, summary: &str) -> Section {
        Section {
            id: Uuid::new_v4(),
            content_id: Uuid::nil(),
            number,
            title: title.to_owned(),
            summary: summary.to_owned(),
            style_description: None,
            status: SectionStatus::Pending,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn scene(number: i32, heading: &str, prose: Option<&str>) -> Scene {
        Scene {
            id: Uuid::new_v4(),
            content_id: Uuid::nil(),
            section_id: Uuid::nil(),
            number,
            heading: heading.to_owned(),
            setting: String::new(),
            characters: "[]".to_owned(),
            key_events: String::new(),
            emotional_tone: String::new(),
            content: prose.map(str::to_owned),
            status: if prose.is_some() {
                SceneStatus::Completed
            } else {
                SceneStatus::Pending
            },
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_scene_of_first_section_has_no_context() {
        let sections = vec![section(1, "Arrival", "She arrives.")];
        let scenes = vec![scene(1, "Dock", Some("Fog."))];
        assert_eq!(build_previous_context(1, 1, &sections, &scenes), "");
    }

    #[test]
    fn earlier_sections_then_earlier_scenes_in_order() {
        let sections = vec![
            section(3, "Resolution", "It ends."),
            section(1, "Arrival", "She arrives."),
            section(2, "Investigation", "She digs."),
        ];
        let scenes = vec![
            scene(2, "Lighthouse", Some("The lamp was dark.")),
            scene(1, "Dock", Some("Fog rolled in.")),
            scene(3, "Cellar", Some("Not yet relevant.")),
        ];

        let context = build_previous_context(3, 3, &sections, &scenes);
        assert_eq!(
            context,
            "Section 1: Arrival\n\nShe arrives.\n\n\
             Section 2: Investigation\n\nShe digs.\n\n\
             Scene 1: Dock\n\nFog rolled in.\n\n\
             Scene 2: Lighthouse\n\nThe lamp was dark."
        );
    }

    #[test]
    fn scenes_without_prose_are_skipped() {
        let sections = vec![section(1, "Arrival", "She arrives.")];
        let scenes = vec![
            scene(1, "Dock", None),
            scene(2, "Lighthouse", Some("")),
            scene(3, "Pier", Some("Gulls.")),
        ];
        let context = build_previous_context(2, 4, &sections, &scenes);
        assert_eq!(
            context,
            "Section 1: Arrival\n\nShe arrives.\n\nScene 3: Pier\n\nGulls."
        );
    }

    #[test]
    fn later_sections_never_leak_in() {
        let sections = vec![section(1, "A", "a"), section(2, "B", "b"), section(3, "C", "c")];
        let context = build_previous_context(2, 1, &sections, &[]);
        assert_eq!(context, "Section 1: A\n\na");
    }
}
