//! `immo status` command: show content progress and per-section status.

use anyhow::Result;

use immo_core::coordinator::{Coordinator, MAX_PAGE_SIZE};
use immo_core::{ContentView, SceneView, SectionView};
use immo_db::models::{ContentStatus, SceneStatus, SectionStatus};

use crate::content_cmds::parse_content_id;

/// Run the status command.
///
/// With an ID, shows that content with its sections and scenes. Without
/// one, lists the most recent jobs.
pub async fn run_status(coordinator: &Coordinator, content_id: Option<&str>) -> Result<()> {
    match content_id {
        Some(id) => run_content_status(coordinator, id).await,
        None => run_list(coordinator).await,
    }
}

async fn run_content_status(coordinator: &Coordinator, id_str: &str) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    let content = coordinator.get_content(content_id).await?;
    print_content(&content);

    let sections = coordinator.list_sections(content_id).await?;
    if sections.is_empty() {
        return Ok(());
    }
    println!();
    println!("Sections:");
    for section in &sections {
        print_section(section);
        for scene in &coordinator.list_scenes(content_id, section.number).await? {
            print_scene(scene);
        }
    }
    Ok(())
}

async fn run_list(coordinator: &Coordinator) -> Result<()> {
    let contents = coordinator.list_contents(MAX_PAGE_SIZE, 0).await?;
    if contents.is_empty() {
        println!("No content yet. Create one with `immo create <description>`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:>5}  {:<30}",
        "ID", "STATUS", "PROG", "TITLE"
    );
    println!("{}", "-".repeat(97));
    for content in &contents {
        let title = content.title.as_deref().unwrap_or(&content.description);
        println!(
            "{:<36}  {:<20}  {:>4}%  {:<30}",
            content.id,
            content.status.as_str(),
            content.progress,
            truncate(title, 30),
        );
    }
    Ok(())
}

/// Header block for one content job.
pub fn print_content(content: &ContentView) {
    println!("Content: {}", content.id);
    if let Some(title) = &content.title {
        println!("Title: {title}");
    }
    println!(
        "Status: {} [{}] ({}%)",
        content.status,
        content_icon(content.status),
        content.progress
    );
    println!("Sections requested: {}", content.sections_count);
    if let Some(style) = &content.style {
        println!("Style: {style}");
    }
    println!("Model: {}", content.model);
    println!(
        "Updated: {}",
        content.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(error) = &content.error {
        println!("Error: {error}");
    }
}

pub fn print_section(section: &SectionView) {
    println!(
        "  [{}] {}. {} ({} scenes, {}%, {})",
        section_icon(section.status),
        section.number,
        section.title,
        section.scene_count,
        section.progress,
        section.status
    );
    if let Some(error) = &section.error {
        println!("      error: {error}");
    }
}

pub fn print_scene(scene: &SceneView) {
    let words = scene
        .content
        .as_deref()
        .map_or(0, |prose| prose.split_whitespace().count());
    println!(
        "      [{}] {}. {} ({} words)",
        scene_icon(scene.status),
        scene.number,
        scene.heading,
        words
    );
    if let Some(error) = &scene.error {
        println!("          error: {error}");
    }
}

fn content_icon(status: ContentStatus) -> &'static str {
    match status {
        ContentStatus::Pending => ".",
        ContentStatus::Completed => "+",
        ContentStatus::PartiallyCompleted => "~",
        ContentStatus::Failed => "!",
        s if s.is_processing() => "*",
        _ => ">",
    }
}

fn section_icon(status: SectionStatus) -> &'static str {
    match status {
        SectionStatus::Pending => ".",
        SectionStatus::GeneratingScenes => "*",
        SectionStatus::ScenesCompleted => ">",
        SectionStatus::Completed => "+",
        SectionStatus::Failed => "!",
    }
}

fn scene_icon(status: SceneStatus) -> &'static str {
    match status {
        SceneStatus::Pending => ".",
        SceneStatus::Generating => "*",
        SceneStatus::Completed => "+",
        SceneStatus::Failed => "!",
    }
}

/// Cut `s` to at most `max` characters, marking the cut with `...`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("The Coastal Cipher", 30), "The Coastal Cipher");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let title = "Café ".repeat(10);
        let cut = truncate(&title, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn icons_distinguish_working_from_settled() {
        assert_eq!(content_icon(ContentStatus::ProcessingProse), "*");
        assert_eq!(content_icon(ContentStatus::OutlineCompleted), ">");
        assert_eq!(content_icon(ContentStatus::PartiallyCompleted), "~");
        assert_eq!(section_icon(SectionStatus::ScenesCompleted), ">");
        assert_eq!(scene_icon(SceneStatus::Failed), "!");
    }
}
