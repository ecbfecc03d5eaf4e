//! Content commands: create a job and drive it through its stages.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use uuid::Uuid;

use immo_core::coordinator::{Coordinator, CreateContent, EventStream, StreamEvent};

use crate::status_cmd::{print_content, print_scene, print_section};

pub fn parse_content_id(id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(id_str).with_context(|| format!("invalid content ID: {id_str}"))
}

pub async fn run_create(
    coordinator: &Coordinator,
    description: &str,
    sections: i32,
    style: Option<&str>,
) -> Result<()> {
    let mut request = CreateContent::new(description).with_sections_count(sections);
    if let Some(style) = style {
        request = request.with_style(style);
    }
    let content = coordinator.create(request).await?;

    println!("Created content {}", content.id);
    println!("  Sections: {}", content.sections_count);
    println!();
    println!("Next: `immo run {}` to generate everything,", content.id);
    println!("  or `immo outline {}` to go stage by stage.", content.id);
    Ok(())
}

/// Run the whole pipeline in the foreground.
///
/// Ctrl+C abandons the run; whatever stage was in flight stays in its
/// working status until `immo reset-stuck` clears it.
pub async fn run_pipeline(coordinator: &Coordinator, id_str: &str) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    println!("Generating content {content_id}...");

    tokio::select! {
        result = coordinator.process_content(content_id) => {
            let content = result?;
            println!();
            print_content(&content);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted. Content {content_id} was left mid-stage.");
            eprintln!("Run `immo reset-stuck` to mark it failed, then `immo run {content_id}` to retry.");
            std::process::exit(130);
        }
    }
}

pub async fn run_outline(coordinator: &Coordinator, id_str: &str, stream: bool) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    let content = if stream {
        print_stream(coordinator.stream_outline(content_id).await?).await?
    } else {
        coordinator.generate_outline(content_id).await?
    };
    print_content(&content);
    if let Some(outline) = &content.outline {
        println!();
        println!("{outline}");
    }
    Ok(())
}

pub async fn run_sections(
    coordinator: &Coordinator,
    id_str: &str,
    count: Option<i32>,
) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    let sections = coordinator.generate_sections(content_id, count).await?;
    println!("Generated {} sections:", sections.len());
    for section in &sections {
        print_section(section);
    }
    Ok(())
}

pub async fn run_scenes(coordinator: &Coordinator, id_str: &str, section: i32) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    let scenes = coordinator
        .generate_scenes_for_section(content_id, section)
        .await?;
    println!("Generated {} scenes for section {section}:", scenes.len());
    for scene in &scenes {
        print_scene(scene);
    }
    Ok(())
}

pub async fn run_prose(
    coordinator: &Coordinator,
    id_str: &str,
    section: i32,
    scene: i32,
    stream: bool,
) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    if stream {
        let view = print_stream(coordinator.stream_prose(content_id, section, scene).await?).await?;
        print_scene(&view);
    } else {
        let view = coordinator
            .generate_prose_for_scene(content_id, section, scene)
            .await?;
        if let Some(prose) = &view.content {
            println!("{prose}");
            println!();
        }
        print_scene(&view);
    }
    Ok(())
}

pub async fn run_finalize(coordinator: &Coordinator, id_str: &str) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    let content = coordinator.finalize_content(content_id).await?;
    print_content(&content);
    Ok(())
}

pub async fn run_reset_stuck(coordinator: &Coordinator, older_than_secs: u64) -> Result<()> {
    let report = coordinator
        .reset_stuck(Duration::from_secs(older_than_secs))
        .await?;
    if report.total() == 0 {
        println!("Nothing stuck for longer than {older_than_secs}s.");
        return Ok(());
    }
    println!("Marked as failed:");
    println!("  contents: {}", report.contents);
    println!("  sections: {}", report.sections);
    println!("  scenes:   {}", report.scenes);
    Ok(())
}

pub async fn run_delete(coordinator: &Coordinator, id_str: &str) -> Result<()> {
    let content_id = parse_content_id(id_str)?;
    coordinator.delete_content(content_id).await?;
    println!("Deleted content {content_id} with its sections and scenes.");
    Ok(())
}

/// Echo deltas to stdout as they arrive and return the stored record.
async fn print_stream<T>(mut events: EventStream<T>) -> Result<T> {
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Delta(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            StreamEvent::Done(record) => {
                println!();
                println!();
                return Ok(record);
            }
        }
    }
    bail!("generation stream ended without a result")
}
