//! Prompt construction for each stage. Pure string assembly, no I/O.

use crate::context::{OutlineContext, ProseContext, SceneGenerationContext, SectionsContext};

pub const CONTENT_SYSTEM_PROMPT: &str = "You are a professional content creator.";
pub const PROSE_SYSTEM_PROMPT: &str = "You are a professional writer.";

/// Named styles with a hand-written instruction. Anything else is passed
/// through as "resembles {style}".
const STYLE_ADAPTATIONS: &[(&str, &str)] = &[(
    "literary",
    "Write in a literary style with rich imagery, complex characters, and thematic depth. \
     Use elegant prose similar to authors like Toni Morrison or Ian McEwan.",
)];

/// Writing-style paragraph for a prompt; empty when no style is set.
pub fn style_instruction(style: Option<&str>) -> String {
    let Some(style) = style.map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    let key = style.to_lowercase();
    match STYLE_ADAPTATIONS.iter().find(|(name, _)| *name == key) {
        Some((_, instruction)) => format!("WRITING STYLE:\n{instruction}"),
        None => format!("WRITING STYLE:\nWrite in a style that resembles {key}."),
    }
}

fn push_style(prompt: &mut String, style: Option<&str>) {
    let instruction = style_instruction(style);
    if !instruction.is_empty() {
        prompt.push_str(&instruction);
        prompt.push_str("\n\n");
    }
}

pub fn outline_prompt(ctx: &OutlineContext) -> String {
    let mut prompt = String::with_capacity(1024 + ctx.description.len());
    prompt.push_str("You are a professional content creator designing a compelling outline.\n\n");
    prompt.push_str("CONTENT DESCRIPTION:\n");
    prompt.push_str(ctx.description.trim());
    prompt.push_str("\n\n");
    push_style(&mut prompt, ctx.style.as_deref());
    prompt.push_str(&format!(
        "Provide:\n\
         1. An engaging title\n\
         2. A summary of the whole piece (250-300 words)\n\
         3. Exactly {} sections, each with a title and a 50-100 word summary\n\n",
        ctx.sections_count
    ));
    prompt.push_str(
        "Respond with a single JSON object in this shape and nothing else:\n\
         {\n  \"title\": \"Content title\",\n  \"outline\": \"Overall summary...\",\n  \
         \"sections\": [\n    {\"title\": \"Section 1 title\", \"summary\": \"Section 1 summary...\"}\n  ]\n}\n",
    );
    prompt
}

pub fn sections_prompt(ctx: &SectionsContext) -> String {
    let mut prompt = String::with_capacity(1024 + ctx.content_outline.len());
    prompt.push_str(&format!(
        "You are a content creator writing detailed sections for a piece titled \"{}\".\n\n",
        ctx.content_title
    ));
    prompt.push_str("CONTENT OUTLINE:\n");
    prompt.push_str(&ctx.content_outline);
    prompt.push_str("\n\n");
    prompt.push_str(&format!(
        "Based on this outline, write {} sections. Each section needs:\n\
         1. A clear, descriptive title\n\
         2. A thorough summary of what the section contains\n\
         3. A style description covering the writing style, tone and approach for that section\n\n",
        ctx.sections_count
    ));
    push_style(&mut prompt, ctx.style.as_deref());
    prompt.push_str(
        "Respond with a JSON array of section objects and nothing else:\n\
         [\n  {\n    \"title\": \"Section title\",\n    \"summary\": \"Detailed summary\",\n    \
         \"style_description\": \"Writing style for this section\"\n  }\n]\n",
    );
    prompt
}

pub fn scene_breakdown_prompt(ctx: &SceneGenerationContext) -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str(&format!(
        "You are a professional content creator working on \"{}\".\n\n",
        ctx.content_title
    ));
    prompt.push_str(&format!(
        "Break section {}: \"{}\" into 3-5 distinct scenes.\n\n",
        ctx.section_number, ctx.section_title
    ));
    prompt.push_str("SECTION CONTEXT:\n");
    prompt.push_str(&format!("- Overall summary: {}\n", ctx.content_outline));
    prompt.push_str(&format!("- This section covers: {}\n\n", ctx.section_summary));
    prompt.push_str(
        "For each scene give:\n\
         1. A short scene heading\n\
         2. The setting (where and when)\n\
         3. The characters involved, if any\n\
         4. The key events and developments\n\
         5. The emotional tone or atmosphere\n\n",
    );
    prompt.push_str(
        "Respond with a JSON array of scene objects and nothing else:\n\
         [\n  {\n    \"scene_heading\": \"Scene title\",\n    \"setting\": \"Location and time of day\",\n    \
         \"characters\": [\"Character 1\", \"Character 2\"],\n    \"key_events\": \"What happens\",\n    \
         \"emotional_tone\": \"The atmosphere\"\n  }\n]\n\n",
    );
    prompt.push_str("The scenes should flow logically and cover the whole section.\n");
    prompt
}

pub fn prose_prompt(ctx: &ProseContext) -> String {
    let mut prompt = String::with_capacity(4096 + ctx.previous_context.len());
    prompt.push_str(&format!(
        "You are a professional content creator writing \"{}\".\n\n",
        ctx.content_title
    ));
    prompt.push_str("CURRENT SCENE:\n");
    prompt.push_str(&format!(
        "- Section: {} (section {})\n",
        ctx.section_title, ctx.section_number
    ));
    if let Some(note) = ctx.section_style.as_deref().filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("- Section style: {note}\n"));
    }
    prompt.push_str(&format!("- Scene heading: {}\n", ctx.scene_heading));
    prompt.push_str(&format!("- Setting: {}\n", ctx.setting));
    prompt.push_str(&format!("- Characters: {}\n", ctx.characters.join(", ")));
    prompt.push_str(&format!("- Key events: {}\n", ctx.key_events));
    prompt.push_str(&format!("- Emotional tone: {}\n\n", ctx.emotional_tone));
    prompt.push_str("CONTEXT:\n");
    prompt.push_str(&format!("- Overall content: {}\n", ctx.content_outline));
    prompt.push_str(&format!(
        "- Previous content context: {}\n\n",
        ctx.previous_context
    ));
    push_style(&mut prompt, ctx.style.as_deref());
    prompt.push_str(
        "Write an engaging, immersive scene of roughly 500-800 words. It should:\n\
         - Open with vivid scene-setting that fixes the place and mood\n\
         - Develop the characters through dialogue and action\n\
         - Use concrete sensory detail\n\
         - Advance the key events listed above\n\
         - Hold the emotional tone throughout\n\
         - Close with a natural transition to the next scene\n\n\
         Show rather than tell. Reply with the prose only.\n",
    );
    prompt
}
