//! Structural validation of provider output for the outline, sections and
//! scene-breakdown stages.

use serde_json::{Map, Value};
use thiserror::Error;

use immo_db::models::{NewScene, NewSection};

use crate::error::{GenerationError, Result};
use crate::llm::json::{normalize_list, type_name};

/// Keys every scene object must carry.
pub const REQUIRED_SCENE_KEYS: [&str; 4] =
    ["scene_heading", "setting", "key_events", "emotional_tone"];

/// Ways a provider response can have the wrong shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseShapeError {
    #[error("expected {what} to be a JSON object, got {found}")]
    NotAnObject {
        what: &'static str,
        found: &'static str,
    },

    #[error("missing required key: {0}")]
    MissingKey(&'static str),

    #[error("{0} must be a non-empty list")]
    EmptyList(&'static str),

    #[error("section {index} is not an object")]
    SectionNotObject { index: usize },

    #[error("section {index} missing {key}")]
    SectionMissingKey { index: usize, key: &'static str },

    #[error("scene {index} is not an object")]
    SceneNotObject { index: usize },

    #[error("scene {index} missing required key: {key}")]
    SceneMissingKey { index: usize, key: &'static str },
}

impl From<ResponseShapeError> for GenerationError {
    fn from(err: ResponseShapeError) -> Self {
        GenerationError::MalformedResponse(err.to_string())
    }
}

/// A validated outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineResponse {
    pub title: String,
    pub outline: String,
    pub sections: Vec<NewSection>,
}

/// Validate an outline response: `title` and `outline` strings plus a
/// non-empty `sections` list of `{title, summary}` objects.
pub fn parse_outline(value: Value) -> Result<OutlineResponse> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ResponseShapeError::NotAnObject {
                what: "outline",
                found: type_name(&other),
            }
            .into());
        }
    };

    let title = take_text(&mut map, "title").ok_or(ResponseShapeError::MissingKey("title"))?;
    let outline =
        take_text(&mut map, "outline").ok_or(ResponseShapeError::MissingKey("outline"))?;
    let sections = match map.remove("sections") {
        None | Some(Value::Null) => return Err(ResponseShapeError::MissingKey("sections").into()),
        Some(Value::Array(items)) => items,
        Some(other) => normalize_list(other, "sections")?,
    };
    if sections.is_empty() {
        return Err(ResponseShapeError::EmptyList("sections").into());
    }

    let sections = sections
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_section(i + 1, item))
        .collect::<Result<Vec<_>>>()?;

    Ok(OutlineResponse {
        title,
        outline,
        sections,
    })
}

/// Validate a sections-elaboration response: an array (or wrapped array) of
/// `{title, summary, style_description?}` objects.
pub fn parse_sections(value: Value) -> Result<Vec<NewSection>> {
    let items = normalize_list(value, "sections")?;
    if items.is_empty() {
        return Err(ResponseShapeError::EmptyList("sections").into());
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_section(i + 1, item))
        .collect()
}

/// Validate a scene-breakdown response: an array (or `{scenes: [...]}`) of
/// objects carrying every key in [`REQUIRED_SCENE_KEYS`].
pub fn parse_scenes(value: Value) -> Result<Vec<NewScene>> {
    let items = normalize_list(value, "scenes")?;
    if items.is_empty() {
        return Err(ResponseShapeError::EmptyList("scenes").into());
    }
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_scene(i + 1, item))
        .collect()
}

fn parse_section(index: usize, item: Value) -> Result<NewSection> {
    let Value::Object(mut map) = item else {
        return Err(ResponseShapeError::SectionNotObject { index }.into());
    };
    let title = take_text(&mut map, "title")
        .ok_or(ResponseShapeError::SectionMissingKey { index, key: "title" })?;
    let summary = take_text(&mut map, "summary")
        .ok_or(ResponseShapeError::SectionMissingKey { index, key: "summary" })?;
    Ok(NewSection {
        title,
        summary,
        style_description: take_text(&mut map, "style_description"),
    })
}

fn parse_scene(index: usize, item: Value) -> Result<NewScene> {
    let Value::Object(mut map) = item else {
        return Err(ResponseShapeError::SceneNotObject { index }.into());
    };
    let mut require = |key: &'static str| {
        take_text(&mut map, key).ok_or(ResponseShapeError::SceneMissingKey { index, key })
    };
    let heading = require("scene_heading")?;
    let setting = require("setting")?;
    let key_events = require("key_events")?;
    let emotional_tone = require("emotional_tone")?;

    Ok(NewScene {
        heading,
        setting,
        characters: take_characters(&mut map),
        key_events,
        emotional_tone,
    })
}

/// Remove `key` as text. Strings are kept verbatim, other scalars and
/// containers as their JSON text; null, blank and absent are `None`.
fn take_text(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    let text = match map.remove(key)? {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };
    (!text.trim().is_empty()).then_some(text)
}

fn take_characters(map: &mut Map<String, Value>) -> Vec<String> {
    match map.remove("characters") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    }
}
