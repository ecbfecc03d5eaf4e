use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle of a content generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Pending,
    ProcessingOutline,
    OutlineCompleted,
    ProcessingSections,
    SectionsCompleted,
    ProcessingScenes,
    ScenesCompleted,
    ProcessingProse,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl ContentStatus {
    pub const ALL: [ContentStatus; 11] = [
        Self::Pending,
        Self::ProcessingOutline,
        Self::OutlineCompleted,
        Self::ProcessingSections,
        Self::SectionsCompleted,
        Self::ProcessingScenes,
        Self::ScenesCompleted,
        Self::ProcessingProse,
        Self::Completed,
        Self::PartiallyCompleted,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::ProcessingOutline => "PROCESSING_OUTLINE",
            Self::OutlineCompleted => "OUTLINE_COMPLETED",
            Self::ProcessingSections => "PROCESSING_SECTIONS",
            Self::SectionsCompleted => "SECTIONS_COMPLETED",
            Self::ProcessingScenes => "PROCESSING_SCENES",
            Self::ScenesCompleted => "SCENES_COMPLETED",
            Self::ProcessingProse => "PROCESSING_PROSE",
            Self::Completed => "COMPLETED",
            Self::PartiallyCompleted => "PARTIALLY_COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// True while a stage is running against this content.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            Self::ProcessingOutline
                | Self::ProcessingSections
                | Self::ProcessingScenes
                | Self::ProcessingProse
        )
    }

    pub const PROCESSING: [ContentStatus; 4] = [
        Self::ProcessingOutline,
        Self::ProcessingSections,
        Self::ProcessingScenes,
        Self::ProcessingProse,
    ];
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = ContentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ContentStatusParseError(s.to_owned()))
    }
}

/// Error returned when parsing an invalid [`ContentStatus`] string.
#[derive(Debug, Clone)]
pub struct ContentStatusParseError(pub String);

impl fmt::Display for ContentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid content status: {:?}", self.0)
    }
}

impl std::error::Error for ContentStatusParseError {}

/// Lifecycle of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    Pending,
    GeneratingScenes,
    ScenesCompleted,
    Completed,
    Failed,
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::GeneratingScenes => "GENERATING_SCENES",
            Self::ScenesCompleted => "SCENES_COMPLETED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for SectionStatus {
    type Err = SectionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "GENERATING_SCENES" => Ok(Self::GeneratingScenes),
            "SCENES_COMPLETED" => Ok(Self::ScenesCompleted),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(SectionStatusParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SectionStatus`] string.
#[derive(Debug, Clone)]
pub struct SectionStatusParseError(pub String);

impl fmt::Display for SectionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid section status: {:?}", self.0)
    }
}

impl std::error::Error for SectionStatusParseError {}

/// Lifecycle of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SceneStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for SceneStatus {
    type Err = SceneStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "GENERATING" => Ok(Self::Generating),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(SceneStatusParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SceneStatus`] string.
#[derive(Debug, Clone)]
pub struct SceneStatusParseError(pub String);

impl fmt::Display for SceneStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid scene status: {:?}", self.0)
    }
}

impl std::error::Error for SceneStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One end-to-end generation job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Content {
    pub id: Uuid,
    pub description: String,
    pub sections_count: i32,
    pub style: Option<String>,
    pub status: ContentStatus,
    pub title: Option<String>,
    pub outline: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Content {
    /// Title and outline are both present and non-blank.
    pub fn has_outline(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.title) && filled(&self.outline)
    }
}

/// Fields supplied when a job is submitted.
#[derive(Debug, Clone)]
pub struct NewContent<'a> {
    pub description: &'a str,
    pub sections_count: i32,
    pub style: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Section {
    pub id: Uuid,
    pub content_id: Uuid,
    pub number: i32,
    pub title: String,
    pub summary: String,
    pub style_description: Option<String>,
    pub status: SectionStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A section as produced by the outline or sections stage; numbered by
/// position on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSection {
    pub title: String,
    pub summary: String,
    pub style_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Scene {
    pub id: Uuid,
    pub content_id: Uuid,
    pub section_id: Uuid,
    pub number: i32,
    pub heading: String,
    pub setting: String,
    /// JSON array of names; see [`encode_characters`].
    pub characters: String,
    pub key_events: String,
    pub emotional_tone: String,
    pub content: Option<String>,
    pub status: SceneStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scene {
    pub fn character_names(&self) -> Vec<String> {
        decode_characters(&self.characters)
    }

    /// Prose has been written for this scene.
    pub fn has_prose(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// A scene as produced by the scene breakdown; numbered by position on
/// insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScene {
    pub heading: String,
    pub setting: String,
    pub characters: Vec<String>,
    pub key_events: String,
    pub emotional_tone: String,
}

// ---------------------------------------------------------------------------
// Characters codec
// ---------------------------------------------------------------------------

/// Encode an ordered list of character names for storage.
pub fn encode_characters(names: &[String]) -> String {
    serde_json::Value::from(names.to_vec()).to_string()
}

/// Decode a stored character list.
///
/// Blank text is an empty list. Text that is not a JSON array of strings is
/// kept as a single name.
pub fn decode_characters(stored: &str) -> Vec<String> {
    let trimmed = stored.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<String>>(trimmed) {
        Ok(names) => names,
        Err(_) => vec![trimmed.to_owned()],
    }
}
