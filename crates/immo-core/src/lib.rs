pub mod context;
pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod prompts;
pub mod response;
pub mod state;
pub mod views;

pub use coordinator::{Coordinator, CreateContent, GenerationSettings, ResetReport, StreamEvent};
pub use error::{GenerationError, Result};
pub use jobs::{JobQueue, TaskSubmitter};
pub use views::{ContentView, SceneView, SectionView};
