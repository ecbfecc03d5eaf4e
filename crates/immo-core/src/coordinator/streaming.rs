//! Streaming variants of the outline and prose stages.
//!
//! Preconditions and the start transition run before the stream is
//! returned, so a refused call fails up front. The stream then yields the
//! provider's text as it arrives and ends with the persisted record, after
//! the same validation and writes as the non-streaming stage.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use uuid::Uuid;

use immo_db::models::ContentStatus;

use super::Coordinator;
use crate::error::Result;
use crate::llm::{TextStream, extract_json};
use crate::views::{ContentView, SceneView};

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// A chunk of generated text.
    Delta(String),
    /// The stored record. Always the last item of a successful stream.
    Done(T),
}

pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<StreamEvent<T>>> + Send>>;

impl Coordinator {
    pub async fn stream_outline(&self, content_id: Uuid) -> Result<EventStream<ContentView>> {
        let content = self.begin_outline(content_id).await?;
        let chunks = self.client.stream_text(&self.outline_request(&content));
        let this = self.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut text = String::new();
            let mut chunks = chunks;
            let mut failure = None;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(delta) => {
                        text.push_str(&delta);
                        yield Ok(StreamEvent::Delta(delta));
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            let result = match failure {
                Some(e) => Err(e),
                None => match extract_json(&text) {
                    Ok(value) => this.finish_outline(content_id, value).await,
                    Err(e) => Err(e),
                },
            };
            let settled = this
                .settle_content(content_id, ContentStatus::ProcessingOutline, result)
                .await;
            match settled {
                Ok(()) => yield this.content_view(content_id).await.map(StreamEvent::Done),
                Err(e) => yield Err(e),
            }
        }))
    }

    pub async fn stream_prose(
        &self,
        content_id: Uuid,
        section_number: i32,
        scene_number: i32,
    ) -> Result<EventStream<SceneView>> {
        let job = self
            .begin_prose(content_id, section_number, scene_number)
            .await?;
        let chunks: TextStream = self.client.stream_text(&job.request);
        let this = self.clone();

        Ok(Box::pin(async_stream::stream! {
            let mut prose = String::new();
            let mut chunks = chunks;
            let mut failure = None;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(delta) => {
                        prose.push_str(&delta);
                        yield Ok(StreamEvent::Delta(delta));
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            let result = match failure {
                Some(e) => Err(e),
                None => this.finish_prose(&job, &prose).await,
            };
            match this.settle_scene(job.scene_id, result).await {
                Ok(scene) => yield Ok(StreamEvent::Done(SceneView::from(scene))),
                Err(e) => yield Err(e),
            }
        }))
    }
}
