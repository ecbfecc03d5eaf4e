//! Background submission of generation work.
//!
//! The coordinator is plain async code and never spawns. Callers that want
//! fire-and-forget behaviour (the HTTP layer, mostly) hand a unit of work
//! to a [`TaskSubmitter`] and return immediately.

use std::fmt::Display;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// A unit of work with nothing left to report; failures are logged inside.
pub type UnitOfWork = BoxFuture<'static, ()>;

/// Handle to submitted work.
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    pub label: String,
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the job. Returns false if it panicked or was aborted.
    pub async fn join(self) -> bool {
        self.handle.await.is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Something that runs units of work in the background.
pub trait TaskSubmitter: Send + Sync {
    fn submit(&self, label: String, work: UnitOfWork) -> JobHandle;
}

/// Wrap a fallible operation as a [`UnitOfWork`] that logs its outcome.
pub fn logged<T, E, F>(label: impl Into<String>, operation: F) -> UnitOfWork
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    let label = label.into();
    async move {
        match operation.await {
            Ok(_) => tracing::info!(job = %label, "job finished"),
            Err(e) => tracing::warn!(job = %label, error = %e, "job failed"),
        }
    }
    .boxed()
}

/// Tokio-backed submitter. Tracks every spawned job so shutdown can wait
/// for in-flight generation to finish writing its results.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    tracker: TaskTracker,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Close the tracker and wait for every running job.
    pub async fn shutdown(&self) {
        self.tracker.close();
        tracing::info!(in_flight = self.tracker.len(), "waiting for background jobs");
        self.tracker.wait().await;
    }
}

impl TaskSubmitter for JobQueue {
    fn submit(&self, label: String, work: UnitOfWork) -> JobHandle {
        let id = Uuid::new_v4();
        tracing::debug!(job_id = %id, job = %label, "submitting job");
        let handle = self.tracker.spawn(work);
        JobHandle { id, label, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submitted_work_runs() {
        let queue = JobQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let handle = queue.submit(
            "count".into(),
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed(),
        );
        assert_eq!(handle.label, "count");
        assert!(handle.join().await);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_jobs() {
        let queue = JobQueue::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            queue.submit(
                "slow".into(),
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }
                .boxed(),
            );
        }
        queue.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn logged_swallows_errors() {
        let queue = JobQueue::new();
        let handle = queue.submit(
            "fails".into(),
            logged("fails", async { Err::<(), _>("provider exploded") }),
        );
        assert!(handle.join().await);
    }
}
