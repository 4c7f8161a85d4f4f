//! Background task runner and progress reporting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::store::{EvaluationPatch, EvaluationStore};
use crate::types::{BceError, Result};

/// Runs evaluations in the background, keyed by evaluation id.
///
/// Submission is fire-and-forget from the caller's point of view. A task
/// that returns an error has already recorded `Failed` on its evaluation;
/// the runner logs the error so process-level supervision can observe it.
pub struct TaskRunner {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRunner {
    /// Create an empty runner.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a named background task.
    pub async fn spawn<F>(&self, task_id: impl Into<String>, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task_id = task_id.into();
        let id = task_id.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                error!(task_id = %id, error = %e, "Background task failed");
            }
        });

        debug!(task_id = %task_id, "Spawned background task");
        self.tasks.lock().await.insert(task_id, handle);
    }

    /// Wait for a named task to finish. Unknown ids return immediately.
    pub async fn join(&self, task_id: &str) -> Result<()> {
        let handle = self.tasks.lock().await.remove(task_id);
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| BceError::Internal(format!("background task panicked: {e}")))?;
        }
        Ok(())
    }

    /// Whether the named task has finished. Unknown ids count as finished.
    pub async fn is_finished(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Number of tracked tasks still running.
    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards monotonically non-decreasing progress to the store.
///
/// Sub-evaluators register how many batch tasks they will run, then tick
/// once per finished batch. The percentage is computed and written under
/// one mutex, so a slow tick can never overwrite a later, larger value.
pub struct ProgressTracker {
    store: Arc<dyn EvaluationStore>,
    evaluation_id: String,
    total: AtomicUsize,
    completed: AtomicUsize,
    last_written: Mutex<f32>,
}

impl ProgressTracker {
    /// Create a tracker for one evaluation.
    pub fn new(store: Arc<dyn EvaluationStore>, evaluation_id: impl Into<String>) -> Self {
        Self {
            store,
            evaluation_id: evaluation_id.into(),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            last_written: Mutex::new(0.0),
        }
    }

    /// Register `count` more batch tasks for this evaluation.
    pub fn add_total(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
    }

    /// Record one finished batch task and forward the new percentage.
    pub async fn tick(&self) -> Result<()> {
        self.completed.fetch_add(1, Ordering::SeqCst);

        let mut last_written = self.last_written.lock().await;

        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return Ok(());
        }
        let completed = self.completed.load(Ordering::SeqCst).min(total);
        let progress = (completed as f32 / total as f32) * 100.0;
        if progress <= *last_written {
            return Ok(());
        }

        self.store
            .update(
                &self.evaluation_id,
                EvaluationPatch::new().with_progress(progress),
            )
            .await?;
        *last_written = progress;
        debug!(evaluation_id = %self.evaluation_id, progress = progress, "Progress updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEvaluationStore;
    use crate::types::{GuidelinePayload, Payload};
    use rulebook::GuidelineContent;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_spawn_and_join() {
        let runner = TaskRunner::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        runner
            .spawn("task-1", async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        runner.join("task-1").await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_join_unknown_task() {
        let runner = TaskRunner::new();
        runner.join("no-such-task").await.unwrap();
    }

    #[tokio::test]
    async fn test_active_count_tracks_running_tasks() {
        let runner = TaskRunner::new();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        runner
            .spawn("task-1", async move {
                let _ = gate.await;
                Ok(())
            })
            .await;

        assert!(!runner.is_finished("task-1").await);
        assert_eq!(runner.active_count().await, 1);

        release.send(()).unwrap();
        runner.join("task-1").await.unwrap();

        assert!(runner.is_finished("task-1").await);
        assert_eq!(runner.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_progress_never_regresses() {
        let store = Arc::new(MemoryEvaluationStore::new());
        let evaluation = store
            .create(
                "agent-1",
                vec![Payload::from(GuidelinePayload::add(GuidelineContent::new(
                    "a", "b",
                )))],
            )
            .await
            .unwrap();

        let tracker = ProgressTracker::new(store.clone() as Arc<dyn EvaluationStore>, &evaluation.id);
        tracker.add_total(2);

        tracker.tick().await.unwrap();
        assert_eq!(store.read(&evaluation.id).await.unwrap().progress, 50.0);

        // Registering more work shrinks the computed percentage below what
        // was already written, so the next tick must not write it
        tracker.add_total(2);
        tracker.tick().await.unwrap();
        assert_eq!(store.read(&evaluation.id).await.unwrap().progress, 50.0);

        tracker.tick().await.unwrap();
        assert_eq!(store.read(&evaluation.id).await.unwrap().progress, 75.0);

        tracker.tick().await.unwrap();
        assert_eq!(store.read(&evaluation.id).await.unwrap().progress, 100.0);
    }
}
