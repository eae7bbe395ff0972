//! Single-cursor task queue.
//!
//! At most one unit is mid-pipeline at a time. The slot is a one-permit
//! semaphore owned by the queue: whoever holds the permit drains pending
//! tasks oldest-first, and everyone else returns immediately, trusting the
//! holder to pick up their work.

use chrono::Utc;
use kenning_core::error::{ExtractionError, PipelineError, StoreError};
use kenning_core::event::DomainEvent;
use kenning_core::store::{Query, StoreExt};
use kenning_core::task::{PipelineStep, Task, TaskStatus};
use kenning_core::unit::ConversationUnit;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::steps::{ingest_unit, Pipeline};

/// Task counts per status, plus whether a unit is being processed now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: bool,
}

#[derive(Clone)]
pub struct TaskQueue {
    pipeline: Arc<Pipeline>,
    slot: Arc<Semaphore>,
}

impl TaskQueue {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Store an utterance and enqueue it.
    pub async fn ingest(&self, session_id: &str, speaker: &str, raw_text: &str) -> Result<(ConversationUnit, Task), PipelineError> {
        let unit = ingest_unit(self.pipeline.store().as_ref(), session_id, speaker, raw_text).await?;
        self.pipeline.events().publish(DomainEvent::UnitIngested {
            unit_id: unit.id.clone(),
            session_id: unit.session_id.clone(),
            timestamp: unit.timestamp,
        });
        let task = self.enqueue(&unit.id).await?;
        Ok((unit, task))
    }

    /// Create a pending task for `unit_id` and kick the drain in the background.
    pub async fn enqueue(&self, unit_id: &str) -> Result<Task, PipelineError> {
        let task = Task::process_unit(unit_id, self.pipeline.config().max_attempts);
        self.pipeline.store().create(&task).await?;
        info!(task_id = %task.id, unit_id, "Enqueued task");
        self.kick();
        Ok(task)
    }

    fn kick(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.advance().await;
        });
    }

    /// Drain pending tasks if the slot is free. Returns how many tasks this
    /// call processed; 0 when another drain already holds the slot.
    ///
    /// A task that cannot be claimed stays pending and is passed over for
    /// the rest of this call.
    pub async fn advance(&self) -> usize {
        let mut processed = 0;
        let mut skipped: HashSet<String> = HashSet::new();
        loop {
            let Ok(permit) = self.slot.clone().try_acquire_owned() else {
                return processed;
            };
            loop {
                match self.next_pending(&skipped).await {
                    Ok(Some(task)) => {
                        let task_id = task.id.clone();
                        if self.process(task).await {
                            processed += 1;
                        } else {
                            skipped.insert(task_id);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Could not read pending tasks");
                        return processed;
                    }
                }
            }
            drop(permit);

            // A task enqueued while we held the slot had its kick turned away.
            match self.next_pending(&skipped).await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return processed,
            }
        }
    }

    /// Oldest pending task not in `skipped`.
    async fn next_pending(&self, skipped: &HashSet<String>) -> Result<Option<Task>, StoreError> {
        let query = Query::new().eq("status", TaskStatus::Pending).sort_asc("created_at");
        let store = self.pipeline.store();
        if skipped.is_empty() {
            return store.first(query).await;
        }
        let pending: Vec<Task> = store.query(query).await?;
        Ok(pending.into_iter().find(|t| !skipped.contains(&t.id)))
    }

    async fn count(&self, status: TaskStatus) -> Result<usize, StoreError> {
        self.pipeline
            .store()
            .count::<Task>(Query::new().eq("status", status))
            .await
    }

    /// Run one task to completion or failure. Never returns an error: every
    /// outcome is recorded on the task itself. `false` when the task could
    /// not be claimed and is still pending.
    async fn process(&self, task: Task) -> bool {
        let store = self.pipeline.store();
        let attempts = task.attempts.saturating_add(1);
        if let Err(e) = store
            .update::<Task>(
                &task.id,
                json!({
                    "status": TaskStatus::Processing,
                    "attempts": attempts,
                    "updated_at": Utc::now().timestamp_millis(),
                }),
            )
            .await
        {
            warn!(task_id = %task.id, error = %e, "Could not claim task, leaving it pending");
            return false;
        }
        self.publish(&task, TaskStatus::Processing, None);

        let outcome = self.run(&task).await;
        let now = Utc::now();
        let (status, patch, error) = match outcome {
            Ok(()) => (
                TaskStatus::Completed,
                json!({
                    "status": TaskStatus::Completed,
                    "error": null,
                    "completed_at": now.timestamp_millis(),
                    "updated_at": now.timestamp_millis(),
                }),
                None,
            ),
            Err(e) => {
                warn!(task_id = %task.id, unit_id = %task.unit_id, error = %e, "Task failed");
                (
                    TaskStatus::Failed,
                    json!({
                        "status": TaskStatus::Failed,
                        "error": e.to_string(),
                        "failed_at": now.timestamp_millis(),
                        "updated_at": now.timestamp_millis(),
                    }),
                    Some(e.to_string()),
                )
            }
        };

        if let Err(e) = store.update::<Task>(&task.id, patch).await {
            warn!(task_id = %task.id, error = %e, "Could not record task outcome");
        }
        self.publish(&task, status, error);
        true
    }

    async fn run(&self, task: &Task) -> Result<(), PipelineError> {
        let store = self.pipeline.store();
        let unit: ConversationUnit = store
            .get(&task.unit_id)
            .await?
            .ok_or_else(|| ExtractionError::UnitNotFound(task.unit_id.clone()))?;

        if unit.processed {
            debug!(task_id = %task.id, unit_id = %unit.id, "Unit already processed");
            return Ok(());
        }

        for step in PipelineStep::remaining_after(task.checkpoint.map(|c| c.step)) {
            debug!(task_id = %task.id, step = %step, "Running step");
            self.pipeline.run_step(step, &unit).await?;

            let now = Utc::now().timestamp_millis();
            store
                .update::<Task>(
                    &task.id,
                    json!({
                        "checkpoint": {"step": step, "timestamp": now},
                        "updated_at": now,
                    }),
                )
                .await?;
        }
        info!(task_id = %task.id, unit_id = %unit.id, "Unit processed");
        Ok(())
    }

    fn publish(&self, task: &Task, status: TaskStatus, error: Option<String>) {
        self.pipeline.events().publish(DomainEvent::TaskStateChanged {
            task_id: task.id.clone(),
            unit_id: task.unit_id.clone(),
            status,
            error,
            timestamp: Utc::now(),
        });
    }

    /// Startup recovery: tasks left `processing` by a crash go back to
    /// `pending`, keeping their checkpoints.
    pub async fn recover(&self) -> Result<usize, PipelineError> {
        let store = self.pipeline.store();
        let stuck: Vec<Task> = store
            .query(Query::new().eq("status", TaskStatus::Processing))
            .await?;
        for task in &stuck {
            store
                .update::<Task>(
                    &task.id,
                    json!({
                        "status": TaskStatus::Pending,
                        "updated_at": Utc::now().timestamp_millis(),
                    }),
                )
                .await?;
        }
        if !stuck.is_empty() {
            info!(count = stuck.len(), "Recovered interrupted tasks");
        }
        Ok(stuck.len())
    }

    /// Re-enqueue a failed task. The checkpoint is kept, so completed steps
    /// are not repeated.
    pub async fn retry(&self, task_id: &str) -> Result<Task, PipelineError> {
        let store = self.pipeline.store();
        let task: Task = store
            .get(task_id)
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))?;

        if task.status != TaskStatus::Failed {
            return Err(PipelineError::NotRetryable {
                task_id: task.id,
                reason: format!("status is {}", task.status.as_str()),
            });
        }
        if !task.can_retry() {
            return Err(PipelineError::NotRetryable {
                task_id: task.id,
                reason: format!("{} of {} attempts used", task.attempts, task.max_attempts),
            });
        }

        store
            .update::<Task>(
                task_id,
                json!({
                    "status": TaskStatus::Pending,
                    "error": null,
                    "failed_at": null,
                    "updated_at": Utc::now().timestamp_millis(),
                }),
            )
            .await?;
        info!(task_id, "Retrying task");
        self.kick();

        store
            .get(task_id)
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound(task_id.to_string()))
    }

    pub async fn status(&self) -> Result<QueueStatus, PipelineError> {
        Ok(QueueStatus {
            pending: self.count(TaskStatus::Pending).await?,
            processing: self.count(TaskStatus::Processing).await?,
            completed: self.count(TaskStatus::Completed).await?,
            failed: self.count(TaskStatus::Failed).await?,
            active: self.slot.available_permits() == 0,
        })
    }

    /// Drain the queue and wait until no task is pending or running.
    ///
    /// Fails with [`PipelineError::Stalled`] when pending tasks remain that
    /// no drain can claim.
    pub async fn wait_idle(&self) -> Result<(), PipelineError> {
        let mut last_pending = None;
        loop {
            let processed = self.advance().await;
            // Wait out a drain started elsewhere.
            if let Ok(permit) = self.slot.acquire().await {
                drop(permit);
            }
            let pending = self.count(TaskStatus::Pending).await?;
            if pending == 0 {
                return Ok(());
            }
            if processed == 0 && last_pending == Some(pending) {
                return Err(PipelineError::Stalled { pending });
            }
            last_pending = Some(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenning_config::{PipelineConfig, ResolverConfig};
    use kenning_core::error::LlmError;
    use kenning_core::event::EventBus;
    use kenning_core::llm::LlmClient;
    use kenning_core::task::Checkpoint;
    use kenning_providers::ScriptedClient;
    use kenning_core::record::Collection;
    use kenning_store::InMemoryStore;
    use std::time::Duration;

    use crate::test_support::FailingStore;

    const EMPTY: &str = r#"{"propositions": [], "relations": [], "entities": []}"#;

    fn queue(store: Arc<InMemoryStore>, llm: Option<Arc<ScriptedClient>>) -> TaskQueue {
        TaskQueue::new(Pipeline::new(
            store,
            llm.map(|c| c as Arc<dyn LlmClient>),
            PipelineConfig::default(),
            ResolverConfig::default(),
            Arc::new(EventBus::default()),
        ))
    }

    #[tokio::test]
    async fn processes_units_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedClient::with_responses([EMPTY, EMPTY]));
        let q = queue(store.clone(), Some(llm.clone()));

        let (first, _) = q.ingest("s1", "user", "first").await.unwrap();
        let (second, _) = q.ingest("s1", "user", "second").await.unwrap();
        q.wait_idle().await.unwrap();

        let prompts: Vec<String> = llm.requests().into_iter().map(|r| r.prompt).collect();
        assert!(prompts[0].contains("first"));
        assert!(prompts[1].contains("second"));

        for id in [&first.id, &second.id] {
            let unit: ConversationUnit = store.get(id).await.unwrap().unwrap();
            assert!(unit.processed);
        }
        let status = q.status().await.unwrap();
        assert_eq!(status.completed, 2);
        assert_eq!(status.pending + status.failed, 0);
    }

    #[tokio::test]
    async fn failure_does_not_block_the_queue() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedClient::new().fail_when("broken", LlmError::Timeout("slow".into())));
        llm.push(EMPTY);
        let q = queue(store.clone(), Some(llm));

        let (bad_unit, bad) = q.ingest("s1", "user", "broken").await.unwrap();
        let (good_unit, good) = q.ingest("s1", "user", "fine").await.unwrap();
        q.wait_idle().await.unwrap();

        let bad: Task = store.get(&bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.error.as_deref().unwrap().contains("slow"));
        assert!(bad.failed_at.is_some());
        assert_eq!(bad.checkpoint.map(|c| c.step), Some(PipelineStep::Preprocess));
        let unit: ConversationUnit = store.get(&bad_unit.id).await.unwrap().unwrap();
        assert!(!unit.processed);

        let good: Task = store.get(&good.id).await.unwrap().unwrap();
        assert_eq!(good.status, TaskStatus::Completed);
        let unit: ConversationUnit = store.get(&good_unit.id).await.unwrap().unwrap();
        assert!(unit.processed);
    }

    #[tokio::test]
    async fn unclaimable_task_does_not_block_later_tasks() {
        let stuck = Task::process_unit("u-stuck", 3);
        let stuck_id = stuck.id.clone();
        let store = Arc::new(FailingStore::new(move |collection, id, patch| {
            collection == Collection::Tasks && id == stuck_id && patch["status"] == "processing"
        }));
        store.create(&stuck).await.unwrap();

        let q = TaskQueue::new(Pipeline::new(
            store.clone(),
            Some(Arc::new(ScriptedClient::with_responses([EMPTY])) as Arc<dyn LlmClient>),
            PipelineConfig::default(),
            ResolverConfig::default(),
            Arc::new(EventBus::default()),
        ));
        let (_, good) = q.ingest("s1", "user", "fine").await.unwrap();

        let idle = tokio::time::timeout(Duration::from_secs(5), q.wait_idle())
            .await
            .expect("wait_idle must return");
        assert!(matches!(idle, Err(PipelineError::Stalled { pending: 1 })));

        let good: Task = store.get(&good.id).await.unwrap().unwrap();
        assert_eq!(good.status, TaskStatus::Completed);
        let stuck: Task = store.get(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, TaskStatus::Pending);
        assert_eq!(stuck.attempts, 0);

        // A fresh drain passes over it again without spinning.
        let processed = tokio::time::timeout(Duration::from_secs(5), q.advance()).await.unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn missing_unit_fails_task() {
        let store = Arc::new(InMemoryStore::new());
        let q = queue(store.clone(), None);
        let task = q.enqueue("ghost").await.unwrap();
        q.wait_idle().await.unwrap();

        let task: Task = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn recover_resets_processing_tasks() {
        let store = Arc::new(InMemoryStore::new());
        let mut task = Task::process_unit("u1", 3);
        task.status = TaskStatus::Processing;
        task.checkpoint = Some(Checkpoint {
            step: PipelineStep::Extract,
            timestamp: Utc::now(),
        });
        store.create(&task).await.unwrap();

        let q = queue(store.clone(), None);
        assert_eq!(q.recover().await.unwrap(), 1);
        let reloaded: Task = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Pending);
        assert_eq!(reloaded.checkpoint.map(|c| c.step), Some(PipelineStep::Extract));
        assert_eq!(q.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_only_failed_tasks_within_budget() {
        let store = Arc::new(InMemoryStore::new());
        let q = queue(store.clone(), None);

        let err = q.retry("nope").await.unwrap_err();
        assert!(matches!(err, PipelineError::TaskNotFound(_)));

        let mut done = Task::process_unit("u1", 3);
        done.status = TaskStatus::Completed;
        store.create(&done).await.unwrap();
        assert!(matches!(q.retry(&done.id).await, Err(PipelineError::NotRetryable { .. })));

        let mut spent = Task::process_unit("u1", 2);
        spent.status = TaskStatus::Failed;
        spent.attempts = 2;
        store.create(&spent).await.unwrap();
        assert!(matches!(q.retry(&spent.id).await, Err(PipelineError::NotRetryable { .. })));
    }

    #[tokio::test]
    async fn retry_resumes_after_checkpoint() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedClient::new());
        llm.push_error(LlmError::RateLimited { retry_after_secs: 1 });
        llm.push(EMPTY);
        let q = queue(store.clone(), Some(llm.clone()));

        let (unit, task) = q.ingest("s1", "user", "hello there").await.unwrap();
        q.wait_idle().await.unwrap();
        let failed: Task = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);

        let retried = q.retry(&task.id).await.unwrap();
        assert!(retried.error.is_none());
        q.wait_idle().await.unwrap();

        let done: Task = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.attempts, 2);
        assert_eq!(llm.calls(), 2);
        let unit: ConversationUnit = store.get(&unit.id).await.unwrap().unwrap();
        assert!(unit.processed);
    }

    #[tokio::test]
    async fn processed_unit_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let llm = Arc::new(ScriptedClient::new());
        let q = queue(store.clone(), Some(llm.clone()));

        let mut unit = ConversationUnit::new("s1", "user", "done already");
        unit.processed = true;
        store.create(&unit).await.unwrap();
        let task = q.enqueue(&unit.id).await.unwrap();
        q.wait_idle().await.unwrap();

        let task: Task = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(llm.calls(), 0);
    }
}
