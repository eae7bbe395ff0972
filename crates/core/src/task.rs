//! Durable unit-of-work records for the pipeline queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::record::{Collection, Record, new_id};

pub const PROCESS_UNIT_TASK: &str = "process_unit";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// The linear pipeline: preprocess → extract → resolve → derive → complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Preprocess,
    Extract,
    Resolve,
    Derive,
    Complete,
}

impl PipelineStep {
    pub const ORDER: [PipelineStep; 5] = [
        PipelineStep::Preprocess,
        PipelineStep::Extract,
        PipelineStep::Resolve,
        PipelineStep::Derive,
        PipelineStep::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Extract => "extract",
            Self::Resolve => "resolve",
            Self::Derive => "derive",
            Self::Complete => "complete",
        }
    }

    pub fn next(&self) -> Option<PipelineStep> {
        match self {
            Self::Preprocess => Some(Self::Extract),
            Self::Extract => Some(Self::Resolve),
            Self::Resolve => Some(Self::Derive),
            Self::Derive => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    /// Steps still to run given the last completed one.
    pub fn remaining_after(checkpoint: Option<PipelineStep>) -> Vec<PipelineStep> {
        match checkpoint {
            None => Self::ORDER.to_vec(),
            Some(done) => Self::ORDER.into_iter().filter(|s| *s > done).collect(),
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last completed step, persisted after every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: PipelineStep,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    pub task_type: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// The conversation unit this task processes.
    pub unit_id: String,

    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Task {
    pub fn process_unit(unit_id: impl Into<String>, max_attempts: u32) -> Self {
        let unit_id = unit_id.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            task_type: PROCESS_UNIT_TASK.into(),
            status: TaskStatus::Pending,
            payload: serde_json::json!({ "unit_id": unit_id }),
            unit_id,
            checkpoint: None,
            attempts: 0,
            max_attempts,
            error: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether another explicit retry is allowed by the attempt budget.
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.attempts < self.max_attempts
    }
}

impl Record for Task {
    const COLLECTION: Collection = Collection::Tasks;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_steps_skip_checkpointed() {
        assert_eq!(PipelineStep::remaining_after(None).len(), 5);
        assert_eq!(
            PipelineStep::remaining_after(Some(PipelineStep::Resolve)),
            vec![PipelineStep::Derive, PipelineStep::Complete]
        );
        assert!(PipelineStep::remaining_after(Some(PipelineStep::Complete)).is_empty());
    }

    #[test]
    fn step_chain_is_linear() {
        let mut step = PipelineStep::Preprocess;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen, PipelineStep::ORDER.to_vec());
    }

    #[test]
    fn new_task_is_pending() {
        let task = Task::process_unit("u1", 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.payload["unit_id"], serde_json::json!("u1"));
        assert!(!task.can_retry());
    }
}
