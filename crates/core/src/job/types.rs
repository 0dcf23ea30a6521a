//! Core job data types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// ```text
/// New -> Queued -> InProgress <-> Pending
///                      |
///                      v
///          Done | Error | Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, workflow not started yet.
    New,
    /// Workflow started, waiting for pipeline admission.
    Queued,
    /// Holding a pipeline slot and doing work.
    InProgress,
    /// Suspended until an operator submits a decision.
    Pending,
    Done,
    Error,
    /// An operator (or the decision ceiling) gave up on the job.
    Abandoned,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::New,
        JobStatus::Queued,
        JobStatus::InProgress,
        JobStatus::Pending,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Abandoned => "abandoned",
        }
    }

    /// Terminal statuses carry a completion timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Abandoned
        )
    }

    /// Whether a workflow instance may still be operating on the job.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::InProgress | JobStatus::Pending
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {}", s))
    }
}

/// Identity of the workflow instance driving a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkflowHandle {
    pub instance_id: String,
    pub run_id: String,
}

/// A preservation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Display name, usually the source object key.
    pub name: String,
    /// Identifier parsed from the source item name, when present.
    pub origin_id: Option<String>,
    pub workflow: WorkflowHandle,
    /// Name of the pipeline the job is bound to.
    pub pipeline_name: String,
    /// Identity reported by the pipeline itself.
    pub pipeline_id: Option<String>,
    pub transfer_id: Option<String>,
    pub aip_id: Option<String>,
    pub status: JobStatus,
    /// Continuation token while the job is waiting for a decision.
    pub decision_token: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_awaiting_decision(&self) -> bool {
        self.status == JobStatus::Pending && self.decision_token.is_some()
    }
}

/// Normalized description of a newly discovered source item.
///
/// This is the input of a processing workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Watcher that discovered the item.
    pub watcher_name: String,
    /// Pipelines the item should be sent to.
    pub pipeline_names: Vec<String>,
    /// How long the original is kept after success. `None` keeps it forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period_secs: Option<u64>,
    /// Object key of the source item within the watcher.
    pub key: String,
    #[serde(default)]
    pub strip_top_level_dir: bool,
}

impl JobEvent {
    pub fn retention_period(&self) -> Option<Duration> {
        self.retention_period_secs.map(Duration::from_secs)
    }
}

/// Status of a pipeline-reported sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Processing,
    Complete,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Processing => "processing",
            ActionStatus::Complete => "complete",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ActionStatus::Processing),
            "complete" => Some(ActionStatus::Complete),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit record of one pipeline sub-step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingAction {
    pub id: i64,
    /// Identifier assigned by the pipeline.
    pub action_id: String,
    pub name: String,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub job_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewProcessingAction {
    pub job_id: i64,
    pub action_id: String,
    pub name: String,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![JobStatus::Done, JobStatus::Error, JobStatus::Abandoned]
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_event_retention_period() {
        let event = JobEvent {
            watcher_name: "dropbox".to_string(),
            pipeline_names: vec!["am".to_string()],
            retention_period_secs: Some(90),
            key: "item.zip".to_string(),
            strip_top_level_dir: false,
        };
        assert_eq!(event.retention_period(), Some(Duration::from_secs(90)));
    }
}
