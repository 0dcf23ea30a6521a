//! Live job change events for monitoring clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::Job;

/// Default buffer of the monitor channel.
pub const MONITOR_BUFFER: usize = 16;

/// Event published after each persisted job transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    JobCreated { id: i64, job: Box<Job> },
    JobUpdated { id: i64, job: Box<Job> },
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::JobCreated { .. } => "job_created",
            MonitorEvent::JobUpdated { .. } => "job_updated",
        }
    }

    pub fn job_id(&self) -> i64 {
        match self {
            MonitorEvent::JobCreated { id, .. } | MonitorEvent::JobUpdated { id, .. } => *id,
        }
    }
}

/// Fan-out of [`MonitorEvent`]s. Slow subscribers skip what they missed.
#[derive(Debug, Clone)]
pub struct MonitorHub {
    sender: broadcast::Sender<MonitorEvent>,
}

impl MonitorHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: MonitorEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn job_created(&self, job: &Job) {
        self.publish(MonitorEvent::JobCreated {
            id: job.id,
            job: Box::new(job.clone()),
        });
    }

    pub fn job_updated(&self, job: &Job) {
        self.publish(MonitorEvent::JobUpdated {
            id: job.id,
            job: Box::new(job.clone()),
        });
    }
}

impl Default for MonitorHub {
    fn default() -> Self {
        Self::new(MONITOR_BUFFER)
    }
}
