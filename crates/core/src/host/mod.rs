//! In-process durable execution host.
//!
//! Workflow instances run as tokio tasks identified by a stable instance id.
//! Inside an instance, fallible steps run as activities: each attempt gets an
//! [`ActivityContext`] for heartbeats and cancellation, and failed attempts are
//! retried according to a [`RetryPolicy`]. Suspended work is resumed out of
//! band through the [`ContinuationRegistry`].

mod activity;
mod context;
mod continuation;
mod instances;

pub use activity::{ActivityContext, ActivityError, ActivityOptions, RetryPolicy};
pub use context::{Execution, WorkflowContext};
pub use continuation::{Continuation, ContinuationError, ContinuationRegistry};
pub use instances::{HostError, InstanceDescription, InstanceStatus, WorkflowHost};
