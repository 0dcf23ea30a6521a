//! Activity option presets shared by the workflows.

use std::time::Duration;

use crate::host::{ActivityOptions, RetryPolicy};

/// Stand-in for "no practical timeout".
pub const FOREVER: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Short remote calls: bounded exponential backoff.
pub fn request() -> ActivityOptions {
    ActivityOptions::new()
        .with_start_to_close(Duration::from_secs(5 * 60))
        .with_retry(RetryPolicy {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(5 * 60),
            expiration: Some(Duration::from_secs(5 * 60)),
            maximum_attempts: 20,
        })
}

/// Local work that may take a while, such as copying or bundling.
pub fn long_lived() -> ActivityOptions {
    ActivityOptions::new()
        .with_start_to_close(Duration::from_secs(10 * 60))
        .with_retry(RetryPolicy {
            maximum_attempts: 5,
            ..RetryPolicy::default()
        })
}

/// Waits that report liveness through heartbeats and retry indefinitely.
pub fn heartbeated(heartbeat_timeout: Duration) -> ActivityOptions {
    ActivityOptions::new()
        .with_start_to_close(FOREVER)
        .with_heartbeat_timeout(heartbeat_timeout)
        .with_retry(RetryPolicy {
            maximum_interval: Duration::from_secs(10),
            ..RetryPolicy::default()
        })
}

/// Admission waits.
pub fn admission() -> ActivityOptions {
    heartbeated(Duration::from_secs(5 * 60))
}

/// Cheap bookkeeping against the local store.
pub fn local() -> ActivityOptions {
    ActivityOptions::new()
        .with_start_to_close(Duration::from_secs(60))
        .with_retry(RetryPolicy {
            maximum_attempts: 3,
            ..RetryPolicy::default()
        })
}
