//! Mock collaborators for engine tests.
//!
//! Each mock records the calls it receives and can be scripted to fail, so
//! workflows can be driven end to end without a pipeline or a filesystem.
//!
//! # Example
//!
//! ```rust,ignore
//! use archivist_core::testing::MockPipelineClient;
//! use archivist_core::pipeline::UnitStatus;
//!
//! let client = MockPipelineClient::new();
//! client.push_transfer_status(Ok(UnitStatus::new("PROCESSING"))).await;
//! client.push_transfer_status(Ok(UnitStatus::new("COMPLETE").with_sip_id("sip-1"))).await;
//! ```

mod mock_bundler;
mod mock_notifier;
mod mock_pipeline_client;
mod mock_source_store;

pub use mock_bundler::MockBundler;
pub use mock_notifier::MockNotifier;
pub use mock_pipeline_client::MockPipelineClient;
pub use mock_source_store::MockSourceStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;

    use crate::config::PipelineConfig;
    use crate::job::JobEvent;

    /// A pipeline configuration with test defaults.
    pub fn pipeline_config(name: &str, capacity: usize) -> PipelineConfig {
        PipelineConfig {
            name: name.to_string(),
            id: Some(format!("{}-id", name)),
            base_url: "http://127.0.0.1:62080".to_string(),
            user: "test".to_string(),
            key: "test".to_string(),
            transfer_dir: PathBuf::from("/tmp/archivist/transfers"),
            processing_dir: PathBuf::from("/tmp/archivist/processing"),
            transfer_location_id: None,
            processing_config: "automated".to_string(),
            capacity,
            retry_deadline_secs: None,
            poll_interval_secs: 5,
            request_timeout_secs: 10,
        }
    }

    /// An event for `key` targeting the given pipelines.
    pub fn job_event(key: &str, pipelines: &[&str]) -> JobEvent {
        JobEvent {
            watcher_name: "dropbox".to_string(),
            pipeline_names: pipelines.iter().map(|p| p.to_string()).collect(),
            retention_period_secs: None,
            key: key.to_string(),
            strip_top_level_dir: false,
        }
    }
}
