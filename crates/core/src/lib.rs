pub mod bundler;
pub mod config;
pub mod events;
pub mod host;
pub mod job;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod poller;
pub mod source;
pub mod testing;
pub mod workflow;

pub use bundler::{Bundle, BundleError, BundleRequest, Bundler, FsBundler};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{MonitorEvent, MonitorHub};
pub use host::{
    ActivityContext, ActivityError, ActivityOptions, ContinuationRegistry, Execution, HostError,
    RetryPolicy, WorkflowContext, WorkflowHost,
};
pub use job::{
    Job, JobEvent, JobFilter, JobPage, JobStatus, JobStore, JobStoreError, ProcessingAction,
    SqliteJobStore,
};
pub use notify::{build_notifiers, Notifier, NotifyError, Receipt};
pub use pipeline::{
    AdmissionController, AdmissionPermit, HttpPipelineClient, Pipeline, PipelineClient,
    PipelineClientError, PipelineError, PipelineRegistry,
};
pub use poller::{PollConfig, PollError, PollOutcome, PollingRetryEngine};
pub use source::{FsSourceStore, SourceError, SourceStore};
pub use workflow::{
    AsyncDecisionController, BulkOperation, BulkOperationWorkflow, BulkRequest, BulkStatus,
    Decision, JobService, JobWorkflowHandle, ProcessingWorkflow, ServiceError, BULK_INSTANCE_ID,
};
