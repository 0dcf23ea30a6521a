//! Job records: one preservation unit driven through a pipeline.

mod name;
mod sqlite_store;
mod store;
mod types;

pub use name::{parse_name, NameInfo};
pub use sqlite_store::SqliteJobStore;
pub use store::{CreateJobRequest, JobFilter, JobPage, JobStore, JobStoreError, StatusUpdate};
pub use types::{
    ActionStatus, Job, JobEvent, JobStatus, NewProcessingAction, ProcessingAction,
    WorkflowHandle,
};
