//! The per-job processing workflow.
//!
//! ```text
//! New -> Queued -> (slot acquired) -> InProgress -> Done
//!                                        |  ^
//!                                        v  |
//!                                      Pending -> Abandoned
//! ```
//!
//! A job is queued until its pipeline has a free slot, then downloaded,
//! bundled, submitted, and polled through transfer and ingest. The slot is
//! released before notifications run so a slow receiver never holds back
//! the pipeline. Whatever happens, the final status is persisted and the
//! staging area is cleaned up, even when the instance was cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bundler::{BundleRequest, Bundler};
use crate::events::MonitorHub;
use crate::host::{ActivityError, ActivityOptions, WorkflowContext};
use crate::job::{
    parse_name, ActionStatus, Job, JobEvent, JobStatus, JobStore, NameInfo, NewProcessingAction,
    StatusUpdate, WorkflowHandle,
};
use crate::metrics::{JOBS_COMPLETED, JOBS_STARTED};
use crate::notify::{Notifier, Receipt};
use crate::pipeline::status::{classify_ingest, classify_transfer};
use crate::pipeline::{
    AdmissionController, Pipeline, PipelineClient, PipelineRegistry, SubmitRequest, UnitType,
};
use crate::poller::{PollConfig, PollingRetryEngine};
use crate::source::SourceStore;

use super::{persist, policies, AsyncDecisionController, WorkflowError};

/// Default interval between admission heartbeats.
const ADMISSION_HEARTBEAT: Duration = Duration::from_secs(5);

/// Lower bound of the heartbeat timeout applied to status polling.
const POLL_HEARTBEAT_FLOOR: Duration = Duration::from_secs(60);

const TRANSFER_TYPE: &str = "standard";

/// Input of one processing workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingInput {
    pub job_id: i64,
    pub pipeline_name: String,
    pub event: JobEvent,
}

/// What a successful run leaves behind for the retirement stage.
struct Completed {
    pipeline: Arc<Pipeline>,
    transfer_id: String,
    sip_id: String,
}

pub struct ProcessingWorkflow {
    store: Arc<dyn JobStore>,
    registry: Arc<PipelineRegistry>,
    admission: Arc<AdmissionController>,
    source: Arc<dyn SourceStore>,
    bundler: Arc<dyn Bundler>,
    notifiers: Vec<Arc<dyn Notifier>>,
    decisions: AsyncDecisionController,
    monitor: MonitorHub,
    admission_heartbeat: Duration,
}

impl ProcessingWorkflow {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<PipelineRegistry>,
        admission: Arc<AdmissionController>,
        source: Arc<dyn SourceStore>,
        bundler: Arc<dyn Bundler>,
        decisions: AsyncDecisionController,
        monitor: MonitorHub,
    ) -> Self {
        Self {
            store,
            registry,
            admission,
            source,
            bundler,
            notifiers: Vec::new(),
            decisions,
            monitor,
            admission_heartbeat: ADMISSION_HEARTBEAT,
        }
    }

    pub fn with_notifiers(mut self, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_admission_heartbeat(mut self, interval: Duration) -> Self {
        self.admission_heartbeat = interval;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn decisions(&self) -> &AsyncDecisionController {
        &self.decisions
    }

    pub fn monitor(&self) -> &MonitorHub {
        &self.monitor
    }

    pub fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Drive one job to a final status.
    ///
    /// Returns an error unless the job reached `Done`; the job row already
    /// records the outcome either way.
    pub async fn run(
        &self,
        ctx: WorkflowContext,
        input: ProcessingInput,
    ) -> Result<(), WorkflowError> {
        let job_id = input.job_id;
        info!(job_id, pipeline = %input.pipeline_name, key = %input.event.key, "Processing job");

        let mut staged = Vec::new();
        let result = self.execute(&ctx, &input, &mut staged).await;

        // Compensation must survive cancellation of the instance.
        let compensation = ctx.disconnected();
        self.finish(&compensation, job_id, &result).await;
        self.cleanup(&compensation, job_id, &staged).await;

        let completed = result?;
        self.retire(&ctx, &input, &completed).await;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &WorkflowContext,
        input: &ProcessingInput,
        staged: &mut Vec<PathBuf>,
    ) -> Result<Completed, WorkflowError> {
        let job_id = input.job_id;
        let pipeline = self
            .registry
            .by_name(&input.pipeline_name)
            .map_err(ActivityError::from)?;

        let handle = WorkflowHandle {
            instance_id: ctx.execution().instance_id.clone(),
            run_id: ctx.execution().run_id.clone(),
        };
        persist(ctx, &self.store, &self.monitor, |store| {
            store.update_status(
                job_id,
                StatusUpdate::new(JobStatus::Queued).with_workflow(handle.clone()),
            )
        })
        .await?;

        let permit = ctx
            .execute_activity("acquire-pipeline", &policies::admission(), |actx| {
                let admission = Arc::clone(&self.admission);
                let name = pipeline.name().to_string();
                let interval = self.admission_heartbeat;
                async move {
                    admission
                        .acquire(&name, &actx, interval)
                        .await
                        .map_err(ActivityError::from)
                }
            })
            .await?;
        JOBS_STARTED.with_label_values(&[pipeline.name()]).inc();

        let job = persist(ctx, &self.store, &self.monitor, |store| {
            store.set_status_in_progress(job_id, Some(Utc::now()))
        })
        .await?;

        let name_info = parse_name(&input.event.key);
        if name_info.is_none() && self.notifiers.iter().any(|n| n.requires_name_info()) {
            return Err(ActivityError::non_retryable(format!(
                "error parsing name from key {:?}",
                input.event.key
            ))
            .into());
        }

        let processed = self.process(ctx, input, &pipeline, staged).await;
        permit.release();
        let (transfer_id, sip_id) = processed?;

        self.notify(ctx, &job, &pipeline, &sip_id, name_info.as_ref())
            .await?;

        Ok(Completed {
            pipeline,
            transfer_id,
            sip_id,
        })
    }

    /// Download, bundle, submit and poll. Returns the transfer and SIP ids.
    async fn process(
        &self,
        ctx: &WorkflowContext,
        input: &ProcessingInput,
        pipeline: &Pipeline,
        staged: &mut Vec<PathBuf>,
    ) -> Result<(String, String), WorkflowError> {
        let job_id = input.job_id;
        let config = pipeline.config();

        let downloaded = ctx
            .execute_activity("download", &policies::long_lived(), |_| {
                let source = Arc::clone(&self.source);
                let event = input.event.clone();
                let dest = config.processing_dir.clone();
                async move {
                    source
                        .download(&event, &dest)
                        .await
                        .map_err(ActivityError::from)
                }
            })
            .await?;
        staged.push(staging_root(&downloaded, &config.processing_dir));

        let bundle = ctx
            .execute_activity("bundle", &policies::long_lived(), |_| {
                let bundler = Arc::clone(&self.bundler);
                let request = BundleRequest {
                    source: downloaded.clone(),
                    transfer_dir: config.transfer_dir.clone(),
                    key: input.event.key.clone(),
                    strip_top_level_dir: input.event.strip_top_level_dir,
                };
                async move { bundler.bundle(&request).await.map_err(ActivityError::from) }
            })
            .await?;
        if !bundle.rel_path.is_empty() {
            staged.push(bundle.full_path.clone());
        }

        let client = pipeline.client();
        let request = SubmitRequest {
            name: transfer_name(&input.event.key),
            path: pipeline.submission_path(&bundle.rel_path),
            transfer_type: TRANSFER_TYPE.to_string(),
            processing_config: config.processing_config.clone(),
            auto_approve: true,
        };
        let transfer_id = ctx
            .execute_activity("submit", &policies::request(), |_| {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.submit(request).await.map_err(ActivityError::from) }
            })
            .await?;

        let pipeline_id = config.id.clone().unwrap_or_else(|| config.name.clone());
        persist(ctx, &self.store, &self.monitor, |store| {
            store.update_status(
                job_id,
                StatusUpdate::new(JobStatus::InProgress)
                    .with_transfer_id(transfer_id.clone())
                    .with_pipeline_id(pipeline_id.clone()),
            )
        })
        .await?;
        debug!(job_id, transfer_id = %transfer_id, "Transfer submitted");

        let poll = pipeline.poll_config();
        let engine = PollingRetryEngine::new(poll.clone());
        let options = polling_options(&poll);

        let sip_id = ctx
            .execute_activity("poll-transfer", &options, |actx| {
                let client = Arc::clone(&client);
                let transfer_id = transfer_id.clone();
                let engine = &engine;
                async move {
                    engine
                        .run(&actx, || {
                            let client = Arc::clone(&client);
                            let transfer_id = transfer_id.clone();
                            async move {
                                classify_transfer(client.transfer_status(&transfer_id).await)
                            }
                        })
                        .await
                        .map_err(ActivityError::from)
                }
            })
            .await?;

        persist(ctx, &self.store, &self.monitor, |store| {
            store.update_status(
                job_id,
                StatusUpdate::new(JobStatus::InProgress).with_aip_id(sip_id.clone()),
            )
        })
        .await?;
        debug!(job_id, sip_id = %sip_id, "Transfer completed");

        let ingested = ctx
            .execute_activity("poll-ingest", &options, |actx| {
                let client = Arc::clone(&client);
                let sip_id = sip_id.clone();
                let engine = &engine;
                async move {
                    engine
                        .run(&actx, || {
                            let client = Arc::clone(&client);
                            let sip_id = sip_id.clone();
                            async move { classify_ingest(client.ingest_status(&sip_id).await) }
                        })
                        .await
                        .map_err(ActivityError::from)
                }
            })
            .await;
        self.record_actions(job_id, client.as_ref(), &sip_id).await;
        ingested?;

        Ok((transfer_id, sip_id))
    }

    /// Save the pipeline's processing steps for the job. Best effort.
    async fn record_actions(&self, job_id: i64, client: &dyn PipelineClient, sip_id: &str) {
        let jobs = match client.jobs(sip_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(job_id, error = %e, "Failed to list pipeline jobs");
                return;
            }
        };

        let listed_at = Utc::now();
        for job in jobs {
            let status = match job.status.as_str() {
                "COMPLETE" => ActionStatus::Complete,
                "FAILED" => ActionStatus::Failed,
                _ => ActionStatus::Processing,
            };
            let action = NewProcessingAction {
                job_id,
                action_id: job.id,
                name: job.name,
                status,
                started_at: job.started_at.unwrap_or(listed_at),
            };
            if let Err(e) = self.store.append_action(action) {
                warn!(job_id, error = %e, "Failed to record processing action");
            }
        }
    }

    async fn notify(
        &self,
        ctx: &WorkflowContext,
        job: &Job,
        pipeline: &Pipeline,
        aip_id: &str,
        name_info: Option<&NameInfo>,
    ) -> Result<(), WorkflowError> {
        for notifier in &self.notifiers {
            let receipt = Receipt {
                job_id: job.id,
                name: job.name.clone(),
                origin_id: name_info
                    .map(|info| info.uuid.clone())
                    .or_else(|| job.origin_id.clone()),
                kind: name_info.map(|info| info.kind.clone()),
                aip_id: aip_id.to_string(),
                pipeline: pipeline.name().to_string(),
                completed_at: Utc::now(),
            };
            let activity = format!("notify-{}", notifier.name());
            self.decisions
                .run(ctx, job.id, &activity, &policies::request(), |_| {
                    let notifier = Arc::clone(notifier);
                    let receipt = receipt.clone();
                    async move { notifier.notify(&receipt).await.map_err(ActivityError::from) }
                })
                .await?;
        }
        Ok(())
    }

    /// Persist the final status of the job.
    async fn finish(
        &self,
        ctx: &WorkflowContext,
        job_id: i64,
        result: &Result<Completed, WorkflowError>,
    ) {
        let update = match result {
            Ok(completed) => {
                StatusUpdate::new(JobStatus::Done).with_aip_id(completed.sip_id.clone())
            }
            Err(WorkflowError::Abandoned(reason)) => {
                StatusUpdate::new(JobStatus::Abandoned).with_error(reason.clone())
            }
            Err(e) => StatusUpdate::new(JobStatus::Error).with_error(e.to_string()),
        };
        let status = update.status;

        match persist(ctx, &self.store, &self.monitor, |store| {
            store.update_status(job_id, update.clone())
        })
        .await
        {
            Ok(_) => {
                JOBS_COMPLETED.with_label_values(&[status.as_str()]).inc();
                match result {
                    Ok(_) => info!(job_id, status = %status, "Job finished"),
                    Err(e) => warn!(job_id, status = %status, error = %e, "Job failed"),
                }
            }
            Err(e) => {
                error!(job_id, status = %status, error = %e, "Failed to persist final job status")
            }
        }
    }

    async fn cleanup(&self, ctx: &WorkflowContext, job_id: i64, staged: &[PathBuf]) {
        if staged.is_empty() {
            return;
        }
        let result = ctx
            .execute_activity("cleanup", &policies::local(), |_| {
                let bundler = Arc::clone(&self.bundler);
                let paths = staged.to_vec();
                async move { bundler.cleanup(&paths).await.map_err(ActivityError::from) }
            })
            .await;
        if let Err(e) = result {
            warn!(job_id, error = %e, "Failed to clean up staging area");
        }
    }

    /// Hide the finished units and, after the retention period, delete the
    /// original item.
    async fn retire(&self, ctx: &WorkflowContext, input: &ProcessingInput, completed: &Completed) {
        let job_id = input.job_id;
        let client = completed.pipeline.client();

        for (unit_id, unit_type) in [
            (&completed.transfer_id, UnitType::Transfer),
            (&completed.sip_id, UnitType::Ingest),
        ] {
            let result = ctx
                .execute_activity("hide-unit", &policies::request(), |_| {
                    let client = Arc::clone(&client);
                    let unit_id = unit_id.clone();
                    async move {
                        client
                            .hide(&unit_id, unit_type)
                            .await
                            .map_err(ActivityError::from)
                    }
                })
                .await;
            if let Err(e) = result {
                warn!(job_id, unit = unit_type.as_str(), error = %e, "Failed to hide unit");
            }
        }

        let Some(retention) = input.event.retention_period() else {
            return;
        };
        debug!(job_id, retention_secs = retention.as_secs(), "Waiting out retention period");
        if ctx.sleep(retention).await.is_err() {
            info!(job_id, "Retention wait interrupted, original kept");
            return;
        }

        let result = ctx
            .execute_activity("delete-original", &policies::request(), |_| {
                let source = Arc::clone(&self.source);
                let event = input.event.clone();
                async move {
                    source
                        .delete_original(&event)
                        .await
                        .map_err(ActivityError::from)
                }
            })
            .await;
        if let Err(e) = result {
            warn!(job_id, error = %e, "Failed to delete original");
        }
    }
}

/// Heartbeat options for a polling activity. The timeout leaves room for a
/// full interval plus a slow status call between heartbeats.
fn polling_options(poll: &PollConfig) -> ActivityOptions {
    let gap = (poll.interval + poll.attempt_timeout) * 2;
    policies::heartbeated(gap.max(POLL_HEARTBEAT_FLOOR))
}

/// Directory holding a download: its private staging directory when it has
/// one, otherwise the download itself.
fn staging_root(downloaded: &Path, processing_dir: &Path) -> PathBuf {
    match downloaded.parent() {
        Some(parent) if parent != processing_dir && parent.starts_with(processing_dir) => {
            parent.to_path_buf()
        }
        _ => downloaded.to_path_buf(),
    }
}

fn transfer_name(key: &str) -> String {
    Path::new(key)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string())
}
