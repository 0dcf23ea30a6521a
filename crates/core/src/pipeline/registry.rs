//! Registry of configured pipelines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::poller::{PollConfig, DEFAULT_RETRY_DEADLINE};

use super::{HttpPipelineClient, PipelineClient, PipelineError};

/// A configured pipeline and its client.
pub struct Pipeline {
    config: PipelineConfig,
    client: Arc<dyn PipelineClient>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, client: Arc<dyn PipelineClient>) -> Self {
        Self { config, client }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn client(&self) -> Arc<dyn PipelineClient> {
        Arc::clone(&self.client)
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Polling settings, honoring the pipeline's retry deadline override.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.config.poll_interval_secs),
            deadline: self
                .config
                .retry_deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_DEADLINE),
            attempt_timeout: Duration::from_secs(self.config.request_timeout_secs.max(2)),
        }
    }

    /// Path of a bundle as the pipeline expects it in a submission.
    pub fn submission_path(&self, rel_path: &str) -> String {
        match &self.config.transfer_location_id {
            Some(location) => format!("{}:{}", location, rel_path),
            None => rel_path.to_string(),
        }
    }
}

/// Pipelines by name. Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<Pipeline>>,
    order: Vec<String>,
}

impl PipelineRegistry {
    pub fn new(pipelines: Vec<Pipeline>) -> Self {
        let mut registry = Self::default();
        for pipeline in pipelines {
            let name = pipeline.name().to_string();
            if registry.pipelines.insert(name.clone(), Arc::new(pipeline)).is_none() {
                registry.order.push(name);
            }
        }
        registry
    }

    /// Build the registry with HTTP clients for every configured pipeline.
    pub fn from_config(configs: &[PipelineConfig]) -> Result<Self, PipelineError> {
        let mut pipelines = Vec::with_capacity(configs.len());
        for config in configs {
            let client = HttpPipelineClient::new(config)?;
            pipelines.push(Pipeline::new(config.clone(), Arc::new(client)));
        }
        Ok(Self::new(pipelines))
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<Pipeline>, PipelineError> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPipeline(name.to_string()))
    }

    /// Names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.order.iter().filter_map(|name| self.pipelines.get(name))
    }
}
