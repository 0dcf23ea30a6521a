use archivist_core::{Config, JobService, MonitorHub, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    service: JobService,
}

impl AppState {
    pub fn new(config: Config, service: JobService) -> Self {
        Self { config, service }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn monitor(&self) -> &MonitorHub {
        self.service.monitor()
    }
}
