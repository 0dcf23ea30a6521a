use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - At least one pipeline, with unique names, a base URL and capacity >= 1
/// - Polling interval is not 0
/// - Watchers have unique names and only reference configured pipelines
/// - Decision ceiling is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.engine.decision_ceiling_secs == 0 {
        return Err(invalid("engine.decision_ceiling_secs cannot be 0"));
    }

    if config.pipelines.is_empty() {
        return Err(invalid("at least one pipeline must be configured"));
    }

    let mut pipelines = HashSet::new();
    for pipeline in &config.pipelines {
        if pipeline.name.trim().is_empty() {
            return Err(invalid("pipeline name cannot be empty"));
        }
        if !pipelines.insert(pipeline.name.as_str()) {
            return Err(invalid(&format!(
                "duplicate pipeline name: {}",
                pipeline.name
            )));
        }
        if pipeline.base_url.trim().is_empty() {
            return Err(invalid(&format!(
                "pipeline {} has an empty base_url",
                pipeline.name
            )));
        }
        if pipeline.capacity == 0 {
            return Err(invalid(&format!(
                "pipeline {} must have a capacity of at least 1",
                pipeline.name
            )));
        }
        if pipeline.poll_interval_secs == 0 {
            return Err(invalid(&format!(
                "pipeline {} poll_interval_secs cannot be 0",
                pipeline.name
            )));
        }
    }

    let mut watchers = HashSet::new();
    for watcher in &config.watchers {
        if !watchers.insert(watcher.name.as_str()) {
            return Err(invalid(&format!("duplicate watcher name: {}", watcher.name)));
        }
        if watcher.pipelines.is_empty() {
            return Err(invalid(&format!(
                "watcher {} must target at least one pipeline",
                watcher.name
            )));
        }
        if let Some(unknown) = watcher
            .pipelines
            .iter()
            .find(|name| !pipelines.contains(name.as_str()))
        {
            return Err(invalid(&format!(
                "watcher {} references unknown pipeline {}",
                watcher.name, unknown
            )));
        }
    }

    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base() -> Config {
        load_config_from_str(
            r#"
[[pipelines]]
name = "am"
base_url = "http://127.0.0.1:62080"
transfer_dir = "/tmp/transfers"
processing_dir = "/tmp/processing"
capacity = 2

[[watchers]]
name = "dropbox"
path = "/tmp/incoming"
pipelines = ["am"]
"#,
        )
        .unwrap()
    }

    fn assert_invalid(config: &Config) {
        let err = validate_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base();
        config.server.port = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_no_pipelines_fails() {
        let mut config = base();
        config.pipelines.clear();
        config.watchers.clear();
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_zero_capacity_fails() {
        let mut config = base();
        config.pipelines[0].capacity = 0;
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_duplicate_pipeline_fails() {
        let mut config = base();
        let dup = config.pipelines[0].clone();
        config.pipelines.push(dup);
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_unknown_watcher_pipeline_fails() {
        let mut config = base();
        config.watchers[0].pipelines = vec!["missing".to_string()];
        assert_invalid(&config);
    }

    #[test]
    fn test_validate_zero_decision_ceiling_fails() {
        let mut config = base();
        config.engine.decision_ceiling_secs = 0;
        assert_invalid(&config);
    }
}
