use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    9000
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("archivist.db")
}

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on how long a job waits for an operator decision.
    #[serde(default = "default_decision_ceiling")]
    pub decision_ceiling_secs: u64,
    /// Pause between jobs processed by a bulk operation.
    #[serde(default = "default_bulk_pause")]
    pub bulk_pause_ms: u64,
    /// Number of jobs fetched per bulk page.
    #[serde(default = "default_bulk_page_size")]
    pub bulk_page_size: u32,
    /// Interval of the liveness signal emitted while waiting for admission.
    #[serde(default = "default_admission_heartbeat")]
    pub admission_heartbeat_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_ceiling_secs: default_decision_ceiling(),
            bulk_pause_ms: default_bulk_pause(),
            bulk_page_size: default_bulk_page_size(),
            admission_heartbeat_secs: default_admission_heartbeat(),
        }
    }
}

fn default_decision_ceiling() -> u64 {
    7 * 24 * 60 * 60
}

fn default_bulk_pause() -> u64 {
    50
}

fn default_bulk_page_size() -> u32 {
    20
}

fn default_admission_heartbeat() -> u64 {
    60
}

/// A processing pipeline jobs are submitted to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Name used by watchers and jobs to refer to this pipeline.
    pub name: String,
    /// Identifier of the pipeline instance, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub key: String,
    /// Where bundled transfers are placed for the pipeline to pick up.
    pub transfer_dir: PathBuf,
    /// Staging area for downloaded source items.
    pub processing_dir: PathBuf,
    /// Transfer source location; prefixes submitted paths as `<id>:<path>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_location_id: Option<String>,
    #[serde(default = "default_processing_config")]
    pub processing_config: String,
    /// Maximum number of jobs running against this pipeline.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Overrides how long transient status errors are tolerated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_deadline_secs: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Per-request timeout of the pipeline HTTP client.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_processing_config() -> String {
    "automated".to_string()
}

fn default_capacity() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

/// A source of new items to preserve.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    pub name: String,
    /// Directory holding the source items.
    pub path: PathBuf,
    /// Pipelines every item of this watcher is sent to.
    pub pipelines: Vec<String>,
    /// How long to keep the original after a successful job. Absent means forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period_secs: Option<u64>,
    #[serde(default)]
    pub strip_top_level_dir: bool,
}

/// Receipt delivery targets. A notifier is enabled by the presence of its section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_file: Option<ReceiptFileConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiptFileConfig {
    pub dir: PathBuf,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub pipelines: Vec<SanitizedPipelineConfig>,
    pub watchers: Vec<WatcherConfig>,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedPipelineConfig {
    pub name: String,
    pub base_url: String,
    pub user: String,
    pub key_configured: bool,
    pub capacity: usize,
    pub retry_deadline_secs: Option<u64>,
    pub poll_interval_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            pipelines: config
                .pipelines
                .iter()
                .map(|p| SanitizedPipelineConfig {
                    name: p.name.clone(),
                    base_url: p.base_url.clone(),
                    user: p.user.clone(),
                    key_configured: !p.key.is_empty(),
                    capacity: p.capacity,
                    retry_deadline_secs: p.retry_deadline_secs,
                    poll_interval_secs: p.poll_interval_secs,
                })
                .collect(),
            watchers: config.watchers.clone(),
            notifications: config.notifications.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[pipelines]]
name = "am"
base_url = "http://127.0.0.1:62080"
transfer_dir = "/tmp/transfers"
processing_dir = "/tmp/processing"
"#;

    #[test]
    fn test_deserialize_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.path, PathBuf::from("archivist.db"));
        assert_eq!(config.engine.decision_ceiling_secs, 604_800);
        assert_eq!(config.engine.bulk_page_size, 20);
        assert_eq!(config.engine.bulk_pause_ms, 50);

        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.capacity, 1);
        assert_eq!(pipeline.processing_config, "automated");
        assert_eq!(pipeline.poll_interval_secs, 5);
        assert!(pipeline.retry_deadline_secs.is_none());
        assert!(config.watchers.is_empty());
        assert!(config.notifications.webhook.is_none());
    }

    #[test]
    fn test_deserialize_missing_pipelines_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 3000

[engine]
decision_ceiling_secs = 60

[[pipelines]]
name = "am"
base_url = "http://am"
user = "test"
key = "secret"
transfer_dir = "/t"
processing_dir = "/p"
transfer_location_id = "loc"
capacity = 3
retry_deadline_secs = 120

[[watchers]]
name = "dropbox"
path = "/incoming"
pipelines = ["am"]
retention_period_secs = 3600
strip_top_level_dir = true

[notifications.webhook]
url = "http://hooks"

[notifications.receipt_file]
dir = "/receipts"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.engine.decision_ceiling_secs, 60);
        assert_eq!(config.pipelines[0].capacity, 3);
        assert_eq!(config.pipelines[0].retry_deadline_secs, Some(120));
        assert_eq!(
            config.pipelines[0].transfer_location_id.as_deref(),
            Some("loc")
        );
        assert_eq!(config.watchers[0].retention_period_secs, Some(3600));
        assert!(config.watchers[0].strip_top_level_dir);
        assert_eq!(config.notifications.webhook.unwrap().timeout_secs, 10);
        assert!(config.notifications.receipt_file.is_some());
    }

    #[test]
    fn test_sanitized_config_hides_pipeline_key() {
        let toml = format!("{}\nuser = \"u\"\nkey = \"secret\"\n", MINIMAL.trim_end());
        let config: Config = toml::from_str(&toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(!json.contains("secret"));
        assert!(sanitized.pipelines[0].key_configured);
    }
}
