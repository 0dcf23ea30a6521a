use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Nested keys use a double underscore, e.g. `ARCHIVIST_SERVER__PORT=9100`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("ARCHIVIST_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PIPELINE: &str = r#"
[[pipelines]]
name = "am"
base_url = "http://127.0.0.1:62080"
transfer_dir = "/tmp/transfers"
processing_dir = "/tmp/processing"
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = format!("[server]\nport = 9100\n{}", PIPELINE);
        let config = load_config_from_str(&toml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.pipelines.len(), 1);
    }

    #[test]
    fn test_load_config_from_str_invalid_type() {
        let toml = format!("[server]\nport = \"high\"\n{}", PIPELINE);
        let err = load_config_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n{}",
            PIPELINE
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.pipelines[0].name, "am");
    }
}
