use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use thiserror::Error;

use crate::config::models::GatewayConfig;

/// Why a configuration file could not be used.
///
/// Callers treat both variants the same way: warn and continue with
/// [`GatewayConfig::default`], i.e. an empty registry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("Configuration file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to load configuration from {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Load configuration from a file using the config crate.
/// Supports JSON (the default), YAML and TOML, chosen by extension.
pub fn load_config(config_path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigurationError> {
    let config_path = config_path.as_ref();

    if !config_path.exists() {
        return Err(ConfigurationError::NotFound(config_path.to_path_buf()));
    }

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    };

    let malformed = |reason: String| ConfigurationError::Malformed {
        path: config_path.to_path_buf(),
        reason,
    };

    let path_str = config_path
        .to_str()
        .ok_or_else(|| malformed("path is not valid UTF-8".to_string()))?;

    let settings = Config::builder()
        .add_source(File::new(path_str, format))
        .build()
        .map_err(|e| malformed(e.to_string()))?;

    settings
        .try_deserialize::<GatewayConfig>()
        .map_err(|e| malformed(e.to_string()))
}

/// Load configuration, falling back to defaults (empty registry) on any failure.
///
/// The error is handed back so the caller can log it once tracing is up.
pub fn load_config_or_default(
    config_path: impl AsRef<Path>,
) -> (GatewayConfig, Option<ConfigurationError>) {
    match load_config(config_path) {
        Ok(config) => (config, None),
        Err(e) => (GatewayConfig::default(), Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:9001",
  "health_check": { "interval_secs": 7 },
  "child_servers": [
    {
      "name": "ado",
      "type": "proxy",
      "prefix": "ado",
      "url": "http://localhost:8002/mcp",
      "auth": { "type": "bearer", "token": "ADO_TOKEN" }
    },
    {
      "name": "docupedia",
      "type": "module",
      "prefix": "docs",
      "module_path": "../mcp-docupedia",
      "module_envvars": { "DOCUPEDIA_URL": "http://docs" }
    }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9001");
        assert_eq!(config.health_check.interval_secs, 7);
        assert_eq!(config.health_check.timeout_secs, 2);
        assert_eq!(config.ingress_path, "/mcp");
        assert_eq!(config.child_servers.len(), 2);

        let ado = &config.child_servers[0];
        assert_eq!(ado.kind.as_deref(), Some("proxy"));
        let auth = ado.auth.as_ref().unwrap();
        assert_eq!(auth.kind.as_deref(), Some("bearer"));
        assert_eq!(auth.token.as_deref(), Some("ADO_TOKEN"));

        let docs = &config.child_servers[1];
        assert_eq!(docs.module_path.as_deref(), Some("../mcp-docupedia"));
        assert_eq!(docs.module_envvars.len(), 1);
    }

    #[test]
    fn test_entry_missing_name_still_parses() {
        let json_content = r#"
{
  "child_servers": [
    { "type": "proxy", "prefix": "a", "url": "http://localhost:1/mcp" },
    { "name": "b", "type": "proxy", "prefix": "b", "url": "http://localhost:2/mcp" }
  ]
}
"#;
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.child_servers.len(), 2);
        assert!(config.child_servers[0].name.is_none());
        assert_eq!(config.child_servers[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "0.0.0.0:8100"
child_servers:
  - name: "remote"
    type: "proxy"
    prefix: "remote"
    url: "http://remote:9000/mcp"
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8100");
        assert_eq!(config.child_servers.len(), 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let (config, issue) = load_config_or_default("/definitely/not/here/gateway.json");
        assert!(config.child_servers.is_empty());
        assert!(matches!(issue, Some(ConfigurationError::NotFound(_))));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{{ this is not json").unwrap();

        let (config, issue) = load_config_or_default(temp_file.path());
        assert!(config.child_servers.is_empty());
        assert!(matches!(issue, Some(ConfigurationError::Malformed { .. })));
    }

    #[test]
    fn test_override_port() {
        let mut config = GatewayConfig::default();
        config.override_port(9100);
        assert_eq!(config.listen_addr, "127.0.0.1:9100");
    }
}
