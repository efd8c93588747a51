//! Configuration handling for the mesh application.
//!
//! Values come from the YAML config file, then environment variables, then
//! command line flags (applied by `main`). A missing or unparsable file falls
//! back to defaults with a warning.

use anyhow::{bail, Context, Result};
use mesh_registry::{parse_int, AppIdentity, Application, VendorTextClient};
use mesh_session::{RetryPolicy, SessionConfig, DEFAULT_TOKEN, PUBLISH_REPEAT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Model implementations that can be composed from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Vendor text client (hello/patient opcodes)
    VendorText,
}

/// One model declared on an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Implementation to instantiate
    pub kind: ModelKind,
    /// Model id (vendor id for vendor models)
    #[serde(default)]
    pub id: u16,
}

/// One element declared in the composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementEntry {
    /// Element index
    pub index: u8,
    /// Models in registration order
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// Mesh application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Object path the application is exported under
    pub app_path: String,
    /// Application token presented on attach
    pub token: u64,
    /// Identity reported in introspection
    pub company_id: u16,
    /// Product id reported in introspection
    pub product_id: u16,
    /// Version id reported in introspection
    pub version_id: u16,
    /// Handler invocations per operator command
    pub publish_attempts: u32,
    /// Pause between invocations
    pub publish_backoff: Duration,
    /// Stop repeating once the host acknowledged a send
    pub stop_on_ack: bool,
    /// Extra pause after attach before the first command
    pub settle_delay: Duration,
    /// Elements and their models
    pub elements: Vec<ElementEntry>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_path: "/example".to_string(),
            token: DEFAULT_TOKEN,
            company_id: 0x05f1,
            product_id: 0x0001,
            version_id: 0x0001,
            publish_attempts: PUBLISH_REPEAT,
            publish_backoff: Duration::ZERO,
            stop_on_ack: false,
            settle_delay: Duration::ZERO,
            elements: vec![ElementEntry {
                index: 0,
                models: vec![ModelEntry {
                    kind: ModelKind::VendorText,
                    id: 0x0000,
                }],
            }],
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    application: Option<ApplicationSection>,
    publish: Option<PublishSection>,
    elements: Option<Vec<ElementEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationSection {
    path: Option<String>,
    /// Decimal or 0x-prefixed
    token: Option<String>,
    company_id: Option<u16>,
    product_id: Option<u16>,
    version_id: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct PublishSection {
    attempts: Option<u32>,
    /// humantime duration, e.g. "250ms"
    backoff: Option<String>,
    stop_on_ack: Option<bool>,
    settle_delay: Option<String>,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config)?;
                    info!("Loaded configuration from {:?}", path);
                }
                Err(e) => warn!("Failed to parse config file {:?} ({}), using defaults", path, e),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok());

        info!(
            "Final application configuration: path={}, token={:#018x}, elements={}, attempts={}",
            config.app_path,
            config.token,
            config.elements.len(),
            config.publish_attempts
        );

        Ok(config)
    }

    /// Apply configuration from the root config structure
    fn apply_root_config(&mut self, root_config: RootConfig) -> Result<()> {
        if let Some(app) = root_config.application {
            if let Some(path) = app.path {
                self.app_path = path;
            }
            if let Some(token) = app.token {
                self.token = parse_token(&token)?;
            }
            if let Some(id) = app.company_id {
                self.company_id = id;
            }
            if let Some(id) = app.product_id {
                self.product_id = id;
            }
            if let Some(id) = app.version_id {
                self.version_id = id;
            }
        }

        if let Some(publish) = root_config.publish {
            if let Some(attempts) = publish.attempts {
                self.publish_attempts = attempts;
            }
            if let Some(backoff) = publish.backoff {
                self.publish_backoff = humantime::parse_duration(&backoff)
                    .with_context(|| format!("invalid publish.backoff {:?}", backoff))?;
            }
            if let Some(stop_on_ack) = publish.stop_on_ack {
                self.stop_on_ack = stop_on_ack;
            }
            if let Some(delay) = publish.settle_delay {
                self.settle_delay = humantime::parse_duration(&delay)
                    .with_context(|| format!("invalid publish.settle_delay {:?}", delay))?;
            }
        }

        if let Some(elements) = root_config.elements {
            self.elements = elements;
        }

        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MESH_APP_PATH") {
            self.app_path = path;
            info!("Application path overridden by environment: {}", self.app_path);
        }

        if let Some(token) = lookup("MESH_APP_TOKEN") {
            match parse_token(&token) {
                Ok(token) => {
                    self.token = token;
                    info!("Token overridden by environment: {:#018x}", token);
                }
                Err(e) => warn!("Ignoring MESH_APP_TOKEN: {}", e),
            }
        }

        if let Some(attempts) = lookup("MESH_PUBLISH_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse::<u32>() {
                self.publish_attempts = attempts;
                info!("Publish attempts overridden by environment: {}", attempts);
            }
        }
    }

    /// Retry policy for operator commands
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.publish_attempts)
            .with_backoff(self.publish_backoff)
            .with_stop_on_ack(self.stop_on_ack)
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self, exit_when_done: bool) -> SessionConfig {
        SessionConfig {
            token: self.token,
            retry: self.retry_policy(),
            settle_delay: self.settle_delay,
            exit_when_done,
        }
    }

    /// Build the element/model registry declared by this configuration
    pub fn build_application(&self) -> Result<Arc<Application>> {
        if self.elements.is_empty() {
            bail!("configuration declares no elements");
        }

        let identity = AppIdentity {
            company_id: self.company_id,
            product_id: self.product_id,
            version_id: self.version_id,
        };
        let mut app = Application::new(self.app_path.clone(), identity);

        for entry in &self.elements {
            let mut element = app.create_element(entry.index);
            for model in &entry.models {
                match model.kind {
                    ModelKind::VendorText => element
                        .add_model(Arc::new(VendorTextClient::new(model.id)))
                        .with_context(|| format!("element {}", entry.index))?,
                }
            }
            app.add_element(element)?;
        }

        Ok(Arc::new(app))
    }
}

fn parse_token(value: &str) -> Result<u64> {
    match parse_int(value) {
        Some(token) => Ok(token),
        None => bail!("invalid application token {:?}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.app_path, "/example");
        assert_eq!(config.token, 0x76bd4f2372477600);
        assert_eq!(config.publish_attempts, 5);
        assert_eq!(config.elements.len(), 1);
        assert_eq!(config.elements[0].models[0].kind, ModelKind::VendorText);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
application:
  path: /org/example/text
  token: "0x0123456789abcdef"
  company_id: 2

publish:
  attempts: 3
  backoff: 250ms
  stop_on_ack: true

elements:
  - index: 0
    models:
      - kind: vendor_text
        id: 0
  - index: 1
    models:
      - kind: vendor_text
        id: 7
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.app_path, "/org/example/text");
        assert_eq!(config.token, 0x0123456789abcdef);
        assert_eq!(config.company_id, 2);
        assert_eq!(config.product_id, 0x0001);
        assert_eq!(config.publish_attempts, 3);
        assert_eq!(config.publish_backoff, Duration::from_millis(250));
        assert!(config.stop_on_ack);
        assert_eq!(config.elements.len(), 2);
        assert_eq!(config.elements[1].models[0].id, 7);

        let app = config.build_application().unwrap();
        assert_eq!(app.element_indexes(), vec![0, 1]);
        assert_eq!(
            app.find_element(1).unwrap().path(),
            "/org/example/text/ele01"
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.app_path, AppConfig::default().app_path);
    }

    #[test]
    fn test_invalid_backoff_rejected() {
        let root: RootConfig = serde_yaml::from_str("publish:\n  backoff: soon\n").unwrap();
        let mut config = AppConfig::default();
        assert!(config.apply_root_config(root).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("MESH_APP_PATH", "/other"),
            ("MESH_APP_TOKEN", "42"),
            ("MESH_PUBLISH_ATTEMPTS", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.app_path, "/other");
        assert_eq!(config.token, 42);
        assert_eq!(config.publish_attempts, 2);
        assert_eq!(config.retry_policy().attempts, 2);
    }

    #[test]
    fn test_bad_token_override_ignored() {
        let mut config = AppConfig::default();
        config.apply_environment_overrides(|key| {
            (key == "MESH_APP_TOKEN").then(|| "token".to_string())
        });
        assert_eq!(config.token, DEFAULT_TOKEN);
    }

    #[test]
    fn test_duplicate_element_rejected() {
        let mut config = AppConfig::default();
        config.elements.push(config.elements[0].clone());
        assert!(config.build_application().is_err());
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let mut config = AppConfig::default();
        let model = config.elements[0].models[0].clone();
        config.elements[0].models.push(model);
        assert!(config.build_application().is_err());
    }
}
