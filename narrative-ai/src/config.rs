//! Server configuration from environment variables.

use narrative_core::{GeneratorConfig, ServiceConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub model: String,
    pub generator: GeneratorConfig,
    pub service: ServiceConfig,
    /// Directory for the file store; `None` keeps stories in memory.
    pub store_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            model: claude::DEFAULT_MODEL.to_string(),
            generator: GeneratorConfig::default(),
            service: ServiceConfig::default(),
            store_dir: None,
        }
    }
}

impl AppConfig {
    /// Read `NARRATIVE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for
    /// unset or blank variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = parse(&get, "NARRATIVE_HOST")? {
            config.host = host;
        }
        if let Some(port) = parse(&get, "NARRATIVE_PORT")? {
            config.port = port;
        }
        if let Some(model) = get("NARRATIVE_MODEL") {
            config.model = model.trim().to_string();
        }
        if let Some(max_tokens) = parse(&get, "NARRATIVE_MAX_TOKENS")? {
            config.generator.max_tokens = max_tokens;
        }
        if let Some(temperature) = parse::<f32, _>(&get, "NARRATIVE_TEMPERATURE")? {
            if !(0.0..=1.0).contains(&temperature) {
                return Err(invalid("NARRATIVE_TEMPERATURE", temperature.to_string()));
            }
            config.generator.temperature = Some(temperature);
        }
        if let Some(max_choices) = parse(&get, "NARRATIVE_MAX_CHOICES")? {
            config.service = config.service.with_max_choices(max_choices);
        }
        if let Some(retries) = parse(&get, "NARRATIVE_GENERATION_RETRIES")? {
            config.service = config.service.with_generation_retries(retries);
        }
        if let Some(delay_ms) = parse(&get, "NARRATIVE_RETRY_DELAY_MS")? {
            config.service = config
                .service
                .with_retry_delay(Duration::from_millis(delay_ms));
        }
        if let Some(value) = get("NARRATIVE_CREATE_MISSING_STORIES") {
            let create = parse_bool(&value)
                .ok_or_else(|| invalid("NARRATIVE_CREATE_MISSING_STORIES", value))?;
            config.service = config.service.with_create_missing_stories(create);
        }
        config.store_dir = get("NARRATIVE_STORE_DIR").map(PathBuf::from);

        Ok(config)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse<T, G>(get: &G, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|value| value.trim().parse().map_err(|_| invalid(name, value)))
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(name: &'static str, value: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.into(),
    }
}
