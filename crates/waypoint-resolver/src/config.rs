//! Resolver configuration with layered loading and environment variable interpolation.

use figment::{
    providers::{Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use waypoint_core::{CachedRegistry, ConsulRegistry, RegistryClient, RegistryError};

use crate::endpoint::DEFAULT_PORT_OFFSET;
use crate::resolver::ChangeDetection;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration is invalid or malformed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaypointConfig {
    /// Resolution and polling behaviour.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Registry connection and caching.
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl WaypointConfig {
    /// Loads configuration from the default path (`waypoint.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("waypoint.toml")
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `WAYPOINT_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new().merge(InterpolatingToml::file(path)?).merge(
            figment::providers::Env::prefixed("WAYPOINT_")
                .split("__")
                .lowercase(true),
        );

        let config = figment.extract::<Self>().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(InterpolatingToml::string(content));
        let config = figment.extract::<Self>().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialise fine but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolver.validate()?;
        self.registry.validate()
    }
}

/// Resolution and polling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// URI scheme that selects this resolver (`consul://orders`).
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Time between background re-resolutions.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,

    /// Added to each registered port to obtain the data-plane port.
    #[serde(default = "default_port_offset")]
    pub port_offset: i32,

    /// How the poller decides the endpoint set changed.
    #[serde(default)]
    pub change_detection: ChangeDetection,

    /// Upper bound on a single registry query.
    #[serde(
        default = "default_resolve_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub resolve_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            poll_interval: default_poll_interval(),
            port_offset: default_port_offset(),
            change_detection: ChangeDetection::default(),
            resolve_timeout: default_resolve_timeout(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_scheme = !self.scheme.is_empty()
            && self
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(ConfigError::Invalid(format!(
                "resolver.scheme {:?} is not a valid URI scheme",
                self.scheme
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "resolver.poll_interval must be greater than zero".into(),
            ));
        }
        if self.resolve_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "resolver.resolve_timeout must be greater than zero".into(),
            ));
        }
        if self.port_offset.unsigned_abs() > u32::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "resolver.port_offset {} is outside the port range",
                self.port_offset
            )));
        }
        Ok(())
    }
}

fn default_scheme() -> String {
    "consul".to_owned()
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_port_offset() -> i32 {
    DEFAULT_PORT_OFFSET
}

const fn default_resolve_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Registry connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Cache registry answers locally.
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// How long a cached answer stays fresh.
    #[serde(
        default = "default_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_ttl: Duration,

    /// Consul agent connection.
    #[serde(default)]
    pub consul: ConsulConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enable_cache: default_true(),
            cache_ttl: default_cache_ttl(),
            consul: ConsulConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = &self.consul.address;
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "registry.consul.address {:?} must be an http(s) URL",
                self.consul.address
            )));
        }
        if self.consul.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "registry.consul.request_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Builds the registry client described by this configuration.
    pub fn connect(&self) -> Result<Arc<dyn RegistryClient>, RegistryError> {
        let consul = ConsulRegistry::new(
            self.consul.address.clone(),
            self.consul.request_timeout,
            self.consul.datacenter.clone(),
        )?;

        if self.enable_cache && !self.cache_ttl.is_zero() {
            Ok(Arc::new(CachedRegistry::new(Arc::new(consul), self.cache_ttl)))
        } else {
            Ok(Arc::new(consul))
        }
    }
}

/// Consul agent connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsulConfig {
    /// Base URL of the agent's HTTP API.
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// Datacenter to query; the agent's own when unset.
    #[serde(default)]
    pub datacenter: Option<String>,

    /// Timeout for a single HTTP request to the agent.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            datacenter: None,
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_owned()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_cache_ttl() -> Duration {
    Duration::from_secs(5)
}

const fn default_true() -> bool {
    true
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Secs(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}

struct EnvVarInterpolator;

impl EnvVarInterpolator {
    fn interpolate_value(value: Value) -> Value {
        match value {
            Value::String(_, s) => Value::from(Self::interpolate_string(&s)),
            Value::Dict(tag, dict) => {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, Self::interpolate_value(v)))
                    .collect();
                Value::Dict(tag, new_dict)
            }
            Value::Array(tag, arr) => {
                let new_arr: Vec<Value> = arr.into_iter().map(Self::interpolate_value).collect();
                Value::Array(tag, new_arr)
            }
            other => other,
        }
    }

    fn interpolate_string(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();

                for ch in chars.by_ref() {
                    if ch == '}' {
                        break;
                    }
                    var_name.push(ch);
                }

                if let Ok(val) = std::env::var(&var_name) {
                    result.push_str(&val);
                }
            } else {
                result.push(c);
            }
        }

        result
    }
}

/// TOML configuration provider with environment variable interpolation.
///
/// Supports `${VAR_NAME}` syntax, e.g. `address = "http://${CONSUL_HOST}:8500"`.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    /// Creates an interpolating TOML provider from a file path.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    /// Creates an interpolating TOML provider from a string.
    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let base = Toml::string(&self.content);
        let base_data = base.data()?;

        let interpolated: Map<Profile, Dict> = base_data
            .into_iter()
            .map(|(profile, dict)| {
                let new_dict: Dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, EnvVarInterpolator::interpolate_value(v)))
                    .collect();
                (profile, new_dict)
            })
            .collect();

        Ok(interpolated)
    }
}
