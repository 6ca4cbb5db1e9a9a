//! Notification configuration, as read from TOML
//!
//! ```toml
//! [events]
//! include-references = true
//!
//! [[endpoints]]
//! name = "audit"
//! url = "https://hooks.example.com/registry"
//! headers = { Authorization = ["Bearer xyz"] }
//! timeout = "500ms"
//! threshold = 5
//! backoff = "2s"
//!
//! [endpoints.ignore]
//! media-types = ["application/octet-stream"]
//! actions = ["pull"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::event::Action;
use crate::retry::RetryPolicy;

/// Configuration of the whole notification pipeline
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationsConfig {
    /// Settings shared by every event
    #[serde(default)]
    pub events: EventsConfig,

    /// Destinations for events
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Settings for the events produced by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventsConfig {
    /// Attach the descriptors referenced by a manifest to its events
    #[serde(default)]
    pub include_references: bool,
}

/// Events an endpoint does not want to receive
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IgnoreConfig {
    /// Target media types to skip
    #[serde(default)]
    pub media_types: Vec<String>,

    /// Actions to skip
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// One destination for events
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointConfig {
    /// Name used in logs and metrics
    #[serde(default)]
    pub name: String,

    /// URL events are posted to
    pub url: String,

    /// Headers added to every request
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,

    /// Time allowed for each request
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive failures before retries back off
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Pause between retries once backing off
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,

    /// Target media types to skip. Merged with `ignore.media-types`.
    #[serde(default)]
    pub ignored_media_types: Vec<String>,

    /// Events to skip
    #[serde(default)]
    pub ignore: IgnoreConfig,

    /// Skip this endpoint entirely
    #[serde(default)]
    pub disabled: bool,

    /// How long shutdown waits for the backlog to drain
    #[serde(default, with = "humantime_serde")]
    pub queue_purge_timeout: Option<Duration>,

    /// Maximum backlog before the oldest events are dropped
    #[serde(default)]
    pub queue_size_limit: Option<usize>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_threshold() -> usize {
    RetryPolicy::default().threshold
}

fn default_backoff() -> Duration {
    RetryPolicy::default().backoff
}

impl NotificationsConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_edit::de::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading notifications config");
        let document = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&document)
    }

    /// Check every endpoint has a name, a usable URL and valid headers
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.name.trim().is_empty() {
                return Err(ConfigError::MissingName { index });
            }
            endpoint.uri()?;
            endpoint.header_map()?;
        }
        Ok(())
    }

    /// Endpoints which are not disabled
    pub fn enabled(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(|endpoint| !endpoint.disabled)
    }
}

impl EndpointConfig {
    /// An endpoint with default settings
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: default_timeout(),
            threshold: default_threshold(),
            backoff: default_backoff(),
            ignored_media_types: Vec::new(),
            ignore: IgnoreConfig::default(),
            disabled: false,
            queue_purge_timeout: None,
            queue_size_limit: None,
        }
    }

    /// The endpoint URL, which must be absolute http or https
    pub fn uri(&self) -> Result<Uri, ConfigError> {
        let invalid = || ConfigError::InvalidUrl {
            name: self.name.clone(),
            url: self.url.clone(),
        };

        let uri: Uri = self.url.parse().map_err(|_| invalid())?;
        match (uri.scheme_str(), uri.authority()) {
            (Some("http" | "https"), Some(_)) => Ok(uri),
            _ => Err(invalid()),
        }
    }

    /// The configured headers. A header listed with several values is sent
    /// once per value.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, values) in &self.headers {
            let invalid = || ConfigError::InvalidHeader {
                name: self.name.clone(),
                header: name.clone(),
            };

            let header = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
            for value in values {
                let value = HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
                headers.append(header.clone(), value);
            }
        }
        Ok(headers)
    }

    /// Every ignored media type, from both the `ignored-media-types` list and
    /// the `ignore` table
    pub fn ignored_media_types(&self) -> Vec<String> {
        let mut media_types: Vec<String> = self
            .ignored_media_types
            .iter()
            .chain(&self.ignore.media_types)
            .cloned()
            .collect();
        media_types.sort();
        media_types.dedup();
        media_types
    }

    /// The retry policy for this endpoint
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.threshold, self.backoff)
    }
}
