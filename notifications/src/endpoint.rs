//! A configured destination for events

use std::sync::Arc;

use http::Uri;

use crate::config::EndpointConfig;
use crate::error::{ConfigError, SinkError};
use crate::event::Event;
use crate::http::HttpSink;
use crate::ignored::IgnoredSink;
use crate::metrics::{EndpointMetrics, MetricsSnapshot};
use crate::retry::RetryingSink;
use crate::sink::Sink;

type Chain = RetryingSink<IgnoredSink<HttpSink>>;

/// One endpoint: retries, then filtering, then the HTTP request.
///
/// The endpoint's metrics are attached to the HTTP sink here, and should be
/// attached to the queue placed in front of it (see
/// [`Endpoint::listener`]).
#[derive(Debug)]
pub struct Endpoint {
    config: EndpointConfig,
    metrics: Arc<EndpointMetrics>,
    sink: Chain,
}

impl Endpoint {
    /// Build an endpoint sending over the network
    pub fn new(config: EndpointConfig) -> Result<Self, ConfigError> {
        let url = config.uri()?;
        let headers = config.header_map()?;
        let http = HttpSink::new(url, config.timeout, headers);
        Ok(Self::from_http(config, http))
    }

    /// Build an endpoint sending through `service` instead of a network client
    pub fn with_service<S>(config: EndpointConfig, service: S) -> Result<Self, ConfigError>
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let url = config.uri()?;
        let headers = config.header_map()?;
        let http = HttpSink::with_service(url, config.timeout, headers, service);
        Ok(Self::from_http(config, http))
    }

    fn from_http(config: EndpointConfig, http: HttpSink) -> Self {
        let metrics = Arc::new(EndpointMetrics::new());
        let http = http.listener(metrics.clone());

        let ignored = IgnoredSink::new(
            http,
            config.ignored_media_types(),
            config.ignore.actions.iter().copied(),
        );
        let sink = RetryingSink::new(ignored, config.retry_policy());

        tracing::debug!(name = %config.name, url = %config.url, "configured endpoint");
        Self {
            config,
            metrics,
            sink,
        }
    }

    /// The endpoint name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The URL events are posted to
    pub fn url(&self) -> &Uri {
        self.sink.inner().inner().url()
    }

    /// The configuration this endpoint was built from
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// The metrics of this endpoint, to be attached to its queue
    pub fn listener(&self) -> Arc<EndpointMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Snapshot of this endpoint's counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait::async_trait]
impl Sink for Endpoint {
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        self.sink.write(event).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        tracing::debug!(name = %self.config.name, "closing endpoint");
        self.sink.close().await
    }
}
