//! The notification pipeline of a registry process

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::broadcast::Broadcaster;
use crate::config::NotificationsConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, SinkError};
use crate::event::{ActorRecord, RequestRecord, SourceRecord};
use crate::queue::EventQueueBuilder;
use crate::sink::Sink;
use crate::url::UrlBuilder;

/// Every configured endpoint behind one broadcaster.
///
/// Build one at startup, hand a [`Bridge`] to each request which changes the
/// registry, and [`close`](Notifier::close) it on shutdown so that queued
/// events are delivered.
#[derive(Debug)]
pub struct Notifier {
    broadcaster: Arc<Broadcaster<Endpoint>>,
    urls: Arc<dyn UrlBuilder>,
    source: SourceRecord,
    include_references: bool,
}

impl Notifier {
    /// Build the pipeline described by `config`. Disabled endpoints are
    /// skipped. Must be called from within a Tokio runtime.
    pub fn from_config(
        config: &NotificationsConfig,
        source: SourceRecord,
        urls: Arc<dyn UrlBuilder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let endpoints = config
            .enabled()
            .cloned()
            .map(Endpoint::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_endpoints(endpoints, config.events.include_references, source, urls))
    }

    /// Build the pipeline from endpoints which were already constructed.
    /// Must be called from within a Tokio runtime.
    pub fn from_endpoints(
        endpoints: Vec<Endpoint>,
        include_references: bool,
        source: SourceRecord,
        urls: Arc<dyn UrlBuilder>,
    ) -> Self {
        let queues = endpoints.into_iter().map(|endpoint| {
            let config = endpoint.config();
            let mut queue = EventQueueBuilder::new().listener(endpoint.listener());
            if let Some(timeout) = config.queue_purge_timeout {
                queue = queue.purge_timeout(timeout);
            }
            if let Some(limit) = config.queue_size_limit {
                queue = queue.limit(limit);
            }
            tracing::info!(name = %endpoint.name(), url = %endpoint.url(), "notifying endpoint");
            queue.build(endpoint)
        });

        Self {
            broadcaster: Arc::new(Broadcaster::from_queues(queues)),
            urls,
            source,
            include_references,
        }
    }

    /// A bridge emitting events on behalf of one request
    pub fn bridge(&self, actor: ActorRecord, request: RequestRecord) -> Bridge {
        let sink: Arc<dyn Sink> = self.broadcaster.clone();
        Bridge::new(
            sink,
            Arc::clone(&self.urls),
            self.source.clone(),
            actor,
            request,
        )
        .include_references(self.include_references)
    }

    /// The configured endpoints, in configuration order
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.broadcaster.queues().iter().map(|queue| queue.inner())
    }

    /// The source record stamped on every event
    pub fn source(&self) -> &SourceRecord {
        &self.source
    }

    /// Stop accepting events, deliver everything queued, and close every
    /// endpoint
    pub async fn close(&self) -> Result<(), SinkError> {
        tracing::info!("closing notification endpoints");
        self.broadcaster.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;

    use super::*;
    use crate::bridge::ManifestOptions;
    use crate::config::EndpointConfig;
    use crate::event::Action;
    use crate::http::mock::{MockEndpoint, Reply};
    use crate::manifest::RawManifest;
    use crate::manifest::tests::IMAGE;
    use crate::url::RouteUrlBuilder;

    fn notifier(services: &[MockEndpoint]) -> Notifier {
        let endpoints = services
            .iter()
            .enumerate()
            .map(|(i, service)| {
                let config = EndpointConfig::new(format!("hook-{i}"), format!("http://hook-{i}.test/"));
                Endpoint::with_service(config, service.clone()).unwrap()
            })
            .collect();

        Notifier::from_endpoints(
            endpoints,
            true,
            SourceRecord::new("registry:5000"),
            Arc::new(RouteUrlBuilder::new()),
        )
    }

    #[tokio::test]
    async fn events_reach_every_endpoint() {
        let services = [
            MockEndpoint::new(Reply::Status(StatusCode::OK)),
            MockEndpoint::new(Reply::Status(StatusCode::NO_CONTENT)),
        ];
        let notifier = notifier(&services);

        let bridge = notifier.bridge(ActorRecord::new("ci"), RequestRecord::default());
        let manifest = RawManifest::new(IMAGE).unwrap();
        bridge
            .manifest_pushed("team/app", &manifest, ManifestOptions::tagged("v1"))
            .await
            .unwrap();
        bridge.tag_deleted("team/app", "v0").await.unwrap();

        notifier.close().await.unwrap();

        for service in &services {
            let requests = service.requests();
            assert_eq!(requests.len(), 2);

            let first: crate::event::Envelope = serde_json::from_slice(&requests[0].body).unwrap();
            let event = &first.events[0];
            assert_eq!(event.action, Action::Push);
            assert_eq!(event.target.references.len(), 2);
            assert_eq!(event.source, *notifier.source());
        }

        for endpoint in notifier.endpoints() {
            let metrics = endpoint.metrics();
            assert_eq!(metrics.events, 2);
            assert_eq!(metrics.successes, 2);
            assert_eq!(metrics.pending, 0);
        }
    }

    #[tokio::test]
    async fn a_dead_endpoint_does_not_hold_up_the_others() {
        let services = [
            MockEndpoint::new(Reply::Hang),
            MockEndpoint::new(Reply::Status(StatusCode::OK)),
        ];

        let mut dead = EndpointConfig::new("dead", "http://dead.test/");
        dead.timeout = Duration::from_millis(10);
        dead.backoff = Duration::from_millis(10);
        dead.queue_purge_timeout = Some(Duration::from_millis(100));
        let endpoints = vec![
            Endpoint::with_service(dead, services[0].clone()).unwrap(),
            Endpoint::with_service(
                EndpointConfig::new("live", "http://live.test/"),
                services[1].clone(),
            )
            .unwrap(),
        ];
        let notifier = Notifier::from_endpoints(
            endpoints,
            false,
            SourceRecord::new("registry:5000"),
            Arc::new(RouteUrlBuilder::new()),
        );

        let bridge = notifier.bridge(ActorRecord::anonymous(), RequestRecord::default());
        for _ in 0..3 {
            bridge.repo_deleted("team/app").await.unwrap();
        }

        notifier.close().await.unwrap();

        assert_eq!(services[1].requests().len(), 3);
        let names: Vec<_> = notifier.endpoints().map(Endpoint::name).collect();
        assert_eq!(names, ["dead", "live"]);

        let dead = notifier.endpoints().next().unwrap().metrics();
        assert_eq!(dead.successes, 0);
        assert!(dead.errors >= 1);
        // Two were purged from the backlog and one abandoned mid-retry.
        assert_eq!(dead.dropped, 3);
        assert_eq!(dead.successes + dead.dropped, dead.events);
        assert_eq!(dead.pending, 0);
    }

    #[tokio::test]
    async fn disabled_endpoints_are_not_built() {
        let config = NotificationsConfig::from_toml(
            r#"
[[endpoints]]
name = "off"
url = "http://off.test/"
disabled = true
"#,
        )
        .unwrap();

        let notifier = Notifier::from_config(
            &config,
            SourceRecord::new("registry:5000"),
            Arc::new(RouteUrlBuilder::new()),
        )
        .unwrap();
        assert_eq!(notifier.endpoints().count(), 0);

        let bridge = notifier.bridge(ActorRecord::anonymous(), RequestRecord::default());
        bridge.repo_deleted("app").await.unwrap();
        notifier.close().await.unwrap();
    }
}
