//! Event notifications for a container registry
//!
//! Changes to a registry (manifests and blobs pushed, pulled, mounted or
//! deleted) are turned into [`Event`]s by a [`Bridge`] and delivered to
//! HTTP endpoints through a chain of [`Sink`]s:
//!
//! ```text
//! Bridge -> Broadcaster -> EventQueue -> RetryingSink -> IgnoredSink -> HttpSink
//!                       \-> EventQueue -> ...            (one per endpoint)
//! ```
//!
//! Each endpoint receives events in the order they were emitted, without
//! slowing down the request which emitted them. The [`Notifier`] builds this
//! chain from a [`NotificationsConfig`].

mod bridge;
mod broadcast;
pub mod config;
mod endpoint;
mod error;
pub mod event;
mod http;
mod ignored;
pub mod manifest;
mod metrics;
mod notifier;
mod queue;
mod retry;
mod sink;
pub mod url;

pub use self::bridge::{Bridge, ManifestOptions};
pub use self::broadcast::Broadcaster;
pub use self::config::{EndpointConfig, NotificationsConfig};
pub use self::endpoint::Endpoint;
pub use self::error::{BridgeError, ConfigError, ManifestError, SinkError, UrlError};
pub use self::event::{Action, ActorRecord, Descriptor, Envelope, Event, RequestRecord, SourceRecord, Target};
pub use self::http::{HttpService, HttpSink, HttpStatusListener};
pub use self::ignored::IgnoredSink;
pub use self::manifest::{Manifest, RawManifest};
pub use self::metrics::{EndpointMetrics, MetricsSnapshot};
pub use self::notifier::Notifier;
pub use self::queue::{EventQueue, EventQueueBuilder, QueueListener};
pub use self::retry::{RetryPolicy, RetryingSink};
pub use self::sink::{BoxSink, Sink};
pub use self::url::{RepositoryReference, RouteUrlBuilder, UrlBuilder};
