//! Event model for registry notifications
//!
//! These are the values that travel through the sink chain and are
//! serialized onto the wire. An [`Event`] is built once by a
//! [`Bridge`](crate::Bridge) and is never mutated afterwards.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of repository mutation an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Content was uploaded
    Push,

    /// Content was downloaded
    Pull,

    /// Content was removed
    Delete,

    /// A blob was mounted from another repository
    Mount,
}

impl Action {
    /// The wire name of this action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Push => "push",
            Action::Pull => "pull",
            Action::Delete => "delete",
            Action::Mount => "mount",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Action::Push),
            "pull" => Ok(Action::Pull),
            "delete" => Ok(Action::Delete),
            "mount" => Ok(Action::Mount),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// An action name that is not one of the known event actions
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event action: {0}")]
pub struct UnknownAction(pub String);

/// A content descriptor referenced by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    /// Digest of the referenced content
    pub digest: String,

    /// Size of the referenced content in bytes
    #[serde(default)]
    pub size: u64,
}

/// The subject of an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Media type of the target content
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,

    /// Digest of the target content
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,

    /// Size of the target content in bytes
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u64,

    /// Same as `size`, retained for consumers of the older format
    #[serde(default, skip_serializing_if = "is_zero")]
    pub length: u64,

    /// Repository name
    pub repository: String,

    /// Source repository of a cross-repository mount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_repository: Option<String>,

    /// URL from which the target can be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Tag, for tag-qualified operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Descriptors referenced by the target manifest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Descriptor>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// The registry instance which emitted an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Network address of the registry node
    pub addr: String,

    /// Identifier of the running registry process
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

impl SourceRecord {
    /// A source record for this process, with a freshly generated instance id
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }
}

/// The agent that initiated an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    /// Subject or username, empty when the request was anonymous
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ActorRecord {
    /// An actor with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// An anonymous actor
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// The inbound HTTP request that produced an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request correlation id
    pub id: String,

    /// Address of the client
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub addr: String,

    /// Host header value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// HTTP method
    pub method: String,

    /// User agent of the client
    #[serde(rename = "useragent", default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
}

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

impl RequestRecord {
    /// Capture the request metadata from the parts of an inbound request.
    ///
    /// The client address prefers the first `X-Forwarded-For` entry, then
    /// `X-Real-Ip`, then the peer address of the connection.
    pub fn from_parts(
        id: impl Into<String>,
        parts: &http::request::Parts,
        remote: Option<SocketAddr>,
    ) -> Self {
        let host = header_str(&parts.headers, http::header::HOST.as_str())
            .map(str::to_owned)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            id: id.into(),
            addr: remote_addr(&parts.headers, remote),
            host,
            method: parts.method.to_string(),
            user_agent: header_str(&parts.headers, http::header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn remote_addr(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(forwarded) = header_str(headers, X_FORWARDED_FOR) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_owned();
        }
    }

    if let Some(real) = header_str(headers, X_REAL_IP) {
        return real.to_owned();
    }

    remote.map(|addr| addr.to_string()).unwrap_or_default()
}

/// A single notifiable occurrence in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier of this event
    pub id: Uuid,

    /// When the event was created
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub action: Action,

    /// What it happened to
    pub target: Target,

    /// The request which caused it
    pub request: RequestRecord,

    /// Who caused it
    pub actor: ActorRecord,

    /// Which registry instance observed it
    pub source: SourceRecord,
}

impl Event {
    /// Create a new event with a fresh id and the current time
    pub fn new(
        action: Action,
        target: Target,
        request: RequestRecord,
        actor: ActorRecord,
        source: SourceRecord,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            target,
            request,
            actor,
            source,
        }
    }
}

/// The wire-level batch of events posted to an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Events in this batch, in order
    pub events: Vec<Event>,
}

impl Envelope {
    /// An envelope holding exactly one event
    pub fn single(event: &Event) -> Self {
        Self {
            events: vec![event.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::new(
            Action::Push,
            Target {
                media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                digest: "sha256:abc".into(),
                size: 42,
                length: 42,
                repository: "library/alpine".into(),
                tag: Some("3.20".into()),
                ..Default::default()
            },
            RequestRecord {
                id: "req-1".into(),
                method: "PUT".into(),
                user_agent: "docker/27".into(),
                ..Default::default()
            },
            ActorRecord::new("alice"),
            SourceRecord {
                addr: "registry-0:5000".into(),
                instance_id: "instance".into(),
            },
        )
    }

    #[test]
    fn event_wire_field_names() {
        let event = sample();
        let json = serde_json::to_value(Envelope::single(&event)).unwrap();
        let event = &json["events"][0];

        assert_eq!(event["action"], "push");
        assert_eq!(event["target"]["mediaType"], "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(event["target"]["length"], 42);
        assert_eq!(event["target"]["tag"], "3.20");
        assert_eq!(event["request"]["useragent"], "docker/27");
        assert_eq!(event["source"]["instanceID"], "instance");
        assert_eq!(event["actor"]["name"], "alice");
    }

    #[test]
    fn empty_target_fields_are_omitted() {
        let target = Target {
            repository: "library/alpine".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&target).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), 1);
        assert!(object.contains_key("repository"));
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(sample().id, sample().id);
    }

    #[test]
    fn request_record_prefers_forwarded_address() {
        let (parts, _) = http::Request::builder()
            .method("GET")
            .uri("/v2/library/alpine/manifests/latest")
            .header("host", "registry.example.com")
            .header("user-agent", "containerd/2.0")
            .header("x-forwarded-for", "10.0.0.7, 172.16.0.1")
            .body(())
            .unwrap()
            .into_parts();

        let record = RequestRecord::from_parts("req-2", &parts, "127.0.0.1:4000".parse().ok());
        assert_eq!(record.addr, "10.0.0.7");
        assert_eq!(record.host, "registry.example.com");
        assert_eq!(record.method, "GET");
        assert_eq!(record.user_agent, "containerd/2.0");
    }

    #[test]
    fn request_record_falls_back_to_peer() {
        let (parts, _) = http::Request::builder()
            .method("HEAD")
            .uri("/v2/")
            .body(())
            .unwrap()
            .into_parts();

        let record = RequestRecord::from_parts("req-3", &parts, "192.168.1.2:5555".parse().ok());
        assert_eq!(record.addr, "192.168.1.2:5555");
        assert!(record.user_agent.is_empty());
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [Action::Push, Action::Pull, Action::Delete, Action::Mount] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("frobulate".parse::<Action>().is_err());
    }
}
