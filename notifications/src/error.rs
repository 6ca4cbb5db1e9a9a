//! Error types for the notification pipeline

use std::fmt;
use std::time::Duration;

use http::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a [`Sink`](crate::Sink)
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink was closed, and will not accept more events
    #[error("sink: closed")]
    Closed,

    /// `close` was called on a sink that is already closed
    #[error("{0} already closed")]
    AlreadyClosed(&'static str),

    /// The event could not be serialized
    #[error("encoding events: {0}")]
    Encode(#[from] serde_json::Error),

    /// The notification request could not be built
    #[error("building notification request: {0}")]
    Request(#[from] http::Error),

    /// An error occured while sending the request
    #[error("sending notification: {0}")]
    Transport(#[source] hyperdriver::client::Error),

    /// The endpoint did not answer in time
    #[error("notification request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a status outside of `[200, 400)`
    #[error("response status {status} unaccepted")]
    Status {
        /// The HTTP status returned by the endpoint
        status: StatusCode,
    },

    /// Several stages failed, e.g. while closing a broadcaster
    #[error("{}", DisplayErrors(.0))]
    Multiple(Vec<SinkError>),

    /// Any other failure reported by a sink implementation
    #[error(transparent)]
    Other(BoxError),
}

impl SinkError {
    /// Wrap an arbitrary error reported by a sink implementation
    pub fn other<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        SinkError::Other(error.into())
    }

    /// Is this the sentinel returned when writing to a closed sink?
    pub fn is_closed(&self) -> bool {
        matches!(self, SinkError::Closed)
    }
}

struct DisplayErrors<'e>(&'e [SinkError]);

impl fmt::Display for DisplayErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sink errors: ", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Errors from resolving a repository reference to a URL
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    /// The reference has neither a tag nor a digest
    #[error("reference for {0} must have a tag or digest")]
    MissingReference(String),

    /// The URL could not be assembled
    #[error("invalid url: {0}")]
    Invalid(String),
}

/// Errors from introspecting a manifest payload
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The payload is not a JSON manifest
    #[error("invalid manifest payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The payload parsed, but is not a manifest
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Errors returned by a [`Bridge`](crate::Bridge)
///
/// None of these should cause the registry operation which triggered the
/// notification to fail. Callers log them and move on.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Building the target URL failed
    #[error("building event url: {0}")]
    Url(#[from] UrlError),

    /// The manifest could not be introspected
    #[error("building manifest event: {0}")]
    Manifest(#[from] ManifestError),

    /// The sink refused the event
    #[error("writing event: {0}")]
    Sink(#[from] SinkError),
}

/// Errors loading or validating notification configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed
    #[error("parsing notifications config: {0}")]
    Parse(#[from] toml_edit::de::Error),

    /// The configuration file could not be read
    #[error("reading notifications config: {0}")]
    Io(#[from] std::io::Error),

    /// An endpoint has no name
    #[error("endpoint {index} has no name")]
    MissingName {
        /// Position of the endpoint in the config
        index: usize,
    },

    /// An endpoint url could not be parsed
    #[error("endpoint {name}: invalid url {url:?}")]
    InvalidUrl {
        /// Endpoint name
        name: String,
        /// The offending url
        url: String,
    },

    /// An endpoint header is not a valid HTTP header
    #[error("endpoint {name}: invalid header {header:?}")]
    InvalidHeader {
        /// Endpoint name
        name: String,
        /// The offending header name
        header: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_distinct_from_already_closed() {
        assert!(SinkError::Closed.is_closed());
        assert!(!SinkError::AlreadyClosed("eventqueue").is_closed());
        assert_eq!(
            SinkError::AlreadyClosed("eventqueue").to_string(),
            "eventqueue already closed"
        );
    }

    #[test]
    fn multiple_lists_every_error() {
        let error = SinkError::Multiple(vec![
            SinkError::AlreadyClosed("httpsink"),
            SinkError::Status {
                status: StatusCode::BAD_GATEWAY,
            },
        ]);
        assert_eq!(
            error.to_string(),
            "2 sink errors: httpsink already closed; response status 502 Bad Gateway unaccepted"
        );
    }
}
