//! Delivery of events to an HTTP endpoint

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use hyperdriver::service::SharedService;
use tower::ServiceExt as _;

use crate::error::SinkError;
use crate::event::{Envelope, Event};
use crate::sink::Sink;

/// The client service used to send notifications
pub type HttpService = hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>;

/// Observer of the outcome of each HTTP delivery attempt
pub trait HttpStatusListener: fmt::Debug + Send + Sync {
    /// The endpoint accepted the event
    fn success(&self, status: StatusCode, event: &Event);

    /// The endpoint answered, but did not accept the event
    fn failure(&self, status: StatusCode, event: &Event);

    /// The event could not be delivered at all
    fn err(&self, error: &SinkError, event: &Event);
}

/// Posts each event, wrapped in an [`Envelope`], to a single URL.
///
/// A response status in `[200, 400)` counts as delivered. Anything else, and
/// any transport error, is reported to the listeners and returned. This sink
/// never retries; wrap it in a [`RetryingSink`](crate::RetryingSink) for that.
#[derive(Debug)]
pub struct HttpSink {
    url: Uri,
    service: HttpService,
    headers: HeaderMap,
    timeout: Duration,
    listeners: Vec<Arc<dyn HttpStatusListener>>,
    closed: AtomicBool,
}

impl HttpSink {
    /// Create a sink posting to `url` over a new TCP/TLS client.
    ///
    /// `headers` are added to every request, and `timeout` bounds each
    /// round trip.
    pub fn new(url: Uri, timeout: Duration, headers: HeaderMap) -> Self {
        let service = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();

        Self::from_parts(url, timeout, headers, service)
    }

    /// Create a sink which sends requests through the given service instead
    /// of a network client.
    pub fn with_service<S>(url: Uri, timeout: Duration, headers: HeaderMap, service: S) -> Self
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
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(service);

        Self::from_parts(url, timeout, headers, service)
    }

    fn from_parts(url: Uri, timeout: Duration, headers: HeaderMap, service: HttpService) -> Self {
        Self {
            url,
            service,
            headers,
            timeout,
            listeners: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Report delivery outcomes to `listener`
    pub fn listener(mut self, listener: Arc<dyn HttpStatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The endpoint URL
    pub fn url(&self) -> &Uri {
        &self.url
    }

    fn request(&self, event: &Event) -> Result<http::Request<hyperdriver::Body>, SinkError> {
        let body = serde_json::to_vec_pretty(&Envelope::single(event))?;

        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri(self.url.clone())
            .body(hyperdriver::Body::from(Bytes::from(body)))?;

        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(request)
    }

    async fn deliver(&self, event: &Event) -> Result<StatusCode, SinkError> {
        let request = self.request(event)?;

        let response = tokio::time::timeout(self.timeout, self.service.clone().oneshot(request))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
            .map_err(SinkError::Transport)?;

        // The body is never read; dropping the response releases the connection.
        Ok(response.status())
    }
}

fn accepted(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

#[async_trait::async_trait]
impl Sink for HttpSink {
    #[tracing::instrument(level = "debug", skip_all, fields(url = %self.url, id = %event.id))]
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        match self.deliver(event).await {
            Ok(status) if accepted(status) => {
                tracing::debug!(%status, "event delivered");
                for listener in &self.listeners {
                    listener.success(status, event);
                }
                Ok(())
            }
            Ok(status) => {
                for listener in &self.listeners {
                    listener.failure(status, event);
                }
                Err(SinkError::Status { status })
            }
            Err(error) => {
                for listener in &self.listeners {
                    listener.err(&error, event);
                }
                Err(error)
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::AlreadyClosed("httpsink"));
        }
        Ok(())
    }
}
