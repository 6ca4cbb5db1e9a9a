//! In-process delivery counters for an endpoint

use std::collections::BTreeMap;

use http::StatusCode;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::SinkError;
use crate::event::Event;
use crate::http::HttpStatusListener;
use crate::queue::QueueListener;

/// A point-in-time copy of an endpoint's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Events accepted by the queue but not yet handed on
    pub pending: u64,

    /// Events accepted by the queue
    pub events: u64,

    /// Requests the endpoint accepted
    pub successes: u64,

    /// Requests the endpoint answered with an unaccepted status
    pub failures: u64,

    /// Requests which got no answer at all
    pub errors: u64,

    /// Events discarded by the queue without delivery
    pub dropped: u64,

    /// Responses seen, by status
    pub statuses: BTreeMap<String, u64>,
}

/// Counters attached to both the queue and the HTTP sink of an endpoint.
///
/// Every HTTP attempt is counted, so an event that needed three attempts
/// contributes to `failures` or `errors` more than once.
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    counters: Mutex<MetricsSnapshot>,
}

impl EndpointMetrics {
    /// Create a set of zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters.lock().clone()
    }

    fn response(&self, status: StatusCode, accepted: bool) {
        let mut counters = self.counters.lock();
        if accepted {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        *counters.statuses.entry(status.to_string()).or_default() += 1;
    }
}

impl HttpStatusListener for EndpointMetrics {
    fn success(&self, status: StatusCode, _event: &Event) {
        self.response(status, true);
    }

    fn failure(&self, status: StatusCode, _event: &Event) {
        self.response(status, false);
    }

    fn err(&self, _error: &SinkError, _event: &Event) {
        self.counters.lock().errors += 1;
    }
}

impl QueueListener for EndpointMetrics {
    fn ingress(&self, _event: &Event) {
        let mut counters = self.counters.lock();
        counters.events += 1;
        counters.pending += 1;
    }

    fn egress(&self, _event: &Event) {
        let mut counters = self.counters.lock();
        counters.pending = counters.pending.saturating_sub(1);
    }

    fn dropped(&self, _event: &Event) {
        let mut counters = self.counters.lock();
        counters.pending = counters.pending.saturating_sub(1);
        counters.dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;
    use crate::sink::testing::event;

    #[test]
    fn counts_queue_movement() {
        let metrics = EndpointMetrics::new();
        let event = event(Action::Push, "");

        metrics.ingress(&event);
        metrics.ingress(&event);
        metrics.ingress(&event);
        metrics.egress(&event);
        metrics.dropped(&event);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events, 3);
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn counts_responses_by_status() {
        let metrics = EndpointMetrics::new();
        let event = event(Action::Pull, "");

        metrics.success(StatusCode::OK, &event);
        metrics.success(StatusCode::OK, &event);
        metrics.failure(StatusCode::SERVICE_UNAVAILABLE, &event);
        metrics.err(&SinkError::Timeout(std::time::Duration::from_secs(1)), &event);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.statuses["200 OK"], 2);
        assert_eq!(snapshot.statuses["503 Service Unavailable"], 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["statuses"]["200 OK"], 2);
    }
}
