//! Filtering of events by media type and action

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SinkError;
use crate::event::{Action, Event};
use crate::sink::Sink;

/// Drops events whose media type or action is ignored, and forwards the rest.
///
/// Dropping an event is a successful outcome, so `write` returns `Ok(())`
/// for ignored events.
#[derive(Debug)]
pub struct IgnoredSink<S> {
    sink: S,
    media_types: HashSet<String>,
    actions: HashSet<Action>,
    closed: AtomicBool,
}

impl<S> IgnoredSink<S> {
    /// Wrap `sink`, ignoring the given media types and actions
    pub fn new<M, A>(sink: S, media_types: M, actions: A) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        A: IntoIterator<Item = Action>,
    {
        Self {
            sink,
            media_types: media_types.into_iter().map(Into::into).collect(),
            actions: actions.into_iter().collect(),
            closed: AtomicBool::new(false),
        }
    }

    /// Should this event be dropped?
    pub fn ignores(&self, event: &Event) -> bool {
        self.media_types.contains(&event.target.media_type) || self.actions.contains(&event.action)
    }

    /// Access the wrapped sink
    pub fn inner(&self) -> &S {
        &self.sink
    }
}

#[async_trait::async_trait]
impl<S> Sink for IgnoredSink<S>
where
    S: Sink,
{
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        if self.ignores(event) {
            tracing::trace!(
                id = %event.id,
                action = %event.action,
                media_type = %event.target.media_type,
                "ignoring event"
            );
            return Ok(());
        }

        self.sink.write(event).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::AlreadyClosed("ignoredsink"));
        }
        self.sink.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::{RecordingSink, event};

    const MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

    #[tokio::test]
    async fn ignores_media_types_and_actions() {
        let sink = IgnoredSink::new(RecordingSink::new(), ["blob"], [Action::Pull]);

        let blob_push = event(Action::Push, "blob");
        let manifest_pull = event(Action::Pull, MANIFEST);
        let manifest_push = event(Action::Push, MANIFEST);

        sink.write(&blob_push).await.unwrap();
        sink.write(&manifest_pull).await.unwrap();
        sink.write(&manifest_push).await.unwrap();

        let delivered = sink.inner().events();
        assert_eq!(delivered, vec![manifest_push]);
    }

    #[tokio::test]
    async fn forwards_everything_without_filters() {
        let sink = IgnoredSink::new(RecordingSink::new(), Vec::<String>::new(), Vec::<Action>::new());

        let events = [
            event(Action::Push, "blob"),
            event(Action::Pull, MANIFEST),
            event(Action::Delete, ""),
        ];
        for e in &events {
            sink.write(e).await.unwrap();
        }

        assert_eq!(sink.inner().events(), events.to_vec());
    }

    #[tokio::test]
    async fn closed_sink_rejects_even_ignored_events() {
        let sink = IgnoredSink::new(RecordingSink::new(), ["blob"], Vec::<Action>::new());
        sink.close().await.unwrap();

        assert!(sink.inner().is_closed());
        assert!(sink.close().await.is_err());
        assert!(
            sink.write(&event(Action::Push, "blob"))
                .await
                .unwrap_err()
                .is_closed()
        );
        assert!(
            sink.write(&event(Action::Push, MANIFEST))
                .await
                .unwrap_err()
                .is_closed()
        );
    }
}
