//! Fan-out of events to several independently queued sinks

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SinkError;
use crate::event::Event;
use crate::queue::EventQueue;
use crate::sink::{BoxSink, Sink};

/// Delivers every event to each of its member sinks.
///
/// Each member sits behind its own [`EventQueue`], so a slow or unreachable
/// destination never holds up the others, and each destination sees events
/// in the order they were written here.
#[derive(Debug)]
pub struct Broadcaster<S = BoxSink> {
    queues: Vec<EventQueue<S>>,
    closed: AtomicBool,
}

impl<S> Broadcaster<S>
where
    S: Sink + 'static,
{
    /// Broadcast to `sinks`, wrapping each in an unbounded queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<I>(sinks: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        Self::from_queues(sinks.into_iter().map(EventQueue::new))
    }
}

impl<S> Broadcaster<S> {
    /// Broadcast to already configured queues
    pub fn from_queues<I>(queues: I) -> Self
    where
        I: IntoIterator<Item = EventQueue<S>>,
    {
        Self {
            queues: queues.into_iter().collect(),
            closed: AtomicBool::new(false),
        }
    }

    /// The member queues, in the order they were given
    pub fn queues(&self) -> &[EventQueue<S>] {
        &self.queues
    }
}

#[async_trait::async_trait]
impl<S> Sink for Broadcaster<S>
where
    S: Sink,
{
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        let mut first = None;
        for queue in &self.queues {
            if let Err(error) = queue.write(event).await {
                tracing::warn!(id = %event.id, %error, "error broadcasting event");
                first.get_or_insert(error);
            }
        }

        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(sinks = self.queues.len()))]
    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::AlreadyClosed("broadcaster"));
        }

        let results = futures::future::join_all(self.queues.iter().map(|queue| queue.close())).await;
        let errors: Vec<SinkError> = results.into_iter().filter_map(Result::err).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Multiple(errors))
        }
    }
}
