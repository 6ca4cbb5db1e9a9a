//! The sink capability shared by every pipeline stage

use std::fmt;
use std::sync::Arc;

use crate::error::SinkError;
use crate::event::Event;

/// A destination which accepts events and can be closed.
///
/// Every stage of the pipeline implements this trait, and stages compose by
/// wrapping one another. Implementations must be safe to `write` from many
/// tasks at once.
///
/// After a successful [`Sink::close`], `write` must fail with
/// [`SinkError::Closed`] without forwarding the event, and any later `close`
/// must return an error (and leave the sink as it is).
#[async_trait::async_trait]
pub trait Sink: fmt::Debug + Send + Sync {
    /// Deliver one event to this sink.
    async fn write(&self, event: &Event) -> Result<(), SinkError>;

    /// Close this sink, and any sink it wraps.
    async fn close(&self) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<S> Sink for Arc<S>
where
    S: Sink + ?Sized,
{
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        (**self).write(event).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        (**self).close().await
    }
}

#[async_trait::async_trait]
impl<S> Sink for Box<S>
where
    S: Sink + ?Sized,
{
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        (**self).write(event).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        (**self).close().await
    }
}

/// A shared, type-erased sink
pub type BoxSink = Box<dyn Sink>;
