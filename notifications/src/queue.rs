//! An in-memory FIFO decoupling producers from a slow sink
//!
//! Events accepted by an [`EventQueue`] live only in process memory. If the
//! process exits without closing the queue, or crashes, any event still
//! pending here (or being retried downstream) is lost. Delivery is
//! at-least-once only for as long as the process is alive.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::SinkError;
use crate::event::Event;
use crate::sink::Sink;

/// Observer of events moving through an [`EventQueue`]
pub trait QueueListener: fmt::Debug + Send + Sync {
    /// An event was accepted into the queue
    fn ingress(&self, event: &Event);

    /// An event was handed to the wrapped sink
    fn egress(&self, event: &Event);

    /// An accepted event was discarded without being delivered
    fn dropped(&self, event: &Event) {
        let _ = event;
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Event>,
    closed: bool,
}

#[derive(Debug)]
struct Shared<S> {
    sink: S,
    state: Mutex<QueueState>,
    notify: Notify,
    listener: Option<Arc<dyn QueueListener>>,
}

impl<S> Shared<S> {
    fn egress(&self, event: &Event) {
        if let Some(listener) = &self.listener {
            listener.egress(event);
        }
    }

    fn dropped(&self, event: &Event) {
        if let Some(listener) = &self.listener {
            listener.dropped(event);
        }
    }
}

/// Configures an [`EventQueue`] before its worker starts
#[derive(Debug, Default)]
pub struct EventQueueBuilder {
    listener: Option<Arc<dyn QueueListener>>,
    limit: Option<usize>,
    purge_timeout: Option<Duration>,
}

impl EventQueueBuilder {
    /// Create a builder for an unbounded queue without a listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify `listener` as events enter and leave the queue
    pub fn listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Bound the backlog; once full, the oldest pending event is dropped to
    /// admit a new one. A limit of 0 is treated as 1, so the newest event is
    /// always kept.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// Bound how long `close` waits for the backlog to drain
    pub fn purge_timeout(mut self, timeout: Duration) -> Self {
        self.purge_timeout = Some(timeout);
        self
    }

    /// Build the queue and start its worker. Must be called from within a
    /// Tokio runtime.
    pub fn build<S>(self, sink: S) -> EventQueue<S>
    where
        S: Sink + 'static,
    {
        let shared = Arc::new(Shared {
            sink,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            listener: self.listener,
        });

        let worker = tokio::spawn(run(Arc::clone(&shared)));

        EventQueue {
            shared,
            worker: Mutex::new(Some(worker)),
            limit: self.limit,
            purge_timeout: self.purge_timeout,
        }
    }
}

/// Accepts events immediately and delivers them to the wrapped sink, in
/// order, from a single background worker.
///
/// `write` never waits on the wrapped sink. `close` stops accepting events,
/// waits for the worker to deliver everything still pending, then closes the
/// wrapped sink.
#[derive(Debug)]
pub struct EventQueue<S> {
    shared: Arc<Shared<S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    limit: Option<usize>,
    purge_timeout: Option<Duration>,
}

impl<S> EventQueue<S>
where
    S: Sink + 'static,
{
    /// Wrap `sink` in an unbounded queue. Must be called from within a Tokio
    /// runtime.
    pub fn new(sink: S) -> Self {
        EventQueueBuilder::new().build(sink)
    }
}

impl<S> EventQueue<S> {
    /// Number of events accepted but not yet handed to the wrapped sink
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Access the wrapped sink
    pub fn inner(&self) -> &S {
        &self.shared.sink
    }
}

impl<S> Drop for EventQueue<S> {
    fn drop(&mut self) {
        // Dropped without `close`: pending events are lost with the worker.
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

async fn run<S>(shared: Arc<Shared<S>>)
where
    S: Sink,
{
    loop {
        let next = {
            let mut state = shared.state.lock();
            match state.pending.pop_front() {
                Some(event) => Some(event),
                None if state.closed => break,
                None => None,
            }
        };

        let Some(event) = next else {
            shared.notify.notified().await;
            continue;
        };

        match shared.sink.write(&event).await {
            // The wrapped sink was closed under a purge timeout; this event never left.
            Err(error) if error.is_closed() && shared.state.lock().closed => {
                tracing::warn!(id = %event.id, "event queue closed during delivery, dropping event");
                shared.dropped(&event);
                continue;
            }
            Err(error) => tracing::warn!(id = %event.id, %error, "error writing queued event"),
            Ok(()) => {}
        }
        shared.egress(&event);
    }

    tracing::trace!("event queue worker finished");
}

#[async_trait::async_trait]
impl<S> Sink for EventQueue<S>
where
    S: Sink,
{
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(SinkError::Closed);
            }

            let dropped = match self.limit {
                Some(limit) if state.pending.len() >= limit => state.pending.pop_front(),
                _ => None,
            };

            state.pending.push_back(event.clone());
            if let Some(listener) = &self.shared.listener {
                listener.ingress(event);
            }
            dropped
        };

        if let Some(dropped) = dropped {
            tracing::warn!(id = %dropped.id, "event queue full, dropping oldest event");
            self.shared.dropped(&dropped);
        }

        self.shared.notify.notify_one();
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn close(&self) -> Result<(), SinkError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(SinkError::AlreadyClosed("eventqueue"));
            }
            state.closed = true;
        }
        self.shared.notify.notify_one();

        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else {
            return self.shared.sink.close().await;
        };

        let drained = match self.purge_timeout {
            Some(timeout) => tokio::time::timeout(timeout, &mut worker).await.ok(),
            None => Some((&mut worker).await),
        };

        match drained {
            Some(Ok(())) => {}
            Some(Err(error)) => tracing::error!(%error, "event queue worker failed"),
            None => {
                let purged: Vec<Event> = self.shared.state.lock().pending.drain(..).collect();
                tracing::warn!(
                    purged = purged.len(),
                    timeout = ?self.purge_timeout,
                    "event queue did not drain in time, discarding pending events"
                );
                for event in &purged {
                    self.shared.dropped(event);
                }

                // Closing the wrapped sink aborts a delivery stuck in a retry loop.
                let closed = self.shared.sink.close().await;
                if let Err(error) = worker.await {
                    tracing::error!(%error, "event queue worker failed");
                }
                return closed;
            }
        }

        self.shared.sink.close().await
    }
}
