//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! ## Guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO.
//! - A panic inside one subscriber is caught and logged; its worker keeps running.
//! - When built with a bus, drops and panics are published back as
//!   [`SubscriberOverflow`](crate::EventKind::SubscriberOverflow) /
//!   [`SubscriberPanicked`](crate::EventKind::SubscriberPanicked).
//!   Dropping one of those internal events is only logged.
//!
//! ## Non-guarantees
//! - No ordering across subscribers.
//! - No retries on overflow (the event is dropped for that subscriber).

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, warn};

use crate::events::{Bus, Event};

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Option<Bus>,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker per subscriber.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self::spawn(subs, None)
    }

    /// Like [`new`](Self::new), reporting drops and panics on `bus`.
    #[must_use]
    pub fn with_reporting(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        Self::spawn(subs, Some(bus))
    }

    fn spawn(subs: Vec<Arc<dyn Subscribe>>, bus: Option<Bus>) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let report = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await else {
                        continue;
                    };
                    let info = panic_message(&*panic);
                    error!(subscriber = name, info = %info, seq = ev.seq, "subscriber panicked");
                    if let Some(bus) = report.as_ref().filter(|_| !ev.is_internal()) {
                        bus.publish(Event::subscriber_panicked(name, info));
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fans one event out to all subscribers without waiting.
    pub fn emit(&self, event: &Event) {
        let ev = Arc::new(event.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker closed",
            };
            warn!(subscriber = channel.name, seq = ev.seq, reason, "subscriber dropped event");
            if let Some(bus) = self.bus.as_ref().filter(|_| !ev.is_internal()) {
                bus.publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Closes all queues and waits for workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
