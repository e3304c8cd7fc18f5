//! Fan-out of one transport subscription to many listeners.
//!
//! A [`SignalHub`] is idle until the first [`SignalHub::subscribe`]. That call
//! registers with the transport and spawns a single loop which turns raw
//! signals into events via a [`SignalHandler`] and hands a copy to every
//! listener. Later subscribers share the same registration. The loop ends when
//! [`Notification::Stop`] comes through the channel, after every signal queued
//! before it has been handled.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll},
};

use futures::Stream;
use tokio::{
    sync::mpsc::{self, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    error::Result,
    transport::{Notification, Signal, SignalFilter, StopHandle, Subscription, Transport},
};

/// Turns raw signals into the events a hub publishes.
pub trait SignalHandler: Send + Sync + 'static {
    type Event: Clone + Send + 'static;

    /// Returns no events for signals that don't concern this handler.
    fn handle(&self, signal: Signal) -> Vec<Self::Event>;
}

/// A listener's end of a hub. Yields `None` once the hub stopped or the
/// listener was removed.
#[derive(Debug)]
pub struct EventStream<E> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<E, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

type Outputs<E> = Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<E>)>>>;

fn lock<E>(
    outputs: &Outputs<E>,
) -> MutexGuard<'_, Vec<(u64, mpsc::UnboundedSender<E>)>> {
    outputs.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Active<E> {
    stop: StopHandle,
    outputs: Outputs<E>,
    task: JoinHandle<()>,
}

pub struct SignalHub<H: SignalHandler> {
    handler: Arc<H>,
    filter: SignalFilter,
    active: tokio::sync::Mutex<Option<Active<H::Event>>>,
    next_id: AtomicU64,
}

impl<H: SignalHandler> SignalHub<H> {
    pub fn new(handler: H, filter: SignalFilter) -> Self {
        Self {
            handler: Arc::new(handler),
            filter,
            active: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Adds a listener, registering with the transport if the hub is idle.
    pub async fn subscribe<T: Transport>(
        &self,
        transport: &T,
    ) -> Result<EventStream<H::Event>> {
        let mut slot = self.active.lock().await;
        let active = match slot.take() {
            Some(active) => active,
            None => self.start(transport).await?,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&active.outputs).push((id, sender));
        *slot = Some(active);

        Ok(EventStream { id, receiver })
    }

    async fn start<T: Transport>(&self, transport: &T) -> Result<Active<H::Event>> {
        let Subscription {
            notifications,
            stop,
        } = transport.subscribe(self.filter.clone()).await?;
        let outputs: Outputs<H::Event> = Arc::default();
        let task = tokio::spawn(run(
            Arc::clone(&self.handler),
            notifications,
            Arc::clone(&outputs),
        ));
        debug!(filter = ?self.filter, "watching signals");

        Ok(Active {
            stop,
            outputs,
            task,
        })
    }

    /// Removes one listener. Removing the last one stops the hub.
    pub async fn unsubscribe(&self, stream: EventStream<H::Event>) {
        self.unsubscribe_id(stream.id).await
    }

    pub async fn unsubscribe_id(&self, id: u64) {
        let mut slot = self.active.lock().await;
        let Some(active) = slot.as_ref() else {
            return;
        };

        // Listeners whose stream was dropped stay in `outputs` until the next
        // send, so they don't count here. The last live listener keeps its
        // sender for the loop to close after `Stop`.
        let idle = {
            let mut outputs = lock(&active.outputs);
            let others_alive = outputs
                .iter()
                .any(|(other, sender)| *other != id && !sender.is_closed());
            if others_alive {
                outputs.retain(|(other, sender)| *other != id && !sender.is_closed());
            }
            !others_alive
        };

        if idle {
            if let Some(active) = slot.take() {
                Self::shutdown(active, &self.filter).await;
            }
        }
    }

    /// Stops the loop and closes every listener. A no-op when idle.
    pub async fn stop(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            Self::shutdown(active, &self.filter).await;
        }
    }

    async fn shutdown(active: Active<H::Event>, filter: &SignalFilter) {
        active.stop.stop();
        if let Err(e) = active.task.await {
            warn!(?filter, "signal loop panicked: {e}");
        }
        debug!(?filter, "stopped watching signals");
    }
}

impl<H: SignalHandler> Drop for SignalHub<H> {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.stop.stop();
        }
    }
}

async fn run<H: SignalHandler>(
    handler: Arc<H>,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    outputs: Outputs<H::Event>,
) {
    while let Some(notification) = notifications.recv().await {
        let signal = match notification {
            Notification::Stop => break,
            Notification::Signal(signal) => signal,
        };

        let events = handler.handle(signal);
        if events.is_empty() {
            continue;
        }

        lock(&outputs).retain(|(id, sender)| {
            let alive = events.iter().all(|event| sender.send(event.clone()).is_ok());
            if !alive {
                debug!(listener = id, "listener went away");
            }
            alive
        });
    }

    // Dropping the senders closes every listener, after whatever they were
    // already sent.
    let closed = std::mem::take(&mut *lock(&outputs));
    debug!(listeners = closed.len(), "signal loop exited");
}
