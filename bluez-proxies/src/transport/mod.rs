//! The IPC seam between proxies and the bus.
//!
//! Proxies never talk to zbus directly: everything goes through [`Transport`],
//! which [`DbusTransport`] implements for a real D-Bus connection.

mod dbus;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zbus::zvariant::{DynamicType, OwnedObjectPath, OwnedValue, Value};

use crate::{error::Result, handle::RemoteObjectHandle};

pub use self::dbus::{BusAddress, DbusTransport};

pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
pub const INTERFACES_ADDED: &str = "InterfacesAdded";
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Calls `method` on the remote object. Errors from the remote side come
    /// back untouched as [`crate::Error::Transport`].
    async fn call<B>(
        &self,
        handle: &RemoteObjectHandle,
        method: &str,
        body: &B,
    ) -> Result<()>
    where
        B: serde::Serialize + DynamicType + Sync;

    /// `org.freedesktop.DBus.Properties.GetAll` for the handle's interface.
    async fn get_all(
        &self,
        handle: &RemoteObjectHandle,
    ) -> Result<HashMap<String, OwnedValue>>;

    async fn get(&self, handle: &RemoteObjectHandle, name: &str) -> Result<OwnedValue>;

    async fn set(
        &self,
        handle: &RemoteObjectHandle,
        name: &str,
        value: &Value<'_>,
    ) -> Result<()>;

    /// Registers for the signals selected by `filter`. Signals keep flowing
    /// until the subscription is stopped.
    async fn subscribe(&self, filter: SignalFilter) -> Result<Subscription>;
}

/// Which signals a [`Subscription`] delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalFilter {
    /// `PropertiesChanged` emitted by the object at `path`.
    PropertiesChanged { path: OwnedObjectPath },
    /// `InterfacesAdded` and `InterfacesRemoved` from the object manager at
    /// `path`.
    ObjectManager { path: OwnedObjectPath },
}

/// A raw signal as delivered by the transport. The bus connection is shared by
/// every object, so the consumer has to check `path` and `interface` itself.
#[derive(Debug)]
pub struct Signal {
    pub path: OwnedObjectPath,
    pub interface: String,
    pub member: String,
    pub body: SignalBody,
}

#[derive(Debug)]
pub enum SignalBody {
    PropertiesChanged {
        interface: String,
        changed: HashMap<String, OwnedValue>,
        invalidated: Vec<String>,
    },
    InterfacesAdded {
        object: OwnedObjectPath,
        interfaces: Vec<String>,
    },
    InterfacesRemoved {
        object: OwnedObjectPath,
        interfaces: Vec<String>,
    },
}

/// What travels over a subscription channel.
#[derive(Debug)]
pub enum Notification {
    Signal(Signal),
    /// Ends the consumer loop. Sent in-band so that every signal queued before
    /// it is still processed.
    Stop,
}

/// Receiving end of a transport registration.
#[derive(Debug)]
pub struct Subscription {
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub stop: StopHandle,
}

/// Producer side handed to whatever pumps signals into a [`Subscription`].
#[derive(Debug, Clone)]
pub struct SignalSink {
    sender: mpsc::UnboundedSender<Notification>,
    cancel: CancellationToken,
}

/// Tears a [`Subscription`] down: queues [`Notification::Stop`] and cancels
/// the producer.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: mpsc::UnboundedSender<Notification>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn channel() -> (Self, SignalSink) {
        let (sender, notifications) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let subscription = Self {
            notifications,
            stop: StopHandle {
                sender: sender.clone(),
                cancel: cancel.clone(),
            },
        };

        (subscription, SignalSink { sender, cancel })
    }
}

impl SignalSink {
    /// Returns false once nobody listens anymore.
    pub fn send(&self, signal: Signal) -> bool {
        !self.cancel.is_cancelled()
            && self.sender.send(Notification::Signal(signal)).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl StopHandle {
    pub fn stop(&self) {
        // the consumer may already be gone, nothing left to stop then
        let _ = self.sender.send(Notification::Stop);
        self.cancel.cancel();
    }
}
