//! Shared listener for `org.freedesktop.DBus.ObjectManager` signals.
//!
//! BlueZ announces devices and the interfaces they gain or lose through the
//! object manager at `/`. A process needs only one subscription for that, so
//! the [`ObjectManager`] lives in an [`ObjectManagerRegistry`] and every
//! proxy that cares registers a listener with it.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::{
    error::Result,
    hub::{EventStream, SignalHandler, SignalHub},
    transport::{
        DbusTransport, Signal, SignalBody, SignalFilter, Transport,
        OBJECT_MANAGER_INTERFACE,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectManagerEvent {
    InterfacesAdded {
        object: OwnedObjectPath,
        interfaces: Vec<String>,
    },
    InterfacesRemoved {
        object: OwnedObjectPath,
        interfaces: Vec<String>,
    },
}

impl ObjectManagerEvent {
    pub fn object(&self) -> &OwnedObjectPath {
        match self {
            Self::InterfacesAdded { object, .. } | Self::InterfacesRemoved { object, .. } => {
                object
            }
        }
    }

    pub fn interfaces(&self) -> &[String] {
        match self {
            Self::InterfacesAdded { interfaces, .. }
            | Self::InterfacesRemoved { interfaces, .. } => interfaces,
        }
    }
}

struct ObjectManagerSignals;

impl SignalHandler for ObjectManagerSignals {
    type Event = ObjectManagerEvent;

    fn handle(&self, signal: Signal) -> Vec<ObjectManagerEvent> {
        if signal.interface != OBJECT_MANAGER_INTERFACE {
            debug!(interface = %signal.interface, "discarding foreign signal");
            return Vec::new();
        }

        let event = match signal.body {
            SignalBody::InterfacesAdded { object, interfaces } => {
                ObjectManagerEvent::InterfacesAdded { object, interfaces }
            }
            SignalBody::InterfacesRemoved { object, interfaces } => {
                ObjectManagerEvent::InterfacesRemoved { object, interfaces }
            }
            SignalBody::PropertiesChanged { .. } => return Vec::new(),
        };

        vec![event]
    }
}

/// One object-manager subscription shared by any number of listeners.
pub struct ObjectManager<T: Transport> {
    transport: Arc<T>,
    hub: SignalHub<ObjectManagerSignals>,
}

impl<T: Transport> ObjectManager<T> {
    fn new(transport: Arc<T>) -> Self {
        let path = OwnedObjectPath::from(ObjectPath::from_static_str_unchecked("/"));

        Self {
            transport,
            hub: SignalHub::new(ObjectManagerSignals, SignalFilter::ObjectManager { path }),
        }
    }

    /// Adds a listener, subscribing with the transport on the first one.
    pub async fn register(&self) -> Result<EventStream<ObjectManagerEvent>> {
        self.hub.subscribe(&*self.transport).await
    }

    pub async fn unregister(&self, stream: EventStream<ObjectManagerEvent>) {
        self.hub.unsubscribe(stream).await
    }

    pub(crate) async fn unregister_id(&self, id: u64) {
        self.hub.unsubscribe_id(id).await
    }

    pub async fn is_running(&self) -> bool {
        self.hub.is_running().await
    }

    /// Stops the loop. Every registered stream ends.
    pub async fn shutdown(&self) {
        self.hub.stop().await
    }
}

/// Holds the process' [`ObjectManager`], created on first use.
pub struct ObjectManagerRegistry<T: Transport> {
    manager: Mutex<Option<Arc<ObjectManager<T>>>>,
}

impl<T: Transport> Default for ObjectManagerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ObjectManagerRegistry<T> {
    pub const fn new() -> Self {
        Self {
            manager: Mutex::new(None),
        }
    }

    /// Returns the shared manager. The transport is only used when there is
    /// none yet, later callers get the existing one.
    pub fn get_or_init(&self, transport: &Arc<T>) -> Arc<ObjectManager<T>> {
        let mut slot = self.manager.lock().unwrap_or_else(PoisonError::into_inner);
        let manager =
            slot.get_or_insert_with(|| Arc::new(ObjectManager::new(Arc::clone(transport))));

        Arc::clone(manager)
    }

    /// Stops the shared manager and empties the registry.
    pub async fn shutdown(&self) {
        let manager = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(manager) = manager {
            manager.shutdown().await;
            debug!("object manager shut down");
        }
    }
}

impl ObjectManagerRegistry<DbusTransport> {
    /// The process-wide registry.
    pub fn global() -> &'static Self {
        static GLOBAL: ObjectManagerRegistry<DbusTransport> = ObjectManagerRegistry::new();
        &GLOBAL
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::transport::fake::{interfaces_added, properties_changed, FakeTransport};

    const DEVICE: &str = "/org/bluez/hci0/dev_00_11_22_33_44_55";

    #[test(tokio::test)]
    async fn registry_hands_out_one_manager() {
        let transport = Arc::new(FakeTransport::default());
        let registry = ObjectManagerRegistry::new();

        let first = registry.get_or_init(&transport);
        let second = registry.get_or_init(&transport);
        let mut a = first.register().await.unwrap();
        let mut b = second.register().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.subscribe_count(), 1);

        transport.emit(|| interfaces_added(DEVICE, &["org.bluez.Thermometer1"]));
        let expected = ObjectManagerEvent::InterfacesAdded {
            object: OwnedObjectPath::try_from(DEVICE).unwrap(),
            interfaces: vec!["org.bluez.Thermometer1".to_owned()],
        };
        assert_eq!(a.recv().await, Some(expected.clone()));
        assert_eq!(b.recv().await, Some(expected));

        registry.shutdown().await;
    }

    #[test(tokio::test)]
    async fn shutdown_closes_listeners_and_resets_registry() {
        let transport = Arc::new(FakeTransport::default());
        let registry = ObjectManagerRegistry::new();
        let manager = registry.get_or_init(&transport);
        let mut stream = manager.register().await.unwrap();

        registry.shutdown().await;

        assert_eq!(stream.recv().await, None);
        assert!(!manager.is_running().await);
        assert_eq!(transport.active_subscriptions(), 0);

        let fresh = registry.get_or_init(&transport);
        assert!(!Arc::ptr_eq(&manager, &fresh));
        let _stream = fresh.register().await.unwrap();
        assert_eq!(transport.subscribe_count(), 2);

        registry.shutdown().await;
    }

    #[test(tokio::test)]
    async fn property_signals_are_ignored() {
        let transport = Arc::new(FakeTransport::default());
        let registry = ObjectManagerRegistry::new();
        let manager = registry.get_or_init(&transport);
        let mut stream = manager.register().await.unwrap();

        transport.emit(|| properties_changed(DEVICE, "org.bluez.Thermometer1", &[], &[]));
        registry.shutdown().await;

        assert_eq!(stream.recv().await, None);
    }

    #[test(tokio::test)]
    async fn unregistering_last_listener_stops_subscription() {
        let transport = Arc::new(FakeTransport::default());
        let registry = ObjectManagerRegistry::new();
        let manager = registry.get_or_init(&transport);
        let first = manager.register().await.unwrap();
        let mut second = manager.register().await.unwrap();

        manager.unregister(first).await;
        assert!(manager.is_running().await);

        transport.emit(|| interfaces_added(DEVICE, &["org.bluez.Device1"]));
        let event = second.recv().await.unwrap();
        assert_eq!(event.object().as_str(), DEVICE);
        assert_eq!(event.interfaces(), ["org.bluez.Device1"]);

        manager.unregister_id(second.id()).await;
        assert!(!manager.is_running().await);
        assert_eq!(second.recv().await, None);
        assert_eq!(transport.active_subscriptions(), 0);
    }
}
