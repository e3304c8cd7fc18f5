//! The generic proxy every BlueZ binding is built on.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use zbus::zvariant::{DynamicType, OwnedValue, Value};

use crate::{
    error::{Error, Result},
    handle::RemoteObjectHandle,
    hub::{EventStream, SignalHub},
    object_manager::{ObjectManager, ObjectManagerEvent, ObjectManagerRegistry},
    properties::{PropertySchema, PropertyStore},
    transport::{DbusTransport, SignalFilter, Transport},
    watcher::{ChangeEvent, PropertyWatcher},
};

/// A remote object speaking the interface described by `S`.
///
/// Properties are fetched once on construction and then served from a local
/// [`PropertyStore`]. [`Proxy::watch_properties`] keeps that store in sync
/// with `PropertiesChanged` signals.
pub struct Proxy<S: PropertySchema, T: Transport = DbusTransport> {
    handle: RemoteObjectHandle,
    transport: Mutex<Option<Arc<T>>>,
    store: Arc<PropertyStore<S>>,
    watcher: SignalHub<PropertyWatcher<S>>,
    object_manager: tokio::sync::Mutex<Vec<(Arc<ObjectManager<T>>, u64)>>,
}

impl<S: PropertySchema, T: Transport> Proxy<S, T> {
    /// Creates a proxy for the object at `path` owned by `service`.
    pub async fn new(transport: Arc<T>, service: &str, path: &str) -> Result<Self> {
        let handle = RemoteObjectHandle::new(service, path, S::INTERFACE)?;
        Self::from_handle(transport, handle).await
    }

    /// Creates a proxy and loads its properties. Fails if the load does.
    pub async fn from_handle(transport: Arc<T>, handle: RemoteObjectHandle) -> Result<Self> {
        if handle.interface().as_str() != S::INTERFACE {
            return Err(Error::InvalidHandle(format!(
                "{handle} does not speak {}",
                S::INTERFACE
            )));
        }

        let store = Arc::new(PropertyStore::default());
        store.load(&*transport, &handle).await?;
        let watcher = SignalHub::new(
            PropertyWatcher::new(handle.path().clone(), Arc::clone(&store)),
            SignalFilter::PropertiesChanged {
                path: handle.path().clone(),
            },
        );

        Ok(Self {
            handle,
            transport: Mutex::new(Some(transport)),
            store,
            watcher,
            object_manager: tokio::sync::Mutex::default(),
        })
    }

    pub fn handle(&self) -> &RemoteObjectHandle {
        &self.handle
    }

    fn transport(&self) -> Result<Arc<T>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        Ok(())
    }

    /// Refetches every property from the remote object.
    pub async fn load(&self) -> Result<()> {
        let transport = self.transport()?;
        self.store.load(&*transport, &self.handle).await
    }

    /// A copy of the cached properties.
    pub fn properties(&self) -> Result<S> {
        self.ensure_open()?;
        Ok(self.store.snapshot())
    }

    /// Runs `f` on the cached properties under the read lock.
    pub fn read<K>(&self, f: impl FnOnce(&S) -> K) -> Result<K> {
        self.ensure_open()?;
        Ok(self.store.read(f))
    }

    /// The cached value of property `name`.
    pub fn property(&self, name: &str) -> Result<OwnedValue> {
        self.ensure_open()?;
        self.store.get(name)
    }

    pub fn property_as<K>(&self, name: &str) -> Result<K>
    where
        K: TryFrom<OwnedValue, Error = zbus::zvariant::Error>,
    {
        self.ensure_open()?;
        self.store.get_as(name)
    }

    pub fn store(&self) -> &Arc<PropertyStore<S>> {
        &self.store
    }

    /// Reads property `name` from the remote object, bypassing the cache.
    pub async fn get_property(&self, name: &str) -> Result<OwnedValue> {
        let transport = self.transport()?;
        transport.get(&self.handle, name).await
    }

    /// Writes property `name` on the remote object. The cache picks the new
    /// value up from the change signal.
    pub async fn set_property(&self, name: &str, value: &Value<'_>) -> Result<()> {
        let transport = self.transport()?;
        transport.set(&self.handle, name, value).await
    }

    /// Calls `method` on the remote object.
    pub async fn call<B>(&self, method: &str, body: &B) -> Result<()>
    where
        B: serde::Serialize + DynamicType + Sync,
    {
        let transport = self.transport()?;
        transport.call(&self.handle, method, body).await
    }

    /// Returns a stream of property changes. The first stream starts the
    /// watcher, later ones share it.
    pub async fn watch_properties(&self) -> Result<EventStream<ChangeEvent>> {
        let transport = self.transport()?;
        let stream = self.watcher.subscribe(&*transport).await?;
        if self.is_closed() {
            // closed while subscribing
            self.watcher.stop().await;
            return Err(Error::Closed);
        }
        debug!(handle = %self.handle, listener = stream.id(), "watching properties");

        Ok(stream)
    }

    /// Ends `stream`. Ending the last one stops the watcher.
    pub async fn unwatch_properties(&self, stream: EventStream<ChangeEvent>) {
        self.watcher.unsubscribe(stream).await
    }

    /// Stops the watcher and ends every stream it handed out.
    pub async fn stop_watching(&self) {
        self.watcher.stop().await
    }

    pub async fn is_watching(&self) -> bool {
        self.watcher.is_running().await
    }

    /// Registers with the object manager held by `registry`. The stream is
    /// unregistered again when the proxy closes.
    pub async fn object_manager_signals(
        &self,
        registry: &ObjectManagerRegistry<T>,
    ) -> Result<EventStream<ObjectManagerEvent>> {
        let transport = self.transport()?;
        let manager = registry.get_or_init(&transport);
        let stream = manager.register().await?;
        self.object_manager
            .lock()
            .await
            .push((manager, stream.id()));

        Ok(stream)
    }

    pub async fn unregister_object_manager_signals(
        &self,
        stream: EventStream<ObjectManagerEvent>,
    ) {
        let registration = {
            let mut registrations = self.object_manager.lock().await;
            registrations
                .iter()
                .position(|(_, id)| *id == stream.id())
                .map(|index| registrations.swap_remove(index))
        };
        if let Some((manager, _)) = registration {
            manager.unregister(stream).await;
        }
    }

    /// Stops the watcher, drops object manager registrations made through
    /// this proxy and releases the transport. Calling it again does nothing.
    pub async fn close(&self) {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if transport.is_none() {
            return;
        }

        self.watcher.stop().await;
        let registrations = std::mem::take(&mut *self.object_manager.lock().await);
        for (manager, id) in registrations {
            manager.unregister_id(id).await;
        }
        debug!(handle = %self.handle, "proxy closed");
    }
}
