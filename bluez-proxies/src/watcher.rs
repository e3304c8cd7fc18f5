//! Turns `PropertiesChanged` signals into store updates and [`ChangeEvent`]s.

use std::sync::Arc;

use tracing::debug;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue};

use crate::{
    error::{Error, Result},
    hub::SignalHandler,
    properties::{PropertySchema, PropertyStore},
    transport::{Signal, SignalBody, PROPERTIES_CHANGED, PROPERTIES_INTERFACE},
};

/// One property that changed on the remote object and has been stored
/// locally.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub interface: String,
    pub name: String,
    pub value: Arc<OwnedValue>,
}

impl ChangeEvent {
    pub fn value_as<T>(&self) -> Result<T>
    where
        T: TryFrom<OwnedValue, Error = zvariant::Error>,
    {
        self.value
            .try_clone()
            .and_then(T::try_from)
            .map_err(|e| Error::conversion(&self.name, e))
    }
}

pub(crate) struct PropertyWatcher<S> {
    path: OwnedObjectPath,
    store: Arc<PropertyStore<S>>,
}

impl<S: PropertySchema> PropertyWatcher<S> {
    pub(crate) fn new(path: OwnedObjectPath, store: Arc<PropertyStore<S>>) -> Self {
        Self { path, store }
    }
}

impl<S: PropertySchema> SignalHandler for PropertyWatcher<S> {
    type Event = ChangeEvent;

    fn handle(&self, signal: Signal) -> Vec<ChangeEvent> {
        if signal.path != self.path
            || signal.interface != PROPERTIES_INTERFACE
            || signal.member != PROPERTIES_CHANGED
        {
            debug!(
                path = %signal.path.as_str(),
                member = %signal.member,
                "discarding foreign signal"
            );
            return Vec::new();
        }
        let SignalBody::PropertiesChanged {
            interface,
            changed,
            invalidated,
        } = signal.body
        else {
            debug!(path = %signal.path.as_str(), "discarding signal with unexpected body");
            return Vec::new();
        };
        if interface != S::INTERFACE {
            debug!(%interface, "discarding changes of another interface");
            return Vec::new();
        }

        self.store
            .apply_changes(changed, &invalidated)
            .into_iter()
            .map(|(name, value)| ChangeEvent {
                interface: interface.clone(),
                name,
                value: Arc::new(value),
            })
            .collect()
    }
}
