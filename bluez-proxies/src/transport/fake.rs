//! In-memory [`Transport`] used by the unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use zbus::zvariant::{DynamicType, ObjectPath, OwnedObjectPath, OwnedValue, Value};

use super::{
    Signal, SignalBody, SignalFilter, SignalSink, Subscription, Transport,
    INTERFACES_ADDED, OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED,
    PROPERTIES_INTERFACE,
};
use crate::{error::Result, handle::RemoteObjectHandle};

#[derive(Debug, Default)]
pub struct FakeTransport {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    properties: HashMap<String, OwnedValue>,
    fail_get_all: bool,
    fail_calls: Option<zbus::fdo::Error>,
    calls: Vec<(String, String)>,
    writes: Vec<(String, OwnedValue)>,
    sinks: Vec<(SignalFilter, SignalSink)>,
    subscribe_count: usize,
}

impl FakeTransport {
    pub fn with_properties<const N: usize>(
        props: [(&str, Value<'static>); N],
    ) -> Arc<Self> {
        let transport = Self::default();
        transport.state.lock().unwrap().properties = props
            .into_iter()
            .map(|(name, value)| (name.to_owned(), OwnedValue::try_from(value).unwrap()))
            .collect();

        Arc::new(transport)
    }

    pub fn set_remote(&self, name: &str, value: Value<'static>) {
        self.state
            .lock()
            .unwrap()
            .properties
            .insert(name.to_owned(), OwnedValue::try_from(value).unwrap());
    }

    pub fn fail_get_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_get_all = fail;
    }

    pub fn fail_calls(&self, err: zbus::fdo::Error) {
        self.state.lock().unwrap().fail_calls = Some(err);
    }

    /// `(method, body signature)` of every method call seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<(String, OwnedValue)> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(name, value)| (name.clone(), value.try_clone().unwrap()))
            .collect()
    }

    /// Number of transport subscriptions whose producer is still alive.
    pub fn active_subscriptions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .sinks
            .iter()
            .filter(|(_, sink)| !sink.is_cancelled())
            .count()
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().subscribe_count
    }

    /// Delivers `signal` to every live subscription, like a bus that
    /// multiplexes all objects onto one connection would.
    pub fn emit(&self, signal: impl Fn() -> Signal) {
        let state = self.state.lock().unwrap();
        for (_, sink) in state.sinks.iter().filter(|(_, s)| !s.is_cancelled()) {
            sink.send(signal());
        }
    }

    pub fn emit_properties_changed<const N: usize>(
        &self,
        path: &str,
        interface: &str,
        changed: [(&str, Value<'static>); N],
        invalidated: &[&str],
    ) {
        self.emit(|| properties_changed(path, interface, &changed, invalidated));
    }
}

pub fn properties_changed(
    path: &str,
    interface: &str,
    changed: &[(&str, Value<'static>)],
    invalidated: &[&str],
) -> Signal {
    Signal {
        path: ObjectPath::try_from(path).unwrap().into(),
        interface: PROPERTIES_INTERFACE.to_owned(),
        member: PROPERTIES_CHANGED.to_owned(),
        body: SignalBody::PropertiesChanged {
            interface: interface.to_owned(),
            changed: changed
                .iter()
                .map(|(name, value)| ((*name).to_owned(), value.try_to_owned().unwrap()))
                .collect(),
            invalidated: invalidated.iter().map(|name| (*name).to_owned()).collect(),
        },
    }
}

pub fn interfaces_added(object: &str, interfaces: &[&str]) -> Signal {
    Signal {
        path: ObjectPath::try_from("/").unwrap().into(),
        interface: OBJECT_MANAGER_INTERFACE.to_owned(),
        member: INTERFACES_ADDED.to_owned(),
        body: SignalBody::InterfacesAdded {
            object: OwnedObjectPath::try_from(object).unwrap(),
            interfaces: interfaces.iter().map(|i| (*i).to_owned()).collect(),
        },
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn call<B>(
        &self,
        _handle: &RemoteObjectHandle,
        method: &str,
        body: &B,
    ) -> Result<()>
    where
        B: serde::Serialize + DynamicType + Sync,
    {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((method.to_owned(), body.dynamic_signature().to_string()));
        match state.fail_calls.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn get_all(
        &self,
        _handle: &RemoteObjectHandle,
    ) -> Result<HashMap<String, OwnedValue>> {
        let state = self.state.lock().unwrap();
        if state.fail_get_all {
            return Err(zbus::fdo::Error::ServiceUnknown("org.bluez".into()).into());
        }

        Ok(state
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value.try_clone().unwrap()))
            .collect())
    }

    async fn get(&self, _handle: &RemoteObjectHandle, name: &str) -> Result<OwnedValue> {
        let state = self.state.lock().unwrap();
        match state.properties.get(name) {
            Some(value) => Ok(value.try_clone().unwrap()),
            None => Err(zbus::fdo::Error::InvalidArgs(format!("no property {name}")).into()),
        }
    }

    async fn set(
        &self,
        _handle: &RemoteObjectHandle,
        name: &str,
        value: &Value<'_>,
    ) -> Result<()> {
        let value = value.try_to_owned().unwrap();
        let mut state = self.state.lock().unwrap();
        state.writes.push((name.to_owned(), value.try_clone().unwrap()));
        state.properties.insert(name.to_owned(), value);

        Ok(())
    }

    async fn subscribe(&self, filter: SignalFilter) -> Result<Subscription> {
        let (subscription, sink) = Subscription::channel();
        let mut state = self.state.lock().unwrap();
        state.subscribe_count += 1;
        state.sinks.push((filter, sink));

        Ok(subscription)
    }
}
