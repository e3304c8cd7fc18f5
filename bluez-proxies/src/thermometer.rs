//! Bindings for BlueZ's Health Thermometer interfaces.

use std::sync::Arc;

use zbus::zvariant::{ObjectPath, Value};

use crate::{
    address::{adapter_path, device_path, Address, SERVICE},
    error::Result,
    properties,
    proxy::Proxy,
    transport::{DbusTransport, Transport},
};

pub const MANAGER_INTERFACE: &str = "org.bluez.ThermometerManager1";
pub const THERMOMETER_INTERFACE: &str = "org.bluez.Thermometer1";

properties! {
    /// `org.bluez.ThermometerManager1` has methods only.
    pub struct ThermometerManager1Properties for "org.bluez.ThermometerManager1" {}
}

properties! {
    pub struct Thermometer1Properties for "org.bluez.Thermometer1" {
        /// Whether the device can send intermediate measurements.
        "Intermediate" => intermediate: bool,
        /// Seconds between measurements, writable.
        "Interval" => interval: u16,
        "Maximum" => maximum: u16,
        "Minimum" => minimum: u16,
    }
}

/// `org.bluez.ThermometerManager1` of one adapter.
#[derive(derive_more::Deref, derive_more::From)]
pub struct ThermometerManager1<T: Transport = DbusTransport>(
    Proxy<ThermometerManager1Properties, T>,
);

impl<T: Transport> ThermometerManager1<T> {
    pub async fn new(transport: Arc<T>, adapter_id: &str) -> Result<Self> {
        Proxy::new(transport, SERVICE, &adapter_path(adapter_id))
            .await
            .map(Self)
    }

    /// Registers the agent at `agent` to receive measurements. BlueZ replies
    /// `org.bluez.Error.InvalidArguments` for a bad path.
    pub async fn register_watcher(&self, agent: &ObjectPath<'_>) -> Result<()> {
        self.call("RegisterWatcher", &(agent,)).await
    }

    /// BlueZ replies `org.bluez.Error.NotFound` if `agent` was not registered.
    pub async fn unregister_watcher(&self, agent: &ObjectPath<'_>) -> Result<()> {
        self.call("UnregisterWatcher", &(agent,)).await
    }

    pub async fn enable_intermediate_measurement(
        &self,
        agent: &ObjectPath<'_>,
    ) -> Result<()> {
        self.call("EnableIntermediateMeasurement", &(agent,)).await
    }

    pub async fn disable_intermediate_measurement(
        &self,
        agent: &ObjectPath<'_>,
    ) -> Result<()> {
        self.call("DisableIntermediateMeasurement", &(agent,)).await
    }
}

/// `org.bluez.Thermometer1` of one device.
#[derive(derive_more::Deref, derive_more::From)]
pub struct Thermometer1<T: Transport = DbusTransport>(Proxy<Thermometer1Properties, T>);

impl<T: Transport> Thermometer1<T> {
    pub async fn new(transport: Arc<T>, adapter_id: &str, address: &Address) -> Result<Self> {
        Proxy::new(transport, SERVICE, &device_path(adapter_id, address))
            .await
            .map(Self)
    }

    pub fn intermediate(&self) -> Result<bool> {
        self.read(|props| props.intermediate)
    }

    pub fn interval(&self) -> Result<u16> {
        self.read(|props| props.interval)
    }

    pub fn maximum(&self) -> Result<u16> {
        self.read(|props| props.maximum)
    }

    pub fn minimum(&self) -> Result<u16> {
        self.read(|props| props.minimum)
    }

    /// Writes `Interval` on the device. The cached value follows once the
    /// device confirms with a change signal.
    pub async fn set_interval(&self, interval: u16) -> Result<()> {
        self.set_property("Interval", &Value::from(interval)).await
    }
}
