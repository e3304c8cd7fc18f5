//! Runs the thermometer proxies against a fake BlueZ on a private bus.

use std::{sync::Arc, time::Duration};

use bluez_proxies::{
    thermometer::{Thermometer1, ThermometerManager1},
    Address, BusAddress, DbusTransport, ObjectManagerEvent, ObjectManagerRegistry,
};
use color_eyre::Result;
use test_log::test;
use zbus::{
    fdo, interface,
    zvariant::{ObjectPath, OwnedObjectPath},
    Connection, ConnectionBuilder, DBusError,
};

const ADAPTER: &str = "/org/bluez/hci0";
const DEVICE: &str = "/org/bluez/hci0/dev_00_11_22_33_44_55";

#[derive(Debug, DBusError)]
#[zbus(prefix = "org.bluez.Error")]
enum BluezError {
    #[zbus(error)]
    ZBus(zbus::Error),
    InvalidArguments(String),
    NotFound(String),
}

#[derive(Debug, Default)]
struct FakeManager {
    watchers: Vec<OwnedObjectPath>,
    intermediate: Vec<OwnedObjectPath>,
}

#[interface(name = "org.bluez.ThermometerManager1")]
impl FakeManager {
    async fn register_watcher(&mut self, agent: ObjectPath<'_>) -> Result<(), BluezError> {
        if !agent.as_str().starts_with("/org/example/") {
            return Err(BluezError::InvalidArguments(format!("bad agent {agent}")));
        }
        self.watchers.push(agent.into());

        Ok(())
    }

    async fn unregister_watcher(&mut self, agent: ObjectPath<'_>) -> Result<(), BluezError> {
        let before = self.watchers.len();
        self.watchers.retain(|w| w.as_str() != agent.as_str());
        if self.watchers.len() == before {
            return Err(BluezError::NotFound(format!("no watcher {agent}")));
        }

        Ok(())
    }

    async fn enable_intermediate_measurement(
        &mut self,
        agent: ObjectPath<'_>,
    ) -> Result<(), BluezError> {
        self.intermediate.push(agent.into());
        Ok(())
    }

    async fn disable_intermediate_measurement(
        &mut self,
        agent: ObjectPath<'_>,
    ) -> Result<(), BluezError> {
        let before = self.intermediate.len();
        self.intermediate.retain(|a| a.as_str() != agent.as_str());
        if self.intermediate.len() == before {
            return Err(BluezError::NotFound(format!("{agent} not enabled")));
        }

        Ok(())
    }
}

#[derive(Debug)]
struct FakeThermometer {
    interval: u16,
}

#[interface(name = "org.bluez.Thermometer1")]
impl FakeThermometer {
    #[zbus(property)]
    fn intermediate(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn interval(&self) -> u16 {
        self.interval
    }

    #[zbus(property)]
    fn set_interval(&mut self, interval: u16) -> fdo::Result<()> {
        if interval == 0 {
            return Err(fdo::Error::InvalidArgs("interval must be positive".into()));
        }
        self.interval = interval;

        Ok(())
    }

    #[zbus(property)]
    fn maximum(&self) -> u16 {
        3600
    }

    #[zbus(property)]
    fn minimum(&self) -> u16 {
        1
    }
}

// using `dbus_launch` gives every test its own isolated bus
async fn start_dbus_daemon() -> dbus_launch::Daemon {
    tokio::task::spawn_blocking(|| {
        dbus_launch::Launcher::daemon()
            .launch()
            .expect("failed to launch dbus-daemon")
    })
    .await
    .expect("task panicked")
}

async fn setup_fake_bluez() -> Result<(Connection, dbus_launch::Daemon, Arc<DbusTransport>)> {
    let daemon = start_dbus_daemon().await;
    let server = ConnectionBuilder::address(daemon.address())?
        .name("org.bluez")?
        .serve_at("/", fdo::ObjectManager)?
        .serve_at(ADAPTER, FakeManager::default())?
        .serve_at(DEVICE, FakeThermometer { interval: 1000 })?
        .build()
        .await?;
    let address = BusAddress::Address(daemon.address().to_owned());
    let transport = DbusTransport::connect(&address).await?;

    Ok((server, daemon, Arc::new(transport)))
}

fn address() -> Address {
    "00:11:22:33:44:55".parse().expect("valid address")
}

#[test(tokio::test)]
#[ignore = "needs dbus-daemon"]
async fn thermometer_loads_and_watches_interval() -> Result<()> {
    let (_server, _daemon, transport) = setup_fake_bluez().await?;
    let thermometer = Thermometer1::new(transport, "hci0", &address()).await?;

    assert!(thermometer.intermediate()?);
    assert_eq!(thermometer.interval()?, 1000);
    assert_eq!(thermometer.maximum()?, 3600);
    assert_eq!(thermometer.minimum()?, 1);

    let mut events = thermometer.watch_properties().await?;
    thermometer.set_interval(2000).await?;

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await?
        .expect("watcher stopped early");
    assert_eq!(event.name, "Interval");
    assert_eq!(event.value_as::<u16>()?, 2000);
    assert_eq!(thermometer.interval()?, 2000);

    let err = thermometer.set_interval(0).await.unwrap_err();
    assert_eq!(
        err.remote_error_name().as_deref(),
        Some("org.freedesktop.DBus.Error.InvalidArgs")
    );

    thermometer.close().await;
    assert!(events.recv().await.is_none());

    Ok(())
}

#[test(tokio::test)]
#[ignore = "needs dbus-daemon"]
async fn manager_reports_bluez_errors() -> Result<()> {
    let (_server, _daemon, transport) = setup_fake_bluez().await?;
    let manager = ThermometerManager1::new(transport, "hci0").await?;
    let agent = ObjectPath::try_from("/org/example/agent")?;

    manager.register_watcher(&agent).await?;
    manager.enable_intermediate_measurement(&agent).await?;
    manager.disable_intermediate_measurement(&agent).await?;
    manager.unregister_watcher(&agent).await?;

    let err = manager
        .register_watcher(&ObjectPath::try_from("/elsewhere")?)
        .await
        .unwrap_err();
    assert_eq!(
        err.remote_error_name().as_deref(),
        Some("org.bluez.Error.InvalidArguments")
    );

    let err = manager.unregister_watcher(&agent).await.unwrap_err();
    assert_eq!(
        err.remote_error_name().as_deref(),
        Some("org.bluez.Error.NotFound")
    );

    Ok(())
}

#[test(tokio::test)]
#[ignore = "needs dbus-daemon"]
async fn object_manager_announces_new_devices() -> Result<()> {
    let (server, _daemon, transport) = setup_fake_bluez().await?;
    let registry = ObjectManagerRegistry::new();
    let manager = ThermometerManager1::new(Arc::clone(&transport), "hci0").await?;
    let mut added = manager.object_manager_signals(&registry).await?;

    let path = "/org/bluez/hci0/dev_66_77_88_99_AA_BB";
    server
        .object_server()
        .at(path, FakeThermometer { interval: 30 })
        .await?;

    let event = tokio::time::timeout(Duration::from_secs(5), added.recv())
        .await?
        .expect("object manager stopped early");
    assert!(matches!(event, ObjectManagerEvent::InterfacesAdded { .. }));
    assert_eq!(event.object().as_str(), path);
    assert!(
        event
            .interfaces()
            .iter()
            .any(|iface| iface == "org.bluez.Thermometer1")
    );

    let second = Thermometer1::new(transport, "hci0", &"66:77:88:99:AA:BB".parse()?).await?;
    assert_eq!(second.interval()?, 30);

    manager.close().await;
    assert!(added.recv().await.is_none());
    registry.shutdown().await;

    Ok(())
}
