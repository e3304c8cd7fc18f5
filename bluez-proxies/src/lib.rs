//! Async proxies for BlueZ's D-Bus API.
//!
//! Every proxy keeps a local copy of the remote object's properties, loaded on
//! construction and optionally kept in sync with `PropertiesChanged` signals:
//!
//! ```no_run
//! # async fn example() -> bluez_proxies::Result<()> {
//! use std::sync::Arc;
//!
//! use bluez_proxies::{thermometer::Thermometer1, BusAddress, DbusTransport};
//!
//! let transport = Arc::new(DbusTransport::connect(&BusAddress::System).await?);
//! let address = "00:11:22:33:44:55".parse().expect("valid address");
//! let thermometer = Thermometer1::new(transport, "hci0", &address).await?;
//! println!("interval: {}s", thermometer.interval()?);
//!
//! let mut events = thermometer.watch_properties().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{} changed to {:?}", event.name, event.value);
//! }
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub mod address;
mod error;
mod handle;
pub mod hub;
pub mod object_manager;
pub mod properties;
mod proxy;
pub mod thermometer;
pub mod transport;
mod watcher;

pub use zbus::zvariant;

pub use crate::{
    address::Address,
    error::{Error, Result},
    handle::RemoteObjectHandle,
    hub::EventStream,
    object_manager::{ObjectManager, ObjectManagerEvent, ObjectManagerRegistry},
    properties::{PropertySchema, PropertyStore},
    proxy::Proxy,
    transport::{BusAddress, DbusTransport, Transport},
    watcher::ChangeEvent,
};
