use std::{collections::HashMap, convert::Infallible, str::FromStr};

use async_trait::async_trait;
use futures::StreamExt as _;
use tracing::{debug, warn};
use zbus::{
    fdo::PropertiesProxy,
    names::InterfaceName,
    zvariant::{DynamicType, OwnedObjectPath, OwnedValue, Value},
    CacheProperties, Connection, MatchRule, Message, MessageStream, MessageType,
};

use super::{
    Signal, SignalBody, SignalFilter, SignalSink, Subscription, Transport,
    INTERFACES_ADDED, INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE,
    PROPERTIES_CHANGED, PROPERTIES_INTERFACE,
};
use crate::{error::Result, handle::RemoteObjectHandle};

/// Which bus to connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BusAddress {
    /// The system bus, where BlueZ lives.
    #[default]
    System,
    Session,
    /// Any address D-Bus understands, e.g. `unix:path=/run/dbus/socket`.
    Address(String),
}

impl FromStr for BusAddress {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "system" => Self::System,
            "session" => Self::Session,
            address => Self::Address(address.to_owned()),
        })
    }
}

/// [`Transport`] over a zbus [`Connection`].
#[derive(Debug, Clone)]
pub struct DbusTransport {
    conn: Connection,
}

impl DbusTransport {
    pub async fn connect(address: &BusAddress) -> Result<Self> {
        let conn = match address {
            BusAddress::System => Connection::system().await?,
            BusAddress::Session => Connection::session().await?,
            BusAddress::Address(address) => {
                zbus::ConnectionBuilder::address(address.as_str())?
                    .build()
                    .await?
            }
        };

        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn properties<'a>(
        &self,
        handle: &'a RemoteObjectHandle,
    ) -> Result<PropertiesProxy<'a>> {
        let proxy = PropertiesProxy::builder(&self.conn)
            .destination(handle.service().as_str())?
            .path(handle.path().as_str())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;

        Ok(proxy)
    }
}

fn interface_name(handle: &RemoteObjectHandle) -> InterfaceName<'_> {
    InterfaceName::clone(handle.interface())
}

#[async_trait]
impl Transport for DbusTransport {
    async fn call<B>(
        &self,
        handle: &RemoteObjectHandle,
        method: &str,
        body: &B,
    ) -> Result<()>
    where
        B: serde::Serialize + DynamicType + Sync,
    {
        let proxy = zbus::Proxy::new(
            &self.conn,
            handle.service().as_str(),
            handle.path().as_str(),
            handle.interface().as_str(),
        )
        .await?;
        proxy.call_method(method, body).await?;

        Ok(())
    }

    async fn get_all(
        &self,
        handle: &RemoteObjectHandle,
    ) -> Result<HashMap<String, OwnedValue>> {
        let proxy = self.properties(handle).await?;
        let props = proxy.get_all(Some(interface_name(handle)).into()).await?;

        Ok(props)
    }

    async fn get(&self, handle: &RemoteObjectHandle, name: &str) -> Result<OwnedValue> {
        let proxy = self.properties(handle).await?;
        let value = proxy.get(interface_name(handle), name).await?;

        Ok(value)
    }

    async fn set(
        &self,
        handle: &RemoteObjectHandle,
        name: &str,
        value: &Value<'_>,
    ) -> Result<()> {
        let proxy = self.properties(handle).await?;
        proxy.set(interface_name(handle), name, value).await?;

        Ok(())
    }

    async fn subscribe(&self, filter: SignalFilter) -> Result<Subscription> {
        let rule = match &filter {
            SignalFilter::PropertiesChanged { path } => MatchRule::builder()
                .msg_type(MessageType::Signal)
                .path(path.as_str())?
                .interface(PROPERTIES_INTERFACE)?
                .member(PROPERTIES_CHANGED)?
                .build(),
            SignalFilter::ObjectManager { path } => MatchRule::builder()
                .msg_type(MessageType::Signal)
                .path(path.as_str())?
                .interface(OBJECT_MANAGER_INTERFACE)?
                .build(),
        };

        let stream = MessageStream::for_match_rule(rule, &self.conn, None).await?;
        let (subscription, sink) = Subscription::channel();
        debug!(?filter, "subscribed to signals");
        tokio::spawn(forward_signals(stream, sink));

        Ok(subscription)
    }
}

/// Pumps matching bus messages into the subscription until it is stopped or
/// the connection goes away.
async fn forward_signals(mut stream: MessageStream, sink: SignalSink) {
    loop {
        let message = tokio::select! {
            _ = sink.cancelled() => break,
            message = stream.next() => message,
        };
        let Some(message) = message else {
            debug!("signal stream ended");
            break;
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("error receiving message: {e:?}");
                continue;
            }
        };

        match decode_signal(&message) {
            Ok(Some(signal)) => {
                if !sink.send(signal) {
                    break;
                }
            }
            Ok(None) => (),
            Err(e) => warn!("failed to decode signal body: {e:?}"),
        }
    }
    debug!("signal forwarder exited");
}

fn decode_signal(message: &Message) -> zbus::Result<Option<Signal>> {
    let header = message.header();
    let (Some(path), Some(interface), Some(member)) =
        (header.path(), header.interface(), header.member())
    else {
        return Ok(None);
    };

    let body = message.body();
    let body = match (interface.as_str(), member.as_str()) {
        (PROPERTIES_INTERFACE, PROPERTIES_CHANGED) => {
            let (interface, changed, invalidated): (
                String,
                HashMap<String, OwnedValue>,
                Vec<String>,
            ) = body.deserialize()?;
            SignalBody::PropertiesChanged {
                interface,
                changed,
                invalidated,
            }
        }
        (OBJECT_MANAGER_INTERFACE, INTERFACES_ADDED) => {
            let (object, interfaces): (
                OwnedObjectPath,
                HashMap<String, HashMap<String, OwnedValue>>,
            ) = body.deserialize()?;
            SignalBody::InterfacesAdded {
                object,
                interfaces: interfaces.into_keys().collect(),
            }
        }
        (OBJECT_MANAGER_INTERFACE, INTERFACES_REMOVED) => {
            let (object, interfaces): (OwnedObjectPath, Vec<String>) =
                body.deserialize()?;
            SignalBody::InterfacesRemoved { object, interfaces }
        }
        _ => return Ok(None),
    };

    Ok(Some(Signal {
        path: path.clone().into(),
        interface: interface.to_string(),
        member: member.to_string(),
        body,
    }))
}
