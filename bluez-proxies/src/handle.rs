use std::fmt;

use zbus::{
    names::{BusName, InterfaceName, OwnedBusName, OwnedInterfaceName},
    zvariant::{ObjectPath, OwnedObjectPath},
};

use crate::error::{Error, Result};

/// Address of a remote object: the bus name that owns it, its object path and
/// the interface the proxy speaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteObjectHandle {
    service: OwnedBusName,
    path: OwnedObjectPath,
    interface: OwnedInterfaceName,
}

impl RemoteObjectHandle {
    pub fn new(service: &str, path: &str, interface: &str) -> Result<Self> {
        let service = BusName::try_from(service).map_err(|e| {
            Error::InvalidHandle(format!("bad bus name {service:?}: {e}"))
        })?;
        let path = ObjectPath::try_from(path).map_err(|e| {
            Error::InvalidHandle(format!("bad object path {path:?}: {e}"))
        })?;
        let interface = InterfaceName::try_from(interface).map_err(|e| {
            Error::InvalidHandle(format!("bad interface name {interface:?}: {e}"))
        })?;

        Ok(Self {
            service: service.into(),
            path: path.into(),
            interface: interface.into(),
        })
    }

    pub fn service(&self) -> &OwnedBusName {
        &self.service
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn interface(&self) -> &OwnedInterfaceName {
        &self.interface
    }
}

impl fmt::Display for RemoteObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.service.as_str(),
            self.path.as_str(),
            self.interface.as_str()
        )
    }
}
