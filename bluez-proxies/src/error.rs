use thiserror::Error;
use zbus::zvariant;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A remote call or a subscription failed at the IPC layer.
    #[error(transparent)]
    Transport(#[from] zbus::Error),
    /// A value could not be coerced into the type the local schema expects.
    #[error("failed to convert property {name}: {source}")]
    Conversion {
        name: String,
        #[source]
        source: zvariant::Error,
    },
    /// The property is unknown to the local schema.
    #[error("property {0} is not part of the local schema")]
    NotFound(String),
    #[error("invalid remote object handle: {0}")]
    InvalidHandle(String),
    #[error("proxy was closed")]
    Closed,
}

impl From<zbus::fdo::Error> for Error {
    fn from(value: zbus::fdo::Error) -> Self {
        Self::Transport(value.into())
    }
}

impl Error {
    /// The D-Bus error name the remote side replied with, e.g.
    /// `org.bluez.Error.InvalidArguments`.
    pub fn remote_error_name(&self) -> Option<String> {
        let Self::Transport(err) = self else {
            return None;
        };

        match err {
            zbus::Error::MethodError(name, _, _) => Some(name.to_string()),
            zbus::Error::FDO(fdo) => match fdo.as_ref() {
                zbus::fdo::Error::ZBus(zbus::Error::MethodError(name, _, _)) => {
                    Some(name.to_string())
                }
                other => Some(zbus::DBusError::name(other).to_string()),
            },
            _ => None,
        }
    }

    pub(crate) fn conversion(name: &str, source: zvariant::Error) -> Self {
        Self::Conversion {
            name: name.to_owned(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
