//! Local mirror of a remote object's properties.
//!
//! Each proxy type declares its properties with [`properties!`], which expands
//! to a plain struct plus a static table mapping D-Bus property names to typed
//! field accessors. [`PropertyStore`] keeps one such struct behind a single
//! reader/writer lock.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, warn};
use zbus::zvariant::{self, OwnedValue, Value};

use crate::{
    error::{Error, Result},
    handle::RemoteObjectHandle,
    transport::Transport,
};

/// Accessors for one property of `S`.
pub struct Field<S> {
    /// D-Bus name of the property, e.g. `Interval`.
    pub name: &'static str,
    pub get: fn(&S) -> Value<'static>,
    /// Stores `value` if it converts to the field type. Leaves the field
    /// untouched otherwise.
    pub set: fn(&mut S, OwnedValue) -> Result<(), zvariant::Error>,
    pub reset: fn(&mut S),
}

/// The static name -> field table of a property struct.
///
/// Implemented by [`properties!`].
pub trait PropertySchema: Default + Clone + Send + Sync + 'static {
    /// Interface the properties belong to.
    const INTERFACE: &'static str;

    fn fields() -> &'static [Field<Self>];

    fn field(name: &str) -> Option<&'static Field<Self>> {
        Self::fields().iter().find(|field| field.name == name)
    }

    /// Builds a snapshot from a `GetAll` reply. Properties that are unknown or
    /// fail to convert are skipped.
    fn from_properties(props: HashMap<String, OwnedValue>) -> Self {
        let mut snapshot = Self::default();
        for (name, value) in props {
            match Self::field(&name) {
                Some(field) => {
                    if let Err(e) = (field.set)(&mut snapshot, value) {
                        warn!(interface = Self::INTERFACE, "skipping property {name}: {e}");
                    }
                }
                None => {
                    debug!(interface = Self::INTERFACE, "ignoring unknown property {name}")
                }
            }
        }

        snapshot
    }

    /// The reverse of [`PropertySchema::from_properties`]: every field keyed
    /// by its D-Bus name.
    fn to_properties(&self) -> Result<HashMap<String, OwnedValue>> {
        Self::fields()
            .iter()
            .map(|field| {
                let value = OwnedValue::try_from((field.get)(self))
                    .map_err(|e| Error::conversion(field.name, e))?;
                Ok::<_, Error>((field.name.to_owned(), value))
            })
            .collect()
    }
}

/// Declares a property struct and its [`PropertySchema`].
///
/// ```
/// bluez_proxies::properties! {
///     pub struct BatteryProperties for "org.bluez.Battery1" {
///         "Percentage" => percentage: u8,
///         "Source" => source: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! properties {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident for $iface:literal {
            $(
                $(#[$field_meta:meta])*
                $dbus_name:literal => $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::properties::PropertySchema for $name {
            const INTERFACE: &'static str = $iface;

            fn fields() -> &'static [$crate::properties::Field<Self>] {
                static FIELDS: &[$crate::properties::Field<$name>] = &[
                    $(
                        $crate::properties::Field {
                            name: $dbus_name,
                            get: |props| $crate::zvariant::Value::from(props.$field.clone()),
                            set: |props, value| {
                                props.$field = <$ty>::try_from(value)?;
                                Ok(())
                            },
                            reset: |props| props.$field = <$ty as Default>::default(),
                        },
                    )*
                ];
                FIELDS
            }
        }
    };
}

/// The snapshot of one remote object, guarded by a coarse reader/writer lock.
///
/// Every write happens under one write guard, so readers see either the state
/// before a batch or after it, never a mix.
#[derive(Debug, Default)]
pub struct PropertyStore<S> {
    snapshot: RwLock<S>,
}

impl<S: PropertySchema> PropertyStore<S> {
    pub fn new(snapshot: S) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, S> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, S> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches every property of `handle` and swaps the result in. On error
    /// the current snapshot is left as it was.
    pub async fn load<T: Transport>(
        &self,
        transport: &T,
        handle: &RemoteObjectHandle,
    ) -> Result<()> {
        let props = transport.get_all(handle).await?;
        let snapshot = S::from_properties(props);
        *self.write_guard() = snapshot;
        debug!(%handle, "properties loaded");

        Ok(())
    }

    pub fn read<K>(&self, f: impl FnOnce(&S) -> K) -> K {
        f(&*self.read_guard())
    }

    pub fn snapshot(&self) -> S {
        self.read_guard().clone()
    }

    pub fn get(&self, name: &str) -> Result<OwnedValue> {
        let field = S::field(name).ok_or_else(|| Error::NotFound(name.to_owned()))?;
        let value = (field.get)(&*self.read_guard());

        OwnedValue::try_from(value).map_err(|e| Error::conversion(name, e))
    }

    pub fn get_as<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<OwnedValue, Error = zvariant::Error>,
    {
        T::try_from(self.get(name)?).map_err(|e| Error::conversion(name, e))
    }

    /// Stores a single property.
    pub fn apply_change(&self, name: &str, value: &Value<'_>) -> Result<()> {
        let field = S::field(name).ok_or_else(|| Error::NotFound(name.to_owned()))?;
        let value = value.try_to_owned().map_err(|e| Error::conversion(name, e))?;

        (field.set)(&mut *self.write_guard(), value).map_err(|e| Error::conversion(name, e))
    }

    /// Applies one `PropertiesChanged` batch under a single write guard and
    /// returns the pairs that were stored, in iteration order.
    ///
    /// Unknown or unconvertible properties are logged and left out.
    /// Invalidated properties are reset to their default, unless the same
    /// batch stored a new value for them.
    pub fn apply_changes(
        &self,
        changed: impl IntoIterator<Item = (String, OwnedValue)>,
        invalidated: &[String],
    ) -> Vec<(String, OwnedValue)> {
        let mut applied = Vec::new();
        let mut snapshot = self.write_guard();

        for (name, value) in changed {
            let Some(field) = S::field(&name) else {
                warn!(interface = S::INTERFACE, "ignoring change of unknown property {name}");
                continue;
            };
            let stored = value
                .try_clone()
                .and_then(|copy| (field.set)(&mut *snapshot, copy));
            match stored {
                Ok(()) => applied.push((name, value)),
                Err(e) => {
                    warn!(interface = S::INTERFACE, "failed to set {name}: {e}")
                }
            }
        }

        for name in invalidated {
            if applied.iter().any(|(stored, _)| stored == name) {
                debug!(interface = S::INTERFACE, "keeping {name}, changed in the same batch");
                continue;
            }
            if let Some(field) = S::field(name) {
                (field.reset)(&mut *snapshot);
                debug!(interface = S::INTERFACE, "property {name} invalidated");
            }
        }

        applied
    }
}
