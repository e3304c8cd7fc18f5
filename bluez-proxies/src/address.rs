use std::{fmt, str::FromStr};

/// Bus name BlueZ owns on the system bus.
pub const SERVICE: &str = "org.bluez";

/// A Bluetooth device address such as `00:11:22:33:44:55`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 6]);

#[derive(Debug, thiserror::Error)]
#[error("invalid bluetooth address {0:?}, expected XX:XX:XX:XX:XX:XX")]
pub struct InvalidAddress(String);

impl Address {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAddress(s.to_owned());

        let mut octets = [0; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Object path of an adapter, e.g. `/org/bluez/hci0`.
pub fn adapter_path(adapter_id: &str) -> String {
    format!("/org/bluez/{adapter_id}")
}

/// Object path of a device below an adapter, e.g.
/// `/org/bluez/hci0/dev_00_11_22_33_44_55`.
pub fn device_path(adapter_id: &str, address: &Address) -> String {
    let address = address.to_string().replace(':', "_");
    format!("{}/dev_{address}", adapter_path(adapter_id))
}
