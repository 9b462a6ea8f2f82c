//! Compact hardware-address key for advertisement sources.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth hardware address stored as a 6-byte array.
///
/// Cheap to copy and hash, which matters because every received
/// advertisement is keyed by its source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a hardware address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid hardware address: expected six ':'-separated octets")]
    BadFormat,
    #[error("invalid hardware address: '{0}' is not a hex octet")]
    BadOctet(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == bytes.len() {
                return Err(ParseMacError::BadFormat);
            }
            if part.len() != 2 {
                return Err(ParseMacError::BadOctet(part.to_string()));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::BadOctet(part.to_string()))?;
            count += 1;
        }
        if count != bytes.len() {
            return Err(ParseMacError::BadFormat);
        }
        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = MacAddress([0xAA, 0x0B, 0xCC, 0x1D, 0xEE, 0x0F]);
        assert_eq!(format!("{}", addr), "AA:0B:CC:1D:EE:0F");
    }

    #[test]
    fn test_parse_roundtrip() {
        let addr: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(addr.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string().parse::<MacAddress>(), Ok(addr));
    }

    #[test]
    fn test_parse_lowercase() {
        let addr: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            "".parse::<MacAddress>(),
            Err(ParseMacError::BadOctet(String::new()))
        );
        assert_eq!("AA:BB:CC".parse::<MacAddress>(), Err(ParseMacError::BadFormat));
        assert_eq!(
            "AA:BB:CC:DD:EE:FF:00".parse::<MacAddress>(),
            Err(ParseMacError::BadFormat)
        );
        assert_eq!(
            "AA:BB:CC:DD:EE:GG".parse::<MacAddress>(),
            Err(ParseMacError::BadOctet("GG".to_string()))
        );
    }
}
