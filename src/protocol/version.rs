//! Service versions and program numbers.
//!
//! A version is a `major.minor` pair. On the wire it travels as one
//! 32-bit word: `(major << 16) | minor`, so `2.1` is `0x00020001`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Program number of the power-management application service.
pub const PMAPP_PROGRAM: u32 = 0x3000_0060;

/// Protocol version of the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceVersion {
    major: u16,
    minor: u16,
}

impl ServiceVersion {
    pub const V1_1: ServiceVersion = ServiceVersion::new(1, 1);
    pub const V1_2: ServiceVersion = ServiceVersion::new(1, 2);
    pub const V2_1: ServiceVersion = ServiceVersion::new(2, 1);
    pub const V3_1: ServiceVersion = ServiceVersion::new(3, 1);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Encode as the 32-bit wire word.
    #[inline]
    pub fn as_wire(&self) -> u32 {
        (u32::from(self.major) << 16) | u32::from(self.minor)
    }
}

/// Versions the USB client registers with, highest first.
pub const USB_CLIENT_VERSIONS: [ServiceVersion; 3] = [
    ServiceVersion::V2_1,
    ServiceVersion::V1_2,
    ServiceVersion::V1_1,
];

/// Versions the transaction channel connects with, highest first.
pub const CONNECT_VERSIONS: [ServiceVersion; 2] = [ServiceVersion::V3_1, ServiceVersion::V2_1];

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ServiceVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("version '{}' is not of the form major.minor", s))?;
        let major = major
            .trim()
            .parse()
            .map_err(|e| format!("bad major in '{}': {}", s, e))?;
        let minor = minor
            .trim()
            .parse()
            .map_err(|e| format!("bad minor in '{}': {}", s, e))?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for ServiceVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServiceVersion> for String {
    fn from(version: ServiceVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_words() {
        assert_eq!(ServiceVersion::V1_1.as_wire(), 0x0001_0001);
        assert_eq!(ServiceVersion::V1_2.as_wire(), 0x0001_0002);
        assert_eq!(ServiceVersion::V2_1.as_wire(), 0x0002_0001);
        assert_eq!(ServiceVersion::V3_1.as_wire(), 0x0003_0001);
    }

    #[test]
    fn test_ordering() {
        assert!(ServiceVersion::V2_1 > ServiceVersion::V1_2);
        assert!(ServiceVersion::V1_2 > ServiceVersion::V1_1);
        assert!(USB_CLIENT_VERSIONS.windows(2).all(|w| w[0] > w[1]));
        assert!(CONNECT_VERSIONS.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_parse() {
        assert_eq!("1.2".parse::<ServiceVersion>(), Ok(ServiceVersion::V1_2));
        assert!("12".parse::<ServiceVersion>().is_err());
        assert!("a.1".parse::<ServiceVersion>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ServiceVersion::V3_1).unwrap();
        assert_eq!(json, "\"3.1\"");
        let back: ServiceVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServiceVersion::V3_1);
    }
}
