//! Logical operation to procedure-number mapping.
//!
//! The USB client procedures moved between firmware revisions; the
//! clock and display procedures did not. A table is built once for the
//! negotiated version and never changes afterwards.

use std::fmt;

use super::version::ServiceVersion;
use crate::error::{PmappError, Result};

/// Display clock configuration procedure.
pub const DISPLAY_CLOCK_CONFIG_PROC: u32 = 21;

/// Clock vote procedure.
pub const CLOCK_VOTE_PROC: u32 = 27;

/// Per-version USB procedures: (version, register VBUS notify, vote power-select switch).
const USB_PROCEDURES: [(ServiceVersion, Option<u32>, Option<u32>); 3] = [
    (ServiceVersion::V1_1, Some(5), Some(6)),
    (ServiceVersion::V1_2, Some(16), Some(17)),
    (ServiceVersion::V2_1, None, None),
];

/// Operations the client can ask of the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterVbusSessionNotify,
    VoteUsbPowerSelectSwitch,
    DisplayClockConfig,
    ClockVote,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::RegisterVbusSessionNotify => "register-vbus-session-notify",
            Operation::VoteUsbPowerSelectSwitch => "vote-usb-power-select-switch",
            Operation::DisplayClockConfig => "display-clock-config",
            Operation::ClockVote => "clock-vote",
        };
        f.write_str(name)
    }
}

/// Procedure numbers valid for one negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureTable {
    version: ServiceVersion,
    register_vbus: Option<u32>,
    vote_switch: Option<u32>,
}

impl ProcedureTable {
    /// Table for `version`, or `None` if the version is unknown.
    pub fn for_version(version: ServiceVersion) -> Option<Self> {
        USB_PROCEDURES
            .iter()
            .find(|(v, _, _)| *v == version)
            .map(|&(version, register_vbus, vote_switch)| Self {
                version,
                register_vbus,
                vote_switch,
            })
    }

    /// Whether a table exists for `version`.
    pub fn supports(version: ServiceVersion) -> bool {
        USB_PROCEDURES.iter().any(|(v, _, _)| *v == version)
    }

    #[inline]
    pub fn version(&self) -> ServiceVersion {
        self.version
    }

    /// Procedure number for `op`, `None` when not applicable to this version.
    pub fn procedure(&self, op: Operation) -> Option<u32> {
        match op {
            Operation::RegisterVbusSessionNotify => self.register_vbus,
            Operation::VoteUsbPowerSelectSwitch => self.vote_switch,
            Operation::DisplayClockConfig => Some(DISPLAY_CLOCK_CONFIG_PROC),
            Operation::ClockVote => Some(CLOCK_VOTE_PROC),
        }
    }

    /// Like [`procedure`](Self::procedure), failing with `Unsupported`.
    pub fn resolve(&self, op: Operation) -> Result<u32> {
        self.procedure(op).ok_or(PmappError::Unsupported {
            operation: op,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_1_table() {
        let table = ProcedureTable::for_version(ServiceVersion::V1_1).unwrap();
        assert_eq!(table.procedure(Operation::RegisterVbusSessionNotify), Some(5));
        assert_eq!(table.procedure(Operation::VoteUsbPowerSelectSwitch), Some(6));
    }

    #[test]
    fn test_v1_2_table() {
        let table = ProcedureTable::for_version(ServiceVersion::V1_2).unwrap();
        assert_eq!(table.procedure(Operation::RegisterVbusSessionNotify), Some(16));
        assert_eq!(table.procedure(Operation::VoteUsbPowerSelectSwitch), Some(17));
    }

    #[test]
    fn test_v2_1_usb_procedures_not_applicable() {
        let table = ProcedureTable::for_version(ServiceVersion::V2_1).unwrap();
        assert_eq!(table.procedure(Operation::VoteUsbPowerSelectSwitch), None);
        let err = table
            .resolve(Operation::RegisterVbusSessionNotify)
            .unwrap_err();
        assert!(matches!(
            err,
            PmappError::Unsupported {
                operation: Operation::RegisterVbusSessionNotify,
                version: ServiceVersion::V2_1,
            }
        ));
    }

    #[test]
    fn test_clock_procedures_fixed() {
        for version in [ServiceVersion::V1_1, ServiceVersion::V1_2, ServiceVersion::V2_1] {
            let table = ProcedureTable::for_version(version).unwrap();
            assert_eq!(table.resolve(Operation::DisplayClockConfig).unwrap(), 21);
            assert_eq!(table.resolve(Operation::ClockVote).unwrap(), 27);
        }
    }

    #[test]
    fn test_unknown_version() {
        assert!(ProcedureTable::for_version(ServiceVersion::V3_1).is_none());
        assert!(!ProcedureTable::supports(ServiceVersion::new(9, 9)));
    }
}
