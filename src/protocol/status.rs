//! Remote status word translation.
//!
//! The peer answers set-only calls with a bit-flag word. Several bits may
//! be set at once; the first match in [`TRANSLATION`] wins.

use thiserror::Error;

/// Status bit flags defined by the peer.
pub mod status_flags {
    pub const PAR1_OUT_OF_RANGE: u32 = 0x0001;
    pub const PAR2_OUT_OF_RANGE: u32 = 0x0002;
    pub const PAR3_OUT_OF_RANGE: u32 = 0x0004;
    pub const PAR4_OUT_OF_RANGE: u32 = 0x0008;
    pub const PAR5_OUT_OF_RANGE: u32 = 0x0010;

    /// Any of the five parameter positions.
    pub const ALL_PARAMS_OUT_OF_RANGE: u32 = PAR1_OUT_OF_RANGE
        | PAR2_OUT_OF_RANGE
        | PAR3_OUT_OF_RANGE
        | PAR4_OUT_OF_RANGE
        | PAR5_OUT_OF_RANGE;

    /// Serial bus interface option error.
    pub const SBI_OPT_ERR: u32 = 0x0080;
    pub const FEATURE_NOT_SUPPORTED: u32 = 0x0100;
}

/// Local classification of a remote rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    InvalidArgument,
    Io,
    NotImplemented,
    PermissionDenied,
}

/// Priority-ordered (mask, kind) pairs. Order is part of the contract.
pub const TRANSLATION: [(u32, RemoteErrorKind); 3] = [
    (
        status_flags::ALL_PARAMS_OUT_OF_RANGE,
        RemoteErrorKind::InvalidArgument,
    ),
    (status_flags::SBI_OPT_ERR, RemoteErrorKind::Io),
    (
        status_flags::FEATURE_NOT_SUPPORTED,
        RemoteErrorKind::NotImplemented,
    ),
];

/// A non-zero status word returned by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind:?} (status {status:#06x})")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: u32,
}

/// Map a remote status word to `Ok(())` or the highest-priority error.
pub fn translate(status: u32) -> Result<(), RemoteError> {
    if status == 0 {
        return Ok(());
    }

    let kind = TRANSLATION
        .iter()
        .find(|(mask, _)| status & mask != 0)
        .map(|&(_, kind)| kind)
        .unwrap_or(RemoteErrorKind::PermissionDenied);

    Err(RemoteError { kind, status })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(status: u32) -> RemoteErrorKind {
        translate(status).unwrap_err().kind
    }

    #[test]
    fn test_zero_is_success() {
        assert_eq!(translate(0), Ok(()));
    }

    #[test]
    fn test_each_parameter_bit_is_invalid_argument() {
        for bit in [0x01, 0x02, 0x04, 0x08, 0x10] {
            assert_eq!(kind(bit), RemoteErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_single_flags() {
        assert_eq!(kind(0x0080), RemoteErrorKind::Io);
        assert_eq!(kind(0x0100), RemoteErrorKind::NotImplemented);
        assert_eq!(kind(0x0020), RemoteErrorKind::PermissionDenied);
        assert_eq!(kind(0x8000_0000), RemoteErrorKind::PermissionDenied);
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(kind(0x0001 | 0x0100), RemoteErrorKind::InvalidArgument);
        assert_eq!(kind(0x0080 | 0x0100), RemoteErrorKind::Io);
        assert_eq!(kind(0x0010 | 0x0080), RemoteErrorKind::InvalidArgument);
    }

    #[test]
    fn test_status_preserved() {
        let err = translate(0x0181).unwrap_err();
        assert_eq!(err.status, 0x0181);
        assert_eq!(err.to_string(), "InvalidArgument (status 0x0181)");
    }
}
