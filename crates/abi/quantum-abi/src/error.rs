//! System-call error codes.
//!
//! The taxonomy is closed and flat: every failing syscall maps onto exactly
//! one of these codes. `0` is reserved for success on the wire, so the codes
//! start at 1 and round-trip through a `u32` without loss.

/// Error returned by a system call or an in-kernel operation backing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SysError {
    /// Null pointer, length exceeds a bound, or an unknown id.
    InvalidArgument = 1,
    /// Port, device, volume, or handle does not resolve.
    NotFound = 2,
    /// Rights mask insufficient, or a non-owner/non-coordinator attempted a
    /// privileged operation.
    PermissionDenied = 3,
    /// Frame allocator, heap, handle table, port table, or message queue full.
    ResourceExhausted = 4,
    /// Timed IPC elapsed without an event.
    Timeout = 5,
    /// A non-blocking variant would have blocked.
    WouldBlock = 6,
    /// Syscall identifier unknown or operation not implemented.
    Unsupported = 7,
}

impl SysError {
    /// Raw wire value (always non-zero).
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decodes a wire value; `0` and unknown values yield `None`.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::InvalidArgument),
            2 => Some(Self::NotFound),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::ResourceExhausted),
            5 => Some(Self::Timeout),
            6 => Some(Self::WouldBlock),
            7 => Some(Self::Unsupported),
            _ => None,
        }
    }
}

/// Success wire value.
pub const OK: u32 = 0;

/// Converts a kernel `Result` into the raw syscall return word.
#[must_use]
pub fn to_wire(result: Result<u32, SysError>) -> u32 {
    match result {
        Ok(v) => v,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for e in [
            SysError::InvalidArgument,
            SysError::NotFound,
            SysError::PermissionDenied,
            SysError::ResourceExhausted,
            SysError::Timeout,
            SysError::WouldBlock,
            SysError::Unsupported,
        ] {
            assert_eq!(SysError::from_code(e.code()), Some(e));
        }
    }

    #[test]
    fn zero_is_not_an_error() {
        assert_eq!(SysError::from_code(0), None);
        assert_eq!(to_wire(Ok(0)), OK);
    }
}
