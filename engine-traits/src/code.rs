//! Numeric status codes shared between the acceptor and its engine.

use std::fmt;

/// A status code produced by a protocol engine.
///
/// The value space belongs to the engine; the acceptor treats every
/// non-zero value as opaque and only ever stores, compares, and forwards
/// it to [EngineContext::error_message](crate::EngineContext::error_message)
/// for rendering. Two values have fixed meaning across all engines:
/// [ErrorCode::OK] for success and [ErrorCode::INVALID_ARGUMENT] for
/// caller contract violations detected outside the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// Success; the only value for which [is_ok](Self::is_ok) holds.
    pub const OK: Self = Self(0);

    /// Rejected input or a call made in the wrong state.
    ///
    /// Uses the POSIX `EINVAL` value so the code survives round-trips
    /// through interfaces that expect an errno.
    pub const INVALID_ARGUMENT: Self = Self(22);

    pub const fn value(self) -> i32 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub const fn is_err(self) -> bool {
        self.0 != 0
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shorthand for the result type every engine operation returns.
pub type EngineResult<T> = Result<T, ErrorCode>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ok_is_zero() {
        assert!(ErrorCode::OK.is_ok());
        assert!(!ErrorCode::OK.is_err());
        assert_eq!(ErrorCode::OK.value(), 0);
        assert_eq!(ErrorCode::default(), ErrorCode::OK);
    }

    #[test]
    fn invalid_argument_is_einval() {
        assert_eq!(ErrorCode::INVALID_ARGUMENT.value(), 22);
        assert!(ErrorCode::INVALID_ARGUMENT.is_err());
    }

    #[test]
    fn round_trips_through_i32() {
        let code = ErrorCode::from(-1765328360);
        assert_eq!(i32::from(code), -1765328360);
        assert_eq!(code.to_string(), "-1765328360");
    }
}
