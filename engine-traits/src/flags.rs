//! Bit flags steering exchange behavior and principal rendering.

use bitflags::bitflags;

bitflags! {
    /// Behavior flags carried by an authentication exchange.
    ///
    /// A fresh exchange starts with whatever default set the engine
    /// chooses; the acceptor reads the current set, adjusts the bits it
    /// cares about, and writes the whole set back.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ExchangeFlags: u32 {
        /// Check token timestamps against the local clock and the
        /// replay cache while validating.
        const TIME_CHECK = 0x0000_0001;
        /// Record validated token timestamps so replays of the same
        /// token can be recognized later.
        const RETURN_TIME = 0x0000_0002;
    }
}

bitflags! {
    /// Formatting options for rendering a principal to text.
    ///
    /// Each bit is independent; callers combine them with `|`. An engine
    /// that does not support a requested combination must still render
    /// using the closest form it has rather than fail.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UnparseFlags: u32 {
        /// Omit the realm when it matches the local default realm.
        const SHORT = 0x0000_0001;
        /// Omit the realm unconditionally.
        const NO_REALM = 0x0000_0002;
        /// Skip quoting of special characters, for display to humans.
        const DISPLAY = 0x0000_0004;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exchange_flags_compose() {
        let flags = ExchangeFlags::TIME_CHECK | ExchangeFlags::RETURN_TIME;
        assert_eq!(flags.bits(), 0x3);
        assert!((flags & !ExchangeFlags::TIME_CHECK) == ExchangeFlags::RETURN_TIME);
    }

    #[test]
    fn unparse_flags_default_empty() {
        assert!(UnparseFlags::default().is_empty());
        assert_eq!(UnparseFlags::NO_REALM.bits(), 0x2);
        assert_eq!(UnparseFlags::DISPLAY.bits(), 0x4);
    }
}
