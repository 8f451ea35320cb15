//! Service-side Kerberos authentication core.
//!
//! See [acceptor] for the authentication state machine, [config] for
//! file-based configuration, and [testutils] for the in-memory realm
//! used throughout the test suite.

pub mod acceptor;
pub mod config;
pub mod testutils;
