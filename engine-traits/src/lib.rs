//! Capability traits connecting the garm service acceptor to a Kerberos
//! protocol engine.
//!
//! The acceptor in the `garm` crate never touches tickets, keytabs, or
//! replay caches directly; everything protocol-level goes through the
//! [EngineContext] trait defined here. Production deployments bind these
//! traits to a real Kerberos library, tests bind them to the in-memory
//! realm shipped with `garm`.

mod code;
mod engine;
mod flags;
mod key;

pub use code::*;
pub use engine::*;
pub use flags::*;
pub use key::*;
