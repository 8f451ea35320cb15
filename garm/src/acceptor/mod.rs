//! Module containing the service-side authentication implementation
//!
//! # Overview
//!
//! The central type here is [ServiceAcceptor]. Once initialized with a
//! service identity via [ServiceAcceptor::init], the acceptor is handed
//! each client's authentication token via [ServiceAcceptor::request],
//! and [ServiceAcceptor::reply] then yields the [ReplyArtifacts]: the
//! reply token for mutual authentication, the session key, and the
//! client principal rendered to text. One acceptor serves any number of
//! client connections sequentially over a single long-lived service
//! context.
//!
//! # Example Exchange
//!
//! This example runs a complete exchange against the in-memory realm
//! from [crate::testutils]; a production deployment would plug in an
//! engine backed by a real Kerberos library instead.
//!
//! ```
//! use garm::acceptor::ServiceAcceptor;
//! use garm::testutils::{MemoryPrincipal, MemoryRealm};
//! use garm_engine_traits::UnparseFlags;
//!
//! # fn main() -> anyhow::Result<()> {
//! // A realm with one provisioned service and one client.
//! let realm = MemoryRealm::new("GARM.TEST");
//! let service = realm.provision_service("kfs", "meta.garm.test");
//! let client = MemoryPrincipal::user("alice", "GARM.TEST");
//!
//! // The client side of the exchange: obtain a token for the service.
//! let issued = realm.issue_token(&client, &service)?;
//!
//! // The service side: validate the token, mint the reply.
//! let mut acceptor = ServiceAcceptor::new(realm.engine());
//! acceptor.init(Some("meta.garm.test"), "kfs", None, true)?;
//! acceptor.request(&issued.token)?;
//! let artifacts = acceptor.reply(UnparseFlags::SHORT)?;
//!
//! // Both sides now hold the same session key, and the client can
//! // check the reply token to authenticate the service in turn.
//! assert_eq!(artifacts.session_key().as_bytes(), &issued.session_key[..]);
//! assert_eq!(artifacts.client_principal(), "alice");
//! MemoryRealm::verify_reply(&issued, artifacts.reply())?;
//! # Ok(())
//! # }
//! ```

#[allow(clippy::module_inception)]
mod acceptor;
pub use acceptor::*;

mod artifacts;
pub use artifacts::*;

mod error;
pub use error::*;
