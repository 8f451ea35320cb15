//! The engine interface the service acceptor is written against.
//!
//! A Kerberos library is modeled as three layers. An [Engine] is the
//! entry point and hands out contexts. An [EngineContext] corresponds to
//! one library handle: it resolves principals and keytabs, runs
//! authentication exchanges, and renders errors. An exchange is the
//! per-connection state produced by [EngineContext::new_exchange]; it
//! accumulates everything token validation learns about the client and
//! is discarded when the connection is done.
//!
//! Every fallible operation reports an [ErrorCode] from the engine's own
//! error domain. The acceptor never interprets these values; it stores
//! the most recent one and asks the context to render it via
//! [EngineContext::error_message] when a caller wants text.

use crate::{EngineResult, ErrorCode, ExchangeFlags, SessionKey, UnparseFlags};

/// Entry point to a protocol engine, handing out independent contexts.
///
/// The acceptor opens a fresh context on every initialization, so an
/// engine must support any number of contexts over its lifetime.
pub trait Engine {
    type Context: EngineContext;

    fn open(&self) -> EngineResult<Self::Context>;
}

/// The record a client transmits alongside its ticket to prove it holds
/// the session key.
///
/// Engines surface it as an opaque value; the acceptor only cares about
/// the client identity it may carry.
pub trait Authenticator {
    type Principal;

    /// The client identity named by this record, if the engine was able
    /// to recover one.
    fn client(&self) -> Option<&Self::Principal>;
}

/// One handle to a protocol engine.
///
/// All methods take `&mut self`: real Kerberos libraries keep mutable
/// per-handle state (error tables, profile data, allocator scratch) even
/// for operations that look read-only. Values handed out by a context
/// (principals, keytabs, exchanges) are only meaningful with the context
/// they came from; the acceptor guarantees it never mixes handles across
/// contexts.
pub trait EngineContext {
    /// A resolved identity, such as `svc/host.example.com@EXAMPLE.COM`.
    type Principal;
    /// A handle to stored key material.
    type Keytab;
    /// The evolving state of one authentication exchange.
    type Exchange;
    /// A handle to a replay cache shared by all exchanges of one service.
    type ReplayCache;
    type Authenticator: Authenticator<Principal = Self::Principal>;

    /// Resolve the principal a service is known as.
    ///
    /// `host` of `None` lets the engine pick its default resolution for
    /// the local host; it does not mean a wildcard identity.
    fn resolve_service_principal(
        &mut self,
        host: Option<&str>,
        service: &str,
    ) -> EngineResult<Self::Principal>;

    /// The `index`-th name component of a principal, or `None` when the
    /// principal has fewer components.
    fn principal_component<'a>(
        &self,
        principal: &'a Self::Principal,
        index: usize,
    ) -> Option<&'a str>;

    /// Release a principal obtained from this context.
    fn free_principal(&mut self, principal: Self::Principal);

    /// Open the key-material store at the platform default location.
    fn default_keytab(&mut self) -> EngineResult<Self::Keytab>;

    /// Open the key-material store at an explicit location.
    fn resolve_keytab(&mut self, location: &str) -> EngineResult<Self::Keytab>;

    /// Close a keytab handle. Closing can fail, for example when the
    /// backing store went away underneath the handle.
    fn close_keytab(&mut self, keytab: Self::Keytab) -> EngineResult<()>;

    /// Create a fresh exchange carrying the engine's default flag set.
    fn new_exchange(&mut self) -> EngineResult<Self::Exchange>;

    /// The current behavior flags of an exchange.
    fn exchange_flags(&mut self, exchange: &Self::Exchange) -> EngineResult<ExchangeFlags>;

    /// Replace the behavior flags of an exchange.
    fn set_exchange_flags(
        &mut self,
        exchange: &mut Self::Exchange,
        flags: ExchangeFlags,
    ) -> EngineResult<()>;

    /// Resolve the replay cache for a service, keyed by `tag`.
    ///
    /// `tag` is the first name component of the service principal, so
    /// all instances of one service share a cache.
    fn resolve_replay_cache(&mut self, tag: &str) -> EngineResult<Self::ReplayCache>;

    /// Attach a replay cache to an exchange. The exchange keeps its own
    /// reference; the caller retains the handle for reuse.
    fn bind_replay_cache(
        &mut self,
        exchange: &mut Self::Exchange,
        cache: &Self::ReplayCache,
    ) -> EngineResult<()>;

    /// Tear down an exchange and everything it accumulated.
    fn free_exchange(&mut self, exchange: Self::Exchange) -> EngineResult<()>;

    /// Validate a client token against the service identity and its key
    /// material.
    ///
    /// Honors the exchange's behavior flags and bound replay cache. On
    /// success the exchange holds the negotiated session key and the
    /// client's authenticator record; on failure the exchange contents
    /// are unspecified and the caller is expected to discard it.
    fn validate_token(
        &mut self,
        exchange: &mut Self::Exchange,
        token: &[u8],
        service: &Self::Principal,
        keytab: &Self::Keytab,
    ) -> EngineResult<()>;

    /// Build the reply token proving the service's identity to the
    /// client. Requires a previously successful [validate_token](Self::validate_token)
    /// on the same exchange.
    fn build_reply(&mut self, exchange: &mut Self::Exchange) -> EngineResult<Vec<u8>>;

    /// Extract the session key negotiated during validation.
    fn session_key(&mut self, exchange: &Self::Exchange) -> EngineResult<SessionKey>;

    /// The authenticator record captured during validation.
    fn authenticator(&mut self, exchange: &Self::Exchange) -> EngineResult<Self::Authenticator>;

    /// Render a principal to text according to `flags`.
    ///
    /// Must not fail merely because a flag combination is unsupported;
    /// an engine without a matching rendering falls back to the closest
    /// form it has.
    fn unparse_principal(
        &mut self,
        principal: &Self::Principal,
        flags: UnparseFlags,
    ) -> EngineResult<String>;

    /// The engine's human-readable text for `code`, or `None` when the
    /// code is unknown to it.
    fn error_message(&mut self, code: ErrorCode) -> Option<String>;
}
