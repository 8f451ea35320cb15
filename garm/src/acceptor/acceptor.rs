use std::fmt;

use garm_engine_traits::{
    Authenticator, Engine, EngineContext, ErrorCode, ExchangeFlags, UnparseFlags,
};

use crate::config::AcceptorConfig;

use super::{AcceptorError, ReplyArtifacts};

/// Service-side endpoint of the Kerberos AP exchange.
///
/// One acceptor carries one service identity and serves any number of
/// client connections sequentially. [init](Self::init) binds the
/// identity and key material, each connection then runs
/// [request](Self::request) followed by [reply](Self::reply), and
/// [cleanup](Self::cleanup) releases everything. A failed call never
/// leaves partial state behind: the next `init` or `request` starts
/// clean.
///
/// Every operation records its outcome; [error_code](Self::error_code)
/// reports the numeric code of the most recent one, `0` meaning success.
pub struct ServiceAcceptor<E: Engine> {
    engine: E,
    service_name: String,
    service_host: Option<String>,
    keytab_location: Option<String>,
    detect_replay: bool,
    last_code: ErrorCode,
    state: Option<ServiceState<E::Context>>,
    artifacts: Option<ReplyArtifacts>,
}

/// Engine state alive between `init` and `cleanup`.
struct ServiceState<C: EngineContext> {
    ctx: C,
    service: C::Principal,
    service_text: String,
    keytab: C::Keytab,
    /// Resolved on the first replay-detecting exchange, then reused for
    /// every later exchange of this context.
    replay_cache: Option<C::ReplayCache>,
    exchange: Option<C::Exchange>,
}

impl<C: EngineContext> ServiceState<C> {
    /// Create and configure the exchange for one incoming connection.
    fn start_exchange(&mut self, detect_replay: bool) -> Result<(), ErrorCode> {
        let mut exchange = self.ctx.new_exchange()?;
        match self.configure_exchange(&mut exchange, detect_replay) {
            Ok(()) => {
                self.exchange = Some(exchange);
                Ok(())
            }
            Err(code) => {
                if let Err(discarded) = self.ctx.free_exchange(exchange) {
                    log::debug!("discarding exchange teardown error: {discarded}");
                }
                Err(code)
            }
        }
    }

    fn configure_exchange(
        &mut self,
        exchange: &mut C::Exchange,
        detect_replay: bool,
    ) -> Result<(), ErrorCode> {
        let mut flags = self.ctx.exchange_flags(exchange)?;
        if !detect_replay {
            // Without a replay cache there is no usable clock skew
            // guard, so timestamp checking goes too.
            flags &= !(ExchangeFlags::TIME_CHECK | ExchangeFlags::RETURN_TIME);
        }
        self.ctx.set_exchange_flags(exchange, flags)?;
        if detect_replay {
            if self.replay_cache.is_none() {
                let tag = self
                    .ctx
                    .principal_component(&self.service, 0)
                    .unwrap_or("");
                self.replay_cache = Some(self.ctx.resolve_replay_cache(tag)?);
            }
            if let Some(cache) = self.replay_cache.as_ref() {
                self.ctx.bind_replay_cache(exchange, cache)?;
            }
        }
        Ok(())
    }

    /// Validate one client token against the service identity.
    fn validate(&mut self, token: &[u8]) -> Result<(), ErrorCode> {
        let Some(exchange) = self.exchange.as_mut() else {
            return Err(ErrorCode::INVALID_ARGUMENT);
        };
        self.ctx
            .validate_token(exchange, token, &self.service, &self.keytab)
    }

    /// Tear down the current exchange, if any. Not the cleanup path:
    /// teardown errors are logged rather than reported.
    fn discard_exchange(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            if let Err(discarded) = self.ctx.free_exchange(exchange) {
                log::debug!("discarding exchange teardown error: {discarded}");
            }
        }
    }
}

/// Run the reply-side engine calls for a validated exchange and bundle
/// their results.
///
/// All-or-nothing: any failure yields an error and no artifacts. A
/// missing client identity in the authenticator and an empty rendered
/// principal are both reported as invalid state.
fn collect_artifacts<C: EngineContext>(
    ctx: &mut C,
    exchange: &mut C::Exchange,
    flags: UnparseFlags,
) -> Result<ReplyArtifacts, ErrorCode> {
    let reply = ctx.build_reply(exchange)?;
    let session_key = ctx.session_key(exchange)?;
    let authenticator = ctx.authenticator(exchange)?;
    let Some(client) = authenticator.client() else {
        return Err(ErrorCode::INVALID_ARGUMENT);
    };
    let client_principal = ctx.unparse_principal(client, flags)?;
    if client_principal.is_empty() {
        return Err(ErrorCode::INVALID_ARGUMENT);
    }
    Ok(ReplyArtifacts {
        reply,
        session_key,
        client_principal,
    })
}

impl<E: Engine> ServiceAcceptor<E> {
    /// Create an acceptor that is not yet bound to a service identity.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            service_name: String::new(),
            service_host: None,
            keytab_location: None,
            detect_replay: false,
            last_code: ErrorCode::OK,
            state: None,
            artifacts: None,
        }
    }

    /// Bind the acceptor to a service identity and its key material.
    ///
    /// Safe to call on a live acceptor: any previous state is torn down
    /// first, so this doubles as re-initialization. An absent or empty
    /// `service_host` lets the engine resolve the local host name; an
    /// absent or empty `keytab_location` selects the engine's default
    /// store.
    /// With `detect_replay` enabled, validated tokens are recorded in a
    /// replay cache shared by all instances of `service_name`, and a
    /// repeated token is rejected; disabling it also disables token
    /// timestamp checking.
    ///
    /// On failure everything partially set up is released again and the
    /// acceptor is left uninitialized.
    pub fn init(
        &mut self,
        service_host: Option<&str>,
        service_name: &str,
        keytab_location: Option<&str>,
        detect_replay: bool,
    ) -> Result<(), AcceptorError> {
        if let Err(err) = self.teardown() {
            log::debug!("discarding teardown error during re-init: {err}");
        }
        self.detect_replay = detect_replay;
        self.last_code = ErrorCode::OK;
        self.service_name = service_name.to_owned();
        // Empty strings mean the same as absent: default host
        // resolution and the default key-material store.
        self.service_host = service_host
            .filter(|host| !host.is_empty())
            .map(str::to_owned);
        self.keytab_location = keytab_location
            .filter(|location| !location.is_empty())
            .map(str::to_owned);
        match self.open_state() {
            Ok(state) => {
                self.state = Some(state);
                Ok(())
            }
            Err(err) => {
                self.last_code = err.code();
                Err(err)
            }
        }
    }

    /// Initialize from a loaded [AcceptorConfig].
    pub fn init_from_config(&mut self, config: &AcceptorConfig) -> Result<(), AcceptorError> {
        self.init(
            config.service_host.as_deref(),
            &config.service_name,
            config.keytab.as_deref(),
            config.detect_replay,
        )
    }

    fn open_state(&mut self) -> Result<ServiceState<E::Context>, AcceptorError> {
        let mut ctx = match self.engine.open() {
            Ok(ctx) => ctx,
            Err(code) => return Err(AcceptorError::engine::<E::Context>(None, code)),
        };
        let service =
            match ctx.resolve_service_principal(self.service_host.as_deref(), &self.service_name) {
                Ok(service) => service,
                Err(code) => return Err(AcceptorError::engine(Some(&mut ctx), code)),
            };
        let keytab = match self.keytab_location.as_deref() {
            None => ctx.default_keytab(),
            Some(location) => ctx.resolve_keytab(location),
        };
        let keytab = match keytab {
            Ok(keytab) => keytab,
            Err(code) => {
                let err = AcceptorError::engine(Some(&mut ctx), code);
                ctx.free_principal(service);
                return Err(err);
            }
        };
        let service_text = match ctx.unparse_principal(&service, UnparseFlags::empty()) {
            Ok(text) => text,
            Err(code) => {
                let err = AcceptorError::engine(Some(&mut ctx), code);
                if let Err(discarded) = ctx.close_keytab(keytab) {
                    log::debug!("discarding keytab close error: {discarded}");
                }
                ctx.free_principal(service);
                return Err(err);
            }
        };
        log::debug!("service acceptor bound to {service_text}");
        Ok(ServiceState {
            ctx,
            service,
            service_text,
            keytab,
            replay_cache: None,
            exchange: None,
        })
    }

    /// Run token validation for one client connection.
    ///
    /// Discards whatever exchange and reply artifacts the previous
    /// connection left behind, starts a fresh exchange, and validates
    /// `token` against the service identity. After success the acceptor
    /// is ready for [reply](Self::reply); after failure it is not, and
    /// the failed exchange is already torn down.
    pub fn request(&mut self, token: &[u8]) -> Result<(), AcceptorError> {
        let result = self.request_inner(token);
        self.last_code = match &result {
            Ok(()) => ErrorCode::OK,
            Err(err) => err.code(),
        };
        result
    }

    fn request_inner(&mut self, token: &[u8]) -> Result<(), AcceptorError> {
        let Some(state) = self.state.as_mut() else {
            return Err(AcceptorError::NotInitialized);
        };
        // Whatever the previous connection left behind goes first.
        self.artifacts = None;
        state.discard_exchange();
        if let Err(code) = state.start_exchange(self.detect_replay) {
            return Err(AcceptorError::engine(Some(&mut state.ctx), code));
        }
        if let Err(code) = state.validate(token) {
            state.discard_exchange();
            return Err(AcceptorError::engine(Some(&mut state.ctx), code));
        }
        Ok(())
    }

    /// Produce the reply artifacts for the exchange validated by the
    /// last successful [request](Self::request).
    ///
    /// `flags` select how the client principal is rendered. The returned
    /// reference stays valid until the next mutating call; the borrow
    /// checker enforces that callers copy out what they need first. The
    /// artifacts themselves live until the next `request`, `init`, or
    /// `cleanup`, and a repeated `reply` without an intervening
    /// successful `request` is refused rather than allowed to overwrite
    /// a session key that was already handed out.
    pub fn reply(&mut self, flags: UnparseFlags) -> Result<&ReplyArtifacts, AcceptorError> {
        match self.reply_inner(flags) {
            Ok(artifacts) => {
                self.last_code = ErrorCode::OK;
                Ok(self.artifacts.insert(artifacts))
            }
            Err(err) => {
                self.last_code = err.code();
                Err(err)
            }
        }
    }

    fn reply_inner(&mut self, flags: UnparseFlags) -> Result<ReplyArtifacts, AcceptorError> {
        let Some(state) = self.state.as_mut() else {
            return Err(AcceptorError::NotInitialized);
        };
        let Some(mut exchange) = state.exchange.take() else {
            return Err(AcceptorError::NotReady);
        };
        if self.artifacts.is_some() {
            state.exchange = Some(exchange);
            return Err(AcceptorError::ExtraneousReply);
        }
        match collect_artifacts(&mut state.ctx, &mut exchange, flags) {
            Ok(artifacts) => {
                state.exchange = Some(exchange);
                Ok(artifacts)
            }
            Err(code) => {
                // A failed reply invalidates the exchange; the caller
                // has to run a new request before trying again.
                if let Err(discarded) = state.ctx.free_exchange(exchange) {
                    log::debug!("discarding exchange teardown error: {discarded}");
                }
                Err(AcceptorError::engine(Some(&mut state.ctx), code))
            }
        }
    }

    /// Release all engine state. Idempotent; calling it on an
    /// uninitialized acceptor succeeds.
    ///
    /// Every teardown step runs even if an earlier one fails; the first
    /// failure is the one reported, with the exchange teardown checked
    /// before the keytab close.
    pub fn cleanup(&mut self) -> Result<(), AcceptorError> {
        let result = self.teardown();
        self.last_code = match &result {
            Ok(()) => ErrorCode::OK,
            Err(err) => err.code(),
        };
        result
    }

    /// Teardown order: exchange, keytab, principal, reply artifacts,
    /// engine context.
    fn teardown(&mut self) -> Result<(), AcceptorError> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        let ServiceState {
            mut ctx,
            service,
            service_text: _,
            keytab,
            replay_cache,
            exchange,
        } = state;
        let mut first_failure = None;
        if let Some(exchange) = exchange {
            if let Err(code) = ctx.free_exchange(exchange) {
                first_failure = Some(AcceptorError::engine(Some(&mut ctx), code));
            }
        }
        if let Err(code) = ctx.close_keytab(keytab) {
            if first_failure.is_none() {
                first_failure = Some(AcceptorError::engine(Some(&mut ctx), code));
            }
        }
        ctx.free_principal(service);
        self.artifacts = None;
        drop(replay_cache);
        drop(ctx);
        match first_failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Numeric code of the most recent operation, `0` after success.
    pub fn error_code(&self) -> ErrorCode {
        self.last_code
    }

    /// Whether a service identity is currently bound.
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Whether [reply](Self::reply) would produce artifacts right now.
    pub fn is_ready(&self) -> bool {
        self.artifacts.is_none()
            && self
                .state
                .as_ref()
                .is_some_and(|state| state.exchange.is_some())
    }

    /// The artifacts of the last successful [reply](Self::reply), while
    /// they are still alive.
    pub fn artifacts(&self) -> Option<&ReplyArtifacts> {
        self.artifacts.as_ref()
    }

    /// The service identity this acceptor is bound to, rendered during
    /// [init](Self::init), or `None` while uninitialized.
    pub fn service_principal(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.service_text.as_str())
    }
}

impl<E: Engine> fmt::Debug for ServiceAcceptor<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ServiceAcceptor")
            .field("service_name", &self.service_name)
            .field("service_host", &self.service_host)
            .field("detect_replay", &self.detect_replay)
            .field("initialized", &self.is_initialized())
            .field("ready", &self.is_ready())
            .field("last_code", &self.last_code)
            .finish()
    }
}

impl<E: Engine> Drop for ServiceAcceptor<E> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("engine teardown failed while dropping acceptor: {err}");
        }
    }
}
