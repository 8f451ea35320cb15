//! In-memory realm and protocol engine for tests and examples.
//!
//! [MemoryRealm] plays the part of a tiny key-distribution center: it
//! provisions service keys into named keytab locations, issues client
//! tokens, and backs replay caches shared by every engine context it
//! hands out. Tokens are postcard-encoded records sealed with a keyed
//! BLAKE2b MAC; real ticket encryption is out of scope here, the point
//! is to exercise the acceptor's state machine against an engine with
//! honest failure modes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, ensure};
use blake2::digest::consts::U32;
use blake2::digest::{InvalidLength, Mac};
use blake2::Blake2bMac;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use garm_engine_traits::{
    Authenticator, Engine, EngineContext, EngineResult, ErrorCode, ExchangeFlags, SessionKey,
    UnparseFlags,
};

type TokenMac = Blake2bMac<U32>;
type SharedSeen = Arc<Mutex<HashSet<[u8; 32]>>>;

/// Maximum accepted distance between a token timestamp and the local
/// clock, in seconds. Matches the customary Kerberos default.
pub const MAX_CLOCK_SKEW_SECS: u64 = 300;

/// Seconds since the unix epoch, for building tokens with a chosen age.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

/// An identity in the test realm: name components plus a realm.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryPrincipal {
    pub components: Vec<String>,
    pub realm: String,
}

impl MemoryPrincipal {
    pub fn user(name: &str, realm: &str) -> Self {
        Self {
            components: vec![name.to_owned()],
            realm: realm.to_owned(),
        }
    }

    pub fn service(service: &str, host: &str, realm: &str) -> Self {
        Self {
            components: vec![service.to_owned(), host.to_owned()],
            realm: realm.to_owned(),
        }
    }

    /// Render to text. Special characters are backslash-quoted unless
    /// the display form is requested.
    fn render(&self, flags: UnparseFlags, default_realm: &str) -> String {
        let display = flags.contains(UnparseFlags::DISPLAY);
        let mut out = String::new();
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            push_component(&mut out, component, display);
        }
        if flags.contains(UnparseFlags::NO_REALM)
            || (flags.contains(UnparseFlags::SHORT) && self.realm == default_realm)
        {
            return out;
        }
        out.push('@');
        push_component(&mut out, &self.realm, display);
        out
    }
}

fn push_component(out: &mut String, component: &str, display: bool) {
    for ch in component.chars() {
        if !display && matches!(ch, '/' | '@' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// A client token or reply token on the wire: an encoded body plus a
/// BLAKE2b MAC over it.
#[derive(Serialize, Deserialize)]
struct SealedMessage {
    body: Vec<u8>,
    tag: [u8; 32],
}

/// Body of a client token, sealed under the service's keytab key.
#[derive(Serialize, Deserialize)]
struct TokenBody {
    client: MemoryPrincipal,
    service: MemoryPrincipal,
    session_key: [u8; 32],
    timestamp: u64,
    nonce: [u8; 16],
}

/// Body of a reply token, sealed under the session key.
#[derive(Serialize, Deserialize)]
struct ReplyBody {
    nonce: [u8; 16],
    timestamp: u64,
}

fn seal(key: &[u8], body: &[u8]) -> Result<[u8; 32], InvalidLength> {
    let mut mac = TokenMac::new_from_slice(key)?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().into())
}

fn verify_seal(key: &[u8], body: &[u8], tag: &[u8; 32]) -> Result<(), ErrorCode> {
    let Ok(mut mac) = TokenMac::new_from_slice(key) else {
        return Err(MemoryEngine::ERR_BAD_INTEGRITY);
    };
    mac.update(body);
    mac.verify_slice(tag)
        .map_err(|_| MemoryEngine::ERR_BAD_INTEGRITY)
}

/// What a client walks away with after asking the realm for a token.
pub struct IssuedToken {
    pub token: Vec<u8>,
    pub session_key: [u8; 32],
    pub nonce: [u8; 16],
}

struct RealmInner {
    realm: String,
    keytabs: HashMap<String, HashMap<MemoryPrincipal, [u8; 32]>>,
    replay_caches: HashMap<String, SharedSeen>,
    contexts_opened: usize,
    open_error: Option<ErrorCode>,
    keytab_close_error: Option<ErrorCode>,
    exchange_free_error: Option<ErrorCode>,
    withhold_client_identity: bool,
}

/// A miniature realm shared by clients, engines, and assertions.
///
/// Cloning yields another handle to the same realm.
#[derive(Clone)]
pub struct MemoryRealm {
    inner: Arc<Mutex<RealmInner>>,
}

impl MemoryRealm {
    /// Location used when an acceptor asks for the default keytab.
    pub const DEFAULT_KEYTAB_LOCATION: &'static str = "MEMORY:default";

    /// Host name the engine substitutes when no explicit host is given.
    pub const LOCAL_HOST: &'static str = "localhost.garm.test";

    pub fn new(realm: &str) -> Self {
        let mut keytabs = HashMap::new();
        keytabs.insert(Self::DEFAULT_KEYTAB_LOCATION.to_owned(), HashMap::new());
        Self {
            inner: Arc::new(Mutex::new(RealmInner {
                realm: realm.to_owned(),
                keytabs,
                replay_caches: HashMap::new(),
                contexts_opened: 0,
                open_error: None,
                keytab_close_error: None,
                exchange_free_error: None,
                withhold_client_identity: false,
            })),
        }
    }

    /// An engine handle backed by this realm.
    pub fn engine(&self) -> MemoryEngine {
        MemoryEngine {
            realm: Arc::clone(&self.inner),
        }
    }

    /// Generate a key for `service/host` and store it in the default
    /// keytab location.
    pub fn provision_service(&self, service: &str, host: &str) -> MemoryPrincipal {
        self.provision_service_at(Self::DEFAULT_KEYTAB_LOCATION, service, host)
    }

    /// Generate a key for `service/host` and store it at an explicit
    /// keytab location.
    pub fn provision_service_at(
        &self,
        location: &str,
        service: &str,
        host: &str,
    ) -> MemoryPrincipal {
        let mut inner = self.inner.lock().unwrap();
        let principal = MemoryPrincipal::service(service, host, &inner.realm);
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        inner
            .keytabs
            .entry(location.to_owned())
            .or_default()
            .insert(principal.clone(), key);
        principal
    }

    /// Issue a fresh client token for `service`, stamped with the
    /// current time.
    pub fn issue_token(
        &self,
        client: &MemoryPrincipal,
        service: &MemoryPrincipal,
    ) -> anyhow::Result<IssuedToken> {
        self.issue_token_at(client, service, unix_now())
    }

    /// Issue a client token carrying an explicit timestamp.
    pub fn issue_token_at(
        &self,
        client: &MemoryPrincipal,
        service: &MemoryPrincipal,
        timestamp: u64,
    ) -> anyhow::Result<IssuedToken> {
        let key = {
            let inner = self.inner.lock().unwrap();
            let Some(key) = inner.keytabs.values().find_map(|keys| keys.get(service)) else {
                bail!("service {service:?} has no provisioned key");
            };
            *key
        };
        let mut session_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut session_key);
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let body = postcard::to_allocvec(&TokenBody {
            client: client.clone(),
            service: service.clone(),
            session_key,
            timestamp,
            nonce,
        })?;
        let tag = seal(&key, &body)?;
        let token = postcard::to_allocvec(&SealedMessage { body, tag })?;
        Ok(IssuedToken {
            token,
            session_key,
            nonce,
        })
    }

    /// Client-side check of a reply token: authenticates the service by
    /// verifying the seal under the session key and matching the nonce.
    pub fn verify_reply(issued: &IssuedToken, reply: &[u8]) -> anyhow::Result<()> {
        let sealed: SealedMessage = postcard::from_bytes(reply)?;
        let mut mac = TokenMac::new_from_slice(&issued.session_key)?;
        mac.update(&sealed.body);
        ensure!(
            mac.verify_slice(&sealed.tag).is_ok(),
            "reply fails the integrity check under the session key"
        );
        let body: ReplyBody = postcard::from_bytes(&sealed.body)?;
        ensure!(
            body.nonce == issued.nonce,
            "reply does not answer this client's token"
        );
        Ok(())
    }

    /// Make the next context open fail with `code`.
    pub fn fail_next_open(&self, code: ErrorCode) {
        self.inner.lock().unwrap().open_error = Some(code);
    }

    /// Make the next keytab close fail with `code`.
    pub fn fail_next_keytab_close(&self, code: ErrorCode) {
        self.inner.lock().unwrap().keytab_close_error = Some(code);
    }

    /// Make the next exchange teardown fail with `code`.
    pub fn fail_next_exchange_free(&self, code: ErrorCode) {
        self.inner.lock().unwrap().exchange_free_error = Some(code);
    }

    /// When set, validation succeeds but the authenticator carries no
    /// client identity.
    pub fn withhold_client_identity(&self, withhold: bool) {
        self.inner.lock().unwrap().withhold_client_identity = withhold;
    }

    /// How many engine contexts have been opened against this realm.
    pub fn contexts_opened(&self) -> usize {
        self.inner.lock().unwrap().contexts_opened
    }

    /// How many tokens the replay cache for `tag` has recorded.
    pub fn recorded_tokens(&self, tag: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .replay_caches
            .get(tag)
            .map(|seen| seen.lock().unwrap().len())
            .unwrap_or(0)
    }
}

/// Engine handle handed to a [ServiceAcceptor](crate::acceptor::ServiceAcceptor).
#[derive(Clone)]
pub struct MemoryEngine {
    realm: Arc<Mutex<RealmInner>>,
}

impl MemoryEngine {
    pub const ERR_REALM_DOWN: ErrorCode = ErrorCode(-7301);
    pub const ERR_NO_SUCH_KEYTAB: ErrorCode = ErrorCode(-7302);
    pub const ERR_NO_KEYTAB_ENTRY: ErrorCode = ErrorCode(-7303);
    pub const ERR_BAD_TOKEN: ErrorCode = ErrorCode(-7304);
    pub const ERR_BAD_INTEGRITY: ErrorCode = ErrorCode(-7305);
    pub const ERR_WRONG_PRINCIPAL: ErrorCode = ErrorCode(-7306);
    pub const ERR_CLOCK_SKEW: ErrorCode = ErrorCode(-7307);
    pub const ERR_REPLAY: ErrorCode = ErrorCode(-7308);
    pub const ERR_NOT_VALIDATED: ErrorCode = ErrorCode(-7309);
    pub const ERR_ENCODING: ErrorCode = ErrorCode(-7310);
    pub const ERR_KEYTAB_CLOSE: ErrorCode = ErrorCode(-7311);
    pub const ERR_EXCHANGE_TEARDOWN: ErrorCode = ErrorCode(-7312);
}

impl Engine for MemoryEngine {
    type Context = MemoryContext;

    fn open(&self) -> EngineResult<MemoryContext> {
        let mut inner = self.realm.lock().unwrap();
        if let Some(code) = inner.open_error.take() {
            return Err(code);
        }
        inner.contexts_opened += 1;
        Ok(MemoryContext {
            realm: Arc::clone(&self.realm),
        })
    }
}

/// One engine context, holding a handle back to its realm.
pub struct MemoryContext {
    realm: Arc<Mutex<RealmInner>>,
}

/// Keytab handle: just a named location inside the realm.
pub struct MemoryKeytab {
    location: String,
}

/// Per-connection exchange state.
pub struct MemoryExchange {
    flags: ExchangeFlags,
    replay_cache: Option<MemoryReplayCache>,
    session_key: Option<[u8; 32]>,
    client: Option<MemoryPrincipal>,
    nonce: Option<[u8; 16]>,
    validated: bool,
}

/// Replay cache handle; clones share the same set of seen tokens.
#[derive(Clone)]
pub struct MemoryReplayCache {
    seen: SharedSeen,
}

/// The client-supplied record recovered during validation.
pub struct MemoryAuthenticator {
    client: Option<MemoryPrincipal>,
}

impl Authenticator for MemoryAuthenticator {
    type Principal = MemoryPrincipal;

    fn client(&self) -> Option<&MemoryPrincipal> {
        self.client.as_ref()
    }
}

impl EngineContext for MemoryContext {
    type Principal = MemoryPrincipal;
    type Keytab = MemoryKeytab;
    type Exchange = MemoryExchange;
    type ReplayCache = MemoryReplayCache;
    type Authenticator = MemoryAuthenticator;

    fn resolve_service_principal(
        &mut self,
        host: Option<&str>,
        service: &str,
    ) -> EngineResult<MemoryPrincipal> {
        let inner = self.realm.lock().unwrap();
        let host = host.unwrap_or(MemoryRealm::LOCAL_HOST);
        Ok(MemoryPrincipal::service(service, host, &inner.realm))
    }

    fn principal_component<'a>(
        &self,
        principal: &'a MemoryPrincipal,
        index: usize,
    ) -> Option<&'a str> {
        principal.components.get(index).map(String::as_str)
    }

    fn free_principal(&mut self, principal: MemoryPrincipal) {
        // Nothing realm-side to release.
        drop(principal);
    }

    fn default_keytab(&mut self) -> EngineResult<MemoryKeytab> {
        self.resolve_keytab(MemoryRealm::DEFAULT_KEYTAB_LOCATION)
    }

    fn resolve_keytab(&mut self, location: &str) -> EngineResult<MemoryKeytab> {
        let inner = self.realm.lock().unwrap();
        if !inner.keytabs.contains_key(location) {
            return Err(MemoryEngine::ERR_NO_SUCH_KEYTAB);
        }
        Ok(MemoryKeytab {
            location: location.to_owned(),
        })
    }

    fn close_keytab(&mut self, keytab: MemoryKeytab) -> EngineResult<()> {
        drop(keytab);
        let mut inner = self.realm.lock().unwrap();
        match inner.keytab_close_error.take() {
            None => Ok(()),
            Some(code) => Err(code),
        }
    }

    fn new_exchange(&mut self) -> EngineResult<MemoryExchange> {
        Ok(MemoryExchange {
            flags: ExchangeFlags::TIME_CHECK | ExchangeFlags::RETURN_TIME,
            replay_cache: None,
            session_key: None,
            client: None,
            nonce: None,
            validated: false,
        })
    }

    fn exchange_flags(&mut self, exchange: &MemoryExchange) -> EngineResult<ExchangeFlags> {
        Ok(exchange.flags)
    }

    fn set_exchange_flags(
        &mut self,
        exchange: &mut MemoryExchange,
        flags: ExchangeFlags,
    ) -> EngineResult<()> {
        exchange.flags = flags;
        Ok(())
    }

    fn resolve_replay_cache(&mut self, tag: &str) -> EngineResult<MemoryReplayCache> {
        let mut inner = self.realm.lock().unwrap();
        let seen = inner.replay_caches.entry(tag.to_owned()).or_default().clone();
        Ok(MemoryReplayCache { seen })
    }

    fn bind_replay_cache(
        &mut self,
        exchange: &mut MemoryExchange,
        cache: &MemoryReplayCache,
    ) -> EngineResult<()> {
        exchange.replay_cache = Some(cache.clone());
        Ok(())
    }

    fn free_exchange(&mut self, exchange: MemoryExchange) -> EngineResult<()> {
        drop(exchange);
        let mut inner = self.realm.lock().unwrap();
        match inner.exchange_free_error.take() {
            None => Ok(()),
            Some(code) => Err(code),
        }
    }

    fn validate_token(
        &mut self,
        exchange: &mut MemoryExchange,
        token: &[u8],
        service: &MemoryPrincipal,
        keytab: &MemoryKeytab,
    ) -> EngineResult<()> {
        let sealed: SealedMessage =
            postcard::from_bytes(token).map_err(|_| MemoryEngine::ERR_BAD_TOKEN)?;
        let body: TokenBody =
            postcard::from_bytes(&sealed.body).map_err(|_| MemoryEngine::ERR_BAD_TOKEN)?;
        // The seal is keyed by the service the token names, so the key
        // lookup goes by the token body; the identity match comes after
        // the seal has checked out.
        let (key, withhold) = {
            let inner = self.realm.lock().unwrap();
            let Some(keys) = inner.keytabs.get(&keytab.location) else {
                return Err(MemoryEngine::ERR_NO_SUCH_KEYTAB);
            };
            let Some(key) = keys.get(&body.service) else {
                return Err(MemoryEngine::ERR_NO_KEYTAB_ENTRY);
            };
            (*key, inner.withhold_client_identity)
        };
        verify_seal(&key, &sealed.body, &sealed.tag)?;
        if body.service != *service {
            return Err(MemoryEngine::ERR_WRONG_PRINCIPAL);
        }
        if exchange.flags.contains(ExchangeFlags::TIME_CHECK)
            && unix_now().abs_diff(body.timestamp) > MAX_CLOCK_SKEW_SECS
        {
            return Err(MemoryEngine::ERR_CLOCK_SKEW);
        }
        if let Some(cache) = exchange.replay_cache.as_ref() {
            let mut seen = cache.seen.lock().unwrap();
            if !seen.insert(sealed.tag) {
                return Err(MemoryEngine::ERR_REPLAY);
            }
        }
        exchange.session_key = Some(body.session_key);
        exchange.nonce = Some(body.nonce);
        exchange.client = (!withhold).then_some(body.client);
        exchange.validated = true;
        Ok(())
    }

    fn build_reply(&mut self, exchange: &mut MemoryExchange) -> EngineResult<Vec<u8>> {
        let (Some(session_key), Some(nonce)) = (exchange.session_key, exchange.nonce) else {
            return Err(MemoryEngine::ERR_NOT_VALIDATED);
        };
        let body = postcard::to_allocvec(&ReplyBody {
            nonce,
            timestamp: unix_now(),
        })
        .map_err(|_| MemoryEngine::ERR_ENCODING)?;
        let tag = seal(&session_key, &body).map_err(|_| MemoryEngine::ERR_ENCODING)?;
        postcard::to_allocvec(&SealedMessage { body, tag }).map_err(|_| MemoryEngine::ERR_ENCODING)
    }

    fn session_key(&mut self, exchange: &MemoryExchange) -> EngineResult<SessionKey> {
        match exchange.session_key.as_ref() {
            Some(key) => Ok(SessionKey::from_slice(key)),
            None => Err(MemoryEngine::ERR_NOT_VALIDATED),
        }
    }

    fn authenticator(&mut self, exchange: &MemoryExchange) -> EngineResult<MemoryAuthenticator> {
        if !exchange.validated {
            return Err(MemoryEngine::ERR_NOT_VALIDATED);
        }
        Ok(MemoryAuthenticator {
            client: exchange.client.clone(),
        })
    }

    fn unparse_principal(
        &mut self,
        principal: &MemoryPrincipal,
        flags: UnparseFlags,
    ) -> EngineResult<String> {
        let inner = self.realm.lock().unwrap();
        Ok(principal.render(flags, &inner.realm))
    }

    fn error_message(&mut self, code: ErrorCode) -> Option<String> {
        let text = match code {
            MemoryEngine::ERR_REALM_DOWN => "realm is refusing new contexts",
            MemoryEngine::ERR_NO_SUCH_KEYTAB => "no key-material store at the given location",
            MemoryEngine::ERR_NO_KEYTAB_ENTRY => "keytab holds no key for the service principal",
            MemoryEngine::ERR_BAD_TOKEN => "token is not decodable",
            MemoryEngine::ERR_BAD_INTEGRITY => "token integrity check failed",
            MemoryEngine::ERR_WRONG_PRINCIPAL => "token was issued for a different service",
            MemoryEngine::ERR_CLOCK_SKEW => "token timestamp outside the permitted clock skew",
            MemoryEngine::ERR_REPLAY => "token was already presented to this service",
            MemoryEngine::ERR_NOT_VALIDATED => "exchange has not validated a token",
            MemoryEngine::ERR_ENCODING => "token encoding failed",
            MemoryEngine::ERR_KEYTAB_CLOSE => "key-material store failed to close",
            MemoryEngine::ERR_EXCHANGE_TEARDOWN => "exchange teardown failed",
            _ => return None,
        };
        Some(text.to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(principal: &MemoryPrincipal, flags: UnparseFlags) -> String {
        principal.render(flags, "GARM.TEST")
    }

    #[test]
    fn principal_rendering_forms() {
        let local = MemoryPrincipal::user("alice", "GARM.TEST");
        let foreign = MemoryPrincipal::user("bob", "OTHER.TEST");

        assert_eq!(render(&local, UnparseFlags::empty()), "alice@GARM.TEST");
        assert_eq!(render(&local, UnparseFlags::SHORT), "alice");
        assert_eq!(render(&foreign, UnparseFlags::SHORT), "bob@OTHER.TEST");
        assert_eq!(render(&foreign, UnparseFlags::NO_REALM), "bob");
    }

    #[test]
    fn principal_rendering_quotes_special_characters() {
        let odd = MemoryPrincipal::user("tab@home", "GARM.TEST");
        assert_eq!(render(&odd, UnparseFlags::empty()), "tab\\@home@GARM.TEST");
        assert_eq!(render(&odd, UnparseFlags::DISPLAY), "tab@home@GARM.TEST");

        let svc = MemoryPrincipal::service("kfs", "a/b", "GARM.TEST");
        assert_eq!(render(&svc, UnparseFlags::NO_REALM), "kfs/a\\/b");
    }

    #[test]
    fn issued_tokens_survive_seal_verification() {
        let realm = MemoryRealm::new("GARM.TEST");
        let service = realm.provision_service("kfs", "meta.garm.test");
        let client = MemoryPrincipal::user("alice", "GARM.TEST");
        let issued = realm.issue_token(&client, &service).unwrap();

        let key = *realm.inner.lock().unwrap().keytabs[MemoryRealm::DEFAULT_KEYTAB_LOCATION]
            .get(&service)
            .unwrap();
        let sealed: SealedMessage = postcard::from_bytes(&issued.token).unwrap();
        verify_seal(&key, &sealed.body, &sealed.tag).unwrap();

        let body: TokenBody = postcard::from_bytes(&sealed.body).unwrap();
        assert_eq!(body.client, client);
        assert_eq!(body.service, service);
        assert_eq!(body.session_key, issued.session_key);
        assert_eq!(body.nonce, issued.nonce);
    }

    #[test]
    fn issue_token_requires_provisioned_service() {
        let realm = MemoryRealm::new("GARM.TEST");
        let client = MemoryPrincipal::user("alice", "GARM.TEST");
        let ghost = MemoryPrincipal::service("ghost", "nowhere", "GARM.TEST");
        assert!(realm.issue_token(&client, &ghost).is_err());
    }
}
