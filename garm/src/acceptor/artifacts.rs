use std::fmt;

use garm_engine_traits::SessionKey;

/// Everything a successful [reply](super::ServiceAcceptor::reply) produces.
///
/// The acceptor owns the artifacts and keeps them alive until the next
/// `request`, `init`, or `cleanup`; callers that need them longer copy
/// the pieces out. Holding all three in one struct means a caller can
/// never observe a half-filled result.
pub struct ReplyArtifacts {
    pub(super) reply: Vec<u8>,
    pub(super) session_key: SessionKey,
    pub(super) client_principal: String,
}

impl ReplyArtifacts {
    /// The reply token to transmit back to the client, proving the
    /// service could read its token.
    pub fn reply(&self) -> &[u8] {
        &self.reply
    }

    /// The session key shared with the client after this exchange.
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// The client identity, rendered with the flags passed to `reply`.
    pub fn client_principal(&self) -> &str {
        &self.client_principal
    }
}

impl fmt::Debug for ReplyArtifacts {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ReplyArtifacts")
            .field("reply_len", &self.reply.len())
            .field("session_key", &self.session_key)
            .field("client_principal", &self.client_principal)
            .finish()
    }
}
