use garm_engine_traits::{EngineContext, ErrorCode};
use thiserror::Error;

/// Errors surfaced by [ServiceAcceptor](super::ServiceAcceptor).
///
/// The first three variants are precondition violations with fixed
/// wording; they are generated locally and never pass through the
/// engine. [Engine](Self::Engine) carries the engine's own code together
/// with the text rendered for it at the failure site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcceptorError {
    #[error("not initialized yet, invoke ServiceAcceptor::init")]
    NotInitialized,
    #[error("not ready to process reply, invoke ServiceAcceptor::request")]
    NotReady,
    #[error("possible extraneous invocation of ServiceAcceptor::reply")]
    ExtraneousReply,
    #[error("{message}")]
    Engine { code: ErrorCode, message: String },
}

impl AcceptorError {
    /// The numeric code for this error. Precondition violations report
    /// [ErrorCode::INVALID_ARGUMENT].
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized | Self::NotReady | Self::ExtraneousReply => {
                ErrorCode::INVALID_ARGUMENT
            }
            Self::Engine { code, .. } => *code,
        }
    }

    /// Wrap an engine failure, rendering its message immediately.
    ///
    /// Rendering happens here, while the context that produced the code
    /// is still alive; the resulting error owns its text and stays
    /// printable after the context is gone.
    pub(crate) fn engine<C: EngineContext>(ctx: Option<&mut C>, code: ErrorCode) -> Self {
        Self::Engine {
            code,
            message: describe_error(ctx, code),
        }
    }
}

/// Render an engine error code to human-readable text.
///
/// Code `0` renders as the empty string. A non-zero code without a live
/// engine context renders as a fixed fallback, as does a code the engine
/// has no text for.
pub fn describe_error<C: EngineContext>(ctx: Option<&mut C>, code: ErrorCode) -> String {
    if code.is_ok() {
        return String::new();
    }
    let Some(ctx) = ctx else {
        return "no security context".to_string();
    };
    match ctx.error_message(code) {
        Some(message) if !message.is_empty() => message,
        _ => "unspecified security error".to_string(),
    }
}
