//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these; command handlers map these
//! into user-facing replies per the policy table in the design docs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Telegram gateway error: {0}")]
    TgGateway(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid duration unit")]
    InvalidUnit,

    #[error("invalid link")]
    InvalidLink,

    #[error("not authorized")]
    NotAuthorized,

    #[error("subscription required")]
    SubscriptionRequired,

    #[error("daily limit reached")]
    DailyLimitReached,

    #[error("no user session — use /login")]
    NoUserSession,

    #[error("no user bot — use /setbot")]
    NoUserBot,

    #[error("file reference expired")]
    FileReferenceExpired,

    /// Caller should sleep for `seconds` and retry.
    #[error("FloodWait: retry after {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("voice chat not found — start it first")]
    GroupCallNotFound,

    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("subprocess failed: {0}")]
    Process(String),

    #[error("{0}")]
    Other(String),
}
