//! Telegram-facing adapters: the grammers client session plumbing and the
//! update dispatcher that wires every use case to incoming updates.

pub mod dispatcher;
pub mod session;

pub use dispatcher::{dispatch_callback, dispatch_message, AppState};
