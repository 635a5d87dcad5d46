//! Infrastructure adapters. Implement outbound ports.
//!
//! Telegram, persistence, external tools. Map errors to BotError.

pub mod persistence;
pub mod telegram;
pub mod tools;
