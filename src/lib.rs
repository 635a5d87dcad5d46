//! tg-sync: multi-tenant Telegram content-gateway bot, built hexagonally —
//! use cases in [`usecases`] depend only on [`ports`], adapters in
//! [`adapters`] implement those ports and own all Telegram/SQLite/subprocess
//! plumbing.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
