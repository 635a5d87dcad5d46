//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;

pub use entities::{
    ActiveBatch, Chat, ChatType, DailyUsage, DurationUnit, FileRecord, Folder, LinkType,
    MediaReference, MediaType, MimeClass, Plan, PremiumGrant, User, UserSecret, UserSettings,
    VcStreamState, ROOT_FOLDER,
};
pub use errors::BotError;
