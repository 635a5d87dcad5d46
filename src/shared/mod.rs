//! Cross-cutting concerns shared by use cases and adapters: configuration.

pub mod config;

pub use config::AppConfig;
