//! Port traits: outbound API boundaries between use cases and infrastructure.
//!
//! There is no inbound port in this crate — the dispatcher (adapters::telegram)
//! is the sole caller into use cases and wires them directly.

pub mod outbound;

pub use outbound::{
    ExtractedInfo, ItemPage, MediaToolsPort, StorePort, UrlExtractorPort, VaultPort, VoiceEnginePort,
};
