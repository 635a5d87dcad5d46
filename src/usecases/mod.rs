//! Application use cases. Orchestrate domain logic via ports.

pub mod batch_pipeline;
pub mod browser;
pub mod channel_indexer;
pub mod conversation_state;
pub mod folder_tree;
pub mod index_renderer;
pub mod payment;
pub mod quota;
pub mod session_registry;
pub mod topic_parser;
pub mod url_downloader;
pub mod vc_controller;

pub use batch_pipeline::{BatchRunner, BatchSummary, ParsedLink};
pub use browser::{CallbackAction, ITEMS_PER_PAGE};
pub use channel_indexer::ChannelIndexer;
pub use conversation_state::{ConversationRegistry, LinkKind, Step};
pub use folder_tree::FolderTreeService;
pub use payment::PaymentService;
pub use quota::QuotaService;
pub use session_registry::SessionRegistry;
pub use url_downloader::UrlDownloadService;
pub use vc_controller::{StreamSource, VcController};
