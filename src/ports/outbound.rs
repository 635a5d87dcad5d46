//! Outbound ports. Application (use cases) calls into infrastructure.
//!
//! Implemented by adapters under `crate::adapters`.

use crate::domain::{BotError, DurationUnit, FileRecord, Folder, Plan, PremiumGrant, UserSettings};

/// A page of `listItems` results. Folders precede files within a page.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub folders: Vec<Folder>,
    pub files: Vec<FileRecord>,
    pub has_more: bool,
    pub folder_count: u32,
    pub file_count: u32,
    pub video_count: u32,
    pub pdf_count: u32,
}

/// Document store port (C1). All writes are asynchronous; every operation may
/// fail with `StoreUnavailable`, `NotFound`, or `Conflict`.
#[async_trait::async_trait]
pub trait StorePort: Send + Sync {
    async fn upsert_user(&self, id: i64, name: &str) -> Result<(), BotError>;
    async fn count_users(&self) -> Result<u64, BotError>;

    /// Get-or-create contract: returns the existing id for `(parent, name)` if
    /// present, otherwise creates an `auto_created` folder and returns the new id.
    async fn get_or_create_folder(
        &self,
        parent: &str,
        name: &str,
        source_channel: Option<i64>,
    ) -> Result<String, BotError>;

    async fn get_folder_with_parent(
        &self,
        id: &str,
    ) -> Result<(String, String, Option<i64>), BotError>;

    /// Folders marked `auto_created` whose `source_channel` matches, for C5's topic index.
    async fn list_auto_created_folders(&self, source_channel: i64) -> Result<Vec<Folder>, BotError>;

    /// Inserts the file if `(chat, hash)` is novel; a no-op duplicate returns `Ok(false)`.
    async fn add_file_if_novel(&self, file: FileRecord) -> Result<bool, BotError>;

    /// Files for `source_channel` that carry a `topic_folder_id`, for C5's topic index.
    async fn list_files_with_topic(&self, source_channel: i64) -> Result<Vec<FileRecord>, BotError>;

    async fn list_items(
        &self,
        parent: &str,
        source_channel: Option<i64>,
        page: u32,
        per_page: u32,
    ) -> Result<ItemPage, BotError>;

    async fn is_premium(&self, user_id: i64) -> Result<bool, BotError>;
    async fn add_premium(
        &self,
        user_id: i64,
        value: i64,
        unit: DurationUnit,
    ) -> Result<PremiumGrant, BotError>;
    async fn revoke_premium(&self, user_id: i64) -> Result<(), BotError>;
    async fn transfer_premium(&self, from: i64, to: i64) -> Result<PremiumGrant, BotError>;
    async fn list_premium(&self) -> Result<Vec<PremiumGrant>, BotError>;
    async fn count_premium(&self) -> Result<u64, BotError>;
    async fn get_premium(&self, user_id: i64) -> Result<Option<PremiumGrant>, BotError>;

    /// Atomically increments today's (UTC) usage counter and returns the new count.
    async fn increment_usage(&self, user_id: i64) -> Result<u32, BotError>;
    async fn usage_today(&self, user_id: i64) -> Result<u32, BotError>;

    async fn save_session(&self, user_id: i64, ciphertext: &str) -> Result<(), BotError>;
    async fn get_session(&self, user_id: i64) -> Result<Option<String>, BotError>;
    async fn delete_session(&self, user_id: i64) -> Result<bool, BotError>;

    async fn save_bot_token(&self, user_id: i64, ciphertext: &str) -> Result<(), BotError>;
    async fn get_bot_token(&self, user_id: i64) -> Result<Option<String>, BotError>;
    async fn delete_bot_token(&self, user_id: i64) -> Result<bool, BotError>;

    async fn get_settings(&self, user_id: i64) -> Result<UserSettings, BotError>;
    async fn update_setting(&self, user_id: i64, settings: UserSettings) -> Result<(), BotError>;
    async fn clear_settings(&self, user_id: i64) -> Result<(), BotError>;

    async fn get_plan(&self, key: &str) -> Result<Option<Plan>, BotError>;
    async fn list_plans(&self) -> Result<Vec<Plan>, BotError>;
    async fn upsert_plan(&self, plan: Plan) -> Result<(), BotError>;
    async fn delete_plan(&self, key: &str) -> Result<bool, BotError>;

    /// Deletes premium grants whose expiry has already passed. Used by the
    /// background TTL sweep and lazily inside `is_premium`/`get_premium`.
    async fn sweep_expired_premium(&self) -> Result<u64, BotError>;
}

/// Secret vault port (C2). AES-128-GCM with a PBKDF2-HMAC-SHA256 derived key.
pub trait VaultPort: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, BotError>;
    fn decrypt(&self, token: &str) -> Result<String, BotError>;
}

/// Typed subprocess wrappers around ffmpeg/ffprobe (Design Note §9 — never
/// mix stdout/stderr silently, never leave a failure unhandled).
#[async_trait::async_trait]
pub trait MediaToolsPort: Send + Sync {
    /// Probes media duration in seconds. Returns 0 on failure or timeout.
    async fn probe_duration(&self, source: &str) -> u64;

    /// Probes `(duration, width, height)`; defaults to `(0, 1, 1)` on failure.
    async fn video_metadata(&self, path: &std::path::Path) -> (u64, u32, u32);

    /// Extracts a first-frame thumbnail next to `path`. `None` on failure.
    async fn extract_thumbnail(&self, path: &std::path::Path) -> Option<std::path::PathBuf>;
}

/// Extracted external-URL media info (C14), the yt-dlp equivalent of a probe
/// result — everything the downloader needs to know before committing to a
/// download.
#[derive(Debug, Clone)]
pub struct ExtractedInfo {
    pub title: String,
    /// Best-effort size in bytes; `None` when the extractor can't predict it
    /// (e.g. an adaptive/live stream) ahead of the download.
    pub size: Option<u64>,
}

/// External URL downloader port (C14). Wraps yt-dlp invocation — itself out
/// of scope per the design's external-interface boundary — behind a typed
/// extract/download contract, the same way [`VoiceEnginePort`] wraps the
/// group-call transport.
#[async_trait::async_trait]
pub trait UrlExtractorPort: Send + Sync {
    /// Resolves `url` to title/size without downloading.
    async fn extract_info(&self, url: &str, audio_only: bool) -> Result<ExtractedInfo, BotError>;

    /// Downloads `url` into `dest_dir`, applying 320kbps mp3 post-processing
    /// when `audio_only`. Returns the final file path.
    async fn download(
        &self,
        url: &str,
        dest_dir: &std::path::Path,
        audio_only: bool,
    ) -> Result<std::path::PathBuf, BotError>;
}

/// Voice-chat streaming engine port (C11). Wraps the group-call transport
/// (join/leave/play) behind a typed interface, mirroring how the MTProto
/// client itself is treated as an external interface (§1 Non-goals) rather
/// than something this crate reimplements.
#[async_trait::async_trait]
pub trait VoiceEnginePort: Send + Sync {
    /// Joins the chat's group call if not already joined, then starts
    /// playback of `url` from `seek_secs`. Replaces any stream already
    /// playing in that call.
    async fn play(&self, chat_id: i64, url: &str, seek_secs: f64) -> Result<(), BotError>;

    /// Leaves the group call for `chat_id`, if joined.
    async fn leave(&self, chat_id: i64) -> Result<(), BotError>;

    async fn pause(&self, chat_id: i64) -> Result<(), BotError>;
    async fn resume(&self, chat_id: i64) -> Result<(), BotError>;
}
