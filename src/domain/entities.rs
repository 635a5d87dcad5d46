//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here — adapters map protocol types into these.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a Telegram chat (user, group, or channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    User,
    Group,
    Supergroup,
    Channel,
}

/// Reference to a piece of media sighted in a channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaReference {
    pub message_id: i32,
    pub chat_id: i64,
    pub media_type: MediaType,
    /// Opaque handle for the adapter to resolve (e.g. file reference, input location).
    pub opaque_ref: String,
    pub file_name: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Other,
}

/// Sentinel parent id for top-level folders.
pub const ROOT_FOLDER: &str = "root";

/// A folder node in the topic-hierarchy forest. Rooted at `ROOT_FOLDER`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub source_channel: Option<i64>,
    pub auto_created: bool,
}

/// A single indexed file, unique per `(chat_id, hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub chat_id: i64,
    pub msg_id: i32,
    pub hash: String,
    pub name: String,
    pub size: u64,
    pub mime: MimeClass,
    pub topic_folder_id: Option<String>,
}

/// Coarse MIME classification used to pick an icon and an upload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeClass {
    Video,
    Audio,
    Photo,
    Pdf,
    Document,
}

impl MimeClass {
    /// Icon used by the browser/index renderer.
    pub fn icon(self) -> &'static str {
        match self {
            MimeClass::Video => "🎬",
            MimeClass::Pdf => "📕",
            _ => "📄",
        }
    }

    /// Classify by lowercased file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "mkv" | "avi" | "mov" | "wmv" | "flv" | "webm" | "m4v" | "3gp" => {
                MimeClass::Video
            }
            "mp3" | "wav" | "flac" | "aac" | "ogg" | "wma" | "m4a" | "opus" => MimeClass::Audio,
            "jpg" | "jpeg" | "png" | "webp" => MimeClass::Photo,
            "pdf" => MimeClass::Pdf,
            _ => MimeClass::Document,
        }
    }
}

/// A bot end user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub joined_at: i64,
    pub last_seen_at: i64,
}

/// Premium subscription grant. A user is premium iff `expiry` is strictly in the future.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumGrant {
    pub user_id: i64,
    pub expiry: i64,
    pub granted_at: i64,
    pub transferred_from: Option<i64>,
}

/// Duration unit accepted by `/add` and plan definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Min,
    Hours,
    Days,
    Weeks,
    Month,
    Year,
    Decades,
}

impl DurationUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "min" | "mins" | "minute" | "minutes" => Some(Self::Min),
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            "month" | "months" => Some(Self::Month),
            "year" | "years" => Some(Self::Year),
            "decade" | "decades" => Some(Self::Decades),
            _ => None,
        }
    }

    /// Converts `(value, unit)` into seconds using the fixed calendar-approximation map.
    pub fn to_seconds(self, value: i64) -> i64 {
        let unit_secs = match self {
            DurationUnit::Min => 60,
            DurationUnit::Hours => 3_600,
            DurationUnit::Days => 86_400,
            DurationUnit::Weeks => 7 * 86_400,
            DurationUnit::Month => 30 * 86_400,
            DurationUnit::Year => 365 * 86_400,
            DurationUnit::Decades => 3650 * 86_400,
        };
        value * unit_secs
    }
}

/// Daily message-processing usage counter. Key is `userId_YYYY-MM-DD` (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUsage {
    pub key: String,
    pub count: u32,
}

/// Per-user customization applied by the batch pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub chat_id: Option<String>,
    pub rename_tag: Option<String>,
    pub caption: Option<String>,
    pub replacements: HashMap<String, String>,
    pub delete_words: Vec<String>,
    pub thumbnail_path: Option<String>,
}

impl UserSettings {
    /// Splits `chat_id` of the form `"chat/topic"` into `(chat, Some(topic))`.
    pub fn destination(&self) -> Option<(String, Option<i32>)> {
        let raw = self.chat_id.as_ref()?;
        match raw.split_once('/') {
            Some((chat, topic)) => Some((chat.to_string(), topic.parse().ok())),
            None => Some((raw.clone(), None)),
        }
    }
}

/// Per-user encrypted credentials. Plaintext never persists — see the secret vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSecret {
    pub user_id: i64,
    pub session_ciphertext: Option<String>,
    pub bot_token_ciphertext: Option<String>,
    pub updated_at: i64,
}

/// A purchasable premium plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub key: String,
    pub label: String,
    pub duration_value: i64,
    pub duration_unit: DurationUnit,
    /// Currency-agnostic price string (Telegram Stars count, rendered as text).
    pub price: String,
}

/// Durable mirror of an in-progress `/batch` run, written to `active_users.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveBatch {
    pub user_id: i64,
    pub total: u32,
    pub current: u32,
    pub success: u32,
    pub cancel_requested: bool,
}

/// In-memory VC playback state. Never persisted.
#[derive(Debug, Clone)]
pub struct VcStreamState {
    pub chat_id: i64,
    pub url: String,
    pub title: String,
    /// Wall-clock instant the current playback segment began (seek/resume reset this).
    pub started_at: std::time::Instant,
    pub seek_offset_secs: f64,
    pub paused: bool,
    pub pause_started_at: Option<std::time::Instant>,
    pub source_msg_id: i32,
    pub source_chat_id: i64,
    pub folder_id: Option<String>,
    pub hash: String,
    /// Probed duration in seconds; 0 when ffprobe failed or timed out.
    pub duration_secs: u64,
}

/// Link-type distinguishing public `t.me/<username>` links from private `t.me/c/<id>` links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Public,
    Private,
}
