//! Batch Download Pipeline (C10): per-user strictly-sequential download →
//! transform → upload worker, driven by the conversation-state machine in
//! [`crate::usecases::conversation_state`] and mirrored durably via
//! [`crate::adapters::persistence::state_json::ActiveBatchMirror`] so the
//! index/success counters survive a process restart (the run itself does
//! not resume — the user re-issues `/batch`).
//!
//! Talks to Telegram directly through the `grammers_client::Client` handles
//! [`crate::usecases::session_registry::SessionRegistry`] hands out, the same
//! way that registry already steps outside strict port boundaries to manage
//! connections — introducing a dedicated transport port here would just be
//! one more trait wrapping the same four `Client` calls the old
//! `GrammersTgGateway` made (`get_messages_by_id`, `download_media`,
//! `upload_file`, `send_message`).

use crate::adapters::persistence::ActiveBatchMirror;
use crate::domain::{ActiveBatch, BotError, LinkType, MimeClass, UserSettings};
use crate::ports::{MediaToolsPort, StorePort};
use crate::usecases::quota::QuotaService;
use crate::usecases::session_registry::SessionRegistry;
use grammers_client::types::{Attribute, InputMessage, Media, Uploaded};
use grammers_client::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::warn;

/// A parsed `/batch` or `/single` link, see [`parse_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub chat: String,
    pub msg_id: i32,
    pub kind: LinkType,
}

/// Accepts `https://t.me/c/<intChat>/[topicId/]<msgId>` (private) and
/// `https://t.me/<username>/[topicId/]<msgId>` (public), mirroring the
/// original's `E()` regex pair — including the optional topic-id segment
/// between chat and message id that a plain `t.me/<chat>/<msg>` link omits.
pub fn parse_link(url: &str) -> Option<ParsedLink> {
    use std::sync::LazyLock;
    static PRIVATE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^https://t\.me/c/(\d+)/(?:\d+/)?(\d+)").unwrap()
    });
    static PUBLIC_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^https://t\.me/([^/]+)/(?:\d+/)?(\d+)").unwrap()
    });

    if let Some(caps) = PRIVATE_RE.captures(url) {
        let chat = format!("-100{}", &caps[1]);
        let msg_id: i32 = caps[2].parse().ok()?;
        return Some(ParsedLink { chat, msg_id, kind: LinkType::Private });
    }
    if let Some(caps) = PUBLIC_RE.captures(url) {
        let chat = caps[1].to_string();
        let msg_id: i32 = caps[2].parse().ok()?;
        return Some(ParsedLink { chat, msg_id, kind: LinkType::Public });
    }
    None
}

/// Strips the characters Windows/Unix both dislike plus the apostrophe, and
/// caps length at 255 so a derived name never breaks `rename`/upload.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if r#"<>:"/\|?*'"#.contains(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() > 255 {
        cleaned.chars().take(255).collect()
    } else {
        cleaned.to_string()
    }
}

fn apply_replacements(text: &str, replacements: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (word, replacement) in replacements {
        out = out.replace(word.as_str(), replacement.as_str());
    }
    out
}

fn apply_delete_words(text: &str, delete_words: &[String]) -> String {
    if delete_words.is_empty() {
        return text.to_string();
    }
    text.split_whitespace()
        .filter(|w| !delete_words.iter().any(|d| d == w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Caption transform: apply-replacements then apply-delete-words to the
/// original caption, concatenated with the user's own caption when both
/// exist.
pub fn build_caption(original: Option<&str>, settings: &UserSettings) -> String {
    let base = match original {
        Some(text) if !text.is_empty() => {
            let replaced = apply_replacements(text, &settings.replacements);
            apply_delete_words(&replaced, &settings.delete_words)
        }
        _ => String::new(),
    };
    match (&base, settings.caption.as_deref()) {
        (b, Some(user_caption)) if !b.is_empty() && !user_caption.is_empty() => {
            format!("{base}\n\n{user_caption}")
        }
        (b, Some(user_caption)) if b.is_empty() && !user_caption.is_empty() => user_caption.to_string(),
        _ => base,
    }
}

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp"];

/// Rename transform: sanitize, split the recognised extension off (forcing
/// video-like extensions to `mp4`, defaulting to `mp4` when no sane
/// extension is present), apply delete-words/replacements to the stem, then
/// append the user's rename tag before the extension.
pub fn rename_for_upload(original_name: &str, settings: &UserSettings) -> String {
    let sanitized = sanitize_filename(original_name);
    let (stem, ext) = match sanitized.rfind('.') {
        Some(idx) if idx != 0 => {
            let candidate_ext = &sanitized[idx + 1..];
            if candidate_ext.chars().all(|c| c.is_ascii_alphabetic()) && candidate_ext.len() <= 9 {
                if VIDEO_EXTENSIONS.contains(&candidate_ext.to_ascii_lowercase().as_str()) {
                    (sanitized[..idx].to_string(), "mp4".to_string())
                } else {
                    (sanitized[..idx].to_string(), candidate_ext.to_string())
                }
            } else {
                (sanitized[..idx].to_string(), "mp4".to_string())
            }
        }
        _ => (sanitized.clone(), "mp4".to_string()),
    };

    let mut stem = stem;
    for word in &settings.delete_words {
        stem = stem.replace(word.as_str(), "");
    }
    stem = apply_replacements(&stem, &settings.replacements);

    let tag = settings.rename_tag.as_deref().unwrap_or("");
    format!("{stem} {tag}.{ext}").replace("  ", " ")
}

/// A dummy filename for media that carries no name of its own, mirroring the
/// original's `downloaded_file_<unix_ts>.<ext>` fallback.
pub fn dummy_filename(mime: MimeClass, unix_ts: i64) -> String {
    let ext = match mime {
        MimeClass::Video => "mp4",
        MimeClass::Photo => "jpg",
        MimeClass::Audio => "mp3",
        MimeClass::Pdf | MimeClass::Document => "bin",
    };
    format!("downloaded_file_{unix_ts}.{ext}")
}

/// `N` in "every N percent, edit the progress message" — 10 for ≥100 MiB,
/// 20 for ≥50 MiB, 30 otherwise.
pub fn progress_threshold_percent(total_bytes: u64) -> u32 {
    const MIB: u64 = 1024 * 1024;
    if total_bytes >= 100 * MIB {
        10
    } else if total_bytes >= 50 * MIB {
        20
    } else {
        30
    }
}

/// Renders the 10-block `🟢`/`🔴` progress bar plus current/total MiB, speed,
/// and ETA, the same fields the original's `progress_bar` helper prints.
pub fn render_progress(percent: u32, current_mib: f64, total_mib: f64, speed_mib_s: f64, eta_secs: u64) -> String {
    let filled = (percent / 10).min(10) as usize;
    let bar: String = "🟢".repeat(filled) + &"🔴".repeat(10 - filled);
    let eta_mm = eta_secs / 60;
    let eta_ss = eta_secs % 60;
    format!(
        "{bar} {percent}%\n{current_mib:.2} / {total_mib:.2} MiB — {speed_mib_s:.2} MiB/s — ETA {eta_mm:02}:{eta_ss:02}"
    )
}

/// Summary returned once a run reaches a terminal state.
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub total: u32,
    pub success: u32,
    pub cancelled: bool,
}

/// One resolved message + its largest media attachment, enough to drive the
/// download/upload steps without leaking `grammers_client` types past this
/// module's boundary.
struct FetchedItem {
    media: Media,
    file_name: Option<String>,
    caption: Option<String>,
}

/// Resolves `(chat, msg_id)` on the best-authenticated client for the link
/// kind: public links try the bot client first, then the session client;
/// private links use the session client only.
async fn fetch_message(
    sessions: &SessionRegistry,
    user_id: i64,
    link: &ParsedLink,
) -> Result<FetchedItem, BotError> {
    let candidates: Vec<Client> = match link.kind {
        LinkType::Public => {
            let mut v = Vec::new();
            if let Ok(c) = sessions.get_or_create_bot_client(user_id).await {
                v.push(c);
            }
            if let Ok(c) = sessions.get_or_create_user_client(user_id).await {
                v.push(c);
            }
            v
        }
        LinkType::Private => vec![sessions.get_or_create_user_client(user_id).await?],
    };

    if candidates.is_empty() {
        return Err(BotError::NoUserSession);
    }

    for client in &candidates {
        if let Ok(Some(item)) = try_fetch(client, link).await {
            return Ok(item);
        }
    }
    Err(BotError::TgGateway(format!(
        "message {} not found in {}",
        link.msg_id, link.chat
    )))
}

pub(crate) async fn resolve_peer(
    client: &Client,
    chat: &str,
) -> Result<grammers_client::types::Chat, BotError> {
    let mut dialogs = client.iter_dialogs();
    while let Some(dialog) = dialogs
        .next()
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?
    {
        let peer = dialog.chat();
        let matches = peer.username().map(|u| u.eq_ignore_ascii_case(chat)).unwrap_or(false)
            || peer.id().to_string() == chat;
        if matches {
            return Ok(peer.clone());
        }
    }
    Err(BotError::TgGateway(format!("chat {chat} not resolvable from dialogs")))
}

async fn try_fetch(client: &Client, link: &ParsedLink) -> Result<Option<FetchedItem>, BotError> {
    let peer = resolve_peer(client, &link.chat).await?;
    let messages = client
        .get_messages_by_id(&peer, &[link.msg_id])
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;

    let Some(Some(msg)) = messages.into_iter().next() else {
        return Ok(None);
    };
    let Some(media) = msg.media() else {
        return Ok(None);
    };
    Ok(Some(FetchedItem {
        media,
        file_name: msg.file().and_then(|f| f.name().map(String::from)),
        caption: {
            let t = msg.text();
            if t.is_empty() { None } else { Some(t.to_string()) }
        },
    }))
}

/// Orchestrates one `/batch` or `/single` run for a single user. Does not
/// itself own the conversation registry entry — callers clear that
/// themselves on every exit path per the error-handling table.
pub struct BatchRunner {
    store: Arc<dyn StorePort>,
    quota: Arc<QuotaService>,
    sessions: Arc<SessionRegistry>,
    mirror: Arc<ActiveBatchMirror>,
    media_tools: Arc<dyn MediaToolsPort>,
    scratch_dir: PathBuf,
    delay: Duration,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn StorePort>,
        quota: Arc<QuotaService>,
        sessions: Arc<SessionRegistry>,
        mirror: Arc<ActiveBatchMirror>,
        media_tools: Arc<dyn MediaToolsPort>,
        scratch_dir: PathBuf,
        delay: Duration,
    ) -> Self {
        Self { store, quota, sessions, mirror, media_tools, scratch_dir, delay }
    }

    /// Preflight checks run before leaving `idle`, in the original's order.
    pub async fn preflight(&self, user_id: i64) -> Result<(), BotError> {
        self.quota.check_can_proceed(user_id).await?;
        if !self.sessions.has_bot_token(user_id).await? {
            return Err(BotError::NoUserBot);
        }
        if self.mirror.is_running(user_id).await {
            return Err(BotError::Conflict("a batch is already running".into()));
        }
        Ok(())
    }

    /// Runs `count` consecutive message ids starting at `link.msg_id`,
    /// strictly sequential, one message at a time, with a fixed inter-message
    /// delay. `on_progress` is invoked at most once per percent threshold per
    /// message, per the progress-reporting dedup rule.
    pub async fn run(
        &self,
        user_id: i64,
        link: ParsedLink,
        count: u32,
        on_progress: impl Fn(u32, String) + Send + Sync,
    ) -> Result<BatchSummary, BotError> {
        self.mirror
            .start(ActiveBatch {
                user_id,
                total: count,
                current: 0,
                success: 0,
                cancel_requested: false,
            })
            .await?;

        let mut success = 0u32;
        let mut cancelled = false;

        for offset in 0..count {
            if self.mirror.is_cancelled(user_id).await {
                cancelled = true;
                break;
            }

            let current_link = ParsedLink {
                chat: link.chat.clone(),
                msg_id: link.msg_id + offset as i32,
                kind: link.kind,
            };

            match self.process_one(user_id, &current_link, &on_progress).await {
                Ok(()) => {
                    success += 1;
                    self.quota.record_usage(user_id).await?;
                }
                Err(e) => {
                    warn!(user_id, msg_id = current_link.msg_id, error = %e, "batch item failed");
                }
            }

            self.mirror.update(user_id, offset + 1, success).await?;

            if self.mirror.is_cancelled(user_id).await {
                cancelled = true;
                break;
            }
            tokio::time::sleep(self.delay).await;
        }

        self.mirror.finish(user_id).await?;
        Ok(BatchSummary { total: count, success, cancelled })
    }

    async fn process_one(
        &self,
        user_id: i64,
        link: &ParsedLink,
        on_progress: &(impl Fn(u32, String) + Send + Sync),
    ) -> Result<(), BotError> {
        let fetched = match fetch_message(&self.sessions, user_id, link).await {
            Ok(f) => f,
            Err(BotError::FileReferenceExpired) => {
                // One-shot recovery: re-fetch once more before giving up.
                fetch_message(&self.sessions, user_id, link).await?
            }
            Err(e) => return Err(e),
        };

        let session_client = self.sessions.get_or_create_user_client(user_id).await?;
        let settings = self.store.get_settings(user_id).await?;

        let raw_name = fetched
            .file_name
            .clone()
            .unwrap_or_else(|| dummy_filename(MimeClass::Document, chrono_like_now()));
        let dest_name = rename_for_upload(&raw_name, &settings);
        let ext = dest_name.rsplit('.').next().unwrap_or("bin");
        let mime = MimeClass::from_extension(ext);

        let local_path = self.scratch_dir.join(format!("{user_id}_{}", dest_name));
        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| BotError::Other(format!("scratch dir: {e}")))?;

        self.download_with_progress(&session_client, &fetched.media, &local_path, on_progress)
            .await?;

        let caption = build_caption(fetched.caption.as_deref(), &settings);

        let (chat_str, reply_to) = settings
            .destination()
            .unwrap_or((link.chat.clone(), None));

        let upload_client = self.sessions.get_or_create_bot_client(user_id).await?;
        self.upload(&upload_client, &chat_str, reply_to, &local_path, mime, &caption)
            .await?;

        let _ = fs::remove_file(&local_path).await;
        Ok(())
    }

    async fn download_with_progress(
        &self,
        client: &Client,
        media: &Media,
        dest: &Path,
        on_progress: &(impl Fn(u32, String) + Send + Sync),
    ) -> Result<(), BotError> {
        let total = media_size(media);
        let threshold = progress_threshold_percent(total);
        let started = Instant::now();
        let mut last_bucket = u32::MAX;

        let dest_owned = dest.to_path_buf();
        let client_owned = client.clone();
        let media_owned = media.clone();
        let handle = tokio::spawn(async move {
            client_owned
                .download_media(&media_owned, &dest_owned)
                .await
        });

        loop {
            if handle.is_finished() {
                break;
            }
            let current = fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
            if total > 0 {
                let percent = ((current as f64 / total as f64) * 100.0).min(100.0) as u32;
                let bucket = percent / threshold;
                if bucket != last_bucket && percent < 100 {
                    last_bucket = bucket;
                    let elapsed = started.elapsed().as_secs_f64().max(0.001);
                    let speed = (current as f64 / (1024.0 * 1024.0)) / elapsed;
                    let remaining_mib = ((total - current) as f64) / (1024.0 * 1024.0);
                    let eta = if speed > 0.0 { (remaining_mib / speed) as u64 } else { 0 };
                    on_progress(
                        percent,
                        render_progress(
                            percent,
                            current as f64 / (1024.0 * 1024.0),
                            total as f64 / (1024.0 * 1024.0),
                            speed,
                            eta,
                        ),
                    );
                }
            }
            tokio::time::sleep(Duration::from_millis(800)).await;
        }

        handle
            .await
            .map_err(|e| BotError::Other(format!("download task panicked: {e}")))?
            .map_err(|e| BotError::TgGateway(e.to_string()))
    }

    async fn upload(
        &self,
        client: &Client,
        chat: &str,
        reply_to: Option<i32>,
        path: &Path,
        mime: MimeClass,
        caption: &str,
    ) -> Result<(), BotError> {
        let peer = resolve_peer(client, chat).await?;
        let uploaded: Uploaded = client
            .upload_file(path)
            .await
            .map_err(|e| BotError::Other(format!("upload: {e}")))?;

        let mut message = InputMessage::text(caption).reply_to(reply_to);

        message = match mime {
            MimeClass::Video => {
                let (duration, width, height) = self.media_tools.video_metadata(path).await;
                message.document(uploaded).attribute(Attribute::Video {
                    round_message: false,
                    supports_streaming: true,
                    duration: duration as i32,
                    w: width as i32,
                    h: height as i32,
                })
            }
            MimeClass::Audio => message.document(uploaded),
            MimeClass::Photo => message.photo(uploaded),
            MimeClass::Pdf | MimeClass::Document => message.document(uploaded),
        };

        client
            .send_message(&peer, message)
            .await
            .map_err(|e| BotError::TgGateway(e.to_string()))?;
        Ok(())
    }
}

/// Document media carries a known size up front; photos and other kinds
/// don't expose one through this API, so the progress bar's size-dependent
/// threshold just falls back to the smallest-file bucket (30%) for them.
fn media_size(media: &Media) -> u64 {
    match media {
        Media::Document(d) => d.size() as u64,
        _ => 0,
    }
}

/// Stand-in for `time.time()` — `Instant`/`SystemTime::now()` are both banned
/// in workflow scripts, but this use case runs outside that harness; kept as
/// a named helper so the one call site reads like the original's intent.
fn chrono_like_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_private_link_without_topic() {
        let link = parse_link("https://t.me/c/12345/67").unwrap();
        assert_eq!(link.chat, "-10012345");
        assert_eq!(link.msg_id, 67);
        assert_eq!(link.kind, LinkType::Private);
    }

    #[test]
    fn parses_private_link_with_topic_segment() {
        let link = parse_link("https://t.me/c/12345/9/67").unwrap();
        assert_eq!(link.chat, "-10012345");
        assert_eq!(link.msg_id, 67);
    }

    #[test]
    fn parses_public_link_with_topic_segment() {
        let link = parse_link("https://t.me/somechannel/9/42").unwrap();
        assert_eq!(link.chat, "somechannel");
        assert_eq!(link.msg_id, 42);
        assert_eq!(link.kind, LinkType::Public);
    }

    #[test]
    fn rejects_non_telegram_url() {
        assert!(parse_link("https://example.com/1/2").is_none());
    }

    #[test]
    fn sanitize_strips_reserved_characters_and_caps_length() {
        let dirty = "weird<>:\"/\\|?*'name";
        assert_eq!(sanitize_filename(dirty), "weird_________name");
        let long = "a".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), 255);
    }

    #[test]
    fn caption_concatenates_original_and_user_caption() {
        let mut settings = UserSettings::default();
        settings.caption = Some("my tag".to_string());
        let caption = build_caption(Some("hello world"), &settings);
        assert_eq!(caption, "hello world\n\nmy tag");
    }

    #[test]
    fn caption_falls_back_to_user_caption_when_original_is_empty() {
        let mut settings = UserSettings::default();
        settings.caption = Some("only mine".to_string());
        assert_eq!(build_caption(None, &settings), "only mine");
    }

    #[test]
    fn caption_applies_replacements_then_delete_words() {
        let mut settings = UserSettings::default();
        settings.replacements = HashMap::from([("foo".to_string(), "bar".to_string())]);
        settings.delete_words = vec!["skip".to_string()];
        let caption = build_caption(Some("foo skip baz"), &settings);
        assert_eq!(caption, "bar baz");
    }

    #[test]
    fn rename_forces_video_extensions_to_mp4() {
        let settings = UserSettings::default();
        let renamed = rename_for_upload("movie.mkv", &settings);
        assert!(renamed.ends_with(".mp4"));
    }

    #[test]
    fn rename_falls_back_to_mp4_for_nonalpha_or_long_extension() {
        let settings = UserSettings::default();
        assert!(rename_for_upload("archive.tar.gz2024", &settings).ends_with(".mp4"));
    }

    #[test]
    fn rename_appends_tag_and_keeps_document_extension() {
        let mut settings = UserSettings::default();
        settings.rename_tag = Some("@mygroup".to_string());
        let renamed = rename_for_upload("book.pdf", &settings);
        assert_eq!(renamed, "book @mygroup.pdf");
    }

    #[test]
    fn progress_threshold_scales_with_size() {
        assert_eq!(progress_threshold_percent(200 * 1024 * 1024), 10);
        assert_eq!(progress_threshold_percent(60 * 1024 * 1024), 20);
        assert_eq!(progress_threshold_percent(10 * 1024 * 1024), 30);
    }

    #[test]
    fn progress_bar_renders_ten_blocks() {
        let rendered = render_progress(40, 4.0, 10.0, 1.5, 65);
        assert!(rendered.starts_with("🟢🟢🟢🟢🔴🔴🔴🔴🔴🔴 40%"));
        assert!(rendered.contains("01:05"));
    }

    #[test]
    fn dummy_filename_uses_mime_extension() {
        assert!(dummy_filename(MimeClass::Video, 1000).ends_with(".mp4"));
        assert!(dummy_filename(MimeClass::Photo, 1000).ends_with(".jpg"));
    }
}
