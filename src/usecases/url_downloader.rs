//! External URL Downloader (C14): `/ytdl`/`/adl` — quota check, yt-dlp
//! extract+download behind [`crate::ports::UrlExtractorPort`], ffmpeg
//! metadata/thumbnail for video, upload, usage accounting, scratch cleanup.
//!
//! Reuses [`crate::usecases::batch_pipeline::resolve_peer`] for the same
//! reason `batch_pipeline` itself talks to `grammers_client::Client`
//! directly: one more transport port here would just rewrap the same
//! `upload_file`/`send_message` calls.

use crate::domain::{BotError, MimeClass};
use crate::ports::{MediaToolsPort, StorePort, UrlExtractorPort};
use crate::usecases::batch_pipeline::resolve_peer;
use crate::usecases::quota::QuotaService;
use crate::usecases::session_registry::SessionRegistry;
use grammers_client::types::{Attribute, InputMessage, Uploaded};
use grammers_client::Client;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

/// Result of one `/ytdl` or `/adl` run, for the reply message.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub title: String,
}

/// Human-readable byte size, matching the original's `get_readable_file_size`
/// (binary units, two decimal places, "File too large" past petabytes).
pub fn readable_size(bytes: Option<u64>) -> String {
    let Some(mut size) = bytes.map(|b| b as f64) else {
        return "0B".to_string();
    };
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut index = 0;
    while size >= 1024.0 && index < UNITS.len() - 1 {
        size /= 1024.0;
        index += 1;
    }
    if size >= 1024.0 {
        return "File too large".to_string();
    }
    format!("{:.2}{}", size, UNITS[index])
}

/// The "title (size)" announcement shown right after `extract_info`.
pub fn build_announcement(title: &str, size: Option<u64>) -> String {
    format!("**{title}**\n{}", readable_size(size))
}

pub struct UrlDownloadService {
    store: Arc<dyn StorePort>,
    quota: Arc<QuotaService>,
    sessions: Arc<SessionRegistry>,
    extractor: Arc<dyn UrlExtractorPort>,
    media_tools: Arc<dyn MediaToolsPort>,
    scratch_root: PathBuf,
    active: Mutex<HashSet<i64>>,
}

impl UrlDownloadService {
    pub fn new(
        store: Arc<dyn StorePort>,
        quota: Arc<QuotaService>,
        sessions: Arc<SessionRegistry>,
        extractor: Arc<dyn UrlExtractorPort>,
        media_tools: Arc<dyn MediaToolsPort>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            store,
            quota,
            sessions,
            extractor,
            media_tools,
            scratch_root,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn user_dir(&self, user_id: i64) -> PathBuf {
        self.scratch_root.join(user_id.to_string())
    }

    /// Runs one `/ytdl <url>` (`audio_only=false`) or `/adl <url>`
    /// (`audio_only=true`) request end to end. `on_announce` fires once,
    /// right after info extraction, with the title+size text to show the
    /// user before the download itself starts.
    pub async fn run(
        &self,
        user_id: i64,
        url: &str,
        audio_only: bool,
        on_announce: impl FnOnce(String),
    ) -> Result<DownloadSummary, BotError> {
        {
            let mut active = self.active.lock().unwrap();
            if !active.insert(user_id) {
                return Err(BotError::Conflict("you already have an ongoing download".into()));
            }
        }
        let result = self.run_inner(user_id, url, audio_only, on_announce).await;
        self.active.lock().unwrap().remove(&user_id);
        result
    }

    async fn run_inner(
        &self,
        user_id: i64,
        url: &str,
        audio_only: bool,
        on_announce: impl FnOnce(String),
    ) -> Result<DownloadSummary, BotError> {
        self.quota.check_can_proceed(user_id).await?;

        let info = self.extractor.extract_info(url, audio_only).await?;
        on_announce(build_announcement(&info.title, info.size));

        let dir = self.user_dir(user_id);
        let downloaded = self.extractor.download(url, &dir, audio_only).await?;

        let upload_result = self.upload(user_id, &downloaded, &info.title, audio_only).await;

        let _ = fs::remove_dir_all(&dir).await;
        upload_result?;

        self.quota.record_usage(user_id).await?;
        Ok(DownloadSummary { title: info.title })
    }

    async fn upload(
        &self,
        user_id: i64,
        path: &Path,
        title: &str,
        audio_only: bool,
    ) -> Result<(), BotError> {
        let settings = self.store.get_settings(user_id).await?;
        let (chat_str, reply_to) = settings
            .destination()
            .unwrap_or((user_id.to_string(), None));

        let client = self.sessions.get_or_create_bot_client(user_id).await?;
        let peer = resolve_peer(&client, &chat_str).await?;
        let uploaded: Uploaded = client
            .upload_file(path)
            .await
            .map_err(|e| BotError::Other(format!("upload: {e}")))?;

        let mut message = InputMessage::text(title).reply_to(reply_to);
        message = if audio_only {
            message.document(uploaded).attribute(Attribute::Audio {
                duration: self.media_tools.probe_duration(&path.to_string_lossy()).await as i32,
                title: Some(title.to_string()),
                performer: None,
            })
        } else {
            let (duration, width, height) = self.media_tools.video_metadata(path).await;
            message.document(uploaded).attribute(Attribute::Video {
                round_message: false,
                supports_streaming: true,
                duration: duration as i32,
                w: width as i32,
                h: height as i32,
            })
        };

        client
            .send_message(&peer, message)
            .await
            .map_err(|e| BotError::TgGateway(e.to_string()))?;
        Ok(())
    }
}

/// Extension used when picking a [`MimeClass`] for a downloaded file's final
/// name, mirroring `MimeClass::from_extension`'s table.
pub fn mime_for_path(path: &Path, audio_only: bool) -> MimeClass {
    if audio_only {
        return MimeClass::Audio;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(MimeClass::from_extension)
        .unwrap_or(MimeClass::Video)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_size_scales_through_binary_units() {
        assert_eq!(readable_size(Some(0)), "0.00B");
        assert_eq!(readable_size(Some(2048)), "2.00KB");
        assert_eq!(readable_size(Some(5 * 1024 * 1024)), "5.00MB");
        assert_eq!(readable_size(None), "0B");
    }

    #[test]
    fn announcement_bolds_title_and_shows_size() {
        let text = build_announcement("My Video", Some(1024));
        assert_eq!(text, "**My Video**\n1.00KB");
    }

    #[test]
    fn mime_for_path_forces_audio_when_requested() {
        assert_eq!(mime_for_path(Path::new("clip.mp4"), true), MimeClass::Audio);
        assert_eq!(mime_for_path(Path::new("clip.mp4"), false), MimeClass::Video);
        assert_eq!(mime_for_path(Path::new("clip.pdf"), false), MimeClass::Pdf);
    }
}
