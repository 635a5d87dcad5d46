//! yt-dlp subprocess wrapper (C14). Same defensive posture as
//! [`crate::adapters::tools::ffmpeg_tools::FfmpegTools`]: never mix
//! stdout/stderr, map a failed subprocess to a typed error rather than
//! panicking.

use crate::domain::BotError;
use crate::ports::outbound::{ExtractedInfo, UrlExtractorPort};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

pub struct YtDlpTools {
    /// Optional cookies file path, written once at startup from
    /// `Telegram.YT_COOKIES`-equivalent config rather than per-invocation —
    /// this crate has no reason to materialize a fresh temp file per
    /// download the way the original does.
    cookies_file: Option<PathBuf>,
}

impl YtDlpTools {
    pub fn new(cookies_file: Option<PathBuf>) -> Self {
        Self { cookies_file }
    }

    fn apply_cookies<'a>(&self, cmd: &'a mut Command) -> &'a mut Command {
        if let Some(path) = &self.cookies_file {
            cmd.arg("--cookies").arg(path);
        }
        cmd
    }
}

#[async_trait]
impl UrlExtractorPort for YtDlpTools {
    async fn extract_info(&self, url: &str, audio_only: bool) -> Result<ExtractedInfo, BotError> {
        let mut cmd = Command::new("yt-dlp");
        cmd.args(["-J", "--no-warnings", "--no-playlist"])
            .args(["-f", if audio_only { "bestaudio/best" } else { "best" }])
            .arg(url)
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        self.apply_cookies(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| BotError::Process(format!("yt-dlp spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(BotError::Process(format!(
                "yt-dlp extract-info exited {:?}",
                output.status.code()
            )));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| BotError::Process(format!("yt-dlp JSON parse failed: {e}")))?;
        let title = json
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled")
            .to_string();
        let size = json
            .get("filesize")
            .or_else(|| json.get("filesize_approx"))
            .and_then(|v| v.as_u64());

        Ok(ExtractedInfo { title, size })
    }

    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        audio_only: bool,
    ) -> Result<PathBuf, BotError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| BotError::Process(format!("create dest dir failed: {e}")))?;

        let out_template = dest_dir.join("%(title)s.%(ext)s");
        let mut cmd = Command::new("yt-dlp");
        cmd.args(["--no-warnings", "--no-playlist", "--print", "after_move:filepath"])
            .args(["-f", if audio_only { "bestaudio/best" } else { "best" }])
            .arg("-o")
            .arg(&out_template);
        if audio_only {
            cmd.args(["-x", "--audio-format", "mp3", "--audio-quality", "320K"]);
        }
        cmd.arg(url).stdin(Stdio::null()).stderr(Stdio::null());
        self.apply_cookies(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| BotError::Process(format!("yt-dlp spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(BotError::Process(format!(
                "yt-dlp download exited {:?}",
                output.status.code()
            )));
        }

        let path_str = String::from_utf8_lossy(&output.stdout);
        let path = PathBuf::from(path_str.lines().last().unwrap_or("").trim());
        if path.as_os_str().is_empty() || !path.exists() {
            return Err(BotError::Process("yt-dlp reported no output file".to_string()));
        }
        Ok(path)
    }
}
