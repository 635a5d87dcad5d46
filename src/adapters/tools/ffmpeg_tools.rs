//! Typed ffmpeg/ffprobe subprocess wrappers (A3, Design Note §9): never mix
//! stdout/stderr silently, fall back to safe defaults on failure rather than
//! propagating a subprocess error up to the user.

use crate::ports::outbound::MediaToolsPort;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

pub struct FfmpegTools {
    ffprobe_timeout: Duration,
}

impl FfmpegTools {
    pub fn new(ffprobe_timeout: Duration) -> Self {
        Self { ffprobe_timeout }
    }

    async fn run_ffprobe(&self, args: &[&str]) -> Option<String> {
        let fut = Command::new("ffprobe")
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output();
        match tokio::time::timeout(self.ffprobe_timeout, fut).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                warn!(status = ?output.status, "ffprobe exited non-zero");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "ffprobe failed to spawn");
                None
            }
            Err(_) => {
                warn!("ffprobe timed out");
                None
            }
        }
    }
}

#[async_trait]
impl MediaToolsPort for FfmpegTools {
    async fn probe_duration(&self, source: &str) -> u64 {
        let out = self
            .run_ffprobe(&[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                source,
            ])
            .await;
        out.and_then(|s| s.parse::<f64>().ok())
            .map(|d| d.round() as u64)
            .unwrap_or(0)
    }

    async fn video_metadata(&self, path: &Path) -> (u64, u32, u32) {
        let path_str = path.to_string_lossy();
        let out = self
            .run_ffprobe(&[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height:format=duration",
                "-of",
                "csv=p=0",
                &path_str,
            ])
            .await;
        let Some(out) = out else {
            return (0, 1, 1);
        };
        let parts: Vec<&str> = out.split(',').collect();
        let width = parts.first().and_then(|s| s.parse().ok()).unwrap_or(1);
        let height = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
        let duration = parts
            .get(2)
            .and_then(|s| s.parse::<f64>().ok())
            .map(|d| d.round() as u64)
            .unwrap_or(0);
        (duration, width, height)
    }

    async fn extract_thumbnail(&self, path: &Path) -> Option<PathBuf> {
        let thumb_path = path.with_extension("thumb.jpg");
        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-i",
            ])
            .arg(path)
            .args(["-ss", "00:00:01.000", "-vframes", "1"])
            .arg(&thumb_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .ok()?;
        if status.success() && thumb_path.exists() {
            Some(thumb_path)
        } else {
            None
        }
    }
}
