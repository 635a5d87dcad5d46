//! Voice-chat streaming engine adapter (C11). The group-call transport
//! itself (joining a VC and pushing encoded frames into it) has no Rust
//! binding in this stack — it is reached the same way the original reaches
//! it, as an external collaborator invoked as a subprocess, analogous to how
//! `/ytdl` shells out to an external downloader (A3 Design Note: subprocess
//! control should be small typed wrappers, never mixed stdout/stderr).

use crate::domain::BotError;
use crate::ports::outbound::VoiceEnginePort;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

/// Invokes an external bridge binary (`VC_BRIDGE_BIN`, default `vc-bridge`
/// on `PATH`) that owns the actual group-call connection. One subprocess
/// call per operation; the bridge is expected to track its own per-chat
/// connection state and be idempotent on `join`/`leave`.
pub struct VcBridgeEngine {
    bridge_bin: PathBuf,
}

impl VcBridgeEngine {
    pub fn new(bridge_bin: Option<PathBuf>) -> Self {
        Self {
            bridge_bin: bridge_bin.unwrap_or_else(|| PathBuf::from("vc-bridge")),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), BotError> {
        let output = Command::new(&self.bridge_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BotError::Process(format!("spawn vc-bridge: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("GROUPCALL_NOT_FOUND") {
                return Err(BotError::GroupCallNotFound);
            }
            warn!(stderr = %stderr, "vc-bridge command failed");
            Err(BotError::Process(stderr.trim().to_string()))
        }
    }
}

#[async_trait]
impl VoiceEnginePort for VcBridgeEngine {
    async fn play(&self, chat_id: i64, url: &str, seek_secs: f64) -> Result<(), BotError> {
        self.run(&[
            "play",
            &chat_id.to_string(),
            url,
            "--seek",
            &format!("{seek_secs:.2}"),
        ])
        .await
    }

    async fn leave(&self, chat_id: i64) -> Result<(), BotError> {
        self.run(&["leave", &chat_id.to_string()]).await
    }

    async fn pause(&self, chat_id: i64) -> Result<(), BotError> {
        self.run(&["pause", &chat_id.to_string()]).await
    }

    async fn resume(&self, chat_id: i64) -> Result<(), BotError> {
        self.run(&["resume", &chat_id.to_string()]).await
    }
}
