//! VC Controller (C11): one active stream per chat id. The controller's
//! wall-clock position math is the source of truth — the streaming engine
//! gives no position feedback (Design Note §9), so drift is corrected only
//! on seek/pause/resume, never by polling the engine.

use crate::domain::{BotError, VcStreamState};
use crate::ports::{MediaToolsPort, VoiceEnginePort};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub const AUTO_REFRESH_SECS: u64 = crate::shared::config::DEFAULT_VC_REFRESH_SECS;
const FALLBACK_DURATION_SECS: u64 = 7200;
const PROGRESS_ROWS: usize = 4;
const PROGRESS_COLS: usize = 8;

/// Reference to the message a stream was started from, carried so file
/// actions ("Play in VC") can be re-derived if the player is reopened.
#[derive(Debug, Clone)]
pub struct StreamSource {
    pub msg_id: i32,
    pub chat_id: i64,
    pub folder_id: Option<String>,
    pub hash: String,
}

pub struct VcController {
    engine: Arc<dyn VoiceEnginePort>,
    media_tools: Arc<dyn MediaToolsPort>,
    streams: RwLock<HashMap<i64, VcStreamState>>,
    refresh_tasks: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl VcController {
    pub fn new(engine: Arc<dyn VoiceEnginePort>, media_tools: Arc<dyn MediaToolsPort>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            media_tools,
            streams: RwLock::new(HashMap::new()),
            refresh_tasks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn is_active(&self, chat_id: i64) -> bool {
        self.streams.read().await.contains_key(&chat_id)
    }

    pub async fn start(
        &self,
        chat_id: i64,
        url: String,
        title: String,
        seek: f64,
        source: StreamSource,
    ) -> Result<(), BotError> {
        self.engine.play(chat_id, &url, seek).await?;
        let duration_secs = self.media_tools.probe_duration(&url).await;
        let state = VcStreamState {
            chat_id,
            url,
            title,
            started_at: Instant::now(),
            seek_offset_secs: seek,
            paused: false,
            pause_started_at: None,
            source_msg_id: source.msg_id,
            source_chat_id: source.chat_id,
            folder_id: source.folder_id,
            hash: source.hash,
            duration_secs,
        };
        self.streams.write().await.insert(chat_id, state);
        Ok(())
    }

    pub async fn stop(&self, chat_id: i64) -> Result<(), BotError> {
        self.cancel_refresh(chat_id).await;
        self.engine.leave(chat_id).await?;
        self.streams.write().await.remove(&chat_id);
        Ok(())
    }

    pub async fn pause(&self, chat_id: i64) -> Result<(), BotError> {
        self.engine.pause(chat_id).await?;
        let mut streams = self.streams.write().await;
        let state = streams.get_mut(&chat_id).ok_or(BotError::GroupCallNotFound)?;
        state.paused = true;
        state.pause_started_at = Some(Instant::now());
        Ok(())
    }

    pub async fn resume(&self, chat_id: i64) -> Result<(), BotError> {
        self.engine.resume(chat_id).await?;
        let mut streams = self.streams.write().await;
        let state = streams.get_mut(&chat_id).ok_or(BotError::GroupCallNotFound)?;
        if let Some(paused_at) = state.pause_started_at.take() {
            state.started_at += paused_at.elapsed();
        }
        state.paused = false;
        Ok(())
    }

    /// Seeks by `delta` seconds (can be negative), clamped to
    /// `[0, duration]` (unbounded above when duration is unknown).
    pub async fn seek_by(&self, chat_id: i64, delta: f64) -> Result<f64, BotError> {
        let current = self.position(chat_id).await?;
        self.seek_to(chat_id, current + delta).await
    }

    pub async fn seek_to(&self, chat_id: i64, abs: f64) -> Result<f64, BotError> {
        let (url, duration) = {
            let streams = self.streams.read().await;
            let state = streams.get(&chat_id).ok_or(BotError::GroupCallNotFound)?;
            (state.url.clone(), state.duration_secs)
        };
        let ceiling = if duration > 0 { duration as f64 } else { f64::INFINITY };
        let clamped = abs.max(0.0).min(ceiling);

        self.engine.play(chat_id, &url, clamped).await?;

        let mut streams = self.streams.write().await;
        let state = streams.get_mut(&chat_id).ok_or(BotError::GroupCallNotFound)?;
        state.started_at = Instant::now();
        state.seek_offset_secs = clamped;
        state.paused = false;
        state.pause_started_at = None;
        Ok(clamped)
    }

    /// The controller's clock: `pauseStartedAt - startedAt + seekOffset` if
    /// paused, else `now - startedAt + seekOffset`.
    pub async fn position(&self, chat_id: i64) -> Result<f64, BotError> {
        let streams = self.streams.read().await;
        let state = streams.get(&chat_id).ok_or(BotError::GroupCallNotFound)?;
        Ok(compute_position(state, Instant::now()))
    }

    pub async fn snapshot(&self, chat_id: i64) -> Option<VcStreamState> {
        self.streams.read().await.get(&chat_id).cloned()
    }

    /// Registers a background task as owning the auto-refresh loop for
    /// `chat_id`, cancelling any previous one. Callers spawn the task
    /// themselves (it needs access to the bot client to edit the message).
    pub async fn set_refresh_task(&self, chat_id: i64, handle: JoinHandle<()>) {
        self.cancel_refresh(chat_id).await;
        self.refresh_tasks.lock().await.insert(chat_id, handle);
    }

    async fn cancel_refresh(&self, chat_id: i64) {
        if let Some(handle) = self.refresh_tasks.lock().await.remove(&chat_id) {
            handle.abort();
        }
    }
}

fn compute_position(state: &VcStreamState, now: Instant) -> f64 {
    let elapsed = if state.paused {
        state
            .pause_started_at
            .map(|p| p.saturating_duration_since(state.started_at))
            .unwrap_or_default()
    } else {
        now.saturating_duration_since(state.started_at)
    };
    elapsed.as_secs_f64() + state.seek_offset_secs
}

/// Renders the 4x8 progress grid: segments strictly before `position` are
/// filled, the segment containing `position` is the cursor, later segments
/// are empty. Falls back to a 7200s denominator when duration is unknown.
/// Returns `(glyphs, seconds_per_segment)` — callers attach callback-data
/// per segment using the latter to compute each segment's absolute seek target.
pub fn render_progress_grid(position_secs: f64, duration_secs: u64) -> (Vec<char>, f64) {
    let total_segments = PROGRESS_ROWS * PROGRESS_COLS;
    let denom = if duration_secs > 0 {
        duration_secs as f64
    } else {
        FALLBACK_DURATION_SECS as f64
    };
    let secs_per_segment = denom / total_segments as f64;
    let cursor = ((position_secs / secs_per_segment).floor() as usize).min(total_segments - 1);

    let glyphs = (0..total_segments)
        .map(|i| match i.cmp(&cursor) {
            std::cmp::Ordering::Less => '▓',
            std::cmp::Ordering::Equal => '🔘',
            std::cmp::Ordering::Greater => '░',
        })
        .collect();
    (glyphs, secs_per_segment)
}

pub fn format_mmss(total_secs: f64) -> String {
    let secs = total_secs.max(0.0).round() as u64;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(started_secs_ago: u64, seek_offset: f64, paused: bool, pause_ago: Option<u64>) -> VcStreamState {
        let now = Instant::now();
        VcStreamState {
            chat_id: 1,
            url: "http://example/stream".into(),
            title: "t".into(),
            started_at: now - std::time::Duration::from_secs(started_secs_ago),
            seek_offset_secs: seek_offset,
            paused,
            pause_started_at: pause_ago.map(|s| now - std::time::Duration::from_secs(s)),
            source_msg_id: 1,
            source_chat_id: 1,
            folder_id: None,
            hash: "h".into(),
            duration_secs: 600,
        }
    }

    #[test]
    fn position_advances_in_lockstep_with_wall_clock_when_playing() {
        let state = state_at(10, 0.0, false, None);
        let t1 = compute_position(&state, Instant::now());
        let t2 = compute_position(&state, Instant::now() + std::time::Duration::from_secs(5));
        assert!((t2 - t1 - 5.0).abs() < 0.01);
    }

    #[test]
    fn seek_collapses_position_to_target_then_resumes_advancing() {
        // seekBy(+30) resets started_at=now, seek_offset=new target.
        let state = state_at(0, 30.0, false, None);
        let immediate = compute_position(&state, Instant::now());
        assert!((immediate - 30.0).abs() < 0.1);
        let later = compute_position(&state, Instant::now() + std::time::Duration::from_secs(5));
        assert!((later - 35.0).abs() < 0.1);
    }

    #[test]
    fn paused_position_freezes_at_pause_instant() {
        let state = state_at(20, 0.0, true, Some(5));
        let pos = compute_position(&state, Instant::now());
        // paused 5s ago, started 20s ago -> frozen at 15s
        assert!((pos - 15.0).abs() < 0.1);
    }

    #[test]
    fn progress_grid_has_exactly_one_cursor_segment() {
        let (glyphs, _) = render_progress_grid(300.0, 600);
        assert_eq!(glyphs.len(), 32);
        assert_eq!(glyphs.iter().filter(|&&c| c == '🔘').count(), 1);
    }

    #[test]
    fn unknown_duration_falls_back_to_7200_denominator() {
        let (glyphs, secs_per_segment) = render_progress_grid(0.0, 0);
        assert_eq!(glyphs[0], '🔘');
        assert!((secs_per_segment - 7200.0 / 32.0).abs() < 0.01);
    }
}
