//! Conversation State Registry (C3): process-wide per-user step tracking for
//! multi-turn flows (login, settings, batch). Replaces a stringly-typed
//! `{step, data}` dictionary with a tagged-variant `Step`, so each step only
//! carries the fields it actually needs and the compiler enforces exhaustive
//! handling at every transition site.

use grammers_client::Client;
use grammers_client::client::{LoginToken, PasswordToken};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Which link form a pending `/batch` or `/single` run was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Public,
    Private,
}

/// A user-scoped multi-turn flow in progress. Variants that hold a live
/// `Client` (the login flow's temporary client) are the resources whose
/// release on every exit path (`/cancel`, error, timeout, success) the
/// registry's `clear` makes unconditional — dropping the `Step` drops the
/// `Client`, which disconnects it.
#[derive(Clone)]
pub enum Step {
    LoginPhone,
    LoginCode { client: Client, phone: String, token: Arc<LoginToken> },
    LoginPassword { client: Client, phone: String, token: Arc<PasswordToken> },

    SettingsAwaitingChat,
    SettingsAwaitingRenameTag,
    SettingsAwaitingCaption,
    SettingsAwaitingReplacements,
    SettingsAwaitingDeleteWords,
    SettingsAwaitingThumbnail,

    BatchAwaitingStart,
    BatchAwaitingCount { start_id: i32, link_kind: LinkKind, chat: String },
    BatchAwaitingSingle,
}

impl Step {
    pub fn is_login(&self) -> bool {
        matches!(self, Step::LoginPhone | Step::LoginCode { .. } | Step::LoginPassword { .. })
    }

    pub fn is_settings(&self) -> bool {
        matches!(
            self,
            Step::SettingsAwaitingChat
                | Step::SettingsAwaitingRenameTag
                | Step::SettingsAwaitingCaption
                | Step::SettingsAwaitingReplacements
                | Step::SettingsAwaitingDeleteWords
                | Step::SettingsAwaitingThumbnail
        )
    }

    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            Step::BatchAwaitingStart | Step::BatchAwaitingCount { .. } | Step::BatchAwaitingSingle
        )
    }
}

/// `Map<UserId, Step>` guarded by a single async mutex. Reads and writes are
/// both cheap and infrequent enough that a process-wide lock is adequate;
/// the single-threaded-scheduler assumption in the concurrency model does
/// not hold once handlers are spawned onto a multi-worker runtime, so this
/// registry gates the map behind a real lock rather than assuming isolation.
#[derive(Default)]
pub struct ConversationRegistry {
    steps: Mutex<HashMap<i64, Step>>,
}

impl ConversationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set(&self, user_id: i64, step: Step) {
        self.steps.lock().await.insert(user_id, step);
    }

    pub async fn get(&self, user_id: i64) -> Option<Step> {
        self.steps.lock().await.get(&user_id).cloned()
    }

    /// Removes and returns the step, so the caller can release any resource
    /// it carries (e.g. disconnect a pending login `Client`) exactly once.
    pub async fn clear(&self, user_id: i64) -> Option<Step> {
        self.steps.lock().await.remove(&user_id)
    }

    pub async fn login_in_progress(&self, user_id: i64) -> bool {
        self.steps
            .lock()
            .await
            .get(&user_id)
            .map(Step::is_login)
            .unwrap_or(false)
    }

    pub async fn settings_in_progress(&self, user_id: i64) -> bool {
        self.steps
            .lock()
            .await
            .get(&user_id)
            .map(Step::is_settings)
            .unwrap_or(false)
    }

    pub async fn batch_in_progress(&self, user_id: i64) -> bool {
        self.steps
            .lock()
            .await
            .get(&user_id)
            .map(Step::is_batch)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clear_returns_and_removes_the_step() {
        let reg = ConversationRegistry::new();
        reg.set(1, Step::BatchAwaitingStart).await;
        assert!(reg.batch_in_progress(1).await);
        let cleared = reg.clear(1).await;
        assert!(cleared.is_some());
        assert!(!reg.batch_in_progress(1).await);
        assert!(reg.get(1).await.is_none());
    }

    #[tokio::test]
    async fn predicates_are_mutually_exclusive() {
        let reg = ConversationRegistry::new();
        reg.set(7, Step::SettingsAwaitingCaption).await;
        assert!(reg.settings_in_progress(7).await);
        assert!(!reg.login_in_progress(7).await);
        assert!(!reg.batch_in_progress(7).await);
    }
}
