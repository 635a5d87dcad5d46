//! Session & Bot Registry (C9): lazily connects and memoizes a grammers
//! `Client` per user for two distinct roles — the user's own logged-in
//! session (decrypted from the per-user persisted session file) and the
//! user's configured bot token — so every other use case can ask "give me
//! this user's client" without caring whether that is the first call.
//!
//! grammers has no Telethon-style string session: a [`grammers_session::Session`]
//! is a stateful store, recommended to be backed by its own SQLite file
//! (`open_file_session`, used for the primary bot session in
//! `adapters::telegram::session`). A per-user session has to persist the
//! same way, so this registry keeps one private SQLite session file per
//! user under `{data_dir}/sessions/{user_id}.session` and treats the
//! `StorePort::save_session`/`get_session` ciphertext column as an opaque
//! backup of that file's bytes (base64, then vault-encrypted) rather than
//! inventing a bespoke wire format — the file is the session, the ciphertext
//! is just where it survives a redeploy or a move to another host.

use crate::domain::BotError;
use crate::ports::{StorePort, VaultPort};
use crate::shared::config::AppConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use grammers_client::Client;
use grammers_client::client::UpdatesConfiguration;
use grammers_client::sender::SenderPool;
use grammers_session::storages::{MemorySession, SqliteSession};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

pub struct SessionRegistry {
    config: Arc<AppConfig>,
    store: Arc<dyn StorePort>,
    vault: Arc<dyn VaultPort>,
    sessions_dir: PathBuf,
    user_clients: RwLock<HashMap<i64, Client>>,
    bot_clients: RwLock<HashMap<i64, Client>>,
    runners: RwLock<HashMap<(i64, &'static str), JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn StorePort>, vault: Arc<dyn VaultPort>) -> Arc<Self> {
        let sessions_dir = PathBuf::from(config.data_dir_or_default()).join("sessions");
        Arc::new(Self {
            config,
            store,
            vault,
            sessions_dir,
            user_clients: RwLock::new(HashMap::new()),
            bot_clients: RwLock::new(HashMap::new()),
            runners: RwLock::new(HashMap::new()),
        })
    }

    fn api_creds(&self) -> Result<(i32, String), BotError> {
        let api_id = self.config.api_id.ok_or_else(|| BotError::Other("API_ID not configured".into()))?;
        let api_hash = self
            .config
            .api_hash
            .clone()
            .ok_or_else(|| BotError::Other("API_HASH not configured".into()))?;
        Ok((api_id, api_hash))
    }

    fn session_file_path(&self, user_id: i64) -> PathBuf {
        self.sessions_dir.join(format!("{user_id}.session"))
    }

    /// Returns the user's logged-in client, connecting it from the
    /// persisted session on first use. Fails with `NoUserSession` if the
    /// user has never completed `/login`.
    pub async fn get_or_create_user_client(&self, user_id: i64) -> Result<Client, BotError> {
        if let Some(client) = self.user_clients.read().await.get(&user_id) {
            return Ok(client.clone());
        }

        let ciphertext = self
            .store
            .get_session(user_id)
            .await?
            .ok_or(BotError::NoUserSession)?;
        self.restore_session_file(user_id, &ciphertext).await?;

        let (api_id, _) = self.api_creds()?;
        let session = SqliteSession::open(self.session_file_path(user_id))
            .await
            .map_err(|e| BotError::Other(format!("open user session: {e}")))?;
        let client = self.spawn_client(Arc::new(session), api_id, user_id, "user").await?;

        if !client.is_authorized().await.unwrap_or(false) {
            return Err(BotError::NoUserSession);
        }

        self.user_clients.write().await.insert(user_id, client.clone());
        Ok(client)
    }

    /// Begins a fresh login flow on the same persistent session file
    /// `get_or_create_user_client` later reads from, tracked under the
    /// `"login"` role so a cancelled or abandoned login can be torn down
    /// with [`abort_login_client`](Self::abort_login_client).
    pub async fn begin_login(&self, user_id: i64) -> Result<Client, BotError> {
        let path = self.session_file_path(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::Other(format!("create sessions dir: {e}")))?;
        }
        let (api_id, _) = self.api_creds()?;
        let session = SqliteSession::open(path)
            .await
            .map_err(|e| BotError::Other(format!("open login session: {e}")))?;
        self.spawn_client(Arc::new(session), api_id, user_id, "login").await
    }

    /// Persists `client`'s session file as the user's encrypted backup.
    /// Called once a login flow completes (`LoginCode`/`LoginPassword`
    /// success) and, optionally, periodically to capture update-state
    /// catch-up progress.
    pub async fn persist_user_session(&self, user_id: i64, _client: &Client) -> Result<(), BotError> {
        let path = self.session_file_path(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::Other(format!("create sessions dir: {e}")))?;
        }
        // SqliteSession writes synchronously on every mutating call (Session's
        // methods are sync and infallible by design), so the file on disk is
        // already current — no explicit flush step exists on `Client`.
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| BotError::Other(format!("read session file: {e}")))?;
        let plaintext = STANDARD.encode(raw);
        let ciphertext = self.vault.encrypt(&plaintext)?;
        self.store.save_session(user_id, &ciphertext).await?;
        Ok(())
    }

    async fn restore_session_file(&self, user_id: i64, ciphertext: &str) -> Result<(), BotError> {
        let path = self.session_file_path(user_id);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::Other(format!("create sessions dir: {e}")))?;
        }
        let plaintext = self.vault.decrypt(ciphertext)?;
        let raw = STANDARD
            .decode(plaintext)
            .map_err(|_| BotError::InvalidCiphertext)?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| BotError::Other(format!("write session file: {e}")))?;
        Ok(())
    }

    /// Returns the user's configured bot client, signing in with their
    /// stored bot token on first use. A bot login is a cheap, repeatable
    /// RPC (unlike a user login, which risks `FLOOD_WAIT`), so the bot
    /// client's session lives only in memory and is rebuilt on restart.
    pub async fn get_or_create_bot_client(&self, user_id: i64) -> Result<Client, BotError> {
        if let Some(client) = self.bot_clients.read().await.get(&user_id) {
            return Ok(client.clone());
        }

        let ciphertext = self
            .store
            .get_bot_token(user_id)
            .await?
            .ok_or(BotError::NoUserBot)?;
        let token = self.vault.decrypt(&ciphertext)?;

        let (api_id, api_hash) = self.api_creds()?;
        let session = Arc::new(MemorySession::default());
        let client = self.spawn_client(session, api_id, user_id, "bot").await?;
        client
            .bot_sign_in(&token, &api_hash)
            .await
            .map_err(|e| BotError::TgGateway(e.to_string()))?;

        self.bot_clients.write().await.insert(user_id, client.clone());
        Ok(client)
    }

    async fn spawn_client<S: grammers_session::Session + 'static>(
        &self,
        session: Arc<S>,
        api_id: i32,
        user_id: i64,
        role: &'static str,
    ) -> Result<Client, BotError> {
        let SenderPool { runner, updates, handle } = SenderPool::new(session, api_id);
        let client = Client::new(handle);
        let runner_task = tokio::spawn(runner.run());
        self.runners.write().await.insert((user_id, role), runner_task);

        let client_for_updates = client.clone();
        tokio::spawn(async move {
            let mut stream = client_for_updates
                .stream_updates(updates, UpdatesConfiguration::default())
                .await;
            // Updates for per-user/bot-token sessions are drained, not
            // dispatched — only the primary bot session (adapters::telegram)
            // routes commands. Draining still matters: it's what keeps the
            // connection's update-state catch-up from growing unbounded.
            loop {
                match stream.next().await {
                    Ok(_update) => {}
                    Err(e) => {
                        warn!(error = %e, "update stream closed for secondary client");
                        break;
                    }
                }
            }
        });

        Ok(client)
    }

    /// Drops a cached client and aborts its background tasks. Called on
    /// `/logout` and when a client's auth is revoked remotely.
    pub async fn invalidate_user_client(&self, user_id: i64) {
        self.user_clients.write().await.remove(&user_id);
        if let Some(task) = self.runners.write().await.remove(&(user_id, "user")) {
            task.abort();
        }
    }

    pub async fn invalidate_bot_client(&self, user_id: i64) {
        self.bot_clients.write().await.remove(&user_id);
        if let Some(task) = self.runners.write().await.remove(&(user_id, "bot")) {
            task.abort();
        }
    }

    /// Disconnects a pending `begin_login` client. Safe to call with no
    /// login in flight. Called on `/cancel` and once a completed login has
    /// been handed off to `persist_user_session`, since `get_or_create_user_client`
    /// spawns its own tracked client under the `"user"` role from then on.
    pub async fn abort_login_client(&self, user_id: i64) {
        if let Some(task) = self.runners.write().await.remove(&(user_id, "login")) {
            task.abort();
        }
    }

    pub async fn has_user_session(&self, user_id: i64) -> Result<bool, BotError> {
        if self.user_clients.read().await.contains_key(&user_id) {
            return Ok(true);
        }
        Ok(self.store.get_session(user_id).await?.is_some())
    }

    pub async fn has_bot_token(&self, user_id: i64) -> Result<bool, BotError> {
        if self.bot_clients.read().await.contains_key(&user_id) {
            return Ok(true);
        }
        Ok(self.store.get_bot_token(user_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DurationUnit, FileRecord, Folder, Plan, PremiumGrant, UserSettings};
    use crate::ports::ItemPage;

    struct NoopVault;
    impl VaultPort for NoopVault {
        fn encrypt(&self, p: &str) -> Result<String, BotError> {
            Ok(format!("enc:{p}"))
        }
        fn decrypt(&self, t: &str) -> Result<String, BotError> {
            Ok(t.strip_prefix("enc:").unwrap_or(t).to_string())
        }
    }

    struct UnimplementedStore;
    #[async_trait::async_trait]
    impl StorePort for UnimplementedStore {
        async fn upsert_user(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn count_users(&self) -> Result<u64, BotError> { unimplemented!() }
        async fn get_or_create_folder(&self, _: &str, _: &str, _: Option<i64>) -> Result<String, BotError> { unimplemented!() }
        async fn get_folder_with_parent(&self, _: &str) -> Result<(String, String, Option<i64>), BotError> { unimplemented!() }
        async fn list_auto_created_folders(&self, _: i64) -> Result<Vec<Folder>, BotError> { unimplemented!() }
        async fn add_file_if_novel(&self, _: FileRecord) -> Result<bool, BotError> { unimplemented!() }
        async fn list_files_with_topic(&self, _: i64) -> Result<Vec<FileRecord>, BotError> { unimplemented!() }
        async fn list_items(&self, _: &str, _: Option<i64>, _: u32, _: u32) -> Result<ItemPage, BotError> { unimplemented!() }
        async fn is_premium(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn add_premium(&self, _: i64, _: i64, _: DurationUnit) -> Result<PremiumGrant, BotError> { unimplemented!() }
        async fn revoke_premium(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn transfer_premium(&self, _: i64, _: i64) -> Result<PremiumGrant, BotError> { unimplemented!() }
        async fn list_premium(&self) -> Result<Vec<PremiumGrant>, BotError> { unimplemented!() }
        async fn count_premium(&self) -> Result<u64, BotError> { unimplemented!() }
        async fn get_premium(&self, _: i64) -> Result<Option<PremiumGrant>, BotError> { unimplemented!() }
        async fn increment_usage(&self, _: i64) -> Result<u32, BotError> { unimplemented!() }
        async fn usage_today(&self, _: i64) -> Result<u32, BotError> { unimplemented!() }
        async fn save_session(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_session(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_session(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn save_bot_token(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_bot_token(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_bot_token(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn get_settings(&self, _: i64) -> Result<UserSettings, BotError> { unimplemented!() }
        async fn update_setting(&self, _: i64, _: UserSettings) -> Result<(), BotError> { unimplemented!() }
        async fn clear_settings(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn get_plan(&self, _: &str) -> Result<Option<Plan>, BotError> { unimplemented!() }
        async fn list_plans(&self) -> Result<Vec<Plan>, BotError> { unimplemented!() }
        async fn upsert_plan(&self, _: Plan) -> Result<(), BotError> { unimplemented!() }
        async fn delete_plan(&self, _: &str) -> Result<bool, BotError> { unimplemented!() }
        async fn sweep_expired_premium(&self) -> Result<u64, BotError> { unimplemented!() }
    }

    fn make_registry(data_dir: &str) -> Arc<SessionRegistry> {
        let config = Arc::new(AppConfig {
            data_dir: Some(data_dir.to_string()),
            api_id: Some(1),
            api_hash: Some("hash".into()),
            ..Default::default()
        });
        SessionRegistry::new(config, Arc::new(UnimplementedStore), Arc::new(NoopVault))
    }

    #[test]
    fn session_file_path_is_scoped_under_the_configured_data_dir() {
        let registry = make_registry("/tmp/tg-gateway-test");
        let path = registry.session_file_path(42);
        assert_eq!(path, PathBuf::from("/tmp/tg-gateway-test/sessions/42.session"));
    }

    #[tokio::test]
    async fn missing_session_reports_no_user_session() {
        let registry = make_registry("/tmp/tg-gateway-test-missing");
        let err = registry.get_or_create_user_client(1).await.unwrap_err();
        assert!(matches!(err, BotError::NoUserSession));
    }

    #[tokio::test]
    async fn missing_bot_token_reports_no_user_bot() {
        let registry = make_registry("/tmp/tg-gateway-test-missing-bot");
        let err = registry.get_or_create_bot_client(1).await.unwrap_err();
        assert!(matches!(err, BotError::NoUserBot));
    }
}
