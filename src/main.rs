//! Wiring & DI. Entry point: bootstrap adapters, inject into use cases, run
//! the update-dispatch loop. No business logic here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use grammers_client::client::UpdatesConfiguration;
use grammers_client::sender::SenderPool;
use grammers_client::{Client, Update};
use tg_gateway_bot::adapters::persistence::{ActiveBatchMirror, AesGcmVault, SqliteStore};
use tg_gateway_bot::adapters::telegram::{dispatch_callback, dispatch_message, AppState};
use tg_gateway_bot::adapters::tools::{FfmpegTools, VcBridgeEngine, YtDlpTools};
use tg_gateway_bot::ports::outbound::{MediaToolsPort, StorePort, UrlExtractorPort, VaultPort, VoiceEnginePort};
use tg_gateway_bot::shared::config::{AppConfig, DEFAULT_FFPROBE_TIMEOUT_SECS};
use tg_gateway_bot::usecases::{
    BatchRunner, ChannelIndexer, ConversationRegistry, FolderTreeService, PaymentService,
    QuotaService, SessionRegistry, UrlDownloadService, VcController,
};
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const BATCH_DELAY_SECS: u64 = 10;
const PREMIUM_SWEEP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(AppConfig::load().unwrap_or_default());

    let api_id = cfg.api_id.unwrap_or(0);
    let api_hash = cfg.api_hash.clone().unwrap_or_default();
    let bot_token = cfg
        .bot_token
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Set BOT_TOKEN in the environment or config.env"))?;
    if api_id == 0 || api_hash.is_empty() {
        anyhow::bail!("Set API_ID and API_HASH (from https://my.telegram.org)");
    }

    let data_dir = PathBuf::from(cfg.data_dir_or_default());
    tokio::fs::create_dir_all(&data_dir).await?;

    let master_key = cfg.master_key.clone().unwrap_or_default();
    let iv_key = cfg.iv_key.clone().unwrap_or_default();
    if master_key.is_empty() || iv_key.is_empty() {
        anyhow::bail!("Set MASTER_KEY and IV_KEY to seed the secret vault");
    }
    let vault: Arc<dyn VaultPort> = Arc::new(AesGcmVault::new(&master_key, &iv_key));

    let store: Arc<dyn StorePort> = Arc::new(SqliteStore::connect(&data_dir).await?);

    let mirror = Arc::new(ActiveBatchMirror::new(data_dir.join("active_users.json")));
    mirror.load().await?;

    let session_path = data_dir.join("bot_session.db");
    let bot_session = tg_gateway_bot::adapters::telegram::session::open_file_session(&session_path).await?;
    let bot_session = Arc::new(bot_session);
    let SenderPool { runner, updates, handle } = SenderPool::new(bot_session, api_id);
    let client = Client::new(handle);
    tokio::spawn(runner.run());

    if !client.is_authorized().await.unwrap_or(false) {
        client
            .bot_sign_in(&bot_token, &api_hash)
            .await
            .map_err(|e| anyhow::anyhow!("bot sign-in failed: {e}"))?;
    }

    let sessions = SessionRegistry::new(Arc::clone(&cfg), Arc::clone(&store), Arc::clone(&vault));
    let conversations = ConversationRegistry::new();

    let quota = Arc::new(QuotaService::new(
        Arc::clone(&store),
        cfg.freemium_limit_or_default(),
        cfg.premium_limit_or_default(),
    ));
    let folder_tree = Arc::new(FolderTreeService::new(Arc::clone(&store)));
    let channel_indexer = Arc::new(ChannelIndexer::new(
        Arc::clone(&store),
        Arc::clone(&folder_tree),
        cfg.auth_channels(),
    ));

    let ffprobe_timeout = Duration::from_secs(DEFAULT_FFPROBE_TIMEOUT_SECS);
    let media_tools: Arc<dyn MediaToolsPort> = Arc::new(FfmpegTools::new(ffprobe_timeout));

    let batch_runner = Arc::new(BatchRunner::new(
        Arc::clone(&store),
        Arc::clone(&quota),
        Arc::clone(&sessions),
        Arc::clone(&mirror),
        Arc::clone(&media_tools),
        data_dir.join("scratch/batch"),
        Duration::from_secs(BATCH_DELAY_SECS),
    ));

    let vc_engine: Arc<dyn VoiceEnginePort> = Arc::new(VcBridgeEngine::new(None));
    let vc = VcController::new(vc_engine, Arc::clone(&media_tools));

    let payments = Arc::new(PaymentService::new(Arc::clone(&store)));

    let cookies_file = cfg.yt_cookies.clone().map(PathBuf::from);
    let extractor: Arc<dyn UrlExtractorPort> = Arc::new(YtDlpTools::new(cookies_file));
    let url_downloads = Arc::new(UrlDownloadService::new(
        Arc::clone(&store),
        Arc::clone(&quota),
        Arc::clone(&sessions),
        extractor,
        Arc::clone(&media_tools),
        data_dir.join("scratch/ytdl"),
    ));

    let state = Arc::new(AppState {
        client: client.clone(),
        config: Arc::clone(&cfg),
        store: Arc::clone(&store),
        vault,
        sessions,
        conversations,
        quota,
        folder_tree,
        channel_indexer,
        batch_runner,
        batch_mirror: mirror,
        vc,
        payments,
        url_downloads,
    });

    spawn_premium_sweep(Arc::clone(&store));

    let mut stream = client
        .stream_updates(updates, UpdatesConfiguration::default())
        .await;
    info!("tg-sync gateway bot started");
    loop {
        let update = match stream.next().await {
            Ok(update) => update,
            Err(e) => {
                error!(error = %e, "update stream closed, exiting");
                return Err(anyhow::anyhow!("update stream closed: {e}"));
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            match update {
                Update::NewMessage(message) => dispatch_message(&state, message).await,
                Update::CallbackQuery(query) => dispatch_callback(&state, query).await,
                _ => {}
            }
        });
    }
}

/// Sweeps expired premium grants on a fixed interval so a restart isn't the
/// only time stale grants get cleared.
fn spawn_premium_sweep(store: Arc<dyn StorePort>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(PREMIUM_SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match store.sweep_expired_premium().await {
                Ok(count) if count > 0 => info!(count, "swept expired premium grants"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "premium sweep failed"),
            }
        }
    });
}
