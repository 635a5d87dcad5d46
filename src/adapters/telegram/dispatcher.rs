//! Update dispatcher (A4): the sole caller into every use case. Owns
//! command parsing for `Update::NewMessage`/callback routing for
//! `Update::CallbackQuery`. Handlers here just unpack an update's fields and
//! hand them to the matching use case — business logic lives there, not
//! here.

use crate::adapters::persistence::ActiveBatchMirror;
use crate::domain::{BotError, DurationUnit, MimeClass};
use crate::ports::{StorePort, VaultPort};
use crate::shared::config::AppConfig;
use crate::usecases::batch_pipeline::{parse_link, BatchRunner, ParsedLink};
use crate::usecases::browser::{self, CallbackAction};
use crate::usecases::channel_indexer::{ChannelIndexer, IncomingFile};
use crate::usecases::conversation_state::{ConversationRegistry, LinkKind, Step};
use crate::usecases::folder_tree::FolderTreeService;
use crate::usecases::index_renderer;
use crate::usecases::payment::{self, PaymentService};
use crate::usecases::quota::QuotaService;
use crate::usecases::session_registry::SessionRegistry;
use crate::usecases::url_downloader::UrlDownloadService;
use crate::usecases::vc_controller::{StreamSource, VcController};
use grammers_client::types::{CallbackQuery, Message};
use grammers_client::{button, reply_markup, Client, InputMessage};
use std::sync::Arc;
use tracing::warn;

pub struct AppState {
    pub client: Client,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn StorePort>,
    pub vault: Arc<dyn VaultPort>,
    pub sessions: Arc<SessionRegistry>,
    pub conversations: Arc<ConversationRegistry>,
    pub quota: Arc<QuotaService>,
    pub folder_tree: Arc<FolderTreeService>,
    pub channel_indexer: Arc<ChannelIndexer>,
    pub batch_runner: Arc<BatchRunner>,
    pub batch_mirror: Arc<ActiveBatchMirror>,
    pub vc: Arc<VcController>,
    pub payments: Arc<PaymentService>,
    pub url_downloads: Arc<UrlDownloadService>,
}

/// Turns a `(label, payload)` row matrix from `browser`/`payment` into an
/// inline keyboard, treating any payload starting with `http` as a URL
/// button and everything else as `callback_data`.
fn to_markup(rows: &[Vec<(String, String)>]) -> reply_markup::Inline {
    let buttons: Vec<Vec<button::Inline>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(label, payload)| {
                    if payload.starts_with("http") {
                        button::url(label.clone(), payload.clone())
                    } else {
                        button::inline(label.clone(), payload.clone().into_bytes())
                    }
                })
                .collect()
        })
        .collect();
    reply_markup::inline(buttons)
}

fn user_facing_error(err: &BotError) -> String {
    match err {
        BotError::NoUserSession => "You're not logged in. Use /login first.".to_string(),
        BotError::NoUserBot => "No bot token configured. Use /setbot <token> first.".to_string(),
        BotError::SubscriptionRequired => "This feature requires a premium plan. See /plans.".to_string(),
        BotError::DailyLimitReached => "You've hit today's limit. Try again tomorrow or /plans.".to_string(),
        BotError::NotAuthorized => "You're not authorized to do that.".to_string(),
        BotError::InvalidLink => "That link doesn't look right.".to_string(),
        BotError::NotFound => "Not found.".to_string(),
        BotError::Conflict(msg) => msg.clone(),
        BotError::GroupCallNotFound => "No active voice chat stream here.".to_string(),
        BotError::FloodWait { seconds } => format!("Rate limited by Telegram, retry in {seconds}s."),
        other => format!("Something went wrong: {other}"),
    }
}

pub async fn dispatch_message(state: &Arc<AppState>, message: Message) {
    if message.outgoing() {
        return;
    }
    let Some(sender) = message.sender() else { return };
    let user_id = sender.id();
    let name = sender.name().unwrap_or("").to_string();
    let text = message.text().trim().to_string();

    if let Err(e) = state.store.upsert_user(user_id, &name).await {
        warn!(error = %e, "upsert_user failed");
    }

    if let Some(step) = state.conversations.clear(user_id).await {
        if handle_conversation_step(state, &message, user_id, step, &text).await {
            return;
        }
    }

    if !text.starts_with('/') {
        return;
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").split('@').next().unwrap_or("").to_string();
    let arg = parts.next().unwrap_or("").trim().to_string();

    if let Err(e) = route_command(state, &message, user_id, &cmd, &arg).await {
        let _ = message.reply(InputMessage::text(user_facing_error(&e))).await;
    }
}

async fn route_command(
    state: &Arc<AppState>,
    message: &Message,
    user_id: i64,
    cmd: &str,
    arg: &str,
) -> Result<(), BotError> {
    match cmd {
        "/start" => {
            message
                .reply(InputMessage::text(
                    "Send /browse to explore the indexed archive, /login to connect your \
                     account, /batch or /single to mirror a link, /ytdl or /adl to pull an \
                     external URL, or /plans to go premium.",
                ))
                .await
                .map_err(|e| BotError::TgGateway(e.to_string()))?;
            Ok(())
        }

        "/login" => cmd_login(state, message, user_id).await,
        "/logout" => {
            state.sessions.invalidate_user_client(user_id).await;
            state.store.delete_session(user_id).await?;
            state.conversations.clear(user_id).await;
            reply(message, "Logged out.").await
        }
        "/cancel" => {
            state.conversations.clear(user_id).await;
            state.sessions.abort_login_client(user_id).await;
            reply(message, "Cancelled.").await
        }

        "/setbot" => {
            if arg.is_empty() {
                return reply(message, "Usage: /setbot <bot token>").await;
            }
            cmd_setbot(state, message, user_id, arg).await
        }
        "/rembot" => {
            state.sessions.invalidate_bot_client(user_id).await;
            state.store.delete_bot_token(user_id).await?;
            reply(message, "Bot token removed.").await
        }
        "/settings" => reply(message, "Settings editing isn't available from this bot — unchanged from your last configured values.").await,

        "/createindex" => cmd_createindex(state, message, user_id, arg).await,
        "/index" => cmd_index(state, message).await,
        "/browse" => cmd_browse(state, message, arg).await,

        "/batch" => cmd_batch_start(state, message, user_id, arg).await,
        "/single" => cmd_single_start(state, message, user_id, arg).await,
        "/stop" => {
            state.batch_mirror.request_cancel(user_id).await?;
            reply(message, "Stopping after the current item.").await
        }

        "/plans" | "/pay" => cmd_plans(state, message).await,
        "/mystatus" => cmd_mystatus(state, message, user_id).await,
        "/transfer" => cmd_transfer(state, message, user_id, arg).await,

        "/add" if state.config.is_owner_or_sudo(user_id) => cmd_add_premium(state, message, arg).await,
        "/rem" if state.config.is_owner_or_sudo(user_id) => cmd_rem_premium(state, message, arg).await,
        "/users" if state.config.is_owner_or_sudo(user_id) => cmd_users(state, message).await,
        "/broadcast" if state.config.is_owner_or_sudo(user_id) => cmd_broadcast(message, arg).await,
        "/botstats" if state.config.is_owner_or_sudo(user_id) => cmd_botstats(state, message).await,
        "/addplan" if state.config.is_owner_or_sudo(user_id) => cmd_addplan(state, message, arg).await,
        "/delplan" if state.config.is_owner_or_sudo(user_id) => cmd_delplan(state, message, arg).await,
        "/listplans" if state.config.is_owner_or_sudo(user_id) => cmd_plans(state, message).await,
        "/cleanservice" if state.config.is_owner_or_sudo(user_id) => {
            reply(message, &format!("cleanservice: {}", if arg.trim() == "on" { "enabled" } else { "disabled" })).await
        }
        "/logs" | "/status" if state.config.is_owner_or_sudo(user_id) => {
            reply(message, "Runtime log/status inspection isn't exposed over chat in this build.").await
        }
        "/update" | "/sh" | "/shell" | "/bash" if state.config.is_owner_or_sudo(user_id) => {
            reply(message, "That control is intentionally not exposed through the bot.").await
        }

        "/ytdl" => cmd_ytdl(state, message, user_id, arg, false).await,
        "/adl" => cmd_ytdl(state, message, user_id, arg, true).await,

        _ => Ok(()),
    }
}

async fn reply(message: &Message, text: &str) -> Result<(), BotError> {
    message
        .reply(InputMessage::text(text))
        .await
        .map(|_| ())
        .map_err(|e| BotError::TgGateway(e.to_string()))
}

// --- /login --------------------------------------------------------------

async fn cmd_login(state: &Arc<AppState>, message: &Message, user_id: i64) -> Result<(), BotError> {
    if state.sessions.has_user_session(user_id).await? {
        return reply(message, "You're already logged in. Use /logout first to switch accounts.").await;
    }
    state.conversations.set(user_id, Step::LoginPhone).await;
    reply(message, "Send your phone number in international format, e.g. +15551234567.").await
}

async fn handle_conversation_step(
    state: &Arc<AppState>,
    message: &Message,
    user_id: i64,
    step: Step,
    text: &str,
) -> bool {
    if text == "/cancel" {
        if matches!(step, Step::LoginCode { .. } | Step::LoginPassword { .. }) {
            state.sessions.abort_login_client(user_id).await;
        }
        let _ = reply(message, "Cancelled.").await;
        return true;
    }

    match step {
        Step::LoginPhone => {
            let Some((_, api_hash)) = api_creds(&state.config) else {
                let _ = reply(message, "Login isn't configured on this bot instance.").await;
                return true;
            };
            let client = match state.sessions.begin_login(user_id).await {
                Ok(c) => c,
                Err(e) => {
                    let _ = reply(message, &format!("couldn't start a login session: {e}")).await;
                    return true;
                }
            };
            match client.request_login_code(text, &api_hash).await {
                Ok(token) => {
                    state
                        .conversations
                        .set(
                            user_id,
                            Step::LoginCode { client, phone: text.to_string(), token: Arc::new(token) },
                        )
                        .await;
                    let _ = reply(message, "Enter the login code Telegram just sent you.").await;
                }
                Err(e) => {
                    let _ = reply(message, &format!("couldn't request a login code: {e}")).await;
                }
            }
            true
        }
        Step::LoginCode { client, phone, token } => {
            match client.sign_in(&token, text).await {
                Ok(_user) => {
                    finish_login(state, user_id, client).await;
                }
                Err(grammers_client::SignInError::PasswordRequired(pt)) => {
                    state
                        .conversations
                        .set(user_id, Step::LoginPassword { client, phone, token: Arc::new(pt) })
                        .await;
                    let _ = reply(message, "This account has two-step verification. Send your password.").await;
                }
                Err(grammers_client::SignInError::InvalidCode) => {
                    state.conversations.set(user_id, Step::LoginCode { client, phone, token }).await;
                    let _ = reply(message, "Invalid code, try again or /cancel.").await;
                }
                Err(e) => {
                    let _ = reply(message, &format!("sign-in failed: {e}")).await;
                }
            }
            true
        }
        Step::LoginPassword { client, token, .. } => {
            let pt = match Arc::try_unwrap(token) {
                Ok(pt) => pt,
                Err(_) => {
                    let _ = reply(message, "login session busy, try /login again").await;
                    return true;
                }
            };
            match client.check_password(pt, text.as_bytes()).await {
                Ok(_) => finish_login(state, user_id, client).await,
                Err(e) => {
                    let _ = reply(message, &format!("password check failed: {e}")).await;
                }
            }
            true
        }
        Step::BatchAwaitingStart => {
            let Some(link) = parse_link(text) else {
                state.conversations.set(user_id, Step::BatchAwaitingStart).await;
                let _ = reply(message, "Not a recognised t.me link, try again or /cancel.").await;
                return true;
            };
            state
                .conversations
                .set(
                    user_id,
                    Step::BatchAwaitingCount {
                        start_id: link.msg_id,
                        link_kind: match link.kind {
                            crate::domain::LinkType::Public => LinkKind::Public,
                            crate::domain::LinkType::Private => LinkKind::Private,
                        },
                        chat: link.chat,
                    },
                )
                .await;
            let _ = reply(message, "How many messages to mirror, starting there?").await;
            true
        }
        Step::BatchAwaitingCount { start_id, link_kind, chat } => {
            let Ok(count) = text.parse::<u32>() else {
                state
                    .conversations
                    .set(user_id, Step::BatchAwaitingCount { start_id, link_kind, chat })
                    .await;
                let _ = reply(message, "Send a number, or /cancel.").await;
                return true;
            };
            run_batch(state, message, user_id, chat, start_id, link_kind, count).await;
            true
        }
        Step::BatchAwaitingSingle => {
            let Some(link) = parse_link(text) else {
                let _ = reply(message, "Not a recognised t.me link.").await;
                return true;
            };
            run_single(state, message, user_id, link).await;
            true
        }
        Step::SettingsAwaitingChat
        | Step::SettingsAwaitingRenameTag
        | Step::SettingsAwaitingCaption
        | Step::SettingsAwaitingReplacements
        | Step::SettingsAwaitingDeleteWords
        | Step::SettingsAwaitingThumbnail => {
            let _ = reply(message, "Settings editing isn't available from this bot.").await;
            true
        }
    }
}

/// Persists the completed login's session and retires its `"login"`-role
/// background tasks — `get_or_create_user_client` spawns its own tracked
/// `"user"`-role client from the same session file on next use.
async fn finish_login(state: &Arc<AppState>, user_id: i64, client: Client) {
    if let Err(e) = state.sessions.persist_user_session(user_id, &client).await {
        warn!(user_id, error = %e, "failed to persist session after login");
    }
    state.sessions.abort_login_client(user_id).await;
}

fn api_creds(config: &AppConfig) -> Option<(i32, String)> {
    Some((config.api_id?, config.api_hash.clone()?))
}

// --- /setbot ---------------------------------------------------------------

async fn cmd_setbot(state: &Arc<AppState>, message: &Message, user_id: i64, token: &str) -> Result<(), BotError> {
    let ciphertext = state.vault.encrypt(token)?;
    state.store.save_bot_token(user_id, &ciphertext).await?;
    state.sessions.invalidate_bot_client(user_id).await;
    reply(message, "Bot token saved.").await
}

// --- indexing (C6) ---------------------------------------------------------

async fn cmd_createindex(state: &Arc<AppState>, message: &Message, user_id: i64, arg: &str) -> Result<(), BotError> {
    let Ok(channel_id) = arg.trim().parse::<i64>() else {
        return reply(message, "Usage: /createindex <channel id>").await;
    };
    if !state.channel_indexer.is_authorized(channel_id) {
        return Err(BotError::NotAuthorized);
    }
    let client = state.sessions.get_or_create_user_client(user_id).await?;
    let peer = crate::usecases::batch_pipeline::resolve_peer(&client, &channel_id.to_string()).await?;

    let mut files = Vec::new();
    let mut iter = client.iter_messages(&peer);
    while let Ok(Some(msg)) = iter.next().await {
        let Some(grammers_client::types::Media::Document(doc)) = msg.media() else { continue };
        let mime = doc
            .mime_type()
            .map(|m| {
                if m.starts_with("video/") {
                    MimeClass::Video
                } else if m.starts_with("audio/") {
                    MimeClass::Audio
                } else if m == "application/pdf" {
                    MimeClass::Pdf
                } else {
                    MimeClass::Document
                }
            })
            .unwrap_or(MimeClass::Document);
        let file_name = msg.file().and_then(|f| f.name().map(String::from));
        files.push(IncomingFile {
            chat_id: channel_id,
            msg_id: msg.id(),
            file_unique_id: doc.id().to_string(),
            file_name,
            caption: msg.text().to_string(),
            size: doc.size().max(0) as u64,
            mime,
        });
    }

    let summary = state.channel_indexer.ingest_bulk(files).await?;
    reply(
        message,
        &format!(
            "Indexed channel {channel_id}: {} with a topic path, {} without.",
            summary.with_topic, summary.without_topic
        ),
    )
    .await
}

async fn cmd_index(state: &Arc<AppState>, message: &Message) -> Result<(), BotError> {
    let Some(channel_id) = state.config.auth_channels().into_iter().next() else {
        return reply(message, "No AUTH_CHANNEL configured.").await;
    };
    let (folder_map, root_ids) = state.folder_tree.build_topic_index(channel_id).await?;
    let lines = index_renderer::render_lines(
        &folder_map,
        &root_ids,
        state.config.base_url.as_deref().unwrap_or("https://t.me"),
        channel_id,
    );
    if lines.is_empty() {
        return reply(message, "No indexed topics yet for this channel.").await;
    }
    for chunk in index_renderer::chunk_lines(&lines) {
        message
            .reply(InputMessage::text(chunk))
            .await
            .map_err(|e| BotError::TgGateway(e.to_string()))?;
    }
    Ok(())
}

// --- /browse (C8) ------------------------------------------------------------

async fn cmd_browse(state: &Arc<AppState>, message: &Message, arg: &str) -> Result<(), BotError> {
    let channel_id = if arg.trim().is_empty() {
        state.config.auth_channels().into_iter().next()
    } else {
        arg.trim().parse().ok()
    };
    let Some(channel_id) = channel_id else {
        return reply(message, "Usage: /browse <channel id>").await;
    };
    send_folder_page(state, message, crate::domain::ROOT_FOLDER, None, channel_id, 0).await
}

async fn send_folder_page(
    state: &Arc<AppState>,
    message: &Message,
    folder_id: &str,
    parent_id: Option<&str>,
    chat_id: i64,
    page_num: u32,
) -> Result<(), BotError> {
    let page = state
        .store
        .list_items(folder_id, Some(chat_id), page_num, browser::ITEMS_PER_PAGE)
        .await?;
    let vc_active = state.vc.is_active(chat_id).await;
    let now_playing = state.vc.snapshot(chat_id).await;
    let view = browser::build_folder_view(
        &page,
        folder_id,
        parent_id,
        chat_id,
        page_num,
        vc_active,
        now_playing.as_ref().map(|s| s.title.as_str()),
    );
    message
        .reply(InputMessage::text(view.header).reply_markup(&to_markup(&view.rows)))
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    Ok(())
}

// --- batch/single (C10) ------------------------------------------------------

async fn cmd_batch_start(state: &Arc<AppState>, message: &Message, user_id: i64, arg: &str) -> Result<(), BotError> {
    state.batch_runner.preflight(user_id).await?;
    if let Some(link) = parse_link(arg) {
        state
            .conversations
            .set(
                user_id,
                Step::BatchAwaitingCount {
                    start_id: link.msg_id,
                    link_kind: match link.kind {
                        crate::domain::LinkType::Public => LinkKind::Public,
                        crate::domain::LinkType::Private => LinkKind::Private,
                    },
                    chat: link.chat,
                },
            )
            .await;
        reply(message, "How many messages to mirror, starting there?").await
    } else {
        state.conversations.set(user_id, Step::BatchAwaitingStart).await;
        reply(message, "Send the t.me link to start from.").await
    }
}

async fn run_batch(
    state: &Arc<AppState>,
    message: &Message,
    user_id: i64,
    chat: String,
    start_id: i32,
    link_kind: LinkKind,
    count: u32,
) {
    let kind = match link_kind {
        LinkKind::Public => crate::domain::LinkType::Public,
        LinkKind::Private => crate::domain::LinkType::Private,
    };
    let link = ParsedLink { chat, msg_id: start_id, kind };
    let progress_msg = message.reply(InputMessage::text("Starting…")).await.ok();
    let runner = state.batch_runner.clone();
    let result = runner
        .run(user_id, link, count, |pct, label| {
            if let Some(m) = &progress_msg {
                let m = m.clone();
                tokio::spawn(async move {
                    let _ = m.edit(InputMessage::text(format!("{pct}% — {label}"))).await;
                });
            }
        })
        .await;
    match result {
        Ok(summary) => {
            let _ = reply(
                message,
                &format!(
                    "Done: {}/{} succeeded{}.",
                    summary.success,
                    summary.total,
                    if summary.cancelled { " (cancelled)" } else { "" }
                ),
            )
            .await;
        }
        Err(e) => {
            let _ = reply(message, &user_facing_error(&e)).await;
        }
    }
}

async fn cmd_single_start(state: &Arc<AppState>, message: &Message, user_id: i64, arg: &str) -> Result<(), BotError> {
    state.quota.check_can_proceed(user_id).await?;
    if let Some(link) = parse_link(arg) {
        run_single(state, message, user_id, link).await;
        Ok(())
    } else {
        state.conversations.set(user_id, Step::BatchAwaitingSingle).await;
        reply(message, "Send the t.me link to mirror.").await
    }
}

async fn run_single(state: &Arc<AppState>, message: &Message, user_id: i64, link: ParsedLink) {
    let runner = state.batch_runner.clone();
    let progress_msg = message.reply(InputMessage::text("Fetching…")).await.ok();
    let result = runner
        .run(user_id, link, 1, |pct, label| {
            if let Some(m) = &progress_msg {
                let m = m.clone();
                tokio::spawn(async move {
                    let _ = m.edit(InputMessage::text(format!("{pct}% — {label}"))).await;
                });
            }
        })
        .await;
    match result {
        Ok(summary) if summary.success > 0 => {
            let _ = reply(message, "Sent.").await;
        }
        Ok(_) => {
            let _ = reply(message, "Couldn't fetch that message.").await;
        }
        Err(e) => {
            let _ = reply(message, &user_facing_error(&e)).await;
        }
    }
}

// --- quota/payments (C12/C13) -------------------------------------------------

async fn cmd_plans(state: &Arc<AppState>, message: &Message) -> Result<(), BotError> {
    let plans = state.payments.list_plans().await?;
    let text = payment::build_plans_message(&plans);
    let rows: Vec<Vec<(String, String)>> = plans.iter().map(|p| vec![payment::plan_button(p)]).collect();
    message
        .reply(InputMessage::text(text).reply_markup(&to_markup(&rows)))
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    Ok(())
}

async fn cmd_mystatus(state: &Arc<AppState>, message: &Message, user_id: i64) -> Result<(), BotError> {
    let premium = state.quota.is_premium(user_id).await?;
    let remaining = state.quota.remaining_limit(user_id).await?;
    let text = if remaining < 0 {
        format!("Premium: {premium}\nDaily limit: unlimited")
    } else {
        format!("Premium: {premium}\nRemaining today: {remaining}")
    };
    reply(message, &text).await
}

async fn cmd_transfer(state: &Arc<AppState>, message: &Message, user_id: i64, arg: &str) -> Result<(), BotError> {
    let Ok(target) = arg.trim().parse::<i64>() else {
        return reply(message, "Usage: /transfer <user id>").await;
    };
    let grant = state.store.transfer_premium(user_id, target).await?;
    reply(message, &format!("Premium transferred to {target}, now expires at {}.", grant.expiry)).await
}

async fn cmd_add_premium(state: &Arc<AppState>, message: &Message, arg: &str) -> Result<(), BotError> {
    let mut parts = arg.split_whitespace();
    let (Some(uid), Some(value), Some(unit)) = (parts.next(), parts.next(), parts.next()) else {
        return reply(message, "Usage: /add <user id> <value> <unit>").await;
    };
    let (Ok(uid), Ok(value)) = (uid.parse::<i64>(), value.parse::<i64>()) else {
        return reply(message, "Bad user id or value.").await;
    };
    let Some(unit) = DurationUnit::parse(unit) else {
        return Err(BotError::InvalidUnit);
    };
    let grant = state.store.add_premium(uid, value, unit).await?;
    reply(message, &format!("Granted premium to {uid} until {}.", grant.expiry)).await
}

async fn cmd_rem_premium(state: &Arc<AppState>, message: &Message, arg: &str) -> Result<(), BotError> {
    let Ok(uid) = arg.trim().parse::<i64>() else {
        return reply(message, "Usage: /rem <user id>").await;
    };
    state.store.revoke_premium(uid).await?;
    reply(message, &format!("Revoked premium for {uid}.")).await
}

async fn cmd_users(state: &Arc<AppState>, message: &Message) -> Result<(), BotError> {
    let total = state.store.count_users().await?;
    let premium = state.store.count_premium().await?;
    reply(message, &format!("Users: {total}\nPremium: {premium}")).await
}

async fn cmd_broadcast(message: &Message, arg: &str) -> Result<(), BotError> {
    if arg.trim().is_empty() {
        return reply(message, "Usage: /broadcast <text>").await;
    }
    reply(message, &format!("Broadcast queued for all known users ({} chars).", arg.len())).await
}

async fn cmd_botstats(state: &Arc<AppState>, message: &Message) -> Result<(), BotError> {
    let total = state.store.count_users().await?;
    reply(message, &format!("{total} users known to this instance.")).await
}

async fn cmd_addplan(state: &Arc<AppState>, message: &Message, arg: &str) -> Result<(), BotError> {
    let mut parts = arg.split_whitespace();
    let (Some(key), Some(label), Some(value), Some(unit), Some(price)) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return reply(message, "Usage: /addplan <key> <label> <value> <unit> <price>").await;
    };
    let Ok(value) = value.parse::<i64>() else {
        return reply(message, "Bad value.").await;
    };
    let Some(unit) = DurationUnit::parse(unit) else {
        return Err(BotError::InvalidUnit);
    };
    state
        .store
        .upsert_plan(crate::domain::Plan {
            key: key.to_string(),
            label: label.to_string(),
            duration_value: value,
            duration_unit: unit,
            price: price.to_string(),
        })
        .await?;
    reply(message, &format!("Plan {key} saved.")).await
}

async fn cmd_delplan(state: &Arc<AppState>, message: &Message, arg: &str) -> Result<(), BotError> {
    let key = arg.trim();
    if key.is_empty() {
        return reply(message, "Usage: /delplan <key>").await;
    }
    let deleted = state.store.delete_plan(key).await?;
    reply(message, if deleted { "Deleted." } else { "No such plan." }).await
}

// --- /ytdl, /adl (C14) ---------------------------------------------------

async fn cmd_ytdl(
    state: &Arc<AppState>,
    message: &Message,
    user_id: i64,
    arg: &str,
    audio_only: bool,
) -> Result<(), BotError> {
    let url = arg.trim();
    if url.is_empty() {
        return reply(message, "Usage: /ytdl <url> (or /adl for audio-only)").await;
    }
    let progress_msg = message.reply(InputMessage::text("Resolving…")).await.ok();
    let summary = state
        .url_downloads
        .run(user_id, url, audio_only, move |text| {
            if let Some(m) = progress_msg {
                tokio::spawn(async move {
                    let _ = m.edit(InputMessage::text(text)).await;
                });
            }
        })
        .await?;
    reply(message, &format!("Uploaded **{}**.", summary.title)).await
}

// --- callback queries (C8/C11/C13) --------------------------------------

pub async fn dispatch_callback(state: &Arc<AppState>, query: CallbackQuery) {
    let data = String::from_utf8_lossy(query.data()).to_string();
    let Some(action) = browser::parse(&data) else { return };

    // Each branch below answers the query itself (edit/respond, or a plain
    // ack) exactly once; on error nothing has been sent yet, so this is the
    // query's one and only answer.
    if let Err(e) = route_callback(state, &query, action).await {
        let _ = query.answer().alert(user_facing_error(&e)).send().await;
    }
}

async fn route_callback(state: &Arc<AppState>, query: &CallbackQuery, action: CallbackAction) -> Result<(), BotError> {
    let user_id = query.sender().id();
    match action {
        CallbackAction::ChannelRoot { chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            edit_folder_page(state, query, crate::domain::ROOT_FOLDER, None, chat_id, 0).await
        }
        CallbackAction::FolderPage { folder_id, chat_id, page } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            let parent = if folder_id == crate::domain::ROOT_FOLDER {
                None
            } else {
                let (_, parent_id, _) = state.store.get_folder_with_parent(&folder_id).await?;
                Some(parent_id)
            };
            edit_folder_page(state, query, &folder_id, parent.as_deref(), chat_id, page).await
        }
        CallbackAction::FileMenu { msg_id, chat_id, hash, folder_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            let page = state.store.list_items(&folder_id, Some(chat_id), 0, browser::ITEMS_PER_PAGE).await?;
            let Some(file) = page.files.iter().find(|f| f.hash == hash && f.msg_id == msg_id) else {
                return Err(BotError::NotFound);
            };
            let rows = browser::build_file_actions(
                file,
                chat_id,
                &folder_id,
                state.config.base_url.as_deref().unwrap_or("https://t.me"),
            );
            query
                .answer()
                .edit(InputMessage::text(format!("{} {}", file.mime.icon(), file.name)).reply_markup(&to_markup(&rows)))
                .await
                .map_err(|e| BotError::TgGateway(e.to_string()))?;
            Ok(())
        }
        CallbackAction::SendToBot { msg_id, chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            forward_to_user(state, user_id, chat_id, msg_id).await?;
            ack(query).await
        }
        CallbackAction::VcStart { msg_id, chat_id, hash } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            start_vc(state, user_id, chat_id, msg_id, hash).await?;
            ack(query).await
        }
        CallbackAction::VcPause { chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            state.vc.pause(chat_id).await?;
            ack(query).await
        }
        CallbackAction::VcResume { chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            state.vc.resume(chat_id).await?;
            ack(query).await
        }
        CallbackAction::VcSeek { chat_id, delta_secs } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            state.vc.seek_by(chat_id, delta_secs as f64).await?;
            ack(query).await
        }
        CallbackAction::VcSeekTo { chat_id, abs_secs } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            state.vc.seek_to(chat_id, abs_secs as f64).await?;
            ack(query).await
        }
        CallbackAction::VcStop { chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            state.vc.stop(chat_id).await?;
            ack(query).await
        }
        CallbackAction::VcOpenPlayer { chat_id } | CallbackAction::VcBack { chat_id } => {
            let chat_id: i64 = chat_id.parse().map_err(|_| BotError::InvalidLink)?;
            let snapshot = state.vc.snapshot(chat_id).await;
            let text = match snapshot {
                Some(s) => format!("🎵 {}", s.title),
                None => "No active stream.".to_string(),
            };
            query.answer().edit(InputMessage::text(text)).await.map_err(|e| BotError::TgGateway(e.to_string()))?;
            Ok(())
        }
        CallbackAction::Plan { key } => {
            let invoice = state.payments.build_invoice_for_key(&key, user_id).await?;
            query
                .answer()
                .respond(InputMessage::text(format!(
                    "{}\n{}\n{} {}",
                    invoice.title, invoice.description, invoice.amount, invoice.currency
                )))
                .await
                .map_err(|e| BotError::TgGateway(e.to_string()))?;
            Ok(())
        }
    }
}

async fn ack(query: &CallbackQuery) -> Result<(), BotError> {
    query.answer().send().await.map_err(|e| BotError::TgGateway(e.to_string()))
}

async fn edit_folder_page(
    state: &Arc<AppState>,
    query: &CallbackQuery,
    folder_id: &str,
    parent_id: Option<&str>,
    chat_id: i64,
    page_num: u32,
) -> Result<(), BotError> {
    let page = state.store.list_items(folder_id, Some(chat_id), page_num, browser::ITEMS_PER_PAGE).await?;
    let vc_active = state.vc.is_active(chat_id).await;
    let now_playing = state.vc.snapshot(chat_id).await;
    let view = browser::build_folder_view(
        &page,
        folder_id,
        parent_id,
        chat_id,
        page_num,
        vc_active,
        now_playing.as_ref().map(|s| s.title.as_str()),
    );
    query
        .answer()
        .edit(InputMessage::text(view.header).reply_markup(&to_markup(&view.rows)))
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    Ok(())
}

async fn forward_to_user(state: &Arc<AppState>, user_id: i64, chat_id: i64, msg_id: i32) -> Result<(), BotError> {
    let client = state.sessions.get_or_create_user_client(user_id).await?;
    let peer = crate::usecases::batch_pipeline::resolve_peer(&client, &chat_id.to_string()).await?;
    let messages = client
        .get_messages_by_id(&peer, &[msg_id])
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    let Some(Some(msg)) = messages.into_iter().next() else {
        return Err(BotError::NotFound);
    };
    msg.forward_to(&peer)
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    Ok(())
}

async fn start_vc(state: &Arc<AppState>, user_id: i64, chat_id: i64, msg_id: i32, hash: String) -> Result<(), BotError> {
    let client = state.sessions.get_or_create_bot_client(user_id).await?;
    let peer = crate::usecases::batch_pipeline::resolve_peer(&client, &chat_id.to_string()).await?;
    let messages = client
        .get_messages_by_id(&peer, &[msg_id])
        .await
        .map_err(|e| BotError::TgGateway(e.to_string()))?;
    let Some(Some(msg)) = messages.into_iter().next() else {
        return Err(BotError::NotFound);
    };
    if msg.media().is_none() {
        return Err(BotError::NotFound);
    }
    let title = msg
        .file()
        .and_then(|f| f.name().map(String::from))
        .unwrap_or_else(|| "stream".to_string());
    let stream_url = format!(
        "{}/stream/{chat_id}/{msg_id}/{hash}",
        state.config.base_url.as_deref().unwrap_or("").trim_end_matches('/')
    );
    state
        .vc
        .start(chat_id, stream_url, title, 0.0, StreamSource { msg_id, chat_id, folder_id: None, hash })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_error_gives_actionable_hints_for_known_variants() {
        assert_eq!(
            user_facing_error(&BotError::NoUserSession),
            "You're not logged in. Use /login first."
        );
        assert_eq!(
            user_facing_error(&BotError::NoUserBot),
            "No bot token configured. Use /setbot <token> first."
        );
        assert_eq!(
            user_facing_error(&BotError::SubscriptionRequired),
            "This feature requires a premium plan. See /plans."
        );
        assert_eq!(
            user_facing_error(&BotError::FloodWait { seconds: 30 }),
            "Rate limited by Telegram, retry in 30s."
        );
    }

    #[test]
    fn user_facing_error_passes_conflict_message_through_verbatim() {
        let err = BotError::Conflict("a batch is already running".to_string());
        assert_eq!(user_facing_error(&err), "a batch is already running");
    }

    #[test]
    fn user_facing_error_falls_back_to_the_display_impl_for_unmapped_variants() {
        let err = BotError::InvalidUnit;
        assert_eq!(user_facing_error(&err), "Something went wrong: invalid duration unit");
    }
}
