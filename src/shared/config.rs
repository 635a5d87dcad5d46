//! Application configuration. Typed mirror of every env key the external
//! interfaces table documents, loaded once at startup via `AppConfig::load()`.

use serde::Deserialize;

pub const DEFAULT_ITEMS_PER_PAGE: u32 = 8;
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 10;
pub const DEFAULT_VC_REFRESH_SECS: u64 = 5;
pub const DEFAULT_FFPROBE_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub bot_token: Option<String>,
    /// Optional user-session string for read-only assistance without per-user login.
    pub session_string: Option<String>,

    pub data_dir: Option<String>,

    /// CSV of channel ids authorized for indexing.
    pub auth_channel: Option<String>,
    pub owner_id: Option<i64>,
    /// Space-separated numeric ids with elevated (sudo) privileges.
    pub sudo_users: Option<String>,

    pub workers: Option<u32>,
    pub port: Option<u16>,
    pub base_url: Option<String>,

    /// Daily caps. 0 for freemium means "paid only"; 0 for premium means "unlimited".
    pub freemium_limit: Option<u32>,
    pub premium_limit: Option<u32>,

    /// Secret-vault inputs (PBKDF2 password / salt).
    pub master_key: Option<String>,
    pub iv_key: Option<String>,

    /// Optional mandatory-join channel id. 0 disables.
    pub force_sub: Option<i64>,
    /// Optional id for server-side log deep-links.
    pub log_group: Option<i64>,

    pub upstream_repo: Option<String>,
    pub upstream_branch: Option<String>,

    pub yt_cookies: Option<String>,
    pub insta_cookies: Option<String>,

    pub plan_d_s: Option<i64>,
    pub plan_d_du: Option<i64>,
    pub plan_d_u: Option<String>,
    pub plan_d_l: Option<String>,
    pub plan_w_s: Option<i64>,
    pub plan_w_du: Option<i64>,
    pub plan_w_u: Option<String>,
    pub plan_w_l: Option<String>,
    pub plan_m_s: Option<i64>,
    pub plan_m_du: Option<i64>,
    pub plan_m_u: Option<String>,
    pub plan_m_l: Option<String>,
}

impl AppConfig {
    /// Loads configuration from the environment, optionally backed by a
    /// `config.env` file in the current directory (as `DATABASE_URL`/`MONGO_DB`
    /// style deployments traditionally use). Keys use their plain external
    /// names (`API_ID`, not a crate-prefixed variant) since those names are
    /// the documented public contract.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::from_filename("config.env").ok();
        dotenv::dotenv().ok();

        let c = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;
        Ok(c.try_deserialize().unwrap_or_default())
    }

    pub fn data_dir_or_default(&self) -> String {
        self.data_dir.clone().unwrap_or_else(|| "./data".into())
    }

    pub fn freemium_limit_or_default(&self) -> u32 {
        self.freemium_limit.unwrap_or(5)
    }

    pub fn premium_limit_or_default(&self) -> u32 {
        self.premium_limit.unwrap_or(0)
    }

    pub fn items_per_page(&self) -> u32 {
        DEFAULT_ITEMS_PER_PAGE
    }

    /// Parses `AUTH_CHANNEL` (CSV of channel ids) into a list.
    pub fn auth_channels(&self) -> Vec<i64> {
        self.auth_channel
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }

    /// Parses `SUDO_USERS` (space-separated ids).
    pub fn sudo_user_ids(&self) -> Vec<i64> {
        self.sudo_users
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    pub fn is_owner_or_sudo(&self, user_id: i64) -> bool {
        self.owner_id == Some(user_id) || self.sudo_user_ids().contains(&user_id)
    }
}
