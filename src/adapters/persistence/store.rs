//! SQLite-backed document store (C1) via libsql.
//!
//! Uses the same libsql backend as grammers-session to avoid duplicate SQLite
//! symbol link errors. The spec's Mongo-shaped collections (`playlist`,
//! `files`, `premium_users`, ...) map onto tables here; TTL-index semantics on
//! premium expiry are emulated by lazy delete-on-lookup plus a periodic sweep
//! (`sweep_expired_premium`, called from a background task at startup).

use crate::domain::{
    BotError, DurationUnit, FileRecord, Folder, MimeClass, Plan, PremiumGrant, UserSettings,
};
use crate::ports::outbound::{ItemPage, StorePort};
use libsql::{params, Database};
use std::path::Path;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        joined_at INTEGER NOT NULL,
        last_seen_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS folders (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        parent_id TEXT NOT NULL,
        source_channel INTEGER,
        auto_created INTEGER NOT NULL
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_folders_parent_name_auto
        ON folders (parent_id, name) WHERE auto_created = 1"#,
    r#"CREATE INDEX IF NOT EXISTS idx_folders_parent
        ON folders (parent_id, source_channel, name)"#,
    r#"CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        chat_id INTEGER NOT NULL,
        msg_id INTEGER NOT NULL,
        hash TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        mime TEXT NOT NULL,
        topic_folder_id TEXT
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_files_chat_hash ON files (chat_id, hash)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_files_topic ON files (topic_folder_id, chat_id)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_files_chat_msg ON files (chat_id, msg_id)"#,
    r#"CREATE TABLE IF NOT EXISTS premium_grants (
        user_id INTEGER PRIMARY KEY,
        expiry INTEGER NOT NULL,
        granted_at INTEGER NOT NULL,
        transferred_from INTEGER
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_premium_expiry ON premium_grants (expiry)"#,
    r#"CREATE TABLE IF NOT EXISTS daily_usage (
        key TEXT PRIMARY KEY,
        count INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_settings (
        user_id INTEGER PRIMARY KEY,
        chat_id TEXT,
        rename_tag TEXT,
        caption TEXT,
        replacements_json TEXT NOT NULL DEFAULT '{}',
        delete_words_json TEXT NOT NULL DEFAULT '[]',
        thumbnail_path TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_secrets (
        user_id INTEGER PRIMARY KEY,
        session_ciphertext TEXT,
        bot_token_ciphertext TEXT,
        updated_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS plans (
        key TEXT PRIMARY KEY,
        label TEXT NOT NULL,
        duration_value INTEGER NOT NULL,
        duration_unit TEXT NOT NULL,
        price TEXT NOT NULL
    )"#,
];

/// libsql-backed implementation of `StorePort`. One database file (`store.db`)
/// in the given base directory; safe to share via `Arc` across handlers.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Connects to (or creates) the database and ensures the schema + indexes
    /// exist. Call once at startup; mirrors C1's "owns three indexes,
    /// idempotent" contract.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, BotError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let db_path = base.join("store.db");
        let db = libsql::Builder::new_local(db_path.to_string_lossy().as_ref())
            .build()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        for stmt in SCHEMA {
            conn.execute(stmt, ())
                .await
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        }
        Ok(Self { db })
    }

    fn conn(&self) -> Result<libsql::Connection, BotError> {
        self.db
            .connect()
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn usage_key(user_id: i64) -> String {
        let today = chrono::Utc::now().format("%Y-%m-%d");
        format!("{user_id}_{today}")
    }

    fn mime_to_str(m: MimeClass) -> &'static str {
        match m {
            MimeClass::Video => "video",
            MimeClass::Audio => "audio",
            MimeClass::Photo => "photo",
            MimeClass::Pdf => "pdf",
            MimeClass::Document => "document",
        }
    }

    fn str_to_mime(s: &str) -> MimeClass {
        match s {
            "video" => MimeClass::Video,
            "audio" => MimeClass::Audio,
            "photo" => MimeClass::Photo,
            "pdf" => MimeClass::Pdf,
            _ => MimeClass::Document,
        }
    }

    fn unit_to_str(u: DurationUnit) -> &'static str {
        match u {
            DurationUnit::Min => "min",
            DurationUnit::Hours => "hours",
            DurationUnit::Days => "days",
            DurationUnit::Weeks => "weeks",
            DurationUnit::Month => "month",
            DurationUnit::Year => "year",
            DurationUnit::Decades => "decades",
        }
    }
}

#[async_trait::async_trait]
impl StorePort for SqliteStore {
    async fn upsert_user(&self, id: i64, name: &str) -> Result<(), BotError> {
        let conn = self.conn()?;
        let now = Self::now();
        conn.execute(
            r#"INSERT INTO users (id, name, joined_at, last_seen_at) VALUES (?1, ?2, ?3, ?3)
               ON CONFLICT (id) DO UPDATE SET name = ?2, last_seen_at = ?3"#,
            params![id, name, now],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn count_users(&self) -> Result<u64, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM users", ())
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .ok_or(BotError::NotFound)?;
        Ok(row.get::<i64>(0).unwrap_or(0) as u64)
    }

    async fn get_or_create_folder(
        &self,
        parent: &str,
        name: &str,
        source_channel: Option<i64>,
    ) -> Result<String, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id FROM folders WHERE parent_id = ?1 AND name = ?2 AND auto_created = 1",
                params![parent, name],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            return row
                .get::<String>(0)
                .map_err(|e| BotError::StoreUnavailable(e.to_string()));
        }
        let id = uuid_v4();
        conn.execute(
            "INSERT INTO folders (id, name, parent_id, source_channel, auto_created) VALUES (?1, ?2, ?3, ?4, 1)",
            params![id.clone(), name, parent, source_channel],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(id)
    }

    async fn get_folder_with_parent(
        &self,
        id: &str,
    ) -> Result<(String, String, Option<i64>), BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT name, parent_id, source_channel FROM folders WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .ok_or(BotError::NotFound)?;
        Ok((
            row.get::<String>(0)
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?,
            row.get::<String>(1)
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?,
            row.get::<Option<i64>>(2)
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?,
        ))
    }

    async fn list_auto_created_folders(&self, source_channel: i64) -> Result<Vec<Folder>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, name, parent_id, source_channel, auto_created FROM folders
                 WHERE auto_created = 1 AND source_channel = ?1",
                params![source_channel],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            out.push(Folder {
                id: row.get(0).unwrap_or_default(),
                name: row.get(1).unwrap_or_default(),
                parent_id: row.get(2).unwrap_or_default(),
                source_channel: row.get::<Option<i64>>(3).unwrap_or(None),
                auto_created: row.get::<i64>(4).unwrap_or(0) != 0,
            });
        }
        Ok(out)
    }

    async fn add_file_if_novel(&self, file: FileRecord) -> Result<bool, BotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"INSERT INTO files (id, chat_id, msg_id, hash, name, size, mime, topic_folder_id)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                   ON CONFLICT (chat_id, hash) DO NOTHING"#,
                params![
                    file.id,
                    file.chat_id,
                    file.msg_id,
                    file.hash,
                    file.name,
                    file.size as i64,
                    Self::mime_to_str(file.mime),
                    file.topic_folder_id,
                ],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn list_files_with_topic(&self, source_channel: i64) -> Result<Vec<FileRecord>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT id, chat_id, msg_id, hash, name, size, mime, topic_folder_id FROM files
                 WHERE chat_id = ?1 AND topic_folder_id IS NOT NULL
                 ORDER BY msg_id ASC",
                params![source_channel],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            out.push(FileRecord {
                id: row.get(0).unwrap_or_default(),
                chat_id: row.get(1).unwrap_or_default(),
                msg_id: row.get(2).unwrap_or_default(),
                hash: row.get(3).unwrap_or_default(),
                name: row.get(4).unwrap_or_default(),
                size: row.get::<i64>(5).unwrap_or(0) as u64,
                mime: Self::str_to_mime(&row.get::<String>(6).unwrap_or_default()),
                topic_folder_id: row.get::<Option<String>>(7).unwrap_or(None),
            });
        }
        Ok(out)
    }

    async fn list_items(
        &self,
        parent: &str,
        source_channel: Option<i64>,
        page: u32,
        per_page: u32,
    ) -> Result<ItemPage, BotError> {
        let conn = self.conn()?;

        let mut folders = Vec::new();
        {
            let mut rows = conn
                .query(
                    "SELECT id, name, parent_id, source_channel, auto_created FROM folders
                     WHERE parent_id = ?1 ORDER BY id ASC",
                    params![parent],
                )
                .await
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            {
                folders.push(Folder {
                    id: row.get(0).unwrap_or_default(),
                    name: row.get(1).unwrap_or_default(),
                    parent_id: row.get(2).unwrap_or_default(),
                    source_channel: row.get::<Option<i64>>(3).unwrap_or(None),
                    auto_created: row.get::<i64>(4).unwrap_or(0) != 0,
                });
            }
        }

        let mut files = Vec::new();
        {
            let query = if source_channel.is_some() {
                "SELECT id, chat_id, msg_id, hash, name, size, mime, topic_folder_id FROM files
                 WHERE topic_folder_id = ?1 AND chat_id = ?2 ORDER BY id ASC"
            } else {
                "SELECT id, chat_id, msg_id, hash, name, size, mime, topic_folder_id FROM files
                 WHERE topic_folder_id = ?1 ORDER BY id ASC"
            };
            let mut rows = if let Some(ch) = source_channel {
                conn.query(query, params![parent, ch])
                    .await
                    .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            } else {
                conn.query(query, params![parent])
                    .await
                    .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            };
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            {
                files.push(FileRecord {
                    id: row.get(0).unwrap_or_default(),
                    chat_id: row.get(1).unwrap_or_default(),
                    msg_id: row.get(2).unwrap_or_default(),
                    hash: row.get(3).unwrap_or_default(),
                    name: row.get(4).unwrap_or_default(),
                    size: row.get::<i64>(5).unwrap_or(0) as u64,
                    mime: Self::str_to_mime(&row.get::<String>(6).unwrap_or_default()),
                    topic_folder_id: row.get::<Option<String>>(7).unwrap_or(None),
                });
            }
        }

        let folder_count = folders.len() as u32;
        let file_count = files.len() as u32;
        let video_count = files
            .iter()
            .filter(|f| f.mime == MimeClass::Video)
            .count() as u32;
        let pdf_count = files.iter().filter(|f| f.mime == MimeClass::Pdf).count() as u32;

        // Folders occupy the first `folder_count` slots of the combined listing;
        // files occupy the remainder. The page window can straddle the boundary.
        let total_items = folder_count + file_count;
        let start = page.saturating_sub(1) * per_page;
        let end = (start + per_page).min(total_items);
        if start >= total_items {
            return Ok(ItemPage {
                folders: vec![],
                files: vec![],
                has_more: false,
                folder_count,
                file_count,
                video_count,
                pdf_count,
            });
        }

        let page_folders = if start < folder_count {
            let f_end = end.min(folder_count);
            folders[start as usize..f_end as usize].to_vec()
        } else {
            vec![]
        };
        let page_files = if end > folder_count {
            let f_start = start.saturating_sub(folder_count);
            let f_end = end - folder_count;
            files[f_start as usize..f_end as usize].to_vec()
        } else {
            vec![]
        };

        Ok(ItemPage {
            folders: page_folders,
            files: page_files,
            has_more: end < total_items,
            folder_count,
            file_count,
            video_count,
            pdf_count,
        })
    }

    async fn is_premium(&self, user_id: i64) -> Result<bool, BotError> {
        Ok(self.get_premium(user_id).await?.is_some())
    }

    async fn get_premium(&self, user_id: i64) -> Result<Option<PremiumGrant>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT user_id, expiry, granted_at, transferred_from FROM premium_grants WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        let grant = PremiumGrant {
            user_id: row.get(0).unwrap_or_default(),
            expiry: row.get(1).unwrap_or_default(),
            granted_at: row.get(2).unwrap_or_default(),
            transferred_from: row.get::<Option<i64>>(3).unwrap_or(None),
        };
        if grant.expiry <= Self::now() {
            conn.execute(
                "DELETE FROM premium_grants WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
            return Ok(None);
        }
        Ok(Some(grant))
    }

    async fn add_premium(
        &self,
        user_id: i64,
        value: i64,
        unit: DurationUnit,
    ) -> Result<PremiumGrant, BotError> {
        let now = Self::now();
        let expiry = now + unit.to_seconds(value);
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO premium_grants (user_id, expiry, granted_at, transferred_from)
               VALUES (?1, ?2, ?3, NULL)
               ON CONFLICT (user_id) DO UPDATE SET expiry = ?2, granted_at = ?3, transferred_from = NULL"#,
            params![user_id, expiry, now],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(PremiumGrant {
            user_id,
            expiry,
            granted_at: now,
            transferred_from: None,
        })
    }

    async fn revoke_premium(&self, user_id: i64) -> Result<(), BotError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM premium_grants WHERE user_id = ?1",
            params![user_id],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn transfer_premium(&self, from: i64, to: i64) -> Result<PremiumGrant, BotError> {
        let source = self
            .get_premium(from)
            .await?
            .ok_or_else(|| BotError::Other("source has no active premium grant".into()))?;
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM premium_grants WHERE user_id = ?1",
            params![from],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        conn.execute(
            r#"INSERT INTO premium_grants (user_id, expiry, granted_at, transferred_from)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (user_id) DO UPDATE SET expiry = ?2, granted_at = ?3, transferred_from = ?4"#,
            params![to, source.expiry, Self::now(), from],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(PremiumGrant {
            user_id: to,
            expiry: source.expiry,
            granted_at: Self::now(),
            transferred_from: Some(from),
        })
    }

    async fn list_premium(&self) -> Result<Vec<PremiumGrant>, BotError> {
        self.sweep_expired_premium().await?;
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT user_id, expiry, granted_at, transferred_from FROM premium_grants ORDER BY expiry DESC",
                (),
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            out.push(PremiumGrant {
                user_id: row.get(0).unwrap_or_default(),
                expiry: row.get(1).unwrap_or_default(),
                granted_at: row.get(2).unwrap_or_default(),
                transferred_from: row.get::<Option<i64>>(3).unwrap_or(None),
            });
        }
        Ok(out)
    }

    async fn count_premium(&self) -> Result<u64, BotError> {
        self.sweep_expired_premium().await?;
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM premium_grants", ())
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .ok_or(BotError::NotFound)?;
        Ok(row.get::<i64>(0).unwrap_or(0) as u64)
    }

    async fn increment_usage(&self, user_id: i64) -> Result<u32, BotError> {
        let key = Self::usage_key(user_id);
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO daily_usage (key, count) VALUES (?1, 1)
               ON CONFLICT (key) DO UPDATE SET count = count + 1"#,
            params![key.clone()],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let mut rows = conn
            .query("SELECT count FROM daily_usage WHERE key = ?1", params![key])
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let row = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .ok_or(BotError::NotFound)?;
        Ok(row.get::<i64>(0).unwrap_or(0) as u32)
    }

    async fn usage_today(&self, user_id: i64) -> Result<u32, BotError> {
        let key = Self::usage_key(user_id);
        let conn = self.conn()?;
        let mut rows = conn
            .query("SELECT count FROM daily_usage WHERE key = ?1", params![key])
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        match rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            Some(row) => Ok(row.get::<i64>(0).unwrap_or(0) as u32),
            None => Ok(0),
        }
    }

    async fn save_session(&self, user_id: i64, ciphertext: &str) -> Result<(), BotError> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO user_secrets (user_id, session_ciphertext, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT (user_id) DO UPDATE SET session_ciphertext = ?2, updated_at = ?3"#,
            params![user_id, ciphertext, Self::now()],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_session(&self, user_id: i64) -> Result<Option<String>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT session_ciphertext FROM user_secrets WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .and_then(|row| row.get::<Option<String>>(0).unwrap_or(None)))
    }

    async fn delete_session(&self, user_id: i64) -> Result<bool, BotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE user_secrets SET session_ciphertext = NULL WHERE user_id = ?1 AND session_ciphertext IS NOT NULL",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn save_bot_token(&self, user_id: i64, ciphertext: &str) -> Result<(), BotError> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO user_secrets (user_id, bot_token_ciphertext, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT (user_id) DO UPDATE SET bot_token_ciphertext = ?2, updated_at = ?3"#,
            params![user_id, ciphertext, Self::now()],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_bot_token(&self, user_id: i64) -> Result<Option<String>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT bot_token_ciphertext FROM user_secrets WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
            .and_then(|row| row.get::<Option<String>>(0).unwrap_or(None)))
    }

    async fn delete_bot_token(&self, user_id: i64) -> Result<bool, BotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE user_secrets SET bot_token_ciphertext = NULL WHERE user_id = ?1 AND bot_token_ciphertext IS NOT NULL",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn get_settings(&self, user_id: i64) -> Result<UserSettings, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT chat_id, rename_tag, caption, replacements_json, delete_words_json, thumbnail_path
                 FROM user_settings WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        else {
            return Ok(UserSettings::default());
        };
        let replacements_json: String = row.get(3).unwrap_or_else(|_| "{}".into());
        let delete_words_json: String = row.get(4).unwrap_or_else(|_| "[]".into());
        Ok(UserSettings {
            chat_id: row.get::<Option<String>>(0).unwrap_or(None),
            rename_tag: row.get::<Option<String>>(1).unwrap_or(None),
            caption: row.get::<Option<String>>(2).unwrap_or(None),
            replacements: serde_json::from_str(&replacements_json).unwrap_or_default(),
            delete_words: serde_json::from_str(&delete_words_json).unwrap_or_default(),
            thumbnail_path: row.get::<Option<String>>(5).unwrap_or(None),
        })
    }

    async fn update_setting(&self, user_id: i64, settings: UserSettings) -> Result<(), BotError> {
        let conn = self.conn()?;
        let replacements_json =
            serde_json::to_string(&settings.replacements).unwrap_or_else(|_| "{}".into());
        let delete_words_json =
            serde_json::to_string(&settings.delete_words).unwrap_or_else(|_| "[]".into());
        conn.execute(
            r#"INSERT INTO user_settings
               (user_id, chat_id, rename_tag, caption, replacements_json, delete_words_json, thumbnail_path)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT (user_id) DO UPDATE SET
                 chat_id = ?2, rename_tag = ?3, caption = ?4,
                 replacements_json = ?5, delete_words_json = ?6, thumbnail_path = ?7"#,
            params![
                user_id,
                settings.chat_id,
                settings.rename_tag,
                settings.caption,
                replacements_json,
                delete_words_json,
                settings.thumbnail_path,
            ],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn clear_settings(&self, user_id: i64) -> Result<(), BotError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM user_settings WHERE user_id = ?1",
            params![user_id],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_plan(&self, key: &str) -> Result<Option<Plan>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT key, label, duration_value, duration_unit, price FROM plans WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };
        let unit_str: String = row.get(3).unwrap_or_default();
        Ok(Some(Plan {
            key: row.get(0).unwrap_or_default(),
            label: row.get(1).unwrap_or_default(),
            duration_value: row.get(2).unwrap_or_default(),
            duration_unit: DurationUnit::parse(&unit_str).ok_or(BotError::InvalidUnit)?,
            price: row.get(4).unwrap_or_default(),
        }))
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, BotError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT key, label, duration_value, duration_unit, price FROM plans ORDER BY key ASC",
                (),
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?
        {
            let unit_str: String = row.get(3).unwrap_or_default();
            let Some(unit) = DurationUnit::parse(&unit_str) else {
                continue;
            };
            out.push(Plan {
                key: row.get(0).unwrap_or_default(),
                label: row.get(1).unwrap_or_default(),
                duration_value: row.get(2).unwrap_or_default(),
                duration_unit: unit,
                price: row.get(4).unwrap_or_default(),
            });
        }
        Ok(out)
    }

    async fn upsert_plan(&self, plan: Plan) -> Result<(), BotError> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO plans (key, label, duration_value, duration_unit, price)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT (key) DO UPDATE SET label = ?2, duration_value = ?3, duration_unit = ?4, price = ?5"#,
            params![
                plan.key,
                plan.label,
                plan.duration_value,
                Self::unit_to_str(plan.duration_unit),
                plan.price,
            ],
        )
        .await
        .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_plan(&self, key: &str) -> Result<bool, BotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM plans WHERE key = ?1", params![key])
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(changed > 0)
    }

    async fn sweep_expired_premium(&self) -> Result<u64, BotError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM premium_grants WHERE expiry <= ?1",
                params![Self::now()],
            )
            .await
            .map_err(|e| BotError::StoreUnavailable(e.to_string()))?;
        Ok(changed)
    }
}

/// Small dependency-free id generator (UUIDv4-shaped, not RFC-4122 strict):
/// folders only need a unique opaque string, not interop with another system.
fn uuid_v4() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MimeClass;

    async fn temp_store() -> SqliteStore {
        let dir = tempdir();
        SqliteStore::connect(dir).await.unwrap()
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("tg-gateway-test-{}", uuid_v4()));
        p
    }

    #[tokio::test]
    async fn get_or_create_folder_is_idempotent() {
        let store = temp_store().await;
        let a = store
            .get_or_create_folder("root", "Class 10", Some(1))
            .await
            .unwrap();
        let b = store
            .get_or_create_folder("root", "Class 10", Some(1))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn add_file_if_novel_dedupes_by_chat_and_hash() {
        let store = temp_store().await;
        let file = FileRecord {
            id: "f1".into(),
            chat_id: 100,
            msg_id: 1,
            hash: "abc123".into(),
            name: "lesson1.mp4".into(),
            size: 5_000_000,
            mime: MimeClass::Video,
            topic_folder_id: None,
        };
        assert!(store.add_file_if_novel(file.clone()).await.unwrap());
        assert!(!store.add_file_if_novel(file).await.unwrap());
    }

    #[tokio::test]
    async fn increment_usage_is_monotone() {
        let store = temp_store().await;
        let a = store.increment_usage(1).await.unwrap();
        let b = store.increment_usage(1).await.unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn premium_transfer_moves_expiry_and_tags_source() {
        let store = temp_store().await;
        store.add_premium(1, 10, DurationUnit::Days).await.unwrap();
        let before = store.get_premium(1).await.unwrap().unwrap();
        let transferred = store.transfer_premium(1, 2).await.unwrap();
        assert_eq!(transferred.expiry, before.expiry);
        assert_eq!(transferred.transferred_from, Some(1));
        assert!(!store.is_premium(1).await.unwrap());
        assert!(store.is_premium(2).await.unwrap());
    }

    #[tokio::test]
    async fn pagination_covers_every_item_exactly_once() {
        let store = temp_store().await;
        for i in 0..5 {
            store
                .get_or_create_folder("root", &format!("f{i}"), Some(1))
                .await
                .unwrap();
        }
        for i in 0..10 {
            store
                .add_file_if_novel(FileRecord {
                    id: format!("file{i}"),
                    chat_id: 1,
                    msg_id: i,
                    hash: format!("h{i}"),
                    name: format!("n{i}.pdf"),
                    size: 10,
                    mime: MimeClass::Pdf,
                    topic_folder_id: Some("root".into()),
                })
                .await
                .unwrap();
        }
        let mut seen_folders = 0;
        let mut seen_files = 0;
        let mut page = 1;
        loop {
            let items = store
                .list_items("root", Some(1), page, 8)
                .await
                .unwrap();
            seen_folders += items.folders.len();
            seen_files += items.files.len();
            if !items.has_more {
                break;
            }
            page += 1;
        }
        assert_eq!(seen_folders, 5);
        assert_eq!(seen_files, 10);
    }
}
