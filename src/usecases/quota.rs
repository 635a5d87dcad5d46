//! Subscription & Quota Engine (C12): premium lifecycle and daily-limit math.
//! Premium lookup/expiry/TTL-delete lives in the store (C1); this layer holds
//! only the policy that doesn't need a database round trip to express.

use crate::domain::BotError;
use crate::ports::StorePort;
use std::sync::Arc;

/// Sentinel returned by `remaining_limit` for "no cap applies".
pub const UNLIMITED: i64 = -1;

pub struct QuotaService {
    store: Arc<dyn StorePort>,
    freemium_limit: u32,
    premium_limit: u32,
}

impl QuotaService {
    pub fn new(store: Arc<dyn StorePort>, freemium_limit: u32, premium_limit: u32) -> Self {
        Self {
            store,
            freemium_limit,
            premium_limit,
        }
    }

    pub async fn is_premium(&self, user_id: i64) -> Result<bool, BotError> {
        self.store.is_premium(user_id).await
    }

    /// `-1` (unlimited) when the user is premium and `PREMIUM_LIMIT == 0`;
    /// otherwise `max(0, limit - usage_today)`.
    pub async fn remaining_limit(&self, user_id: i64) -> Result<i64, BotError> {
        let premium = self.store.is_premium(user_id).await?;
        if premium && self.premium_limit == 0 {
            return Ok(UNLIMITED);
        }
        let limit = if premium {
            self.premium_limit
        } else {
            self.freemium_limit
        };
        let used = self.store.usage_today(user_id).await?;
        Ok((limit as i64 - used as i64).max(0))
    }

    /// Preflight check for `/batch`, `/single`, `/ytdl`, `/adl`: errs if the
    /// user cannot start one more processed message right now.
    pub async fn check_can_proceed(&self, user_id: i64) -> Result<(), BotError> {
        if self.freemium_limit == 0 && !self.store.is_premium(user_id).await? {
            return Err(BotError::SubscriptionRequired);
        }
        if self.remaining_limit(user_id).await? == 0 {
            return Err(BotError::DailyLimitReached);
        }
        Ok(())
    }

    pub async fn record_usage(&self, user_id: i64) -> Result<u32, BotError> {
        self.store.increment_usage(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DurationUnit, FileRecord, Folder, Plan, PremiumGrant, UserSettings};
    use crate::ports::ItemPage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        premium_until: Mutex<Option<i64>>,
        usage: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl StorePort for FakeStore {
        async fn upsert_user(&self, _: i64, _: &str) -> Result<(), BotError> { Ok(()) }
        async fn count_users(&self) -> Result<u64, BotError> { Ok(0) }
        async fn get_or_create_folder(&self, _: &str, _: &str, _: Option<i64>) -> Result<String, BotError> { unimplemented!() }
        async fn get_folder_with_parent(&self, _: &str) -> Result<(String, String, Option<i64>), BotError> { unimplemented!() }
        async fn list_auto_created_folders(&self, _: i64) -> Result<Vec<Folder>, BotError> { Ok(vec![]) }
        async fn add_file_if_novel(&self, _: FileRecord) -> Result<bool, BotError> { unimplemented!() }
        async fn list_files_with_topic(&self, _: i64) -> Result<Vec<FileRecord>, BotError> { Ok(vec![]) }
        async fn list_items(&self, _: &str, _: Option<i64>, _: u32, _: u32) -> Result<ItemPage, BotError> { unimplemented!() }
        async fn is_premium(&self, _: i64) -> Result<bool, BotError> {
            Ok(self.premium_until.lock().unwrap().is_some())
        }
        async fn add_premium(&self, _: i64, _: i64, _: DurationUnit) -> Result<PremiumGrant, BotError> { unimplemented!() }
        async fn revoke_premium(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn transfer_premium(&self, _: i64, _: i64) -> Result<PremiumGrant, BotError> { unimplemented!() }
        async fn list_premium(&self) -> Result<Vec<PremiumGrant>, BotError> { Ok(vec![]) }
        async fn count_premium(&self) -> Result<u64, BotError> { Ok(0) }
        async fn get_premium(&self, _: i64) -> Result<Option<PremiumGrant>, BotError> { Ok(None) }
        async fn increment_usage(&self, _: i64) -> Result<u32, BotError> {
            let mut u = self.usage.lock().unwrap();
            *u += 1;
            Ok(*u)
        }
        async fn usage_today(&self, _: i64) -> Result<u32, BotError> { Ok(*self.usage.lock().unwrap()) }
        async fn save_session(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_session(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_session(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn save_bot_token(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_bot_token(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_bot_token(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn get_settings(&self, _: i64) -> Result<UserSettings, BotError> { Ok(UserSettings::default()) }
        async fn update_setting(&self, _: i64, _: UserSettings) -> Result<(), BotError> { unimplemented!() }
        async fn clear_settings(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn get_plan(&self, _: &str) -> Result<Option<Plan>, BotError> { Ok(None) }
        async fn list_plans(&self) -> Result<Vec<Plan>, BotError> { Ok(vec![]) }
        async fn upsert_plan(&self, _: Plan) -> Result<(), BotError> { unimplemented!() }
        async fn delete_plan(&self, _: &str) -> Result<bool, BotError> { unimplemented!() }
        async fn sweep_expired_premium(&self) -> Result<u64, BotError> { Ok(0) }
    }

    #[tokio::test]
    async fn freemium_exhausted_rejects() {
        let store = Arc::new(FakeStore::default());
        *store.usage.lock().unwrap() = 3;
        let svc = QuotaService::new(store, 3, 0);
        assert!(matches!(
            svc.check_can_proceed(1).await,
            Err(BotError::DailyLimitReached)
        ));
    }

    #[tokio::test]
    async fn premium_with_zero_limit_is_unlimited() {
        let store = Arc::new(FakeStore::default());
        *store.premium_until.lock().unwrap() = Some(1);
        let svc = QuotaService::new(store, 3, 0);
        assert_eq!(svc.remaining_limit(1).await.unwrap(), UNLIMITED);
        assert!(svc.check_can_proceed(1).await.is_ok());
    }

    #[tokio::test]
    async fn freemium_zero_limit_requires_subscription() {
        let store = Arc::new(FakeStore::default());
        let svc = QuotaService::new(store, 0, 5);
        assert!(matches!(
            svc.check_can_proceed(1).await,
            Err(BotError::SubscriptionRequired)
        ));
    }
}
