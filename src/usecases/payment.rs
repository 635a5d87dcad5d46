//! Payment Handler (C13): Telegram Stars plan keyboard, invoice issuance,
//! pre-checkout approval, and the payment-success → premium-grant path.
//!
//! Plans live in the store (C1, `get_plan`/`list_plans`/`upsert_plan`), not
//! hardcoded here — this module only knows the fixed three keys the
//! original's `/pay` keyboard always offers (`d`, `w`, `m`) as defaults to
//! seed an empty store with, plus the invoice/payload shape.

use crate::domain::{BotError, Plan, PremiumGrant};
use crate::ports::StorePort;
use std::sync::Arc;

/// Currency code Telegram Stars invoices use.
pub const STARS_CURRENCY: &str = "XTR";

/// Default plan set seeded when the store has none — mirrors the original's
/// `Telegram.P0` table (daily/weekly/monthly, in Stars).
pub fn default_plans() -> Vec<Plan> {
    use crate::domain::DurationUnit;
    vec![
        Plan {
            key: "d".to_string(),
            label: "1 Day".to_string(),
            duration_value: 1,
            duration_unit: DurationUnit::Days,
            price: "50".to_string(),
        },
        Plan {
            key: "w".to_string(),
            label: "1 Week".to_string(),
            duration_value: 1,
            duration_unit: DurationUnit::Weeks,
            price: "250".to_string(),
        },
        Plan {
            key: "m".to_string(),
            label: "1 Month".to_string(),
            duration_value: 1,
            duration_unit: DurationUnit::Month,
            price: "800".to_string(),
        },
    ]
}

/// One row of the `/plans` inline keyboard: label plus `p_<key>` callback.
pub fn plan_button(plan: &Plan) -> (String, String) {
    let unit_word = match plan.duration_unit {
        crate::domain::DurationUnit::Min => "Star",
        _ => "Stars",
    };
    (
        format!("⭐ {} - {} {}", plan.label, plan.price, unit_word),
        format!("p_{}", plan.key),
    )
}

/// The `/plans` message body, listing every plan's label and price.
pub fn build_plans_message(plans: &[Plan]) -> String {
    let mut lines = vec!["💎 **Choose your premium plan:**".to_string(), String::new()];
    for plan in plans {
        lines.push(format!("📅 **{}** — {} Stars", plan.label, plan.price));
    }
    lines.push(String::new());
    lines.push("Select a plan below to continue ⤵️".to_string());
    lines.join("\n")
}

/// Extracts the plan key from a `p_<key>` callback (the leading `p_` must
/// already be recognised by the caller's routing, same as [`crate::usecases::browser::CallbackAction::Plan`]).
pub fn plan_key_from_callback(data: &str) -> Option<&str> {
    data.strip_prefix("p_").filter(|k| !k.is_empty())
}

/// Invoice fields for one plan purchase, ready to hand to whatever
/// `send_invoice` binding the adapter uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub currency: String,
    pub amount: u32,
}

/// Builds the invoice for `plan` bought by `user_id`. Fails only if `plan`'s
/// price string isn't a valid amount (plans are store-validated on
/// `upsert_plan`, so this should never trip in practice, but the price is
/// still opaque text per the data model).
pub fn build_invoice(plan: &Plan, user_id: i64) -> Result<InvoiceRequest, BotError> {
    let amount: u32 = plan
        .price
        .parse()
        .map_err(|_| BotError::Other(format!("plan {} has a non-numeric price", plan.key)))?;
    Ok(InvoiceRequest {
        title: format!("Premium {}", plan.label),
        description: format!("{} {:?} subscription", plan.duration_value, plan.duration_unit),
        payload: format!("{}_{user_id}", plan.key),
        currency: STARS_CURRENCY.to_string(),
        amount,
    })
}

/// Parses a successful-payment invoice payload (`"<key>_<userId>"`) back
/// into its parts. The key may itself contain no `_`, so this splits from
/// the right once.
pub fn parse_payload(payload: &str) -> Option<(&str, i64)> {
    let (key, user_id) = payload.rsplit_once('_')?;
    let user_id = user_id.parse().ok()?;
    Some((key, user_id))
}

/// Outcome of a confirmed payment: the grant plus the text to show the payer.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub grant: PremiumGrant,
    pub plan_label: String,
    pub charge_id: String,
}

pub struct PaymentService {
    store: Arc<dyn StorePort>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn StorePort>) -> Self {
        Self { store }
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, BotError> {
        let plans = self.store.list_plans().await?;
        if plans.is_empty() {
            for plan in default_plans() {
                self.store.upsert_plan(plan).await?;
            }
            return self.store.list_plans().await;
        }
        Ok(plans)
    }

    pub async fn build_invoice_for_key(&self, key: &str, user_id: i64) -> Result<InvoiceRequest, BotError> {
        let plan = self.store.get_plan(key).await?.ok_or(BotError::NotFound)?;
        build_invoice(&plan, user_id)
    }

    /// Pre-checkout queries always approve, per the original — Telegram
    /// itself has already validated the invoice shape by this point.
    pub fn approve_pre_checkout(&self) -> bool {
        true
    }

    /// Handles a `successful_payment` event: parses the payload, grants
    /// premium for the plan's duration, and returns what to tell the payer.
    /// The `charge_id` is threaded through unconditionally so the caller can
    /// report it to the owner even if the grant step below fails first.
    pub async fn handle_successful_payment(
        &self,
        payload: &str,
        charge_id: &str,
    ) -> Result<PaymentOutcome, BotError> {
        let (key, user_id) = parse_payload(payload).ok_or(BotError::InvalidLink)?;
        let plan = self.store.get_plan(key).await?.ok_or(BotError::NotFound)?;
        let grant = self
            .store
            .add_premium(user_id, plan.duration_value, plan.duration_unit)
            .await?;
        Ok(PaymentOutcome {
            grant,
            plan_label: plan.label.clone(),
            charge_id: charge_id.to_string(),
        })
    }
}

/// Text shown to the payer after a successful grant.
pub fn render_payment_confirmation(outcome: &PaymentOutcome) -> String {
    format!(
        "✅ **Paid!**\n\n💎 Premium {} active!\n⏰ Till: {}\n🔖 Txn: `{}`",
        outcome.plan_label, outcome.grant.expiry, outcome.charge_id
    )
}

/// Text sent to each owner id on a successful purchase.
pub fn render_owner_notification(user_id: i64, charge_id: &str) -> String {
    format!("User {user_id} purchased premium. Txn: {charge_id}")
}

/// Text sent to each owner id when a payment event couldn't be completed
/// (plan lookup/grant failure) — the charge has already gone through on
/// Telegram's side, so this needs manual reconciliation.
pub fn render_owner_failure_notice(user_id: i64, charge_id: &str, error: &BotError) -> String {
    format!("Payment from user {user_id} (txn `{charge_id}`) failed to grant premium: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DurationUnit, FileRecord, Folder, UserSettings};
    use crate::ports::ItemPage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        plans: Mutex<Vec<Plan>>,
        granted: Mutex<Option<(i64, i64, DurationUnit)>>,
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
        async fn is_premium(&self, _: i64) -> Result<bool, BotError> { Ok(false) }
        async fn add_premium(&self, user_id: i64, value: i64, unit: DurationUnit) -> Result<PremiumGrant, BotError> {
            *self.granted.lock().unwrap() = Some((user_id, value, unit));
            Ok(PremiumGrant { user_id, expiry: unit.to_seconds(value), granted_at: 0, transferred_from: None })
        }
        async fn revoke_premium(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn transfer_premium(&self, _: i64, _: i64) -> Result<PremiumGrant, BotError> { unimplemented!() }
        async fn list_premium(&self) -> Result<Vec<PremiumGrant>, BotError> { Ok(vec![]) }
        async fn count_premium(&self) -> Result<u64, BotError> { Ok(0) }
        async fn get_premium(&self, _: i64) -> Result<Option<PremiumGrant>, BotError> { Ok(None) }
        async fn increment_usage(&self, _: i64) -> Result<u32, BotError> { Ok(0) }
        async fn usage_today(&self, _: i64) -> Result<u32, BotError> { Ok(0) }
        async fn save_session(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_session(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_session(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn save_bot_token(&self, _: i64, _: &str) -> Result<(), BotError> { unimplemented!() }
        async fn get_bot_token(&self, _: i64) -> Result<Option<String>, BotError> { Ok(None) }
        async fn delete_bot_token(&self, _: i64) -> Result<bool, BotError> { unimplemented!() }
        async fn get_settings(&self, _: i64) -> Result<UserSettings, BotError> { Ok(UserSettings::default()) }
        async fn update_setting(&self, _: i64, _: UserSettings) -> Result<(), BotError> { unimplemented!() }
        async fn clear_settings(&self, _: i64) -> Result<(), BotError> { unimplemented!() }
        async fn get_plan(&self, key: &str) -> Result<Option<Plan>, BotError> {
            Ok(self.plans.lock().unwrap().iter().find(|p| p.key == key).cloned())
        }
        async fn list_plans(&self) -> Result<Vec<Plan>, BotError> { Ok(self.plans.lock().unwrap().clone()) }
        async fn upsert_plan(&self, plan: Plan) -> Result<(), BotError> {
            self.plans.lock().unwrap().push(plan);
            Ok(())
        }
        async fn delete_plan(&self, _: &str) -> Result<bool, BotError> { unimplemented!() }
        async fn sweep_expired_premium(&self) -> Result<u64, BotError> { Ok(0) }
    }

    #[test]
    fn payload_round_trips_key_and_user_id() {
        assert_eq!(parse_payload("m_12345"), Some(("m", 12345)));
        assert_eq!(parse_payload("notanumber"), None);
    }

    #[test]
    fn plan_key_strips_callback_prefix() {
        assert_eq!(plan_key_from_callback("p_d"), Some("d"));
        assert_eq!(plan_key_from_callback("p_"), None);
        assert_eq!(plan_key_from_callback("bch|1"), None);
    }

    #[test]
    fn invoice_uses_stars_currency_and_keyed_payload() {
        let plan = &default_plans()[1];
        let invoice = build_invoice(plan, 99).unwrap();
        assert_eq!(invoice.currency, "XTR");
        assert_eq!(invoice.payload, "w_99");
        assert_eq!(invoice.amount, 250);
    }

    #[tokio::test]
    async fn empty_store_is_seeded_with_default_plans() {
        let store = Arc::new(FakeStore::default());
        let svc = PaymentService::new(store);
        let plans = svc.list_plans().await.unwrap();
        assert_eq!(plans.len(), 3);
    }

    #[tokio::test]
    async fn successful_payment_grants_premium_for_the_plans_duration() {
        let store = Arc::new(FakeStore::default());
        let svc = PaymentService::new(store.clone());
        svc.list_plans().await.unwrap();
        let outcome = svc.handle_successful_payment("w_555", "charge123").await.unwrap();
        assert_eq!(outcome.charge_id, "charge123");
        assert_eq!(outcome.plan_label, "1 Week");
        assert_eq!(store.granted.lock().unwrap().unwrap(), (555, 1, DurationUnit::Weeks));
    }

    #[tokio::test]
    async fn unknown_plan_key_in_payload_is_not_found() {
        let store = Arc::new(FakeStore::default());
        let svc = PaymentService::new(store);
        svc.list_plans().await.unwrap();
        assert!(matches!(
            svc.handle_successful_payment("zzz_1", "c1").await,
            Err(BotError::NotFound)
        ));
    }
}
