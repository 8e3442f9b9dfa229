//! Storage traits and record types.
//!
//! Persistence sits behind two async traits: [`BillingStore`] for
//! subscriptions, invoices, payment methods, and the processed-event
//! ledger, and [`UsageStore`] for metered counters. Implementations decide
//! the backend; this crate ships an in-memory implementation in the
//! [`test`] module for tests and local development.
//!
//! Contract notes for implementors:
//! - [`BillingStore::insert_event_once`] is the idempotency primitive. It
//!   must be atomic: given concurrent calls with the same gateway event id,
//!   exactly one returns `true`. SQL backends should implement it as an
//!   insert with a unique constraint on the event id, treating the
//!   constraint violation as `false`.
//! - [`UsageStore::increment_usage_within`] must be a single atomic
//!   check-and-add. Two concurrent callers sitting one below the limit must
//!   not both succeed. SQL backends should use a conditional `UPDATE` (or
//!   upsert) whose `WHERE` clause enforces the cap.
//! - Webhook handlers claim their ledger row and then apply mutations as
//!   separate calls. Backends that can wrap both in one transaction should.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tiers::Tier;
use crate::usage::{UsageDecision, UsageKey};

/// Subscription status, mirroring the gateway's vocabulary verbatim.
///
/// The set is open: statuses this crate has no special handling for are
/// preserved through [`SubscriptionStatus::Other`] rather than rejected,
/// so a new gateway status never breaks ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
    Other(String),
}

impl SubscriptionStatus {
    /// Parses a gateway status string, preserving unknown values.
    #[must_use]
    pub fn from_gateway(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            "paused" => Self::Paused,
            other => Self::Other(other.to_string()),
        }
    }

    /// The gateway's string for this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
            Self::Other(s) => s,
        }
    }

    /// Whether this status grants entitlements. Only `active` and
    /// `trialing` do.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl From<String> for SubscriptionStatus {
    fn from(s: String) -> Self {
        Self::from_gateway(&s)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(s: SubscriptionStatus) -> Self {
        s.as_str().to_string()
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally mirrored subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Internal row id, independent of gateway ids.
    pub id: String,
    pub tenant_id: String,
    pub gateway_subscription_id: String,
    pub gateway_customer_id: String,
    pub gateway_price_id: String,
    pub gateway_product_id: String,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether this row currently grants entitlements.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        self.status.grants_access()
    }
}

/// Partial update applied to a subscription row.
///
/// `None` fields are left unchanged. `canceled_at` is doubly optional so
/// callers can distinguish "leave it" (`None`) from "clear it"
/// (`Some(None)`). The merge is mechanical; status is never derived from
/// other fields.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub tier: Option<Tier>,
    pub status: Option<SubscriptionStatus>,
    pub gateway_price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_start: Option<Option<DateTime<Utc>>>,
    pub trial_end: Option<Option<DateTime<Utc>>>,
    pub cancel_at_period_end: Option<bool>,
    pub canceled_at: Option<Option<DateTime<Utc>>>,
}

impl SubscriptionUpdate {
    /// Applies this update onto a record in place.
    pub fn apply_to(&self, record: &mut SubscriptionRecord) {
        if let Some(tier) = self.tier {
            record.tier = tier;
        }
        if let Some(status) = &self.status {
            record.status = status.clone();
        }
        if let Some(price_id) = &self.gateway_price_id {
            record.gateway_price_id = price_id.clone();
        }
        if let Some(start) = self.current_period_start {
            record.current_period_start = start;
        }
        if let Some(end) = self.current_period_end {
            record.current_period_end = end;
        }
        if let Some(trial_start) = self.trial_start {
            record.trial_start = trial_start;
        }
        if let Some(trial_end) = self.trial_end {
            record.trial_end = trial_end;
        }
        if let Some(cancel) = self.cancel_at_period_end {
            record.cancel_at_period_end = cancel;
        }
        if let Some(canceled_at) = self.canceled_at {
            record.canceled_at = canceled_at;
        }
    }
}

/// Outcome recorded in the processed-event ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failed,
}

/// One row in the processed-event ledger.
///
/// The gateway event id carries a uniqueness guarantee; it is the
/// idempotency key for webhook processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEventRecord {
    pub gateway_event_id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub status: EventStatus,
    pub subscription_id: Option<String>,
    pub invoice_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A paid invoice mirror. Amounts are stored in major currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub gateway_invoice_id: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// A stored payment method, card or bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodRecord {
    pub gateway_payment_method_id: String,
    pub tenant_id: String,
    /// Gateway method type string, e.g. `card` or `us_bank_account`.
    pub kind: String,
    pub last4: Option<String>,
    pub brand: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
    pub bank_name: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Persistence for subscriptions, invoices, payment methods, and the
/// processed-event ledger.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn insert_subscription(&self, record: SubscriptionRecord) -> Result<()>;

    /// Merges `update` into the row with internal id `id`. Errors with
    /// [`crate::BillingError::SubscriptionNotFound`] when the id is
    /// unknown.
    async fn update_subscription(
        &self,
        id: &str,
        update: SubscriptionUpdate,
    ) -> Result<SubscriptionRecord>;

    async fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>>;

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>>;

    /// Most recently created subscription for a gateway customer,
    /// regardless of status.
    async fn find_latest_by_gateway_customer_id(
        &self,
        gateway_customer_id: &str,
    ) -> Result<Option<SubscriptionRecord>>;

    /// Most recently created row for the tenant, regardless of status.
    /// Canceled history still points at the tenant's gateway customer.
    async fn find_latest_by_tenant_id(
        &self,
        tenant_id: &str,
    ) -> Result<Option<SubscriptionRecord>>;

    /// Most recently created row for the tenant whose status grants
    /// access (`active` or `trialing`).
    async fn active_subscription(&self, tenant_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Inserts a ledger row, returning `false` without writing when the
    /// gateway event id has already been recorded. Must be atomic.
    async fn insert_event_once(&self, record: BillingEventRecord) -> Result<bool>;

    async fn insert_invoice(&self, record: InvoiceRecord) -> Result<()>;

    /// Upserts by gateway payment-method id.
    async fn upsert_payment_method(&self, record: PaymentMethodRecord) -> Result<()>;

    /// The tenant's default payment method, when one is stored.
    async fn default_payment_method(
        &self,
        tenant_id: &str,
    ) -> Result<Option<PaymentMethodRecord>>;
}

/// Persistence for metered usage counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Current counter value; zero when the row does not exist.
    async fn get_usage(&self, key: &UsageKey) -> Result<u64>;

    /// Unconditional add, creating the row on first touch. Returns the
    /// post-increment value.
    async fn increment_usage(&self, key: &UsageKey, delta: u64) -> Result<u64>;

    /// Atomic conditional add: applies only when `current + delta <= limit`.
    async fn increment_usage_within(
        &self,
        key: &UsageKey,
        delta: u64,
        limit: u64,
    ) -> Result<UsageDecision>;

    /// Subtracts, clamping at zero. Missing rows are a no-op returning 0.
    async fn decrement_usage(&self, key: &UsageKey, delta: u64) -> Result<u64>;
}

/// In-memory store for tests and local development.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct Inner {
        subscriptions: Vec<SubscriptionRecord>,
        events: HashMap<String, BillingEventRecord>,
        invoices: Vec<InvoiceRecord>,
        payment_methods: HashMap<String, PaymentMethodRecord>,
        usage: HashMap<UsageKey, u64>,
    }

    /// In-memory [`BillingStore`] + [`UsageStore`].
    ///
    /// A single mutex guards all state, which makes `insert_event_once`
    /// and `increment_usage_within` trivially atomic. Clones share state.
    #[derive(Clone, Default)]
    pub struct InMemoryBillingStore {
        inner: Arc<Mutex<Inner>>,
    }

    impl InMemoryBillingStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            // Poisoning only happens when a test already panicked.
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// All subscription rows, insertion order. Test helper.
        #[must_use]
        pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
            self.lock().subscriptions.clone()
        }

        /// All ledger rows. Test helper.
        #[must_use]
        pub fn events(&self) -> Vec<BillingEventRecord> {
            self.lock().events.values().cloned().collect()
        }

        /// All invoice rows. Test helper.
        #[must_use]
        pub fn invoices(&self) -> Vec<InvoiceRecord> {
            self.lock().invoices.clone()
        }

        /// All payment-method rows. Test helper.
        #[must_use]
        pub fn payment_methods(&self) -> Vec<PaymentMethodRecord> {
            self.lock().payment_methods.values().cloned().collect()
        }
    }

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn insert_subscription(&self, record: SubscriptionRecord) -> Result<()> {
            self.lock().subscriptions.push(record);
            Ok(())
        }

        async fn update_subscription(
            &self,
            id: &str,
            update: SubscriptionUpdate,
        ) -> Result<SubscriptionRecord> {
            let mut inner = self.lock();
            let record = inner
                .subscriptions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| crate::BillingError::SubscriptionNotFound(id.to_string()))?;
            update.apply_to(record);
            Ok(record.clone())
        }

        async fn get_subscription(&self, id: &str) -> Result<Option<SubscriptionRecord>> {
            Ok(self.lock().subscriptions.iter().find(|s| s.id == id).cloned())
        }

        async fn find_by_gateway_subscription_id(
            &self,
            gateway_subscription_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .lock()
                .subscriptions
                .iter()
                .find(|s| s.gateway_subscription_id == gateway_subscription_id)
                .cloned())
        }

        async fn find_latest_by_gateway_customer_id(
            &self,
            gateway_customer_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .lock()
                .subscriptions
                .iter()
                .rev()
                .find(|s| s.gateway_customer_id == gateway_customer_id)
                .cloned())
        }

        async fn find_latest_by_tenant_id(
            &self,
            tenant_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .lock()
                .subscriptions
                .iter()
                .rev()
                .find(|s| s.tenant_id == tenant_id)
                .cloned())
        }

        async fn active_subscription(
            &self,
            tenant_id: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .lock()
                .subscriptions
                .iter()
                .rev()
                .find(|s| s.tenant_id == tenant_id && s.grants_access())
                .cloned())
        }

        async fn insert_event_once(&self, record: BillingEventRecord) -> Result<bool> {
            let mut inner = self.lock();
            if inner.events.contains_key(&record.gateway_event_id) {
                return Ok(false);
            }
            inner
                .events
                .insert(record.gateway_event_id.clone(), record);
            Ok(true)
        }

        async fn insert_invoice(&self, record: InvoiceRecord) -> Result<()> {
            self.lock().invoices.push(record);
            Ok(())
        }

        async fn upsert_payment_method(&self, record: PaymentMethodRecord) -> Result<()> {
            self.lock()
                .payment_methods
                .insert(record.gateway_payment_method_id.clone(), record);
            Ok(())
        }

        async fn default_payment_method(
            &self,
            tenant_id: &str,
        ) -> Result<Option<PaymentMethodRecord>> {
            Ok(self
                .lock()
                .payment_methods
                .values()
                .find(|pm| pm.tenant_id == tenant_id && pm.is_default)
                .cloned())
        }
    }

    #[async_trait]
    impl UsageStore for InMemoryBillingStore {
        async fn get_usage(&self, key: &UsageKey) -> Result<u64> {
            Ok(self.lock().usage.get(key).copied().unwrap_or(0))
        }

        async fn increment_usage(&self, key: &UsageKey, delta: u64) -> Result<u64> {
            let mut inner = self.lock();
            let counter = inner.usage.entry(key.clone()).or_insert(0);
            *counter = counter.saturating_add(delta);
            Ok(*counter)
        }

        async fn increment_usage_within(
            &self,
            key: &UsageKey,
            delta: u64,
            limit: u64,
        ) -> Result<UsageDecision> {
            let mut inner = self.lock();
            let counter = inner.usage.entry(key.clone()).or_insert(0);
            match counter.checked_add(delta) {
                Some(next) if next <= limit => {
                    *counter = next;
                    Ok(UsageDecision::Applied { current: next })
                }
                _ => Ok(UsageDecision::LimitExceeded {
                    current: *counter,
                    limit,
                }),
            }
        }

        async fn decrement_usage(&self, key: &UsageKey, delta: u64) -> Result<u64> {
            let mut inner = self.lock();
            let counter = inner.usage.entry(key.clone()).or_insert(0);
            *counter = counter.saturating_sub(delta);
            Ok(*counter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::InMemoryBillingStore;
    use super::*;
    use crate::usage::PeriodKind;
    use chrono::TimeZone;

    fn record(id: &str, tenant: &str, status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            gateway_subscription_id: format!("sub_{id}"),
            gateway_customer_id: format!("cus_{tenant}"),
            gateway_price_id: "price_pro_monthly".to_string(),
            gateway_product_id: "prod_pro".to_string(),
            tier: Tier::Pro,
            status,
            current_period_start: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            current_period_end: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn active_subscription_prefers_most_recent() {
        let store = InMemoryBillingStore::new();
        store
            .insert_subscription(record("old", "t1", SubscriptionStatus::Active))
            .await
            .unwrap();
        store
            .insert_subscription(record("new", "t1", SubscriptionStatus::Trialing))
            .await
            .unwrap();

        let active = store.active_subscription("t1").await.unwrap().unwrap();
        assert_eq!(active.id, "new");
    }

    #[tokio::test]
    async fn latest_by_tenant_ignores_status() {
        let store = InMemoryBillingStore::new();
        store
            .insert_subscription(record("only", "t1", SubscriptionStatus::Canceled))
            .await
            .unwrap();

        let latest = store.find_latest_by_tenant_id("t1").await.unwrap().unwrap();
        assert_eq!(latest.id, "only");
        assert!(store.find_latest_by_tenant_id("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn canceled_rows_do_not_grant_access() {
        let store = InMemoryBillingStore::new();
        store
            .insert_subscription(record("only", "t1", SubscriptionStatus::Canceled))
            .await
            .unwrap();
        assert!(store.active_subscription("t1").await.unwrap().is_none());

        store
            .insert_subscription(record("pd", "t1", SubscriptionStatus::PastDue))
            .await
            .unwrap();
        assert!(store.active_subscription("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_without_deriving_status() {
        let store = InMemoryBillingStore::new();
        store
            .insert_subscription(record("s1", "t1", SubscriptionStatus::Active))
            .await
            .unwrap();

        let updated = store
            .update_subscription(
                "s1",
                SubscriptionUpdate {
                    cancel_at_period_end: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.cancel_at_period_end);
        assert_eq!(updated.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let store = InMemoryBillingStore::new();
        let err = store
            .update_subscription("missing", SubscriptionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::BillingError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn event_ledger_claims_once() {
        let store = InMemoryBillingStore::new();
        let row = BillingEventRecord {
            gateway_event_id: "evt_1".to_string(),
            tenant_id: "t1".to_string(),
            event_type: "customer.subscription.created".to_string(),
            status: EventStatus::Success,
            subscription_id: None,
            invoice_id: None,
            error_message: None,
            created_at: Utc::now(),
        };
        assert!(store.insert_event_once(row.clone()).await.unwrap());
        assert!(!store.insert_event_once(row).await.unwrap());
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn conditional_increment_enforces_limit() {
        let store = InMemoryBillingStore::new();
        let key = UsageKey::current("t1", "favorites_count", PeriodKind::Lifetime);

        for expected in 1..=5 {
            let decision = store.increment_usage_within(&key, 1, 5).await.unwrap();
            assert_eq!(decision, UsageDecision::Applied { current: expected });
        }
        let decision = store.increment_usage_within(&key, 1, 5).await.unwrap();
        assert_eq!(
            decision,
            UsageDecision::LimitExceeded {
                current: 5,
                limit: 5
            }
        );
        assert_eq!(store.get_usage(&key).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn decrement_clamps_at_zero() {
        let store = InMemoryBillingStore::new();
        let key = UsageKey::current("t1", "favorites_count", PeriodKind::Lifetime);

        assert_eq!(store.decrement_usage(&key, 3).await.unwrap(), 0);
        store.increment_usage(&key, 2).await.unwrap();
        assert_eq!(store.decrement_usage(&key, 5).await.unwrap(), 0);
    }

    #[test]
    fn status_round_trips_unknown_values() {
        let status = SubscriptionStatus::from_gateway("some_future_status");
        assert_eq!(status.as_str(), "some_future_status");
        assert!(!status.grants_access());

        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"some_future_status\"");
        let back: SubscriptionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
