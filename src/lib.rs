//! # tollgate
//!
//! Subscription and entitlement engine for multi-tenant SaaS applications.
//!
//! The crate covers the billing core that sits between a payment gateway
//! and application features:
//!
//! - **Tiers and limits** ([`tiers`]): one table mapping each tier to its
//!   feature limits, one table mapping metered features to usage metrics.
//! - **Usage ledger** ([`usage`], [`storage::UsageStore`]): counters
//!   bucketed daily, monthly, or over the account lifetime, with an atomic
//!   check-and-increment so limits hold under concurrency.
//! - **Entitlements** ([`entitlements`]): allow/deny decisions with
//!   user-facing denial messages and usage summaries.
//! - **Subscriptions** ([`subscription`], [`storage::BillingStore`]): the
//!   local mirror of gateway subscriptions and the tenant-initiated flows
//!   (checkout, cancel, reactivate, plan change). Gateway calls always come
//!   before local writes.
//! - **Webhooks** ([`webhook`]): signature verification, event routing,
//!   and an idempotency ledger keyed by gateway event id.
//! - **Notifications** ([`notify`]): payment-failure notices behind a
//!   delivery trait.
//!
//! Persistence and gateway transport are trait seams; in-memory and mock
//! implementations ship behind the `test-store` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate::{EntitlementEngine, Feature, UsageOutcome};
//!
//! let engine = EntitlementEngine::new(store);
//! match engine.check_and_record_usage("tenant_1", Feature::Favorites, 1).await? {
//!     UsageOutcome::Allowed { .. } => { /* proceed */ }
//!     UsageOutcome::Denied(denial) => { /* show denial.message */ }
//! }
//! ```

pub mod config;
pub mod entitlements;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod storage;
pub mod subscription;
pub mod tiers;
pub mod usage;
pub mod webhook;

pub use config::BillingConfig;
pub use entitlements::{
    Denial, EntitlementEngine, FeatureAccess, FeatureUsage, UsageOutcome, UsageSummary,
};
pub use error::{BillingError, Result};
pub use gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayCustomer, GatewaySubscription, PaymentGateway,
    PortalSession, ProrationBehavior,
};
pub use notify::{
    ConsoleNotifier, NotificationOutcome, Notifier, PaymentFailedEmail, TenantContact,
    TenantDirectory, MASKED_LAST4,
};
pub use storage::{
    BillingEventRecord, BillingStore, EventStatus, InvoiceRecord, PaymentMethodRecord,
    SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate, UsageStore,
};
pub use subscription::{
    current_plan, CheckoutRequest, Plan, SubscriptionManager, METADATA_TENANT_ID, METADATA_TIER,
};
pub use tiers::{Feature, Limit, Meter, Tier, UPGRADE_URL};
pub use usage::{PeriodKind, UsageDecision, UsageKey};
pub use webhook::{EventKind, WebhookEvent, WebhookOutcome, WebhookProcessor};

#[cfg(feature = "test-store")]
pub use gateway::test::MockGateway;
#[cfg(feature = "test-store")]
pub use notify::test::{RecordingNotifier, StaticDirectory};
#[cfg(feature = "test-store")]
pub use storage::test::InMemoryBillingStore;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call this early in your application, before processing any billing
/// traffic.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "tollgate=debug")
/// - `TOLLGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TOLLGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
