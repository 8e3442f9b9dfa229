//! Subscription lifecycle operations.
//!
//! [`SubscriptionManager`] pairs a [`BillingStore`] with a
//! [`PaymentGateway`] and drives the tenant-initiated flows: checkout,
//! portal, cancel, reactivate, plan change. Every mutating flow calls the
//! gateway FIRST and mirrors the result locally only on success, so a
//! gateway failure leaves local state untouched. The gateway's webhook
//! events update the same rows shortly after; the local write is for
//! immediate feedback.
//!
//! Tier resolution for the whole crate goes through [`current_plan`]:
//! the most recently created row whose status grants access, with
//! [`Plan::Free`] as the universal fallback.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::{BillingError, Result};
use crate::gateway::{
    CheckoutSession, CheckoutSessionRequest, PaymentGateway, PortalSession, ProrationBehavior,
};
use crate::storage::{BillingStore, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate};
use crate::tiers::Tier;

/// Metadata key carrying the tenant id on gateway objects.
pub const METADATA_TENANT_ID: &str = "tenant_id";
/// Metadata key carrying the purchased tier on gateway objects.
pub const METADATA_TIER: &str = "tier";

/// A tenant's billing state. Free is the absence of a subscription row,
/// not a row with a special status.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Free,
    Subscribed(SubscriptionRecord),
}

impl Plan {
    /// The effective tier.
    #[must_use]
    pub fn tier(&self) -> Tier {
        match self {
            Plan::Free => Tier::Free,
            Plan::Subscribed(record) => record.tier,
        }
    }

    /// The subscription record, when there is one.
    #[must_use]
    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        match self {
            Plan::Free => None,
            Plan::Subscribed(record) => Some(record),
        }
    }
}

/// Resolves a tenant's current plan. This is the single query path every
/// tier decision uses.
pub async fn current_plan<S: BillingStore + ?Sized>(store: &S, tenant_id: &str) -> Result<Plan> {
    match store.active_subscription(tenant_id).await? {
        Some(record) => Ok(Plan::Subscribed(record)),
        None => Ok(Plan::Free),
    }
}

/// Parameters for opening a checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tenant_id: String,
    pub email: String,
    pub price_id: String,
    pub tier: Tier,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
    pub coupon: Option<String>,
}

/// Drives subscription lifecycle flows against a store and a gateway.
pub struct SubscriptionManager<S, G> {
    store: S,
    gateway: G,
}

impl<S, G> SubscriptionManager<S, G>
where
    S: BillingStore,
    G: PaymentGateway,
{
    #[must_use]
    pub fn new(store: S, gateway: G) -> Self {
        Self { store, gateway }
    }

    /// The tenant's current plan.
    pub async fn current_plan(&self, tenant_id: &str) -> Result<Plan> {
        current_plan(&self.store, tenant_id).await
    }

    /// The tenant's effective tier, defaulting to free.
    pub async fn tier(&self, tenant_id: &str) -> Result<Tier> {
        Ok(self.current_plan(tenant_id).await?.tier())
    }

    /// Reuses the gateway customer from the tenant's latest subscription,
    /// or creates a new one. The lookup is status-agnostic: a tenant whose
    /// only row is canceled keeps their customer, payment methods, and
    /// billing history when they come back.
    pub async fn get_or_create_customer(&self, tenant_id: &str, email: &str) -> Result<String> {
        if let Some(record) = self.store.find_latest_by_tenant_id(tenant_id).await? {
            return Ok(record.gateway_customer_id);
        }
        let customer_id = self.gateway.create_customer(email, tenant_id).await?;
        debug!(
            target: "tollgate::subscription",
            tenant_id,
            customer_id,
            "created gateway customer"
        );
        Ok(customer_id)
    }

    /// Opens a subscription-mode checkout session. Tenant id and tier ride
    /// along as metadata so the resulting webhook events can be attributed.
    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession> {
        let customer_id = self
            .get_or_create_customer(&request.tenant_id, &request.email)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert(METADATA_TENANT_ID.to_string(), request.tenant_id.clone());
        metadata.insert(METADATA_TIER.to_string(), request.tier.as_str().to_string());

        let session = self
            .gateway
            .create_checkout_session(&CheckoutSessionRequest {
                customer_id,
                price_id: request.price_id,
                success_url: request.success_url,
                cancel_url: request.cancel_url,
                trial_days: request.trial_days,
                coupon: request.coupon,
                metadata,
            })
            .await?;

        info!(
            target: "tollgate::subscription",
            tenant_id = %request.tenant_id,
            tier = %request.tier,
            session_id = %session.id,
            "checkout session created"
        );
        Ok(session)
    }

    /// Opens a billing-portal session for self-service management.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession> {
        self.gateway
            .create_portal_session(customer_id, return_url)
            .await
    }

    /// Cancels a subscription. Immediate cancellation stops service now;
    /// otherwise the subscription runs until the period end.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        immediate: bool,
    ) -> Result<SubscriptionRecord> {
        let record = self.require_subscription(subscription_id).await?;

        if immediate {
            self.gateway
                .cancel_subscription(&record.gateway_subscription_id)
                .await?;
            let updated = self
                .store
                .update_subscription(
                    subscription_id,
                    SubscriptionUpdate {
                        status: Some(SubscriptionStatus::Canceled),
                        canceled_at: Some(Some(chrono::Utc::now())),
                        ..Default::default()
                    },
                )
                .await?;
            info!(
                target: "tollgate::subscription",
                subscription_id,
                "subscription canceled immediately"
            );
            Ok(updated)
        } else {
            self.gateway
                .set_cancel_at_period_end(&record.gateway_subscription_id, true)
                .await?;
            let updated = self
                .store
                .update_subscription(
                    subscription_id,
                    SubscriptionUpdate {
                        cancel_at_period_end: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            info!(
                target: "tollgate::subscription",
                subscription_id,
                period_end = %updated.current_period_end,
                "subscription set to cancel at period end"
            );
            Ok(updated)
        }
    }

    /// Clears a pending cancel-at-period-end.
    pub async fn reactivate_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionRecord> {
        let record = self.require_subscription(subscription_id).await?;

        self.gateway
            .set_cancel_at_period_end(&record.gateway_subscription_id, false)
            .await?;
        let updated = self
            .store
            .update_subscription(
                subscription_id,
                SubscriptionUpdate {
                    cancel_at_period_end: Some(false),
                    canceled_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            target: "tollgate::subscription",
            subscription_id,
            "subscription reactivated"
        );
        Ok(updated)
    }

    /// Swaps the subscription onto a new price and tier, prorating the
    /// difference onto the next invoice.
    pub async fn change_plan(
        &self,
        subscription_id: &str,
        new_price_id: &str,
        new_tier: Tier,
    ) -> Result<SubscriptionRecord> {
        let record = self.require_subscription(subscription_id).await?;

        let gateway_sub = self
            .gateway
            .retrieve_subscription(&record.gateway_subscription_id)
            .await?;
        self.gateway
            .change_price(
                &gateway_sub.id,
                &gateway_sub.item_id,
                new_price_id,
                ProrationBehavior::CreateProrations,
            )
            .await?;

        let updated = self
            .store
            .update_subscription(
                subscription_id,
                SubscriptionUpdate {
                    tier: Some(new_tier),
                    gateway_price_id: Some(new_price_id.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        info!(
            target: "tollgate::subscription",
            subscription_id,
            old_tier = %record.tier,
            new_tier = %new_tier,
            "plan changed"
        );
        Ok(updated)
    }

    async fn require_subscription(&self, subscription_id: &str) -> Result<SubscriptionRecord> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test::MockGateway;
    use crate::gateway::GatewaySubscription;
    use crate::storage::test::InMemoryBillingStore;
    use chrono::{TimeZone, Utc};

    async fn seeded(
        tier: Tier,
        status: SubscriptionStatus,
    ) -> (InMemoryBillingStore, MockGateway, String) {
        let store = InMemoryBillingStore::new();
        let gateway = MockGateway::new();
        let record = SubscriptionRecord {
            id: "local_1".to_string(),
            tenant_id: "t1".to_string(),
            gateway_subscription_id: "sub_1".to_string(),
            gateway_customer_id: "cus_1".to_string(),
            gateway_price_id: "price_pro_monthly".to_string(),
            gateway_product_id: "prod_pro".to_string(),
            tier,
            status,
            current_period_start: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            current_period_end: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            created_at: Utc::now(),
        };
        gateway.seed_subscription(GatewaySubscription {
            id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            item_id: "si_1".to_string(),
            price_id: "price_pro_monthly".to_string(),
            product_id: "prod_pro".to_string(),
            status: "active".to_string(),
            current_period_start: record.current_period_start.timestamp(),
            current_period_end: record.current_period_end.timestamp(),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            metadata: HashMap::new(),
        });
        store.insert_subscription(record).await.unwrap();
        (store, gateway, "local_1".to_string())
    }

    #[tokio::test]
    async fn tier_falls_back_to_free() {
        let store = InMemoryBillingStore::new();
        let manager = SubscriptionManager::new(store, MockGateway::new());
        assert_eq!(manager.tier("nobody").await.unwrap(), Tier::Free);
        assert_eq!(manager.current_plan("nobody").await.unwrap(), Plan::Free);
    }

    #[tokio::test]
    async fn tier_comes_from_active_row() {
        let (store, gateway, _) = seeded(Tier::Business, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store, gateway);
        assert_eq!(manager.tier("t1").await.unwrap(), Tier::Business);
    }

    #[tokio::test]
    async fn canceled_subscription_means_free() {
        let (store, gateway, _) = seeded(Tier::Pro, SubscriptionStatus::Canceled).await;
        let manager = SubscriptionManager::new(store, gateway);
        assert_eq!(manager.tier("t1").await.unwrap(), Tier::Free);
    }

    #[tokio::test]
    async fn cancel_at_period_end_round_trips_with_reactivate() {
        let (store, gateway, id) = seeded(Tier::Pro, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store, gateway.clone());

        let canceled = manager.cancel_subscription(&id, false).await.unwrap();
        assert!(canceled.cancel_at_period_end);
        assert_eq!(canceled.status, SubscriptionStatus::Active);
        assert!(gateway.subscription("sub_1").unwrap().cancel_at_period_end);

        let revived = manager.reactivate_subscription(&id).await.unwrap();
        assert!(!revived.cancel_at_period_end);
        assert!(revived.canceled_at.is_none());
        assert!(!gateway.subscription("sub_1").unwrap().cancel_at_period_end);
    }

    #[tokio::test]
    async fn immediate_cancel_stamps_canceled_at() {
        let (store, gateway, id) = seeded(Tier::Pro, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store, gateway);

        let canceled = manager.cancel_subscription(&id, true).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert!(canceled.canceled_at.is_some());
    }

    #[tokio::test]
    async fn gateway_failure_leaves_local_state_untouched() {
        let (store, gateway, id) = seeded(Tier::Pro, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store.clone(), gateway.clone());

        gateway.fail_next();
        let err = manager.cancel_subscription(&id, true).await.unwrap_err();
        assert!(matches!(err, BillingError::Gateway { .. }));

        let record = store.get_subscription(&id).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.canceled_at.is_none());
    }

    #[tokio::test]
    async fn change_plan_updates_tier_and_price() {
        let (store, gateway, id) = seeded(Tier::Pro, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store.clone(), gateway.clone());

        let updated = manager
            .change_plan(&id, "price_business_monthly", Tier::Business)
            .await
            .unwrap();
        assert_eq!(updated.tier, Tier::Business);
        assert_eq!(updated.gateway_price_id, "price_business_monthly");
        assert_eq!(
            gateway.subscription("sub_1").unwrap().price_id,
            "price_business_monthly"
        );
    }

    #[tokio::test]
    async fn change_plan_gateway_failure_keeps_old_tier() {
        let (store, gateway, id) = seeded(Tier::Pro, SubscriptionStatus::Active).await;
        let manager = SubscriptionManager::new(store.clone(), gateway.clone());

        gateway.fail_next();
        assert!(manager
            .change_plan(&id, "price_business_monthly", Tier::Business)
            .await
            .is_err());
        let record = store.get_subscription(&id).await.unwrap().unwrap();
        assert_eq!(record.tier, Tier::Pro);
    }

    #[tokio::test]
    async fn checkout_session_carries_tenant_metadata() {
        let store = InMemoryBillingStore::new();
        let gateway = MockGateway::new();
        let manager = SubscriptionManager::new(store, gateway);

        let session = manager
            .create_checkout_session(CheckoutRequest {
                tenant_id: "t1".to_string(),
                email: "t1@example.test".to_string(),
                price_id: "price_pro_monthly".to_string(),
                tier: Tier::Pro,
                success_url: "https://app.test/ok".to_string(),
                cancel_url: "https://app.test/cancel".to_string(),
                trial_days: Some(14),
                coupon: None,
            })
            .await
            .unwrap();
        assert!(session.url.contains("price_pro_monthly"));
    }

    #[tokio::test]
    async fn returning_tenant_keeps_gateway_customer() {
        let (store, gateway, _) = seeded(Tier::Pro, SubscriptionStatus::Canceled).await;
        let manager = SubscriptionManager::new(store, gateway);

        // The only row is canceled, but the customer still owns the
        // payment methods and invoice history at the gateway.
        let customer_id = manager
            .get_or_create_customer("t1", "t1@example.test")
            .await
            .unwrap();
        assert_eq!(customer_id, "cus_1");

        let session = manager
            .create_checkout_session(CheckoutRequest {
                tenant_id: "t1".to_string(),
                email: "t1@example.test".to_string(),
                price_id: "price_pro_monthly".to_string(),
                tier: Tier::Pro,
                success_url: "https://app.test/ok".to_string(),
                cancel_url: "https://app.test/cancel".to_string(),
                trial_days: None,
                coupon: None,
            })
            .await
            .unwrap();
        assert!(session.url.contains("price_pro_monthly"));
    }

    #[tokio::test]
    async fn cancel_unknown_subscription_errors() {
        let manager = SubscriptionManager::new(InMemoryBillingStore::new(), MockGateway::new());
        let err = manager.cancel_subscription("ghost", false).await.unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
    }
}
