//! Payment gateway adapter seam.
//!
//! [`PaymentGateway`] is the only surface through which this crate talks to
//! the payment provider. Data types here mirror the gateway wire shapes:
//! Unix-second timestamps and verbatim status strings, converted to local
//! types at the edges that consume them. A live HTTP client implements this
//! trait outside this crate; [`test::MockGateway`] covers tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A customer as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
    /// Gateway id of the default payment method, when set.
    pub default_payment_method: Option<String>,
}

/// A subscription as the gateway reports it. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub customer_id: String,
    /// Id of the single subscription item; needed for price swaps.
    pub item_id: String,
    pub price_id: String,
    pub product_id: String,
    pub status: String,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    pub metadata: HashMap<String, String>,
}

/// Request to open a subscription-mode checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub trial_days: Option<u32>,
    pub coupon: Option<String>,
    /// Attached to both the session and the resulting subscription, so
    /// webhook events can be tied back to a tenant.
    pub metadata: HashMap<String, String>,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// A created billing-portal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// How the gateway should prorate a mid-cycle price change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProrationBehavior {
    /// Create proration line items on the next invoice.
    #[default]
    CreateProrations,
    /// No proration adjustments.
    None,
    /// Invoice the proration immediately.
    AlwaysInvoice,
}

impl ProrationBehavior {
    /// The gateway's wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProrationBehavior::CreateProrations => "create_prorations",
            ProrationBehavior::None => "none",
            ProrationBehavior::AlwaysInvoice => "always_invoice",
        }
    }
}

/// Operations this crate needs from the payment provider.
///
/// Implementations must treat every call as remote: errors are
/// [`crate::BillingError::Gateway`], and callers assume no local state
/// changed when a call fails.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a customer, returning the gateway customer id. `tenant_id`
    /// lands in the customer metadata.
    async fn create_customer(&self, email: &str, tenant_id: &str) -> Result<String>;

    async fn retrieve_customer(&self, customer_id: &str) -> Result<GatewayCustomer>;

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<GatewaySubscription>;

    /// Cancels immediately.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Sets or clears the cancel-at-period-end flag.
    async fn set_cancel_at_period_end(&self, subscription_id: &str, cancel: bool) -> Result<()>;

    /// Swaps the subscription item's price.
    async fn change_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        new_price_id: &str,
        proration: ProrationBehavior,
    ) -> Result<GatewaySubscription>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession>;
}

/// Scriptable gateway double for tests.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};

    use crate::BillingError;

    #[derive(Default)]
    struct Inner {
        customers: HashMap<String, GatewayCustomer>,
        subscriptions: HashMap<String, GatewaySubscription>,
        next_customer: u64,
        next_session: u64,
    }

    /// In-memory [`PaymentGateway`] with failure injection.
    ///
    /// Clones share state. Call [`MockGateway::fail_next`] to make the next
    /// call return a gateway error instead of mutating anything.
    #[derive(Clone, Default)]
    pub struct MockGateway {
        inner: Arc<Mutex<Inner>>,
        fail_next: Arc<AtomicBool>,
    }

    impl MockGateway {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// The next gateway call fails with a gateway error.
        pub fn fail_next(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        fn check_failure(&self, operation: &str) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BillingError::gateway(operation, "injected failure"));
            }
            Ok(())
        }

        /// Seeds a customer and returns its id.
        pub fn seed_customer(&self, customer: GatewayCustomer) -> String {
            let id = customer.id.clone();
            self.lock().customers.insert(id.clone(), customer);
            id
        }

        /// Seeds a subscription.
        pub fn seed_subscription(&self, subscription: GatewaySubscription) {
            self.lock()
                .subscriptions
                .insert(subscription.id.clone(), subscription);
        }

        /// Current scripted state of a subscription. Test helper.
        #[must_use]
        pub fn subscription(&self, id: &str) -> Option<GatewaySubscription> {
            self.lock().subscriptions.get(id).cloned()
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_customer(&self, email: &str, _tenant_id: &str) -> Result<String> {
            self.check_failure("create_customer")?;
            let mut inner = self.lock();
            inner.next_customer += 1;
            let id = format!("cus_mock_{}", inner.next_customer);
            inner.customers.insert(
                id.clone(),
                GatewayCustomer {
                    id: id.clone(),
                    email: Some(email.to_string()),
                    default_payment_method: None,
                },
            );
            Ok(id)
        }

        async fn retrieve_customer(&self, customer_id: &str) -> Result<GatewayCustomer> {
            self.check_failure("retrieve_customer")?;
            self.lock()
                .customers
                .get(customer_id)
                .cloned()
                .ok_or_else(|| {
                    BillingError::gateway("retrieve_customer", format!("no such customer {customer_id}"))
                })
        }

        async fn create_checkout_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.check_failure("create_checkout_session")?;
            let mut inner = self.lock();
            inner.next_session += 1;
            let id = format!("cs_mock_{}", inner.next_session);
            Ok(CheckoutSession {
                url: format!("https://checkout.mock/{id}/{}", request.price_id),
                id,
            })
        }

        async fn retrieve_subscription(
            &self,
            subscription_id: &str,
        ) -> Result<GatewaySubscription> {
            self.check_failure("retrieve_subscription")?;
            self.lock()
                .subscriptions
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| {
                    BillingError::gateway(
                        "retrieve_subscription",
                        format!("no such subscription {subscription_id}"),
                    )
                })
        }

        async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
            self.check_failure("cancel_subscription")?;
            let mut inner = self.lock();
            let sub = inner.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::gateway(
                    "cancel_subscription",
                    format!("no such subscription {subscription_id}"),
                )
            })?;
            sub.status = "canceled".to_string();
            sub.canceled_at = Some(chrono::Utc::now().timestamp());
            Ok(())
        }

        async fn set_cancel_at_period_end(
            &self,
            subscription_id: &str,
            cancel: bool,
        ) -> Result<()> {
            self.check_failure("set_cancel_at_period_end")?;
            let mut inner = self.lock();
            let sub = inner.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::gateway(
                    "set_cancel_at_period_end",
                    format!("no such subscription {subscription_id}"),
                )
            })?;
            sub.cancel_at_period_end = cancel;
            Ok(())
        }

        async fn change_price(
            &self,
            subscription_id: &str,
            _item_id: &str,
            new_price_id: &str,
            _proration: ProrationBehavior,
        ) -> Result<GatewaySubscription> {
            self.check_failure("change_price")?;
            let mut inner = self.lock();
            let sub = inner.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::gateway(
                    "change_price",
                    format!("no such subscription {subscription_id}"),
                )
            })?;
            sub.price_id = new_price_id.to_string();
            Ok(sub.clone())
        }

        async fn create_portal_session(
            &self,
            customer_id: &str,
            return_url: &str,
        ) -> Result<PortalSession> {
            self.check_failure("create_portal_session")?;
            Ok(PortalSession {
                id: format!("ps_mock_{customer_id}"),
                url: format!("https://portal.mock/{customer_id}?return={return_url}"),
            })
        }
    }
}
