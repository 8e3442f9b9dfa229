//! Tenant notifications.
//!
//! Delivery sits behind the [`Notifier`] trait; [`ConsoleNotifier`] logs
//! instead of sending, which is the development default. Contact lookup is
//! a separate seam ([`TenantDirectory`]) because tenant identity lives
//! outside this crate.
//!
//! Notification sends are best effort everywhere in this crate: a failed
//! send is reported in the returned [`NotificationOutcome`], never as an
//! error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::Result;
use crate::tiers::Tier;

/// Shown in place of a card number when no payment method is on file.
pub const MASKED_LAST4: &str = "••••";

/// Result of a notification send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

impl NotificationOutcome {
    #[must_use]
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            reason: None,
        }
    }

    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// Delivers a rendered notification. Infallible by contract; failures are
/// carried in the outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> NotificationOutcome;
}

/// Logs notifications via tracing instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, to: &str, subject: &str, html: &str) -> NotificationOutcome {
        info!(
            target: "tollgate::notify",
            to,
            subject,
            body_bytes = html.len(),
            "console notification"
        );
        NotificationOutcome::sent(format!("console-{}", Utc::now().timestamp_millis()))
    }
}

/// Contact details for a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContact {
    pub email: String,
    pub display_name: String,
}

/// Resolves tenant ids to contact details.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// `Ok(None)` means the tenant has no reachable contact.
    async fn contact(&self, tenant_id: &str) -> Result<Option<TenantContact>>;
}

/// Inputs for the payment-failure notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentFailedEmail {
    pub display_name: String,
    /// Major currency units.
    pub amount: Decimal,
    pub currency: String,
    pub last4: String,
    pub tier: Tier,
    pub invoice_url: Option<String>,
    pub update_payment_url: String,
    pub app_url: String,
    pub retry_date: Option<DateTime<Utc>>,
}

impl PaymentFailedEmail {
    /// Renders subject and HTML body.
    #[must_use]
    pub fn render(&self) -> (String, String) {
        let subject = format!(
            "Payment failed for your {} subscription",
            self.tier.label()
        );
        let amount = format!("{} {}", self.amount, self.currency.to_uppercase());
        let retry_line = match self.retry_date {
            Some(date) => format!(
                "<p>We will retry the charge on {}.</p>",
                date.format("%B %-d, %Y")
            ),
            None => "<p>We will retry the charge shortly.</p>".to_string(),
        };
        let invoice_line = match &self.invoice_url {
            Some(url) => format!("<p><a href=\"{url}\">View the invoice</a></p>"),
            None => String::new(),
        };
        let html = format!(
            "<html><body>\
             <h1>Payment failed</h1>\
             <p>Hi {name},</p>\
             <p>We couldn't charge {amount} for your {tier} subscription \
             using the card ending in {last4}.</p>\
             {retry_line}\
             <p><a href=\"{update_url}\">Update your payment method</a> to keep \
             access to your {tier} features. If the retries fail, your account \
             will be moved to the Free plan.</p>\
             {invoice_line}\
             <p><a href=\"{app_url}/billing\">Manage your subscription</a></p>\
             </body></html>",
            name = self.display_name,
            amount = amount,
            tier = self.tier.label(),
            last4 = self.last4,
            retry_line = retry_line,
            update_url = self.update_payment_url,
            invoice_line = invoice_line,
            app_url = self.app_url,
        );
        (subject, html)
    }
}

/// Test doubles for notification seams.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// A captured send.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentNotification {
        pub to: String,
        pub subject: String,
        pub html: String,
    }

    /// Records sends; can be switched to fail.
    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<SentNotification>>>,
        fail: Arc<AtomicBool>,
    }

    impl RecordingNotifier {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All subsequent sends report failure.
        pub fn fail_sends(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        #[must_use]
        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, to: &str, subject: &str, html: &str) -> NotificationOutcome {
            if self.fail.load(Ordering::SeqCst) {
                return NotificationOutcome::failed("injected delivery failure");
            }
            let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
            sent.push(SentNotification {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html.to_string(),
            });
            NotificationOutcome::sent(format!("recorded-{}", sent.len()))
        }
    }

    /// Fixed tenant-id → contact map.
    #[derive(Clone, Default)]
    pub struct StaticDirectory {
        contacts: Arc<Mutex<HashMap<String, TenantContact>>>,
    }

    impl StaticDirectory {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, tenant_id: impl Into<String>, contact: TenantContact) {
            self.contacts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(tenant_id.into(), contact);
        }
    }

    #[async_trait]
    impl TenantDirectory for StaticDirectory {
        async fn contact(&self, tenant_id: &str) -> Result<Option<TenantContact>> {
            Ok(self
                .contacts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(tenant_id)
                .cloned())
        }
    }
}
