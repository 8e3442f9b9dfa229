//! Billing configuration.

use secrecy::SecretString;

/// Configuration shared by the webhook processor and notification
/// rendering.
#[derive(Clone)]
pub struct BillingConfig {
    /// Webhook signing secret from the gateway dashboard.
    pub webhook_secret: SecretString,
    /// Base application URL used in notification links.
    pub app_url: String,
    /// Where tenants update their payment method.
    pub update_payment_url: String,
    /// Days until the gateway's next charge attempt. Used only for the
    /// retry date shown in payment-failure notifications; the gateway's
    /// own schedule is authoritative.
    pub payment_retry_days: i64,
    /// Accepted clock skew for webhook timestamps, in seconds.
    pub signature_tolerance_seconds: i64,
}

impl BillingConfig {
    /// Creates a config with default URLs and a 3-day retry heuristic.
    #[must_use]
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: SecretString::new(webhook_secret.into()),
            app_url: "https://app.example.com".to_string(),
            update_payment_url: "https://app.example.com/billing/payment".to_string(),
            payment_retry_days: 3,
            signature_tolerance_seconds: 300,
        }
    }

    /// Sets the application and update-payment URLs.
    #[must_use]
    pub fn with_urls(
        mut self,
        app_url: impl Into<String>,
        update_payment_url: impl Into<String>,
    ) -> Self {
        self.app_url = app_url.into();
        self.update_payment_url = update_payment_url.into();
        self
    }

    /// Sets the retry-date heuristic.
    #[must_use]
    pub fn with_payment_retry_days(mut self, days: i64) -> Self {
        self.payment_retry_days = days;
        self
    }
}

impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingConfig")
            .field("webhook_secret", &"<redacted>")
            .field("app_url", &self.app_url)
            .field("update_payment_url", &self.update_payment_url)
            .field("payment_retry_days", &self.payment_retry_days)
            .field(
                "signature_tolerance_seconds",
                &self.signature_tolerance_seconds,
            )
            .finish()
    }
}
