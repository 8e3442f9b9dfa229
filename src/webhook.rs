//! Gateway webhook processing.
//!
//! The processor is transport-independent: hand it raw payload bytes plus
//! the signature header (or an already-parsed [`WebhookEvent`]) and it
//! verifies, routes, and applies the event. Event type strings are matched
//! verbatim as the gateway sends them.
//!
//! Two rules shape every handler:
//!
//! - **Idempotency.** Each state-mutating handler claims a row in the
//!   processed-event ledger before touching any other state. A duplicate
//!   delivery finds the row already claimed and returns
//!   [`WebhookOutcome::Duplicate`] without re-applying anything.
//! - **Error posture.** Business-rule rejections (missing metadata,
//!   unknown event types, rows that legitimately may not exist) are
//!   logged and reported as successful skips so the gateway does not
//!   retry them. Only infrastructure problems, malformed payloads, bad
//!   signatures, and the out-of-order case surface as errors. The
//!   out-of-order case is `customer.subscription.updated` arriving before
//!   its `created`: the missing row will exist soon, so the transport
//!   should retry, and the ledger row is deliberately not claimed yet.

use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::gateway::PaymentGateway;
use crate::notify::{Notifier, PaymentFailedEmail, TenantDirectory, MASKED_LAST4};
use crate::storage::{
    BillingEventRecord, BillingStore, EventStatus, InvoiceRecord, PaymentMethodRecord,
    SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate,
};
use crate::subscription::{METADATA_TENANT_ID, METADATA_TIER};
use crate::tiers::Tier;

type HmacSha256 = Hmac<Sha256>;

/// Event types this processor mutates state for, plus an open variant so
/// new gateway types flow through the ignore path instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    PaymentMethodAttached,
    Unknown(String),
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "payment_method.attached" => Self::PaymentMethodAttached,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A parsed gateway event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// How an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State was mutated.
    Processed,
    /// Already in the ledger; nothing re-applied.
    Duplicate,
    /// Recognized type, but a business rule said not to apply it.
    Skipped,
    /// Unrecognized type; deliberately not recorded.
    Ignored,
}

/// Verifies, routes, and applies gateway webhook events.
pub struct WebhookProcessor<S, G, N, D> {
    store: S,
    gateway: G,
    notifier: N,
    directory: D,
    config: BillingConfig,
}

impl<S, G, N, D> WebhookProcessor<S, G, N, D>
where
    S: BillingStore,
    G: PaymentGateway,
    N: Notifier,
    D: TenantDirectory,
{
    #[must_use]
    pub fn new(store: S, gateway: G, notifier: N, directory: D, config: BillingConfig) -> Self {
        Self {
            store,
            gateway,
            notifier,
            directory,
            config,
        }
    }

    /// Verifies the signature, parses the envelope, and applies the event.
    pub async fn process(&self, payload: &[u8], signature_header: &str) -> Result<WebhookOutcome> {
        self.verify_signature(payload, signature_header)?;
        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;
        self.handle_event(&event).await
    }

    /// Checks the `t=...,v1=...` signature header against the payload.
    pub fn verify_signature(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        let (timestamp, signature) = parse_signature_header(signature_header)?;

        let age = (Utc::now().timestamp() - timestamp).abs();
        if age > self.config.signature_tolerance_seconds {
            return Err(BillingError::TimestampOutOfRange {
                age_seconds: age,
                tolerance_seconds: self.config.signature_tolerance_seconds,
            });
        }

        let expected = compute_signature(
            self.config.webhook_secret.expose_secret().as_bytes(),
            timestamp,
            payload,
        )?;
        let provided = hex::decode(&signature)
            .map_err(|_| BillingError::InvalidSignature("v1 is not valid hex".to_string()))?;
        if expected.ct_eq(&provided).into() {
            Ok(())
        } else {
            Err(BillingError::InvalidSignature(
                "signature mismatch".to_string(),
            ))
        }
    }

    /// Routes an already-verified event.
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        match EventKind::from(event.event_type.as_str()) {
            EventKind::CheckoutSessionCompleted => self.on_checkout_completed(event).await,
            EventKind::SubscriptionCreated => self.on_subscription_created(event).await,
            EventKind::SubscriptionUpdated => self.on_subscription_updated(event).await,
            EventKind::SubscriptionDeleted => self.on_subscription_deleted(event).await,
            EventKind::InvoicePaid => self.on_invoice_paid(event).await,
            EventKind::InvoicePaymentFailed => self.on_invoice_payment_failed(event).await,
            EventKind::PaymentMethodAttached => self.on_payment_method_attached(event).await,
            EventKind::Unknown(event_type) => {
                debug!(
                    target: "tollgate::webhook",
                    event_id = %event.id,
                    event_type,
                    "ignoring unhandled event type"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Checkout completion confirms intent; the authoritative subscription
    /// state arrives via subscription events. Only the ledger is written.
    async fn on_checkout_completed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let session: RawCheckoutSession = parse_object(&event.data.object)?;

        let Some(tenant_id) = session.metadata.get(METADATA_TENANT_ID).cloned() else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                session_id = %session.id,
                "checkout session missing tenant metadata"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        if session.metadata.get(METADATA_TIER).is_none() {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                session_id = %session.id,
                "checkout session missing tier metadata"
            );
            return Ok(WebhookOutcome::Skipped);
        }
        let Some(subscription_id) = object_ref(&session.subscription) else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                session_id = %session.id,
                "checkout session has no subscription reference"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        if !self
            .claim_event(event, &tenant_id, Some(subscription_id), None, None)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id,
            session_id = %session.id,
            "checkout completed"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_created(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawSubscription = parse_object(&event.data.object)?;

        let Some(tenant_id) = raw.metadata.get(METADATA_TENANT_ID).cloned() else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                subscription_id = %raw.id,
                "subscription created without tenant metadata"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let Some(tier) = raw
            .metadata
            .get(METADATA_TIER)
            .and_then(|t| Tier::from_name(t))
        else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                subscription_id = %raw.id,
                "subscription created without usable tier metadata"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        // Timestamps are converted before the ledger claim so a rejected
        // payload leaves the event unclaimed.
        let (price_id, product_id) = raw.first_price();
        let record = SubscriptionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.clone(),
            gateway_subscription_id: raw.id.clone(),
            gateway_customer_id: object_ref(&raw.customer).unwrap_or_default(),
            gateway_price_id: price_id,
            gateway_product_id: product_id,
            tier,
            status: SubscriptionStatus::from_gateway(&raw.status),
            current_period_start: datetime_from_unix(raw.current_period_start)?,
            current_period_end: datetime_from_unix(raw.current_period_end)?,
            trial_start: raw.trial_start.map(datetime_from_unix).transpose()?,
            trial_end: raw.trial_end.map(datetime_from_unix).transpose()?,
            cancel_at_period_end: raw.cancel_at_period_end,
            canceled_at: raw.canceled_at.map(datetime_from_unix).transpose()?,
            created_at: Utc::now(),
        };

        if !self
            .claim_event(event, &tenant_id, Some(raw.id.clone()), None, None)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        self.store.insert_subscription(record).await?;

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id,
            subscription_id = %raw.id,
            tier = %tier,
            status = %raw.status,
            "subscription created"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn on_subscription_updated(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawSubscription = parse_object(&event.data.object)?;

        let Some(local) = self
            .store
            .find_by_gateway_subscription_id(&raw.id)
            .await?
        else {
            // Created and updated can arrive out of order. The ledger row
            // stays unclaimed so the retried delivery can apply cleanly.
            return Err(BillingError::OutOfOrderEvent {
                event_id: event.id.clone(),
                subscription_id: raw.id.clone(),
            });
        };

        // Tier is never derived here; only subscription.deleted and
        // explicit plan changes move it. Timestamps convert before the
        // claim so a rejected payload leaves the event unclaimed.
        let update = SubscriptionUpdate {
            status: Some(SubscriptionStatus::from_gateway(&raw.status)),
            current_period_start: Some(datetime_from_unix(raw.current_period_start)?),
            current_period_end: Some(datetime_from_unix(raw.current_period_end)?),
            trial_start: Some(raw.trial_start.map(datetime_from_unix).transpose()?),
            trial_end: Some(raw.trial_end.map(datetime_from_unix).transpose()?),
            cancel_at_period_end: Some(raw.cancel_at_period_end),
            canceled_at: Some(raw.canceled_at.map(datetime_from_unix).transpose()?),
            ..Default::default()
        };

        if !self
            .claim_event(event, &local.tenant_id, Some(raw.id.clone()), None, None)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        self.store.update_subscription(&local.id, update).await?;

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            subscription_id = %raw.id,
            status = %raw.status,
            "subscription updated"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// The sole path that downgrades a tenant to the free tier.
    async fn on_subscription_deleted(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawSubscription = parse_object(&event.data.object)?;

        let Some(local) = self
            .store
            .find_by_gateway_subscription_id(&raw.id)
            .await?
        else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                subscription_id = %raw.id,
                "deletion for unknown subscription"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        let canceled_at = match raw.canceled_at {
            Some(seconds) => datetime_from_unix(seconds)?,
            None => Utc::now(),
        };

        if !self
            .claim_event(event, &local.tenant_id, Some(raw.id.clone()), None, None)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }
        self.store
            .update_subscription(
                &local.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Canceled),
                    tier: Some(Tier::Free),
                    canceled_at: Some(Some(canceled_at)),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id = %local.tenant_id,
            subscription_id = %raw.id,
            "subscription deleted, tenant downgraded to free"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn on_invoice_paid(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawInvoice = parse_object(&event.data.object)?;

        let Some(subscription_ref) = object_ref(&raw.subscription) else {
            // One-off invoices carry no subscription; not our concern.
            debug!(
                target: "tollgate::webhook",
                event_id = %event.id,
                invoice_id = %raw.id,
                "invoice without subscription reference"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let Some(local) = self
            .store
            .find_by_gateway_subscription_id(&subscription_ref)
            .await?
        else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                invoice_id = %raw.id,
                subscription_id = %subscription_ref,
                "paid invoice for unknown subscription"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        // Gateway amounts are minor units; stored amounts are major.
        // Conversion happens before the claim so a rejected payload
        // leaves the event unclaimed.
        let amount = Decimal::new(raw.amount_paid, 2);
        let invoice = InvoiceRecord {
            gateway_invoice_id: raw.id.clone(),
            tenant_id: local.tenant_id.clone(),
            subscription_id: local.id.clone(),
            amount,
            currency: raw.currency.clone(),
            hosted_invoice_url: raw.hosted_invoice_url.clone(),
            invoice_pdf_url: raw.invoice_pdf.clone(),
            paid_at: raw
                .status_transitions
                .as_ref()
                .and_then(|t| t.paid_at)
                .map(datetime_from_unix)
                .transpose()?,
            period_start: datetime_from_unix(raw.period_start)?,
            period_end: datetime_from_unix(raw.period_end)?,
        };

        if !self
            .claim_event(
                event,
                &local.tenant_id,
                Some(subscription_ref),
                Some(raw.id.clone()),
                None,
            )
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        self.store.insert_invoice(invoice).await?;

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id = %local.tenant_id,
            invoice_id = %raw.id,
            amount = %amount,
            currency = %raw.currency,
            "invoice paid"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Marks the subscription past due and notifies the tenant. The tier
    /// stays where it is; only a later `customer.subscription.deleted`
    /// downgrades it.
    async fn on_invoice_payment_failed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawInvoice = parse_object(&event.data.object)?;

        let Some(subscription_ref) = object_ref(&raw.subscription) else {
            debug!(
                target: "tollgate::webhook",
                event_id = %event.id,
                invoice_id = %raw.id,
                "failed invoice without subscription reference"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let Some(local) = self
            .store
            .find_by_gateway_subscription_id(&subscription_ref)
            .await?
        else {
            warn!(
                target: "tollgate::webhook",
                event_id = %event.id,
                invoice_id = %raw.id,
                subscription_id = %subscription_ref,
                "failed invoice for unknown subscription"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        if !self
            .claim_event(
                event,
                &local.tenant_id,
                Some(subscription_ref),
                Some(raw.id.clone()),
                Some("payment failed".to_string()),
            )
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        self.store
            .update_subscription(
                &local.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::PastDue),
                    ..Default::default()
                },
            )
            .await?;

        warn!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id = %local.tenant_id,
            invoice_id = %raw.id,
            "invoice payment failed, subscription past due"
        );

        self.notify_payment_failed(&local, &raw).await;
        Ok(WebhookOutcome::Processed)
    }

    async fn on_payment_method_attached(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let raw: RawPaymentMethod = parse_object(&event.data.object)?;

        let Some(customer_ref) = object_ref(&raw.customer) else {
            debug!(
                target: "tollgate::webhook",
                event_id = %event.id,
                payment_method_id = %raw.id,
                "payment method without customer reference"
            );
            return Ok(WebhookOutcome::Skipped);
        };
        let Some(local) = self
            .store
            .find_latest_by_gateway_customer_id(&customer_ref)
            .await?
        else {
            // Attaching a card before the first checkout is the normal
            // flow, not an anomaly.
            debug!(
                target: "tollgate::webhook",
                event_id = %event.id,
                customer_id = %customer_ref,
                "payment method for customer without subscriptions"
            );
            return Ok(WebhookOutcome::Skipped);
        };

        if !self
            .claim_event(event, &local.tenant_id, None, None, None)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        let is_default = match self.gateway.retrieve_customer(&customer_ref).await {
            Ok(customer) => customer.default_payment_method.as_deref() == Some(raw.id.as_str()),
            Err(err) => {
                // Assume default rather than losing the flag.
                warn!(
                    target: "tollgate::webhook",
                    event_id = %event.id,
                    customer_id = %customer_ref,
                    error = %err,
                    "default payment method lookup failed, assuming default"
                );
                true
            }
        };

        let (last4, brand, exp_month, exp_year, bank_name) = match (&raw.card, &raw.us_bank_account)
        {
            (Some(card), _) => (
                card.last4.clone(),
                card.brand.clone(),
                card.exp_month,
                card.exp_year,
                None,
            ),
            (None, Some(bank)) => (bank.last4.clone(), None, None, None, bank.bank_name.clone()),
            (None, None) => (None, None, None, None, None),
        };

        self.store
            .upsert_payment_method(PaymentMethodRecord {
                gateway_payment_method_id: raw.id.clone(),
                tenant_id: local.tenant_id.clone(),
                kind: raw.kind.clone(),
                last4,
                brand,
                exp_month,
                exp_year,
                bank_name,
                is_default,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            target: "tollgate::webhook",
            event_id = %event.id,
            tenant_id = %local.tenant_id,
            payment_method_id = %raw.id,
            is_default,
            "payment method attached"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Best effort from here down: any failure is logged and swallowed so
    /// a notification problem never turns into a webhook retry loop.
    async fn notify_payment_failed(&self, local: &SubscriptionRecord, invoice: &RawInvoice) {
        let contact = match self.directory.contact(&local.tenant_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                warn!(
                    target: "tollgate::webhook",
                    tenant_id = %local.tenant_id,
                    "no contact on file for payment failure notice"
                );
                return;
            }
            Err(err) => {
                warn!(
                    target: "tollgate::webhook",
                    tenant_id = %local.tenant_id,
                    error = %err,
                    "contact lookup failed for payment failure notice"
                );
                return;
            }
        };

        let last4 = match self.store.default_payment_method(&local.tenant_id).await {
            Ok(Some(pm)) => pm.last4.unwrap_or_else(|| MASKED_LAST4.to_string()),
            Ok(None) => MASKED_LAST4.to_string(),
            Err(err) => {
                warn!(
                    target: "tollgate::webhook",
                    tenant_id = %local.tenant_id,
                    error = %err,
                    "payment method lookup failed, masking card digits"
                );
                MASKED_LAST4.to_string()
            }
        };

        let email = PaymentFailedEmail {
            display_name: contact.display_name.clone(),
            amount: Decimal::new(invoice.amount_due, 2),
            currency: invoice.currency.clone(),
            last4,
            tier: local.tier,
            invoice_url: invoice.hosted_invoice_url.clone(),
            update_payment_url: self.config.update_payment_url.clone(),
            app_url: self.config.app_url.clone(),
            retry_date: Some(Utc::now() + Duration::days(self.config.payment_retry_days)),
        };
        let (subject, html) = email.render();

        let outcome = self.notifier.send(&contact.email, &subject, &html).await;
        if outcome.success {
            info!(
                target: "tollgate::webhook",
                tenant_id = %local.tenant_id,
                to = %contact.email,
                "payment failure notice sent"
            );
        } else {
            warn!(
                target: "tollgate::webhook",
                tenant_id = %local.tenant_id,
                reason = outcome.reason.as_deref().unwrap_or("unknown"),
                "payment failure notice not delivered"
            );
        }
    }

    async fn claim_event(
        &self,
        event: &WebhookEvent,
        tenant_id: &str,
        subscription_id: Option<String>,
        invoice_id: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool> {
        let status = if error_message.is_some() {
            EventStatus::Failed
        } else {
            EventStatus::Success
        };
        let claimed = self
            .store
            .insert_event_once(BillingEventRecord {
                gateway_event_id: event.id.clone(),
                tenant_id: tenant_id.to_string(),
                event_type: event.event_type.clone(),
                status,
                subscription_id,
                invoice_id,
                error_message,
                created_at: Utc::now(),
            })
            .await?;
        if !claimed {
            debug!(
                target: "tollgate::webhook",
                event_id = %event.id,
                event_type = %event.event_type,
                "duplicate delivery skipped"
            );
        }
        Ok(claimed)
    }
}

/// Splits a `t=...,v1=...` header into timestamp and hex signature.
fn parse_signature_header(header: &str) -> Result<(i64, String)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    let timestamp = timestamp
        .ok_or_else(|| BillingError::InvalidSignature("missing t= component".to_string()))?
        .parse::<i64>()
        .map_err(|_| BillingError::InvalidSignature("t= is not an integer".to_string()))?;
    let signature = signature
        .ok_or_else(|| BillingError::InvalidSignature("missing v1= component".to_string()))?;
    Ok((timestamp, signature.to_string()))
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`.
fn compute_signature(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| BillingError::Internal(format!("hmac init: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn parse_object<'de, T: Deserialize<'de>>(object: &'de serde_json::Value) -> Result<T> {
    T::deserialize(object).map_err(|e| BillingError::InvalidPayload(e.to_string()))
}

/// Gateway references arrive either as a bare id string or as an expanded
/// object carrying an `id` field.
fn object_ref(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Converts gateway Unix seconds. Values chrono cannot represent are a
/// payload error, not a guess.
fn datetime_from_unix(seconds: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        BillingError::InvalidPayload(format!("unix timestamp {seconds} out of range"))
    })
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    #[serde(default)]
    subscription: serde_json::Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    #[serde(default)]
    customer: serde_json::Value,
    status: String,
    #[serde(default)]
    current_period_start: i64,
    #[serde(default)]
    current_period_end: i64,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    canceled_at: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    items: RawItemList,
}

impl RawSubscription {
    /// Price and product ids from the first subscription item.
    fn first_price(&self) -> (String, String) {
        match self.items.data.first() {
            Some(item) => (
                item.price.id.clone(),
                object_ref(&item.price.product).unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawItemList {
    #[serde(default)]
    data: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    price: RawPrice,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    id: String,
    #[serde(default)]
    product: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    #[serde(default)]
    subscription: serde_json::Value,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    currency: String,
    hosted_invoice_url: Option<String>,
    invoice_pdf: Option<String>,
    status_transitions: Option<RawStatusTransitions>,
    #[serde(default)]
    period_start: i64,
    #[serde(default)]
    period_end: i64,
}

#[derive(Debug, Deserialize)]
struct RawStatusTransitions {
    paid_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPaymentMethod {
    id: String,
    #[serde(default)]
    customer: serde_json::Value,
    #[serde(rename = "type")]
    kind: String,
    card: Option<RawCard>,
    us_bank_account: Option<RawBankAccount>,
}

#[derive(Debug, Deserialize)]
struct RawCard {
    last4: Option<String>,
    brand: Option<String>,
    exp_month: Option<u32>,
    exp_year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawBankAccount {
    last4: Option<String>,
    bank_name: Option<String>,
}
