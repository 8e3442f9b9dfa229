//! Entitlement checks and usage recording.
//!
//! [`EntitlementEngine`] answers "may this tenant do X" by resolving the
//! tenant's tier through the active-subscription query path and consulting
//! the limit tables in [`crate::tiers`]. The check-and-record path defers
//! to the store's atomic conditional increment, so a burst of concurrent
//! requests can never push a counter past its limit.
//!
//! Denials are data, not errors: callers get a [`UsageOutcome::Denied`]
//! with a user-facing message and the upgrade URL. Errors are reserved for
//! storage failures.

use tracing::debug;

use crate::error::Result;
use crate::storage::{BillingStore, UsageStore};
use crate::subscription::current_plan;
use crate::tiers::{Feature, Limit, Tier, UPGRADE_URL};
use crate::usage::{UsageDecision, UsageKey};

/// Read-only view of a tenant's standing for one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAccess {
    pub feature: Feature,
    pub tier: Tier,
    pub allowed: bool,
    pub limit: Limit,
    /// Current counter value; `None` for boolean or unlimited features.
    pub current: Option<u64>,
    /// Head room under the cap; `None` when there is no cap.
    pub remaining: Option<u64>,
}

/// Result of an attempt to consume a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    Allowed {
        /// Post-increment counter value for metered features.
        current: Option<u64>,
    },
    Denied(Denial),
}

impl UsageOutcome {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, UsageOutcome::Allowed { .. })
    }
}

/// User-facing denial details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub message: String,
    pub upgrade_url: &'static str,
    pub tier: Tier,
    pub feature: Option<Feature>,
}

impl Denial {
    fn for_feature(feature: Feature, tier: Tier, limit: Limit) -> Self {
        Self {
            message: feature.denial_message(limit),
            upgrade_url: UPGRADE_URL,
            tier,
            feature: Some(feature),
        }
    }

    fn unknown_feature(name: &str, tier: Tier) -> Self {
        Self {
            message: format!("Unknown feature '{name}'."),
            upgrade_url: UPGRADE_URL,
            tier,
            feature: None,
        }
    }
}

/// One line of a tenant's usage summary.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureUsage {
    pub feature: Feature,
    pub limit: Limit,
    /// Counter value for metered features, `None` for boolean gates.
    pub current: Option<u64>,
    /// `current / limit` in percent; absent without a numeric cap.
    pub percentage: Option<f64>,
}

/// A tenant's tier plus per-feature usage.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSummary {
    pub tier: Tier,
    pub features: Vec<FeatureUsage>,
}

/// Answers entitlement questions against a store.
pub struct EntitlementEngine<S> {
    store: S,
}

impl<S> EntitlementEngine<S>
where
    S: BillingStore + UsageStore,
{
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The tenant's effective tier, defaulting to free.
    pub async fn tier(&self, tenant_id: &str) -> Result<Tier> {
        Ok(current_plan(&self.store, tenant_id).await?.tier())
    }

    /// Read-only access check. Does not touch counters.
    pub async fn check_feature_access(
        &self,
        tenant_id: &str,
        feature: Feature,
    ) -> Result<FeatureAccess> {
        let tier = self.tier(tenant_id).await?;
        let limit = tier.limit(feature);

        let (allowed, current, remaining) = match limit {
            Limit::Enabled => (true, None, None),
            Limit::Disabled => (false, None, None),
            Limit::Unlimited => (true, None, None),
            Limit::Count(cap) => {
                let current = match feature.meter() {
                    Some(meter) => {
                        let key = UsageKey::current(tenant_id, meter.metric, meter.period);
                        self.store.get_usage(&key).await?
                    }
                    None => 0,
                };
                (current < cap, Some(current), Some(cap.saturating_sub(current)))
            }
        };

        Ok(FeatureAccess {
            feature,
            tier,
            allowed,
            limit,
            current,
            remaining,
        })
    }

    /// Atomically checks the limit and records `amount` uses. For boolean
    /// and unlimited features no counter is touched.
    pub async fn check_and_record_usage(
        &self,
        tenant_id: &str,
        feature: Feature,
        amount: u64,
    ) -> Result<UsageOutcome> {
        let tier = self.tier(tenant_id).await?;
        let limit = tier.limit(feature);

        match limit {
            Limit::Enabled | Limit::Unlimited => Ok(UsageOutcome::Allowed { current: None }),
            Limit::Disabled => {
                debug!(
                    target: "tollgate::entitlements",
                    tenant_id,
                    feature = %feature,
                    tier = %tier,
                    "feature denied: disabled for tier"
                );
                Ok(UsageOutcome::Denied(Denial::for_feature(feature, tier, limit)))
            }
            Limit::Count(cap) => {
                let Some(meter) = feature.meter() else {
                    // Counted features without a meter cannot be tracked;
                    // fail closed.
                    return Ok(UsageOutcome::Denied(Denial::for_feature(
                        feature, tier, limit,
                    )));
                };
                let key = UsageKey::current(tenant_id, meter.metric, meter.period);
                match self.store.increment_usage_within(&key, amount, cap).await? {
                    UsageDecision::Applied { current } => Ok(UsageOutcome::Allowed {
                        current: Some(current),
                    }),
                    UsageDecision::LimitExceeded { current, .. } => {
                        debug!(
                            target: "tollgate::entitlements",
                            tenant_id,
                            feature = %feature,
                            tier = %tier,
                            current,
                            cap,
                            "feature denied: limit reached"
                        );
                        Ok(UsageOutcome::Denied(Denial::for_feature(feature, tier, limit)))
                    }
                }
            }
        }
    }

    /// Variant of [`Self::check_and_record_usage`] for feature names taken
    /// off the wire. Unknown names are a denial, never a panic.
    pub async fn check_and_record_usage_by_name(
        &self,
        tenant_id: &str,
        feature_name: &str,
        amount: u64,
    ) -> Result<UsageOutcome> {
        match Feature::from_name(feature_name) {
            Some(feature) => self.check_and_record_usage(tenant_id, feature, amount).await,
            None => {
                let tier = self.tier(tenant_id).await?;
                debug!(
                    target: "tollgate::entitlements",
                    tenant_id,
                    feature_name,
                    "denied unknown feature name"
                );
                Ok(UsageOutcome::Denied(Denial::unknown_feature(
                    feature_name,
                    tier,
                )))
            }
        }
    }

    /// Releases `amount` uses, e.g. when a favorite is removed. Clamps at
    /// zero; non-metered features are a no-op.
    pub async fn decrement_usage(
        &self,
        tenant_id: &str,
        feature: Feature,
        amount: u64,
    ) -> Result<()> {
        if let Some(meter) = feature.meter() {
            let key = UsageKey::current(tenant_id, meter.metric, meter.period);
            self.store.decrement_usage(&key, amount).await?;
        }
        Ok(())
    }

    /// Current usage across all metered features, plus boolean gates.
    pub async fn usage_summary(&self, tenant_id: &str) -> Result<UsageSummary> {
        let tier = self.tier(tenant_id).await?;
        let mut features = Vec::with_capacity(Feature::ALL.len());

        for feature in Feature::ALL {
            let limit = tier.limit(feature);
            let current = match feature.meter() {
                Some(meter) => {
                    let key = UsageKey::current(tenant_id, meter.metric, meter.period);
                    Some(self.store.get_usage(&key).await?)
                }
                None => None,
            };
            // Zero-cap features have no capacity to consume, so they
            // carry no percentage.
            let percentage = match (current, limit.cap()) {
                (Some(current), Some(cap)) if cap > 0 => {
                    Some((current as f64 / cap as f64) * 100.0)
                }
                _ => None,
            };
            features.push(FeatureUsage {
                feature,
                limit,
                current,
                percentage,
            });
        }

        Ok(UsageSummary { tier, features })
    }
}
