//! Tiers, features, and the limit tables that tie them together.
//!
//! This is the single source of truth for what each tier may do. Every
//! entitlement check resolves a [`Tier`] and a [`Feature`] here and gets a
//! [`Limit`] back; metered features additionally map to a usage metric and
//! period through [`Feature::meter`]. There is exactly one copy of each
//! table.

use serde::{Deserialize, Serialize};

use crate::usage::PeriodKind;

/// Where tenants are sent when a denial suggests upgrading.
pub const UPGRADE_URL: &str = "/billing/upgrade";

/// Subscription tier. Ordered so that comparisons express upgrade paths:
/// `Tier::Free < Tier::Pro < Tier::Business < Tier::Enterprise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Business,
    Enterprise,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Pro, Tier::Business, Tier::Enterprise];

    /// The canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Business => "business",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Human-facing label, used in notifications.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Pro => "Pro",
            Tier::Business => "Business",
            Tier::Enterprise => "Enterprise",
        }
    }

    /// Parses a canonical tier name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Tier> {
        match name {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "business" => Some(Tier::Business),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }

    /// Whether moving to `target` is an upgrade from this tier.
    #[must_use]
    pub fn can_upgrade_to(&self, target: Tier) -> bool {
        target > *self
    }

    /// The tiers above this one, lowest first.
    #[must_use]
    pub fn upgrade_path(&self) -> Vec<Tier> {
        Tier::ALL.iter().copied().filter(|t| t > self).collect()
    }

    /// The limit this tier grants for a feature.
    #[must_use]
    pub fn limit(&self, feature: Feature) -> Limit {
        use Feature::*;
        use Limit::*;
        match (self, feature) {
            (Tier::Free, Favorites) => Count(5),
            (Tier::Free, ComparisonsDaily) => Count(3),
            (Tier::Free, SavedSearches) => Count(0),
            (Tier::Free, Applications) => Count(0),
            (Tier::Free, ApiCallsMonthly) => Count(0),
            (Tier::Free, TeamMembers) => Count(1),
            (Tier::Free, WriteReviews | Export | Analytics | ApiAccess) => Disabled,

            (Tier::Pro, Favorites | ComparisonsDaily | Applications) => Unlimited,
            (Tier::Pro, SavedSearches) => Count(10),
            (Tier::Pro, ApiCallsMonthly) => Count(0),
            (Tier::Pro, TeamMembers) => Count(1),
            (Tier::Pro, WriteReviews | Export | Analytics) => Enabled,
            (Tier::Pro, ApiAccess) => Disabled,

            (Tier::Business, Favorites | ComparisonsDaily | SavedSearches | Applications) => {
                Unlimited
            }
            (Tier::Business, ApiCallsMonthly) => Count(10_000),
            (Tier::Business, TeamMembers) => Count(5),
            (Tier::Business, WriteReviews | Export | Analytics | ApiAccess) => Enabled,

            (
                Tier::Enterprise,
                Favorites | ComparisonsDaily | SavedSearches | Applications | ApiCallsMonthly
                | TeamMembers,
            ) => Unlimited,
            (Tier::Enterprise, WriteReviews | Export | Analytics | ApiAccess) => Enabled,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gated capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Favorites,
    ComparisonsDaily,
    SavedSearches,
    Applications,
    ApiCallsMonthly,
    TeamMembers,
    WriteReviews,
    Export,
    Analytics,
    ApiAccess,
}

impl Feature {
    /// All features, metered first.
    pub const ALL: [Feature; 10] = [
        Feature::Favorites,
        Feature::ComparisonsDaily,
        Feature::SavedSearches,
        Feature::Applications,
        Feature::ApiCallsMonthly,
        Feature::TeamMembers,
        Feature::WriteReviews,
        Feature::Export,
        Feature::Analytics,
        Feature::ApiAccess,
    ];

    /// The canonical snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Favorites => "favorites",
            Feature::ComparisonsDaily => "comparisons_daily",
            Feature::SavedSearches => "saved_searches",
            Feature::Applications => "applications",
            Feature::ApiCallsMonthly => "api_calls_monthly",
            Feature::TeamMembers => "team_members",
            Feature::WriteReviews => "can_write_reviews",
            Feature::Export => "can_export",
            Feature::Analytics => "can_access_analytics",
            Feature::ApiAccess => "can_use_api",
        }
    }

    /// Resolves a feature from its canonical name. Callers taking feature
    /// names off the wire must treat `None` as a denial, never a panic.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// The usage metric and bucketing period for metered features.
    /// Boolean-gated features return `None`.
    #[must_use]
    pub fn meter(&self) -> Option<Meter> {
        let (metric, period) = match self {
            Feature::Favorites => ("favorites_count", PeriodKind::Lifetime),
            Feature::ComparisonsDaily => ("comparisons_count", PeriodKind::Daily),
            Feature::SavedSearches => ("saved_searches_count", PeriodKind::Lifetime),
            Feature::Applications => ("applications_count", PeriodKind::Lifetime),
            Feature::ApiCallsMonthly => ("api_calls_count", PeriodKind::Monthly),
            Feature::TeamMembers => ("team_members_count", PeriodKind::Lifetime),
            Feature::WriteReviews
            | Feature::Export
            | Feature::Analytics
            | Feature::ApiAccess => return None,
        };
        Some(Meter { metric, period })
    }

    /// The message shown when this feature is denied at `limit`.
    #[must_use]
    pub fn denial_message(&self, limit: Limit) -> String {
        match self {
            Feature::Favorites => format!(
                "You've reached your favorites limit ({}). Upgrade to Pro for unlimited favorites.",
                limit.describe()
            ),
            Feature::ComparisonsDaily => format!(
                "You've used all {} comparisons for today. Upgrade to Pro for unlimited comparisons.",
                limit.describe()
            ),
            Feature::SavedSearches => match limit {
                Limit::Count(0) => {
                    "Saved searches are available on Pro and above. Upgrade to save your searches."
                        .to_string()
                }
                _ => format!(
                    "You've reached your saved searches limit ({}). Upgrade to Business for unlimited saved searches.",
                    limit.describe()
                ),
            },
            Feature::Applications => {
                "Submitting applications is available on Pro and above. Upgrade to apply."
                    .to_string()
            }
            Feature::ApiCallsMonthly => match limit {
                Limit::Count(0) => {
                    "API access is available on Business and above. Upgrade to use the API."
                        .to_string()
                }
                _ => format!(
                    "You've used all {} API calls for this month. Upgrade to Enterprise for unlimited API access.",
                    limit.describe()
                ),
            },
            Feature::TeamMembers => format!(
                "You've reached your team member limit ({}). Upgrade for a larger team.",
                limit.describe()
            ),
            Feature::WriteReviews => {
                "Writing reviews is available on Pro and above. Upgrade to share your experience."
                    .to_string()
            }
            Feature::Export => {
                "Data export is available on Pro and above. Upgrade to export your data."
                    .to_string()
            }
            Feature::Analytics => {
                "Analytics are available on Pro and above. Upgrade to see your analytics."
                    .to_string()
            }
            Feature::ApiAccess => {
                "API access is available on Business and above. Upgrade to use the API."
                    .to_string()
            }
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric name and bucketing period for a metered feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meter {
    pub metric: &'static str,
    pub period: PeriodKind,
}

/// What a tier grants for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Boolean gate, on.
    Enabled,
    /// Boolean gate, off.
    Disabled,
    /// Metered, at most this many. `Count(0)` denies immediately.
    Count(u64),
    /// Metered, no cap.
    Unlimited,
}

impl Limit {
    /// Numeric cap, when there is one.
    #[must_use]
    pub fn cap(&self) -> Option<u64> {
        match self {
            Limit::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// Short text for interpolation into user-facing messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Limit::Enabled => "enabled".to_string(),
            Limit::Disabled => "disabled".to_string(),
            Limit::Count(n) => n.to_string(),
            Limit::Unlimited => "unlimited".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_limits_match_table() {
        assert_eq!(Tier::Free.limit(Feature::Favorites), Limit::Count(5));
        assert_eq!(Tier::Free.limit(Feature::ComparisonsDaily), Limit::Count(3));
        assert_eq!(Tier::Free.limit(Feature::SavedSearches), Limit::Count(0));
        assert_eq!(Tier::Free.limit(Feature::ApiAccess), Limit::Disabled);
        assert_eq!(Tier::Free.limit(Feature::TeamMembers), Limit::Count(1));
    }

    #[test]
    fn pro_gets_unlimited_favorites_but_no_api() {
        assert_eq!(Tier::Pro.limit(Feature::Favorites), Limit::Unlimited);
        assert_eq!(Tier::Pro.limit(Feature::SavedSearches), Limit::Count(10));
        assert_eq!(Tier::Pro.limit(Feature::ApiAccess), Limit::Disabled);
        assert_eq!(Tier::Pro.limit(Feature::Export), Limit::Enabled);
    }

    #[test]
    fn business_api_quota() {
        assert_eq!(
            Tier::Business.limit(Feature::ApiCallsMonthly),
            Limit::Count(10_000)
        );
        assert_eq!(Tier::Business.limit(Feature::ApiAccess), Limit::Enabled);
        assert_eq!(Tier::Business.limit(Feature::TeamMembers), Limit::Count(5));
    }

    #[test]
    fn enterprise_is_uncapped() {
        for feature in Feature::ALL {
            let limit = Tier::Enterprise.limit(feature);
            assert!(
                matches!(limit, Limit::Unlimited | Limit::Enabled),
                "{feature} should be uncapped, got {limit:?}"
            );
        }
    }

    #[test]
    fn tier_ordering_reflects_upgrade_path() {
        assert!(Tier::Free.can_upgrade_to(Tier::Pro));
        assert!(Tier::Pro.can_upgrade_to(Tier::Enterprise));
        assert!(!Tier::Business.can_upgrade_to(Tier::Pro));
        assert!(!Tier::Pro.can_upgrade_to(Tier::Pro));
        assert_eq!(Tier::Pro.upgrade_path(), vec![Tier::Business, Tier::Enterprise]);
    }

    #[test]
    fn feature_names_round_trip() {
        for feature in Feature::ALL {
            assert_eq!(Feature::from_name(feature.as_str()), Some(feature));
        }
        assert_eq!(Feature::from_name("nonsense"), None);
    }

    #[test]
    fn metered_features_have_meters() {
        let meter = Feature::ComparisonsDaily.meter().unwrap();
        assert_eq!(meter.metric, "comparisons_count");
        assert_eq!(meter.period, PeriodKind::Daily);
        assert_eq!(
            Feature::ApiCallsMonthly.meter().unwrap().period,
            PeriodKind::Monthly
        );
        assert!(Feature::WriteReviews.meter().is_none());
    }

    #[test]
    fn favorites_denial_interpolates_limit() {
        let msg = Feature::Favorites.denial_message(Limit::Count(5));
        assert!(msg.contains("(5)"), "{msg}");
        assert!(msg.contains("Upgrade"));
    }

    #[test]
    fn tier_serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Business).unwrap(), "\"business\"");
        let t: Tier = serde_json::from_str("\"pro\"").unwrap();
        assert_eq!(t, Tier::Pro);
    }
}
