//! Usage metering primitives.
//!
//! Counters live in rows keyed by tenant, metric, period kind, and a bucket
//! date. The bucket date collapses all instants within a period onto one
//! row: daily buckets use the UTC calendar date, monthly buckets the first
//! of the month, and lifetime counters share a single fixed sentinel date.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How a metric's counter rows are bucketed over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Monthly,
    Lifetime,
}

impl PeriodKind {
    /// The canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Lifetime => "lifetime",
        }
    }

    /// The bucket date that `now` falls into for this period kind.
    #[must_use]
    pub fn bucket(&self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            PeriodKind::Daily => now.date_naive(),
            PeriodKind::Monthly => now
                .date_naive()
                .with_day(1)
                .unwrap_or_else(|| now.date_naive()),
            PeriodKind::Lifetime => lifetime_epoch(),
        }
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel bucket date shared by all lifetime counters.
#[must_use]
pub fn lifetime_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Identifies one counter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageKey {
    pub tenant_id: String,
    pub metric: String,
    pub period: PeriodKind,
    pub bucket: NaiveDate,
}

impl UsageKey {
    /// Builds the key for `metric` under `period` at the current instant.
    #[must_use]
    pub fn current(tenant_id: impl Into<String>, metric: impl Into<String>, period: PeriodKind) -> Self {
        Self::at(tenant_id, metric, period, Utc::now())
    }

    /// Builds the key for an explicit instant. Tests use this to pin
    /// buckets.
    #[must_use]
    pub fn at(
        tenant_id: impl Into<String>,
        metric: impl Into<String>,
        period: PeriodKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            metric: metric.into(),
            period,
            bucket: period.bucket(now),
        }
    }
}

/// Result of a conditional usage increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecision {
    /// The increment was applied; `current` is the post-increment value.
    Applied { current: u64 },
    /// Applying would have exceeded the limit; nothing was written.
    LimitExceeded { current: u64, limit: u64 },
}

impl UsageDecision {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, UsageDecision::Applied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_bucket_is_calendar_date() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 23, 59, 59).unwrap();
        assert_eq!(
            PeriodKind::Daily.bucket(now),
            NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
        );
    }

    #[test]
    fn monthly_bucket_is_first_of_month() {
        let now = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        assert_eq!(
            PeriodKind::Monthly.bucket(now),
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
        );
    }

    #[test]
    fn lifetime_bucket_is_fixed() {
        let a = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2030, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(PeriodKind::Lifetime.bucket(a), PeriodKind::Lifetime.bucket(b));
        assert_eq!(
            PeriodKind::Lifetime.bucket(a),
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
        );
    }

    #[test]
    fn keys_in_same_period_collide() {
        let morning = Utc.with_ymd_and_hms(2026, 8, 30, 1, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 8, 30, 22, 0, 0).unwrap();
        let a = UsageKey::at("t1", "comparisons_count", PeriodKind::Daily, morning);
        let b = UsageKey::at("t1", "comparisons_count", PeriodKind::Daily, evening);
        assert_eq!(a, b);

        let next_day = Utc.with_ymd_and_hms(2026, 8, 31, 1, 0, 0).unwrap();
        let c = UsageKey::at("t1", "comparisons_count", PeriodKind::Daily, next_day);
        assert_ne!(a, c);
    }
}
