use chrono::Months;
use mongodb::bson::{oid::ObjectId, DateTime};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Generations allowed per billing cycle.
    pub fn plans_limit(&self) -> i32 {
        match self {
            PlanTier::Basic => 2,
            PlanTier::Pro => 25,
            PlanTier::Enterprise => 250,
        }
    }

    /// Monthly price in USD. Basic is the free tier.
    pub fn monthly_price(&self) -> f64 {
        match self {
            PlanTier::Basic => 0.0,
            PlanTier::Pro => 19.99,
            PlanTier::Enterprise => 49.99,
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Basic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(name: &str) -> Option<PlanTier> {
        match name.to_lowercase().as_str() {
            "basic" => Some(PlanTier::Basic),
            "pro" => Some(PlanTier::Pro),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Subscription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub plan: PlanTier,
    pub plans_generated: i32,
    // Denormalized from the tier so the quota claim can compare both
    // values inside a single update filter.
    pub plans_limit: i32,
    pub next_reset: DateTime,
    pub status: SubscriptionStatus,
    pub paypal_subscription_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Subscription {
    pub fn new(user_id: ObjectId) -> Self {
        let now = DateTime::now();
        Subscription {
            id: None,
            user_id,
            plan: PlanTier::Basic,
            plans_generated: 0,
            plans_limit: PlanTier::Basic.plans_limit(),
            next_reset: next_reset_from(now),
            status: SubscriptionStatus::Active,
            paypal_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> i32 {
        (self.plans_limit - self.plans_generated).max(0)
    }
}

/// One calendar month after `from`, clamped to the last day of shorter
/// months (Jan 31 → Feb 28/29).
pub fn next_reset_from(from: DateTime) -> DateTime {
    let start = from.to_chrono();
    let advanced = start
        .checked_add_months(Months::new(1))
        .unwrap_or(start + chrono::Duration::days(30));
    DateTime::from_millis(advanced.timestamp_millis())
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SubscriptionView {
    pub plan: PlanTier,
    pub plans_generated: i32,
    pub plans_limit: i32,
    pub remaining: i32,
    pub next_reset: String,
    pub status: SubscriptionStatus,
}

impl From<Subscription> for SubscriptionView {
    fn from(sub: Subscription) -> Self {
        let remaining = sub.remaining();
        SubscriptionView {
            plan: sub.plan,
            plans_generated: sub.plans_generated,
            plans_limit: sub.plans_limit,
            remaining,
            next_reset: sub.next_reset.try_to_rfc3339_string().unwrap_or_default(),
            status: sub.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn tier_limits_are_ordered() {
        assert_eq!(PlanTier::Basic.plans_limit(), 2);
        assert_eq!(PlanTier::Pro.plans_limit(), 25);
        assert_eq!(PlanTier::Enterprise.plans_limit(), 250);
        assert!(PlanTier::Basic.plans_limit() < PlanTier::Pro.plans_limit());
        assert!(PlanTier::Pro.plans_limit() < PlanTier::Enterprise.plans_limit());
    }

    #[test]
    fn only_basic_is_free() {
        assert!(!PlanTier::Basic.is_paid());
        assert!(PlanTier::Pro.is_paid());
        assert!(PlanTier::Enterprise.is_paid());
        assert_eq!(PlanTier::Basic.monthly_price(), 0.0);
    }

    #[test]
    fn parse_round_trips_and_rejects_unknown() {
        for tier in [PlanTier::Basic, PlanTier::Pro, PlanTier::Enterprise] {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::parse("PRO"), Some(PlanTier::Pro));
        assert_eq!(PlanTier::parse("silver"), None);
        assert_eq!(PlanTier::parse(""), None);
    }

    #[test]
    fn remaining_never_negative() {
        let mut sub = Subscription::new(ObjectId::new());
        sub.plans_limit = 2;
        sub.plans_generated = 5;
        assert_eq!(sub.remaining(), 0);
        sub.plans_generated = 1;
        assert_eq!(sub.remaining(), 1);
    }

    #[test]
    fn new_subscription_starts_on_basic_with_zero_usage() {
        let sub = Subscription::new(ObjectId::new());
        assert_eq!(sub.plan, PlanTier::Basic);
        assert_eq!(sub.plans_generated, 0);
        assert_eq!(sub.plans_limit, 2);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.next_reset > sub.created_at);
    }

    #[test]
    fn next_reset_advances_one_calendar_month() {
        let from = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let reset = next_reset_from(DateTime::from_millis(from.timestamp_millis()));
        let expected = Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap();
        assert_eq!(reset.timestamp_millis(), expected.timestamp_millis());
    }

    #[test]
    fn next_reset_clamps_to_short_months() {
        let from = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let reset = next_reset_from(DateTime::from_millis(from.timestamp_millis()));
        let expected = Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap();
        assert_eq!(reset.timestamp_millis(), expected.timestamp_millis());
    }

    #[test]
    fn plan_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PlanTier::Pro).unwrap(), "\"pro\"");
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
