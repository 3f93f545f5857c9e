use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_ALERT_DAYS: i32 = 10;
pub const MAX_ALERT_DAYS: i32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Hod,
    Finance,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Hod => "hod",
            Role::Finance => "finance",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "employee" => Some(Role::Employee),
            "hod" => Some(Role::Hod),
            "finance" => Some(Role::Finance),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Finance sub-roles: `apa` verifies HOD-approved requests, `am` records payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubRole {
    Apa,
    Am,
}

impl SubRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubRole::Apa => "apa",
            SubRole::Am => "am",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apa" => Some(SubRole::Apa),
            "am" => Some(SubRole::Am),
            _ => None,
        }
    }
}

/// The acting user as decoded from the request token. The engine trusts these
/// values as given; authentication happens upstream.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: i32,
    pub role: Role,
    pub subrole: Option<SubRole>,
    pub department: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    ApprovedByHod,
    DeclinedByHod,
    ApprovedByApa,
    DeclinedByApa,
    Active,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub tool_name: String,
    pub vendor_name: Option<String>,
    pub department: String,
    pub purpose: String,
    pub cost_cents: i64,
    pub duration_months: i32,
    pub alert_days: i32,
    pub status: SubscriptionStatus,
    pub requested_by: i32,
    pub request_date: DateTime<Utc>,
    pub approved_by: Option<i32>,
    pub approval_date: Option<DateTime<Utc>>,
    pub apa_approved_by: Option<i32>,
    pub apa_approval_date: Option<DateTime<Utc>>,
    pub paid_by: Option<i32>,
    pub payment_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub payment_mode: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub remarks: Option<String>,
    pub renewed_from: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whole calendar days from `today` until expiry. Negative once expired.
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date
            .map(|expiry| (expiry.date_naive() - today).num_days())
    }

    /// Expired is a display state: never written back, derived whenever a
    /// record is read. Anything other than an out-of-date Active record keeps
    /// its stored status.
    pub fn effective_status(&self, today: NaiveDate) -> SubscriptionStatus {
        match (self.status, self.days_until_expiry(today)) {
            (SubscriptionStatus::Active, Some(days)) if days < 0 => SubscriptionStatus::Expired,
            (status, _) => status,
        }
    }

    /// The single canonical renewal window: an Active record whose expiry is
    /// between today and `alert_days` days out, inclusive on both ends.
    pub fn in_alert_window(&self, today: NaiveDate) -> bool {
        if self.status != SubscriptionStatus::Active {
            return false;
        }
        match self.days_until_expiry(today) {
            Some(days) => days >= 0 && days <= i64::from(self.alert_days),
            None => false,
        }
    }

    /// Renewal eligibility and alert visibility share the same window.
    pub fn is_renewable(&self, today: NaiveDate) -> bool {
        self.in_alert_window(today)
    }

    pub fn with_effective_status(mut self, today: NaiveDate) -> Self {
        self.status = self.effective_status(today);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub tool_name: String,
    pub vendor_name: Option<String>,
    /// Defaults to the requester's own department when omitted.
    pub department: Option<String>,
    pub purpose: String,
    pub cost_cents: i64,
    pub duration_months: i32,
    pub alert_days: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewSubscriptionRequest {
    pub cost_cents: i64,
    pub duration_months: i32,
    pub alert_days: Option<i32>,
    pub justification: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Decline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub mode: String,
    pub transaction_id: Option<String>,
    /// Defaults to now when omitted.
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilter {
    pub status: Option<SubscriptionStatus>,
    pub department: Option<String>,
}
