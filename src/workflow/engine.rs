use chrono::{DateTime, Months, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    Actor, CreateSubscriptionRequest, Decision, ListFilter, PaymentRequest,
    RenewSubscriptionRequest, Role, SubRole, Subscription, SubscriptionStatus,
    DEFAULT_ALERT_DAYS, MAX_ALERT_DAYS,
};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("subscription not found")]
    NotFound,
    #[error("invalid transition: cannot {action} a subscription in status {from:?}")]
    InvalidTransition {
        from: SubscriptionStatus,
        action: &'static str,
    },
    #[error("not permitted to {0}")]
    Unauthorized(&'static str),
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Stateless transition service for the subscription approval workflow.
///
/// Every operation takes the pool and the acting user explicitly; nothing is
/// cached between calls. Transitions are single compare-and-swap updates
/// guarded on the expected pre-state, so a stale actor loses the race instead
/// of clobbering a newer decision.
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngine;

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch(&self, pool: &PgPool, id: Uuid) -> Result<Subscription, WorkflowError> {
        let record = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        record.ok_or(WorkflowError::NotFound)
    }

    pub async fn create_request(
        &self,
        pool: &PgPool,
        actor: &Actor,
        payload: CreateSubscriptionRequest,
    ) -> Result<Subscription, WorkflowError> {
        let tool_name = required_text(&payload.tool_name, "tool name")?;
        let purpose = required_text(&payload.purpose, "purpose")?;
        let department = match payload.department {
            Some(ref value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => actor.department.clone(),
        };
        validate_terms(payload.cost_cents, payload.duration_months)?;
        let alert_days = validated_alert_days(payload.alert_days)?;

        let record = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id,
                tool_name,
                vendor_name,
                department,
                purpose,
                cost_cents,
                duration_months,
                alert_days,
                status,
                requested_by,
                request_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tool_name)
        .bind(payload.vendor_name.as_deref().map(str::trim))
        .bind(department)
        .bind(purpose)
        .bind(payload.cost_cents)
        .bind(payload.duration_months)
        .bind(alert_days)
        .bind(actor.user_id)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    /// HOD approval or decline of a Pending record. The HOD must belong to the
    /// record's department; declines require a reason.
    pub async fn hod_decision(
        &self,
        pool: &PgPool,
        actor: &Actor,
        id: Uuid,
        decision: Decision,
        reason: Option<&str>,
    ) -> Result<Subscription, WorkflowError> {
        if actor.role != Role::Hod {
            return Err(WorkflowError::Unauthorized("decide on department requests"));
        }
        let record = self.fetch(pool, id).await?;
        if record.department != actor.department {
            return Err(WorkflowError::Unauthorized(
                "decide on requests outside your department",
            ));
        }

        let (status, remarks) = match decision {
            Decision::Approve => (SubscriptionStatus::ApprovedByHod, None),
            Decision::Decline => {
                let reason = required_reason(reason)?;
                (
                    SubscriptionStatus::DeclinedByHod,
                    Some(format!("Declined by HOD: {reason}")),
                )
            }
        };

        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2,
                approved_by = $3,
                approval_date = NOW(),
                remarks = COALESCE($4, remarks),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(actor.user_id)
        .bind(remarks)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => Err(self.transition_conflict(pool, id, "apply an HOD decision to").await?),
        }
    }

    /// Finance (APA) verification of an HOD-approved record.
    pub async fn finance_decision(
        &self,
        pool: &PgPool,
        actor: &Actor,
        id: Uuid,
        decision: Decision,
        reason: Option<&str>,
    ) -> Result<Subscription, WorkflowError> {
        if actor.role != Role::Finance || actor.subrole != Some(SubRole::Apa) {
            return Err(WorkflowError::Unauthorized("verify requests for payment"));
        }
        self.fetch(pool, id).await?;

        let (status, remarks) = match decision {
            Decision::Approve => (SubscriptionStatus::ApprovedByApa, None),
            Decision::Decline => {
                let reason = required_reason(reason)?;
                (
                    SubscriptionStatus::DeclinedByApa,
                    Some(format!("Declined by APA: {reason}")),
                )
            }
        };

        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2,
                apa_approved_by = $3,
                apa_approval_date = NOW(),
                remarks = COALESCE($4, remarks),
                updated_at = NOW()
            WHERE id = $1 AND status = 'approved_by_hod'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(actor.user_id)
        .bind(remarks)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => Err(self.transition_conflict(pool, id, "apply an APA decision to").await?),
        }
    }

    /// Finance (AM) records payment for an APA-approved record, activating it.
    /// Sets the expiry exactly once: payment date plus the requested duration.
    pub async fn record_payment(
        &self,
        pool: &PgPool,
        actor: &Actor,
        id: Uuid,
        payment: PaymentRequest,
    ) -> Result<Subscription, WorkflowError> {
        if actor.role != Role::Finance || actor.subrole != Some(SubRole::Am) {
            return Err(WorkflowError::Unauthorized("record payments"));
        }
        let mode = required_text(&payment.mode, "payment mode")?;
        let record = self.fetch(pool, id).await?;

        let paid_at = payment.paid_at.unwrap_or_else(Utc::now);
        let expiry = add_months(paid_at, record.duration_months)?;
        let remarks = format!("Paid via {mode}");

        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                paid_by = $2,
                payment_date = $3,
                expiry_date = $4,
                payment_mode = $5,
                payment_transaction_id = $6,
                remarks = $7,
                updated_at = NOW()
            WHERE id = $1 AND status = 'approved_by_apa'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor.user_id)
        .bind(paid_at)
        .bind(expiry)
        .bind(mode)
        .bind(payment.transaction_id.as_deref().map(str::trim))
        .bind(remarks)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => Err(self.transition_conflict(pool, id, "record payment for").await?),
        }
    }

    /// Renewal is not a transition on the source record: it creates a fresh
    /// Pending request copying the descriptive fields, with every approval and
    /// payment field unset, so the original's history stays intact.
    pub async fn renew(
        &self,
        pool: &PgPool,
        actor: &Actor,
        id: Uuid,
        payload: RenewSubscriptionRequest,
    ) -> Result<Subscription, WorkflowError> {
        let source = self.fetch(pool, id).await?;
        if source.requested_by != actor.user_id {
            return Err(WorkflowError::Unauthorized(
                "renew a subscription requested by someone else",
            ));
        }
        let today = Utc::now().date_naive();
        if !source.is_renewable(today) {
            return Err(WorkflowError::Validation(
                "subscription is not within its renewal window".into(),
            ));
        }
        let justification = required_text(&payload.justification, "justification")?;
        validate_terms(payload.cost_cents, payload.duration_months)?;
        let alert_days = validated_alert_days(payload.alert_days)?;

        let record = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id,
                tool_name,
                vendor_name,
                department,
                purpose,
                cost_cents,
                duration_months,
                alert_days,
                status,
                requested_by,
                request_date,
                remarks,
                renewed_from
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, NOW(), $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&source.tool_name)
        .bind(&source.vendor_name)
        .bind(&source.department)
        .bind(&source.purpose)
        .bind(payload.cost_cents)
        .bind(payload.duration_months)
        .bind(alert_days)
        .bind(actor.user_id)
        .bind(justification)
        .bind(source.id)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    /// Role-scoped listing backing the dashboards: employees see their own
    /// requests, HODs their department, APA/AM their stage queue, admins all.
    pub async fn list_for_actor(
        &self,
        pool: &PgPool,
        actor: &Actor,
        filter: ListFilter,
    ) -> Result<Vec<Subscription>, WorkflowError> {
        const COMMON: &str = r#"
            SELECT * FROM subscriptions
            WHERE ($1::subscription_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR department = $2)
        "#;
        const ORDER: &str = " ORDER BY request_date DESC";

        let records = match (actor.role, actor.subrole) {
            (Role::Employee, _) => {
                let sql = format!("{COMMON} AND requested_by = $3{ORDER}");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(filter.status)
                    .bind(filter.department)
                    .bind(actor.user_id)
                    .fetch_all(pool)
                    .await?
            }
            (Role::Hod, _) => {
                let sql = format!("{COMMON} AND department = $3{ORDER}");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(filter.status)
                    .bind(filter.department)
                    .bind(&actor.department)
                    .fetch_all(pool)
                    .await?
            }
            (Role::Finance, Some(subrole)) => {
                let stage = match subrole {
                    SubRole::Apa => SubscriptionStatus::ApprovedByHod,
                    SubRole::Am => SubscriptionStatus::ApprovedByApa,
                };
                let sql = format!("{COMMON} AND status = $3{ORDER}");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(filter.status)
                    .bind(filter.department)
                    .bind(stage)
                    .fetch_all(pool)
                    .await?
            }
            (Role::Finance, None) => {
                return Err(WorkflowError::Unauthorized("list without a finance sub-role"))
            }
            (Role::Admin, _) => {
                let sql = format!("{COMMON}{ORDER}");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(filter.status)
                    .bind(filter.department)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(records)
    }

    /// Active subscriptions inside their alert window, for the actor's scope.
    /// The window is evaluated at read time against today's date, never cached
    /// on the record.
    pub async fn renewal_alerts(
        &self,
        pool: &PgPool,
        actor: &Actor,
        today: chrono::NaiveDate,
    ) -> Result<Vec<Subscription>, WorkflowError> {
        const ACTIVE: &str = r#"
            SELECT * FROM subscriptions
            WHERE status = 'active'
              AND expiry_date IS NOT NULL
        "#;

        let records = match actor.role {
            Role::Employee => {
                let sql = format!("{ACTIVE} AND requested_by = $1 ORDER BY expiry_date");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(actor.user_id)
                    .fetch_all(pool)
                    .await?
            }
            Role::Hod => {
                let sql = format!("{ACTIVE} AND department = $1 ORDER BY expiry_date");
                sqlx::query_as::<_, Subscription>(&sql)
                    .bind(&actor.department)
                    .fetch_all(pool)
                    .await?
            }
            Role::Finance | Role::Admin => {
                let sql = format!("{ACTIVE} ORDER BY expiry_date");
                sqlx::query_as::<_, Subscription>(&sql)
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(records
            .into_iter()
            .filter(|record| record.in_alert_window(today))
            .collect())
    }

    /// A compare-and-swap miss means either the record vanished or its status
    /// no longer matches the expected pre-state.
    async fn transition_conflict(
        &self,
        pool: &PgPool,
        id: Uuid,
        action: &'static str,
    ) -> Result<WorkflowError, WorkflowError> {
        let current = self.fetch(pool, id).await?;
        Ok(WorkflowError::InvalidTransition {
            from: current.status,
            action,
        })
    }
}

fn required_text(value: &str, field: &str) -> Result<String, WorkflowError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn required_reason(reason: Option<&str>) -> Result<String, WorkflowError> {
    match reason.map(str::trim) {
        Some(reason) if !reason.is_empty() => Ok(reason.to_string()),
        _ => Err(WorkflowError::Validation(
            "a decline requires a non-empty reason".into(),
        )),
    }
}

fn validate_terms(cost_cents: i64, duration_months: i32) -> Result<(), WorkflowError> {
    if cost_cents <= 0 {
        return Err(WorkflowError::Validation("cost must be positive".into()));
    }
    if duration_months <= 0 {
        return Err(WorkflowError::Validation(
            "duration must be a positive number of months".into(),
        ));
    }
    Ok(())
}

fn validated_alert_days(alert_days: Option<i32>) -> Result<i32, WorkflowError> {
    match alert_days {
        None => Ok(DEFAULT_ALERT_DAYS),
        Some(days) if (1..=MAX_ALERT_DAYS).contains(&days) => Ok(days),
        Some(days) => Err(WorkflowError::Validation(format!(
            "alert days must be between 1 and {MAX_ALERT_DAYS}, got {days}"
        ))),
    }
}

fn add_months(start: DateTime<Utc>, months: i32) -> Result<DateTime<Utc>, WorkflowError> {
    let months = u32::try_from(months).map_err(|_| {
        WorkflowError::Validation("duration must be a positive number of months".into())
    })?;
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| WorkflowError::Validation("expiry date out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn subscription(status: SubscriptionStatus, expiry: Option<&str>, alert_days: i32) -> Subscription {
        let ts = |s: &str| {
            Utc.from_utc_datetime(
                &NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            )
        };
        Subscription {
            id: Uuid::new_v4(),
            tool_name: "Figma".into(),
            vendor_name: Some("Figma".into()),
            department: "Engineering".into(),
            purpose: "UI design".into(),
            cost_cents: 144_000,
            duration_months: 12,
            alert_days,
            status,
            requested_by: 1,
            request_date: ts("2025-01-02"),
            approved_by: None,
            approval_date: None,
            apa_approved_by: None,
            apa_approval_date: None,
            paid_by: None,
            payment_date: None,
            expiry_date: expiry.map(ts),
            payment_mode: None,
            payment_transaction_id: None,
            remarks: None,
            renewed_from: None,
            created_at: ts("2025-01-02"),
            updated_at: ts("2025-01-02"),
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn renewal_window_inside_alert_days() {
        let sub = subscription(SubscriptionStatus::Active, Some("2025-08-15"), 10);
        assert!(sub.is_renewable(day("2025-08-10")));
    }

    #[test]
    fn renewal_window_boundaries_inclusive() {
        let sub = subscription(SubscriptionStatus::Active, Some("2025-08-15"), 10);
        assert!(sub.is_renewable(day("2025-08-15")), "expiry day itself counts");
        assert!(sub.is_renewable(day("2025-08-05")), "alert_days out counts");
        assert!(!sub.is_renewable(day("2025-08-04")), "one day earlier does not");
    }

    #[test]
    fn renewal_window_respects_small_alert_days() {
        let sub = subscription(SubscriptionStatus::Active, Some("2025-08-15"), 3);
        assert!(!sub.is_renewable(day("2025-08-10")));
        assert!(sub.is_renewable(day("2025-08-13")));
    }

    #[test]
    fn expired_records_are_not_renewable() {
        let sub = subscription(SubscriptionStatus::Active, Some("2025-08-15"), 10);
        assert!(!sub.is_renewable(day("2025-08-16")));
    }

    #[test]
    fn non_active_records_are_not_renewable() {
        let sub = subscription(SubscriptionStatus::Pending, Some("2025-08-15"), 10);
        assert!(!sub.is_renewable(day("2025-08-10")));
    }

    #[test]
    fn effective_status_derives_expired_at_read_time() {
        let sub = subscription(SubscriptionStatus::Active, Some("2025-08-15"), 10);
        assert_eq!(
            sub.effective_status(day("2025-08-15")),
            SubscriptionStatus::Active
        );
        assert_eq!(
            sub.effective_status(day("2025-08-16")),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn effective_status_leaves_terminal_states_alone() {
        let sub = subscription(SubscriptionStatus::DeclinedByHod, None, 10);
        assert_eq!(
            sub.effective_status(day("2025-08-16")),
            SubscriptionStatus::DeclinedByHod
        );
    }

    #[test]
    fn expiry_is_payment_date_plus_duration_months() {
        let paid = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let expiry = add_months(paid, 12).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn expiry_clamps_to_month_end() {
        let paid = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        let expiry = add_months(paid, 1).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap());
    }

    #[test]
    fn alert_days_validation_bounds() {
        assert_eq!(validated_alert_days(None).unwrap(), DEFAULT_ALERT_DAYS);
        assert_eq!(validated_alert_days(Some(1)).unwrap(), 1);
        assert_eq!(validated_alert_days(Some(60)).unwrap(), 60);
        assert!(validated_alert_days(Some(0)).is_err());
        assert!(validated_alert_days(Some(61)).is_err());
    }

    #[test]
    fn decline_reason_must_be_non_empty() {
        assert!(required_reason(None).is_err());
        assert!(required_reason(Some("   ")).is_err());
        assert_eq!(required_reason(Some(" Budget ")).unwrap(), "Budget");
    }
}
