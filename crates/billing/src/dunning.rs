//! Dunning and grace-period management
//!
//! Reacts to payment-failure and payment-recovery signals from webhook
//! ingestion, tracks the grace countdown on the subscription row, and derives
//! the warning level shown to tenants:
//! none → warning (1st failure) → critical (repeated failures or approaching
//! deadline) → suspended (grace elapsed with no recovery).

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use tightship_shared::Subscription;

use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};

/// Dunning policy values. Configuration, not business logic: every value is
/// overridable per deployment.
#[derive(Debug, Clone)]
pub struct DunningConfig {
    /// Days of continued service after the first payment failure
    pub grace_period_days: i64,
    /// Failure count at which the warning level escalates to critical
    pub critical_failure_threshold: i32,
    /// Days before the grace deadline at which warnings escalate to critical
    pub grace_warning_window_days: i64,
}

impl Default for DunningConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 14,
            critical_failure_threshold: 2,
            grace_warning_window_days: 3,
        }
    }
}

impl DunningConfig {
    /// Load config from environment variables, falling back to defaults
    ///
    /// - `DUNNING_GRACE_PERIOD_DAYS` (default: 14)
    /// - `DUNNING_CRITICAL_FAILURES` (default: 2)
    /// - `DUNNING_GRACE_WARNING_DAYS` (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            grace_period_days: std::env::var("DUNNING_GRACE_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.grace_period_days),
            critical_failure_threshold: std::env::var("DUNNING_CRITICAL_FAILURES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.critical_failure_threshold),
            grace_warning_window_days: std::env::var("DUNNING_GRACE_WARNING_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.grace_warning_window_days),
        }
    }
}

/// Derived warning level for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    None,
    Warning,
    Critical,
    Suspended,
}

/// Severity of a single warning entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningKind {
    Warning,
    Critical,
}

/// A warning surfaced to the tenant's dashboard
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionWarning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub title: String,
    pub message: String,
}

/// Derive the warning level from dunning state. Pure; the inputs come from
/// the subscription row.
pub fn derive_warning_level(
    failure_count: i32,
    grace_ends_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
    config: &DunningConfig,
) -> WarningLevel {
    if let Some(deadline) = grace_ends_at {
        if now >= deadline {
            return WarningLevel::Suspended;
        }
        let warning_window = Duration::days(config.grace_warning_window_days);
        if failure_count >= config.critical_failure_threshold || now >= deadline - warning_window {
            return WarningLevel::Critical;
        }
    }

    match failure_count {
        0 => WarningLevel::None,
        1 => WarningLevel::Warning,
        _ => WarningLevel::Critical,
    }
}

/// Dunning manager
pub struct DunningService {
    pool: PgPool,
    config: DunningConfig,
    email: BillingEmailService,
    event_logger: BillingEventLogger,
}

impl DunningService {
    pub fn new(pool: PgPool, config: DunningConfig, email: BillingEmailService) -> Self {
        Self {
            event_logger: BillingEventLogger::new(pool.clone()),
            pool,
            config,
            email,
        }
    }

    pub fn config(&self) -> &DunningConfig {
        &self.config
    }

    /// Record a payment failure: bump the failure counter, start the grace
    /// countdown if it isn't running, and notify the organization owner.
    pub async fn payment_failed(
        &self,
        org_id: Uuid,
        attempt_count: i32,
        amount_due_cents: i64,
        invoice_url: Option<&str>,
    ) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();
        let grace_deadline = now + Duration::days(self.config.grace_period_days);

        // The provider's attempt_count is authoritative when it is ahead of
        // our counter (we may have missed an earlier delivery).
        let row: Option<(i32, Option<OffsetDateTime>)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET payment_failure_count = GREATEST(payment_failure_count + 1, $2),
                last_payment_failure_at = $3,
                grace_period_ends_at = COALESCE(grace_period_ends_at, $4),
                updated_at = NOW()
            WHERE organization_id = $1
            RETURNING payment_failure_count, grace_period_ends_at
            "#,
        )
        .bind(org_id)
        .bind(attempt_count)
        .bind(now)
        .bind(grace_deadline)
        .fetch_optional(&self.pool)
        .await?;

        let (failure_count, grace_ends_at) = row.ok_or_else(|| {
            BillingError::SubscriptionNotFound(format!("organization {}", org_id))
        })?;

        let level = derive_warning_level(failure_count, grace_ends_at, now, &self.config);

        let grace_started = grace_ends_at == Some(grace_deadline);
        if grace_started {
            if let Err(e) = self
                .event_logger
                .log_event(
                    BillingEventBuilder::new(org_id, BillingEventType::GracePeriodStarted)
                        .data(serde_json::json!({
                            "grace_period_ends_at": grace_deadline.to_string(),
                            "grace_period_days": self.config.grace_period_days,
                        }))
                        .actor_type(ActorType::System),
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log grace period started event");
            }
        }

        if level == WarningLevel::Suspended {
            if let Err(e) = self
                .event_logger
                .log_event(
                    BillingEventBuilder::new(org_id, BillingEventType::ServiceSuspended)
                        .data(serde_json::json!({
                            "failure_count": failure_count,
                            "grace_period_ends_at": grace_ends_at.map(|t| t.to_string()),
                        }))
                        .actor_type(ActorType::System),
                )
                .await
            {
                tracing::warn!(error = %e, "Failed to log service suspended event");
            }
        }

        tracing::warn!(
            org_id = %org_id,
            failure_count = failure_count,
            attempt_count = attempt_count,
            amount_due_cents = amount_due_cents,
            grace_ends_at = ?grace_ends_at,
            warning_level = ?level,
            "Payment failed, dunning state updated"
        );

        // Notification escalates with the warning level
        if let Ok(Some((email, org_name))) = self.get_org_contact(org_id).await {
            let send_result = if level == WarningLevel::Critical {
                let days_left = grace_ends_at
                    .map(|deadline| (deadline - now).whole_days().max(0))
                    .unwrap_or(0);
                self.email
                    .send_grace_period_expiring(&email, &org_name, days_left)
                    .await
            } else {
                self.email
                    .send_payment_failed(&email, &org_name, amount_due_cents, invoice_url)
                    .await
            };
            if let Err(e) = send_result {
                tracing::error!(error = %e, "Failed to send dunning email");
            }
        }

        Ok(())
    }

    /// A successful payment at any point resets the level to none and clears
    /// any suspension.
    pub async fn payment_recovered(&self, org_id: Uuid) -> BillingResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET payment_failure_count = 0,
                last_payment_failure_at = NULL,
                grace_period_ends_at = NULL,
                updated_at = NOW()
            WHERE organization_id = $1
              AND (payment_failure_count > 0 OR grace_period_ends_at IS NOT NULL)
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Nothing to recover; healthy subscriptions stay untouched
            return Ok(());
        }

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::PaymentRecovered)
                    .actor_type(ActorType::System),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log payment recovered event");
        }

        tracing::info!(org_id = %org_id, "Payment recovered, dunning state cleared");

        if let Ok(Some((email, org_name))) = self.get_org_contact(org_id).await {
            if let Err(e) = self.email.send_payment_recovered(&email, &org_name).await {
                tracing::error!(error = %e, "Failed to send payment recovered email");
            }
        }

        Ok(())
    }

    /// Current warning level for an organization's subscription
    pub async fn warning_level(&self, org_id: Uuid) -> BillingResult<WarningLevel> {
        let row: Option<(i32, Option<OffsetDateTime>)> = sqlx::query_as(
            r#"
            SELECT payment_failure_count, grace_period_ends_at
            FROM subscriptions
            WHERE organization_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((failure_count, grace_ends_at)) => derive_warning_level(
                failure_count,
                grace_ends_at,
                OffsetDateTime::now_utc(),
                &self.config,
            ),
            // No subscription: nothing to warn about
            None => WarningLevel::None,
        })
    }

    /// Whether mutations should be blocked for this tenant
    pub async fn is_suspended(&self, org_id: Uuid) -> BillingResult<bool> {
        Ok(self.warning_level(org_id).await? == WarningLevel::Suspended)
    }

    /// Warnings for the tenant's dashboard, most severe first.
    /// Zero entries for a healthy subscription; never errors.
    pub async fn subscription_warnings(
        &self,
        org_id: Uuid,
    ) -> BillingResult<Vec<SubscriptionWarning>> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE organization_id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        let subscription = match subscription {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let now = OffsetDateTime::now_utc();
        let level = derive_warning_level(
            subscription.payment_failure_count,
            subscription.grace_period_ends_at,
            now,
            &self.config,
        );

        let mut warnings = Vec::new();

        match level {
            WarningLevel::None => {}
            WarningLevel::Warning => {
                warnings.push(SubscriptionWarning {
                    kind: WarningKind::Warning,
                    title: "Payment issue".to_string(),
                    message: "Your last payment failed. We'll retry automatically; \
                              please check your payment method."
                        .to_string(),
                });
            }
            WarningLevel::Critical => {
                let days_left = subscription
                    .grace_period_ends_at
                    .map(|deadline| ((deadline - now).whole_days()).max(0))
                    .unwrap_or(0);
                warnings.push(SubscriptionWarning {
                    kind: WarningKind::Critical,
                    title: "Payment required".to_string(),
                    message: format!(
                        "Repeated payment failures. Service will be suspended in {} day(s) \
                         unless payment succeeds.",
                        days_left
                    ),
                });
            }
            WarningLevel::Suspended => {
                warnings.push(SubscriptionWarning {
                    kind: WarningKind::Critical,
                    title: "Service suspended".to_string(),
                    message: "The grace period has ended without a successful payment. \
                              Update your payment method to restore access."
                        .to_string(),
                });
            }
        }

        if subscription.cancel_at_period_end {
            let until = subscription
                .current_period_end
                .map(|end| end.date().to_string())
                .unwrap_or_else(|| "the end of the billing period".to_string());
            warnings.push(SubscriptionWarning {
                kind: WarningKind::Warning,
                title: "Subscription ending".to_string(),
                message: format!("Your subscription is set to cancel on {}.", until),
            });
        }

        Ok(warnings)
    }

    /// Billing notifications go to the organization's contact address
    async fn get_org_contact(&self, org_id: Uuid) -> BillingResult<Option<(String, String)>> {
        let result: Option<(Option<String>, String)> =
            sqlx::query_as("SELECT contact_email, name FROM organizations WHERE id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result.and_then(|(email, name)| email.map(|e| (e, name))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DunningConfig {
        DunningConfig::default()
    }

    #[test]
    fn test_level_none_without_failures() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            derive_warning_level(0, None, now, &cfg()),
            WarningLevel::None
        );
    }

    #[test]
    fn test_level_warning_on_first_failure() {
        let now = OffsetDateTime::now_utc();
        let deadline = now + Duration::days(14);
        assert_eq!(
            derive_warning_level(1, Some(deadline), now, &cfg()),
            WarningLevel::Warning
        );
    }

    #[test]
    fn test_level_critical_on_repeated_failures() {
        let now = OffsetDateTime::now_utc();
        let deadline = now + Duration::days(10);
        assert_eq!(
            derive_warning_level(2, Some(deadline), now, &cfg()),
            WarningLevel::Critical
        );
        assert_eq!(
            derive_warning_level(5, Some(deadline), now, &cfg()),
            WarningLevel::Critical
        );
    }

    #[test]
    fn test_level_critical_near_deadline() {
        let now = OffsetDateTime::now_utc();
        // One failure, but the deadline is inside the warning window
        let deadline = now + Duration::days(2);
        assert_eq!(
            derive_warning_level(1, Some(deadline), now, &cfg()),
            WarningLevel::Critical
        );
    }

    #[test]
    fn test_level_suspended_after_grace_elapsed() {
        let now = OffsetDateTime::now_utc();
        let deadline = now - Duration::days(1);
        assert_eq!(
            derive_warning_level(3, Some(deadline), now, &cfg()),
            WarningLevel::Suspended
        );
    }

    #[test]
    fn test_recovery_resets_to_none() {
        // payment_recovered zeroes the counter and clears the deadline;
        // the derived level must come back to none
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            derive_warning_level(0, None, now, &cfg()),
            WarningLevel::None
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = DunningConfig::default();
        assert_eq!(config.grace_period_days, 14);
        assert_eq!(config.critical_failure_threshold, 2);
        assert_eq!(config.grace_warning_window_days, 3);
    }
}
