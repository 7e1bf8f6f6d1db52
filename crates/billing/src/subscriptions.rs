//! Subscription lifecycle management
//!
//! One subscription exists per organization, created at signup on the Free
//! plan and mutated by webhook ingestion and explicit upgrade/downgrade
//! flows. Rows are never hard-deleted; all transitions are soft status
//! changes.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use tightship_shared::{Plan, PlanTier, Subscription, SubscriptionStatus};

use crate::catalog::PlanCatalog;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Fields synced from a provider subscription object
#[derive(Debug, Clone)]
pub struct SubscriptionSync {
    pub billing_subscription_id: String,
    pub billing_customer_id: Option<String>,
    /// Status in the provider's vocabulary ("active", "past_due", ...)
    pub provider_status: String,
    /// First line item's price ID, used to reverse-lookup the plan
    pub price_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Map the provider's status vocabulary onto ours.
///
/// Unknown strings (new provider states, `incomplete` variants we never hold
/// a subscription in) return `None`; the caller leaves the stored status
/// untouched and logs.
pub fn map_provider_status(provider_status: &str) -> Option<SubscriptionStatus> {
    match provider_status {
        "active" => Some(SubscriptionStatus::Active),
        "trialing" => Some(SubscriptionStatus::Trialing),
        "past_due" => Some(SubscriptionStatus::PastDue),
        "canceled" | "cancelled" => Some(SubscriptionStatus::Cancelled),
        "unpaid" => Some(SubscriptionStatus::Unpaid),
        _ => None,
    }
}

/// Whether an event with timestamp `event_ts` may overwrite state last
/// written by an event at `stored_ts`.
///
/// Provider redeliveries arrive out of chronological order; a stale
/// `subscription.updated` must never overwrite a newer cancellation.
pub fn should_apply_event(stored_ts: Option<OffsetDateTime>, event_ts: OffsetDateTime) -> bool {
    match stored_ts {
        None => true,
        Some(stored) => event_ts >= stored,
    }
}

/// Subscription lifecycle service
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
    catalog: PlanCatalog,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            stripe,
            catalog: PlanCatalog::new(pool.clone()),
            pool,
        }
    }

    pub fn stripe(&self) -> &StripeClient {
        &self.stripe
    }

    /// Create the default subscription at organization signup:
    /// Free plan, Trialing status.
    pub async fn create_default_subscription(&self, org_id: Uuid) -> BillingResult<Subscription> {
        let free_plan = self.catalog.plan_for_tier(PlanTier::Free).await?;

        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (id, organization_id, plan_id, status)
            VALUES ($1, $2, $3, 'trialing')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(free_plan.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription.id,
            "Created default free subscription"
        );

        Ok(subscription)
    }

    /// Get the subscription for an organization
    pub async fn get_subscription(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE organization_id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(subscription)
    }

    /// Get the subscription together with its plan
    pub async fn subscription_with_plan(
        &self,
        org_id: Uuid,
    ) -> BillingResult<Option<(Subscription, Plan)>> {
        let subscription = match self.get_subscription(org_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        let plan = self.catalog.plan_by_id(subscription.plan_id).await?;
        Ok(Some((subscription, plan)))
    }

    /// Resolve the organization owning a provider customer ID
    pub async fn org_id_for_customer(&self, customer_id: &str) -> BillingResult<Uuid> {
        let result: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE billing_customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        result
            .map(|(id,)| id)
            .ok_or_else(|| BillingError::CustomerNotFound(customer_id.to_string()))
    }

    /// Resolve the organization owning a provider subscription ID
    pub async fn org_id_for_provider_subscription(
        &self,
        billing_subscription_id: &str,
    ) -> BillingResult<Uuid> {
        let result: Option<(Uuid,)> = sqlx::query_as(
            "SELECT organization_id FROM subscriptions WHERE billing_subscription_id = $1",
        )
        .bind(billing_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|(id,)| id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(billing_subscription_id.to_string()))
    }

    /// Bind provider IDs after checkout completes and activate.
    ///
    /// Guarded by the provider event timestamp so a redelivered checkout
    /// event cannot roll back newer subscription state.
    pub async fn bind_checkout(
        &self,
        org_id: Uuid,
        billing_customer_id: &str,
        billing_subscription_id: &str,
        event_ts: OffsetDateTime,
    ) -> BillingResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET billing_customer_id = $2,
                billing_subscription_id = $3,
                status = 'active',
                provider_event_ts = $4,
                updated_at = NOW()
            WHERE organization_id = $1
              AND (provider_event_ts IS NULL OR provider_event_ts <= $4)
            "#,
        )
        .bind(org_id)
        .bind(billing_customer_id)
        .bind(billing_subscription_id)
        .bind(event_ts)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::info!(
                org_id = %org_id,
                "Skipped checkout binding: newer subscription state already applied"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE organizations SET billing_customer_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(billing_customer_id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            billing_subscription_id = %billing_subscription_id,
            "Bound checkout to subscription, status active"
        );

        Ok(())
    }

    /// Sync provider subscription state into the local record.
    ///
    /// Status, plan (reverse-looked-up from the price ID) and period
    /// boundaries are treated as an idempotent upsert keyed on the event's
    /// own timestamp rather than arrival order.
    pub async fn sync_from_provider(
        &self,
        org_id: Uuid,
        sync: &SubscriptionSync,
        event_ts: OffsetDateTime,
    ) -> BillingResult<()> {
        let current = self.get_subscription(org_id).await?.ok_or_else(|| {
            BillingError::SubscriptionNotFound(format!("organization {}", org_id))
        })?;

        if !should_apply_event(current.provider_event_ts, event_ts) {
            tracing::info!(
                org_id = %org_id,
                event_ts = %event_ts,
                stored_ts = ?current.provider_event_ts,
                "Skipped stale subscription sync"
            );
            return Ok(());
        }

        let new_status = match map_provider_status(&sync.provider_status) {
            Some(status) => {
                if !current.status.is_valid_transition(status) {
                    tracing::warn!(
                        org_id = %org_id,
                        from = %current.status,
                        to = %status,
                        "Unexpected subscription status transition from provider"
                    );
                }
                status
            }
            None => {
                tracing::warn!(
                    org_id = %org_id,
                    provider_status = %sync.provider_status,
                    "Unknown provider subscription status, keeping stored status"
                );
                current.status
            }
        };

        // Nothing un-cancels a cancelled subscription besides an event newer
        // than the cancellation; the timestamp guard above already enforces
        // that, so at this point provider truth wins.
        let plan_id = match sync.price_id.as_deref() {
            Some(price_id) => match self.stripe.config().tier_for_price_id(price_id) {
                Some(tier) => Some(self.catalog.plan_for_tier(tier).await?.id),
                None => {
                    tracing::warn!(
                        org_id = %org_id,
                        price_id = %price_id,
                        "Unknown price ID on provider subscription, keeping stored plan"
                    );
                    None
                }
            },
            None => None,
        };

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET billing_subscription_id = $2,
                billing_customer_id = COALESCE($3, billing_customer_id),
                plan_id = COALESCE($4, plan_id),
                status = $5,
                current_period_start = COALESCE($6, current_period_start),
                current_period_end = COALESCE($7, current_period_end),
                cancel_at_period_end = $8,
                provider_event_ts = $9,
                updated_at = NOW()
            WHERE organization_id = $1
              AND (provider_event_ts IS NULL OR provider_event_ts <= $9)
            "#,
        )
        .bind(org_id)
        .bind(&sync.billing_subscription_id)
        .bind(sync.billing_customer_id.as_deref())
        .bind(plan_id)
        .bind(new_status)
        .bind(sync.current_period_start)
        .bind(sync.current_period_end)
        .bind(sync.cancel_at_period_end)
        .bind(event_ts)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            billing_subscription_id = %sync.billing_subscription_id,
            status = %new_status,
            "Synced subscription from provider"
        );

        Ok(())
    }

    /// Apply a provider-side cancellation.
    ///
    /// Always results in Cancelled regardless of prior status; historical
    /// period fields are left intact. Returns the affected organization.
    pub async fn cancel_from_provider(
        &self,
        billing_subscription_id: &str,
        event_ts: OffsetDateTime,
    ) -> BillingResult<Uuid> {
        let org_id = self
            .org_id_for_provider_subscription(billing_subscription_id)
            .await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled',
                cancel_at_period_end = FALSE,
                provider_event_ts = GREATEST(COALESCE(provider_event_ts, $2), $2),
                updated_at = NOW()
            WHERE billing_subscription_id = $1
            "#,
        )
        .bind(billing_subscription_id)
        .bind(event_ts)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            billing_subscription_id = %billing_subscription_id,
            "Subscription cancelled by provider"
        );

        Ok(org_id)
    }

    /// Move the subscription back to the Free plan.
    ///
    /// Used after a cancellation settles; the record itself survives.
    pub async fn downgrade_to_free(&self, org_id: Uuid) -> BillingResult<()> {
        let free_plan = self.catalog.plan_for_tier(PlanTier::Free).await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_id = $2, updated_at = NOW()
            WHERE organization_id = $1
            "#,
        )
        .bind(org_id)
        .bind(free_plan.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(org_id = %org_id, "Downgraded organization to free plan");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_map_provider_status_known() {
        assert_eq!(
            map_provider_status("active"),
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(
            map_provider_status("trialing"),
            Some(SubscriptionStatus::Trialing)
        );
        assert_eq!(
            map_provider_status("past_due"),
            Some(SubscriptionStatus::PastDue)
        );
        assert_eq!(
            map_provider_status("canceled"),
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(
            map_provider_status("unpaid"),
            Some(SubscriptionStatus::Unpaid)
        );
    }

    #[test]
    fn test_map_provider_status_unknown_is_none() {
        // Forward compatibility: new provider states never panic or guess
        assert_eq!(map_provider_status("incomplete"), None);
        assert_eq!(map_provider_status("paused"), None);
        assert_eq!(map_provider_status(""), None);
    }

    #[test]
    fn test_should_apply_event_ordering() {
        let now = OffsetDateTime::now_utc();
        let earlier = now - Duration::minutes(10);

        // First event always applies
        assert!(should_apply_event(None, now));

        // Newer event applies over older stored state
        assert!(should_apply_event(Some(earlier), now));

        // Stale redelivery is rejected
        assert!(!should_apply_event(Some(now), earlier));

        // Same-timestamp redelivery re-applies the same state (idempotent)
        assert!(should_apply_event(Some(now), now));
    }
}
