//! Usage accounting
//!
//! Computes live per-tenant resource usage against the active plan's limits.
//! Counts are always scoped to the organization's own rows; a `-1` limit is
//! the unlimited sentinel and bypasses all gating.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tightship_shared::{PlanLimits, PlanTier, ResourceKind, UNLIMITED};

use crate::error::{BillingError, BillingResult};

/// Usage of a single resource for an organization
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub resource: ResourceKind,
    pub current: i64,
    pub limit: i64,
    pub remaining: i64,
    pub is_unlimited: bool,
}

impl ResourceUsage {
    /// Evaluate usage against a limit, honoring the unlimited sentinel
    pub fn evaluate(resource: ResourceKind, current: i64, limit: i64) -> Self {
        let is_unlimited = limit == UNLIMITED;
        let remaining = if is_unlimited {
            UNLIMITED
        } else {
            (limit - current).max(0)
        };
        Self {
            resource,
            current,
            limit,
            remaining,
            is_unlimited,
        }
    }

    /// Whether a new unit of this resource may be created
    pub fn allows_creation(&self) -> bool {
        self.is_unlimited || self.current < self.limit
    }
}

/// Usage accounting service
#[derive(Clone)]
pub struct UsageService {
    pool: PgPool,
}

impl UsageService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Limits of the organization's active plan.
    ///
    /// An organization without a subscription row should be unreachable given
    /// the signup lifecycle, but is treated as Free tier rather than an error.
    pub async fn active_limits(&self, org_id: Uuid) -> BillingResult<PlanLimits> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT p.limit_restaurants, p.limit_products, p.limit_api_calls
            FROM subscriptions s
            JOIN plans p ON p.id = s.plan_id
            WHERE s.organization_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((restaurants, products, api_calls)) => PlanLimits {
                restaurants,
                products,
                api_calls,
            },
            None => {
                tracing::warn!(
                    org_id = %org_id,
                    "Organization has no subscription, falling back to free tier limits"
                );
                PlanTier::Free.limits()
            }
        })
    }

    /// Current live count for a resource, tenant-scoped
    pub async fn current_count(&self, org_id: Uuid, kind: ResourceKind) -> BillingResult<i64> {
        let count: (i64,) = match kind {
            ResourceKind::Restaurants => {
                sqlx::query_as("SELECT COUNT(*) FROM restaurants WHERE organization_id = $1")
                    .bind(org_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            ResourceKind::Products => {
                sqlx::query_as("SELECT COUNT(*) FROM products WHERE organization_id = $1")
                    .bind(org_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            ResourceKind::ApiCalls => {
                sqlx::query_as(
                    r#"
                    SELECT COALESCE(SUM(request_count), 0)::BIGINT
                    FROM api_usage
                    WHERE organization_id = $1
                      AND day >= date_trunc('month', NOW())::date
                    "#,
                )
                .bind(org_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count.0)
    }

    /// Read-only usage check for one resource
    pub async fn resource_usage(
        &self,
        org_id: Uuid,
        kind: ResourceKind,
    ) -> BillingResult<ResourceUsage> {
        let limits = self.active_limits(org_id).await?;
        let current = self.current_count(org_id, kind).await?;
        Ok(ResourceUsage::evaluate(kind, current, limits.limit_for(kind)))
    }

    /// Usage for all resource kinds
    pub async fn all_usage(&self, org_id: Uuid) -> BillingResult<Vec<ResourceUsage>> {
        let limits = self.active_limits(org_id).await?;
        let mut usage = Vec::with_capacity(3);
        for kind in [
            ResourceKind::Restaurants,
            ResourceKind::Products,
            ResourceKind::ApiCalls,
        ] {
            let current = self.current_count(org_id, kind).await?;
            usage.push(ResourceUsage::evaluate(kind, current, limits.limit_for(kind)));
        }
        Ok(usage)
    }

    /// Limit check inside the caller's transaction.
    ///
    /// Locks the organization row so concurrent creations at the limit
    /// boundary serialize: the count and the subsequent INSERT commit
    /// atomically instead of two independent round trips both passing.
    pub async fn enforce_limit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        kind: ResourceKind,
    ) -> BillingResult<ResourceUsage> {
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE id = $1 FOR UPDATE")
                .bind(org_id)
                .fetch_optional(&mut **tx)
                .await?;

        if locked.is_none() {
            return Err(BillingError::NotFound(format!("organization {}", org_id)));
        }

        let limits: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT p.limit_restaurants, p.limit_products, p.limit_api_calls
            FROM subscriptions s
            JOIN plans p ON p.id = s.plan_id
            WHERE s.organization_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&mut **tx)
        .await?;

        let limits = match limits {
            Some((restaurants, products, api_calls)) => PlanLimits {
                restaurants,
                products,
                api_calls,
            },
            None => PlanTier::Free.limits(),
        };

        let current: (i64,) = match kind {
            ResourceKind::Restaurants => {
                sqlx::query_as("SELECT COUNT(*) FROM restaurants WHERE organization_id = $1")
                    .bind(org_id)
                    .fetch_one(&mut **tx)
                    .await?
            }
            ResourceKind::Products => {
                sqlx::query_as("SELECT COUNT(*) FROM products WHERE organization_id = $1")
                    .bind(org_id)
                    .fetch_one(&mut **tx)
                    .await?
            }
            ResourceKind::ApiCalls => {
                sqlx::query_as(
                    r#"
                    SELECT COALESCE(SUM(request_count), 0)::BIGINT
                    FROM api_usage
                    WHERE organization_id = $1
                      AND day >= date_trunc('month', NOW())::date
                    "#,
                )
                .bind(org_id)
                .fetch_one(&mut **tx)
                .await?
            }
        };

        let usage = ResourceUsage::evaluate(kind, current.0, limits.limit_for(kind));

        if !usage.allows_creation() {
            return Err(BillingError::LimitExceeded {
                resource: kind,
                current: usage.current,
                limit: usage.limit,
            });
        }

        Ok(usage)
    }

    /// Record a public API call against the monthly quota.
    ///
    /// Best-effort: failures are logged and swallowed so metering never
    /// breaks a read path.
    pub async fn record_api_call(&self, org_id: Uuid) {
        let result = sqlx::query(
            r#"
            INSERT INTO api_usage (id, organization_id, day, request_count)
            VALUES ($1, $2, CURRENT_DATE, 1)
            ON CONFLICT (organization_id, day)
            DO UPDATE SET request_count = api_usage.request_count + 1
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(org_id = %org_id, error = %e, "Failed to record API call usage");
        }
    }
}
