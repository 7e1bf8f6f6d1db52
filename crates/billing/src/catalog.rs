//! Plan catalog
//!
//! The catalog is seeded by migration and read-only at runtime; plans are
//! shared rows referenced by every subscription, never owned by one.

use sqlx::PgPool;
use uuid::Uuid;

use tightship_shared::{Plan, PlanTier};

use crate::error::{BillingError, BillingResult};

/// Read-side access to the seeded plan catalog
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All plans, cheapest first
    pub async fn all(&self) -> BillingResult<Vec<Plan>> {
        let plans: Vec<Plan> = sqlx::query_as(
            r#"
            SELECT id, tier, name, price_monthly_cents, price_yearly_cents,
                   features, limit_restaurants, limit_products, limit_api_calls, created_at
            FROM plans
            ORDER BY price_monthly_cents ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    /// Look up the plan for a tier
    pub async fn plan_for_tier(&self, tier: PlanTier) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, tier, name, price_monthly_cents, price_yearly_cents,
                   features, limit_restaurants, limit_products, limit_api_calls, created_at
            FROM plans
            WHERE tier = $1
            "#,
        )
        .bind(tier)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::InvalidTier(tier.to_string()))
    }

    /// Look up a plan by its ID
    pub async fn plan_by_id(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, tier, name, price_monthly_cents, price_yearly_cents,
                   features, limit_restaurants, limit_products, limit_api_calls, created_at
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", plan_id)))
    }
}

#[cfg(test)]
mod tests {
    use tightship_shared::{PlanFeature, PlanLimits, ResourceKind};

    #[test]
    fn test_seeded_tiers_cover_enum() {
        // The migration seeds one row per tier; the enum is the contract
        let tiers = [
            tightship_shared::PlanTier::Free,
            tightship_shared::PlanTier::Starter,
            tightship_shared::PlanTier::Professional,
            tightship_shared::PlanTier::Enterprise,
        ];
        for tier in tiers {
            // Every tier has a defined limits bundle
            let limits = tier.limits();
            assert!(limits.restaurants >= -1);
            assert!(limits.products >= -1);
            assert!(limits.api_calls >= -1);
        }
    }

    #[test]
    fn test_limits_bundle_matches_tier_accessors() {
        let tier = tightship_shared::PlanTier::Professional;
        let limits: PlanLimits = tier.limits();
        assert_eq!(
            limits.limit_for(ResourceKind::Products),
            tier.max_products()
        );
        assert_eq!(
            limits.limit_for(ResourceKind::ApiCalls),
            tier.monthly_api_calls()
        );
    }

    #[test]
    fn test_feature_parse() {
        assert_eq!(
            "pos_sync".parse::<PlanFeature>().unwrap(),
            PlanFeature::PosSync
        );
        assert!("hologram_menus".parse::<PlanFeature>().is_err());
    }
}
