//! Stripe Checkout sessions

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CustomerId,
};
use uuid::Uuid;

use tightship_shared::PlanTier;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Billing interval for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(Self::Monthly),
            "yearly" | "annual" | "year" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Verify that a Stripe customer ID belongs to the given organization
    /// This protects against mismatched org_id/customer_id pairs being passed
    /// to checkout functions
    async fn verify_customer_ownership(
        &self,
        org_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<()> {
        let verified: Option<(String,)> = sqlx::query_as(
            "SELECT billing_customer_id FROM organizations WHERE id = $1 AND billing_customer_id = $2",
        )
        .bind(org_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        if verified.is_none() {
            tracing::warn!(
                org_id = %org_id,
                customer_id = %customer_id,
                "Customer ID ownership verification failed"
            );
            return Err(BillingError::Unauthorized(
                "Customer ID does not belong to this organization".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a checkout session for a new subscription (monthly billing)
    pub async fn create_subscription_checkout(
        &self,
        org_id: Uuid,
        customer_id: &str,
        tier: PlanTier,
    ) -> BillingResult<CheckoutSession> {
        self.create_subscription_checkout_with_interval(
            org_id,
            customer_id,
            tier,
            BillingInterval::Monthly,
        )
        .await
    }

    /// Create a checkout session for a new subscription with specified billing interval
    pub async fn create_subscription_checkout_with_interval(
        &self,
        org_id: Uuid,
        customer_id: &str,
        tier: PlanTier,
        billing_interval: BillingInterval,
    ) -> BillingResult<CheckoutSession> {
        self.verify_customer_ownership(org_id, customer_id).await?;

        // The free tier has no price; there is nothing to check out
        let price_id = match billing_interval {
            BillingInterval::Monthly => self
                .stripe
                .config()
                .price_id_for_tier(tier)
                .ok_or_else(|| BillingError::InvalidTier(tier.to_string()))?,
            BillingInterval::Yearly => self
                .stripe
                .config()
                .yearly_price_id_for_tier(tier)
                .ok_or_else(|| {
                    BillingError::InvalidTier(format!("{} (yearly pricing not configured)", tier))
                })?,
        };

        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let base_url = &self.stripe.config().app_base_url;
        let success_url = format!(
            "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
            base_url
        );
        let cancel_url = format!("{}/billing/cancel", base_url);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("org_id".to_string(), org_id.to_string());
        metadata.insert("tier".to_string(), tier.to_string());
        metadata.insert(
            "billing_interval".to_string(),
            billing_interval.as_str().to_string(),
        );

        let line_items = vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }];

        let params = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(line_items),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            allow_promotion_codes: Some(true),
            billing_address_collection: Some(stripe::CheckoutSessionBillingAddressCollection::Auto),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            org_id = %org_id,
            session_id = %session.id,
            tier = %tier,
            billing_interval = ?billing_interval,
            "Created checkout session"
        );

        Ok(session)
    }

    /// Retrieve a checkout session by ID
    pub async fn get_session(&self, session_id: &str) -> BillingResult<CheckoutSession> {
        let session_id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid session ID: {}", e)))?;

        let session = CheckoutSession::retrieve(self.stripe.inner(), &session_id, &[]).await?;
        Ok(session)
    }
}

/// Response for creating a checkout session
#[derive(Debug, serde::Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            url: session.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_interval_from_str() {
        assert_eq!(
            BillingInterval::from_str("monthly"),
            Some(BillingInterval::Monthly)
        );
        assert_eq!(
            BillingInterval::from_str("YEARLY"),
            Some(BillingInterval::Yearly)
        );
        assert_eq!(
            BillingInterval::from_str("annual"),
            Some(BillingInterval::Yearly)
        );
        assert_eq!(BillingInterval::from_str("weekly"), None);
    }

    #[test]
    fn test_billing_interval_default() {
        assert_eq!(BillingInterval::default(), BillingInterval::Monthly);
    }
}
