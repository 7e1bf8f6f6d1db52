//! Stripe client configuration

use stripe::Client;
use tightship_shared::PlanTier;

use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each plan tier
    pub price_ids: PriceIds,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

/// Stripe price IDs for plan tiers
/// Tier hierarchy: Free (no price) → Starter → Professional → Enterprise
#[derive(Debug, Clone)]
pub struct PriceIds {
    // Monthly prices
    pub starter: String,
    pub professional: String,
    pub enterprise: String,

    // Yearly prices (discounted)
    pub starter_yearly: Option<String>,
    pub professional_yearly: Option<String>,
    pub enterprise_yearly: Option<String>,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                starter: std::env::var("STRIPE_PRICE_STARTER")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_STARTER not set".to_string()))?,
                professional: std::env::var("STRIPE_PRICE_PROFESSIONAL").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_PROFESSIONAL not set".to_string())
                })?,
                enterprise: std::env::var("STRIPE_PRICE_ENTERPRISE").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_ENTERPRISE not set".to_string())
                })?,

                starter_yearly: std::env::var("STRIPE_PRICE_STARTER_YEARLY").ok(),
                professional_yearly: std::env::var("STRIPE_PRICE_PROFESSIONAL_YEARLY").ok(),
                enterprise_yearly: std::env::var("STRIPE_PRICE_ENTERPRISE_YEARLY").ok(),
            },
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Get price ID for a tier (monthly billing)
    pub fn price_id_for_tier(&self, tier: PlanTier) -> Option<&str> {
        match tier {
            PlanTier::Free => None,
            PlanTier::Starter => Some(&self.price_ids.starter),
            PlanTier::Professional => Some(&self.price_ids.professional),
            PlanTier::Enterprise => Some(&self.price_ids.enterprise),
        }
    }

    /// Get price ID for a tier (yearly billing)
    pub fn yearly_price_id_for_tier(&self, tier: PlanTier) -> Option<&str> {
        match tier {
            PlanTier::Free => None,
            PlanTier::Starter => self.price_ids.starter_yearly.as_deref(),
            PlanTier::Professional => self.price_ids.professional_yearly.as_deref(),
            PlanTier::Enterprise => self.price_ids.enterprise_yearly.as_deref(),
        }
    }

    /// Reverse-lookup a tier from a price ID (monthly and yearly prices)
    pub fn tier_for_price_id(&self, price_id: &str) -> Option<PlanTier> {
        if price_id == self.price_ids.starter {
            Some(PlanTier::Starter)
        } else if price_id == self.price_ids.professional {
            Some(PlanTier::Professional)
        } else if price_id == self.price_ids.enterprise {
            Some(PlanTier::Enterprise)
        } else if self.price_ids.starter_yearly.as_deref() == Some(price_id) {
            Some(PlanTier::Starter)
        } else if self.price_ids.professional_yearly.as_deref() == Some(price_id) {
            Some(PlanTier::Professional)
        } else if self.price_ids.enterprise_yearly.as_deref() == Some(price_id) {
            Some(PlanTier::Enterprise)
        } else {
            None
        }
    }

    /// Check if a price ID is for yearly billing
    pub fn is_yearly_price(&self, price_id: &str) -> bool {
        self.price_ids.starter_yearly.as_deref() == Some(price_id)
            || self.price_ids.professional_yearly.as_deref() == Some(price_id)
            || self.price_ids.enterprise_yearly.as_deref() == Some(price_id)
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                starter: "price_starter_m".to_string(),
                professional: "price_professional_m".to_string(),
                enterprise: "price_enterprise_m".to_string(),
                starter_yearly: Some("price_starter_y".to_string()),
                professional_yearly: Some("price_professional_y".to_string()),
                enterprise_yearly: None,
            },
            app_base_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn test_price_id_for_tier() {
        let config = test_config();
        assert_eq!(config.price_id_for_tier(PlanTier::Free), None);
        assert_eq!(
            config.price_id_for_tier(PlanTier::Starter),
            Some("price_starter_m")
        );
        assert_eq!(
            config.yearly_price_id_for_tier(PlanTier::Professional),
            Some("price_professional_y")
        );
        assert_eq!(config.yearly_price_id_for_tier(PlanTier::Enterprise), None);
    }

    #[test]
    fn test_tier_for_price_id() {
        let config = test_config();
        assert_eq!(
            config.tier_for_price_id("price_professional_m"),
            Some(PlanTier::Professional)
        );
        assert_eq!(
            config.tier_for_price_id("price_starter_y"),
            Some(PlanTier::Starter)
        );
        assert_eq!(config.tier_for_price_id("price_unknown"), None);
    }

    #[test]
    fn test_is_yearly_price() {
        let config = test_config();
        assert!(config.is_yearly_price("price_starter_y"));
        assert!(!config.is_yearly_price("price_starter_m"));
    }
}
