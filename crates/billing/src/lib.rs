// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tightship Billing Module
//!
//! Handles Stripe integration for subscriptions, usage limits, and dunning.
//!
//! ## Features
//!
//! - **Plan Catalog**: Free → Starter → Professional → Enterprise tiers with
//!   usage limits (`-1` = unlimited)
//! - **Subscription Lifecycle**: default free subscription at signup, synced
//!   from provider webhooks, soft cancellation
//! - **Usage Accounting**: live per-tenant counts gated against plan limits,
//!   with a transactional check for resource creation
//! - **Dunning**: payment-failure tracking, grace countdown, warning levels
//! - **Email Notifications**: payment failed/recovered, cancellation, grace
//!   period expiry
//! - **Webhooks**: signature-verified, idempotent Stripe event ingestion

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod customer;
pub mod dunning;
pub mod email;
pub mod error;
pub mod events;
pub mod portal;
pub mod subscriptions;
pub mod usage;
pub mod webhooks;

// Catalog
pub use catalog::PlanCatalog;

// Checkout
pub use checkout::{BillingInterval, CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Dunning
pub use dunning::{
    derive_warning_level, DunningConfig, DunningService, SubscriptionWarning, WarningKind,
    WarningLevel,
};

// Email
pub use email::{BillingEmailService, EmailConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    ActorType, BillingEvent, BillingEventBuilder, BillingEventLogger, BillingEventType,
};

// Portal
pub use portal::{PortalResponse, PortalService};

// Subscriptions
pub use subscriptions::{
    map_provider_status, should_apply_event, SubscriptionService, SubscriptionSync,
};

// Usage
pub use usage::{ResourceUsage, UsageService};

// Webhooks
pub use webhooks::{ProviderEvent, WebhookEnvelope, WebhookHandler};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub dunning: DunningService,
    pub email: BillingEmailService,
    pub portal: PortalService,
    pub subscriptions: SubscriptionService,
    pub usage: UsageService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_clients(
            stripe,
            BillingEmailService::from_env(),
            DunningConfig::from_env(),
            pool,
        ))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_clients(
            StripeClient::new(config),
            BillingEmailService::from_env(),
            DunningConfig::from_env(),
            pool,
        )
    }

    /// Create a new billing service from explicitly constructed clients.
    ///
    /// Every component receives its dependencies here; nothing reaches for
    /// shared client instances through import side effects.
    pub fn with_clients(
        stripe: StripeClient,
        email: BillingEmailService,
        dunning_config: DunningConfig,
        pool: PgPool,
    ) -> Self {
        Self {
            catalog: PlanCatalog::new(pool.clone()),
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            customer: CustomerService::new(stripe.clone(), pool.clone()),
            dunning: DunningService::new(pool.clone(), dunning_config, email.clone()),
            email: email.clone(),
            portal: PortalService::new(stripe.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            usage: UsageService::new(pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool, email),
        }
    }
}
