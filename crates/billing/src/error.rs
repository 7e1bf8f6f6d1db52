//! Billing error types

use thiserror::Error;
use tightship_shared::ResourceKind;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Invalid plan tier: {0}")]
    InvalidTier(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook event payload malformed: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Usage limit reached for {resource}: {current} of {limit}")]
    LimitExceeded {
        resource: ResourceKind,
        current: i64,
        limit: i64,
    },

    #[error("Subscription suspended after unpaid grace period")]
    SubscriptionSuspended,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No customer found for organization")]
    NoCustomer,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
