//! Billing Events Module
//!
//! Provides append-only billing event logging for audit trails and debugging.
//! Events capture all billing operations and can be used to:
//! - Answer "why is this organization on this plan?" questions
//! - Reconstruct billing history
//! - Compliance and audit requirements

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Subscription lifecycle
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    PlanChanged,

    // Checkout
    CheckoutCompleted,

    // Invoicing
    InvoicePaid,
    InvoiceFailed,

    // Dunning
    PaymentRecovered,
    GracePeriodStarted,
    ServiceSuspended,

    // Customer lifecycle
    CustomerCreated,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::SubscriptionUpdated => "SUBSCRIPTION_UPDATED",
            BillingEventType::SubscriptionCancelled => "SUBSCRIPTION_CANCELLED",
            BillingEventType::PlanChanged => "PLAN_CHANGED",
            BillingEventType::CheckoutCompleted => "CHECKOUT_COMPLETED",
            BillingEventType::InvoicePaid => "INVOICE_PAID",
            BillingEventType::InvoiceFailed => "INVOICE_FAILED",
            BillingEventType::PaymentRecovered => "PAYMENT_RECOVERED",
            BillingEventType::GracePeriodStarted => "GRACE_PERIOD_STARTED",
            BillingEventType::ServiceSuspended => "SERVICE_SUSPENDED",
            BillingEventType::CustomerCreated => "CUSTOMER_CREATED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// End user through UI
    User,
    /// System automation
    System,
    /// Stripe webhook
    Stripe,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::System => write!(f, "system"),
            ActorType::Stripe => write!(f, "stripe"),
        }
    }
}

/// A billing event record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub actor_type: String,
    pub created_at: OffsetDateTime,
}

/// Builder for creating billing events
pub struct BillingEventBuilder {
    organization_id: Uuid,
    event_type: BillingEventType,
    event_data: serde_json::Value,
    provider_event_id: Option<String>,
    provider_subscription_id: Option<String>,
    provider_customer_id: Option<String>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    /// Create a new event builder
    pub fn new(organization_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            organization_id,
            event_type,
            event_data: serde_json::json!({}),
            provider_event_id: None,
            provider_subscription_id: None,
            provider_customer_id: None,
            actor_type: ActorType::System,
        }
    }

    /// Set the event data
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    /// Set the provider event ID
    pub fn provider_event(mut self, event_id: impl Into<String>) -> Self {
        self.provider_event_id = Some(event_id.into());
        self
    }

    /// Set the provider subscription ID
    pub fn provider_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.provider_subscription_id = Some(subscription_id.into());
        self
    }

    /// Set the provider customer ID
    pub fn provider_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.provider_customer_id = Some(customer_id.into());
        self
    }

    /// Set the actor type
    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

/// Service for logging and querying billing events
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Log a billing event
    pub async fn log_event(&self, builder: BillingEventBuilder) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                organization_id,
                event_type,
                event_data,
                provider_event_id,
                provider_subscription_id,
                provider_customer_id,
                actor_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(builder.organization_id)
        .bind(builder.event_type.to_string())
        .bind(&builder.event_data)
        .bind(&builder.provider_event_id)
        .bind(&builder.provider_subscription_id)
        .bind(&builder.provider_customer_id)
        .bind(builder.actor_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(event_id.0)
    }

    /// Get recent events for an organization
    pub async fn get_events_for_org(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, organization_id, event_type, event_data,
                   provider_event_id, provider_subscription_id, provider_customer_id,
                   actor_type, created_at
            FROM billing_events
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Get events related to a specific provider subscription
    pub async fn get_events_for_subscription(
        &self,
        provider_subscription_id: &str,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, organization_id, event_type, event_data,
                   provider_event_id, provider_subscription_id, provider_customer_id,
                   actor_type, created_at
            FROM billing_events
            WHERE provider_subscription_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(provider_subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_event_type_display() {
        assert_eq!(
            BillingEventType::SubscriptionCreated.to_string(),
            "SUBSCRIPTION_CREATED"
        );
        assert_eq!(BillingEventType::PlanChanged.to_string(), "PLAN_CHANGED");
        assert_eq!(
            BillingEventType::GracePeriodStarted.to_string(),
            "GRACE_PERIOD_STARTED"
        );
    }

    #[test]
    fn test_actor_type_display() {
        assert_eq!(ActorType::User.to_string(), "user");
        assert_eq!(ActorType::System.to_string(), "system");
        assert_eq!(ActorType::Stripe.to_string(), "stripe");
    }

    #[test]
    fn test_event_builder() {
        let org_id = Uuid::new_v4();
        let builder = BillingEventBuilder::new(org_id, BillingEventType::PlanChanged)
            .data(serde_json::json!({"test": true}))
            .provider_subscription("sub_123")
            .actor_type(ActorType::Stripe);

        assert_eq!(builder.organization_id, org_id);
        assert_eq!(builder.event_type, BillingEventType::PlanChanged);
        assert_eq!(
            builder.provider_subscription_id,
            Some("sub_123".to_string())
        );
        assert_eq!(builder.actor_type, ActorType::Stripe);
    }
}
