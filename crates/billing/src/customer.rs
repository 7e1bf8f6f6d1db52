//! Stripe customer management

use sqlx::PgPool;
use stripe::{CreateCustomer, Customer, CustomerId};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};

/// Customer service for managing Stripe customers
pub struct CustomerService {
    stripe: StripeClient,
    pool: PgPool,
    event_logger: BillingEventLogger,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            stripe,
            event_logger: BillingEventLogger::new(pool.clone()),
            pool,
        }
    }

    /// Create or get a Stripe customer for an organization
    pub async fn get_or_create_customer(
        &self,
        org_id: Uuid,
        email: &str,
        name: &str,
    ) -> BillingResult<Customer> {
        // Check if org already has a billing customer ID
        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT billing_customer_id FROM organizations WHERE id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((Some(customer_id),)) = existing {
            // Retrieve existing customer
            let customer_id = customer_id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

            let customer = Customer::retrieve(self.stripe.inner(), &customer_id, &[]).await?;

            return Ok(customer);
        }

        // Create new customer
        let customer = self.create_customer(org_id, email, name).await?;
        Ok(customer)
    }

    /// Create a new Stripe customer
    pub async fn create_customer(
        &self,
        org_id: Uuid,
        email: &str,
        name: &str,
    ) -> BillingResult<Customer> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("org_id".to_string(), org_id.to_string());
        metadata.insert("platform".to_string(), "tightship".to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: Some(name),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        // Store customer ID and contact email in database
        sqlx::query(
            r#"
            UPDATE organizations
            SET billing_customer_id = $1, contact_email = COALESCE(contact_email, $2), updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(customer.id.as_str())
        .bind(email)
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::CustomerCreated)
                    .provider_customer(customer.id.as_str())
                    .actor_type(ActorType::System),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log customer created event");
        }

        tracing::info!(
            org_id = %org_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    /// Get the Stripe customer ID for an organization
    pub async fn get_customer_id(&self, org_id: Uuid) -> BillingResult<CustomerId> {
        let result: Option<(Option<String>,)> =
            sqlx::query_as("SELECT billing_customer_id FROM organizations WHERE id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        match result {
            Some((Some(id),)) => id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e))),
            _ => Err(BillingError::CustomerNotFound(org_id.to_string())),
        }
    }

    /// Check if an organization has a Stripe customer
    pub async fn has_customer(&self, org_id: Uuid) -> BillingResult<bool> {
        let result: Option<(Option<String>,)> =
            sqlx::query_as("SELECT billing_customer_id FROM organizations WHERE id = $1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(matches!(result, Some((Some(_),))))
    }
}
