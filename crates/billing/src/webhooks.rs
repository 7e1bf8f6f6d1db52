//! Stripe webhook handling
//!
//! Verifies webhook signatures, claims an idempotency ledger row per event,
//! and applies subscription/invoice events to local state. Events are parsed
//! into a closed enum so each provider event kind has an explicit handler arm;
//! unrecognized kinds are accepted and ignored for forward compatibility.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::dunning::DunningService;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::subscriptions::{SubscriptionService, SubscriptionSync};

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Events stuck in "processing" longer than this can be re-claimed
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

// =============================================================================
// Event envelope and payloads
// =============================================================================

/// Outer webhook event shape shared by all provider events
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEnvelope {
    /// Provider-side creation time of the event, used for ordering guards
    pub fn event_timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Checkout session object as delivered in `checkout.session.completed`
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionPayload {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Subscription object as delivered in `customer.subscription.*`
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPayload {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub items: Option<SubscriptionItemList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

impl SubscriptionPayload {
    /// First line item's price ID, used to reverse-lookup the plan
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }

    fn period_bound(ts: Option<i64>) -> Option<OffsetDateTime> {
        ts.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
    }

    /// Convert into the sync payload applied to the local record
    pub fn to_sync(&self) -> SubscriptionSync {
        SubscriptionSync {
            billing_subscription_id: self.id.clone(),
            billing_customer_id: Some(self.customer.clone()),
            provider_status: self.status.clone(),
            price_id: self.price_id().map(|s| s.to_string()),
            current_period_start: Self::period_bound(self.current_period_start),
            current_period_end: Self::period_bound(self.current_period_end),
            cancel_at_period_end: self.cancel_at_period_end,
        }
    }
}

/// Invoice object as delivered in `invoice.payment_*`
#[derive(Debug, Clone, Deserialize)]
pub struct InvoicePayload {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub attempt_count: i64,
    pub hosted_invoice_url: Option<String>,
}

/// Closed set of provider events this system reacts to.
///
/// New provider event kinds land in `Unrecognized` and are accepted without
/// processing; promoting one to a handled kind requires an explicit variant
/// and an explicit match arm.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    CheckoutSessionCompleted(CheckoutSessionPayload),
    SubscriptionCreated(SubscriptionPayload),
    SubscriptionUpdated(SubscriptionPayload),
    SubscriptionDeleted(SubscriptionPayload),
    InvoicePaymentSucceeded(InvoicePayload),
    InvoicePaymentFailed(InvoicePayload),
    Unrecognized { event_type: String },
}

impl ProviderEvent {
    /// Parse the envelope's object into the typed event for its kind
    pub fn parse(envelope: &WebhookEnvelope) -> BillingResult<Self> {
        fn object<T: serde::de::DeserializeOwned>(
            envelope: &WebhookEnvelope,
        ) -> BillingResult<T> {
            serde_json::from_value(envelope.data.object.clone()).map_err(|e| {
                BillingError::WebhookPayloadInvalid(format!(
                    "{}: {}",
                    envelope.event_type, e
                ))
            })
        }

        Ok(match envelope.event_type.as_str() {
            "checkout.session.completed" => Self::CheckoutSessionCompleted(object(envelope)?),
            "customer.subscription.created" => Self::SubscriptionCreated(object(envelope)?),
            "customer.subscription.updated" => Self::SubscriptionUpdated(object(envelope)?),
            "customer.subscription.deleted" => Self::SubscriptionDeleted(object(envelope)?),
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded(object(envelope)?),
            "invoice.payment_failed" => Self::InvoicePaymentFailed(object(envelope)?),
            other => Self::Unrecognized {
                event_type: other.to_string(),
            },
        })
    }
}

// =============================================================================
// Signature verification
// =============================================================================

/// Verify a `Stripe-Signature` header against the shared webhook secret.
///
/// The header carries `t=<unix>,v1=<hex hmac>`; the signed payload is
/// `"{t}.{body}"`. Verification failure is terminal for the request: the
/// event is rejected and never processed.
pub fn verify_signature_at(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now_unix,
            diff = (now_unix - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret starts with "whsec_"
    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

// =============================================================================
// Webhook handler
// =============================================================================

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    email: BillingEmailService,
    event_logger: BillingEventLogger,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool, email: BillingEmailService) -> Self {
        let event_logger = BillingEventLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            email,
            event_logger,
        }
    }

    fn subscriptions(&self) -> SubscriptionService {
        SubscriptionService::new(self.stripe.clone(), self.pool.clone())
    }

    fn dunning(&self) -> DunningService {
        DunningService::new(
            self.pool.clone(),
            crate::dunning::DunningConfig::from_env(),
            self.email.clone(),
        )
    }

    /// Verify the signature and parse the event envelope.
    ///
    /// On any verification failure the request is rejected outright; no
    /// processing is attempted and no state is mutated.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEnvelope> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature_at(
            payload,
            signature,
            &self.stripe.config().webhook_secret,
            now,
        )?;

        let envelope: WebhookEnvelope = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookPayloadInvalid(e.to_string())
        })?;

        tracing::info!(
            event_type = %envelope.event_type,
            event_id = %envelope.id,
            "Webhook event verified"
        );

        Ok(envelope)
    }

    /// Handle a verified event.
    ///
    /// Implements atomic idempotency: an `INSERT ... ON CONFLICT ...
    /// RETURNING` on the processed-event ledger claims exclusive processing
    /// rights for the event ID. Duplicate deliveries (provider retries,
    /// redeliveries) short-circuit before any side effect runs, so replays
    /// recompute nothing and send no duplicate emails. Events stuck in
    /// "processing" past a timeout can be re-claimed.
    pub async fn handle_event(&self, envelope: WebhookEnvelope) -> BillingResult<()> {
        let event_id = envelope.id.clone();
        let event_type = envelope.event_type.clone();
        let event_timestamp = envelope.event_timestamp();

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO provider_webhook_events
                (provider_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (provider_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Recovered from stuck state at ', NOW()::TEXT)
            WHERE provider_webhook_events.processing_result = 'processing'
              AND provider_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Duplicate webhook event, skipping (atomic idempotency check)"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event_type,
            event_id = %event_id,
            "Processing webhook event (claimed exclusive processing rights)"
        );

        let result = self.process_event(&envelope).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE provider_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE provider_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to update webhook ledger record; event may appear stuck in 'processing'"
            );
        }

        result
    }

    /// Dispatch one event to its handler. Exhaustive over the closed enum.
    async fn process_event(&self, envelope: &WebhookEnvelope) -> BillingResult<()> {
        let event_ts = envelope.event_timestamp();

        match ProviderEvent::parse(envelope)? {
            ProviderEvent::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(&envelope.id, session, event_ts)
                    .await
            }
            ProviderEvent::SubscriptionCreated(subscription) => {
                self.handle_subscription_synced(
                    &envelope.id,
                    subscription,
                    event_ts,
                    BillingEventType::SubscriptionCreated,
                )
                .await
            }
            ProviderEvent::SubscriptionUpdated(subscription) => {
                self.handle_subscription_synced(
                    &envelope.id,
                    subscription,
                    event_ts,
                    BillingEventType::SubscriptionUpdated,
                )
                .await
            }
            ProviderEvent::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(&envelope.id, subscription, event_ts)
                    .await
            }
            ProviderEvent::InvoicePaymentSucceeded(invoice) => {
                self.handle_invoice_payment_succeeded(&envelope.id, invoice)
                    .await
            }
            ProviderEvent::InvoicePaymentFailed(invoice) => {
                self.handle_invoice_payment_failed(&envelope.id, invoice)
                    .await
            }
            ProviderEvent::Unrecognized { event_type } => {
                // Accepted and ignored: new provider events must not fail
                // delivery, only get logged until a handler arm exists
                tracing::info!(
                    event_type = %event_type,
                    event_id = %envelope.id,
                    "Received unhandled provider event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    /// Resolve the organization for a subscription-shaped payload:
    /// checkout metadata carries the org ID; otherwise the customer binding
    /// is authoritative.
    async fn org_id_for_subscription_payload(
        &self,
        payload: &SubscriptionPayload,
    ) -> BillingResult<Uuid> {
        if let Some(org_id) = payload
            .metadata
            .get("org_id")
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            return Ok(org_id);
        }
        self.subscriptions()
            .org_id_for_customer(&payload.customer)
            .await
    }

    async fn handle_checkout_completed(
        &self,
        event_id: &str,
        session: CheckoutSessionPayload,
        event_ts: OffsetDateTime,
    ) -> BillingResult<()> {
        let org_id = session
            .metadata
            .get("org_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| {
                BillingError::WebhookPayloadInvalid(
                    "checkout session has no org_id metadata".to_string(),
                )
            })?;

        let (customer_id, subscription_id) = match (&session.customer, &session.subscription) {
            (Some(c), Some(s)) => (c.clone(), s.clone()),
            _ => {
                tracing::warn!(
                    org_id = %org_id,
                    session_id = %session.id,
                    "Checkout completed without customer/subscription, nothing to bind"
                );
                return Ok(());
            }
        };

        self.subscriptions()
            .bind_checkout(org_id, &customer_id, &subscription_id, event_ts)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::CheckoutCompleted)
                    .data(serde_json::json!({
                        "session_id": session.id,
                        "tier": session.metadata.get("tier"),
                    }))
                    .provider_event(event_id)
                    .provider_subscription(&subscription_id)
                    .provider_customer(&customer_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log checkout completed event");
        }

        tracing::info!(
            org_id = %org_id,
            session_id = %session.id,
            subscription_id = %subscription_id,
            "Checkout completed, subscription bound and active"
        );

        Ok(())
    }

    async fn handle_subscription_synced(
        &self,
        event_id: &str,
        payload: SubscriptionPayload,
        event_ts: OffsetDateTime,
        audit_type: BillingEventType,
    ) -> BillingResult<()> {
        let org_id = self.org_id_for_subscription_payload(&payload).await?;

        self.subscriptions()
            .sync_from_provider(org_id, &payload.to_sync(), event_ts)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, audit_type)
                    .data(serde_json::json!({
                        "status": payload.status,
                        "cancel_at_period_end": payload.cancel_at_period_end,
                        "price_id": payload.price_id(),
                    }))
                    .provider_event(event_id)
                    .provider_subscription(&payload.id)
                    .provider_customer(&payload.customer)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription sync event");
        }

        if payload.status == "past_due" {
            tracing::warn!(
                org_id = %org_id,
                subscription_id = %payload.id,
                "Subscription is past due"
            );
        }

        Ok(())
    }

    async fn handle_subscription_deleted(
        &self,
        event_id: &str,
        payload: SubscriptionPayload,
        event_ts: OffsetDateTime,
    ) -> BillingResult<()> {
        let subscriptions = self.subscriptions();
        let org_id = subscriptions
            .cancel_from_provider(&payload.id, event_ts)
            .await?;

        // The paid plan ends with the subscription; data stays
        subscriptions.downgrade_to_free(org_id).await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::SubscriptionCancelled)
                    .data(serde_json::json!({
                        "previous_status": payload.status,
                        "period_end": payload.current_period_end,
                    }))
                    .provider_event(event_id)
                    .provider_subscription(&payload.id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log subscription cancelled event");
        }

        // Cancellation confirmation email
        if let Ok(Some((email, org_name))) = self.get_org_contact(org_id).await {
            let end_date = payload
                .current_period_end
                .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
                .map(|dt| dt.date().to_string())
                .unwrap_or_else(|| "soon".to_string());
            if let Err(e) = self
                .email
                .send_subscription_cancelled(&email, &org_name, &end_date)
                .await
            {
                tracing::error!(error = %e, "Failed to send cancellation email");
            }
        }

        tracing::info!(
            org_id = %org_id,
            subscription_id = %payload.id,
            "Subscription cancelled, downgraded to free plan"
        );

        Ok(())
    }

    async fn handle_invoice_payment_succeeded(
        &self,
        event_id: &str,
        invoice: InvoicePayload,
    ) -> BillingResult<()> {
        let customer_id = invoice.customer.clone().ok_or_else(|| {
            BillingError::WebhookPayloadInvalid("invoice has no customer".to_string())
        })?;
        let org_id = self
            .subscriptions()
            .org_id_for_customer(&customer_id)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::InvoicePaid)
                    .data(serde_json::json!({
                        "amount_paid_cents": invoice.amount_paid,
                        "attempt_count": invoice.attempt_count,
                    }))
                    .provider_event(event_id)
                    .provider_customer(&customer_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log invoice paid event");
        }

        // A first-attempt success is a routine renewal. Payment after a
        // failed attempt is a recovery and clears the grace countdown.
        if invoice.attempt_count > 1 {
            self.dunning().payment_recovered(org_id).await?;
        } else {
            tracing::info!(
                org_id = %org_id,
                invoice_id = %invoice.id,
                amount = invoice.amount_paid,
                "Invoice paid"
            );
        }

        Ok(())
    }

    async fn handle_invoice_payment_failed(
        &self,
        event_id: &str,
        invoice: InvoicePayload,
    ) -> BillingResult<()> {
        let customer_id = invoice.customer.clone().ok_or_else(|| {
            BillingError::WebhookPayloadInvalid("invoice has no customer".to_string())
        })?;
        let org_id = self
            .subscriptions()
            .org_id_for_customer(&customer_id)
            .await?;

        if let Err(e) = self
            .event_logger
            .log_event(
                BillingEventBuilder::new(org_id, BillingEventType::InvoiceFailed)
                    .data(serde_json::json!({
                        "amount_due_cents": invoice.amount_due,
                        "attempt_count": invoice.attempt_count,
                    }))
                    .provider_event(event_id)
                    .provider_customer(&customer_id)
                    .actor_type(ActorType::Stripe),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to log invoice payment failed event");
        }

        tracing::warn!(
            org_id = %org_id,
            invoice_id = %invoice.id,
            amount = invoice.amount_due,
            attempt_count = invoice.attempt_count,
            "Invoice payment failed"
        );

        self.dunning()
            .payment_failed(
                org_id,
                invoice.attempt_count as i32,
                invoice.amount_due,
                invoice.hosted_invoice_url.as_deref(),
            )
            .await
    }

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

    fn envelope(event_type: &str, object: serde_json::Value) -> WebhookEnvelope {
        WebhookEnvelope {
            id: "evt_test_1".to_string(),
            event_type: event_type.to_string(),
            created: 1_700_000_000,
            data: EventData { object },
        }
    }

    #[test]
    fn test_parse_checkout_session_completed() {
        let env = envelope(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_test_123",
                "customer": "cus_123",
                "subscription": "sub_123",
                "metadata": {"org_id": "8b2e1a94-4a3e-4b2a-9df0-1f1c3b1de111", "tier": "professional"}
            }),
        );

        match ProviderEvent::parse(&env).unwrap() {
            ProviderEvent::CheckoutSessionCompleted(session) => {
                assert_eq!(session.id, "cs_test_123");
                assert_eq!(session.customer.as_deref(), Some("cus_123"));
                assert_eq!(session.subscription.as_deref(), Some("sub_123"));
                assert_eq!(
                    session.metadata.get("tier").map(|s| s.as_str()),
                    Some("professional")
                );
            }
            other => panic!("Expected CheckoutSessionCompleted, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscription_updated() {
        let env = envelope(
            "customer.subscription.updated",
            serde_json::json!({
                "id": "sub_123",
                "customer": "cus_123",
                "status": "active",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "cancel_at_period_end": false,
                "items": {"data": [{"price": {"id": "price_professional_m"}}]}
            }),
        );

        match ProviderEvent::parse(&env).unwrap() {
            ProviderEvent::SubscriptionUpdated(sub) => {
                assert_eq!(sub.status, "active");
                assert_eq!(sub.price_id(), Some("price_professional_m"));
                let sync = sub.to_sync();
                assert_eq!(sync.billing_subscription_id, "sub_123");
                assert!(sync.current_period_end.is_some());
            }
            other => panic!("Expected SubscriptionUpdated, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscription_deleted_minimal_payload() {
        // Deletion payloads may omit items/periods
        let env = envelope(
            "customer.subscription.deleted",
            serde_json::json!({
                "id": "sub_123",
                "customer": "cus_123",
                "status": "canceled"
            }),
        );

        match ProviderEvent::parse(&env).unwrap() {
            ProviderEvent::SubscriptionDeleted(sub) => {
                assert_eq!(sub.status, "canceled");
                assert_eq!(sub.price_id(), None);
            }
            other => panic!("Expected SubscriptionDeleted, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_invoice_payment_failed() {
        let env = envelope(
            "invoice.payment_failed",
            serde_json::json!({
                "id": "in_123",
                "customer": "cus_123",
                "subscription": "sub_123",
                "amount_due": 7900,
                "attempt_count": 2,
                "hosted_invoice_url": "https://invoice.stripe.com/i/in_123"
            }),
        );

        match ProviderEvent::parse(&env).unwrap() {
            ProviderEvent::InvoicePaymentFailed(invoice) => {
                assert_eq!(invoice.amount_due, 7900);
                assert_eq!(invoice.attempt_count, 2);
                assert!(invoice.hosted_invoice_url.is_some());
            }
            other => panic!("Expected InvoicePaymentFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unrecognized_event_accepted() {
        let env = envelope("customer.tax_id.created", serde_json::json!({"id": "txi_1"}));
        match ProviderEvent::parse(&env).unwrap() {
            ProviderEvent::Unrecognized { event_type } => {
                assert_eq!(event_type, "customer.tax_id.created");
            }
            other => panic!("Expected Unrecognized, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_payload_is_error() {
        // Known event type but object missing required fields
        let env = envelope(
            "customer.subscription.updated",
            serde_json::json!({"id": "sub_123"}),
        );
        assert!(matches!(
            ProviderEvent::parse(&env),
            Err(BillingError::WebhookPayloadInvalid(_))
        ));
    }

    // =========================================================================
    // Signature verification
    // =========================================================================

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn test_verify_signature_valid() {
        let secret = "whsec_test_secret";
        let payload = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, secret, now);

        assert!(verify_signature_at(payload, &header, secret, now).is_ok());
    }

    #[test]
    fn test_verify_signature_tampered_payload() {
        let secret = "whsec_test_secret";
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, secret, now);

        let result = verify_signature_at(r#"{"id":"evt_2"}"#, &header, secret, now);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_real", now);

        let result = verify_signature_at(payload, &header, "whsec_other", now);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_verify_signature_stale_timestamp() {
        let secret = "whsec_test_secret";
        let payload = r#"{"id":"evt_1"}"#;
        let signed_at = 1_700_000_000;
        let header = sign(payload, secret, signed_at);

        // 10 minutes later, outside the 5-minute tolerance
        let result = verify_signature_at(payload, &header, secret, signed_at + 600);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn test_verify_signature_missing_parts() {
        let secret = "whsec_test_secret";
        let payload = r#"{"id":"evt_1"}"#;

        assert!(verify_signature_at(payload, "v1=deadbeef", secret, 0).is_err());
        assert!(verify_signature_at(payload, "t=100", secret, 100).is_err());
        assert!(verify_signature_at(payload, "", secret, 0).is_err());
    }

    #[test]
    fn test_envelope_timestamp() {
        let env = envelope("invoice.payment_failed", serde_json::json!({"id": "in_1"}));
        assert_eq!(env.event_timestamp().unix_timestamp(), 1_700_000_000);
    }
}
