//! Integration tests for webhook-driven subscription lifecycle
//!
//! These tests verify event ingestion end to end against a real database:
//! idempotent replay, cancellation semantics, out-of-order redelivery, and
//! dunning recovery. No Stripe network calls are made; webhook handlers
//! operate purely on local state.
//!
//! ## Running Tests
//! ```bash
//! # Requires a migrated database (plans seeded by migrations)
//! export DATABASE_URL="postgres://localhost/tightship_test"
//! cargo test --test webhook_lifecycle -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use sqlx::PgPool;
use uuid::Uuid;

use tightship_billing::webhooks::{EventData, WebhookEnvelope};
use tightship_billing::{BillingService, DunningConfig, PriceIds, StripeConfig, WarningLevel};
use tightship_shared::{Subscription, SubscriptionStatus};

// ============================================================================
// Test Utilities
// ============================================================================

fn test_stripe_config() -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_unused".to_string(),
        webhook_secret: "whsec_test_secret".to_string(),
        price_ids: PriceIds {
            starter: "price_test_starter".to_string(),
            professional: "price_test_professional".to_string(),
            enterprise: "price_test_enterprise".to_string(),
            starter_yearly: None,
            professional_yearly: None,
            enterprise_yearly: None,
        },
        app_base_url: "http://localhost:3000".to_string(),
    }
}

async fn setup() -> (BillingService, PgPool) {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    let billing = BillingService::with_clients(
        tightship_billing::StripeClient::new(test_stripe_config()),
        tightship_billing::BillingEmailService::from_env(),
        DunningConfig::default(),
        pool.clone(),
    );

    (billing, pool)
}

/// Create a test organization with a default free subscription
async fn create_test_org(billing: &BillingService, pool: &PgPool) -> Uuid {
    let org_id = Uuid::new_v4();
    let slug = format!("test-org-{}", org_id.simple());

    sqlx::query("INSERT INTO organizations (id, name, slug, contact_email) VALUES ($1, $2, $3, $4)")
        .bind(org_id)
        .bind("Webhook Test Org")
        .bind(&slug)
        .bind("owner@example.com")
        .execute(pool)
        .await
        .expect("Failed to create test org");

    billing
        .subscriptions
        .create_default_subscription(org_id)
        .await
        .expect("Failed to create default subscription");

    org_id
}

fn envelope(id: &str, event_type: &str, created: i64, object: serde_json::Value) -> WebhookEnvelope {
    WebhookEnvelope {
        id: id.to_string(),
        event_type: event_type.to_string(),
        created,
        data: EventData { object },
    }
}

fn checkout_completed(id: &str, created: i64, org_id: Uuid, sub_id: &str, cus_id: &str) -> WebhookEnvelope {
    envelope(
        id,
        "checkout.session.completed",
        created,
        serde_json::json!({
            "id": format!("cs_{}", id),
            "customer": cus_id,
            "subscription": sub_id,
            "metadata": {"org_id": org_id.to_string(), "tier": "professional"}
        }),
    )
}

fn subscription_updated(
    id: &str,
    created: i64,
    sub_id: &str,
    cus_id: &str,
    status: &str,
) -> WebhookEnvelope {
    envelope(
        id,
        "customer.subscription.updated",
        created,
        serde_json::json!({
            "id": sub_id,
            "customer": cus_id,
            "status": status,
            "current_period_start": created,
            "current_period_end": created + 2_592_000,
            "cancel_at_period_end": false,
            "items": {"data": [{"price": {"id": "price_test_professional"}}]}
        }),
    )
}

async fn fetch_subscription(pool: &PgPool, org_id: Uuid) -> Subscription {
    sqlx::query_as("SELECT * FROM subscriptions WHERE organization_id = $1")
        .bind(org_id)
        .fetch_one(pool)
        .await
        .expect("Subscription should exist")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_checkout_then_update_activates_professional_plan() {
    let (billing, pool) = setup().await;
    let org_id = create_test_org(&billing, &pool).await;
    let sub_id = format!("sub_{}", Uuid::new_v4().simple());
    let cus_id = format!("cus_{}", Uuid::new_v4().simple());

    let base_ts = 1_700_000_000;

    billing
        .webhooks
        .handle_event(checkout_completed("evt_a1", base_ts, org_id, &sub_id, &cus_id))
        .await
        .unwrap();

    billing
        .webhooks
        .handle_event(subscription_updated("evt_a2", base_ts + 60, &sub_id, &cus_id, "active"))
        .await
        .unwrap();

    let subscription = fetch_subscription(&pool, org_id).await;
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(subscription.billing_subscription_id.as_deref(), Some(sub_id.as_str()));

    let (_, plan) = billing
        .subscriptions
        .subscription_with_plan(org_id)
        .await
        .unwrap()
        .expect("Subscription with plan");
    assert_eq!(plan.tier, tightship_shared::PlanTier::Professional);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_replayed_event_id_is_applied_once() {
    let (billing, pool) = setup().await;
    let org_id = create_test_org(&billing, &pool).await;
    let sub_id = format!("sub_{}", Uuid::new_v4().simple());
    let cus_id = format!("cus_{}", Uuid::new_v4().simple());

    let event = checkout_completed("evt_replay_1", 1_700_000_000, org_id, &sub_id, &cus_id);

    billing.webhooks.handle_event(event.clone()).await.unwrap();
    let first = fetch_subscription(&pool, org_id).await;

    // Duplicate delivery of the identical event id must be absorbed silently
    billing.webhooks.handle_event(event).await.unwrap();
    let second = fetch_subscription(&pool, org_id).await;

    assert_eq!(first.status, second.status);
    assert_eq!(first.billing_subscription_id, second.billing_subscription_id);
    assert_eq!(first.provider_event_ts, second.provider_event_ts);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_deleted_always_cancels_and_stale_update_cannot_revive() {
    let (billing, pool) = setup().await;
    let org_id = create_test_org(&billing, &pool).await;
    let sub_id = format!("sub_{}", Uuid::new_v4().simple());
    let cus_id = format!("cus_{}", Uuid::new_v4().simple());

    let base_ts = 1_700_000_000;

    billing
        .webhooks
        .handle_event(checkout_completed("evt_d1", base_ts, org_id, &sub_id, &cus_id))
        .await
        .unwrap();

    // Cancellation arrives
    billing
        .webhooks
        .handle_event(envelope(
            "evt_d2",
            "customer.subscription.deleted",
            base_ts + 120,
            serde_json::json!({
                "id": sub_id,
                "customer": cus_id,
                "status": "canceled",
                "current_period_end": base_ts + 2_592_000
            }),
        ))
        .await
        .unwrap();

    let cancelled = fetch_subscription(&pool, org_id).await;
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);

    // A stale "active" update (older provider timestamp, redelivered late)
    // must not overwrite the newer cancellation
    billing
        .webhooks
        .handle_event(subscription_updated("evt_d3", base_ts + 60, &sub_id, &cus_id, "active"))
        .await
        .unwrap();

    let still_cancelled = fetch_subscription(&pool, org_id).await;
    assert_eq!(still_cancelled.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_payment_failure_then_recovery_clears_warnings() {
    let (billing, pool) = setup().await;
    let org_id = create_test_org(&billing, &pool).await;
    let sub_id = format!("sub_{}", Uuid::new_v4().simple());
    let cus_id = format!("cus_{}", Uuid::new_v4().simple());

    let base_ts = 1_700_000_000;

    billing
        .webhooks
        .handle_event(checkout_completed("evt_p1", base_ts, org_id, &sub_id, &cus_id))
        .await
        .unwrap();

    billing
        .webhooks
        .handle_event(envelope(
            "evt_p2",
            "invoice.payment_failed",
            base_ts + 60,
            serde_json::json!({
                "id": "in_fail_1",
                "customer": cus_id,
                "subscription": sub_id,
                "amount_due": 7900,
                "attempt_count": 1
            }),
        ))
        .await
        .unwrap();

    let level = billing.dunning.warning_level(org_id).await.unwrap();
    assert_eq!(level, WarningLevel::Warning);
    let warnings = billing.dunning.subscription_warnings(org_id).await.unwrap();
    assert!(!warnings.is_empty());

    // Retry succeeds: attempt_count > 1 signals a recovery
    billing
        .webhooks
        .handle_event(envelope(
            "evt_p3",
            "invoice.payment_succeeded",
            base_ts + 120,
            serde_json::json!({
                "id": "in_fail_1",
                "customer": cus_id,
                "subscription": sub_id,
                "amount_paid": 7900,
                "attempt_count": 2
            }),
        ))
        .await
        .unwrap();

    let level = billing.dunning.warning_level(org_id).await.unwrap();
    assert_eq!(level, WarningLevel::None);
    let warnings = billing.dunning.subscription_warnings(org_id).await.unwrap();
    assert!(warnings.is_empty());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_unrecognized_event_is_accepted() {
    let (billing, _pool) = setup().await;

    // Unknown event kinds are accepted and ignored, never errors
    billing
        .webhooks
        .handle_event(envelope(
            &format!("evt_u_{}", Uuid::new_v4().simple()),
            "customer.tax_id.created",
            1_700_000_000,
            serde_json::json!({"id": "txi_1"}),
        ))
        .await
        .unwrap();
}
