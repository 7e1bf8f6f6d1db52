//! Billing routes for Stripe integration

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use tightship_billing::{BillingInterval, SubscriptionWarning};
use tightship_shared::PlanTier;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub tier: String,
    /// Billing interval (monthly or yearly)
    pub billing_interval: Option<String>,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Response from creating a portal session
#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

/// Subscription info response
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub status: String,
    pub tier: String,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub warnings: Vec<SubscriptionWarning>,
}

/// A catalog entry for the public pricing page
#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub tier: String,
    pub name: String,
    pub price_monthly_cents: i32,
    pub price_yearly_cents: i32,
    pub features: Vec<String>,
    pub limits: PlanLimitsInfo,
}

#[derive(Debug, Serialize)]
pub struct PlanLimitsInfo {
    pub restaurants: i64,
    pub products: i64,
    pub api_calls: i64,
}

/// List the plan catalog (public, for the pricing page and upgrade prompts)
pub async fn list_plans(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlanInfo>>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let plans = billing.catalog.all().await?;

    Ok(Json(
        plans
            .into_iter()
            .map(|plan| {
                let limits = plan.limits();
                PlanInfo {
                    tier: plan.tier.to_string(),
                    name: plan.name.clone(),
                    price_monthly_cents: plan.price_monthly_cents,
                    price_yearly_cents: plan.price_yearly_cents,
                    features: plan
                        .feature_flags()
                        .iter()
                        .map(|f| f.as_str().to_string())
                        .collect(),
                    limits: PlanLimitsInfo {
                        restaurants: limits.restaurants,
                        products: limits.products,
                        api_calls: limits.api_calls,
                    },
                }
            })
            .collect(),
    ))
}

/// Create a checkout session for a paid subscription
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    let tier: PlanTier = req
        .tier
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid plan tier: {}", req.tier)))?;

    let billing_interval = req
        .billing_interval
        .as_deref()
        .and_then(BillingInterval::from_str)
        .unwrap_or_default();

    // The org name becomes the provider customer name
    let org_name: (String,) = sqlx::query_as("SELECT name FROM organizations WHERE id = $1")
        .bind(org_id)
        .fetch_one(&state.pool)
        .await?;

    let customer = billing
        .customer
        .get_or_create_customer(org_id, &auth_user.email, &org_name.0)
        .await?;

    let session = billing
        .checkout
        .create_subscription_checkout_with_interval(
            org_id,
            customer.id.as_str(),
            tier,
            billing_interval,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        session_id: session.id.to_string(),
        url: session.url,
    }))
}

/// Create a billing portal session
pub async fn create_portal_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<PortalResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    let customer_id = billing.customer.get_customer_id(org_id).await?;

    let session = billing
        .portal
        .create_portal_session(org_id, customer_id.as_str())
        .await?;

    Ok(Json(PortalResponse {
        portal_url: session.url,
    }))
}

/// Get current subscription info with dunning warnings
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    let warnings = billing.dunning.subscription_warnings(org_id).await?;

    let info = match billing.subscriptions.subscription_with_plan(org_id).await? {
        Some((subscription, plan)) => SubscriptionInfo {
            status: subscription.status.to_string(),
            tier: plan.tier.to_string(),
            current_period_start: subscription
                .current_period_start
                .and_then(|t| t.format(&Rfc3339).ok()),
            current_period_end: subscription
                .current_period_end
                .and_then(|t| t.format(&Rfc3339).ok()),
            cancel_at_period_end: subscription.cancel_at_period_end,
            warnings,
        },
        // Lifecycle invariants make this unreachable; respond as free tier
        None => SubscriptionInfo {
            status: "trialing".to_string(),
            tier: PlanTier::Free.to_string(),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            warnings,
        },
    };

    Ok(Json(info))
}

/// Stripe webhook endpoint (public, signature-verified)
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    // Get signature header
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    // Verify and parse event; verification failure is terminal for the
    // request, no processing is attempted
    let envelope = billing.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = ?e, "Stripe webhook signature verification failed");
        ApiError::BadRequest("Invalid webhook signature".to_string())
    })?;

    let event_type = envelope.event_type.clone();

    // Handle the event
    billing.webhooks.handle_event(envelope).await.map_err(|e| {
        tracing::error!(event_type = %event_type, error = %e, "Webhook handling error");
        ApiError::Internal
    })?;

    tracing::info!(event_type = %event_type, "Stripe webhook processed successfully");

    Ok(Json(json!({ "received": true })))
}
