//! Restaurant routes
//!
//! Creation is gated by the plan's restaurant limit inside a single
//! transaction, and blocked entirely for suspended tenants.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use tightship_shared::{Restaurant, ResourceKind};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Create restaurant request
#[derive(Debug, Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
    pub slug: Option<String>,
    pub address: Option<String>,
}

/// List the organization's restaurants
pub async fn list_restaurants(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<Restaurant>>, ApiError> {
    let restaurants: Vec<Restaurant> = sqlx::query_as(
        "SELECT * FROM restaurants WHERE organization_id = $1 ORDER BY created_at ASC",
    )
    .bind(auth_user.org_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(restaurants))
}

/// Create a restaurant, enforcing the plan limit transactionally
pub async fn create_restaurant(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<Restaurant>), ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Restaurant name is required".to_string()));
    }

    // Suspended tenants are read-only until payment recovers
    if billing.dunning.is_suspended(org_id).await? {
        return Err(ApiError::PaymentRequired);
    }

    let slug = req
        .slug
        .unwrap_or_else(|| req.name.trim().to_lowercase().replace(' ', "-"));

    // The limit check and the insert commit together: concurrent requests at
    // the limit boundary serialize on the organization row lock
    let mut tx = state.pool.begin().await?;

    billing
        .usage
        .enforce_limit(&mut tx, org_id, ResourceKind::Restaurants)
        .await?;

    let restaurant: Restaurant = sqlx::query_as(
        r#"
        INSERT INTO restaurants (id, organization_id, name, slug, address)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(req.name.trim())
    .bind(&slug)
    .bind(&req.address)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        org_id = %org_id,
        restaurant_id = %restaurant.id,
        "Created restaurant"
    );

    Ok((StatusCode::CREATED, Json(restaurant)))
}
