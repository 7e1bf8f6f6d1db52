//! Product (menu item) routes
//!
//! Creation is gated by the plan's product limit inside a single
//! transaction, and blocked entirely for suspended tenants.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use tightship_shared::{Product, ResourceKind};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Create product request
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub restaurant_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub price_cents: i32,
    /// VAT rate in basis points; defaults to 20%
    pub tax_rate_bp: Option<i32>,
}

/// List products for one of the organization's restaurants
pub async fn list_products(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(restaurant_id): Path<Uuid>,
) -> Result<Json<Vec<Product>>, ApiError> {
    // Tenant isolation: the restaurant must belong to the caller's org
    let products: Vec<Product> = sqlx::query_as(
        r#"
        SELECT p.* FROM products p
        JOIN restaurants r ON r.id = p.restaurant_id
        WHERE p.restaurant_id = $1 AND r.organization_id = $2
        ORDER BY p.category NULLS LAST, p.name ASC
        "#,
    )
    .bind(restaurant_id)
    .bind(auth_user.org_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(products))
}

/// Create a product, enforcing the plan limit transactionally
pub async fn create_product(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Product name is required".to_string()));
    }
    if req.price_cents < 0 {
        return Err(ApiError::Validation("Price cannot be negative".to_string()));
    }

    // Suspended tenants are read-only until payment recovers
    if billing.dunning.is_suspended(org_id).await? {
        return Err(ApiError::PaymentRequired);
    }

    // Cross-tenant restaurant IDs are a 404, not a hint that they exist
    let owned: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM restaurants WHERE id = $1 AND organization_id = $2")
            .bind(req.restaurant_id)
            .bind(org_id)
            .fetch_optional(&state.pool)
            .await?;
    if owned.is_none() {
        return Err(ApiError::NotFound);
    }

    // The limit check and the insert commit together: concurrent requests at
    // the limit boundary serialize on the organization row lock
    let mut tx = state.pool.begin().await?;

    billing
        .usage
        .enforce_limit(&mut tx, org_id, ResourceKind::Products)
        .await?;

    let product: Product = sqlx::query_as(
        r#"
        INSERT INTO products (id, organization_id, restaurant_id, name, category, price_cents, tax_rate_bp)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(req.restaurant_id)
    .bind(req.name.trim())
    .bind(&req.category)
    .bind(req.price_cents)
    .bind(req.tax_rate_bp.unwrap_or(2000))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        org_id = %org_id,
        product_id = %product.id,
        restaurant_id = %req.restaurant_id,
        "Created product"
    );

    Ok((StatusCode::CREATED, Json(product)))
}
