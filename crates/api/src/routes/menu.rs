//! Public read-only menu API
//!
//! Serves a restaurant's menu without authentication, rate limited per
//! client IP and metered against the owning organization's monthly API-call
//! quota.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tightship_shared::{Product, ResourceKind};

use crate::{error::ApiError, routes::extract_client_ip, state::AppState};

#[derive(Debug, Deserialize)]
pub struct MenuQuery {
    /// "json" (default) or "csv"
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MenuItem {
    pub name: String,
    pub category: Option<String>,
    pub price_cents: i32,
    pub price_with_tax_cents: i32,
}

#[derive(Debug, Serialize)]
pub struct MenuResponse {
    pub restaurant: String,
    pub items: Vec<MenuItem>,
}

/// Serve a restaurant's public menu as JSON or CSV
pub async fn get_menu(
    State(state): State<AppState>,
    Path(restaurant_slug): Path<String>,
    Query(query): Query<MenuQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Per-IP rate limit before any database work
    let client_ip = extract_client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let limit_key = format!("menu:{}:{}", restaurant_slug, client_ip);
    let rate = state
        .rate_limiter
        .check(&limit_key, state.config.menu_rate_limit_per_minute)
        .await;
    if !rate.allowed {
        return Err(ApiError::RateLimited);
    }

    let restaurant: Option<(Uuid, Uuid, String)> =
        sqlx::query_as("SELECT id, organization_id, name FROM restaurants WHERE slug = $1")
            .bind(&restaurant_slug)
            .fetch_optional(&state.pool)
            .await?;

    let (restaurant_id, org_id, restaurant_name) = restaurant.ok_or(ApiError::NotFound)?;

    // The owning organization's monthly API quota gates this endpoint
    if let Some(billing) = state.billing.as_ref() {
        let usage = billing
            .usage
            .resource_usage(org_id, ResourceKind::ApiCalls)
            .await?;
        if !usage.allows_creation() {
            tracing::info!(
                org_id = %org_id,
                current = usage.current,
                limit = usage.limit,
                "Menu API call rejected: monthly quota exhausted"
            );
            return Err(ApiError::RateLimited);
        }

        // Metering is best-effort and never blocks the response
        billing.usage.record_api_call(org_id).await;
    }

    let products: Vec<Product> = sqlx::query_as(
        r#"
        SELECT * FROM products
        WHERE restaurant_id = $1 AND organization_id = $2
        ORDER BY category NULLS LAST, name ASC
        "#,
    )
    .bind(restaurant_id)
    .bind(org_id)
    .fetch_all(&state.pool)
    .await?;

    let items: Vec<MenuItem> = products
        .iter()
        .map(|p| MenuItem {
            name: p.name.clone(),
            category: p.category.clone(),
            price_cents: p.price_cents,
            price_with_tax_cents: p.price_with_tax_cents(),
        })
        .collect();

    match query.format.as_deref() {
        Some("csv") => {
            let csv = menu_to_csv(&items);
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
                csv,
            )
                .into_response())
        }
        _ => Ok(Json(MenuResponse {
            restaurant: restaurant_name,
            items,
        })
        .into_response()),
    }
}

/// Render menu items as CSV
fn menu_to_csv(items: &[MenuItem]) -> String {
    let mut out = String::from("name,category,price_cents,price_with_tax_cents\n");
    for item in items {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(&item.name),
            csv_escape(item.category.as_deref().unwrap_or("")),
            item.price_cents,
            item.price_with_tax_cents
        ));
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("Fish and Chips"), "Fish and Chips");
        assert_eq!(csv_escape("Bangers, Mash"), "\"Bangers, Mash\"");
        assert_eq!(csv_escape("The \"Big\" One"), "\"The \"\"Big\"\" One\"");
    }

    #[test]
    fn test_menu_to_csv() {
        let items = vec![
            MenuItem {
                name: "Margherita".to_string(),
                category: Some("Pizza".to_string()),
                price_cents: 1000,
                price_with_tax_cents: 1200,
            },
            MenuItem {
                name: "Tea, Builder's".to_string(),
                category: None,
                price_cents: 250,
                price_with_tax_cents: 300,
            },
        ];

        let csv = menu_to_csv(&items);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "name,category,price_cents,price_with_tax_cents");
        assert_eq!(lines[1], "Margherita,Pizza,1000,1200");
        assert_eq!(lines[2], "\"Tea, Builder's\",,250,300");
    }
}
