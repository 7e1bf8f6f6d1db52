//! API routes

pub mod billing;
pub mod health;
pub mod menu;
pub mod organizations;
pub mod products;
pub mod restaurants;
pub mod usage;

use axum::{
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public routes (no auth required)
    let mut public_api_routes = Router::new().route("/plans", get(billing::list_plans));

    // Stripe webhook (public, uses signature verification) - only when
    // billing is enabled for this deployment
    if state.config.enable_billing {
        public_api_routes = public_api_routes.route("/billing/webhook", post(billing::webhook));
    }

    // Public read-only menu API (rate limited, metered)
    let public_menu_routes = Router::new().route("/menu/:restaurant_slug", get(menu::get_menu));

    // Protected API routes (auth required)
    let protected_api_routes = Router::new()
        .route("/organizations", post(organizations::create_organization))
        .route(
            "/restaurants",
            get(restaurants::list_restaurants).post(restaurants::create_restaurant),
        )
        .route(
            "/restaurants/:restaurant_id/products",
            get(products::list_products),
        )
        .route("/products", post(products::create_product))
        .route("/usage", get(usage::get_usage))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/portal", post(billing::create_portal_session))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", public_api_routes.merge(protected_api_routes))
        .nest("/v1", public_menu_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
