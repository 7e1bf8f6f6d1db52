//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use tightship_billing::BillingService;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::rate_limit::RateLimiter;

/// Application state shared across all routes.
///
/// Every client is constructed explicitly at startup and injected here;
/// nothing is reached through import-time singletons.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    /// None when billing is disabled for this deployment
    pub billing: Option<Arc<BillingService>>,
    pub rate_limiter: Arc<RateLimiter>,
    auth: AuthState,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: Config,
        billing: Option<BillingService>,
        rate_limiter: RateLimiter,
    ) -> Self {
        let auth = AuthState {
            jwt: JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours),
        };
        Self {
            pool,
            config: Arc::new(config),
            billing: billing.map(Arc::new),
            rate_limiter: Arc::new(rate_limiter),
            auth,
        }
    }

    /// Auth state for middleware layers
    pub fn auth_state(&self) -> AuthState {
        self.auth.clone()
    }
}
