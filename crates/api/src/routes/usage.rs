//! Usage routes

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;

use tightship_billing::{ResourceUsage, WarningLevel};

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Usage overview for the organization
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub resources: Vec<ResourceUsage>,
    pub warning_level: WarningLevel,
}

/// Get current usage for all gated resources
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UsageResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;
    let org_id = auth_user.org_id;

    let resources = billing.usage.all_usage(org_id).await?;
    let warning_level = billing.dunning.warning_level(org_id).await?;

    Ok(Json(UsageResponse {
        resources,
        warning_level,
    }))
}
