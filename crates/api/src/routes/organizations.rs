//! Organization routes

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use tightship_shared::Organization;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Create organization request
#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    pub slug: Option<String>,
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Create a new organization with its default free subscription
pub async fn create_organization(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateOrgRequest>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Organization name is required".to_string()));
    }

    let slug = req
        .slug
        .map(|s| slugify(&s))
        .unwrap_or_else(|| slugify(&req.name));
    if slug.is_empty() {
        return Err(ApiError::Validation("Organization slug is required".to_string()));
    }

    let organization: Organization = sqlx::query_as(
        r#"
        INSERT INTO organizations (id, name, slug, contact_email)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(req.name.trim())
    .bind(&slug)
    .bind(&auth_user.email)
    .fetch_one(&state.pool)
    .await?;

    // Every organization gets a subscription at signup (free plan, trialing).
    // If this fails the org still works: usage checks fall back to free-tier
    // limits until the subscription is repaired.
    if let Some(billing) = state.billing.as_ref() {
        if let Err(e) = billing
            .subscriptions
            .create_default_subscription(organization.id)
            .await
        {
            tracing::error!(
                org_id = %organization.id,
                error = %e,
                "Failed to create default subscription for new organization"
            );
        }
    }

    tracing::info!(
        org_id = %organization.id,
        user_id = %auth_user.user_id,
        slug = %slug,
        "Created organization"
    );

    Ok((StatusCode::CREATED, Json(organization)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Codfather"), "the-codfather");
        assert_eq!(slugify("  Brick Lane  Bagels! "), "brick-lane-bagels");
        assert_eq!(slugify("!!!"), "");
    }
}
