//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tightship_billing::BillingError;
use tightship_shared::ResourceKind;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Invalid or expired token")]
    InvalidToken,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),
    #[error("No organization found")]
    NoOrganization,

    // Rate limiting
    #[error("Too many requests")]
    RateLimited,

    // Billing errors
    #[error("Usage limit reached for {resource}")]
    LimitExceeded {
        resource: ResourceKind,
        current_usage: i64,
        limit: i64,
        upgrade_url: String,
    },
    #[error("Payment required")]
    PaymentRequired,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Limit-exceeded carries structured data for the upgrade prompt
        if let ApiError::LimitExceeded {
            resource,
            current_usage,
            limit,
            upgrade_url,
        } = &self
        {
            let body = Json(json!({
                "error": {
                    "code": "LIMIT_EXCEEDED",
                    "message": format!(
                        "You've reached your plan's {} limit. Upgrade to add more.",
                        resource
                    ),
                    "currentUsage": current_usage,
                    "limit": limit,
                    "upgradeUrl": upgrade_url,
                }
            }));
            return (StatusCode::PAYMENT_REQUIRED, body).into_response();
        }

        let (status, code, message) = match &self {
            // Authentication
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::NoOrganization => (
                StatusCode::BAD_REQUEST,
                "NO_ORGANIZATION",
                "No organization found. Please create an organization first.".to_string(),
            ),

            // Rate limiting
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                self.to_string(),
            ),

            // Billing (structured variant returned above; keep the match exhaustive)
            ApiError::LimitExceeded { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "LIMIT_EXCEEDED",
                self.to_string(),
            ),
            ApiError::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_REQUIRED",
                "Service suspended pending payment. Please update your payment method."
                    .to_string(),
            ),

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::LimitExceeded {
                resource,
                current,
                limit,
            } => ApiError::LimitExceeded {
                resource,
                current_usage: current,
                limit,
                upgrade_url: "/billing?upgrade=true".to_string(),
            },
            BillingError::SubscriptionSuspended => ApiError::PaymentRequired,
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("Invalid webhook signature".to_string())
            }
            BillingError::WebhookPayloadInvalid(msg) => {
                tracing::error!(error = %msg, "Malformed webhook payload");
                ApiError::BadRequest("Malformed webhook payload".to_string())
            }
            BillingError::Unauthorized(_) => ApiError::Forbidden,
            BillingError::NotFound(_)
            | BillingError::CustomerNotFound(_)
            | BillingError::SubscriptionNotFound(_) => ApiError::NotFound,
            BillingError::InvalidTier(tier) => {
                ApiError::BadRequest(format!("Invalid plan tier: {}", tier))
            }
            BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
            // Provider internals never cross the boundary
            other => {
                tracing::error!(error = %other, "Billing operation failed");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_limit_exceeded_response_shape() {
        let err = ApiError::LimitExceeded {
            resource: ResourceKind::Products,
            current_usage: 50,
            limit: 50,
            upgrade_url: "/billing?upgrade=true".to_string(),
        };

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "LIMIT_EXCEEDED");
        assert_eq!(json["error"]["currentUsage"], 50);
        assert_eq!(json["error"]["limit"], 50);
        assert_eq!(json["error"]["upgradeUrl"], "/billing?upgrade=true");
    }

    #[tokio::test]
    async fn test_billing_limit_error_maps_to_structured_402() {
        let billing_err = BillingError::LimitExceeded {
            resource: ResourceKind::Products,
            current: 50,
            limit: 50,
        };

        let api_err: ApiError = billing_err.into();
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let json = body_json(response).await;
        assert_eq!(json["error"]["limit"], 50);
    }

    #[tokio::test]
    async fn test_provider_error_hides_internals() {
        let api_err: ApiError =
            BillingError::StripeApi("secret key sk_live_... rejected".to_string()).into();
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        let message = json["error"]["message"].as_str().unwrap();
        assert!(!message.contains("sk_live"));
    }

    #[tokio::test]
    async fn test_webhook_signature_error_is_400() {
        let api_err: ApiError = BillingError::WebhookSignatureInvalid.into();
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
