//! Mapping from domain errors onto HTTP responses.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use saas_billing::plans::PlanError;
use saas_billing::subscriptions::SubscriptionError;
use saas_billing::webhooks::WebhookError;
use saas_core::SaasError;
use saas_jobs::{JobError, LifecycleError};
use saas_jobs::queue::QueueError;
use saas_ops::backup::BackupError;
use saas_platform::auth::AuthError;
use saas_platform::customers::CustomerError;
use saas_platform::rate_limit::{RateLimitResult, RatePolicy};
use saas_platform::support::SupportError;
use saas_platform::tenancy::TenantError;
use serde_json::json;
use tracing::error;

use crate::rest::ErrorResponse;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
    rate_limit: Option<RateLimitResult>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
            details: None,
            rate_limit: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Bad Request", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Validation Error", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "Conflict", message)
    }

    pub fn rate_limited(policy: &RatePolicy, result: RateLimitResult) -> Self {
        metrics::counter!("api.rate_limited", "policy" => policy.name).increment(1);
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: "Rate Limit Exceeded",
            message: format!("Too many requests. Limit: {policy}"),
            details: Some(json!({ "retry_after": result.retry_after_secs() })),
            rate_limit: Some(result),
        }
    }

    /// Log the cause and hide it from the client.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "Internal error");
        metrics::counter!("api.errors").increment(1);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "An unexpected error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.error.to_string(),
            message: self.message,
            details: self.details,
        };
        let mut response = (self.status, Json(body)).into_response();

        if let Some(result) = self.rate_limit {
            let headers = response.headers_mut();
            let pairs = [
                ("retry-after", result.retry_after_secs().to_string()),
                ("x-ratelimit-limit", result.limit.to_string()),
                ("x-ratelimit-remaining", result.remaining.to_string()),
                ("x-ratelimit-reset", result.reset_at.timestamp().to_string()),
            ];
            for (name, value) in pairs {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
        }
        response
    }
}

impl From<SaasError> for ApiError {
    fn from(e: SaasError) -> Self {
        match e {
            SaasError::Validation(msg) => ApiError::validation(msg),
            SaasError::WeakPassword(problems) => {
                ApiError::validation("Password does not meet requirements")
                    .with_details(json!({ "password": problems }))
            }
            SaasError::NotFound { resource } => ApiError::not_found(format!("{resource} not found")),
            SaasError::Conflict(msg) => ApiError::conflict(msg),
            other => ApiError::internal(other),
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(e: TenantError) -> Self {
        match e {
            TenantError::NotFound => ApiError::not_found(e.to_string()),
            TenantError::SlugTaken(_) => ApiError::conflict(e.to_string()),
            TenantError::LimitReached { .. } | TenantError::InvalidTransition { .. } => {
                ApiError::bad_request(e.to_string())
            }
            TenantError::Validation(inner) => inner.into(),
        }
    }
}

impl From<CustomerError> for ApiError {
    fn from(e: CustomerError) -> Self {
        match e {
            CustomerError::NotFound => ApiError::not_found(e.to_string()),
            CustomerError::EmailTaken(_) => ApiError::conflict(e.to_string()),
            CustomerError::SelfRoleChange | CustomerError::SelfDeactivation => {
                ApiError::bad_request(e.to_string())
            }
            CustomerError::Validation(inner) => inner.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::TokenRevoked => {
                ApiError::unauthorized(e.to_string())
            }
            AuthError::InvalidToken(_) => ApiError::unauthorized("Invalid or expired token"),
            AuthError::AccountDisabled | AuthError::InsufficientRole => {
                ApiError::forbidden(e.to_string())
            }
            AuthError::Hashing(_) => ApiError::internal(e),
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::NotFound => ApiError::not_found(e.to_string()),
            PlanError::NameTaken(_) => ApiError::conflict(e.to_string()),
            PlanError::InUse { .. } => ApiError::bad_request(e.to_string()),
            PlanError::Validation(inner) => inner.into(),
        }
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(e: SubscriptionError) -> Self {
        match e {
            SubscriptionError::NotFound => ApiError::not_found(e.to_string()),
            SubscriptionError::AlreadyCanceled => ApiError::bad_request(e.to_string()),
        }
    }
}

impl From<SupportError> for ApiError {
    fn from(e: SupportError) -> Self {
        match e {
            SupportError::NotFound => ApiError::not_found(e.to_string()),
            SupportError::Closed => ApiError::bad_request(e.to_string()),
            SupportError::Validation(inner) => inner.into(),
        }
    }
}

impl From<BackupError> for ApiError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::NotFound => ApiError::not_found(e.to_string()),
            BackupError::NotCompleted | BackupError::ChecksumMismatch { .. } => {
                ApiError::bad_request(e.to_string())
            }
            BackupError::Provision(_) => ApiError::internal(e),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::internal(e)
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Tenant(inner) => inner.into(),
            JobError::Backup(inner) => inner.into(),
            other => ApiError::internal(other),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Tenant(inner) => inner.into(),
            LifecycleError::Queue(inner) => inner.into(),
            LifecycleError::Validation(inner) => inner.into(),
            LifecycleError::CustomerNotFound | LifecycleError::BackupNotFound => {
                ApiError::not_found(e.to_string())
            }
            LifecycleError::CustomerInactive | LifecycleError::ModuleNotAllowed(_) => {
                ApiError::forbidden(e.to_string())
            }
            LifecycleError::PlanNotFound => ApiError::bad_request("Invalid plan"),
            LifecycleError::PlanInactive(_)
            | LifecycleError::ModuleAlreadyInstalled(_)
            | LifecycleError::ModuleNotInstalled(_)
            | LifecycleError::BackupNotCompleted => ApiError::bad_request(e.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        if e.is_client_error() {
            ApiError::bad_request(e.to_string())
        } else {
            ApiError::internal(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use chrono::{Duration, Utc};

    #[test]
    fn test_domain_error_statuses() {
        assert_eq!(ApiError::from(TenantError::NotFound).status, StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(TenantError::SlugTaken("acme".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AuthError::InsufficientRole).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(LifecycleError::ModuleNotAllowed("mrp".into())).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(WebhookError::InvalidSignature).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(WebhookError::Processing("boom".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_weak_password_lists_problems() {
        let err = ApiError::from(SaasError::WeakPassword(vec!["too short".into()]));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.details.unwrap()["password"][0], "too short");
    }

    #[test]
    fn test_rate_limited_sets_headers() {
        let policy = RatePolicy::per_minute("test.policy", 3);
        let result = RateLimitResult {
            allowed: false,
            remaining: 0,
            reset_at: Utc::now() + Duration::seconds(30),
            limit: 3,
        };
        let response = ApiError::rate_limited(&policy, result).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    }
}
