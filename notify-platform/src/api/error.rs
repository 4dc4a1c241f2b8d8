//! Error responses.
//!
//! Every failure is rendered as `{code, message, details?}` with the matching
//! HTTP status. Internal causes are logged here and never echoed to clients.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Error;
use crate::ingress::SubmitError;

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorResponse,
    /// Seconds for the `Retry-After` header.
    pub retry_after: Option<u64>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                code,
                message: message.into(),
                details: None,
            },
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    /// Malformed request that never reached validation.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Well-formed request with invalid fields.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            retry_after: Some(retry_after_secs),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
        }
        .with_details(json!({ "retry_after": retry_after_secs }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// The request was recorded but the broker refused it.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "BROKER_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self
            .retry_after
            .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok());

        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::validation(msg),
            Error::NotFound { entity_type, id } => {
                Self::not_found(format!("{entity_type} '{id}' does not exist"))
            }
            Error::Timeout(_) | Error::ServiceUnavailable(_) => {
                tracing::warn!(error = %err, "Store unavailable while serving request");
                Self::service_unavailable("A backing service is unavailable")
            }
            Error::DatabaseSqlx(_) | Error::Database(_) | Error::Migration(_) => {
                tracing::error!(error = %err, "Store query failed");
                Self::internal("Storage failure")
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal("Internal error")
            }
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(fields) => Self::validation("Request validation failed")
                .with_details(serde_json::to_value(&fields).unwrap_or_default()),
            SubmitError::RateLimited {
                reason,
                retry_after_secs,
            } => Self::too_many_requests(reason, retry_after_secs),
            SubmitError::Unavailable(_) => {
                Self::service_unavailable("Rate limiting is temporarily unavailable")
            }
            SubmitError::Ledger(_) => Self::internal("Failed to record notification"),
            SubmitError::Publish { id, .. } => {
                Self::bad_gateway("Failed to queue notification").with_details(json!({ "id": id }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::FieldError;

    #[test]
    fn test_validation_details() {
        let err: ApiError = SubmitError::Validation(vec![
            FieldError::new("channel", "is required"),
            FieldError::new("recipient", "is required"),
        ])
        .into();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "VALIDATION_ERROR");
        let details = err.body.details.unwrap();
        assert_eq!(details.as_array().unwrap().len(), 2);
        assert_eq!(details[0]["field"], "channel");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err: ApiError = SubmitError::RateLimited {
            reason: "slow down".to_string(),
            retry_after_secs: 42,
        }
        .into();
        assert_eq!(err.body.details.as_ref().unwrap()["retry_after"], 42);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_submit_error_statuses() {
        let publish: ApiError = SubmitError::Publish {
            id: "n1".to_string(),
            message: "closed".to_string(),
        }
        .into();
        assert_eq!(publish.status, StatusCode::BAD_GATEWAY);
        assert_eq!(publish.body.details.unwrap()["id"], "n1");

        let unavailable: ApiError = SubmitError::Unavailable("redis".to_string()).into();
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);

        let ledger: ApiError = SubmitError::Ledger("locked".to_string()).into();
        assert_eq!(ledger.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_crate_error_mapping() {
        let missing: ApiError = Error::not_found("Notification", "123").into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert!(missing.body.message.contains("123"));

        let slow: ApiError = Error::timeout("ledger").into();
        assert_eq!(slow.status, StatusCode::SERVICE_UNAVAILABLE);

        let broken: ApiError = Error::Database("disk I/O error".to_string()).into();
        assert_eq!(broken.body.message, "Storage failure");
    }
}
