//! API error handling
//!
//! The one place core error kinds turn into user-visible text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crm_core::{AuthFailure, CrmError, ValidationFailure};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new("NOT_FOUND", format!("{resource} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(ApiError),
    Unauthorized(ApiError),
    Forbidden(ApiError),
    NotFound(ApiError),
    Conflict(ApiError),
    /// Logged server-side; the client only sees a generic message
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::BadRequest(e)
            | AppError::Unauthorized(e)
            | AppError::Forbidden(e)
            | AppError::NotFound(e)
            | AppError::Conflict(e) => e,
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ApiError::internal_error()
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<CrmError> for AppError {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::Validation(failure) => {
                let code = match &failure {
                    ValidationFailure::WeakPassword(_) => "WEAK_PASSWORD",
                    ValidationFailure::InvitationExpired { .. } => "INVITATION_EXPIRED",
                    ValidationFailure::InvitationInvalid => "INVITATION_INVALID",
                    ValidationFailure::SelfModification => "SELF_MODIFICATION",
                    _ => "VALIDATION_ERROR",
                };
                AppError::BadRequest(ApiError::new(code, failure.to_string()))
            }
            CrmError::Authentication(failure) => AppError::Unauthorized(match failure {
                AuthFailure::InvalidCredentials => {
                    ApiError::new("INVALID_CREDENTIALS", failure.to_string())
                }
                AuthFailure::CurrentPasswordIncorrect => {
                    ApiError::new("CURRENT_PASSWORD_INCORRECT", failure.to_string())
                }
                AuthFailure::MissingToken => ApiError::unauthorized(),
                // Which token check failed is never disclosed
                AuthFailure::InvalidToken
                | AuthFailure::ExpiredToken
                | AuthFailure::RefreshTokenReused { .. } => {
                    ApiError::new("INVALID_TOKEN", "Invalid or expired token")
                }
            }),
            CrmError::Authorization(denial) => {
                AppError::Forbidden(ApiError::forbidden(denial.to_string()))
            }
            CrmError::Conflict(kind) => {
                AppError::Conflict(ApiError::new("CONFLICT", kind.to_string()))
            }
            CrmError::NotFound(entity) => AppError::NotFound(ApiError::not_found(&entity.to_string())),
            CrmError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(
            ApiError::new("VALIDATION_ERROR", "Request validation failed")
                .with_details(errors.to_string()),
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
