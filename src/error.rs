use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Model response error: {0}")]
    ModelResponse(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body for every error the API returns.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

impl AppError {
    /// Value recorded as `error.type` on the active span.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Validation(_) => "validation_error",
            AppError::Extraction(_) => "extraction_error",
            AppError::ModelResponse(_) => "model_response_error",
            AppError::ExternalService(_) => "external_service_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Internal(_)
                | AppError::ExternalService(_)
                | AppError::ModelResponse(_)
        )
    }

    pub fn log_and_record(&self, ctx: &str) {
        let kind = self.kind();
        let message = self.to_string();

        if self.is_server_fault() {
            error!(error_kind = kind, context = %ctx, "{}", message);
        } else {
            warn!(error_kind = kind, context = %ctx, "{}", message);
        }

        let span = Span::current();
        if span.is_none() {
            return;
        }

        span.record("error", true);
        span.record(ERROR_TYPE, kind);
        span.record("error.message", message.as_str());
        if self.is_server_fault() {
            span.record(OTEL_STATUS_CODE, "ERROR");
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Extraction(_) => Status::UnprocessableEntity,
            AppError::ModelResponse(_) => Status::InternalServerError,
            AppError::ExternalService(_) => Status::BadGateway,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Body shown to the client. Database and internal failures stay opaque.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            AppError::Database(_) | AppError::Internal(_) => {
                ErrorResponse::new("Internal server error")
            }
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg) => ErrorResponse::new(msg.clone()),
            AppError::Extraction(msg) => {
                ErrorResponse::with_details("Failed to extract text from PDF", msg.clone())
            }
            AppError::ModelResponse(msg) => {
                ErrorResponse::with_details("Model returned an unusable response", msg.clone())
            }
            AppError::ExternalService(msg) => {
                ErrorResponse::with_details("Language model request failed", msg.clone())
            }
        }
    }

    pub fn to_status_with_log(&self, context: &str) -> Status {
        self.log_and_record(context);
        self.status_code()
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = self.to_status_with_log(&format!("Request to {} {}", req.method(), req.uri()));
        Custom(status, Json(self.to_response())).respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalService(error.to_string())
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.to_status_with_log("Error conversion into Status")
    }
}
