use rocket::serde::json::Json;
use tracing::instrument;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// Flattens validator output into one message, first field error wins.
pub fn first_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field))
            })
        })
        .next()
        .unwrap_or_else(|| "Invalid request".to_string())
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(first_message(&errors))
    }
}

/// Runs `validator` rules on a request body and hands back the inner value.
pub trait ValidateRequest<T> {
    fn validate_request(self) -> Result<T, AppError>;
}

impl<T: Validate + std::fmt::Debug> ValidateRequest<T> for Json<T> {
    #[instrument(skip(self))]
    fn validate_request(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner.validate()?;
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Signup {
        #[validate(email(message = "Please provide a valid email"))]
        email: String,
        #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
        password: String,
    }

    #[test]
    fn valid_body_passes_through() {
        let body = Json(Signup {
            email: "ada@example.com".to_string(),
            password: "hunter22".to_string(),
        });
        let signup = body.validate_request().unwrap();
        assert_eq!(signup.email, "ada@example.com");
    }

    #[test]
    fn short_password_becomes_validation_error() {
        let body = Json(Signup {
            email: "ada@example.com".to_string(),
            password: "abc".to_string(),
        });
        let err = body.validate_request().unwrap_err();
        assert!(
            matches!(err, AppError::Validation(msg) if msg == "Password must be at least 6 characters long")
        );
    }

    #[test]
    fn messages_are_reported_in_field_order() {
        let body = Json(Signup {
            email: "not-an-email".to_string(),
            password: "abc".to_string(),
        });
        let err = body.validate_request().unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg == "Please provide a valid email"));
    }
}
