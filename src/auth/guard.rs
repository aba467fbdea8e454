use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;

use crate::error::{AppError, ErrorResponse};

use super::{Claims, JwtManager};

pub const TOKEN_COOKIE: &str = "token";

/// The caller, as proven by a verified bearer token or `token` cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.id,
            email: claims.email,
        }
    }
}

impl AuthUser {
    pub fn require_owner(&self, owner_id: &str, what: &str) -> Result<(), AppError> {
        if self.id == owner_id {
            Ok(())
        } else {
            tracing::warn!(user_id = %self.id, resource = %what, "Access to another user's resource");
            Err(AppError::Authorization(format!(
                "You do not have access to this {}",
                what
            )))
        }
    }
}

/// Why the auth guard rejected the request, read back by the 401 catcher.
#[derive(Debug, Clone, Default)]
struct AuthFailure(Option<String>);

pub fn extract_token(request: &Request<'_>) -> Result<String, AppError> {
    if let Some(header) = request.headers().get_one("Authorization") {
        return match header.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Some(_) => Err(AppError::Authentication("No token provided".to_string())),
            None => Err(AppError::Authentication(
                "Invalid authorization format. Use: Bearer <token>".to_string(),
            )),
        };
    }

    request
        .cookies()
        .get(TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Authentication("No authorization token provided".to_string()))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let jwt = match request.rocket().state::<JwtManager>() {
            Some(jwt) => jwt,
            _ => {
                tracing::error!("JwtManager not found in managed state");
                return Outcome::Error((
                    Status::InternalServerError,
                    AppError::Internal("Token verifier unavailable".to_string()),
                ));
            }
        };

        let verified = extract_token(request).and_then(|token| jwt.verify(&token));

        match verified {
            Ok(claims) => {
                tracing::debug!(user_id = %claims.id, "User authenticated via token");
                Outcome::Success(AuthUser::from(claims))
            }
            Err(err) => {
                tracing::warn!(error = %err, "Rejected request token");
                let message = match &err {
                    AppError::Authentication(msg) => Some(msg.clone()),
                    _ => None,
                };
                request.local_cache(|| AuthFailure(message));
                Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(req: &Request) -> Custom<Json<ErrorResponse>> {
    let failure = req.local_cache(AuthFailure::default);
    let message = failure
        .0
        .clone()
        .unwrap_or_else(|| "Authentication required".to_string());

    Custom(Status::Unauthorized, Json(ErrorResponse::new(message)))
}
