use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::api::MessageResponse;
use crate::auth::{AuthUser, JwtManager, TOKEN_COOKIE, TOKEN_TTL_DAYS};
use crate::db::{authenticate_user, create_user};
use crate::error::AppError;
use crate::models::User;
use crate::validation::ValidateRequest;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(email(message = "Please provide a valid email"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
    pub password: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email and password are required"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Email and password are required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserData,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: SessionUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
}

fn set_token_cookie(cookies: &CookieJar<'_>, token: &str) {
    let cookie = Cookie::build((TOKEN_COOKIE, token.to_string()))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::days(TOKEN_TTL_DAYS));
    cookies.add(cookie);
}

#[post("/auth/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    jwt: &State<JwtManager>,
) -> Result<Custom<Json<AuthResponse>>, AppError> {
    let validated = registration.validate_request()?;
    let email = validated.email.trim().to_lowercase();
    let name = validated
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let user = create_user(db, &email, &validated.password, name).await?;
    let token = jwt.generate_token(&user)?;
    set_token_cookie(cookies, &token);

    info!(user_id = %user.id, "Registered new user");

    Ok(Custom(
        Status::Created,
        Json(AuthResponse {
            user: UserData::from(user),
            token,
        }),
    ))
}

#[post("/auth/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    jwt: &State<JwtManager>,
) -> Result<Json<AuthResponse>, AppError> {
    let validated = login.validate_request()?;
    let email = validated.email.trim().to_lowercase();

    let Some(user) = authenticate_user(db, &email, &validated.password).await? else {
        return Err(AppError::Authentication("Invalid credentials".to_string()));
    };

    let token = jwt.generate_token(&user)?;
    set_token_cookie(cookies, &token);

    info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse {
        user: UserData::from(user),
        token,
    }))
}

#[post("/auth/logout")]
pub fn api_logout(cookies: &CookieJar<'_>) -> Json<MessageResponse> {
    cookies.remove(Cookie::build(TOKEN_COOKIE).path("/"));
    MessageResponse::new("Logged out")
}

/// Lets the frontend check a token with the same verifier the API uses.
#[get("/auth/session")]
pub fn api_session(user: AuthUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: true,
        user: SessionUser {
            id: user.id,
            email: user.email,
        },
    })
}
