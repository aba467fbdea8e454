pub mod ai;
pub mod auth;
pub mod delete;
pub mod files;
pub mod notebooks;

use rocket::Request;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorResponse;

/// Body for routes that only report what they did.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[get("/health")]
pub fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "CogNote Backend API is running",
    })
}

fn error_body(status: Status, message: &str) -> Custom<Json<ErrorResponse>> {
    Custom(status, Json(ErrorResponse::new(message)))
}

#[catch(400)]
pub fn bad_request(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_body(Status::BadRequest, "Malformed request")
}

#[catch(404)]
pub fn not_found(req: &Request) -> Custom<Json<ErrorResponse>> {
    error_body(
        Status::NotFound,
        &format!("No route for {} {}", req.method(), req.uri().path()),
    )
}

#[catch(413)]
pub fn payload_too_large(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_body(Status::PayloadTooLarge, "File too large. The limit is 10 MB")
}

#[catch(422)]
pub fn unprocessable(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_body(
        Status::UnprocessableEntity,
        "Request body is missing required fields or has the wrong shape",
    )
}

#[catch(500)]
pub fn internal_error(_req: &Request) -> Custom<Json<ErrorResponse>> {
    error_body(Status::InternalServerError, "Internal server error")
}
