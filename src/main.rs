#[macro_use]
extern crate rocket;

mod ai;
mod api;
mod auth;
mod cors;
mod db;
mod env;
mod error;
mod generation;
mod models;
mod pdf;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::str::FromStr;
use std::sync::Arc;

use ai::{GeminiClient, LanguageModel};
use api::ai::{api_chat, api_chat_history, api_flashcards, api_quiz, api_summarize};
use api::auth::{api_login, api_logout, api_register, api_session};
use api::delete::{
    api_delete_file, api_delete_flashcard, api_delete_flashcard_set,
    api_delete_flashcards_for_file, api_delete_quiz_for_file, api_delete_quiz_question,
    api_delete_quiz_set, api_delete_summary,
};
use api::files::{
    api_get_file, api_get_settings, api_update_profile, api_upload_pdf, api_user_data,
};
use api::notebooks::{
    api_create_notebook, api_delete_notebook, api_get_notebooks, api_rename_notebook,
};
use api::{bad_request, health, internal_error, not_found, payload_too_large, unprocessable};
use auth::{JwtManager, unauthorized_api};
use cors::{CorsFairing, preflight};
use env::{AppConfig, load_environment};
use error::AppError;
use rocket::data::{Limits, ToByteUnit};
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Rocket(#[from] Box<rocket::Error>),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    load_environment().map_err(|e| anyhow::anyhow!("Failed to load environment: {}", e))?;
    init_tracing();

    let config = AppConfig::from_env()?;

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    let model: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_api_url.clone(),
        config.gemini_model.clone(),
        config.gemini_timeout,
    )?);

    let launched = init_rocket(pool, config, model).launch().await;
    shutdown_telemetry();
    launched.map_err(Box::new)?;

    Ok(())
}

pub fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    model: Arc<dyn LanguageModel>,
) -> Rocket<Build> {
    info!(model = %model.model_name(), "Starting CogNote backend");

    let limits = Limits::default()
        .limit("file", 10.mebibytes())
        .limit("data-form", 11.mebibytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    let jwt = JwtManager::new(&config.jwt_secret);
    let cors = CorsFairing::new(config.frontend_url.clone());

    rocket::custom(figment)
        .manage(pool)
        .manage(jwt)
        .manage(model)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_register,
                api_login,
                api_logout,
                api_session,
                api_upload_pdf,
                api_user_data,
                api_get_settings,
                api_update_profile,
                api_get_file,
                api_summarize,
                api_flashcards,
                api_quiz,
                api_chat,
                api_chat_history,
                api_create_notebook,
                api_get_notebooks,
                api_rename_notebook,
                api_delete_notebook,
                api_delete_file,
                api_delete_quiz_question,
                api_delete_quiz_for_file,
                api_delete_quiz_set,
                api_delete_flashcard,
                api_delete_flashcards_for_file,
                api_delete_flashcard_set,
                api_delete_summary,
            ],
        )
        .mount("/", routes![health, preflight])
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized_api,
                not_found,
                payload_too_large,
                unprocessable,
                internal_error,
            ],
        )
        .attach(TelemetryFairing)
        .attach(cors)
}
