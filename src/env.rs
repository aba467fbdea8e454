use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://cognote.db?mode=rwc";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// Runtime settings shared with every route as managed state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_api_url: String,
    pub gemini_timeout: Duration,
    pub upload_dir: PathBuf,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let jwt_secret = required("JWT_SECRET")?;
        let gemini_api_key = required("GEMINI_API_KEY")?;

        let gemini_timeout = match std::env::var("GEMINI_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    AppError::Internal(format!("GEMINI_TIMEOUT_SECS is not a number: {}", raw))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(120),
        };

        Ok(Self {
            database_url: optional("DATABASE_URL", DEFAULT_DATABASE_URL),
            jwt_secret,
            gemini_api_key,
            gemini_model: optional("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            gemini_api_url: optional("GEMINI_API_URL", DEFAULT_GEMINI_API_URL),
            gemini_timeout,
            upload_dir: PathBuf::from(optional("UPLOAD_DIR", "uploads")),
            frontend_url: optional("FRONTEND_URL", DEFAULT_FRONTEND_URL),
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Internal(format!(
            "{} environment variable not set",
            key
        ))),
    }
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
