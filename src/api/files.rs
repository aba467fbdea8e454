use std::path::{Path, PathBuf};

use rocket::State;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::{
    create_file_with_note, get_file, get_files_for_user, get_flashcards_for_file, get_note_for_file,
    get_notebook, get_notes_for_user, get_quiz_for_file, get_summary_for_file, get_user,
    update_user_profile,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{FileListing, FileRecord, Flashcard, Note, Quiz, Summary};
use crate::pdf;
use crate::validation::ValidateRequest;

const EXTRACTED_PREVIEW_CHARS: usize = 500;
const NOTE_PREVIEW_CHARS: usize = 200;

#[derive(FromForm)]
pub struct UploadForm<'r> {
    pub pdf: TempFile<'r>,
    #[field(name = "notebookId")]
    pub notebook_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotePreview {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file: FileRecord,
    pub extracted_text: String,
    pub note: NotePreview,
}

#[derive(Debug, Serialize)]
pub struct UserDataResponse {
    pub files: Vec<FileListing>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub name: Option<String>,
    pub email: String,
    pub username: Option<String>,
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Username must be 1 to 50 characters"))]
    pub username: Option<String>,
    #[validate(length(max = 2000, message = "Custom prompt must be at most 2000 characters"))]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileDetailResponse {
    pub file: FileRecord,
    pub note: Option<Note>,
    pub summary: Option<Summary>,
    pub flashcards: Vec<Flashcard>,
    pub quiz: Vec<Quiz>,
}

/// `<stem>-<unix millis>-<random>.pdf`, so repeated uploads of one name never collide.
fn stored_file_name(stem: Option<&str>) -> String {
    let stem = stem.filter(|s| !s.is_empty()).unwrap_or("upload");
    format!(
        "{}-{}-{}.pdf",
        stem,
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

async fn discard(path: &Path) {
    if let Err(e) = rocket::tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove uploaded file");
    }
}

#[post("/pdf/upload", data = "<form>")]
pub async fn api_upload_pdf(
    user: AuthUser,
    mut form: Form<UploadForm<'_>>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<UploadResponse>>, AppError> {
    let is_pdf = form
        .pdf
        .content_type()
        .map(|ct| ct.is_pdf())
        .unwrap_or(false);
    if !is_pdf {
        return Err(AppError::Validation(
            "Only PDF files are allowed".to_string(),
        ));
    }

    let notebook_id = form
        .notebook_id
        .clone()
        .filter(|id| !id.trim().is_empty());
    if let Some(id) = &notebook_id {
        let notebook = get_notebook(db, id).await?;
        user.require_owner(&notebook.user_id, "notebook")?;
    }

    let original_name = form
        .pdf
        .raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload.pdf".to_string());

    rocket::tokio::fs::create_dir_all(&config.upload_dir).await?;
    let path: PathBuf = config
        .upload_dir
        .join(stored_file_name(form.pdf.name()));

    form.pdf.move_copy_to(&path).await?;
    info!(path = %path.display(), "Stored uploaded PDF");

    let text = match pdf::extract_text(&path).await {
        Ok(text) => text,
        Err(e) => {
            discard(&path).await;
            return Err(e);
        }
    };

    let stored = create_file_with_note(
        db,
        &user.id,
        notebook_id.as_deref(),
        &original_name,
        &path.to_string_lossy(),
        &text,
    )
    .await;

    let (file, note) = match stored {
        Ok(rows) => rows,
        Err(e) => {
            discard(&path).await;
            return Err(e);
        }
    };

    info!(file_id = %file.id, "Upload complete");

    Ok(Custom(
        Status::Created,
        Json(UploadResponse {
            extracted_text: pdf::preview(&text, EXTRACTED_PREVIEW_CHARS),
            note: NotePreview {
                id: note.id,
                content: pdf::preview(&note.content, NOTE_PREVIEW_CHARS),
            },
            file,
        }),
    ))
}

#[post("/user/data")]
pub async fn api_user_data(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserDataResponse>, AppError> {
    let files = get_files_for_user(db, &user.id).await?;
    let notes = get_notes_for_user(db, &user.id).await?;

    Ok(Json(UserDataResponse { files, notes }))
}

#[get("/user/settings")]
pub async fn api_get_settings(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SettingsResponse>, AppError> {
    let user = get_user(db, &user.id).await?;

    Ok(Json(SettingsResponse {
        name: user.name,
        email: user.email,
        username: user.username,
        custom_prompt: user.custom_prompt,
    }))
}

#[post("/user/settings/profile", data = "<profile>")]
pub async fn api_update_profile(
    user: AuthUser,
    profile: Json<ProfileRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SettingsResponse>, AppError> {
    let profile = profile.validate_request()?;
    let username = profile.username.as_deref().map(str::trim);
    if username == Some("") {
        return Err(AppError::Validation(
            "Username cannot be blank".to_string(),
        ));
    }

    let updated = update_user_profile(
        db,
        &user.id,
        profile.name.as_deref().map(str::trim),
        username,
        profile.custom_prompt.as_deref(),
    )
    .await?;

    Ok(Json(SettingsResponse {
        name: updated.name,
        email: updated.email,
        username: updated.username,
        custom_prompt: updated.custom_prompt,
    }))
}

#[get("/files/<id>")]
pub async fn api_get_file(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<FileDetailResponse>, AppError> {
    let file = get_file(db, id).await?;
    user.require_owner(&file.user_id, "file")?;

    Ok(Json(FileDetailResponse {
        note: get_note_for_file(db, id).await?,
        summary: get_summary_for_file(db, id).await?,
        flashcards: get_flashcards_for_file(db, id).await?,
        quiz: get_quiz_for_file(db, id).await?,
        file,
    }))
}
