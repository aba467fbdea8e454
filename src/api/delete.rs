use std::io::ErrorKind;

use rocket::State;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::api::MessageResponse;
use crate::auth::AuthUser;
use crate::db::{
    delete_file, delete_flashcard, delete_flashcard_set, delete_flashcards_for_file,
    delete_quiz_for_file, delete_quiz_question, delete_quiz_set, delete_summary, get_file,
    get_flashcard, get_quiz_question, get_summary,
};
use crate::error::AppError;

async fn require_file_owner(
    db: &Pool<Sqlite>,
    user: &AuthUser,
    file_id: &str,
) -> Result<(), AppError> {
    let file = get_file(db, file_id).await?;
    user.require_owner(&file.user_id, "file")
}

#[delete("/delete/file/<id>")]
pub async fn api_delete_file(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let file = get_file(db, id).await?;
    user.require_owner(&file.user_id, "file")?;

    delete_file(db, id).await?;

    // A missing file on disk does not fail the request.
    match rocket::tokio::fs::remove_file(&file.filepath).await {
        Ok(()) => info!(path = %file.filepath, "Removed uploaded file from disk"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %file.filepath, "Uploaded file was already missing from disk")
        }
        Err(e) => warn!(path = %file.filepath, error = %e, "Failed to remove uploaded file"),
    }

    Ok(MessageResponse::new("File deleted successfully"))
}

#[delete("/delete/quiz/<id>")]
pub async fn api_delete_quiz_question(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let question = get_quiz_question(db, id).await?;
    require_file_owner(db, &user, &question.file_id).await?;

    delete_quiz_question(db, id).await?;
    Ok(MessageResponse::new("Quiz question deleted successfully"))
}

#[delete("/delete/quiz/file/<file_id>")]
pub async fn api_delete_quiz_for_file(
    file_id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    require_file_owner(db, &user, file_id).await?;

    let count = delete_quiz_for_file(db, file_id).await?;
    Ok(MessageResponse::new(format!("Deleted {} quiz questions", count)))
}

#[delete("/delete/quiz/set/<set_id>")]
pub async fn api_delete_quiz_set(
    set_id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let count = delete_quiz_set(db, &user.id, set_id).await?;
    if count == 0 {
        return Err(AppError::NotFound("Quiz set not found".to_string()));
    }

    Ok(MessageResponse::new(format!("Deleted {} quiz questions", count)))
}

#[delete("/delete/flashcards/<id>")]
pub async fn api_delete_flashcard(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let card = get_flashcard(db, id).await?;
    require_file_owner(db, &user, &card.file_id).await?;

    delete_flashcard(db, id).await?;
    Ok(MessageResponse::new("Flashcard deleted successfully"))
}

#[delete("/delete/flashcards/file/<file_id>")]
pub async fn api_delete_flashcards_for_file(
    file_id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    require_file_owner(db, &user, file_id).await?;

    let count = delete_flashcards_for_file(db, file_id).await?;
    Ok(MessageResponse::new(format!("Deleted {} flashcards", count)))
}

#[delete("/delete/flashcards/set/<set_id>")]
pub async fn api_delete_flashcard_set(
    set_id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let count = delete_flashcard_set(db, &user.id, set_id).await?;
    if count == 0 {
        return Err(AppError::NotFound("Flashcard set not found".to_string()));
    }

    Ok(MessageResponse::new(format!("Deleted {} flashcards", count)))
}

#[delete("/delete/summary/<id>")]
pub async fn api_delete_summary(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let summary = get_summary(db, id).await?;
    require_file_owner(db, &user, &summary.file_id).await?;

    delete_summary(db, id).await?;
    Ok(MessageResponse::new("Summary deleted successfully"))
}
