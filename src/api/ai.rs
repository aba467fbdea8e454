use std::sync::Arc;

use rocket::State;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use crate::ai::LanguageModel;
use crate::auth::AuthUser;
use crate::db::{get_file, get_messages, get_user};
use crate::error::AppError;
use crate::generation::{
    self, ChatInput, ChatOutcome, FlashcardsOutcome, QuizOutcome, SourceSelector, SummaryOutcome,
};
use crate::models::{ChatTurn, Message};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRequest {
    pub text: Option<String>,
    pub file_id: Option<String>,
    pub file_ids: Option<Vec<String>>,
    pub count: Option<i64>,
}

impl GenerateRequest {
    fn selector(&self) -> SourceSelector {
        SourceSelector {
            file_ids: self.file_ids.clone().unwrap_or_default(),
            file_id: self.file_id.clone(),
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub file_id: Option<String>,
    pub conversation_history: Option<Vec<ChatTurn>>,
}

#[derive(FromForm)]
pub struct HistoryQuery {
    #[field(name = "fileId")]
    pub file_id: Option<String>,
}

#[post("/ai/summarize", data = "<request>")]
pub async fn api_summarize(
    user: AuthUser,
    request: Json<GenerateRequest>,
    db: &State<Pool<Sqlite>>,
    model: &State<Arc<dyn LanguageModel>>,
) -> Result<Json<SummaryOutcome>, AppError> {
    let owner = get_user(db, &user.id).await?;
    let source = generation::resolve_source(db, &user, request.selector()).await?;

    let outcome = generation::summarize(db, model.inner().as_ref(), &owner, source).await?;
    Ok(Json(outcome))
}

#[post("/ai/flashcards", data = "<request>")]
pub async fn api_flashcards(
    user: AuthUser,
    request: Json<GenerateRequest>,
    db: &State<Pool<Sqlite>>,
    model: &State<Arc<dyn LanguageModel>>,
) -> Result<Json<FlashcardsOutcome>, AppError> {
    let count = generation::validate_count(request.count)?;
    let owner = get_user(db, &user.id).await?;
    let source = generation::resolve_source(db, &user, request.selector()).await?;

    let outcome =
        generation::generate_flashcards(db, model.inner().as_ref(), &owner, source, count).await?;
    Ok(Json(outcome))
}

#[post("/ai/quiz", data = "<request>")]
pub async fn api_quiz(
    user: AuthUser,
    request: Json<GenerateRequest>,
    db: &State<Pool<Sqlite>>,
    model: &State<Arc<dyn LanguageModel>>,
) -> Result<Json<QuizOutcome>, AppError> {
    let count = generation::validate_count(request.count)?;
    let owner = get_user(db, &user.id).await?;
    let source = generation::resolve_source(db, &user, request.selector()).await?;

    let outcome =
        generation::generate_quiz(db, model.inner().as_ref(), &owner, source, count).await?;
    Ok(Json(outcome))
}

#[post("/ai/chat", data = "<request>")]
pub async fn api_chat(
    user: AuthUser,
    request: Json<ChatRequest>,
    db: &State<Pool<Sqlite>>,
    model: &State<Arc<dyn LanguageModel>>,
) -> Result<Json<ChatOutcome>, AppError> {
    let owner = get_user(db, &user.id).await?;
    let request = request.into_inner();

    let input = ChatInput {
        message: request.message,
        file_id: request.file_id.filter(|id| !id.trim().is_empty()),
        history: request.conversation_history,
    };

    let outcome = generation::chat(db, model.inner().as_ref(), &user, &owner, input).await?;
    Ok(Json(outcome))
}

#[get("/chat/history?<query..>")]
pub async fn api_chat_history(
    user: AuthUser,
    query: HistoryQuery,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Message>>, AppError> {
    let file_id = query.file_id.filter(|id| !id.trim().is_empty());

    if let Some(file_id) = &file_id {
        let file = get_file(db, file_id).await?;
        user.require_owner(&file.user_id, "file")?;
    }

    let messages = get_messages(db, &user.id, file_id.as_deref()).await?;
    Ok(Json(messages))
}
