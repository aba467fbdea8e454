//! Source resolution, model calls and persistence for the study tools.

use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::ai::response::{self, FlashcardDraft, QuizDraft};
use crate::ai::{LanguageModel, ModelRequest, ResponseFormat, prompt};
use crate::auth::AuthUser;
use crate::db;
use crate::error::AppError;
use crate::models::{ChatRole, ChatTurn, Flashcard, Quiz, User};

pub const DEFAULT_COUNT: u32 = 5;
pub const MAX_COUNT: u32 = 50;

/// Where the text to work from comes from, in order of precedence.
#[derive(Debug, Default, Clone)]
pub struct SourceSelector {
    pub file_ids: Vec<String>,
    pub file_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Source {
    pub text: String,
    /// Set when the text came from exactly one file; results are stored against it.
    pub file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryOutcome {
    pub summary: String,
    pub saved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardsOutcome {
    pub flashcards: Vec<FlashcardView>,
    pub set_id: Option<String>,
    pub saved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    pub quiz: Vec<QuizView>,
    pub set_id: Option<String>,
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatOutcome {
    pub role: ChatRole,
    pub content: String,
    pub saved: bool,
}

/// A flashcard as returned to the client, stored or not.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanations: std::collections::BTreeMap<String, String>,
    pub hint: Option<String>,
}

impl From<Flashcard> for FlashcardView {
    fn from(card: Flashcard) -> Self {
        Self {
            id: Some(card.id),
            front: card.front,
            back: card.back,
        }
    }
}

impl From<FlashcardDraft> for FlashcardView {
    fn from(draft: FlashcardDraft) -> Self {
        Self {
            id: None,
            front: draft.front,
            back: draft.back,
        }
    }
}

impl From<Quiz> for QuizView {
    fn from(q: Quiz) -> Self {
        Self {
            id: Some(q.id),
            question: q.question,
            options: q.options,
            answer: q.answer,
            explanations: q.explanations,
            hint: q.hint,
        }
    }
}

impl From<QuizDraft> for QuizView {
    fn from(q: QuizDraft) -> Self {
        Self {
            id: None,
            question: q.question,
            options: q.options,
            answer: q.answer,
            explanations: q.explanations,
            hint: q.hint,
        }
    }
}

pub fn validate_count(count: Option<i64>) -> Result<u32, AppError> {
    match count {
        None => Ok(DEFAULT_COUNT),
        Some(n) if (1..=MAX_COUNT as i64).contains(&n) => Ok(n as u32),
        Some(_) => Err(AppError::Validation(format!(
            "count must be between 1 and {}",
            MAX_COUNT
        ))),
    }
}

async fn owned_note(
    pool: &Pool<Sqlite>,
    user: &AuthUser,
    file_id: &str,
) -> Result<String, AppError> {
    let file = db::get_file(pool, file_id).await?;
    user.require_owner(&file.user_id, "file")?;

    match db::get_note_for_file(pool, file_id).await? {
        Some(note) => Ok(note.content),
        None => Err(AppError::NotFound("Note not found for this file".to_string())),
    }
}

#[instrument(skip(pool, user, selector))]
pub async fn resolve_source(
    pool: &Pool<Sqlite>,
    user: &AuthUser,
    selector: SourceSelector,
) -> Result<Source, AppError> {
    if !selector.file_ids.is_empty() {
        info!(files = selector.file_ids.len(), "Resolving source from several files");
        let mut notes = Vec::with_capacity(selector.file_ids.len());
        for file_id in &selector.file_ids {
            notes.push(owned_note(pool, user, file_id).await?);
        }

        let file_id = match selector.file_ids.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };

        return Ok(Source {
            text: notes.join("\n"),
            file_id,
        });
    }

    if let Some(file_id) = selector.file_id.filter(|id| !id.trim().is_empty()) {
        let text = owned_note(pool, user, &file_id).await?;
        return Ok(Source {
            text,
            file_id: Some(file_id),
        });
    }

    match selector.text.filter(|t| !t.trim().is_empty()) {
        Some(text) => Ok(Source {
            text,
            file_id: None,
        }),
        None => Err(AppError::Validation(
            "Text or fileId is required".to_string(),
        )),
    }
}

/// Logs a failed write that happens after a successful generation.
fn report_unsaved(err: &AppError, what: &str) {
    warn!(what = %what, "Generated content was not saved");
    err.log_and_record(&format!("Persisting generated {}", what));
}

#[instrument(skip_all, fields(file_id = ?source.file_id))]
pub async fn summarize(
    pool: &Pool<Sqlite>,
    model: &dyn LanguageModel,
    owner: &User,
    source: Source,
) -> Result<SummaryOutcome, AppError> {
    info!("Generating summary");
    let request = ModelRequest::single(
        prompt::summary_prompt(&source.text, owner.custom_instruction()),
        ResponseFormat::Text,
    );
    let summary = response::parse_summary(&model.generate(&request).await?)?;

    let saved = match &source.file_id {
        Some(file_id) => match db::upsert_summary(pool, file_id, &summary).await {
            Ok(_) => true,
            Err(e) => {
                report_unsaved(&e, "summary");
                false
            }
        },
        None => false,
    };

    Ok(SummaryOutcome { summary, saved })
}

#[instrument(skip_all, fields(file_id = ?source.file_id, count = count))]
pub async fn generate_flashcards(
    pool: &Pool<Sqlite>,
    model: &dyn LanguageModel,
    owner: &User,
    source: Source,
    count: u32,
) -> Result<FlashcardsOutcome, AppError> {
    info!("Generating flashcards");
    let request = ModelRequest::single(
        prompt::flashcards_prompt(&source.text, count, owner.custom_instruction()),
        ResponseFormat::Json,
    );
    let drafts = response::parse_flashcards(&model.generate(&request).await?, count as usize)?;

    let Some(file_id) = &source.file_id else {
        return Ok(FlashcardsOutcome {
            flashcards: drafts.into_iter().map(FlashcardView::from).collect(),
            set_id: None,
            saved: false,
        });
    };

    match db::replace_flashcards(pool, file_id, &drafts).await {
        Ok((set_id, cards)) => Ok(FlashcardsOutcome {
            flashcards: cards.into_iter().map(FlashcardView::from).collect(),
            set_id: Some(set_id),
            saved: true,
        }),
        Err(e) => {
            report_unsaved(&e, "flashcards");
            Ok(FlashcardsOutcome {
                flashcards: drafts.into_iter().map(FlashcardView::from).collect(),
                set_id: None,
                saved: false,
            })
        }
    }
}

#[instrument(skip_all, fields(file_id = ?source.file_id, count = count))]
pub async fn generate_quiz(
    pool: &Pool<Sqlite>,
    model: &dyn LanguageModel,
    owner: &User,
    source: Source,
    count: u32,
) -> Result<QuizOutcome, AppError> {
    info!("Generating quiz");
    let request = ModelRequest::single(
        prompt::quiz_prompt(&source.text, count, owner.custom_instruction()),
        ResponseFormat::Json,
    );
    let drafts = response::parse_quiz(&model.generate(&request).await?, count as usize)?;

    let Some(file_id) = &source.file_id else {
        return Ok(QuizOutcome {
            quiz: drafts.into_iter().map(QuizView::from).collect(),
            set_id: None,
            saved: false,
        });
    };

    match db::replace_quiz(pool, file_id, &drafts).await {
        Ok((set_id, questions)) => Ok(QuizOutcome {
            quiz: questions.into_iter().map(QuizView::from).collect(),
            set_id: Some(set_id),
            saved: true,
        }),
        Err(e) => {
            report_unsaved(&e, "quiz");
            Ok(QuizOutcome {
                quiz: drafts.into_iter().map(QuizView::from).collect(),
                set_id: None,
                saved: false,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub file_id: Option<String>,
    /// History sent by the client. When absent, the stored transcript is used.
    pub history: Option<Vec<ChatTurn>>,
}

#[instrument(skip_all, fields(file_id = ?input.file_id))]
pub async fn chat(
    pool: &Pool<Sqlite>,
    model: &dyn LanguageModel,
    user: &AuthUser,
    owner: &User,
    input: ChatInput,
) -> Result<ChatOutcome, AppError> {
    let message = input.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::Validation("Message is required".to_string()));
    }

    let note = match &input.file_id {
        Some(file_id) => {
            let file = db::get_file(pool, file_id).await?;
            user.require_owner(&file.user_id, "file")?;
            db::get_note_for_file(pool, file_id).await?.map(|n| n.content)
        }
        None => None,
    };

    let mut turns = match input.history {
        Some(history) => history,
        None => db::get_conversation(pool, &user.id, input.file_id.as_deref())
            .await?
            .into_iter()
            .map(ChatTurn::from)
            .collect(),
    };

    info!(history = turns.len(), "Sending chat turn");

    let user_turn = ChatTurn {
        role: ChatRole::User,
        content: message,
    };
    turns.push(user_turn.clone());

    let request = ModelRequest {
        system: Some(prompt::chat_system(
            note.as_deref(),
            owner.custom_instruction(),
        )),
        turns,
        format: ResponseFormat::Text,
    };

    let reply = model.generate(&request).await?.trim().to_string();
    if reply.is_empty() {
        return Err(AppError::ModelResponse("Chat reply was empty".to_string()));
    }

    let assistant_turn = ChatTurn {
        role: ChatRole::Assistant,
        content: reply.clone(),
    };

    let saved = match db::append_messages(
        pool,
        &user.id,
        input.file_id.as_deref(),
        &[user_turn, assistant_turn],
    )
    .await
    {
        Ok(_) => true,
        Err(e) => {
            report_unsaved(&e, "chat messages");
            false
        }
    };

    Ok(ChatOutcome {
        role: ChatRole::Assistant,
        content: reply,
        saved,
    })
}
