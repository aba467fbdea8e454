use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub custom_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub custom_prompt: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            name: user.name,
            username: user.username,
            custom_prompt: user.custom_prompt,
            created_at: user.created_at.unwrap_or_else(Utc::now),
        }
    }
}

impl User {
    /// The per-user steering instruction, if one is set and not blank.
    pub fn custom_instruction(&self) -> Option<&str> {
        self.custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotebookWithCount {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub filepath: String,
    pub user_id: String,
    pub notebook_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// List view of a file, without its extracted text.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub id: String,
    pub filename: String,
    pub notebook_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub content: String,
    pub file_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: String,
    pub content: String,
    pub file_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub file_id: String,
    pub set_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    pub explanations: BTreeMap<String, String>,
    pub hint: Option<String>,
    pub file_id: String,
    pub set_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuiz {
    pub id: String,
    pub question: String,
    pub options: Json<Vec<String>>,
    pub answer: String,
    pub explanations: Json<BTreeMap<String, String>>,
    pub hint: Option<String>,
    pub file_id: String,
    pub set_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbQuiz> for Quiz {
    fn from(db: DbQuiz) -> Self {
        Self {
            id: db.id,
            question: db.question,
            options: db.options.0,
            answer: db.answer,
            explanations: db.explanations.0,
            hint: db.hint,
            file_id: db.file_id,
            set_id: db.set_id,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub user_id: String,
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub user_id: String,
    pub file_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbMessage> for Message {
    fn from(db: DbMessage) -> Self {
        Self {
            id: db.id,
            // The CHECK constraint only admits the two known roles.
            role: ChatRole::parse(&db.role).unwrap_or(ChatRole::User),
            content: db.content,
            user_id: db.user_id,
            file_id: db.file_id,
            created_at: db.created_at,
        }
    }
}

/// One turn of a conversation as sent to the model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl From<Message> for ChatTurn {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
        }
    }
}
