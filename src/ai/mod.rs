pub mod gemini;
pub mod prompt;
pub mod response;

use crate::error::AppError;
use crate::models::ChatTurn;

pub use gemini::GeminiClient;

/// What the caller expects back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub turns: Vec<ChatTurn>,
    pub format: ResponseFormat,
}

impl ModelRequest {
    pub fn single(prompt: String, format: ResponseFormat) -> Self {
        Self {
            system: None,
            turns: vec![ChatTurn {
                role: crate::models::ChatRole::User,
                content: prompt,
            }],
            format,
        }
    }
}

/// One synchronous round trip to a generative model.
#[rocket::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<String, AppError>;

    fn model_name(&self) -> &str;
}
