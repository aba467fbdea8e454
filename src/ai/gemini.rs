use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::ChatRole;

use super::{LanguageModel, ModelRequest, ResponseFormat};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
        }],
    }
}

fn build_body(request: &ModelRequest) -> GenerateContentRequest {
    let contents = request
        .turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            text_content(Some(role), &turn.content)
        })
        .collect();

    GenerateContentRequest {
        system_instruction: request
            .system
            .as_deref()
            .map(|system| text_content(None, system)),
        contents,
        generation_config: match request.format {
            ResponseFormat::Json => Some(GenerationConfig {
                response_mime_type: "application/json",
            }),
            ResponseFormat::Text => None,
        },
    }
}

fn response_text(response: GenerateContentResponse) -> Result<String, AppError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AppError::ModelResponse(format!(
            "Prompt was blocked by the model: {}",
            reason
        )));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AppError::ModelResponse("Model returned no candidates".to_string()))?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AppError::ModelResponse(format!(
            "Model returned an empty response (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    Ok(text)
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        api_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_url, self.model)
    }
}

#[rocket::async_trait]
impl LanguageModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model, turns = request.turns.len()))]
    async fn generate(&self, request: &ModelRequest) -> Result<String, AppError> {
        info!("Calling language model");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let body: GenerateContentResponse = response.json().await?;
        response_text(body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatTurn;
    use serde_json::json;

    #[test]
    fn body_maps_roles_and_system_instruction() {
        let request = ModelRequest {
            system: Some("be brief".to_string()),
            turns: vec![
                ChatTurn {
                    role: ChatRole::User,
                    content: "hi".to_string(),
                },
                ChatTurn {
                    role: ChatRole::Assistant,
                    content: "hello".to_string(),
                },
            ],
            format: ResponseFormat::Text,
        };

        let body = serde_json::to_value(build_body(&request)).unwrap();

        assert_eq!(
            body,
            json!({
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]}
                ]
            })
        );
    }

    #[test]
    fn json_format_requests_json_mime_type() {
        let request = ModelRequest::single("cards please".to_string(), ResponseFormat::Json);
        let body = serde_json::to_value(build_body(&request)).unwrap();

        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn response_parts_are_joined() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "The sky "}, {"text": "is blue."}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        assert_eq!(response_text(response).unwrap(), "The sky is blue.");
    }

    #[test]
    fn blocked_prompt_is_a_model_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();

        let err = response_text(response).unwrap_err();
        assert!(matches!(err, AppError::ModelResponse(msg) if msg.contains("SAFETY")));
    }

    #[test]
    fn empty_candidate_is_a_model_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();

        let err = response_text(response).unwrap_err();
        assert!(matches!(err, AppError::ModelResponse(msg) if msg.contains("MAX_TOKENS")));
    }
}
