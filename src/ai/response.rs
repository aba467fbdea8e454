//! Strict parsers for model output.
//!
//! The model is asked for bare JSON. Anything else, including JSON wrapped in
//! a Markdown code fence, is rejected with [`AppError::ModelResponse`] rather
//! than repaired.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizDraft {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanations: BTreeMap<String, String>,
    #[serde(default)]
    pub hint: Option<String>,
}

fn invalid(msg: impl Into<String>) -> AppError {
    AppError::ModelResponse(msg.into())
}

fn parse_array<T: DeserializeOwned>(raw: &str, max: usize) -> Result<Vec<T>, AppError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(invalid("Response was empty"));
    }

    if trimmed.starts_with("```") {
        return Err(invalid("Response was wrapped in a Markdown code fence"));
    }

    let items: Vec<T> = serde_json::from_str(trimmed)
        .map_err(|e| invalid(format!("Response did not match the expected schema: {}", e)))?;

    if items.is_empty() {
        return Err(invalid("Response contained no items"));
    }

    if items.len() > max {
        return Err(invalid(format!(
            "Response contained {} items but at most {} were requested",
            items.len(),
            max
        )));
    }

    Ok(items)
}

fn required_text(value: String, field: &str, index: usize) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("Item {} has an empty \"{}\"", index, field)));
    }
    Ok(trimmed.to_string())
}

pub fn parse_summary(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("Summary was empty"));
    }
    Ok(trimmed.to_string())
}

pub fn parse_flashcards(raw: &str, max: usize) -> Result<Vec<FlashcardDraft>, AppError> {
    parse_array::<FlashcardDraft>(raw, max)?
        .into_iter()
        .enumerate()
        .map(|(i, card)| {
            Ok(FlashcardDraft {
                front: required_text(card.front, "front", i)?,
                back: required_text(card.back, "back", i)?,
            })
        })
        .collect()
}

pub fn parse_quiz(raw: &str, max: usize) -> Result<Vec<QuizDraft>, AppError> {
    parse_array::<QuizDraft>(raw, max)?
        .into_iter()
        .enumerate()
        .map(|(i, q)| validate_question(q, i))
        .collect()
}

fn validate_question(q: QuizDraft, index: usize) -> Result<QuizDraft, AppError> {
    let question = required_text(q.question, "question", index)?;

    let options = q
        .options
        .into_iter()
        .map(|o| required_text(o, "options", index))
        .collect::<Result<Vec<_>, _>>()?;

    if options.len() < 2 {
        return Err(invalid(format!(
            "Item {} needs at least two options",
            index
        )));
    }

    let answer = required_text(q.answer, "answer", index)?;
    if !options.contains(&answer) {
        return Err(invalid(format!(
            "Item {} has an answer that is not one of its options",
            index
        )));
    }

    for key in q.explanations.keys() {
        let valid = (0..options.len()).any(|i| i.to_string() == *key);
        if !valid {
            return Err(invalid(format!(
                "Item {} has an explanation for unknown option \"{}\"",
                index, key
            )));
        }
    }

    let hint = q
        .hint
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());

    Ok(QuizDraft {
        question,
        options,
        answer,
        explanations: q.explanations,
        hint,
    })
}
