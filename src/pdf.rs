use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::error::AppError;

/// Pulls the text layer out of a PDF on disk.
///
/// Runs on the blocking pool. A panic inside the extractor is reported as an
/// extraction failure. Image-only PDFs produce no text and are rejected.
#[instrument]
pub async fn extract_text(path: &Path) -> Result<String, AppError> {
    let owned: PathBuf = path.to_path_buf();

    let extracted = rocket::tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
        .await
        .map_err(|e| {
            warn!(error = %e, "PDF extractor panicked");
            AppError::Extraction("The PDF could not be parsed".to_string())
        })?
        .map_err(|e| AppError::Extraction(format!("The PDF could not be parsed: {}", e)))?;

    if extracted.trim().is_empty() {
        return Err(AppError::Extraction(
            "No text could be extracted from the PDF. The file might be image-based or empty."
                .to_string(),
        ));
    }

    info!(characters = extracted.chars().count(), "Extracted text from PDF");
    Ok(extracted)
}

/// Cuts `text` to at most `max` characters, marking the cut with `...`.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}
