use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::ai::response::{FlashcardDraft, QuizDraft};
use crate::error::AppError;
use crate::models::{
    ChatTurn, DbMessage, DbQuiz, DbUser, FileListing, FileRecord, Flashcard, Message, Note,
    Notebook, NotebookWithCount, Quiz, Summary, User,
};

pub const BCRYPT_COST: u32 = 10;
pub const UNTITLED_NOTEBOOK: &str = "Untitled Notebook";

const USER_COLUMNS: &str = "id, email, name, username, custom_prompt, created_at";
const FILE_COLUMNS: &str = "id, filename, filepath, user_id, notebook_id, created_at";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A unique constraint hit by a write that raced past its existence check
/// is reported the same way the check would have reported it.
pub(crate) fn conflict_or_db_error(err: sqlx::Error, message: &str) -> AppError {
    match err {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            AppError::Validation(message.to_string())
        }
        other => AppError::from(other),
    }
}

#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    name: Option<&str>,
) -> Result<User, AppError> {
    info!("Creating new user");

    let existing_user = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if existing_user.is_some() {
        return Err(AppError::Validation(
            "User already exists with this email".to_string(),
        ));
    }

    let hashed_password = bcrypt::hash(password, BCRYPT_COST)?;

    let row = sqlx::query_as::<_, DbUser>(&format!(
        "INSERT INTO users (id, email, password, name, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {}",
        USER_COLUMNS
    ))
    .bind(new_id())
    .bind(email)
    .bind(hashed_password)
    .bind(name)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_or_db_error(e, "User already exists with this email"))?;

    Ok(User::from(row))
}

#[instrument(skip(pool, password))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    let hash = sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    let Some(hash) = hash else {
        return Ok(None);
    };

    // A malformed stored hash counts as a failed login rather than a server error
    if !bcrypt::verify(password, &hash).unwrap_or(false) {
        return Ok(None);
    }

    find_user_by_email(pool, email).await
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: &str) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound("User not found".to_string())),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_email(
    pool: &Pool<Sqlite>,
    email: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE email = ?",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip(pool, custom_prompt))]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: &str,
    name: Option<&str>,
    username: Option<&str>,
    custom_prompt: Option<&str>,
) -> Result<User, AppError> {
    info!("Updating user profile");

    if let Some(username) = username {
        let taken = sqlx::query_scalar::<_, String>(
            "SELECT id FROM users WHERE username = ? AND id != ?",
        )
        .bind(username)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        if taken.is_some() {
            return Err(AppError::Validation(
                "Username is already taken".to_string(),
            ));
        }
    }

    let mut tx = pool.begin().await?;

    if let Some(name) = name {
        sqlx::query("UPDATE users SET name = ? WHERE id = ?")
            .bind(name)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(username) = username {
        sqlx::query("UPDATE users SET username = ? WHERE id = ?")
            .bind(username)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or_db_error(e, "Username is already taken"))?;
    }

    if let Some(custom_prompt) = custom_prompt {
        sqlx::query("UPDATE users SET custom_prompt = ? WHERE id = ?")
            .bind(custom_prompt)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    get_user(pool, user_id).await
}

#[instrument(skip(pool))]
pub async fn create_notebook(
    pool: &Pool<Sqlite>,
    user_id: &str,
    title: Option<&str>,
) -> Result<Notebook, AppError> {
    info!("Creating notebook");

    let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => {
            let titles = sqlx::query_scalar::<_, String>(
                "SELECT title FROM notebooks WHERE user_id = ? AND title LIKE ?",
            )
            .bind(user_id)
            .bind(format!("{} %", UNTITLED_NOTEBOOK))
            .fetch_all(pool)
            .await?;

            format!("{} {}", UNTITLED_NOTEBOOK, next_untitled_number(&titles))
        }
    };

    let now = Utc::now();
    let notebook = sqlx::query_as::<_, Notebook>(
        "INSERT INTO notebooks (id, title, user_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(title)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(notebook)
}

/// One past the highest "Untitled Notebook N" so a deleted notebook's number
/// is never handed out again while a later one exists.
fn next_untitled_number(titles: &[String]) -> u64 {
    titles
        .iter()
        .filter_map(|t| t.strip_prefix(UNTITLED_NOTEBOOK))
        .filter_map(|n| n.trim().parse::<u64>().ok())
        .max()
        .map_or(1, |n| n + 1)
}

#[instrument(skip(pool))]
pub async fn get_notebooks(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<NotebookWithCount>, AppError> {
    info!("Getting notebooks for user");
    let notebooks = sqlx::query_as::<_, NotebookWithCount>(
        "SELECT n.id, n.title, n.user_id, n.created_at, n.updated_at,
                (SELECT COUNT(*) FROM files f WHERE f.notebook_id = n.id) AS file_count
         FROM notebooks n
         WHERE n.user_id = ?
         ORDER BY n.updated_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(notebooks)
}

#[instrument(skip(pool))]
pub async fn get_notebook(pool: &Pool<Sqlite>, id: &str) -> Result<Notebook, AppError> {
    info!("Getting notebook");
    sqlx::query_as::<_, Notebook>("SELECT * FROM notebooks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Notebook not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn rename_notebook(
    pool: &Pool<Sqlite>,
    id: &str,
    title: &str,
) -> Result<Notebook, AppError> {
    info!("Renaming notebook");
    sqlx::query_as::<_, Notebook>(
        "UPDATE notebooks SET title = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(title)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Notebook not found".to_string()))
}

/// Files in the notebook are unlinked by the `ON DELETE SET NULL` constraint, not deleted.
#[instrument(skip(pool))]
pub async fn delete_notebook(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting notebook");
    let result = sqlx::query("DELETE FROM notebooks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notebook not found".to_string()));
    }

    Ok(())
}

#[instrument(skip(pool, extracted_text))]
pub async fn create_file_with_note(
    pool: &Pool<Sqlite>,
    user_id: &str,
    notebook_id: Option<&str>,
    filename: &str,
    filepath: &str,
    extracted_text: &str,
) -> Result<(FileRecord, Note), AppError> {
    info!("Storing uploaded file and its note");
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let file = sqlx::query_as::<_, FileRecord>(&format!(
        "INSERT INTO files (id, filename, filepath, extracted_text, user_id, notebook_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING {}",
        FILE_COLUMNS
    ))
    .bind(new_id())
    .bind(filename)
    .bind(filepath)
    .bind(extracted_text)
    .bind(user_id)
    .bind(notebook_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let note = sqlx::query_as::<_, Note>(
        "INSERT INTO notes (id, content, file_id, user_id, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(new_id())
    .bind(extracted_text)
    .bind(&file.id)
    .bind(user_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(notebook_id) = notebook_id {
        sqlx::query("UPDATE notebooks SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(notebook_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok((file, note))
}

#[instrument(skip(pool))]
pub async fn get_file(pool: &Pool<Sqlite>, id: &str) -> Result<FileRecord, AppError> {
    info!("Getting file");
    sqlx::query_as::<_, FileRecord>(&format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn get_files_for_user(
    pool: &Pool<Sqlite>,
    user_id: &str,
) -> Result<Vec<FileListing>, AppError> {
    info!("Getting files for user");
    let files = sqlx::query_as::<_, FileListing>(
        "SELECT id, filename, notebook_id, created_at FROM files
         WHERE user_id = ?
         ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(files)
}

/// Removes the row; notes, summaries, flashcards, quizzes and messages go with it.
#[instrument(skip(pool))]
pub async fn delete_file(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting file");
    let result = sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_note_for_file(
    pool: &Pool<Sqlite>,
    file_id: &str,
) -> Result<Option<Note>, AppError> {
    info!("Getting note for file");
    let note = sqlx::query_as::<_, Note>(
        "SELECT * FROM notes WHERE file_id = ? ORDER BY rowid ASC LIMIT 1",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await?;

    Ok(note)
}

#[instrument(skip(pool))]
pub async fn get_notes_for_user(pool: &Pool<Sqlite>, user_id: &str) -> Result<Vec<Note>, AppError> {
    info!("Getting notes for user");
    let notes = sqlx::query_as::<_, Note>(
        "SELECT * FROM notes WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(notes)
}

#[instrument(skip(pool, content))]
pub async fn upsert_summary(
    pool: &Pool<Sqlite>,
    file_id: &str,
    content: &str,
) -> Result<Summary, AppError> {
    info!("Upserting summary");
    let now = Utc::now();
    let summary = sqlx::query_as::<_, Summary>(
        "INSERT INTO summaries (id, content, file_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (file_id) DO UPDATE SET
             content = excluded.content,
             updated_at = excluded.updated_at
         RETURNING *",
    )
    .bind(new_id())
    .bind(content)
    .bind(file_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(summary)
}

#[instrument(skip(pool))]
pub async fn get_summary_for_file(
    pool: &Pool<Sqlite>,
    file_id: &str,
) -> Result<Option<Summary>, AppError> {
    info!("Getting summary for file");
    let summary = sqlx::query_as::<_, Summary>("SELECT * FROM summaries WHERE file_id = ?")
        .bind(file_id)
        .fetch_optional(pool)
        .await?;

    Ok(summary)
}

#[instrument(skip(pool))]
pub async fn get_summary(pool: &Pool<Sqlite>, id: &str) -> Result<Summary, AppError> {
    info!("Getting summary");
    sqlx::query_as::<_, Summary>("SELECT * FROM summaries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Summary not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn delete_summary(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting summary");
    sqlx::query("DELETE FROM summaries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Swaps the file's flashcards for a new set in one transaction.
#[instrument(skip(pool, drafts), fields(count = drafts.len()))]
pub async fn replace_flashcards(
    pool: &Pool<Sqlite>,
    file_id: &str,
    drafts: &[FlashcardDraft],
) -> Result<(String, Vec<Flashcard>), AppError> {
    info!("Replacing flashcards for file");
    let set_id = new_id();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM flashcards WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    let mut cards = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let card = sqlx::query_as::<_, Flashcard>(
            "INSERT INTO flashcards (id, front, back, file_id, set_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(new_id())
        .bind(&draft.front)
        .bind(&draft.back)
        .bind(file_id)
        .bind(&set_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        cards.push(card);
    }

    tx.commit().await?;

    Ok((set_id, cards))
}

#[instrument(skip(pool))]
pub async fn get_flashcards_for_file(
    pool: &Pool<Sqlite>,
    file_id: &str,
) -> Result<Vec<Flashcard>, AppError> {
    info!("Getting flashcards for file");
    let cards = sqlx::query_as::<_, Flashcard>(
        "SELECT * FROM flashcards WHERE file_id = ? ORDER BY rowid ASC",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;

    Ok(cards)
}

#[instrument(skip(pool))]
pub async fn get_flashcard(pool: &Pool<Sqlite>, id: &str) -> Result<Flashcard, AppError> {
    info!("Getting flashcard");
    sqlx::query_as::<_, Flashcard>("SELECT * FROM flashcards WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Flashcard not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn delete_flashcard(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting flashcard");
    sqlx::query("DELETE FROM flashcards WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_flashcards_for_file(
    pool: &Pool<Sqlite>,
    file_id: &str,
) -> Result<u64, AppError> {
    info!("Deleting all flashcards for file");
    let result = sqlx::query("DELETE FROM flashcards WHERE file_id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Only rows belonging to the user's own files are touched.
#[instrument(skip(pool))]
pub async fn delete_flashcard_set(
    pool: &Pool<Sqlite>,
    user_id: &str,
    set_id: &str,
) -> Result<u64, AppError> {
    info!("Deleting flashcard set");
    let result = sqlx::query(
        "DELETE FROM flashcards
         WHERE set_id = ? AND file_id IN (SELECT id FROM files WHERE user_id = ?)",
    )
    .bind(set_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool, drafts), fields(count = drafts.len()))]
pub async fn replace_quiz(
    pool: &Pool<Sqlite>,
    file_id: &str,
    drafts: &[QuizDraft],
) -> Result<(String, Vec<Quiz>), AppError> {
    info!("Replacing quiz for file");
    let set_id = new_id();
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM quizzes WHERE file_id = ?")
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

    let mut questions = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let row = sqlx::query_as::<_, DbQuiz>(
            "INSERT INTO quizzes
                 (id, question, options, answer, explanations, hint, file_id, set_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(new_id())
        .bind(&draft.question)
        .bind(Json(&draft.options))
        .bind(&draft.answer)
        .bind(Json(&draft.explanations))
        .bind(&draft.hint)
        .bind(file_id)
        .bind(&set_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        questions.push(Quiz::from(row));
    }

    tx.commit().await?;

    Ok((set_id, questions))
}

#[instrument(skip(pool))]
pub async fn get_quiz_for_file(pool: &Pool<Sqlite>, file_id: &str) -> Result<Vec<Quiz>, AppError> {
    info!("Getting quiz for file");
    let rows = sqlx::query_as::<_, DbQuiz>(
        "SELECT * FROM quizzes WHERE file_id = ? ORDER BY rowid ASC",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Quiz::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_quiz_question(pool: &Pool<Sqlite>, id: &str) -> Result<Quiz, AppError> {
    info!("Getting quiz question");
    sqlx::query_as::<_, DbQuiz>("SELECT * FROM quizzes WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Quiz::from)
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))
}

#[instrument(skip(pool))]
pub async fn delete_quiz_question(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting quiz question");
    sqlx::query("DELETE FROM quizzes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_quiz_for_file(pool: &Pool<Sqlite>, file_id: &str) -> Result<u64, AppError> {
    info!("Deleting all quiz questions for file");
    let result = sqlx::query("DELETE FROM quizzes WHERE file_id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool))]
pub async fn delete_quiz_set(
    pool: &Pool<Sqlite>,
    user_id: &str,
    set_id: &str,
) -> Result<u64, AppError> {
    info!("Deleting quiz set");
    let result = sqlx::query(
        "DELETE FROM quizzes
         WHERE set_id = ? AND file_id IN (SELECT id FROM files WHERE user_id = ?)",
    )
    .bind(set_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(pool, turns), fields(count = turns.len()))]
pub async fn append_messages(
    pool: &Pool<Sqlite>,
    user_id: &str,
    file_id: Option<&str>,
    turns: &[ChatTurn],
) -> Result<Vec<Message>, AppError> {
    info!("Appending chat messages");
    let mut tx = pool.begin().await?;

    let mut messages = Vec::with_capacity(turns.len());
    for turn in turns {
        let row = sqlx::query_as::<_, DbMessage>(
            "INSERT INTO messages (id, role, content, user_id, file_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(new_id())
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(user_id)
        .bind(file_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        messages.push(Message::from(row));
    }

    tx.commit().await?;

    Ok(messages)
}

/// Messages in the order they were written.
#[instrument(skip(pool))]
pub async fn get_messages(
    pool: &Pool<Sqlite>,
    user_id: &str,
    file_id: Option<&str>,
) -> Result<Vec<Message>, AppError> {
    info!("Getting chat history");
    let rows = match file_id {
        Some(file_id) => {
            sqlx::query_as::<_, DbMessage>(
                "SELECT * FROM messages WHERE user_id = ? AND file_id = ? ORDER BY rowid ASC",
            )
            .bind(user_id)
            .bind(file_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbMessage>(
                "SELECT * FROM messages WHERE user_id = ? ORDER BY rowid ASC",
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(Message::from).collect())
}

/// The conversation a chat turn continues. Without a file this is general
/// chat only, so file-scoped messages never leak into it.
#[instrument(skip(pool))]
pub async fn get_conversation(
    pool: &Pool<Sqlite>,
    user_id: &str,
    file_id: Option<&str>,
) -> Result<Vec<Message>, AppError> {
    info!("Getting conversation");
    let rows = sqlx::query_as::<_, DbMessage>(
        "SELECT * FROM messages WHERE user_id = ? AND file_id IS ? ORDER BY rowid ASC",
    )
    .bind(user_id)
    .bind(file_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Message::from).collect())
}
