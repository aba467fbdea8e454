use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::api::MessageResponse;
use crate::auth::AuthUser;
use crate::db::{create_notebook, delete_notebook, get_notebook, get_notebooks, rename_notebook};
use crate::error::AppError;
use crate::models::{Notebook, NotebookWithCount};
use crate::validation::ValidateRequest;

#[derive(Debug, Deserialize, Default)]
pub struct CreateNotebookRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RenameNotebookRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: String,
}

/// A missing body is treated the same as an empty one.
#[post("/notebooks", data = "<request>")]
pub async fn api_create_notebook(
    user: AuthUser,
    request: Option<Json<CreateNotebookRequest>>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<Notebook>>, AppError> {
    let request = request.map(Json::into_inner).unwrap_or_default();
    let notebook = create_notebook(db, &user.id, request.title.as_deref()).await?;

    Ok(Custom(Status::Created, Json(notebook)))
}

#[get("/notebooks")]
pub async fn api_get_notebooks(
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<NotebookWithCount>>, AppError> {
    Ok(Json(get_notebooks(db, &user.id).await?))
}

#[put("/notebooks/<id>", data = "<request>")]
pub async fn api_rename_notebook(
    id: &str,
    user: AuthUser,
    request: Json<RenameNotebookRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Notebook>, AppError> {
    let request = request.validate_request()?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title cannot be blank".to_string()));
    }

    let notebook = get_notebook(db, id).await?;
    user.require_owner(&notebook.user_id, "notebook")?;

    Ok(Json(rename_notebook(db, id, title).await?))
}

#[delete("/notebooks/<id>")]
pub async fn api_delete_notebook(
    id: &str,
    user: AuthUser,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, AppError> {
    let notebook = get_notebook(db, id).await?;
    user.require_owner(&notebook.user_id, "notebook")?;

    delete_notebook(db, id).await?;
    Ok(MessageResponse::new("Notebook deleted successfully"))
}
