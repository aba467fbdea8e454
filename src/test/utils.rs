#[cfg(test)]
pub mod test_utils {
    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, Once};
    use std::time::Duration;

    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::str::FromStr;
    use tempfile::TempDir;

    use crate::ai::{LanguageModel, ModelRequest};
    use crate::db::{create_file_with_note, create_user, update_user_profile};
    use crate::env::AppConfig;
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::models::{FileRecord, User};

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub static TEST_JWT_SECRET: &str = "test-jwt-secret";
    const MULTIPART_BOUNDARY: &str = "cognote-test-boundary";

    struct TestUser {
        email: String,
        name: Option<String>,
        custom_prompt: Option<String>,
    }

    struct TestFile {
        owner_email: String,
        filename: String,
        text: String,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        files: Vec<TestFile>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(mut self, email: &str, name: Option<&str>) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                name: name.map(String::from),
                custom_prompt: None,
            });
            self
        }

        pub fn user_with_prompt(mut self, email: &str, custom_prompt: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                name: None,
                custom_prompt: Some(custom_prompt.to_string()),
            });
            self
        }

        /// A stored PDF with its note, as if uploaded by `owner_email`.
        pub fn file(mut self, owner_email: &str, filename: &str, text: &str) -> Self {
            self.files.push(TestFile {
                owner_email: owner_email.to_string(),
                filename: filename.to_string(),
                text: text.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // One connection keeps every query on the same in-memory database.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let upload_dir = tempfile::tempdir()?;

            let mut users = HashMap::new();
            for user in &self.users {
                let mut created =
                    create_user(&pool, &user.email, STANDARD_PASSWORD, user.name.as_deref())
                        .await?;

                if let Some(prompt) = &user.custom_prompt {
                    created =
                        update_user_profile(&pool, &created.id, None, None, Some(prompt)).await?;
                }

                users.insert(user.email.clone(), created);
            }

            let mut files = HashMap::new();
            for file in &self.files {
                let owner = users
                    .get(&file.owner_email)
                    .ok_or_else(|| AppError::NotFound(file.owner_email.clone()))?;

                let path = upload_dir.path().join(&file.filename);
                std::fs::write(&path, pdf_with_text(&file.text))?;

                let (record, _) = create_file_with_note(
                    &pool,
                    &owner.id,
                    None,
                    &file.filename,
                    &path.to_string_lossy(),
                    &file.text,
                )
                .await?;

                files.insert(file.filename.clone(), record);
            }

            Ok(TestDb {
                pool,
                upload_dir,
                users,
                files,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub upload_dir: TempDir,
        pub users: HashMap<String, User>,
        pub files: HashMap<String, FileRecord>,
    }

    impl TestDb {
        pub fn user(&self, email: &str) -> &User {
            &self.users[email]
        }

        pub fn file(&self, filename: &str) -> &FileRecord {
            &self.files[filename]
        }

        pub fn upload_path(&self) -> PathBuf {
            self.upload_dir.path().to_path_buf()
        }

        pub async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .unwrap()
        }

        pub async fn count_for_file(&self, table: &str, file_id: &str) -> i64 {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {} WHERE file_id = ?",
                table
            ))
            .bind(file_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
        }
    }

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .user("ada@example.com", Some("Ada"))
            .user("grace@example.com", Some("Grace"))
            .file("ada@example.com", "biology.pdf", "Mitochondria are the powerhouse of the cell.")
            .file("grace@example.com", "compilers.pdf", "A lexer turns characters into tokens.")
            .build()
            .await
            .unwrap()
    }

    enum Scripted {
        Reply(String),
        Fail(String),
    }

    /// Language model double that replays queued replies and records every request.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn reply(&self, text: impl Into<String>) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Scripted::Reply(text.into()));
            self
        }

        pub fn fail(&self, message: impl Into<String>) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Scripted::Fail(message.into()));
            self
        }

        pub fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn last_request(&self) -> ModelRequest {
            self.requests
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("model was never called")
        }
    }

    #[rocket::async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, request: &ModelRequest) -> Result<String, AppError> {
            self.requests.lock().unwrap().push(request.clone());

            match self.replies.lock().unwrap().pop_front() {
                Some(Scripted::Reply(text)) => Ok(text),
                Some(Scripted::Fail(message)) => Err(AppError::ExternalService(message)),
                None => Err(AppError::ExternalService(
                    "No scripted reply left".to_string(),
                )),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    pub fn test_config(upload_dir: PathBuf) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: TEST_JWT_SECRET.to_string(),
            gemini_api_key: "test-key".to_string(),
            gemini_model: "scripted".to_string(),
            gemini_api_url: "http://127.0.0.1:9".to_string(),
            gemini_timeout: Duration::from_secs(5),
            upload_dir,
            frontend_url: "http://localhost:3000".to_string(),
        }
    }

    pub async fn setup_test_client(test_db: &TestDb, model: Arc<ScriptedModel>) -> Client {
        setup_test_client_with_upload_dir(test_db, model, test_db.upload_path()).await
    }

    pub async fn setup_test_client_with_upload_dir(
        test_db: &TestDb,
        model: Arc<ScriptedModel>,
        upload_dir: PathBuf,
    ) -> Client {
        let model: Arc<dyn LanguageModel> = model;
        let rocket = init_rocket(test_db.pool.clone(), test_config(upload_dir), model);

        Client::untracked(rocket)
            .await
            .expect("valid rocket instance")
    }

    pub async fn login_test_user(client: &Client, email: &str) -> String {
        let response = client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({"email": email, "password": STANDARD_PASSWORD}).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body: serde_json::Value = response.into_json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }

    fn pdf_document(operations: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    /// A one-page PDF whose text layer is `text`.
    pub fn pdf_with_text(text: &str) -> Vec<u8> {
        pdf_document(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ])
    }

    /// A valid PDF with a page but no text, like a scanned image.
    pub fn pdf_without_text() -> Vec<u8> {
        pdf_document(vec![
            Operation::new("re", vec![72.into(), 72.into(), 100.into(), 100.into()]),
            Operation::new("f", vec![]),
        ])
    }

    /// Builds a `multipart/form-data` body with one file part and any extra text fields.
    pub fn multipart_upload(
        filename: &str,
        content_type: &str,
        bytes: &[u8],
        fields: &[(&str, &str)],
    ) -> (ContentType, Vec<u8>) {
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    MULTIPART_BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }

        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"pdf\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                MULTIPART_BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

        let content_type = ContentType::new("multipart", "form-data")
            .with_params(("boundary", MULTIPART_BOUNDARY));

        (content_type, body)
    }

    pub fn flashcards_json(n: usize) -> String {
        let cards: Vec<_> = (0..n)
            .map(|i| json!({"front": format!("Question {}", i), "back": format!("Answer {}", i)}))
            .collect();
        serde_json::Value::Array(cards).to_string()
    }

    pub fn quiz_json(n: usize) -> String {
        let questions: Vec<_> = (0..n)
            .map(|i| {
                json!({
                    "question": format!("Question {}?", i),
                    "options": ["Alpha", "Beta", "Gamma", "Delta"],
                    "answer": "Beta",
                    "explanations": {"0": "No.", "1": "Yes.", "2": "No.", "3": "No."},
                    "hint": "Second letter."
                })
            })
            .collect();
        serde_json::Value::Array(questions).to_string()
    }
}
