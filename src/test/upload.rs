#[cfg(test)]
mod tests {
    use rocket::http::Status;
    use serde_json::Value;

    use crate::test::test_utils::{
        ScriptedModel, bearer, create_standard_test_db, login_test_user, multipart_upload,
        pdf_with_text, pdf_without_text, setup_test_client, setup_test_client_with_upload_dir,
    };

    fn upload_dir_entries(path: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut entries: Vec<_> = std::fs::read_dir(path)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        entries
    }

    #[rocket::async_test]
    async fn pdf_upload_stores_file_and_note() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let token = login_test_user(&client, "ada@example.com").await;
        let before = upload_dir_entries(test_db.upload_dir.path()).len();

        let (content_type, body) = multipart_upload(
            "sample.pdf",
            "application/pdf",
            &pdf_with_text("The sky is blue."),
            &[],
        );

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();

        assert_eq!(body["file"]["filename"], "sample.pdf");
        assert!(body["file"].get("extractedText").is_none());
        assert!(body["extractedText"].as_str().unwrap().contains("sky is blue"));
        assert!(body["note"]["content"].as_str().unwrap().contains("sky is blue"));

        let stored = body["file"]["filepath"].as_str().unwrap();
        assert!(std::path::Path::new(stored).exists());
        assert!(stored.ends_with(".pdf"));
        assert!(stored.contains("sample-"));
        assert_eq!(upload_dir_entries(test_db.upload_dir.path()).len(), before + 1);

        let file_id = body["file"]["id"].as_str().unwrap();
        assert_eq!(test_db.count_for_file("notes", file_id).await, 1);
    }

    #[rocket::async_test]
    async fn upload_into_notebook_links_the_file() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let token = login_test_user(&client, "ada@example.com").await;

        let notebook: Value = client
            .post("/api/notebooks")
            .header(bearer(&token))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        let notebook_id = notebook["id"].as_str().unwrap();

        let (content_type, body) = multipart_upload(
            "cells.pdf",
            "application/pdf",
            &pdf_with_text("Cells divide by mitosis."),
            &[("notebookId", notebook_id)],
        );

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["file"]["notebookId"], notebook_id);
    }

    #[rocket::async_test]
    async fn non_pdf_is_rejected_before_touching_disk() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let token = login_test_user(&client, "ada@example.com").await;
        let before = upload_dir_entries(test_db.upload_dir.path());

        let (content_type, body) =
            multipart_upload("notes.txt", "text/plain", b"The sky is blue.", &[]);

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Only PDF files are allowed");

        assert_eq!(upload_dir_entries(test_db.upload_dir.path()), before);
        assert_eq!(test_db.count("files").await, 2);
    }

    #[rocket::async_test]
    async fn pdf_without_text_is_an_extraction_error_and_is_removed() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let token = login_test_user(&client, "ada@example.com").await;
        let before = upload_dir_entries(test_db.upload_dir.path());

        let (content_type, body) =
            multipart_upload("scan.pdf", "application/pdf", &pdf_without_text(), &[]);

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["error"], "Failed to extract text from PDF");

        assert_eq!(upload_dir_entries(test_db.upload_dir.path()), before);
        assert_eq!(test_db.count("files").await, 2);
    }

    #[rocket::async_test]
    async fn upload_into_someone_elses_notebook_is_forbidden() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let grace = login_test_user(&client, "grace@example.com").await;
        let ada = login_test_user(&client, "ada@example.com").await;

        let notebook: Value = client
            .post("/api/notebooks")
            .header(bearer(&grace))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();

        let (content_type, body) = multipart_upload(
            "sample.pdf",
            "application/pdf",
            &pdf_with_text("The sky is blue."),
            &[("notebookId", notebook["id"].as_str().unwrap())],
        );

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&ada))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn upload_requires_authentication() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;

        let (content_type, body) =
            multipart_upload("sample.pdf", "application/pdf", &pdf_with_text("x"), &[]);

        let response = client
            .post("/api/pdf/upload")
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[cfg(unix)]
    #[rocket::async_test]
    async fn upload_dir_on_another_filesystem_still_stores_the_file() {
        use std::os::unix::fs::MetadataExt;

        // Rocket buffers uploads under the system temp dir; the upload dir
        // must live on a different device for the move to cross filesystems.
        let shm = std::path::Path::new("/dev/shm");
        let temp_dev = std::fs::metadata(std::env::temp_dir()).map(|m| m.dev());
        let shm_dev = std::fs::metadata(shm).map(|m| m.dev());
        match (temp_dev, shm_dev) {
            (Ok(a), Ok(b)) if a != b => {}
            _ => {
                eprintln!("skipping: no second filesystem available at /dev/shm");
                return;
            }
        }

        let upload_dir = tempfile::tempdir_in(shm).unwrap();
        let test_db = create_standard_test_db().await;
        let client = setup_test_client_with_upload_dir(
            &test_db,
            ScriptedModel::new(),
            upload_dir.path().to_path_buf(),
        )
        .await;
        let token = login_test_user(&client, "ada@example.com").await;

        let (content_type, body) = multipart_upload(
            "sample.pdf",
            "application/pdf",
            &pdf_with_text("The sky is blue."),
            &[],
        );

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Created);
        let body: Value = response.into_json().await.unwrap();
        let stored = std::path::PathBuf::from(body["file"]["filepath"].as_str().unwrap());
        assert!(stored.starts_with(upload_dir.path()));
        assert!(stored.exists());
        assert_eq!(upload_dir_entries(upload_dir.path()), vec![stored]);
    }

    #[rocket::async_test]
    async fn upload_over_ten_mebibytes_is_payload_too_large() {
        let test_db = create_standard_test_db().await;
        let client = setup_test_client(&test_db, ScriptedModel::new()).await;
        let token = login_test_user(&client, "ada@example.com").await;
        let files_before = test_db.count("files").await;
        let stored_before = upload_dir_entries(test_db.upload_dir.path());

        let oversized = vec![b'%'; 10 * 1024 * 1024 + 512 * 1024];
        let (content_type, body) =
            multipart_upload("huge.pdf", "application/pdf", &oversized, &[]);

        let response = client
            .post("/api/pdf/upload")
            .header(bearer(&token))
            .header(content_type)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::PayloadTooLarge);
        assert_eq!(test_db.count("files").await, files_before);
        assert_eq!(upload_dir_entries(test_db.upload_dir.path()), stored_before);
    }
}
