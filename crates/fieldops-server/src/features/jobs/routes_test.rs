//! Router-level tests for the job API

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use crate::features::jobs::jobs_routes;
    use crate::features::FeatureState;
    use crate::jobs::queue::TaskQueue;
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use crate::jobs::types::{JobFilter, JobStatus, OwnerScope, TransitionFields};
    use crate::middleware::{USER_ID_HEADER, USER_ROLE_HEADER};
    use crate::storage::LocalArtifactStore;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const BOUNDARY: &str = "fieldops-test-boundary";

    struct TestApp {
        router: Router,
        store: Arc<MemoryJobStore>,
        // Held so queued ids are not rejected as closed
        _receiver: mpsc::Receiver<Uuid>,
        _dir: TempDir,
    }

    async fn app(max_upload_bytes: usize) -> TestApp {
        let dir = TempDir::new().unwrap();
        let artifacts = Arc::new(LocalArtifactStore::new(dir.path()).await.unwrap());
        let store = Arc::new(MemoryJobStore::new());
        let (queue, receiver) = TaskQueue::channel(16);
        let state = FeatureState::new(store.clone(), artifacts, queue, max_upload_bytes);

        TestApp {
            router: jobs_routes().with_state(state),
            store,
            _receiver: receiver,
            _dir: dir,
        }
    }

    fn request(method: Method, uri: &str, user: Option<Uuid>, body: Body) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        builder.body(body).unwrap()
    }

    fn json_request(uri: &str, user: Uuid, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(USER_ID_HEADER, user.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(uri: &str, user: Uuid, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n",
                file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"update_existing\"\r\n\r\ntrue");
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(USER_ID_HEADER, user.to_string())
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit_export(app: &TestApp, user: Uuid) -> Uuid {
        let response = app
            .router
            .clone()
            .oneshot(json_request("/exports", user, json!({"resource": "wards", "format": "csv"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        body["data"]["job_id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = app(1024).await;
        let response = app
            .router
            .clone()
            .oneshot(request(Method::GET, "/", None, Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_export_then_read_status() {
        let app = app(1024).await;
        let user = Uuid::new_v4();
        let job_id = submit_export(&app, user).await;

        let response = app
            .router
            .clone()
            .oneshot(request(Method::GET, &format!("/{}", job_id), Some(user), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["status"], json!("pending"));
        assert_eq!(body["data"]["kind"], json!("export"));
    }

    #[tokio::test]
    async fn test_submit_export_rejects_unknown_format() {
        let app = app(1024).await;
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                "/exports",
                Uuid::new_v4(),
                json!({"resource": "wards", "format": "docx"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_submit_export_rejects_format_without_renderer() {
        let app = app(1024).await;
        for format in ["excel", "pdf"] {
            let response = app
                .router
                .clone()
                .oneshot(json_request(
                    "/exports",
                    Uuid::new_v4(),
                    json!({"resource": "wards", "format": format}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{format}");
            let body = body_json(response).await;
            assert_eq!(body["error"]["code"], json!("VALIDATION_ERROR"));
        }
        let (jobs, total) = app
            .store
            .list(OwnerScope::Any, &JobFilter { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert!(jobs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_other_owner_cannot_see_job() {
        let app = app(1024).await;
        let owner = Uuid::new_v4();
        let job_id = submit_export(&app, owner).await;

        let response = app
            .router
            .clone()
            .oneshot(request(Method::GET, &format!("/{}", job_id), Some(Uuid::new_v4()), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let admin = Request::builder()
            .uri(format!("/{}", job_id))
            .header(USER_ID_HEADER, Uuid::new_v4().to_string())
            .header(USER_ROLE_HEADER, "admin")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(admin).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_accepted_then_conflict_once_terminal() {
        let app = app(1024).await;
        let user = Uuid::new_v4();
        let job_id = submit_export(&app, user).await;

        let response = app
            .router
            .clone()
            .oneshot(request(Method::POST, &format!("/{}/cancel", job_id), Some(user), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["data"]["cancel_requested"], json!(true));

        app.store
            .transition(
                job_id,
                JobStatus::Cancelled,
                TransitionFields::finished(Utc::now(), chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let response = app
            .router
            .clone()
            .oneshot(request(Method::DELETE, &format!("/{}", job_id), Some(user), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_download_before_completion_conflicts() {
        let app = app(1024).await;
        let user = Uuid::new_v4();
        let job_id = submit_export(&app, user).await;

        let response = app
            .router
            .clone()
            .oneshot(request(Method::GET, &format!("/{}/download", job_id), Some(user), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_import_template_is_csv_attachment() {
        let app = app(1024).await;
        let response = app
            .router
            .clone()
            .oneshot(request(Method::GET, "/templates/wards", Some(Uuid::new_v4()), Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.contains("wards_import_template.csv"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_multipart_import_is_accepted() {
        let app = app(1024).await;
        let user = Uuid::new_v4();
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("/imports/users", user, "users.csv", b"name,email\nA,a@x.in\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], json!("pending"));
        let job_id: Uuid = body["data"]["job_id"].as_str().unwrap().parse().unwrap();

        let job = app.store.get(job_id, OwnerScope::Owner(user)).await.unwrap();
        assert_eq!(job.owner_id, user);
        assert!(job.input_ref.is_some());
    }

    #[tokio::test]
    async fn test_import_over_limit_is_rejected() {
        let app = app(16).await;
        let response = app
            .router
            .clone()
            .oneshot(multipart_request(
                "/imports/users",
                Uuid::new_v4(),
                "users.csv",
                b"name,email\nSomeone,someone@example.org\n",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.store.list(OwnerScope::Any, &JobFilter { limit: 10, ..Default::default() }).await.unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_non_csv_and_export_only_resources() {
        let app = app(1024).await;
        let response = app
            .router
            .clone()
            .oneshot(multipart_request("/imports/users", Uuid::new_v4(), "users.xlsx", b"x"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .router
            .clone()
            .oneshot(multipart_request("/imports/voters", Uuid::new_v4(), "voters.csv", b"a\n1\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
