use axum::{body::Body, http::Request};
use campus_portal::{
    AppConfig, AppState, InMemoryRepository, MailerState, MockMailer, RepositoryState,
    create_router,
    models::{AuthResponse, Campus, Student, User},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::util::ServiceExt;
use uuid::Uuid;

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
}

fn app_state() -> AppState {
    AppState {
        repo: Arc::new(InMemoryRepository::new()) as RepositoryState,
        mailer: Arc::new(MockMailer::new()) as MailerState,
        config: AppConfig::default(),
    }
}

async fn spawn_app() -> TestApp {
    let router = create_router(app_state());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp { address }
}

/// Registers a fresh association and returns the administrator's session.
async fn register(app: &TestApp, client: &reqwest::Client, name: &str) -> AuthResponse {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let response = client
        .post(format!("{}/auth/register-association", app.address))
        .json(&json!({
            "association_name": format!("{name} {suffix}"),
            "username": format!("{name}-{suffix}"),
            "email": format!("{name}-{suffix}@example.com"),
            "password": "correct-horse",
            "first_name": "Ada",
            "last_name": "Admin"
        }))
        .send()
        .await
        .expect("register failed");
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("req fail");
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_protected_routes_require_a_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    for path in ["/campuses", "/students", "/auth/me", "/admin/users"] {
        let response = client
            .get(format!("{}{}", app.address, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401, "{path} should be protected");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Access token required");
    }
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let session = register(&app, &client, "acme").await;

    let response = client
        .post(format!("{}/auth/login", app.address))
        .json(&json!({ "username": session.user.email, "password": "correct-horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let login: AuthResponse = response.json().await.unwrap();

    let response = client
        .get(format!("{}/auth/me", app.address))
        .bearer_auth(&login.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body.get("password_hash").is_none());
    let me: User = serde_json::from_value(body).unwrap();
    assert_eq!(me.id, session.user.id);
}

#[tokio::test]
async fn test_campus_and_student_lifecycle_across_tenants() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let acme = register(&app, &client, "acme").await;
    let other = register(&app, &client, "other").await;

    // Acme's admin creates a campus and a group containing it, then joins the group.
    let response = client
        .post(format!("{}/campuses", app.address))
        .bearer_auth(&acme.token)
        .json(&json!({ "name": "North", "address": "1 North Road" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let campus: Campus = response.json().await.unwrap();

    let response = client
        .post(format!("{}/admin/user-groups", app.address))
        .bearer_auth(&acme.token)
        .json(&json!({ "name": format!("North staff {}", Uuid::new_v4()), "campus_ids": [campus.id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let group: Value = response.json().await.unwrap();

    let response = client
        .post(format!("{}/admin/users/assign-group", app.address))
        .bearer_auth(&acme.token)
        .json(&json!({ "username_or_email": acme.user.username, "user_group_id": group["id"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{}/students", app.address))
        .bearer_auth(&acme.token)
        .json(&json!({
            "firstname": "Grace", "lastname": "Hopper", "email": "grace@example.com",
            "gpa": 3.7, "campus_id": campus.id
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let student: Student = response.json().await.unwrap();

    let listed: Vec<Student> = client
        .get(format!("{}/students", app.address))
        .bearer_auth(&acme.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    // The other association's admin sees neither the campus nor the student.
    let response = client
        .get(format!("{}/campuses/{}", app.address, campus.id))
        .bearer_auth(&other.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{}/students/{}", app.address, student.id))
        .bearer_auth(&other.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{}/students/{}", app.address, Uuid::new_v4()))
        .bearer_auth(&other.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .delete(format!("{}/campuses/{}", app.address, campus.id))
        .bearer_auth(&acme.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let router = create_router(app_state());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let doc: Value = serde_json::from_slice(&body_bytes).unwrap();
    assert!(doc["paths"]["/admin/users/assign-association"].is_object());
}

#[tokio::test]
async fn test_invalid_json_body_is_a_client_error() {
    let router = create_router(app_state());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
