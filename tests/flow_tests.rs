// tests/flow_tests.rs

//! End-to-end flows against a real Postgres. Skipped when DATABASE_URL is unset.

use lms_backend::{
    config::Config,
    models::user::Role,
    routes,
    state::AppState,
    utils::hash::hash_password,
};
use reqwest::Client;
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

struct TestApp {
    address: String,
    pool: PgPool,
    _uploads: TempDir,
}

async fn spawn_app() -> Option<TestApp> {
    spawn_app_with_pool_size(5).await
}

async fn spawn_app_with_pool_size(max_connections: u32) -> Option<TestApp> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(3))
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate test database");

    let uploads = tempfile::tempdir().expect("Failed to create upload dir");
    let config = Config {
        database_url,
        jwt_secret: "flow_test_secret".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        super_admin_email: None,
        super_admin_password: None,
        upload_dir: uploads.path().to_path_buf(),
        max_upload_bytes: 1024 * 1024,
        port: 0,
        cors_origins: vec![],
    };

    let app = routes::create_router(AppState::new(pool.clone(), config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp {
        address: format!("http://127.0.0.1:{}", port),
        pool,
        _uploads: uploads,
    })
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// Inserts an admin directly and returns its bearer header.
async fn admin_token(app: &TestApp, client: &Client) -> String {
    let email = format!("{}@example.com", unique("admin"));
    sqlx::query("INSERT INTO users (name, email, password, role) VALUES ($1, $2, $3, $4)")
        .bind("Flow Admin")
        .bind(&email)
        .bind(hash_password("admin-pass").unwrap())
        .bind(Role::Admin.as_str())
        .execute(&app.pool)
        .await
        .unwrap();

    login(app, client, &email, "admin-pass").await
}

async fn login(app: &TestApp, client: &Client, email: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/api/auth/login", app.address))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200, "login for {}", email);
    let body: Value = response.json().await.unwrap();
    format!("Bearer {}", body["token"].as_str().unwrap())
}

async fn create_batch(app: &TestApp, client: &Client, token: &str) -> i64 {
    let response = client
        .post(format!("{}/api/batches", app.address))
        .header("Authorization", token)
        .json(&json!({ "code": unique("B"), "name": "Flow batch" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn create_user(app: &TestApp, client: &Client, token: &str, role: &str, batches: &[i64]) -> (i64, String) {
    let email = format!("{}@example.com", unique(role));
    let response = client
        .post(format!("{}/api/users", app.address))
        .header("Authorization", token)
        .json(&json!({
            "name": format!("Flow {}", role),
            "email": email,
            "password": "secret-pass",
            "role": role,
            "batches": batches,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    (body["id"].as_i64().unwrap(), email)
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort();
    ids
}

async fn batch_students(app: &TestApp, client: &Client, token: &str, batch: i64) -> Vec<i64> {
    let detail: Value = client
        .get(format!("{}/api/batches/{}", app.address, batch))
        .header("Authorization", token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    detail["students"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect()
}

async fn user_batches(app: &TestApp, client: &Client, token: &str, user: i64) -> Vec<i64> {
    let profile: Value = client
        .get(format!("{}/api/users/{}", app.address, user))
        .header("Authorization", token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    sorted(
        profile["batches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["batch_id"].as_i64().unwrap())
            .collect(),
    )
}

async fn delete(app: &TestApp, client: &Client, token: &str, path: &str) -> reqwest::Response {
    client
        .delete(format!("{}{}", app.address, path))
        .header("Authorization", token)
        .send()
        .await
        .unwrap()
}

async fn create_course(app: &TestApp, client: &Client, token: &str, title: &str, batches: &[i64]) -> i64 {
    let response = client
        .post(format!("{}/api/courses", app.address))
        .header("Authorization", token)
        .json(&json!({ "title": title, "available_to_everyone": false, "batches": batches }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    response.json::<Value>().await.unwrap()["id"].as_i64().unwrap()
}

#[tokio::test]
async fn login_rejects_wrong_password_like_unknown_email() {
    let Some(app) = spawn_app().await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;
    let (_, email) = create_user(&app, &client, &admin, "student", &[]).await;

    for (email, password) in [(email.as_str(), "wrong-pass"), ("nobody@example.com", "secret-pass")] {
        let response = client
            .post(format!("{}/api/auth/login", app.address))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid email or password");
    }
}

#[tokio::test]
async fn quiz_attempt_and_reports() {
    let Some(app) = spawn_app().await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;

    // Arrange
    let batch = create_batch(&app, &client, &admin).await;
    let (_, email) = create_user(&app, &client, &admin, "student", &[batch]).await;
    let student = login(&app, &client, &email, "secret-pass").await;

    let quiz_name = unique("Ownership quiz");
    let response = client
        .post(format!("{}/api/quizzes", app.address))
        .header("Authorization", &admin)
        .json(&json!({
            "name": quiz_name,
            "total_marks": 20,
            "single_question_marks": 10,
            "pass_percentage": 50.0,
            "attempts_enabled": true,
            "attempts": 1,
            "available_to_everyone": false,
            "batches": [batch],
            "questions": [
                { "text": "Who owns a moved value?", "type": "single_choice", "options": [
                    { "text": "The receiver", "is_correct": true },
                    { "text": "The sender", "is_correct": false }
                ]},
                { "text": "Borrowed data must ___ the borrow", "type": "fill_blank", "options": [
                    { "text": "outlive", "is_correct": true }
                ]}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let quiz_id = response.json::<Value>().await.unwrap()["id"].as_i64().unwrap();

    // The student's view carries no answer key
    let view: Value = client
        .get(format!("{}/api/quizzes/{}", app.address, quiz_id))
        .header("Authorization", &student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!view.to_string().contains("is_correct"));
    let questions = view["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 2);
    let single = questions[0]["id"].as_str().unwrap().to_string();
    let blank = questions[1]["id"].as_str().unwrap().to_string();

    // Act
    let response = client
        .post(format!("{}/api/quizzes/{}/attempts", app.address, quiz_id))
        .header("Authorization", &student)
        .json(&json!({
            "time_spent_seconds": 42,
            "answers": [
                { "question_id": single, "selected_option": "The receiver" },
                { "question_id": blank, "selected_options": ["wrong"] }
            ]
        }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let attempt: Value = response.json().await.unwrap();
    assert_eq!(attempt["score"]["marks_obtained"], 10);
    assert_eq!(attempt["score"]["correct_count"], 1);
    assert_eq!(attempt["score"]["incorrect_count"], 1);
    assert_eq!(attempt["score"]["result"], "pass");

    // The attempt limit is one
    let response = client
        .post(format!("{}/api/quizzes/{}/attempts", app.address, quiz_id))
        .header("Authorization", &student)
        .json(&json!({ "answers": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");

    // A quiz with attempts keeps its history
    let response = client
        .delete(format!("{}/api/quizzes/{}", app.address, quiz_id))
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains(&quiz_name));

    // A batch referenced by a quiz cannot be deleted
    let response = client
        .delete(format!("{}/api/batches/{}", app.address, batch))
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let report: Value = client
        .get(format!("{}/api/reports/quizzes", app.address))
        .query(&[("search", quiz_name.as_str())])
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["total"], 1);
    assert_eq!(report["items"][0]["total_attempts"], 1);
    assert_eq!(report["items"][0]["pass_count"], 1);
    assert_eq!(report["items"][0]["pass_percentage"], 100.0);

    let own: Value = client
        .get(format!("{}/api/reports/quizzes", app.address))
        .header("Authorization", &student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(own["total"], 1);
    assert_eq!(own["items"][0]["quiz_name"], quiz_name.as_str());
    assert_eq!(own["items"][0]["marks_obtained"], 10);

    let detail: Value = client
        .get(format!("{}/api/reports/quizzes/{}", app.address, quiz_id))
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["groups"][0]["total"], 1);
    assert_eq!(detail["groups"][0]["entries"][0]["user_email"], email.as_str());
}

#[tokio::test]
async fn quiz_outside_the_students_batches_is_hidden() {
    let Some(app) = spawn_app().await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;

    let assigned = create_batch(&app, &client, &admin).await;
    let other = create_batch(&app, &client, &admin).await;
    let (_, email) = create_user(&app, &client, &admin, "student", &[other]).await;
    let student = login(&app, &client, &email, "secret-pass").await;

    let response = client
        .post(format!("{}/api/quizzes", app.address))
        .header("Authorization", &admin)
        .json(&json!({
            "name": unique("Hidden"),
            "total_marks": 10,
            "single_question_marks": 10,
            "pass_percentage": 50.0,
            "available_to_everyone": false,
            "batches": [assigned],
            "questions": [{ "text": "Pick", "type": "single_choice", "options": [
                { "text": "A", "is_correct": true }
            ]}]
        }))
        .send()
        .await
        .unwrap();
    let quiz_id = response.json::<Value>().await.unwrap()["id"].as_i64().unwrap();

    let response = client
        .get(format!("{}/api/quizzes/{}", app.address, quiz_id))
        .header("Authorization", &student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn membership_toggle_and_batch_edit() {
    let Some(app) = spawn_app().await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;

    let a = create_batch(&app, &client, &admin).await;
    let b = create_batch(&app, &client, &admin).await;
    let c = create_batch(&app, &client, &admin).await;
    let (student_id, _) = create_user(&app, &client, &admin, "student", &[a, b]).await;
    let (trainer_id, _) = create_user(&app, &client, &admin, "trainer", &[]).await;

    let toggle = |user_id: i64, role: &'static str| {
        client
            .post(format!("{}/api/batches/{}/members", app.address, c))
            .header("Authorization", &admin)
            .json(&json!({ "user_id": user_id, "role": role }))
            .send()
    };

    let joined: Value = toggle(student_id, "student").await.unwrap().json().await.unwrap();
    assert_eq!(joined["outcome"], "joined");
    assert!(batch_students(&app, &client, &admin, c).await.contains(&student_id));
    assert_eq!(user_batches(&app, &client, &admin, student_id).await, sorted(vec![a, b, c]));

    let left: Value = toggle(student_id, "student").await.unwrap().json().await.unwrap();
    assert_eq!(left["outcome"], "left");
    assert!(batch_students(&app, &client, &admin, c).await.is_empty());
    assert_eq!(user_batches(&app, &client, &admin, student_id).await, sorted(vec![a, b]));

    let response = toggle(trainer_id, "student").await.unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // Replace A,B with B,C
    let response = client
        .put(format!("{}/api/users/{}", app.address, student_id))
        .header("Authorization", &admin)
        .json(&json!({ "batches": [b, c] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(user_batches(&app, &client, &admin, student_id).await, sorted(vec![b, c]));

    // Both sides agree
    assert!(batch_students(&app, &client, &admin, a).await.is_empty());
    assert_eq!(batch_students(&app, &client, &admin, c).await, vec![student_id]);

    // Emptied batches can now be deleted
    let response = client
        .delete(format!("{}/api/batches/{}", app.address, a))
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn batch_delete_names_each_blocker() {
    let Some(app) = spawn_app().await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;
    let batch = create_batch(&app, &client, &admin).await;
    let batch_path = format!("/api/batches/{}", batch);

    // Course
    let title = unique("Linked course");
    let course = create_course(&app, &client, &admin, &title, &[batch]).await;
    let response = delete(&app, &client, &admin, &batch_path).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "conflict");
    assert!(body["error"].as_str().unwrap().contains(&title));
    let response = delete(&app, &client, &admin, &format!("/api/courses/{}", course)).await;
    assert_eq!(response.status().as_u16(), 204);

    // Quiz
    let name = unique("Linked quiz");
    let response = client
        .post(format!("{}/api/quizzes", app.address))
        .header("Authorization", &admin)
        .json(&json!({
            "name": name,
            "total_marks": 10,
            "single_question_marks": 10,
            "pass_percentage": 50.0,
            "available_to_everyone": false,
            "batches": [batch],
            "questions": [{ "text": "Pick", "type": "single_choice", "options": [
                { "text": "A", "is_correct": true }
            ]}]
        }))
        .send()
        .await
        .unwrap();
    let quiz = response.json::<Value>().await.unwrap()["id"].as_i64().unwrap();
    let response = delete(&app, &client, &admin, &batch_path).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains(&name));
    // Nobody attempted it, so it can go
    let response = delete(&app, &client, &admin, &format!("/api/quizzes/{}", quiz)).await;
    assert_eq!(response.status().as_u16(), 204);

    // Member
    let (student, email) = create_user(&app, &client, &admin, "student", &[batch]).await;
    let response = delete(&app, &client, &admin, &batch_path).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains(&email));
    let response = delete(&app, &client, &admin, &format!("/api/users/{}", student)).await;
    assert_eq!(response.status().as_u16(), 204);

    let response = delete(&app, &client, &admin, &batch_path).await;
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn slow_upload_does_not_hold_a_database_connection() {
    let Some(app) = spawn_app_with_pool_size(1).await else { return };
    let client = Client::new();
    let admin = admin_token(&app, &client).await;
    let course = create_course(&app, &client, &admin, &unique("Uploads"), &[create_batch(&app, &client, &admin).await]).await;

    // Arrange: start a multipart upload and stop halfway through the file
    let boundary = "lmsflowboundary";
    let head = format!(
        "POST /api/courses/{course}/resources HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Authorization: {admin}\r\n\
         Content-Type: multipart/form-data; boundary={boundary}\r\n\
         Content-Length: 100000\r\n\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         Slides\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"slides.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n\
         %PDF-1.7"
    );
    let address = app.address.trim_start_matches("http://");
    let mut upload = tokio::net::TcpStream::connect(address).await.unwrap();
    upload.write_all(head.as_bytes()).await.unwrap();
    upload.flush().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    // Act: the single pooled connection must still be available
    let response = client
        .get(format!("{}/api/courses/{}", app.address, course))
        .header("Authorization", &admin)
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    drop(upload);
}
