//! Shared harness for the HTTP-level tests: a temp-file database, a mailer
//! that records (or refuses) messages, and a oneshot request helper.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use campusmate::auth::mailer::{MailError, Mailer};
use campusmate::auth::password::hash_password;
use campusmate::config::Config;
use campusmate::db::models::{User, UserRole};
use campusmate::state::AppState;
use campusmate::users::{self, NewUser};

pub const PASSWORD: &str = "correct-horse";

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<SentMail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn fail_next_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, subject: &str, body: String) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Task("relay refused the message".into()));
        }
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body,
        });
        Ok(())
    }
}

pub struct TestApp {
    // Held so the database file outlives the test
    pub _dir: TempDir,
    pub state: AppState,
    pub router: Router,
    pub mailer: Arc<RecordingMailer>,
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "integration-test-secret".to_string();
    config.auth.bcrypt_cost = 4;
    config
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(config())
}

pub fn spawn_app_with(mut config: Config) -> TestApp {
    let dir = TempDir::new().unwrap();
    config.database.path = Some(dir.path().join("test.db"));

    let pool = campusmate::db::create_pool(config.db_path()).unwrap();
    campusmate::db::run_migrations(&pool).unwrap();

    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(pool, config, mailer.clone());
    let router = campusmate::build_app(state.clone());

    TestApp {
        _dir: dir,
        state,
        router,
        mailer,
    }
}

impl TestApp {
    /// Insert a verified, active user and return it with an access token.
    pub fn user(&self, email: &str, role: UserRole) -> (User, String) {
        let hash = hash_password(PASSWORD, 4).unwrap();
        let conn = self.state.db.get().unwrap();
        let user = users::insert(
            &conn,
            &NewUser {
                email,
                password_hash: &hash,
                first_name: "Test",
                last_name: email.split('@').next().unwrap(),
                role,
                student_id: None,
                department: Some("Engineering"),
                is_verified: true,
            },
        )
        .unwrap();
        let token = self
            .state
            .tokens
            .issue_pair(&user, Utc::now())
            .unwrap()
            .access_token;
        (user, token)
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send a prepared request and return the raw response parts.
    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }
}
