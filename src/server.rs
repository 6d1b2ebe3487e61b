// 🌐 HTTP API
// Register/login, add expenses and query period aggregations

use anyhow::{anyhow, Context};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregationResult, Aggregator};
use crate::auth::{self, AuthError};
use crate::config::Config;
use crate::db;
use crate::expense::{ExpenseError, ExpenseRecord, NewExpense};
use crate::period::Period;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(conn: Connection, config: Config) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
        }
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal(anyhow!("database lock poisoned")))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Invalid period specified")]
    InvalidPeriod,
    #[error(transparent)]
    Expense(#[from] ExpenseError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, key) = match &self {
            ApiError::Auth(AuthError::Store(_) | AuthError::Hash(_)) | ApiError::Internal(_) => {
                error!(error = ?self, "request failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response();
            }
            ApiError::Auth(AuthError::UserExists) => (StatusCode::CONFLICT, "message"),
            ApiError::Auth(AuthError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "message"),
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "message"),
            ApiError::InvalidPeriod | ApiError::Expense(_) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "error")
            }
        };

        warn!(status = status.as_u16(), reason = %self, "request rejected");
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), serde_json::Value::String(self.to_string()));
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Authenticated user extractor
// ============================================================================

/// Username behind the request's bearer token
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = auth::bearer_token(header)?;

        let conn = state.lock_db()?;
        let username = auth::authenticate(&conn, token, Utc::now())?;
        Ok(CurrentUser(username))
    }
}

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseQuery {
    pub period: Option<String>,
    pub category: Option<String>,
}

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Run bcrypt work on the blocking pool, never while holding the store lock
async fn run_blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .context("password hashing task failed")?;
    Ok(result?)
}

/// POST /register - Create a user
async fn register(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(credentials) = body?;
    let user = run_blocking(move || {
        auth::NewUser::new(&credentials.username, &credentials.password)
    })
    .await?;

    let conn = state.lock_db()?;
    auth::save_user(&conn, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    ))
}

/// POST /login - Exchange credentials for a session token
async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(credentials) = body?;
    let user = {
        let conn = state.lock_db()?;
        db::find_user(&conn, credentials.username.trim())?
    };

    let user = run_blocking(move || {
        auth::verify_login(&credentials.username, user, &credentials.password)
    })
    .await?;

    let conn = state.lock_db()?;
    let token = auth::issue_session(&conn, &user.username, state.config.token_ttl(), Utc::now())?;

    Ok(Json(json!({ "token": token })))
}

/// GET /get-expenses?period=daily|weekly|monthly&category=... - Aggregated expenses
async fn get_expenses(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ExpenseQuery>,
) -> ApiResult<Json<AggregationResult>> {
    let period = match query.period.as_deref() {
        None => Period::Daily,
        Some(value) => value.parse::<Period>().map_err(|_| ApiError::InvalidPeriod)?,
    };
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let (range, granularity) = period.resolve(Local::now().date_naive());

    let records = {
        let conn = state.lock_db()?;
        db::fetch_expenses(&conn, range.start, range.end, category)?
    };

    // A single-category report has nothing to zero-fill
    let mut aggregator = Aggregator::new(granularity);
    if category.is_none() {
        aggregator = aggregator.with_known_categories(state.config.categories.iter().cloned());
    }
    let result = aggregator.aggregate(&records);

    debug!(
        %user,
        %period,
        %range,
        ?category,
        records = records.len(),
        buckets = result.len(),
        "expenses aggregated"
    );

    Ok(Json(result))
}

/// POST /add-expense - Record an expense
async fn add_expense(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<NewExpense>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(new_expense) = body?;
    let expense = ExpenseRecord::try_from(new_expense)?;

    let conn = state.lock_db()?;
    let id = db::insert_expense(&conn, &expense)?;
    info!(%user, id, category = %expense.category, "expense added");

    Ok(Json(json!({ "message": "Expense added successfully" })))
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(allowed_origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(allowed_origin)
        .with_context(|| format!("Invalid CORS origin: {}", allowed_origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.allowed_origin)?;

    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/get-expenses", get(get_expenses))
        .route("/add-expense", post(add_expense))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let state = AppState::new(conn, Config::default());
        (router(state.clone()).unwrap(), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, body)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with_token(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn register_and_login(app: &Router) -> String {
        let credentials = json!({ "username": "alice", "password": "secret" });

        let (status, _) = send(app, post_json("/register", None, credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(app, post_json("/login", None, credentials)).await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let (app, _) = test_app();
        let credentials = json!({ "username": "bob", "password": "pw" });

        let (status, body) = send(&app, post_json("/register", None, credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User registered successfully");

        let (status, body) = send(&app, post_json("/register", None, credentials)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "User already exists");
    }

    #[tokio::test]
    async fn test_login_with_wrong_password() {
        let (app, _) = test_app();
        register_and_login(&app).await;

        let (status, body) = send(
            &app,
            post_json("/login", None, json!({ "username": "alice", "password": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_expenses_require_token() {
        let (app, _) = test_app();

        let request = Request::builder()
            .uri("/get-expenses")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Token is missing");

        let (status, body) = send(&app, get_with_token("/get-expenses", "bogus")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid token");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (app, state) = test_app();
        let token = register_and_login(&app).await;

        {
            let conn = state.db.lock().unwrap();
            conn.execute("UPDATE sessions SET expires_at = 0", []).unwrap();
        }

        let (status, body) = send(&app, get_with_token("/get-expenses", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Token has expired");
    }

    #[tokio::test]
    async fn test_add_then_get_daily_with_zero_fill() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();

        for (category, amount) in [("Food", 10.0), ("Travel", 5.0), ("Food", 2.5)] {
            let (status, body) = send(
                &app,
                post_json(
                    "/add-expense",
                    Some(&token),
                    json!({ "category": category, "amount": amount, "date": today }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Expense added successfully");
        }

        let (status, body) = send(&app, get_with_token("/get-expenses?period=daily", &token)).await;
        assert_eq!(status, StatusCode::OK);

        let bucket = &body[today.as_str()];
        assert!((bucket["total"].as_f64().unwrap() - 17.5).abs() < 1e-6);
        assert!((bucket["category_map"]["Food"].as_f64().unwrap() - 12.5).abs() < 1e-6);
        assert_eq!(bucket["category_map"]["Health"].as_f64(), Some(0.0));
        assert_eq!(bucket["category_map"].as_object().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_category_filter_skips_zero_fill() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;
        let today = Local::now().date_naive();

        for category in ["Food", "Travel"] {
            let (status, _) = send(
                &app,
                post_json(
                    "/add-expense",
                    Some(&token),
                    json!({ "category": category, "amount": 4, "date": today.to_string() }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(
            &app,
            get_with_token("/get-expenses?period=monthly&category=Travel", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let month_key = today.format("%Y-%m").to_string();
        let category_map = body[month_key.as_str()]["category_map"].as_object().unwrap();
        assert_eq!(category_map.len(), 1);
        assert!((category_map["Travel"].as_f64().unwrap() - 4.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_weekly_period_uses_iso_week_keys() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;
        let today = Local::now().date_naive();

        let (status, _) = send(
            &app,
            post_json(
                "/add-expense",
                Some(&token),
                json!({ "category": "Health", "amount": 9.99, "date": today.to_string() }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, get_with_token("/get-expenses?period=weekly", &token)).await;
        assert_eq!(status, StatusCode::OK);

        let key = crate::aggregate::Granularity::Week.period_key(today).to_string();
        assert!((body[key.as_str()]["total"].as_f64().unwrap() - 9.99).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_invalid_period() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;

        let (status, body) = send(&app, get_with_token("/get-expenses?period=yearly", &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid period specified");
    }

    #[tokio::test]
    async fn test_oversized_amount_is_rejected_and_reports_still_work() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;
        let today = Local::now().date_naive().to_string();

        for _ in 0..2 {
            let (status, body) = send(
                &app,
                post_json(
                    "/add-expense",
                    Some(&token),
                    json!({ "category": "Food", "amount": 5e28, "date": today }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].as_str().unwrap().contains("maximum"));
        }

        let (status, body) = send(&app, get_with_token("/get-expenses?period=daily", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_password_hashing_runs_without_the_store_lock() {
        let (_, state) = test_app();

        let guard = state.db.lock().unwrap();
        let user = run_blocking(|| auth::NewUser::new("dave", "pw")).await.unwrap();
        drop(guard);

        let conn = state.lock_db().unwrap();
        auth::save_user(&conn, &user).unwrap();
        assert!(db::find_user(&conn, "dave").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_expense_validation() {
        let (app, _) = test_app();
        let token = register_and_login(&app).await;

        let (status, body) = send(
            &app,
            post_json(
                "/add-expense",
                Some(&token),
                json!({ "category": "Food", "amount": 3, "date": "01/03/2024" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Invalid date"));

        let (status, body) = send(
            &app,
            post_json(
                "/add-expense",
                Some(&token),
                json!({ "category": "Food", "amount": -3, "date": "2024-03-01" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("negative"));

        let (status, body) = send(
            &app,
            post_json("/add-expense", Some(&token), json!({ "category": "Food" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let (app, _) = test_app();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/get-expenses")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn test_invalid_cors_origin_is_rejected() {
        assert!(cors_layer("bad\norigin").is_err());
    }
}
