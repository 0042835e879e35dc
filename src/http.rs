//! HTTP routes for the login flow, read-only queries and text-line admin.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::network::MatchCoordinator;
use crate::session::{AccountError, Accounts, AuthError};
use crate::store::{MemoryCorpus, TextCorpus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Login flow.
    pub accounts: Arc<Accounts>,
    /// Practice texts.
    pub corpus: Arc<MemoryCorpus>,
    /// Presence source.
    pub coordinator: Arc<MatchCoordinator>,
    /// Usernames allowed to manage text lines.
    pub admins: Arc<BTreeSet<String>>,
}

/// `{username, password}` body. Missing fields read as empty.
#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    /// Account name.
    #[serde(default)]
    pub username: String,
    /// Plaintext password.
    #[serde(default)]
    pub password: String,
}

/// `{auth_token}` body.
#[derive(Debug, Deserialize)]
pub struct TokenBody {
    /// Session token.
    #[serde(default)]
    pub auth_token: String,
}

/// `{text}` body.
#[derive(Debug, Deserialize)]
pub struct TextBody {
    /// Line to add.
    #[serde(default)]
    pub text: String,
}

/// Errors returned by the HTTP layer, always as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login flow failure.
    #[error(transparent)]
    Account(#[from] AccountError),
    /// Body missing, not JSON, or of the wrong shape.
    #[error("Invalid request data")]
    InvalidBody(#[from] JsonRejection),
    /// Authenticated, but not an admin.
    #[error("admin access required")]
    Forbidden,
    /// Blank text line.
    #[error("text must not be empty")]
    BlankText,
    /// Addressed resource does not exist.
    #[error("{0}")]
    NotFound(&'static str),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Account(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::InvalidBody(_) | ApiError::BlankText => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InvalidBody(rejection) = &self {
            debug!(error = %rejection.body_text(), "rejected request body");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authorize the bearer token and require an admin username.
async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or(AccountError::Token(AuthError::MissingToken))?;
    let username = state.accounts.verify(token).await?;
    if !state.admins.contains(&username) {
        return Err(ApiError::Forbidden);
    }
    Ok(username)
}

/// `POST /register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    state.accounts.register(&body.username, &body.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully" })),
    ))
}

/// `POST /login`
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let issued = state.accounts.login(&body.username, &body.password).await?;
    Ok(Json(json!({
        "message": "Login successful",
        "token": issued.token,
        "expires_at": issued.expires_at,
    })))
}

/// `POST /logout`
pub async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<TokenBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    state.accounts.logout(&body.auth_token).await?;
    Ok(Json(json!({ "message": "Logged out" })))
}

/// `POST /verify`
pub async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<TokenBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let username = state.accounts.verify(&body.auth_token).await?;
    Ok(Json(json!({ "username": username })))
}

/// `GET /get/textline/{index}`
pub async fn text_line(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state
        .corpus
        .line(index)
        .ok_or(ApiError::NotFound("text line not found"))?;
    Ok(Json(json!({ "index": index, "text": text })))
}

/// `GET /get/connected-users`
pub async fn connected_users(State(state): State<AppState>) -> impl IntoResponse {
    let users = state.coordinator.connected_users().await;
    Json(json!({ "users": users }))
}

/// `GET /get/victories/{username}`
pub async fn victories(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .accounts
        .victories(&username)
        .ok_or(ApiError::NotFound("user not found"))?;
    Ok(Json(json!({ "username": username, "victories": count })))
}

/// `GET /admin/textlines`
pub async fn list_text_lines(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(json!({ "lines": state.corpus.lines() })))
}

/// `POST /admin/textlines`
pub async fn add_text_line(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TextBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let Json(body) = payload?;
    let index = state.corpus.add_line(&body.text).ok_or(ApiError::BlankText)?;
    info!(user = %admin, index, "text line added");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "index": index, "text": body.text.trim() })),
    ))
}

/// `DELETE /admin/textlines/{index}`
pub async fn remove_text_line(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = require_admin(&state, &headers).await?;
    let removed = state
        .corpus
        .remove_line(index)
        .ok_or(ApiError::NotFound("text line not found"))?;
    info!(user = %admin, index, "text line removed");
    Ok(Json(json!({ "removed": removed })))
}

/// CORS for a browser frontend served from `origins`, with credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, InvalidHeaderValue> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true))
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/verify", post(verify))
        .route("/get/textline/{index}", get(text_line))
        .route("/get/connected-users", get(connected_users))
        .route("/get/victories/{username}", get(victories))
        .route("/admin/textlines", get(list_text_lines).post(add_text_line))
        .route("/admin/textlines/{index}", delete(remove_text_line))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Channel;
    use crate::session::account::tests::test_accounts;
    use crate::store::UserLedger;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state_with(accounts: Accounts, ledger: Arc<crate::store::MemoryLedger>) -> AppState {
        let corpus = Arc::new(MemoryCorpus::new(["first line", "second line"]));
        let coordinator = Arc::new(MatchCoordinator::new(corpus.clone(), ledger));
        AppState {
            accounts: Arc::new(accounts),
            corpus,
            coordinator,
            admins: Arc::new(BTreeSet::from(["root".to_string()])),
        }
    }

    fn app() -> (Router, AppState) {
        let (accounts, ledger) = test_accounts();
        let state = state_with(accounts, ledger);
        (build_router(state.clone()), state)
    }

    /// Send a request and return (status, JSON body or Null).
    async fn request(
        router: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        let body = match body {
            Some(text) => {
                builder = builder.header("content-type", "application/json");
                Body::from(text)
            }
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let body = (method != "GET").then(|| body.to_string());
        request(router, method, uri, &[], body).await
    }

    async fn login_as(router: &Router, username: &str) -> String {
        let creds = json!({ "username": username, "password": "pw" });
        send(router, "POST", "/register", creds.clone()).await;
        let (_, body) = send(router, "POST", "/login", creds).await;
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_register_login_verify_logout() {
        let (router, _) = app();
        let creds = json!({ "username": "alice", "password": "pw" });

        let (status, _) = send(&router, "POST", "/register", creds.clone()).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&router, "POST", "/login", creds.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login successful");
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["expires_at"].is_string());

        let (status, body) =
            send(&router, "POST", "/verify", json!({ "auth_token": token })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _) = send(&router, "POST", "/logout", json!({ "auth_token": token })).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(&router, "POST", "/verify", json!({ "auth_token": token })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (router, _) = app();
        let creds = json!({ "username": "alice", "password": "pw" });

        let (status, _) = send(&router, "POST", "/register", json!({ "username": "alice" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        send(&router, "POST", "/register", creds.clone()).await;
        let (status, body) = send(&router, "POST", "/register", creds.clone()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "username already exists");

        let (status, _) = send(
            &router,
            "POST",
            "/login",
            json!({ "username": "alice", "password": "wrong" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        send(&router, "POST", "/login", creds.clone()).await;
        let (status, _) = send(&router, "POST", "/login", creds).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_bad_bodies_get_json_errors() {
        let (router, _) = app();

        let (status, body) =
            request(&router, "POST", "/login", &[], Some("not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request data");

        let wrong_types = json!({ "username": 5, "password": true }).to_string();
        let (status, body) = request(&router, "POST", "/register", &[], Some(wrong_types)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request data");

        // No content-type at all
        let (status, body) = request(&router, "POST", "/verify", &[], None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request data");
    }

    #[tokio::test]
    async fn test_text_lines() {
        let (router, _) = app();

        let (status, body) = send(&router, "GET", "/get/textline/1", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "second line");

        let (status, body) = send(&router, "GET", "/get/textline/9", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_admin_text_line_management() {
        let (router, state) = app();
        let root = login_as(&router, "root").await;
        let bearer = format!("Bearer {root}");
        let auth = [("authorization", bearer.as_str())];

        let (status, body) = request(&router, "GET", "/admin/textlines", &auth, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"], json!(["first line", "second line"]));

        let add = json!({ "text": "  third line " }).to_string();
        let (status, body) = request(&router, "POST", "/admin/textlines", &auth, Some(add)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["index"], 2);
        assert_eq!(state.corpus.line(2).as_deref(), Some("third line"));

        let blank = json!({ "text": "   " }).to_string();
        let (status, body) = request(&router, "POST", "/admin/textlines", &auth, Some(blank)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = request(&router, "DELETE", "/admin/textlines/0", &auth, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], "first line");
        assert_eq!(
            state.corpus.lines(),
            vec!["second line".to_string(), "third line".to_string()]
        );

        let (status, _) = request(&router, "DELETE", "/admin/textlines/7", &auth, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_token() {
        let (router, state) = app();

        let (status, body) = request(&router, "GET", "/admin/textlines", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, _) = request(
            &router,
            "GET",
            "/admin/textlines",
            &[("authorization", "Bearer not.a.token")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let alice = login_as(&router, "alice").await;
        let bearer = format!("Bearer {alice}");
        let (status, body) = request(
            &router,
            "DELETE",
            "/admin/textlines/0",
            &[("authorization", bearer.as_str())],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "admin access required");
        assert_eq!(state.corpus.len(), 2);
    }

    #[tokio::test]
    async fn test_presence_and_victories() {
        let (router, state) = app();
        send(
            &router,
            "POST",
            "/register",
            json!({ "username": "alice", "password": "pw" }),
        )
        .await;

        let (channel, _rx) = Channel::pair("alice", 4);
        state.coordinator.attach(channel).await;
        let (status, body) = send(&router, "GET", "/get/connected-users", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"], json!(["alice"]));

        let (_, body) = send(&router, "GET", "/get/victories/alice", Value::Null).await;
        assert_eq!(body["victories"], 0);

        let (status, _) = send(&router, "GET", "/get/victories/nobody", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_victory_counter_visible() {
        let (accounts, ledger) = test_accounts();
        accounts.register("bob", "pw").await.unwrap();
        ledger.increment_victories("bob").unwrap();
        ledger.increment_victories("bob").unwrap();
        let router = build_router(state_with(accounts, ledger));

        let (_, body) = send(&router, "GET", "/get/victories/bob", Value::Null).await;
        assert_eq!(body["victories"], 2);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let (router, _) = app();
        let router = router.layer(cors_layer(&["http://localhost:8080".to_string()]).unwrap());

        let preflight = |origin: &'static str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/login")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap()
        };

        let resp = router
            .clone()
            .oneshot(preflight("http://localhost:8080"))
            .await
            .unwrap();
        let headers = resp.headers();
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            headers.get("access-control-allow-credentials").unwrap(),
            "true"
        );

        let resp = router.oneshot(preflight("http://evil.example")).await.unwrap();
        assert!(resp.headers().get("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_cors_rejects_bad_origin() {
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }
}
