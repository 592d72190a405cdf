use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::{AdminCredentials, SESSION_COOKIE, Session, SessionStore};
use crate::sites::{SiteError, SiteRecordManager};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SiteRecordManager>,
    pub sessions: Arc<SessionStore>,
    pub admin: AdminCredentials,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/auth", post(login).delete(logout))
        .route("/api/auth/session", get(check_session))
        .route(
            "/api/sites",
            get(list_sites).post(create_site).delete(delete_all_sites),
        )
        .route("/api/sites/batch", post(create_sites_batch))
        .route("/api/sites/:id", delete(delete_site))
        .route("/api/preview", get(preview_site))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error body; no stack traces leave the process.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<SiteError> for ApiError {
    fn from(err: SiteError) -> Self {
        let status = match &err {
            SiteError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SiteError::NotFound(_) => StatusCode::NOT_FOUND,
            SiteError::Upstream(_) | SiteError::Store(_) | SiteError::DeleteFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.trim().to_string())
    })
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = session_token(headers)
        .ok_or_else(|| ApiError::unauthorized("authentication required"))?;
    state
        .sessions
        .get_session(&token)
        .await
        .ok_or_else(|| ApiError::unauthorized("session expired or unknown"))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if !state.admin.matches(&req.username, &req.password) {
        return Err(ApiError::unauthorized("invalid credentials"));
    }

    let token = state.sessions.create_session(&req.username).await;
    tracing::info!(username = %req.username, "admin logged in");

    let cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400");
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(serde_json::json!({ "success": true })),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.delete_session(&token).await;
    }
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(serde_json::json!({ "success": true })),
    )
        .into_response()
}

async fn check_session(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let logged_in = match session_token(&headers) {
        Some(token) => state.sessions.get_session(&token).await.is_some(),
        None => false,
    };
    Json(serde_json::json!({ "loggedIn": logged_in })).into_response()
}

async fn list_sites(State(state): State<AppState>) -> Result<Response, ApiError> {
    let sites = state.manager.list_active_sites().await?;
    Ok(Json(sites).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateSiteRequest {
    url: String,
}

async fn create_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSiteRequest>,
) -> Result<Response, ApiError> {
    require_session(&state, &headers).await?;
    let site = state.manager.create_site(&req.url).await?;
    Ok((StatusCode::CREATED, Json(site)).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateSitesBatchRequest {
    urls: Vec<String>,
}

async fn create_sites_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSitesBatchRequest>,
) -> Result<Response, ApiError> {
    require_session(&state, &headers).await?;
    let outcome = state.manager.create_sites(&req.urls).await?;
    Ok(Json(outcome).into_response())
}

async fn delete_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    require_session(&state, &headers).await?;
    let report = state.manager.delete_site(&id).await?;
    Ok(Json(report).into_response())
}

async fn delete_all_sites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_session(&state, &headers).await?;
    let deleted = state.manager.delete_all().await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })).into_response())
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    url: String,
}

async fn preview_site(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, ApiError> {
    let analysis = state.manager.preview(&query.url).await?;
    Ok(Json(analysis).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt as _;

    use super::*;
    use crate::analyze::NoopAnalyzer;
    use crate::capture::{NoopScreenshotProvider, RetryPolicy};
    use crate::store::MemorySiteStore;

    fn test_state() -> AppState {
        let manager = SiteRecordManager::new(
            Arc::new(MemorySiteStore::new()),
            Arc::new(NoopScreenshotProvider),
            Arc::new(NoopAnalyzer),
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 1,
            delay: std::time::Duration::from_millis(1),
        })
        .with_settle_delay(std::time::Duration::from_millis(1));

        AppState {
            manager: Arc::new(manager),
            sessions: Arc::new(SessionStore::new()),
            admin: AdminCredentials {
                username: "admin".to_string(),
                password: "s3cret".to_string(),
            },
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login_cookie(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"username":"admin","password":"s3cret"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("login sets a cookie")
            .to_str()
            .unwrap();
        set_cookie
            .split(';')
            .next()
            .expect("cookie pair")
            .to_string()
    }

    #[tokio::test]
    async fn mutating_routes_require_a_session() {
        let app = router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sites")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url":"example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sites")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"username":"admin","password":"nope"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn listing_is_public() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sites")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_list_delete_round_trip() {
        let app = router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sites")
                    .header("content-type", "application/json")
                    .header(header::COOKIE, &cookie)
                    .body(Body::from(r#"{"url":"example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        // Without a capture provider the record degrades to the placeholder.
        assert_eq!(created["url"], "https://example.com");
        assert_eq!(created["hasError"], true);
        assert_eq!(created["title"], "example.com");
        let id = created["_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/sites")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/sites/{id}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["asset_deleted"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sites")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn deleting_an_unknown_site_is_404() {
        let app = router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sites/nope")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_answers_per_item_outcomes() {
        let app = router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sites/batch")
                    .header("content-type", "application/json")
                    .header(header::COOKIE, &cookie)
                    .body(Body::from(
                        r#"{"urls":["a.example","exa mple.com","b.example"]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = body_json(response).await;
        assert_eq!(outcome["created"], 2);
        assert_eq!(outcome["failed"], 1);
        assert_eq!(outcome["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn logout_invalidates_the_session() {
        let app = router(test_state());
        let cookie = login_cookie(&app).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/auth")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/sites")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
