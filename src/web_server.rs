use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::{parse_recipients, Job, Letter},
    error::{Error, Result},
    launcher::AppState,
    provider::SenderCredentials,
    session::{expired_cookie, session_id},
};

const LOGIN_PAGE: &str = include_str!("../public/login.html");
const LAUNCHER_PAGE: &str = include_str!("../public/launcher.html");

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid: Vec<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    sender_email: String,
    #[serde(default)]
    sender_secret: String,
    sender_name: Option<String>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    message: String,
    recipients: Option<String>,
}

#[derive(Deserialize)]
pub struct QuotaQuery {
    sender: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub sender: String,
    pub remaining: u32,
    pub cap: u32,
}

/// a valid, unexpired session cookie on an unlocked launcher
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    !state.is_locked()
        && session_id(headers)
            .map(|id| state.sessions.is_valid(&id))
            .unwrap_or(false)
}

fn malformed(rejection: JsonRejection) -> Response {
    (
        rejection.status(),
        Json(ApiResponse::failed(rejection.body_text())),
    )
        .into_response()
}

async fn index() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    if state.is_locked() {
        return Json(ApiResponse::failed("Reset in progress")).into_response();
    }

    let login = match body {
        Ok(Json(login)) => login,
        Err(rejection) => return malformed(rejection),
    };

    if !state.check_credentials(&login.username, &login.password) {
        warn!("rejected login attempt");
        return Json(ApiResponse::failed("Invalid credentials")).into_response();
    }

    let id = state.sessions.create();
    state.schedule_reset();
    info!("operator logged in");

    (
        [(header::SET_COOKIE, state.sessions.cookie(&id))],
        Json(ApiResponse::ok()),
    )
        .into_response()
}

async fn launcher_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if authorized(&state, &headers) {
        Html(LAUNCHER_PAGE).into_response()
    } else {
        Redirect::to("/").into_response()
    }
}

async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(id) = session_id(&headers) {
        state.sessions.destroy(&id);
    }

    (
        [(header::SET_COOKIE, expired_cookie())],
        Json(ApiResponse::ok()),
    )
        .into_response()
}

fn build_job(state: &AppState, request: SendRequest) -> Result<(Job, Vec<String>)> {
    let recipients = parse_recipients(request.recipients.as_deref().unwrap_or_default());
    let sender = request.sender_email.trim().parse()?;
    let relay = state.connector.connect(&SenderCredentials {
        email: request.sender_email.trim().to_owned(),
        secret: request.sender_secret,
    })?;

    let job = Job {
        id: Uuid::new_v4(),
        sender,
        relay,
        letter: Letter {
            sender_name: request.sender_name,
            subject: request.subject,
            body: request.message,
            footer: state.config.footer.clone(),
        },
        recipients: recipients.valid,
    };

    Ok((job, recipients.invalid))
}

async fn send_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    if !authorized(&state, &headers) {
        return Redirect::to("/").into_response();
    }

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return malformed(rejection),
    };

    if request
        .recipients
        .as_deref()
        .map(|r| r.trim().is_empty())
        .unwrap_or(true)
    {
        return Json(ApiResponse::failed("Recipients required")).into_response();
    }

    match build_job(&state, request) {
        Ok((job, invalid)) if job.recipients.is_empty() => Json(ApiResponse {
            success: false,
            message: Some("No valid recipients".to_owned()),
            invalid,
        })
        .into_response(),
        Ok((job, invalid)) => {
            let count = job.recipients.len();
            info!("job {} queued with {count} recipients", job.id);
            state.queue.push(job);

            Json(ApiResponse {
                success: true,
                message: Some(format!(
                    "{count} mails queued & sending in background"
                )),
                invalid,
            })
            .into_response()
        }
        Err(e @ (Error::Address(_) | Error::Smtp(_))) => {
            Json(ApiResponse::failed(e.to_string())).into_response()
        }
        Err(e) => {
            error!("could not queue job: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::failed(e.to_string())),
            )
                .into_response()
        }
    }
}

async fn quota_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<QuotaQuery>,
) -> std::result::Result<Json<QuotaResponse>, StatusCode> {
    if !authorized(&state, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(Json(QuotaResponse {
        remaining: state.quota.remaining(&query.sender),
        cap: state.quota.cap(),
        sender: query.sender,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let serve_dir = ServeDir::new(&state.config.public_dir);

    Router::new()
        .route("/", get(index))
        .route("/login", post(login_handler))
        .route("/launcher", get(launcher_handler))
        .route("/logout", post(logout_handler))
        .route("/send", post(send_handler))
        .route("/api/quota", get(quota_handler))
        .nest_service("/static", serve_dir)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .with_state(state)
}

pub(crate) async fn http_server(state: Arc<AppState>) -> Result<&'static str> {
    let addr = SocketAddr::from((state.config.http_host, state.config.http_port));
    let listener = TcpListener::bind(addr).await?;

    serve(listener, state).await
}

pub(crate) async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<&'static str> {
    info!("HTTP server listening on {}", listener.local_addr()?);

    let token = state.token.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .map_err(|e| Error::WebServer(e.to_string()))?;

    info!("Shutting down web server");

    Ok("web server")
}
