//! HTTP surface for a [`Runner`].
//!
//! ```text
//! GET    /list-apps
//! GET    /apps/:app/users/:user/sessions
//! POST   /apps/:app/users/:user/sessions
//! POST   /apps/:app/users/:user/sessions/:session
//! GET    /apps/:app/users/:user/sessions/:session
//! DELETE /apps/:app/users/:user/sessions/:session
//! POST   /run
//! POST   /run_sse
//! GET    /health
//! GET    /dev-ui          (browser UI, when enabled)
//! ```

use crate::agent::session::{SessionExists, SessionNotFound};
use crate::agent::{Content, Event, Runner, Session};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        Html, IntoResponse, Redirect, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::error;

const DEV_UI: &str = include_str!("dev_ui.html");

#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
    /// Serve the browser UI at `/dev-ui`.
    pub web: bool,
}

pub fn build_app(runner: Arc<Runner>, options: AppOptions) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/list-apps", get(list_apps))
        .route(
            "/apps/:app/users/:user/sessions",
            get(list_sessions).post(create_session),
        )
        .route(
            "/apps/:app/users/:user/sessions/:session",
            get(get_session)
                .post(create_session_with_id)
                .delete(delete_session),
        )
        .route("/run", post(run))
        .route("/run_sse", post(run_sse));

    if options.web {
        router = router
            .route("/", get(|| async { Redirect::temporary("/dev-ui") }))
            .route("/dev-ui", get(|| async { Html(DEV_UI) }));
    }

    router.layer(TraceLayer::new_for_http()).with_state(runner)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<SessionNotFound>().is_some() {
            return Self::new(StatusCode::NOT_FOUND, err.to_string());
        }
        if err.downcast_ref::<SessionExists>().is_some() {
            return Self::new(StatusCode::CONFLICT, err.to_string());
        }
        error!(error = %format!("{:#}", err), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn check_app(runner: &Runner, app: &str) -> ApiResult<()> {
    if runner.app_name() == app {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("App not found: {}", app),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub state: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: Content,
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_apps(State(runner): State<Arc<Runner>>) -> Json<Vec<String>> {
    Json(vec![runner.app_name().to_string()])
}

async fn list_sessions(
    State(runner): State<Arc<Runner>>,
    Path((app, user)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Session>>> {
    check_app(&runner, &app)?;
    Ok(Json(runner.sessions().list(&app, &user).await))
}

async fn create_session(
    State(runner): State<Arc<Runner>>,
    Path((app, user)): Path<(String, String)>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<Json<Session>> {
    check_app(&runner, &app)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = runner
        .sessions()
        .create(&app, &user, req.session_id, req.state)
        .await?;
    Ok(Json(session))
}

async fn create_session_with_id(
    State(runner): State<Arc<Runner>>,
    Path((app, user, session_id)): Path<(String, String, String)>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<Json<Session>> {
    check_app(&runner, &app)?;
    let state = body.and_then(|Json(req)| req.state);
    let session = runner
        .sessions()
        .create(&app, &user, Some(session_id), state)
        .await?;
    Ok(Json(session))
}

async fn get_session(
    State(runner): State<Arc<Runner>>,
    Path((app, user, session_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Session>> {
    check_app(&runner, &app)?;
    runner
        .sessions()
        .get(&app, &user, &session_id)
        .await
        .map(Json)
        .ok_or_else(|| anyhow::Error::from(SessionNotFound(session_id)).into())
}

async fn delete_session(
    State(runner): State<Arc<Runner>>,
    Path((app, user, session_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    check_app(&runner, &app)?;
    if runner.sessions().delete(&app, &user, &session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(anyhow::Error::from(SessionNotFound(session_id)).into())
    }
}

async fn run(
    State(runner): State<Arc<Runner>>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Json<Vec<Event>>> {
    check_app(&runner, &req.app_name)?;
    let events = runner
        .run(&req.user_id, &req.session_id, req.new_message, None)
        .await?;
    Ok(Json(events))
}

async fn run_sse(
    State(runner): State<Arc<Runner>>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>> {
    check_app(&runner, &req.app_name)?;
    if runner
        .sessions()
        .get(&req.app_name, &req.user_id, &req.session_id)
        .await
        .is_none()
    {
        return Err(anyhow::Error::from(SessionNotFound(req.session_id)).into());
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let (done_tx, done_rx) = oneshot::channel::<Option<String>>();

    tokio::spawn(async move {
        let result = runner
            .run(&req.user_id, &req.session_id, req.new_message, Some(&tx))
            .await;
        drop(tx);
        let failure = result.err().map(|e| {
            error!(error = %format!("{:#}", e), "streaming run failed");
            format!("{:#}", e)
        });
        let _ = done_tx.send(failure);
    });

    let events =
        UnboundedReceiverStream::new(rx).map(|event| SseEvent::default().json_data(&event));
    let failure = stream::once(done_rx).filter_map(|done| async move {
        match done {
            Ok(Some(message)) => Some(
                SseEvent::default()
                    .event("error")
                    .json_data(serde_json::json!({ "error": message })),
            ),
            _ => None,
        }
    });

    Ok(Sse::new(events.chain(failure)).keep_alive(KeepAlive::default()))
}
