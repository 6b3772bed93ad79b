//! A small print office server: an in-memory request store wired to the
//! notification gateway.
//!
//! ```text
//! cargo run --example print_office
//! websocat 'ws://127.0.0.1:3000/ws/notifications?token=secretary-token'
//! curl -X POST localhost:3000/requests -H 'Authorization: Bearer teacher1-token' \
//!      -H 'Content-Type: application/json' \
//!      -d '{"filename":"essay.pdf","deadline":"2024-06-01T14:00","copies":30}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use prints_realtime::events::normalize_deadline;
use prints_realtime::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tracing::info;

const MAX_COPIES: u32 = 50;
const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "doc", "docx", "txt"];

// 1. Users, print requests, and AppState

#[derive(Debug)]
struct UnknownToken;

impl fmt::Display for UnknownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown session token")
    }
}

impl std::error::Error for UnknownToken {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Pending,
    Printed,
}

#[derive(Debug, Clone, Serialize)]
struct PrintRequest {
    id: i64,
    teacher_id: i64,
    teacher: String,
    filename: String,
    deadline: String,
    copies: u32,
    notes: Option<String>,
    status: Status,
}

#[derive(Debug, Deserialize)]
struct NewPrintRequest {
    filename: String,
    /// `YYYY-MM-DD HH:MM`, or the `YYYY-MM-DDTHH:MM` a datetime-local input sends.
    deadline: String,
    #[serde(default = "default_copies")]
    copies: u32,
    notes: Option<String>,
}

fn default_copies() -> u32 {
    1
}

#[derive(Default)]
struct PrintStore {
    next_id: i64,
    requests: Vec<PrintRequest>,
}

#[derive(Clone)]
struct AppState {
    users: Arc<HashMap<String, Identity>>,
    store: Arc<Mutex<PrintStore>>,
    gateway: Arc<NotificationGateway>,
}

// 2. Implement IdentityResolver for the AppState (the session provider)

#[async_trait::async_trait]
impl IdentityResolver for AppState {
    type Error = UnknownToken;

    async fn resolve(&self, token: &str) -> Result<Identity, Self::Error> {
        self.users.get(token).cloned().ok_or(UnknownToken)
    }
}

fn sample_users() -> HashMap<String, Identity> {
    HashMap::from([
        ("secretary-token".to_string(), Identity::secretary(1, "Marie Mukamana")),
        ("teacher1-token".to_string(), Identity::teacher(2, "Jean Baptiste")),
        ("teacher2-token".to_string(), Identity::teacher(3, "Alice Uwamahoro")),
        ("teacher3-token".to_string(), Identity::teacher(4, "Patrick Niyonzima")),
    ])
}

// 3. Request workflow: persist first, then publish

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn validate(new: &NewPrintRequest) -> Result<String, &'static str> {
    let extension = new
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err("Only PDF, DOC, DOCX, and TXT files are allowed");
    }
    if new.copies == 0 || new.copies > MAX_COPIES {
        return Err("Copies must be between 1 and 50");
    }
    normalize_deadline(&new.deadline).ok_or("Deadline must look like YYYY-MM-DD HH:MM")
}

async fn create_request(
    State(state): State<AppState>,
    SessionIdentity(identity): SessionIdentity,
    Json(new): Json<NewPrintRequest>,
) -> Response {
    let Some(teacher) = identity else {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    };
    if teacher.is_secretary {
        return error(StatusCode::FORBIDDEN, "Only teachers submit print requests");
    }
    let deadline = match validate(&new) {
        Ok(deadline) => deadline,
        Err(message) => return error(StatusCode::BAD_REQUEST, message),
    };

    let request = {
        let mut store = state.store.lock().await;
        store.next_id += 1;
        let request = PrintRequest {
            id: store.next_id,
            teacher_id: teacher.id,
            teacher: teacher.display_name.clone(),
            filename: new.filename,
            deadline,
            copies: new.copies,
            notes: new.notes.filter(|n| !n.trim().is_empty()),
            status: Status::Pending,
        };
        store.requests.push(request.clone());
        request
    };

    info!(request_id = request.id, teacher = %request.teacher, "Print request submitted");
    state
        .gateway
        .publisher()
        .publish_new_request(
            request.id,
            request.teacher.clone(),
            request.filename.clone(),
            request.deadline.clone(),
        )
        .await;

    (StatusCode::CREATED, Json(request)).into_response()
}

async fn list_requests(
    State(state): State<AppState>,
    SessionIdentity(identity): SessionIdentity,
) -> Response {
    let Some(user) = identity else {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    };
    let store = state.store.lock().await;
    let mut visible: Vec<PrintRequest> = store
        .requests
        .iter()
        .filter(|r| {
            if user.is_secretary {
                r.status == Status::Pending
            } else {
                r.teacher_id == user.id
            }
        })
        .cloned()
        .collect();
    visible.sort_by(|a, b| a.deadline.cmp(&b.deadline));
    Json(visible).into_response()
}

async fn mark_printed(
    State(state): State<AppState>,
    SessionIdentity(identity): SessionIdentity,
    Path(request_id): Path<i64>,
) -> Response {
    if !identity.is_some_and(|user| user.is_secretary) {
        return error(StatusCode::FORBIDDEN, "Unauthorized");
    }

    let printed = {
        let mut store = state.store.lock().await;
        match store.requests.iter_mut().find(|r| r.id == request_id) {
            Some(request) => {
                request.status = Status::Printed;
                request.clone()
            }
            None => return error(StatusCode::NOT_FOUND, "Print request not found"),
        }
    };

    info!(request_id, filename = %printed.filename, "Marked as printed");
    state
        .gateway
        .publisher()
        .publish_request_printed(printed.id, printed.teacher_id, printed.filename.clone())
        .await;

    Json(printed).into_response()
}

// 4. Gateway, router, serve

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "print_office=info,prints_realtime=info".into()),
        )
        .init();

    let gateway = NotificationGateway::from_env()?;
    let state = AppState {
        users: Arc::new(sample_users()),
        store: Arc::new(Mutex::new(PrintStore::default())),
        gateway: Arc::clone(&gateway),
    };

    let app = Router::new()
        .route(
            "/ws/notifications",
            get(
                |ws: WebSocketUpgrade,
                 State(state): State<AppState>,
                 SessionIdentity(identity): SessionIdentity| async move {
                    upgrade_handler(ws, State(state.gateway), identity).await
                },
            ),
        )
        .route("/requests", get(list_requests).post(create_request))
        .route("/requests/{id}/printed", post(mark_printed))
        .route("/health", get(|| async { "OK" }))
        .with_state(state);

    let addr: SocketAddr = std::env::var("PRINTS_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            gateway.shutdown();
        })
        .await?;
    Ok(())
}
