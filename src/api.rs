// 🌐 REST + WebSocket surface
//
// Every error leaves as `{ "message": ... }` with the status picked from the
// AuctionError variant. Handlers stay thin: parse, call the core, map.

use crate::coordinator::AuctionCoordinator;
use crate::db::{get_events_for_entity, Database};
use crate::entities::{
    FormFields, LeaderUpdate, NewLeader, NewPlayer, PlayerUpdate, RegistrationPath, SaleRequest,
};
use crate::error::AuctionError;
use crate::identity::IdentityStore;
use crate::ledger::SaleLedger;
use crate::notifier::EventNotifier;
use crate::object_store::{SharedObjectStore, Upload};
use crate::reconciliation::ReconciliationEngine;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const PLAYER_PHOTO_FIELD: &str = "profilePhoto";
const TEAM_LOGO_FIELD: &str = "teamLogo";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub identity: IdentityStore,
    pub coordinator: AuctionCoordinator,
    pub reconciler: Arc<ReconciliationEngine>,
    pub notifier: EventNotifier,
}

impl AppState {
    pub fn new(db: Database, objects: SharedObjectStore, notifier: EventNotifier) -> Self {
        let identity = IdentityStore::new(db.clone(), objects, notifier.clone());
        let coordinator =
            AuctionCoordinator::new(identity.clone(), SaleLedger::new(db.clone()), notifier.clone());
        AppState {
            reconciler: Arc::new(ReconciliationEngine::new(db.clone())),
            db,
            identity,
            coordinator,
            notifier,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

pub struct ApiError(AuctionError);

impl From<AuctionError> for ApiError {
    fn from(err: AuctionError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_user_error() {
            StatusCode::BAD_REQUEST
        } else if matches!(self.0, AuctionError::NotFound { .. }) {
            StatusCode::NOT_FOUND
        } else {
            tracing::error!(error = ?self.0, retryable = self.0.is_retryable(), "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(json!({ "message": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request helpers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    #[serde(rename = "pageSize", alias = "limit")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    #[serde(rename = "dryRun", default)]
    pub dry_run: bool,
}

/// Split a multipart form into text fields and the one file we accept.
/// Empty file parts count as "no file".
async fn read_form(mut multipart: Multipart, file_field: &str) -> ApiResult<(FormFields, Option<Upload>)> {
    let mut fields = FormFields::new();
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == file_field && field.file_name().is_some() {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(invalid_form)?;
            if !bytes.is_empty() {
                upload = Some(Upload::new(bytes.to_vec(), &content_type, &file_name));
            }
        } else {
            let value = field.text().await.map_err(invalid_form)?;
            fields.insert(name, value);
        }
    }

    Ok((fields, upload))
}

fn invalid_form(err: axum::extract::multipart::MultipartError) -> ApiError {
    AuctionError::validation(format!("Invalid form data: {}", err)).into()
}

// ============================================================================
// Players
// ============================================================================

async fn list_players(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.identity.list_players(q.page, q.page_size)?))
}

async fn get_player(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.identity.get_player(&id)?))
}

async fn create_player(State(state): State<AppState>, multipart: Multipart) -> ApiResult<impl IntoResponse> {
    register_player(state, multipart, RegistrationPath::Admin).await
}

async fn create_player_public(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    register_player(state, multipart, RegistrationPath::Public).await
}

async fn register_player(
    state: AppState,
    multipart: Multipart,
    path: RegistrationPath,
) -> ApiResult<impl IntoResponse> {
    let (fields, photo) = read_form(multipart, PLAYER_PHOTO_FIELD).await?;
    let new_player = NewPlayer::from_form(&fields)?;
    let player = state.identity.create_player(new_player, photo, path).await?;
    Ok((StatusCode::CREATED, Json(player)))
}

async fn update_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (fields, photo) = read_form(multipart, PLAYER_PHOTO_FIELD).await?;
    let update = PlayerUpdate::from_form(&fields)?;
    Ok(Json(state.identity.update_player(&id, update, photo).await?))
}

async fn delete_player(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.identity.delete_player(&id).await?;
    Ok(Json(json!({ "message": "Player deleted successfully" })))
}

// ============================================================================
// Leaders
// ============================================================================

async fn list_leaders(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.identity.list_leaders(q.page, q.page_size)?))
}

async fn get_leader(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.identity.get_leader(&id)?))
}

async fn create_leader(State(state): State<AppState>, multipart: Multipart) -> ApiResult<impl IntoResponse> {
    register_leader(state, multipart, RegistrationPath::Admin).await
}

async fn create_leader_public(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    register_leader(state, multipart, RegistrationPath::Public).await
}

async fn register_leader(
    state: AppState,
    multipart: Multipart,
    path: RegistrationPath,
) -> ApiResult<impl IntoResponse> {
    let (fields, logo) = read_form(multipart, TEAM_LOGO_FIELD).await?;
    let leader = state
        .identity
        .create_leader(NewLeader::from_form(&fields), logo, path)
        .await?;
    Ok((StatusCode::CREATED, Json(leader)))
}

async fn update_leader(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let (fields, logo) = read_form(multipart, TEAM_LOGO_FIELD).await?;
    let update = LeaderUpdate::from_form(&fields)?;
    Ok(Json(state.identity.update_leader(&id, update, logo).await?))
}

async fn delete_leader(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.identity.delete_leader(&id).await?;
    Ok(Json(json!({ "message": "Leader deleted successfully" })))
}

/// PUT /api/leaders/set-max-amount  { "maxAmount": 10000 }
async fn set_max_amount(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.map_err(|e| AuctionError::validation(e.body_text()))?;
    let amount = body.get("maxAmount").cloned().unwrap_or_default();
    let updated = state.coordinator.set_max_amount_for_all_teams(&amount)?;
    Ok(Json(json!({
        "message": "Max amount updated for all teams",
        "updatedCount": updated,
    })))
}

// ============================================================================
// Sales
// ============================================================================

/// POST /api/soldplayers
async fn settle_sale(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.map_err(|_| AuctionError::validation("Missing required fields"))?;
    let request: SaleRequest = serde_json::from_value(body)
        .map_err(|_| AuctionError::validation("Missing required fields"))?;

    let record = state.coordinator.settle_sale(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_sales(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.coordinator.ledger().list_sales()?))
}

// ============================================================================
// Admin / audit
// ============================================================================

async fn reconcile(
    State(state): State<AppState>,
    Query(q): Query<ReconcileQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.reconciler.reconcile(q.dry_run)?))
}

async fn entity_events(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let events = state
        .db
        .with_conn(|conn| get_events_for_entity(conn, &entity_type, &entity_id))?;
    Ok(Json(events))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "version": crate::VERSION,
        "observers": state.notifier.observer_count(),
    }))
}

// ============================================================================
// WebSocket fan-out
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let notifier = state.notifier.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, notifier))
}

async fn handle_socket(socket: WebSocket, notifier: EventNotifier) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = notifier.subscribe();
    let conn_id = uuid::Uuid::new_v4();
    tracing::info!(%conn_id, "Observer connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let msg = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(%conn_id, missed = n, "Observer lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Observers only listen; drain until they close
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    tracing::info!(%conn_id, "Observer disconnected");
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: AppState, upload_dir: &std::path::Path, allowed_origins: &[String]) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/players", get(list_players).post(create_player))
        .route("/players/public", post(create_player_public))
        .route(
            "/players/:id",
            get(get_player).put(update_player).delete(delete_player),
        )
        .route("/leaders", get(list_leaders).post(create_leader))
        .route("/leaders/public", post(create_leader_public))
        .route("/leaders/set-max-amount", put(set_max_amount))
        .route(
            "/leaders/:id",
            get(get_leader).put(update_leader).delete(delete_leader),
        )
        .route("/soldplayers", get(list_sales).post(settle_sale))
        .route("/admin/reconcile", post(reconcile))
        .route("/events/:entity_type/:entity_id", get(entity_events))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .nest_service("/o", ServeDir::new(upload_dir))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}
