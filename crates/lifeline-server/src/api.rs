use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use lifeline_core::chat::{JoinOutcome, SendOutcome};
use lifeline_core::contacts::NewContact;
use lifeline_core::location::FixedLocationProvider;
use lifeline_core::session::{Resolution, TriggerWarning};
use lifeline_core::{EmergencySession, Engine};
use lifeline_shared::geo;
use lifeline_shared::identity::Profile;
use lifeline_shared::models::{
    EmergencyContact, Location, LocationQuality, MessageKind, TriggerReason,
};
use lifeline_shared::protocol::{open, seal, Envelope, Versioned};
use lifeline_shared::types::{AlertId, ChatId, ContactId, EmergencyId};

use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/presence", put(report_presence))
        .route("/emergencies", post(trigger_emergency).get(emergency_history))
        .route("/emergencies/active", get(active_emergency))
        .route("/emergencies/:id/resolve", post(resolve_emergency))
        .route("/chats/:id/join", post(join_chat))
        .route("/chats/:id/messages", get(chat_messages).post(send_message))
        .route("/chats/:id/location", post(send_location))
        .route("/alerts", get(pending_alerts))
        .route("/alerts/:id/ack", post(acknowledge_alert))
        .route("/contacts", get(list_contacts).post(add_contact))
        .route("/contacts/import", post(import_contacts))
        .route("/contacts/:id", delete(remove_contact))
        .route("/contacts/:id/primary", post(set_primary_contact))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Caller identity ───

/// The authenticated caller, as forwarded by the identity proxy in
/// `X-User-*` headers.
pub struct Caller(pub Profile);

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let uid = header(&parts.headers, "x-user-id")
            .ok_or_else(|| ServerError::Unauthorized("X-User-Id header is required".into()))?;
        let name = header(&parts.headers, "x-user-name").unwrap_or_default();
        let mut profile = Profile::new(uid, name);
        profile.phone = header(&parts.headers, "x-user-phone");
        profile.email = header(&parts.headers, "x-user-email");
        Ok(Caller(profile))
    }
}

// ─── Bodies ───

#[derive(Debug, Clone, Copy, Deserialize)]
struct LocationBody {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy_m: Option<f64>,
}

impl LocationBody {
    fn into_location(self) -> Result<Location, ServerError> {
        geo::validate(self.latitude, self.longitude)
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;
        Ok(Location::new(
            self.latitude,
            self.longitude,
            self.accuracy_m.unwrap_or(0.0).max(0.0),
            Utc::now(),
        ))
    }
}

/// Per-request session. Without a fix in the request, the caller's last
/// reported location is the fallback.
async fn session_for(
    state: &AppState,
    caller: Caller,
    location: Option<LocationBody>,
) -> Result<EmergencySession, ServerError> {
    let location = location.map(LocationBody::into_location).transpose()?;
    let provider = FixedLocationProvider::from_option(location);
    Ok(state
        .engine
        .resume_session(caller.0, Arc::new(provider))
        .await?)
}

fn parse_id<T>(
    raw: &str,
    parse: impl Fn(&str) -> Result<T, uuid::Error>,
) -> Result<T, ServerError> {
    parse(raw).map_err(|_| ServerError::BadRequest(format!("Invalid id: {raw}")))
}

fn seal_all<T: Versioned>(docs: &[T]) -> Result<Vec<Envelope>, ServerError> {
    docs.iter()
        .map(|d| seal(d).map_err(ServerError::from))
        .collect()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Presence ───

#[derive(Deserialize)]
struct PresenceRequest {
    #[serde(default)]
    location: Option<LocationBody>,
    #[serde(default = "default_online")]
    online: bool,
}

fn default_online() -> bool {
    true
}

async fn report_presence(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<PresenceRequest>,
) -> Result<Json<Envelope>, ServerError> {
    let session = session_for(&state, caller, req.location).await?;
    let presence = session.manager().report_presence(req.online).await?;
    Ok(Json(seal(&presence)?))
}

// ─── Emergencies ───

#[derive(Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    location: Option<LocationBody>,
    #[serde(default)]
    reason: Option<TriggerReason>,
}

#[derive(Serialize)]
struct TriggerResponse {
    emergency: Envelope,
    chat: Envelope,
    helpers_notified: usize,
    search_radius_km: Option<f64>,
    location_quality: LocationQuality,
    warnings: Vec<TriggerWarning>,
}

async fn trigger_emergency(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ServerError> {
    let session = session_for(&state, caller, req.location).await?;
    let reason = req.reason.unwrap_or(TriggerReason::Manual);
    let report = session.manager().trigger_emergency(reason).await?;

    info!(
        emergency = %report.emergency.id,
        helpers = report.helpers.len(),
        "Emergency raised via API"
    );

    Ok((
        StatusCode::CREATED,
        Json(TriggerResponse {
            emergency: seal(&report.emergency)?,
            chat: seal(&report.chat)?,
            helpers_notified: report.helpers.len(),
            search_radius_km: report.search_radius_km,
            location_quality: report.location_quality,
            warnings: report.warnings,
        }),
    ))
}

async fn active_emergency(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Option<Envelope>>, ServerError> {
    let session = session_for(&state, caller, None).await?;
    let active = session.manager().active_emergency().await?;
    Ok(Json(active.as_ref().map(seal).transpose()?))
}

async fn emergency_history(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Envelope>>, ServerError> {
    let session = session_for(&state, caller, None).await?;
    let history = session.manager().history().await?;
    Ok(Json(seal_all(&history)?))
}

#[derive(Serialize)]
struct ResolveResponse {
    resolution: Resolution,
}

async fn resolve_emergency(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<ResolveResponse>, ServerError> {
    let id = parse_id(&id, EmergencyId::parse)?;
    let session = session_for(&state, caller, None).await?;
    let resolution = session.manager().resolve_emergency(id).await?;
    Ok(Json(ResolveResponse { resolution }))
}

// ─── Chats ───

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum JoinResponse {
    Joined { chat: Envelope, first_join: bool },
    ChatEnded { chat: Envelope },
}

async fn join_chat(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JoinResponse>, ServerError> {
    let id = parse_id(&id, ChatId::parse)?;
    let session = session_for(&state, caller, None).await?;
    let response = match session.chat().join(id).await? {
        JoinOutcome::Joined { chat, first_join } => JoinResponse::Joined {
            chat: seal(&chat)?,
            first_join,
        },
        JoinOutcome::ChatEnded { chat } => JoinResponse::ChatEnded { chat: seal(&chat)? },
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
struct MessagesQuery {
    #[serde(default)]
    after: Option<i64>,
}

async fn chat_messages(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Envelope>>, ServerError> {
    let id = parse_id(&id, ChatId::parse)?;
    let session = session_for(&state, caller, None).await?;
    let mut messages = session.chat().messages(id).await?;
    if let Some(after) = query.after {
        messages.retain(|m| m.seq > after);
    }
    Ok(Json(seal_all(&messages)?))
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum SendResponse {
    Sent { message: Envelope },
    ChatEnded,
}

impl SendResponse {
    fn from_outcome(outcome: SendOutcome) -> Result<(StatusCode, Json<Self>), ServerError> {
        Ok(match outcome {
            SendOutcome::Sent { message } => (
                StatusCode::CREATED,
                Json(SendResponse::Sent {
                    message: seal(&message)?,
                }),
            ),
            SendOutcome::ChatEnded => (StatusCode::OK, Json(SendResponse::ChatEnded)),
        })
    }
}

#[derive(Deserialize)]
struct SendRequest {
    text: String,
    #[serde(default)]
    kind: Option<MessageKind>,
}

async fn send_message(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>), ServerError> {
    let id = parse_id(&id, ChatId::parse)?;
    let session = session_for(&state, caller, None).await?;
    let outcome = session
        .chat()
        .send_message(id, &req.text, req.kind.unwrap_or(MessageKind::Text))
        .await?;
    SendResponse::from_outcome(outcome)
}

async fn send_location(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(location): Json<LocationBody>,
) -> Result<(StatusCode, Json<SendResponse>), ServerError> {
    let id = parse_id(&id, ChatId::parse)?;
    let session = session_for(&state, caller, Some(location)).await?;
    let outcome = session.chat().send_location(id).await?;
    SendResponse::from_outcome(outcome)
}

// ─── Alerts ───

async fn pending_alerts(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Envelope>>, ServerError> {
    let session = session_for(&state, caller, None).await?;
    let alerts = session.manager().pending_alerts().await?;
    Ok(Json(seal_all(&alerts)?))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id = parse_id(&id, AlertId::parse)?;
    let session = session_for(&state, caller, None).await?;
    let changed = session.manager().acknowledge_alert(id).await?;
    Ok(Json(serde_json::json!({ "acknowledged": changed })))
}

// ─── Contacts ───

#[derive(Deserialize)]
struct ContactRequest {
    name: String,
    phone: String,
    #[serde(default)]
    relationship: Option<String>,
    #[serde(default)]
    is_primary: bool,
}

async fn list_contacts(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Envelope>>, ServerError> {
    let session = session_for(&state, caller, None).await?;
    let contacts = session.contacts().list().await?;
    Ok(Json(seal_all(&contacts)?))
}

async fn add_contact(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<ContactRequest>,
) -> Result<(StatusCode, Json<Envelope>), ServerError> {
    let session = session_for(&state, caller, None).await?;
    let contact = session
        .contacts()
        .add(NewContact {
            name: req.name,
            phone: req.phone,
            relationship: req.relationship,
            is_primary: req.is_primary,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(seal(&contact)?)))
}

/// Restore contacts from an export of `emergency_contact` envelopes. The
/// whole batch is decoded before anything is written.
async fn import_contacts(
    State(state): State<AppState>,
    caller: Caller,
    Json(envelopes): Json<Vec<Envelope>>,
) -> Result<(StatusCode, Json<Vec<Envelope>>), ServerError> {
    let exported = envelopes
        .into_iter()
        .map(open::<EmergencyContact>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    let session = session_for(&state, caller, None).await?;
    let mut imported = Vec::with_capacity(exported.len());
    for contact in exported {
        let added = session
            .contacts()
            .add(NewContact {
                name: contact.name,
                phone: contact.phone,
                relationship: contact.relationship,
                is_primary: contact.is_primary,
            })
            .await?;
        imported.push(added);
    }
    info!(count = imported.len(), "Contacts imported");
    Ok((StatusCode::CREATED, Json(seal_all(&imported)?)))
}

async fn remove_contact(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = parse_id(&id, ContactId::parse)?;
    let session = session_for(&state, caller, None).await?;
    session.contacts().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_primary_contact(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = parse_id(&id, ContactId::parse)?;
    let session = session_for(&state, caller, None).await?;
    session.contacts().set_primary(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
