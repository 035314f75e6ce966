//! HTTP API: ingest, read paths, preferences, devices, websocket upgrade,
//! health and stats — the external interfaces from §6.

pub mod model;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use sn_common::{ChannelMask, DeviceRegistration, Notification, NotificationType, Preferences};
use sn_repository::Repository;

use crate::health::HealthService;
use crate::metrics::AdapterMetricsCollector;
use crate::processor::{AdmissionRejection, Processor};
use crate::registry::{CloseReason, ConnectionRegistry, OutboundFrame, TokenValidator};

use model::{
    CreateNotificationRequest, CreateNotificationResponse, DeviceRegisterRequest, ErrorResponse,
    ListNotificationsQuery, SocketQuery,
};

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<Processor>,
    pub repository: Arc<dyn Repository>,
    pub registry: Arc<ConnectionRegistry>,
    pub health: Arc<HealthService>,
    pub metrics: Arc<AdapterMetricsCollector>,
    pub token_validator: Arc<dyn TokenValidator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/notifications/:id", get(get_notification))
        .route("/notifications/:id/read", post(mark_read))
        .route("/users/:user_id/notifications", get(list_for_user))
        .route("/users/:user_id/preferences", get(get_preferences).put(put_preferences))
        .route("/users/:user_id/devices", post(register_device))
        .route("/users/:user_id/devices/:device_id", delete(deactivate_device))
        .route("/ws", get(socket_upgrade))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(paths(create_notification, get_notification, list_for_user, get_preferences))]
struct ApiDoc;

/// POST /notifications
#[utoipa::path(post, path = "/notifications", request_body = CreateNotificationRequest,
    responses((status = 202, body = CreateNotificationResponse)))]
async fn create_notification(
    State(state): State<AppState>,
    Json(req): Json<CreateNotificationRequest>,
) -> Response {
    let now = Utc::now();
    let channel_mask = req.channel_mask.unwrap_or(ChannelMask::ALL);
    let priority = req.priority.unwrap_or_default();

    let notification = Notification {
        id: String::new(),
        recipient_id: req.recipient_id,
        sender_id: req.sender_id,
        notification_type: req.notification_type,
        title: req.title,
        body: req.body,
        action_link: req.action_link,
        content_refs: req.content_refs,
        channel_mask,
        priority,
        created_at: now,
        scheduled_at: now,
        expires_at: now + chrono::Duration::hours(24),
        status: sn_common::DeliveryStatus::Pending,
        delivered_at: None,
        read_at: None,
        attempts: 0,
        failure_reason: None,
        next_attempt_at: None,
        group_key: req.group_key,
        batch_id: None,
        is_batched: false,
        digest_member_ids: vec![],
        template_vars: req.template_vars,
        template_id: req.template_id,
        tracking_id: String::new(),
        allow_bundling: req.allow_bundling.unwrap_or(true),
        respect_quiet_hours: req.respect_quiet_hours.unwrap_or(true),
    };

    match state.processor.ingest(notification).await {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(CreateNotificationResponse {
                id,
                status: "accepted".to_string(),
            }),
        )
            .into_response(),
        Err(rejection) => {
            let (status, reason) = rejection_status(rejection);
            (status, Json(ErrorResponse { error: reason.to_string() })).into_response()
        }
    }
}

fn rejection_status(rejection: AdmissionRejection) -> (StatusCode, &'static str) {
    let (status, reason) = match rejection {
        AdmissionRejection::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid notification"),
        AdmissionRejection::Disabled => (StatusCode::OK, "notification type disabled by recipient"),
        AdmissionRejection::BlockedSender => (StatusCode::OK, "sender blocked by recipient"),
        AdmissionRejection::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"),
        AdmissionRejection::Duplicate => (StatusCode::OK, "duplicate suppressed"),
        AdmissionRejection::NoChannels => (StatusCode::UNPROCESSABLE_ENTITY, "no eligible delivery channel"),
        AdmissionRejection::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "ingest queue is full"),
    };
    crate::prom_metrics::record_admission_rejection(reason);
    (status, reason)
}

/// GET /notifications/:id
#[utoipa::path(get, path = "/notifications/{id}", responses((status = 200, body = Notification)))]
async fn get_notification(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.repository.get_notification(&id).await {
        Ok(Some(notification)) => Json(notification).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "not found".to_string() })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

async fn mark_read(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(Some(notification)) = state.repository.get_notification(&id).await else {
        return (StatusCode::NOT_FOUND, Json(ErrorResponse { error: "not found".to_string() })).into_response();
    };

    let outcome = state
        .repository
        .update_status(
            &id,
            notification.status,
            sn_common::DeliveryStatus::Read,
            sn_repository::StatusUpdate {
                read_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;

    match outcome {
        Ok(sn_repository::CasOutcome::Updated) => StatusCode::NO_CONTENT.into_response(),
        Ok(sn_repository::CasOutcome::PreconditionFailed) => {
            (StatusCode::CONFLICT, Json(ErrorResponse { error: "status already advanced".to_string() })).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

/// GET /users/:user_id/notifications
#[utoipa::path(get, path = "/users/{user_id}/notifications", responses((status = 200, body = [Notification])))]
async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListNotificationsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).min(200);
    match state.repository.list_for_user(&user_id, limit).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

/// GET /users/:user_id/preferences
#[utoipa::path(get, path = "/users/{user_id}/preferences", responses((status = 200, body = Preferences)))]
async fn get_preferences(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.repository.get_preferences(&user_id).await {
        Ok(Some(prefs)) => Json(prefs).into_response(),
        Ok(None) => Json(Preferences {
            user_id,
            ..Default::default()
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

async fn put_preferences(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(mut prefs): Json<Preferences>,
) -> Response {
    prefs.user_id = user_id;
    match state.repository.upsert_preferences(prefs).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

async fn register_device(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<DeviceRegisterRequest>,
) -> Response {
    let registration = DeviceRegistration {
        user_id,
        device_id: req.device_id,
        push_token: req.push_token,
        platform: req.platform,
        token_updated_at: Utc::now(),
        active: true,
    };
    match state.repository.register_device(registration).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

async fn deactivate_device(
    State(state): State<AppState>,
    Path((user_id, device_id)): Path<(String, String)>,
) -> Response {
    match state.repository.deactivate_device(&user_id, &device_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

/// GET /ws — upgrades to a socket held open in the connection registry until
/// the client sends an `auth` frame, a liveness sweep expires it, or it
/// disconnects. `user_id` on the query string is accepted only as a legacy
/// fallback in dev mode; the wire protocol otherwise authenticates in-band.
async fn socket_upgrade(State(state): State<AppState>, Query(_query): Query<SocketQuery>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound_rx) = match state.registry.accept() {
        Ok(pair) => pair,
        Err(_reason) => {
            let _ = socket.close().await;
            return;
        }
    };
    let connection_id = connection.id;
    let (mut sink, mut stream) = socket.split();
    info!(connection_id, "socket connected");

    let forward_task = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(frame) = outbound_rx.recv().await {
            let sent = match frame {
                OutboundFrame::Json(payload) => sink.send(WsMessage::Text(payload.to_string())).await,
                OutboundFrame::Close(reason) => {
                    let _ = sink
                        .send(WsMessage::Text(json!({"type": "error", "reason": reason.as_str()}).to_string()))
                        .await;
                    let _ = sink.close().await;
                    break;
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            WsMessage::Text(text) => dispatch_inbound_frame(&state, &connection, connection_id, &text),
            WsMessage::Pong(_) => {
                state.registry.record_pong(connection_id);
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
    state.registry.remove(connection_id, CloseReason::Normal);
    info!(connection_id, "socket disconnected");
}

fn dispatch_inbound_frame(state: &AppState, connection: &crate::registry::Connection, connection_id: u64, text: &str) {
    state.registry.record_activity(connection_id);

    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        connection.send(json!({"type": "error", "reason": "malformed frame"}));
        return;
    };
    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or("");

    match frame_type {
        "auth" => {
            let token = frame.get("token").and_then(Value::as_str).unwrap_or("");
            match state.token_validator.validate(token) {
                Some(user_id) => {
                    let subscriptions = frame
                        .get("subscriptions")
                        .and_then(Value::as_array)
                        .map(|types| {
                            types
                                .iter()
                                .filter_map(Value::as_str)
                                .filter_map(parse_notification_type)
                                .collect()
                        })
                        .unwrap_or_default();
                    state.registry.authenticate(connection_id, user_id, subscriptions);
                    connection.send(json!({"type": "auth_ack", "ok": true}));
                }
                None => {
                    connection.send(json!({"type": "auth_ack", "ok": false, "reason": "auth_failed"}));
                    state.registry.remove(connection_id, CloseReason::AuthFailed);
                }
            }
        }
        "subscribe" | "unsubscribe" => {
            if !connection.is_authenticated() {
                connection.send(json!({"type": "error", "reason": "not authenticated"}));
                return;
            }
            let types: Vec<NotificationType> = frame
                .get("types")
                .and_then(Value::as_array)
                .map(|types| types.iter().filter_map(Value::as_str).filter_map(parse_notification_type).collect())
                .unwrap_or_default();
            if frame_type == "subscribe" {
                state.registry.subscribe(connection_id, types);
            } else {
                state.registry.unsubscribe(connection_id, types);
            }
        }
        "ping" => {
            let nonce = frame.get("nonce").cloned().unwrap_or(Value::Null);
            connection.send(json!({"type": "pong", "nonce": nonce}));
        }
        "pong" => {
            state.registry.record_pong(connection_id);
        }
        _ => {
            connection.send(json!({"type": "error", "reason": "unknown frame type"}));
        }
    }
}

fn parse_notification_type(s: &str) -> Option<NotificationType> {
    serde_json::from_value(Value::String(s.to_string())).ok()
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.health.report()).into_response()
}

async fn stats(State(state): State<AppState>) -> Response {
    let adapters = ["email", "push", "socket"]
        .into_iter()
        .filter_map(|name| state.metrics.snapshot(name).map(|s| (name, s)))
        .collect::<std::collections::HashMap<_, _>>();
    Json(json!({ "adapters": adapters })).into_response()
}
