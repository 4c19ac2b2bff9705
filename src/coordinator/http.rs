//! HTTP API for the coordinator
//!
//! - Rooms, applications and allocations under `/api`
//! - Hostel occupancy report
//! - Change feed over SSE (`/watch/sse`) and WebSocket (`/watch/ws`)
//! - Health checks, Prometheus metrics, store verification
//!
//! Errors are returned as `{"error": <message>, "kind": <tag>}` with the
//! status from [`Error::to_http_status`]. The acting warden or student is
//! read from the `X-Actor-Id` header.

use async_stream::stream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::common::audit::AuditLogger;
use crate::common::config::CoordinatorConfig;
use crate::common::metrics::MetricsRegistry;
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result};
use crate::coordinator::allocator::AllocationCoordinator;
use crate::coordinator::events::{EventBus, Subscription};
use crate::coordinator::records::{AllocationDetails, ApplicationStatus};
use crate::coordinator::reports::{self, AllocationFilter};
use crate::coordinator::review::{ApplicationDesk, NewApplication};
use crate::coordinator::rooms::{NewRoom, RoomFilter, RoomRegistry};
use crate::coordinator::store::Store;
use crate::ops::verify::verify_store;

/// Header carrying the acting identity
pub const ACTOR_HEADER: &str = "X-Actor-Id";

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared coordinator state for HTTP handlers.
#[derive(Clone)]
pub struct CoordState {
    pub store: Arc<dyn Store>,
    pub coordinator: Arc<AllocationCoordinator>,
    pub rooms: Arc<RoomRegistry>,
    pub desk: Arc<ApplicationDesk>,
    pub events: EventBus,
    pub metrics: Arc<MetricsRegistry>,
}

impl CoordState {
    /// Wire every service around one store
    pub fn new(
        store: Arc<dyn Store>,
        config: &CoordinatorConfig,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let events = EventBus::new(config.event_buffer);
        let metrics = Arc::new(MetricsRegistry::new());
        let coordinator = AllocationCoordinator::new(
            store.clone(),
            events.clone(),
            metrics.clone(),
            audit.clone(),
            config.allocation.clone(),
        );
        let rooms = RoomRegistry::new(store.clone(), events.clone(), audit.clone());
        let desk = ApplicationDesk::new(store.clone(), events.clone(), audit, &config.allocation);

        Self {
            store,
            coordinator: Arc::new(coordinator),
            rooms: Arc::new(rooms),
            desk: Arc::new(desk),
            events,
            metrics,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "kind": self.kind() })),
        )
            .into_response()
    }
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("system")
        .to_string()
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        // Change feed
        .route("/watch/sse", get(watch_sse))
        .route("/watch/ws", get(watch_ws))
        // Health
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        .route("/metrics", get(metrics))
        // Admin
        .route("/admin/verify", get(admin_verify))
        // Rooms
        .route("/api/rooms", post(create_room).get(list_rooms))
        .route("/api/rooms/:id", get(get_room))
        .route("/api/rooms/:id/allocations", get(room_allocations))
        // Applications
        .route(
            "/api/applications",
            post(submit_application).get(list_applications),
        )
        .route("/api/applications/:id", get(get_application))
        .route("/api/applications/:id/approve", patch(approve_application))
        .route("/api/applications/:id/reject", patch(reject_application))
        // Allocations
        .route(
            "/api/allocations",
            post(allocate_room).get(list_allocations),
        )
        .route(
            "/api/allocations/:id",
            get(get_allocation).delete(cancel_allocation),
        )
        .route("/api/allocations/:id/end", patch(cancel_allocation))
        // Reports
        .route("/api/hostels/:id/occupancy", get(hostel_occupancy))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            request_tracing_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

// ============================================================================
// Change feed
// ============================================================================

/// SSE endpoint streaming change events as JSON
async fn watch_sse(
    State(state): State<CoordState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut subscription = state.events.subscribe();
    let watcher = Watcher::new(state.metrics.clone());

    let stream = stream! {
        // dropped with the stream when the client goes away
        let _watcher = watcher;
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(data) => yield Ok(Event::default().event("change").data(data)),
                Err(e) => tracing::warn!(error = %e, "unencodable change event"),
            }
        }
    };
    Sse::new(stream)
}

async fn watch_ws(State(state): State<CoordState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: CoordState) {
    let mut subscription = state.events.subscribe();
    let _watcher = Watcher::new(state.metrics.clone());
    let (sender, receiver) = socket.split();
    relay_events(&mut subscription, receiver, sender).await;
    tracing::debug!("websocket watcher closed");
}

/// Forward change events until the bus closes or the client goes away.
///
/// The socket is read alongside the feed so a disconnect is noticed even
/// while no events flow.
async fn relay_events<R, W, E>(subscription: &mut Subscription, mut incoming: R, mut outgoing: W)
where
    R: Stream<Item = std::result::Result<Message, E>> + Unpin,
    W: Sink<Message> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            event = subscription.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if outgoing.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = incoming.next() => match msg {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Keeps the subscriber gauge in step with open feeds
struct Watcher(Arc<MetricsRegistry>);

impl Watcher {
    fn new(metrics: Arc<MetricsRegistry>) -> Self {
        metrics.event_subscribers.inc();
        Self(metrics)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.0.event_subscribers.dec();
    }
}

// ============================================================================
// Health & metrics
// ============================================================================

async fn health(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    let rooms = state.store.list_rooms().await?;
    Ok(Json(json!({
        "status": "healthy",
        "rooms": rooms.len(),
        "uptime_seconds": state.metrics.uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Liveness check: answers as long as the process can respond
async fn health_live() -> impl IntoResponse {
    Json(json!({
        "alive": true,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": crate::common::timestamp_now(),
    }))
}

async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let mut out = state.metrics.to_prometheus();
    out += &format!(
        "roomalloc_event_bus_receivers {}\n",
        state.events.subscriber_count()
    );
    (StatusCode::OK, out)
}

async fn admin_verify(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    let report = verify_store(state.store.as_ref()).await?;
    Ok(Json(json!({
        "status": if report.is_consistent() { "ok" } else { "inconsistent" },
        "report": report,
    })))
}

// ============================================================================
// Rooms
// ============================================================================

async fn create_room(
    State(state): State<CoordState>,
    headers: HeaderMap,
    Json(req): Json<NewRoom>,
) -> Result<impl IntoResponse> {
    let room = state.rooms.create_room(req, &actor(&headers)).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_rooms(
    State(state): State<CoordState>,
    Query(filter): Query<RoomFilter>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.rooms.list_rooms(&filter).await?))
}

async fn get_room(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.rooms.get_room(&id).await?))
}

async fn room_allocations(
    State(state): State<CoordState>,
    Path(id): Path<String>,
    Query(mut filter): Query<AllocationFilter>,
) -> Result<impl IntoResponse> {
    // 404 for unknown rooms rather than an empty list
    state.rooms.get_room(&id).await?;
    filter.room_id = Some(id);
    Ok(Json(
        reports::list_allocations(state.store.as_ref(), &filter).await?,
    ))
}

// ============================================================================
// Applications
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApplicationQuery {
    status: Option<ApplicationStatus>,
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    #[serde(default)]
    reason: String,
}

async fn submit_application(
    State(state): State<CoordState>,
    Json(req): Json<NewApplication>,
) -> Result<impl IntoResponse> {
    let application = state.desk.submit_application(req).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_applications(
    State(state): State<CoordState>,
    Query(query): Query<ApplicationQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.desk.list_applications(query.status).await?))
}

async fn get_application(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.desk.get_application(&id).await?))
}

async fn approve_application(
    State(state): State<CoordState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.desk.approve_application(&id, &actor(&headers)).await?,
    ))
}

async fn reject_application(
    State(state): State<CoordState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RejectRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state
            .desk
            .reject_application(&id, &actor(&headers), &req.reason)
            .await?,
    ))
}

// ============================================================================
// Allocations
// ============================================================================

#[derive(Debug, Deserialize)]
struct AllocateRequest {
    application_id: String,
    room_id: String,
    /// Checked against the application when present
    #[serde(default)]
    student_id: String,
    #[serde(default)]
    bed_label: Option<String>,
}

async fn allocate_room(
    State(state): State<CoordState>,
    headers: HeaderMap,
    Json(req): Json<AllocateRequest>,
) -> Result<impl IntoResponse> {
    let details = AllocationDetails {
        student_id: req.student_id,
        bed_label: req.bed_label,
        allocated_by: actor(&headers),
    };
    let allocation = state
        .coordinator
        .allocate_room(&req.application_id, &req.room_id, details)
        .await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

async fn list_allocations(
    State(state): State<CoordState>,
    Query(filter): Query<AllocationFilter>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        reports::list_allocations(state.store.as_ref(), &filter).await?,
    ))
}

async fn get_allocation(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        reports::get_allocation(state.store.as_ref(), &id).await?,
    ))
}

async fn cancel_allocation(
    State(state): State<CoordState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state
            .coordinator
            .cancel_allocation(&id, &actor(&headers))
            .await?,
    ))
}

// ============================================================================
// Reports
// ============================================================================

async fn hostel_occupancy(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        reports::hostel_occupancy(state.store.as_ref(), &id).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_actor_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor(&headers), "system");

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("warden-3"));
        assert_eq!(actor(&headers), "warden-3");

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("  "));
        assert_eq!(actor(&headers), "system");
    }

    #[test]
    fn test_error_response_status() {
        let resp = Error::Full("r1".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = Error::invalid_state(crate::common::Entity::Application, "a1", "rejected")
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    /// Outgoing side of a test socket; frames land in the returned receiver
    fn capture() -> (
        impl Sink<Message, Error = ()>,
        tokio::sync::mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, msg: Message| async move {
            match tx.send(msg) {
                Ok(()) => Ok(tx),
                Err(_) => Err(()),
            }
        });
        (sink, rx)
    }

    #[tokio::test]
    async fn test_ws_relay_stops_on_close_while_idle() {
        let bus = EventBus::default();
        let mut subscription = bus.subscribe();
        let incoming = futures_util::stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);
        let (sink, mut frames) = capture();

        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            relay_events(&mut subscription, incoming, Box::pin(sink)),
        )
        .await
        .expect("relay should end once the client closes");
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ws_relay_forwards_then_notices_disconnect() {
        use crate::coordinator::events::{ChangeEvent, ChangeKind};

        let bus = EventBus::default();
        let mut subscription = bus.subscribe();
        bus.publish(ChangeEvent::new(ChangeKind::RoomCreated, "r1").room("r1"));

        // client already gone: the stream ends with no close frame
        let incoming = futures_util::stream::empty::<std::result::Result<Message, axum::Error>>();
        let (sink, mut frames) = capture();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            relay_events(&mut subscription, incoming, Box::pin(sink)),
        )
        .await
        .expect("relay should end once the client is gone");

        match frames.try_recv() {
            Ok(Message::Text(text)) => assert!(text.contains("r1")),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(frames.try_recv().is_err());
    }
}
