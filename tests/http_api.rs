//! HTTP API tests, driving the router in-process

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use roomalloc::common::{AuditLogger, CoordinatorConfig};
use roomalloc::coordinator::http::{create_router, CoordState};
use roomalloc::coordinator::MemStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    create_router(CoordState::new(
        Arc::new(MemStore::new()),
        &CoordinatorConfig::default(),
        Arc::new(AuditLogger::disabled()),
    ))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Actor-Id", "warden-1");
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn approved_application(app: &Router, student: &str) -> String {
    let (status, created) = call(
        app,
        Method::POST,
        "/api/applications",
        Some(json!({ "student_id": student, "semester": "2024-S1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, approved) = call(
        app,
        Method::PATCH,
        &format!("/api/applications/{}/approve", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["review"]["reviewed_by"], "warden-1");
    id
}

#[tokio::test]
async fn test_allocation_lifecycle() {
    let app = app();

    let (status, room) = call(
        &app,
        Method::POST,
        "/api/rooms",
        Some(json!({ "room_number": "101", "hostel_id": "north", "capacity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let room_id = room["id"].as_str().unwrap().to_string();

    let first = approved_application(&app, "s1").await;
    let (status, allocation) = call(
        &app,
        Method::POST,
        "/api/allocations",
        Some(json!({ "application_id": first, "room_id": room_id, "bed_label": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(allocation["status"], "active");
    assert_eq!(allocation["allocated_by"], "warden-1");
    let allocation_id = allocation["id"].as_str().unwrap().to_string();

    // room is now full
    let second = approved_application(&app, "s2").await;
    let (status, err) = call(
        &app,
        Method::POST,
        "/api/allocations",
        Some(json!({ "application_id": second, "room_id": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "full");

    // same application again
    let (status, err) = call(
        &app,
        Method::POST,
        "/api/allocations",
        Some(json!({ "application_id": first, "room_id": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["kind"], "invalid_state");

    let (status, occupancy) = call(&app, Method::GET, "/api/hostels/north/occupancy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(occupancy["occupied"], 1);
    assert_eq!(occupancy["occupancyRate"], 100.0);

    let (status, ended) = call(
        &app,
        Method::PATCH,
        &format!("/api/allocations/{}/end", allocation_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "cancelled");
    assert_eq!(ended["cancelled_by"], "warden-1");

    let (status, _) = call(
        &app,
        Method::DELETE,
        &format!("/api/allocations/{}", allocation_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/allocations",
        Some(json!({ "application_id": second, "room_id": room_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, listed) = call(
        &app,
        Method::GET,
        &format!("/api/rooms/{}/allocations?status=active", room_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, verify) = call(&app, Method::GET, "/admin/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify["status"], "ok");
}

#[tokio::test]
async fn test_error_bodies() {
    let app = app();

    let (status, err) = call(&app, Method::GET, "/api/rooms/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["kind"], "not_found");
    assert!(err["error"].as_str().unwrap().contains("missing"));

    let (status, err) = call(
        &app,
        Method::POST,
        "/api/rooms",
        Some(json!({ "room_number": "1", "hostel_id": "north", "capacity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "invalid_input");

    let (status, err) = call(&app, Method::GET, "/api/hostels/nowhere/occupancy", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["kind"], "not_found");

    let (status, created) = call(
        &app,
        Method::POST,
        "/api/applications",
        Some(json!({ "student_id": "s9", "semester": "2024-S1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap();
    let (status, err) = call(
        &app,
        Method::PATCH,
        &format!("/api/applications/{}/reject", id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "invalid_input");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app();

    let (status, health) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    let (status, live) = call(&app, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["alive"], true);

    let resp = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("roomalloc_allocations_committed_total"));
}

#[tokio::test]
async fn test_unmatched_paths_share_one_metrics_label() {
    let state = CoordState::new(
        Arc::new(MemStore::new()),
        &CoordinatorConfig::default(),
        Arc::new(AuditLogger::disabled()),
    );
    let metrics = state.metrics.clone();
    let app = create_router(state);

    for uri in ["/scan/wp-admin", "/scan/.env", "/api/rooms/r1/nothing-here"] {
        let (status, _) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    call(&app, Method::GET, "/api/rooms/missing", None).await;

    let text = metrics.to_prometheus();
    assert!(text.contains("roomalloc_endpoint_requests_total{path=\"unmatched\"} 3"));
    assert!(text.contains("roomalloc_endpoint_requests_total{path=\"/api/rooms/:id\"} 1"));
    assert!(!text.contains("wp-admin"));
    assert!(!text.contains(".env"));
}
