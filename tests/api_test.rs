//! HTTP surface exercised through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{at, Harness, SECRET};
use conference_server::config::Config;
use conference_server::routes::create_routes;
use conference_server::services::register_metrics;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn config() -> Config {
    Config::from_lookup(|key| match key {
        "TICKET_SECRET" => Some(SECRET.to_string()),
        _ => None,
    })
    .unwrap()
}

fn app(h: &Harness) -> Router {
    create_routes(h.state.clone(), &config(), None)
}

fn request(method: &str, uri: &str, caller: Option<(Uuid, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = caller {
        builder = builder
            .header("x-user-id", user_id.to_string())
            .header("x-user-role", role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint_serves_recorder_snapshot() {
    let h = Harness::new();
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        register_metrics();
        metrics::counter!("tickets_issued_total").increment(3);
    });

    let app = create_routes(h.state.clone(), &config(), Some(handle));
    let response = app
        .oneshot(request("GET", "/metrics", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tickets_issued_total 3"));

    let (status, _) = send(&crate::app(&h), request("GET", "/metrics", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_identity_is_required() {
    let h = Harness::new();
    let (status, body) = send(&app(&h), request("GET", "/enrollments", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");
}

#[tokio::test]
async fn test_enroll_redeem_flow() {
    let h = Harness::new();
    let app = app(&h);
    let user = h.user("Ada");
    let staff = h.user("Door");
    let activity = h.activity("Keynote", Some((at(9, 0), at(10, 0))), Some(10));

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/enrollments",
            Some((user, "attendee")),
            Some(json!({ "activity_ids": [activity] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["seats"][0]["seat_number"], 1);
    assert_eq!(body["data"]["pending_tickets"], json!([]));
    let token = body["data"]["seats"][0]["ticket"]["token"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/tickets/redeem",
            Some((user, "attendee")),
            Some(json!({ "token": token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/tickets/validate",
            Some((staff, "staff")),
            Some(json!({ "token": token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["format"], "signed");
    assert_eq!(body["data"]["user_id"], user.to_string());

    let redeem = || {
        request(
            "POST",
            "/tickets/redeem",
            Some((staff, "staff")),
            Some(json!({ "token": token, "activity_id": activity })),
        )
    };
    let (status, first) = send(&app, redeem()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["already_processed"], false);

    let (status, second) = send(&app, redeem()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["already_processed"], true);
    assert_eq!(second["data"]["processed_at"], first["data"]["processed_at"]);
}

#[tokio::test]
async fn test_rejections_map_to_status_codes() {
    let h = Harness::new();
    let app = app(&h);
    let user = h.user("Ada");
    let staff = h.user("Door");
    let full = h.activity("Tiny room", None, Some(1));
    let rival = h.user("Rival");
    h.state.scheduler.admit_batch(rival, &[full]).await.unwrap();

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/enrollments",
            Some((user, "attendee")),
            Some(json!({ "activity_ids": [full] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CAPACITY_EXCEEDED");

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/tickets/validate",
            Some((staff, "staff")),
            Some(json!({ "token": "eyJ.garbage" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["message"], "Invalid ticket code");
}

#[tokio::test]
async fn test_cancel_through_api() {
    let h = Harness::new();
    let app = app(&h);
    let user = h.user("Ada");
    let activity = h.activity("Workshop", None, None);
    let receipt = h.state.scheduler.admit_batch(user, &[activity]).await.unwrap();
    let uri = format!("/enrollments/{}", receipt.seats[0].enrollment_id);

    let (status, _) = send(&app, request("DELETE", &uri, Some((Uuid::new_v4(), "attendee")), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, request("DELETE", &uri, Some((user, "attendee")), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request("GET", "/enrollments", Some((user, "attendee")), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
