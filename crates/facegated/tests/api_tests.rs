//! Integration tests for the facegated HTTP API, driven through the router
//! with an in-memory store and scripted camera/detector doubles.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use facegate_core::{BoundingBox, Descriptor, Detection, Detector, DetectorError, GateConfig, DESCRIPTOR_DIM};
use facegate_hw::{CameraError, CameraOpener, Frame, FrameSource};
use facegated::engine::{spawn_engine, EngineSettings};
use facegated::session::SessionConfig;
use facegated::store::EnrollmentStore;
use facegated::{build_router, AppState};
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

struct StillCamera;

struct StillSource(u32);

impl FrameSource for StillSource {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        self.0 += 1;
        Ok(Frame::new(vec![120; 32 * 32], 32, 32, self.0))
    }

    fn describe(&self) -> String {
        "still".into()
    }
}

impl CameraOpener for StillCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(StillSource(0)))
    }
}

/// Always sees the same face.
struct SteadyFace(f32);

impl Detector for SteadyFace {
    fn detect(&mut self, _frame: &[u8], _w: u32, _h: u32) -> Result<Option<Detection>, DetectorError> {
        Ok(Some(Detection {
            descriptor: Descriptor::new(vec![self.0; DESCRIPTOR_DIM])?,
            quality_score: 0.9,
            face: BoundingBox {
                x: 4.0,
                y: 4.0,
                width: 20.0,
                height: 20.0,
                confidence: 0.9,
                landmarks: None,
            },
        }))
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        session: SessionConfig {
            gate: GateConfig {
                required_samples: 3,
                ..GateConfig::default()
            },
            abort_on_face_lost: false,
            timeout: Duration::from_secs(2),
        },
        warmup_frames: 0,
        preview_dir: None,
    }
}

async fn app_with(detector: Option<Box<dyn Detector + Send>>, token: Option<&str>) -> Router {
    let store = EnrollmentStore::open_in_memory(0.5).await.unwrap();
    let camera: Option<Box<dyn CameraOpener>> = Some(Box::new(StillCamera));
    let engine = spawn_engine(detector, camera, settings()).unwrap();
    let state = AppState::new(store, engine, Default::default(), token);
    build_router(state)
}

async fn app() -> Router {
    app_with(None, None).await
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn enrollment(user: &str, fill: f32) -> Value {
    json!({
        "userId": user,
        "descriptor": vec![fill; DESCRIPTOR_DIM],
        "qualityScore": 0.8,
    })
}

async fn register(app: &Router, user: &str, fill: f32) -> (StatusCode, Value) {
    send(app, json_request("POST", "/facial-recognition", enrollment(user, fill))).await
}

// =============================================================================
// Health and auth
// =============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let app = app_with(None, Some("s3cret")).await;
    let (status, body) = send(&app, empty_request("GET", "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "facegated");
}

#[tokio::test]
async fn test_bearer_token_required_when_configured() {
    let app = app_with(None, Some("s3cret")).await;

    let (status, body) = send(&app, empty_request("GET", "/status")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let request = Request::builder()
        .uri("/status")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrolled"], 0);
    assert_eq!(body["detectorLoaded"], false);
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_register_returns_created_record() {
    let app = app().await;
    let (status, body) = register(&app, "alice", 0.1).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["isPrimary"], true);
    assert!(body["id"].is_string());
    assert!(body["createdAt"].is_string());
    assert!((body["qualityScore"].as_f64().unwrap() - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn test_register_rejects_wrong_length() {
    let app = app().await;
    for len in [127, 129] {
        let body = json!({"userId": "alice", "descriptor": vec![0.1; len], "qualityScore": 0.8});
        let (status, body) = send(&app, json_request("POST", "/facial-recognition", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_descriptor");
    }
    let (_, list) = send(&app, empty_request("GET", "/facial-recognition?userId=alice")).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_register_rejects_malformed_body() {
    let app = app().await;
    let body = json!({"userId": "alice", "descriptor": "not a vector", "qualityScore": 0.8});
    let (status, _) = send(&app, json_request("POST", "/facial-recognition", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_rejects_secondary_descriptor() {
    let app = app().await;
    let mut body = enrollment("alice", 0.1);
    body["isPrimary"] = json!(false);
    let (status, _) = send(&app, json_request("POST", "/facial-recognition", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_rejects_low_quality() {
    let app = app().await;
    let mut body = enrollment("alice", 0.1);
    body["qualityScore"] = json!(0.2);
    let (status, body) = send(&app, json_request("POST", "/facial-recognition", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "quality_too_low");
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = app().await;
    let (_, first) = register(&app, "alice", 0.1).await;
    let (status, body) = register(&app, "alice", 0.2).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["alreadyRegistered"], true);
    assert_eq!(body["registeredAt"], first["createdAt"]);
}

#[tokio::test]
async fn test_concurrent_registration_exactly_one_wins() {
    let app = app().await;
    let (a, b) = tokio::join!(register(&app, "alice", 0.1), register(&app, "alice", 0.2));
    let mut statuses = [a.0, b.0];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

    let (_, list) = send(&app, empty_request("GET", "/facial-recognition?userId=alice")).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

// =============================================================================
// Lookup and removal
// =============================================================================

#[tokio::test]
async fn test_list_requires_user_id() {
    let app = app().await;
    let (status, _) = send(&app, empty_request("GET", "/facial-recognition")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_then_reenroll() {
    let app = app().await;
    let (_, record) = register(&app, "alice", 0.1).await;
    let id = record["id"].as_str().unwrap().to_string();

    let (_, list) = send(&app, empty_request("GET", "/facial-recognition?userId=alice")).await;
    assert_eq!(list[0]["id"], id.as_str());
    assert_eq!(list[0]["userId"], "alice");
    assert!(list[0].get("descriptor").is_none());

    let (status, body) = send(&app, empty_request("DELETE", &format!("/facial-recognition/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["id"], id.as_str());

    let (status, _) = send(&app, empty_request("DELETE", &format!("/facial-recognition/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = register(&app, "alice", 0.3).await;
    assert_eq!(status, StatusCode::CREATED);
}

// =============================================================================
// Members
// =============================================================================

#[tokio::test]
async fn test_member_filters() {
    let app = app().await;
    for (id, name) in [("u1", "Ada"), ("u2", "Bo")] {
        let body = json!({"userId": id, "displayName": name});
        let (status, _) = send(&app, json_request("POST", "/facial-recognition/members", body)).await;
        assert_eq!(status, StatusCode::OK);
    }
    register(&app, "u1", 0.1).await;

    let ids = |v: &Value| -> Vec<String> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|m| m["userId"].as_str().unwrap().to_string())
            .collect()
    };

    let (_, all) = send(&app, empty_request("GET", "/facial-recognition/members")).await;
    assert_eq!(ids(&all), ["u1", "u2"]);
    let (_, with) = send(
        &app,
        empty_request("GET", "/facial-recognition/members?withFaceDescriptor=true"),
    )
    .await;
    assert_eq!(ids(&with), ["u1"]);
    let (_, without) = send(
        &app,
        empty_request("GET", "/facial-recognition/members?withoutFaceDescriptor=true"),
    )
    .await;
    assert_eq!(ids(&without), ["u2"]);

    let (status, _) = send(
        &app,
        empty_request(
            "GET",
            "/facial-recognition/members?withFaceDescriptor=true&withoutFaceDescriptor=true",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Identification
// =============================================================================

#[tokio::test]
async fn test_identify_outcomes() {
    let app = app().await;

    let probe = |fill: f32| json!({"descriptor": vec![fill; DESCRIPTOR_DIM]});
    let (status, body) = send(&app, json_request("POST", "/facial-recognition/identify", probe(0.1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "noMatch");
    assert!(body["nearestDistance"].is_null());

    register(&app, "alice", 0.1).await;
    let (_, body) = send(&app, json_request("POST", "/facial-recognition/identify", probe(0.1))).await;
    assert_eq!(body["status"], "match");
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["distance"], 0.0);
    assert_eq!(body["confidence"], 1.0);

    // Every component off by 0.5: distance sqrt(128 * 0.25) ≈ 5.66.
    let (_, body) = send(&app, json_request("POST", "/facial-recognition/identify", probe(0.6))).await;
    assert_eq!(body["status"], "noMatch");
    assert!(body["nearestDistance"].as_f64().unwrap() > 0.6);

    // Same vector enrolled twice under different identities.
    register(&app, "bob", 0.1).await;
    let (_, body) = send(&app, json_request("POST", "/facial-recognition/identify", probe(0.1))).await;
    assert_eq!(body["status"], "ambiguous");
    assert_eq!(body["candidates"].as_array().unwrap().len(), 2);

    let bad = json!({"descriptor": vec![0.1; 64]});
    let (status, _) = send(&app, json_request("POST", "/facial-recognition/identify", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Capture sessions
// =============================================================================

#[tokio::test]
async fn test_session_enroll_then_check_in() {
    let app = app_with(Some(Box::new(SteadyFace(0.2))), None).await;

    let body = json!({"userId": "alice"});
    let (status, record) = send(&app, json_request("POST", "/facial-recognition/sessions/enroll", body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["userId"], "alice");
    assert_eq!(record["sampleCount"], 3);

    // Pre-flight refusal before the camera is opened.
    let body = json!({"userId": "alice"});
    let (status, body) = send(&app, json_request("POST", "/facial-recognition/sessions/enroll", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["alreadyRegistered"], true);

    // Issued as soon as the enrollment returns; the engine is already idle.
    let (status, result) = send(&app, empty_request("POST", "/facial-recognition/sessions/check-in")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "match");
    assert_eq!(result["userId"], "alice");
}

#[tokio::test]
async fn test_session_preview_removed_when_store_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings();
    settings.preview_dir = Some(dir.path().to_path_buf());
    // Camera sessions accept quality 0.9; the store demands more.
    let store = EnrollmentStore::open_in_memory(0.95).await.unwrap();
    let engine = spawn_engine(Some(Box::new(SteadyFace(0.2))), Some(Box::new(StillCamera)), settings).unwrap();
    let app = build_router(AppState::new(store, engine, Default::default(), None));

    let body = json!({"userId": "alice"});
    let (status, body) = send(&app, json_request("POST", "/facial-recognition/sessions/enroll", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "quality_too_low");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_session_without_detector_is_unavailable() {
    let app = app().await;
    let body = json!({"userId": "alice"});
    let (status, body) = send(&app, json_request("POST", "/facial-recognition/sessions/enroll", body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "detector_unavailable");
}

#[tokio::test]
async fn test_cancel_when_idle() {
    let app = app().await;
    let (status, body) = send(&app, empty_request("POST", "/facial-recognition/sessions/cancel")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}
