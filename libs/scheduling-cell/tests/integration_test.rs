use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::router::{scheduling_routes, time_off_routes};
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn test_config(mock_server: &MockServer) -> (AppConfig, String) {
    let config = TestConfig::with_supabase_url(&mock_server.uri());
    let secret = config.jwt_secret.clone();
    (config.to_app_config(), secret)
}

async fn create_test_app(config: AppConfig) -> Router {
    scheduling_routes(Arc::new(config))
}

async fn read_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body is readable");
    serde_json::from_slice(&bytes).expect("body is json")
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let mock_server = MockServer::start().await;
    let (config, _) = test_config(&mock_server);
    let app = create_test_app(config).await;

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_tokens_are_rejected() {
    let mock_server = MockServer::start().await;
    let (config, _) = test_config(&mock_server);
    let app = create_test_app(config).await;

    let request = Request::builder()
        .method("GET")
        .uri("/upcoming")
        .header("Authorization", format!("Bearer {}", JwtTestUtils::create_malformed_token()))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn patient_books_own_appointment() {
    let mock_server = MockServer::start().await;
    let (config, secret) = test_config(&mock_server);

    let patient = TestUser::patient("patient@example.com");
    let patient_id = patient.id.clone();
    let doctor_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let start = Utc::now() + Duration::days(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_response(&patient_id, "patient@example.com", "Test Patient")
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_response(
                &slot_id.to_string(),
                &doctor_id.to_string(),
                start,
                start + Duration::minutes(30),
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &patient_id,
                &doctor_id.to_string(),
                &slot_id.to_string(),
                start,
                "in_clinic",
                "pending",
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_response(
                &slot_id.to_string(),
                &doctor_id.to_string(),
                start,
                start + Duration::minutes(30),
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_off_declarations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&patient, &secret, Some(24));
    let app = create_test_app(config).await;

    let body = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "time_slot_id": slot_id,
        "appointment_type": "in_clinic"
    });

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["status"], "pending");
}

#[tokio::test]
async fn patient_cannot_book_for_someone_else() {
    let mock_server = MockServer::start().await;
    let (config, secret) = test_config(&mock_server);

    let patient = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &secret, Some(24));
    let app = create_test_app(config).await;

    let body = json!({
        "patient_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "time_slot_id": Uuid::new_v4(),
        "appointment_type": "video"
    });

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn patients_cannot_declare_time_off_over_http() {
    let mock_server = MockServer::start().await;
    let (config, secret) = test_config(&mock_server);

    let patient = TestUser::patient("patient@example.com");
    let token = JwtTestUtils::create_test_token(&patient, &secret, Some(24));
    let app = time_off_routes(Arc::new(config));

    let tomorrow = Utc::now().date_naive() + Duration::days(1);
    let body = json!({
        "date": tomorrow,
        "start_time": "08:00",
        "end_time": "12:00"
    });

    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/time-off", Uuid::new_v4()))
        .header("Authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn booking_a_consumed_slot_returns_conflict() {
    let mock_server = MockServer::start().await;
    let (config, secret) = test_config(&mock_server);

    let staff = TestUser::staff("staff@example.com");
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let start = Utc::now() + Duration::days(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::patient_response(
                &patient_id.to_string(),
                "patient@example.com",
                "Test Patient"
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_response(
                &slot_id.to_string(),
                &doctor_id.to_string(),
                start,
                start + Duration::minutes(30),
            )
        ])))
        .mount(&mock_server)
        .await;

    // another live appointment already holds the slot
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                &slot_id.to_string(),
                start,
                "in_clinic",
                "confirmed",
            )
        ])))
        .mount(&mock_server)
        .await;

    let token = JwtTestUtils::create_test_token(&staff, &secret, Some(24));
    let app = create_test_app(config).await;

    let body = json!({
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "time_slot_id": slot_id,
        "appointment_type": "in_clinic"
    });

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
