use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::SchedulingError;
use scheduling_cell::services::conflict::{intervals_overlap, ConflictDetectionService};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

mod common;
use common::test_slot;

fn conflict_service(mock_server: &MockServer) -> ConflictDetectionService {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    ConflictDetectionService::new(Arc::new(SupabaseClient::new(&config)))
}

#[test]
fn overlap_is_half_open() {
    let base = Utc::now();
    let a = (base, base + Duration::minutes(30));
    let b = (base + Duration::minutes(30), base + Duration::minutes(60));

    // touching intervals do not overlap
    assert!(!intervals_overlap(a.0, a.1, b.0, b.1));
    assert!(intervals_overlap(a.0, a.1, b.0 - Duration::minutes(1), b.1));
    assert!(intervals_overlap(a.0, a.1, a.0, a.1));
}

#[tokio::test]
async fn unavailable_slot_fails_before_any_lookup() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let doctor_id = Uuid::new_v4();
    let mut slot = test_slot(doctor_id, Utc::now() + Duration::days(1));
    slot.is_available = false;

    let result = service
        .check_bookable(doctor_id, Uuid::new_v4(), &slot, None, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::SlotUnavailable));
}

#[tokio::test]
async fn slot_owned_by_another_doctor_is_unavailable() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let slot = test_slot(Uuid::new_v4(), Utc::now() + Duration::days(1));

    let result = service
        .check_bookable(Uuid::new_v4(), Uuid::new_v4(), &slot, None, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::SlotUnavailable));
}

#[tokio::test]
async fn occupied_slot_fails_with_slot_already_booked() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let slot = test_slot(doctor_id, Utc::now() + Duration::days(1));

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("time_slot_id", format!("eq.{}", slot.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &Uuid::new_v4().to_string(),
                &doctor_id.to_string(),
                &slot.id.to_string(),
                slot.start_time,
                "in_clinic",
                "confirmed",
            )
        ])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(doctor_id, patient_id, &slot, None, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::SlotAlreadyBooked));
}

#[tokio::test]
async fn slot_inside_active_time_off_fails_with_doctor_unavailable() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let doctor_id = Uuid::new_v4();
    let slot = test_slot(doctor_id, Utc::now() + Duration::days(1));
    let slot_date = slot.start_time.date_naive().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_off_declarations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_off_response(
                &doctor_id.to_string(),
                &slot_date,
                "00:00:00",
                "23:59:00",
            )
        ])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(doctor_id, Uuid::new_v4(), &slot, None, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::DoctorUnavailable));
}

#[tokio::test]
async fn overlapping_booking_by_same_patient_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let doctor_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let slot = test_slot(doctor_id, Utc::now() + Duration::days(1));

    // nothing holds the slot itself
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("time_slot_id", format!("eq.{}", slot.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_off_declarations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // but the patient already has a live appointment over the same interval
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::appointment_response(
                &patient_id.to_string(),
                &doctor_id.to_string(),
                &Uuid::new_v4().to_string(),
                slot.start_time,
                "video",
                "confirmed",
            )
        ])))
        .mount(&mock_server)
        .await;

    let result = service
        .check_bookable(doctor_id, patient_id, &slot, None, "token")
        .await;
    assert_matches!(result, Err(SchedulingError::DuplicateBookingForPatient));
}

#[tokio::test]
async fn free_slot_with_no_conflicts_is_bookable() {
    let mock_server = MockServer::start().await;
    let service = conflict_service(&mock_server);

    let doctor_id = Uuid::new_v4();
    let slot = test_slot(doctor_id, Utc::now() + Duration::days(1));

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

    let result = service
        .check_bookable(doctor_id, Uuid::new_v4(), &slot, None, "token")
        .await;
    assert!(result.is_ok());
}
