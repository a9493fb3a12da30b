// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, AppointmentSearchQuery, AppointmentStatus, AppointmentType, BookAppointmentRequest,
    CancelAppointmentRequest, CheckInByNumberRequest, CompleteExaminationRequest,
    DeclareTimeOffRequest, RescheduleAppointmentRequest, SchedulingError, UpdateStatusRequest,
};
use crate::services::scheduling::SchedulingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingAppointmentsQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub hours_ahead: Option<i32>,
}

// ==============================================================================
// HELPERS
// ==============================================================================

fn actor_from_user(user: &User) -> Result<Actor, AppError> {
    Actor::from_user(user)
        .ok_or_else(|| AppError::Auth("caller has no recognized role".to_string()))
}

fn into_app_error(err: SchedulingError) -> AppError {
    match err {
        SchedulingError::AppointmentNotFound | SchedulingError::PatientNotFound => {
            AppError::NotFound(err.to_string())
        }
        SchedulingError::SlotAlreadyBooked
        | SchedulingError::DuplicateBookingForPatient
        | SchedulingError::ConcurrencyConflict => AppError::Conflict(err.to_string()),
        SchedulingError::Forbidden(msg) => AppError::Forbidden(msg),
        SchedulingError::DatabaseError(msg) => AppError::Database(msg),
        SchedulingError::SlotUnavailable
        | SchedulingError::DoctorUnavailable
        | SchedulingError::InvalidTransition { .. }
        | SchedulingError::CheckInWindowViolation(_)
        | SchedulingError::ValidationError(_) => AppError::BadRequest(err.to_string()),
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = actor_from_user(&user)?;

    // Patients book for themselves; clinical roles may book on their behalf.
    let is_own_booking = request.patient_id.to_string() == user.id;
    if !is_own_booking && !actor.role.is_clinical() {
        return Err(AppError::Forbidden(
            "not authorized to book an appointment for this patient".to_string(),
        ));
    }

    let service = SchedulingService::new(&state);
    let appointment = service.book(request, token).await.map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .reschedule(appointment_id, request, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .cancel(appointment_id, request, &actor, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// CHECK-IN HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn check_in_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .check_in(appointment_id, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

/// QR check-in by appointment number.
#[axum::debug_handler]
pub async fn check_in_by_number(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CheckInByNumberRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .check_in_by_number(&request.appointment_number, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// STATUS HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .update_status(appointment_id, request, &actor, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CompleteExaminationRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .complete(appointment_id, request, &actor, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

// ==============================================================================
// TIME OFF HANDLER
// ==============================================================================

#[axum::debug_handler]
pub async fn declare_time_off(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<DeclareTimeOffRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let actor = actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let outcome = service
        .declare_time_off(doctor_id, request, &actor, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "declaration": outcome.declaration,
        "cancelled_appointment_ids": outcome.cancelled_appointment_ids(),
        "disabled_slots": outcome.disabled_slots
    })))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointment = service
        .get_appointment(appointment_id, token)
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<AppointmentQueryParams>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        doctor_id: params.doctor_id,
        status: params.status,
        appointment_type: params.appointment_type,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    let service = SchedulingService::new(&state);
    let appointments = service
        .search_appointments(query, token)
        .await
        .map_err(into_app_error)?;
    let count = appointments.len();

    Ok(Json(json!({
        "success": true,
        "appointments": appointments,
        "count": count
    })))
}

#[axum::debug_handler]
pub async fn get_upcoming_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(params): Query<UpcomingAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    actor_from_user(&user)?;

    let service = SchedulingService::new(&state);
    let appointments = service
        .get_upcoming_appointments(params.patient_id, params.doctor_id, params.hours_ahead, token)
        .await
        .map_err(into_app_error)?;
    let count = appointments.len();

    Ok(Json(json!({
        "success": true,
        "appointments": appointments,
        "count": count
    })))
}
