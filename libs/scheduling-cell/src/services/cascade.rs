// libs/scheduling-cell/src/services/cascade.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, CancelledBy, DeclareTimeOffRequest, SchedulingError, TimeOffCascadeOutcome,
    TimeOffDeclaration,
};
use crate::services::catalog::representation_headers;
use crate::services::conflict::intervals_overlap;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::rows_to;

pub const TIME_OFF_CANCELLATION_REASON: &str = "doctor unavailable - time off declared";

const MAX_TIME_OFF_NOTE_CHARS: usize = 500;

fn time_bounds_regex() -> &'static Regex {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    TIME_RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid time regex"))
}

/// Cancellation events are handed to the notification collaborator; delivery
/// failures never roll back the scheduling transaction.
#[async_trait]
pub trait CancellationNotifier: Send + Sync {
    async fn notify_cancellation(&self, appointment: &Appointment, reason: &str);
}

pub struct TracingNotifier;

#[async_trait]
impl CancellationNotifier for TracingNotifier {
    async fn notify_cancellation(&self, appointment: &Appointment, reason: &str) {
        info!(
            "Notifying patient {} of cancelled appointment {}: {}",
            appointment.patient_id, appointment.id, reason
        );
    }
}

/// Reacts to a doctor declaring time off: cancels the live appointments the
/// interval covers and blocks the uncovered open slots.
pub struct TimeOffCascadeService {
    supabase: Arc<SupabaseClient>,
    lifecycle: AppointmentLifecycleService,
}

impl TimeOffCascadeService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self {
            supabase,
            lifecycle: AppointmentLifecycleService::new(),
        }
    }

    /// Validate a declaration's bounds before anything is persisted.
    pub fn validate_request(
        request: &DeclareTimeOffRequest,
        today: NaiveDate,
    ) -> Result<(NaiveTime, NaiveTime), SchedulingError> {
        let re = time_bounds_regex();
        if !re.is_match(&request.start_time) || !re.is_match(&request.end_time) {
            return Err(SchedulingError::ValidationError(
                "time-off bounds must use HH:MM format".to_string(),
            ));
        }

        let start = NaiveTime::parse_from_str(&request.start_time, "%H:%M")
            .map_err(|e| SchedulingError::ValidationError(e.to_string()))?;
        let end = NaiveTime::parse_from_str(&request.end_time, "%H:%M")
            .map_err(|e| SchedulingError::ValidationError(e.to_string()))?;

        if start >= end {
            return Err(SchedulingError::ValidationError(
                "time-off start must be before its end".to_string(),
            ));
        }

        if request.date < today {
            return Err(SchedulingError::ValidationError(
                "time off cannot be declared for a past date".to_string(),
            ));
        }

        if let Some(note) = &request.note {
            if note.chars().count() > MAX_TIME_OFF_NOTE_CHARS {
                return Err(SchedulingError::ValidationError(format!(
                    "time-off note must be at most {} characters",
                    MAX_TIME_OFF_NOTE_CHARS
                )));
            }
        }

        Ok((start, end))
    }

    pub async fn apply_time_off(
        &self,
        doctor_id: Uuid,
        request: DeclareTimeOffRequest,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<TimeOffCascadeOutcome, SchedulingError> {
        let (start, end) = Self::validate_request(&request, now.date_naive())?;

        info!(
            "Applying time off for doctor {} on {} {}-{}",
            doctor_id, request.date, request.start_time, request.end_time
        );

        let declaration = self
            .insert_declaration(doctor_id, &request, start, end, auth_token)
            .await?;

        let window_start = declaration.window_start();
        let window_end = declaration.window_end();

        let candidates = self
            .live_appointments_for_day(doctor_id, request.date, auth_token)
            .await?;

        let mut cancelled_appointments = Vec::new();
        for appointment in candidates {
            if !appointment_overlaps_window(&appointment, window_start, window_end) {
                continue;
            }

            let change = self.lifecycle.plan_cancellation(
                &appointment,
                TIME_OFF_CANCELLATION_REASON,
                CancelledBy::System,
                now,
                true, // slot stays blocked by the time-off interval
            )?;

            let updated = self
                .apply_cancellation(&appointment, change.patch_body(now), auth_token)
                .await?;
            cancelled_appointments.push(updated);
        }

        let disabled_slots = self
            .disable_open_slots(doctor_id, window_start, window_end, auth_token)
            .await?;

        info!(
            "Time off applied for doctor {}: {} appointment(s) cancelled, {} slot(s) disabled",
            doctor_id,
            cancelled_appointments.len(),
            disabled_slots
        );

        Ok(TimeOffCascadeOutcome {
            declaration,
            cancelled_appointments,
            disabled_slots,
        })
    }

    async fn insert_declaration(
        &self,
        doctor_id: Uuid,
        request: &DeclareTimeOffRequest,
        start: NaiveTime,
        end: NaiveTime,
        auth_token: &str,
    ) -> Result<TimeOffDeclaration, SchedulingError> {
        let body = json!({
            "doctor_id": doctor_id,
            "date": request.date,
            "start_time": start.format("%H:%M:%S").to_string(),
            "end_time": end.format("%H:%M:%S").to_string(),
            "is_active": true,
            "note": request.note,
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_off_declarations",
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await?;

        let mut declarations: Vec<TimeOffDeclaration> = rows_to(result)?;
        declarations.pop().ok_or_else(|| {
            SchedulingError::DatabaseError("failed to create time-off declaration".to_string())
        })
    }

    /// Only Pending/Confirmed appointments are cascade candidates; a visit
    /// that has begun cannot be cancelled by declaring time off.
    async fn live_appointments_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = date.and_hms_opt(23, 59, 59).unwrap().and_utc();

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=in.(pending,confirmed)&scheduled_start_time=gte.{}&scheduled_start_time=lte.{}&order=scheduled_start_time.asc",
            doctor_id,
            urlencoding::encode(&day_start.to_rfc3339()),
            urlencoding::encode(&day_end.to_rfc3339()),
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        rows_to(result)
    }

    async fn apply_cancellation(
        &self,
        appointment: &Appointment,
        patch: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Cascade-cancelling appointment {}", appointment.id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(patch),
                Some(representation_headers()),
            )
            .await?;

        let mut updated: Vec<Appointment> = rows_to(result)?;
        updated.pop().ok_or_else(|| {
            SchedulingError::DatabaseError(format!(
                "failed to cancel appointment {}",
                appointment.id
            ))
        })
    }

    /// Block the interval's remaining open slots so nothing new can be booked
    /// into it. Slots already consumed by a surviving appointment are left
    /// untouched.
    async fn disable_open_slots(
        &self,
        doctor_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<usize, SchedulingError> {
        let path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&is_available=eq.true&start_time=lt.{}&end_time=gt.{}",
            doctor_id,
            urlencoding::encode(&window_end.to_rfc3339()),
            urlencoding::encode(&window_start.to_rfc3339()),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(json!({ "is_available": false, "time_off": true })),
                Some(representation_headers()),
            )
            .await?;

        Ok(result.len())
    }
}

/// Whether an appointment's scheduled interval intersects the time-off window.
pub fn appointment_overlaps_window(
    appointment: &Appointment,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> bool {
    intervals_overlap(
        appointment.scheduled_start_time,
        appointment.scheduled_end_time,
        window_start,
        window_end,
    )
}
