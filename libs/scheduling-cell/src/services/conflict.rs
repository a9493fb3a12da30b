// libs/scheduling-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentStatus, SchedulingError, TimeOffDeclaration, TimeSlot,
};
use crate::services::rows_to;

/// Half-open interval overlap: [start1, end1) intersects [start2, end2).
pub fn intervals_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    start1 < end2 && start2 < end1
}

/// Decides bookability for a (doctor, patient, slot) triple. Rules run in
/// order and the first failure wins; the storage-level unique index on live
/// appointments per slot remains the authoritative double-booking guard.
pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn check_bookable(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        debug!(
            "Checking bookability of slot {} for doctor {} / patient {}",
            slot.id, doctor_id, patient_id
        );

        // Rule 1: the slot must belong to the doctor and be open.
        if slot.doctor_id != doctor_id || !slot.is_available || slot.time_off {
            return Err(SchedulingError::SlotUnavailable);
        }

        // Rule 2: no live appointment may already hold the slot.
        let occupants = self
            .live_appointments_for_slot(slot.id, exclude_appointment_id, auth_token)
            .await?;
        if !occupants.is_empty() {
            warn!(
                "Slot {} already hosts {} live appointment(s)",
                slot.id,
                occupants.len()
            );
            return Err(SchedulingError::SlotAlreadyBooked);
        }

        // Rule 3: the slot must not fall inside an active time-off interval.
        if self.covered_by_time_off(doctor_id, slot, auth_token).await? {
            return Err(SchedulingError::DoctorUnavailable);
        }

        // Rule 4: courtesy guard against the same patient double-booking the
        // same doctor over an overlapping interval.
        let duplicates = self
            .patient_overlapping_appointments(
                patient_id,
                doctor_id,
                slot,
                exclude_appointment_id,
                auth_token,
            )
            .await?;
        if !duplicates.is_empty() {
            return Err(SchedulingError::DuplicateBookingForPatient);
        }

        Ok(())
    }

    async fn live_appointments_for_slot(
        &self,
        slot_id: Uuid,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let mut query_parts = vec![
            format!("time_slot_id=eq.{}", slot_id),
            format!("status={}", AppointmentStatus::live_filter()),
        ];
        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        rows_to(result)
    }

    async fn covered_by_time_off(
        &self,
        doctor_id: Uuid,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<bool, SchedulingError> {
        let path = format!(
            "/rest/v1/time_off_declarations?doctor_id=eq.{}&is_active=eq.true&date=eq.{}",
            doctor_id,
            slot.start_time.date_naive()
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let declarations: Vec<TimeOffDeclaration> = rows_to(result)?;
        Ok(declarations.iter().any(|declaration| {
            intervals_overlap(
                declaration.window_start(),
                declaration.window_end(),
                slot.start_time,
                slot.end_time,
            )
        }))
    }

    async fn patient_overlapping_appointments(
        &self,
        patient_id: Uuid,
        doctor_id: Uuid,
        slot: &TimeSlot,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let day = slot.start_time.date_naive();
        let day_start = day.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day.and_hms_opt(23, 59, 59).unwrap().and_utc();

        let mut query_parts = vec![
            format!("patient_id=eq.{}", patient_id),
            format!("doctor_id=eq.{}", doctor_id),
            format!("status={}", AppointmentStatus::live_filter()),
            format!(
                "scheduled_start_time=gte.{}",
                urlencoding::encode(&day_start.to_rfc3339())
            ),
            format!(
                "scheduled_start_time=lte.{}",
                urlencoding::encode(&day_end.to_rfc3339())
            ),
        ];
        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}", query_parts.join("&"));
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let appointments: Vec<Appointment> = rows_to(result)?;
        Ok(appointments
            .into_iter()
            .filter(|appointment| {
                intervals_overlap(
                    appointment.scheduled_start_time,
                    appointment.scheduled_end_time,
                    slot.start_time,
                    slot.end_time,
                )
            })
            .collect())
    }
}
