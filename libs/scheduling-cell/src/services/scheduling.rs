// libs/scheduling-cell/src/services/scheduling.rs
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    generate_appointment_number, Actor, ActorRole, Appointment, AppointmentSearchQuery,
    AppointmentStatus, AppointmentType, BookAppointmentRequest, CancelAppointmentRequest,
    CheckInDenial, CompleteExaminationRequest, DeclareTimeOffRequest,
    RescheduleAppointmentRequest, SchedulingError, TimeOffCascadeOutcome, TimeSlot,
    UpdateStatusRequest,
};
use crate::services::cascade::{
    CancellationNotifier, TimeOffCascadeService, TracingNotifier, TIME_OFF_CANCELLATION_REASON,
};
use crate::services::catalog::{representation_headers, SlotCatalogService};
use crate::services::checkin::CheckInValidatorService;
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::{AppointmentLifecycleService, SlotDisposition, StatusChange};
use crate::services::rows_to;

/// Orchestrates booking, rescheduling, cancellation, check-in, manual status
/// transitions, and time-off cascades. Each operation is one unit of work
/// against the store; the partial unique index on live appointments per slot
/// arbitrates concurrent bookers.
pub struct SchedulingService {
    supabase: Arc<SupabaseClient>,
    catalog: SlotCatalogService,
    conflict: ConflictDetectionService,
    lifecycle: AppointmentLifecycleService,
    checkin: CheckInValidatorService,
    cascade: TimeOffCascadeService,
    notifier: Arc<dyn CancellationNotifier>,
}

impl SchedulingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_notifier(config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(config: &AppConfig, notifier: Arc<dyn CancellationNotifier>) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            catalog: SlotCatalogService::new(Arc::clone(&supabase)),
            conflict: ConflictDetectionService::new(Arc::clone(&supabase)),
            lifecycle: AppointmentLifecycleService::new(),
            checkin: CheckInValidatorService::new(),
            cascade: TimeOffCascadeService::new(Arc::clone(&supabase)),
            notifier,
            supabase,
        }
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    pub async fn book(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Booking slot {} for patient {} with doctor {}",
            request.time_slot_id, request.patient_id, request.doctor_id
        );

        self.verify_patient_exists(request.patient_id, auth_token).await?;

        let slot = self
            .catalog
            .find_slot(request.doctor_id, request.time_slot_id, auth_token)
            .await?;

        if slot.start_time <= Utc::now() {
            return Err(SchedulingError::ValidationError(
                "cannot book a slot in the past".to_string(),
            ));
        }

        self.conflict
            .check_bookable(request.doctor_id, request.patient_id, &slot, None, auth_token)
            .await?;

        let appointment = self.insert_appointment(&request, &slot, auth_token).await?;
        self.catalog.mark_consumed(slot.id, auth_token).await?;

        info!(
            "Appointment {} ({}) booked for slot {}",
            appointment.id, appointment.appointment_number, slot.id
        );
        Ok(appointment)
    }

    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Rescheduling appointment {}", appointment_id);

        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        self.lifecycle.validate_reschedulable(&appointment)?;

        let new_slot = self
            .catalog
            .find_slot(appointment.doctor_id, request.new_time_slot_id, auth_token)
            .await?;

        if new_slot.start_time <= Utc::now() {
            return Err(SchedulingError::ValidationError(
                "cannot reschedule to a slot in the past".to_string(),
            ));
        }

        self.conflict
            .check_bookable(
                appointment.doctor_id,
                appointment.patient_id,
                &new_slot,
                Some(appointment.id),
                auth_token,
            )
            .await?;

        self.catalog.release(appointment.time_slot_id, auth_token).await?;

        // Status and appointment number survive the move; already-issued QR
        // codes stay valid.
        let updated = self
            .patch_appointment(
                appointment.id,
                json!({
                    "time_slot_id": new_slot.id,
                    "scheduled_start_time": new_slot.start_time.to_rfc3339(),
                    "scheduled_end_time": new_slot.end_time.to_rfc3339(),
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        self.catalog.mark_consumed(new_slot.id, auth_token).await?;

        info!(
            "Appointment {} rescheduled to slot {}",
            appointment.id, new_slot.id
        );
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Cancelling appointment {}", appointment_id);

        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        authorize_patient_owned(&appointment, actor)?;

        let change = self.lifecycle.plan_cancellation(
            &appointment,
            &request.reason,
            request.cancelled_by,
            Utc::now(),
            false,
        )?;

        let updated = self
            .apply_status_change(&appointment, &change, auth_token)
            .await?;

        self.notifier
            .notify_cancellation(&updated, &request.reason)
            .await;

        info!("Appointment {} cancelled", appointment_id);
        Ok(updated)
    }

    // ==========================================================================
    // CHECK-IN & STATUS
    // ==========================================================================

    pub async fn check_in(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        let now = Utc::now();

        match self.checkin.can_check_in(&appointment, now) {
            Ok(()) => {
                let queue_number = match appointment.appointment_type {
                    AppointmentType::InClinic => Some(
                        self.next_queue_number(
                            appointment.doctor_id,
                            appointment.scheduled_start_time,
                            auth_token,
                        )
                        .await?,
                    ),
                    AppointmentType::Video => None,
                };

                let change = self.lifecycle.plan_check_in(&appointment, now, queue_number)?;
                let updated = self
                    .apply_status_change(&appointment, &change, auth_token)
                    .await?;

                info!(
                    "{} appointment {} checked in",
                    updated.appointment_type, updated.id
                );
                Ok(updated)
            }
            Err(denied @ SchedulingError::CheckInWindowViolation(CheckInDenial::TooLate { .. })) => {
                // The window fully elapsed without a check-in: lazily expire
                // the appointment to no-show, then surface the denial.
                if let Ok(change) = self.lifecycle.plan_no_show(&appointment, now) {
                    warn!(
                        "Appointment {} expired to no-show on late check-in attempt",
                        appointment.id
                    );
                    self.apply_status_change(&appointment, &change, auth_token)
                        .await?;
                }
                Err(denied)
            }
            Err(other) => Err(other),
        }
    }

    /// QR check-in: the appointment number must resolve to exactly one live
    /// appointment.
    pub async fn check_in_by_number(
        &self,
        appointment_number: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .find_live_by_number(appointment_number, auth_token)
            .await?;
        self.check_in(appointment.id, auth_token).await
    }

    /// Staff-driven manual transition. Completion and cancellation have
    /// dedicated operations carrying their required payloads.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        request: UpdateStatusRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        if !actor.role.is_clinical() {
            return Err(SchedulingError::Forbidden(
                "only clinical roles may drive status transitions".to_string(),
            ));
        }

        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        let now = Utc::now();

        let change = match request.status {
            AppointmentStatus::Confirmed => self.lifecycle.plan_confirmation(&appointment)?,
            AppointmentStatus::CheckedIn => {
                // Manual check-in honors the same window as the QR path.
                self.checkin.can_check_in(&appointment, now)?;
                let queue_number = match appointment.appointment_type {
                    AppointmentType::InClinic => Some(
                        self.next_queue_number(
                            appointment.doctor_id,
                            appointment.scheduled_start_time,
                            auth_token,
                        )
                        .await?,
                    ),
                    AppointmentType::Video => None,
                };
                self.lifecycle.plan_check_in(&appointment, now, queue_number)?
            }
            AppointmentStatus::InProgress => self.lifecycle.plan_start(&appointment, now)?,
            AppointmentStatus::NoShow => {
                if !self.checkin.should_mark_no_show(&appointment, now) {
                    return Err(SchedulingError::ValidationError(
                        "check-in window has not elapsed yet".to_string(),
                    ));
                }
                self.lifecycle.plan_no_show(&appointment, now)?
            }
            AppointmentStatus::Completed => {
                return Err(SchedulingError::ValidationError(
                    "completion requires an examination payload; use the complete operation"
                        .to_string(),
                ));
            }
            AppointmentStatus::Cancelled => {
                return Err(SchedulingError::ValidationError(
                    "cancellation requires a reason; use the cancel operation".to_string(),
                ));
            }
            AppointmentStatus::Pending => {
                return Err(SchedulingError::InvalidTransition {
                    from: appointment.status,
                    to: request.status,
                });
            }
        };

        self.apply_status_change(&appointment, &change, auth_token)
            .await
    }

    /// InProgress -> Completed with the medical-record reference supplied by
    /// the examination collaborator.
    pub async fn complete(
        &self,
        appointment_id: Uuid,
        request: CompleteExaminationRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        if !actor.role.is_clinical() {
            return Err(SchedulingError::Forbidden(
                "only clinical roles may complete an examination".to_string(),
            ));
        }

        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        let change =
            self.lifecycle
                .plan_completion(&appointment, request.medical_record_id, Utc::now())?;

        let updated = self
            .apply_status_change(&appointment, &change, auth_token)
            .await?;

        info!("Examination completed for appointment {}", appointment_id);
        Ok(updated)
    }

    // ==========================================================================
    // TIME OFF
    // ==========================================================================

    pub async fn declare_time_off(
        &self,
        doctor_id: Uuid,
        request: DeclareTimeOffRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<TimeOffCascadeOutcome, SchedulingError> {
        let is_own_declaration =
            actor.role == ActorRole::Doctor && actor.id == doctor_id.to_string();
        let is_back_office = matches!(actor.role, ActorRole::Staff | ActorRole::Admin);
        if !is_own_declaration && !is_back_office {
            return Err(SchedulingError::Forbidden(
                "only the doctor or back office may declare time off".to_string(),
            ));
        }

        let outcome = self
            .cascade
            .apply_time_off(doctor_id, request, Utc::now(), auth_token)
            .await?;

        for appointment in &outcome.cancelled_appointments {
            self.notifier
                .notify_cancellation(appointment, TIME_OFF_CANCELLATION_REASON)
                .await;
        }

        Ok(outcome)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    /// Fetch one appointment, applying lazy no-show expiry on the way out.
    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self.fetch_appointment(appointment_id, auth_token).await?;
        self.expire_if_no_show(appointment, auth_token).await
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(appointment_type) = query.appointment_type {
            query_parts.push(format!("appointment_type=eq.{}", appointment_type));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!(
                "scheduled_start_time=gte.{}",
                urlencoding::encode(&from_date.to_rfc3339())
            ));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!(
                "scheduled_start_time=lte.{}",
                urlencoding::encode(&to_date.to_rfc3339())
            ));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=scheduled_start_time.desc",
            query_parts.join("&")
        );

        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        rows_to(result)
    }

    /// Live appointments starting within the next `hours_ahead` hours.
    pub async fn get_upcoming_appointments(
        &self,
        patient_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
        hours_ahead: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let now = Utc::now();
        let future_time = now + chrono::Duration::hours(hours_ahead.unwrap_or(24) as i64);

        let query = AppointmentSearchQuery {
            patient_id,
            doctor_id,
            status: None,
            appointment_type: None,
            from_date: Some(now),
            to_date: Some(future_time),
            limit: Some(50),
            offset: None,
        };

        let mut appointments = self.search_appointments(query, auth_token).await?;
        appointments.retain(|appointment| appointment.is_live());

        Ok(appointments)
    }

    // ==========================================================================
    // PRIVATE HELPERS
    // ==========================================================================

    async fn verify_patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        if result.is_empty() {
            return Err(SchedulingError::PatientNotFound);
        }

        Ok(())
    }

    async fn fetch_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let mut appointments: Vec<Appointment> = rows_to(result)?;
        appointments.pop().ok_or(SchedulingError::AppointmentNotFound)
    }

    async fn find_live_by_number(
        &self,
        appointment_number: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?appointment_number=eq.{}&status={}",
            urlencoding::encode(appointment_number),
            AppointmentStatus::live_filter()
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let mut appointments: Vec<Appointment> = rows_to(result)?;
        if appointments.len() != 1 {
            return Err(SchedulingError::AppointmentNotFound);
        }
        Ok(appointments.pop().expect("length checked above"))
    }

    async fn insert_appointment(
        &self,
        request: &BookAppointmentRequest,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        let body = json!({
            "appointment_number": generate_appointment_number(),
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "hospital_id": request.hospital_id,
            "time_slot_id": slot.id,
            "scheduled_start_time": slot.start_time.to_rfc3339(),
            "scheduled_end_time": slot.end_time.to_rfc3339(),
            "appointment_type": request.appointment_type.to_string(),
            "status": AppointmentStatus::Pending.to_string(),
            "patient_notes": request.patient_notes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        // A concurrent booker racing for the same slot trips the partial
        // unique index here and surfaces as ConcurrencyConflict.
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await?;

        let mut appointments: Vec<Appointment> = rows_to(result)?;
        appointments.pop().ok_or_else(|| {
            SchedulingError::DatabaseError("failed to create appointment".to_string())
        })
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(body),
                Some(representation_headers()),
            )
            .await?;

        let mut appointments: Vec<Appointment> = rows_to(result)?;
        appointments.pop().ok_or_else(|| {
            SchedulingError::DatabaseError(format!(
                "failed to update appointment {}",
                appointment_id
            ))
        })
    }

    async fn apply_status_change(
        &self,
        appointment: &Appointment,
        change: &StatusChange,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let updated = self
            .patch_appointment(appointment.id, change.patch_body(Utc::now()), auth_token)
            .await?;

        if change.slot_disposition == SlotDisposition::Release {
            self.catalog
                .release(appointment.time_slot_id, auth_token)
                .await?;
        }

        Ok(updated)
    }

    async fn expire_if_no_show(
        &self,
        appointment: Appointment,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        if !self.checkin.should_mark_no_show(&appointment, now) {
            return Ok(appointment);
        }

        warn!("Appointment {} expired to no-show on read", appointment.id);
        let change = self.lifecycle.plan_no_show(&appointment, now)?;
        self.apply_status_change(&appointment, &change, auth_token)
            .await
    }

    async fn next_queue_number(
        &self,
        doctor_id: Uuid,
        scheduled_at: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<i32, SchedulingError> {
        let day = scheduled_at.date_naive();
        let day_start = day.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = day.and_hms_opt(23, 59, 59).unwrap().and_utc();

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=eq.{}&scheduled_start_time=gte.{}&scheduled_start_time=lte.{}&order=queue_number.desc.nullslast&limit=1",
            doctor_id,
            AppointmentStatus::CheckedIn,
            urlencoding::encode(&day_start.to_rfc3339()),
            urlencoding::encode(&day_end.to_rfc3339()),
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        let appointments: Vec<Appointment> = rows_to(result)?;
        let last = appointments
            .first()
            .and_then(|appointment| appointment.queue_number)
            .unwrap_or(0);

        Ok(last + 1)
    }
}

fn authorize_patient_owned(appointment: &Appointment, actor: &Actor) -> Result<(), SchedulingError> {
    if actor.role == ActorRole::Patient && appointment.patient_id.to_string() != actor.id {
        return Err(SchedulingError::Forbidden(
            "patients may only act on their own appointments".to_string(),
        ));
    }
    Ok(())
}
