// libs/scheduling-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, CancelledBy, SchedulingError};

pub const MAX_CANCELLATION_REASON_CHARS: usize = 500;

/// What should happen to the appointment's slot when a transition is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDisposition {
    Keep,
    Release,
}

/// The intended mutation produced by the state machine. The machine itself
/// never touches storage; the orchestrator applies this in its transaction.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub new_status: AppointmentStatus,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub queue_number: Option<i32>,
    pub medical_record_id: Option<Uuid>,
    pub slot_disposition: SlotDisposition,
}

impl StatusChange {
    fn new(new_status: AppointmentStatus) -> Self {
        Self {
            new_status,
            checked_in_at: None,
            started_at: None,
            ended_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            queue_number: None,
            medical_record_id: None,
            slot_disposition: SlotDisposition::Keep,
        }
    }

    /// PATCH body for the appointment row, only the fields this change sets.
    pub fn patch_body(&self, now: DateTime<Utc>) -> Value {
        let mut body = Map::new();
        body.insert("status".to_string(), json!(self.new_status.to_string()));

        if let Some(at) = self.checked_in_at {
            body.insert("checked_in_at".to_string(), json!(at.to_rfc3339()));
        }
        if let Some(at) = self.started_at {
            body.insert("started_at".to_string(), json!(at.to_rfc3339()));
        }
        if let Some(at) = self.ended_at {
            body.insert("ended_at".to_string(), json!(at.to_rfc3339()));
        }
        if let Some(at) = self.cancelled_at {
            body.insert("cancelled_at".to_string(), json!(at.to_rfc3339()));
        }
        if let Some(reason) = &self.cancellation_reason {
            body.insert("cancellation_reason".to_string(), json!(reason));
        }
        if let Some(by) = self.cancelled_by {
            body.insert("cancelled_by".to_string(), json!(by.to_string()));
        }
        if let Some(queue) = self.queue_number {
            body.insert("queue_number".to_string(), json!(queue));
        }
        if let Some(record_id) = self.medical_record_id {
            body.insert("medical_record_id".to_string(), json!(record_id));
        }

        body.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        Value::Object(body)
    }
}

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// All valid next statuses for a given current status.
    pub fn valid_transitions(&self, current: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::CheckedIn,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::CheckedIn => vec![AppointmentStatus::InProgress],
            AppointmentStatus::InProgress => vec![AppointmentStatus::Completed],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    pub fn validate_transition(
        &self,
        current: AppointmentStatus,
        requested: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition {} -> {}", current, requested);

        if !self.valid_transitions(current).contains(&requested) {
            warn!("Invalid status transition attempted: {} -> {}", current, requested);
            return Err(SchedulingError::InvalidTransition {
                from: current,
                to: requested,
            });
        }

        Ok(())
    }

    /// Pending -> Confirmed, driven by the payment collaborator. No time guard.
    pub fn plan_confirmation(&self, appointment: &Appointment) -> Result<StatusChange, SchedulingError> {
        self.validate_transition(appointment.status, AppointmentStatus::Confirmed)?;
        Ok(StatusChange::new(AppointmentStatus::Confirmed))
    }

    /// Confirmed -> CheckedIn. The check-in window guard is the validator's
    /// job; callers run it before asking for this plan.
    pub fn plan_check_in(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
        queue_number: Option<i32>,
    ) -> Result<StatusChange, SchedulingError> {
        self.validate_transition(appointment.status, AppointmentStatus::CheckedIn)?;

        let mut change = StatusChange::new(AppointmentStatus::CheckedIn);
        change.checked_in_at = Some(now);
        change.queue_number = queue_number;
        Ok(change)
    }

    /// CheckedIn -> InProgress, staff-triggered.
    pub fn plan_start(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, SchedulingError> {
        self.validate_transition(appointment.status, AppointmentStatus::InProgress)?;

        let mut change = StatusChange::new(AppointmentStatus::InProgress);
        change.started_at = Some(now);
        Ok(change)
    }

    /// InProgress -> Completed. Requires the examination record reference;
    /// the slot stays consumed so history remains attributed.
    pub fn plan_completion(
        &self,
        appointment: &Appointment,
        medical_record_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, SchedulingError> {
        self.validate_transition(appointment.status, AppointmentStatus::Completed)?;

        let mut change = StatusChange::new(AppointmentStatus::Completed);
        change.ended_at = Some(now);
        change.medical_record_id = Some(medical_record_id);
        Ok(change)
    }

    /// Pending/Confirmed -> Cancelled. A time-off cascade keeps the slot
    /// blocked; every other cancellation releases it.
    pub fn plan_cancellation(
        &self,
        appointment: &Appointment,
        reason: &str,
        cancelled_by: CancelledBy,
        now: DateTime<Utc>,
        via_time_off: bool,
    ) -> Result<StatusChange, SchedulingError> {
        validate_cancellation_reason(reason)?;
        self.validate_transition(appointment.status, AppointmentStatus::Cancelled)?;

        let mut change = StatusChange::new(AppointmentStatus::Cancelled);
        change.cancelled_at = Some(now);
        change.cancellation_reason = Some(reason.to_string());
        change.cancelled_by = Some(cancelled_by);
        change.slot_disposition = if via_time_off {
            SlotDisposition::Keep
        } else {
            SlotDisposition::Release
        };
        Ok(change)
    }

    /// Confirmed -> NoShow once the check-in window has fully elapsed.
    /// Releases the slot.
    pub fn plan_no_show(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, SchedulingError> {
        self.validate_transition(appointment.status, AppointmentStatus::NoShow)?;

        let mut change = StatusChange::new(AppointmentStatus::NoShow);
        change.ended_at = Some(now);
        change.slot_disposition = SlotDisposition::Release;
        Ok(change)
    }

    /// Reschedule keeps the current status, so it is only meaningful before
    /// check-in.
    pub fn validate_reschedulable(&self, appointment: &Appointment) -> Result<(), SchedulingError> {
        match appointment.status {
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => Ok(()),
            other => Err(SchedulingError::InvalidTransition {
                from: other,
                to: other,
            }),
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_cancellation_reason(reason: &str) -> Result<(), SchedulingError> {
    if reason.trim().is_empty() {
        return Err(SchedulingError::ValidationError(
            "cancellation reason must not be empty".to_string(),
        ));
    }
    if reason.chars().count() > MAX_CANCELLATION_REASON_CHARS {
        return Err(SchedulingError::ValidationError(format!(
            "cancellation reason must be at most {} characters",
            MAX_CANCELLATION_REASON_CHARS
        )));
    }
    Ok(())
}
