// libs/scheduling-cell/src/services/checkin.rs
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{
    Appointment, AppointmentStatus, AppointmentType, CheckInDenial, SchedulingError,
};

/// Time-window policy for check-in, parameterized by visit type. Patients
/// arrive at the clinic a little early; video visits open wider because the
/// pre-call device check happens inside the window.
pub struct CheckInValidatorService;

impl CheckInValidatorService {
    pub fn new() -> Self {
        Self
    }

    /// (opens before start, closes after start) for the given visit type.
    pub fn window(&self, appointment_type: AppointmentType) -> (Duration, Duration) {
        match appointment_type {
            AppointmentType::InClinic => (Duration::minutes(30), Duration::minutes(15)),
            AppointmentType::Video => (Duration::minutes(60), Duration::minutes(30)),
        }
    }

    /// Absolute window bounds for an appointment, inclusive at both ends.
    pub fn window_bounds(&self, appointment: &Appointment) -> (DateTime<Utc>, DateTime<Utc>) {
        let (opens_before, closes_after) = self.window(appointment.appointment_type);
        (
            appointment.scheduled_start_time - opens_before,
            appointment.scheduled_start_time + closes_after,
        )
    }

    pub fn can_check_in(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        if appointment.status != AppointmentStatus::Confirmed {
            return Err(SchedulingError::InvalidTransition {
                from: appointment.status,
                to: AppointmentStatus::CheckedIn,
            });
        }

        let (opens_at, closes_at) = self.window_bounds(appointment);

        if now < opens_at {
            let minutes_until_open = (opens_at - now).num_minutes();
            debug!(
                "Check-in for appointment {} denied: {} minutes before window",
                appointment.id, minutes_until_open
            );
            return Err(SchedulingError::CheckInWindowViolation(
                CheckInDenial::TooEarly { minutes_until_open },
            ));
        }

        if now > closes_at {
            let minutes_past_close = (now - closes_at).num_minutes();
            debug!(
                "Check-in for appointment {} denied: {} minutes past window",
                appointment.id, minutes_past_close
            );
            return Err(SchedulingError::CheckInWindowViolation(
                CheckInDenial::TooLate { minutes_past_close },
            ));
        }

        Ok(())
    }

    /// Lazy no-show detection: true once a confirmed appointment's check-in
    /// window has fully elapsed. Evaluated on read and on check-in attempts;
    /// there is no background timer in this core.
    pub fn should_mark_no_show(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        if appointment.status != AppointmentStatus::Confirmed {
            return false;
        }

        let (_, closes_at) = self.window_bounds(appointment);
        now > closes_at
    }
}

impl Default for CheckInValidatorService {
    fn default() -> Self {
        Self::new()
    }
}
