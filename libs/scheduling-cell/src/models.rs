// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_database::SupabaseError;
use shared_models::auth::User;

// ==============================================================================
// CORE SCHEDULING MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub appointment_number: String,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub hospital_id: Option<Uuid>,
    pub time_slot_id: Uuid,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub queue_number: Option<i32>,
    pub patient_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub medical_record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Live appointments still occupy their slot and count for conflict checks.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.scheduled_end_time - self.scheduled_start_time).num_minutes()
    }
}

/// Generate a human-facing appointment number used for QR check-in.
/// Format: APT-<base36 millis>-<4 random alphanumerics>.
pub fn generate_appointment_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();

    format!(
        "APT-{}-{}",
        to_base36(Utc::now().timestamp_millis() as u64),
        suffix
    )
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Terminal statuses never transition again and release their claim on
    /// conflict checks.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// PostgREST filter matching live appointments only.
    pub fn live_filter() -> &'static str {
        "not.in.(completed,cancelled,no_show)"
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked_in"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    InClinic,
    Video,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InClinic => write!(f, "in_clinic"),
            AppointmentType::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Doctor,
    System,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::Patient => write!(f, "patient"),
            CancelledBy::Doctor => write!(f, "doctor"),
            CancelledBy::System => write!(f, "system"),
        }
    }
}

/// One bookable interval owned by one doctor. Created and shaped by doctor
/// availability management; this cell only consumes and releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_available: bool,
    pub time_off: bool,
}

impl TimeSlot {
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.start_time >= self.end_time {
            return Err(SchedulingError::ValidationError(
                "time slot start must be before its end".to_string(),
            ));
        }
        if self.is_available && self.time_off {
            return Err(SchedulingError::ValidationError(
                "time slot cannot be both available and blocked by time off".to_string(),
            ));
        }
        Ok(())
    }
}

/// A doctor's self-declared unavailable interval within a single day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffDeclaration {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub note: Option<String>,
}

impl TimeOffDeclaration {
    pub fn window_start(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.date.and_time(self.end_time).and_utc()
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub time_slot_id: Uuid,
    pub appointment_type: AppointmentType,
    pub hospital_id: Option<Uuid>,
    pub patient_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_time_slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
    pub cancelled_by: CancelledBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInByNumberRequest {
    pub appointment_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteExaminationRequest {
    pub medical_record_id: Uuid,
}

/// Bounds arrive as HH:MM strings and are validated before parsing, the same
/// shape the doctor-facing client submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareTimeOffRequest {
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffCascadeOutcome {
    pub declaration: TimeOffDeclaration,
    pub cancelled_appointments: Vec<Appointment>,
    pub disabled_slots: usize,
}

impl TimeOffCascadeOutcome {
    pub fn cancelled_appointment_ids(&self) -> Vec<Uuid> {
        self.cancelled_appointments.iter().map(|a| a.id).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

// ==============================================================================
// AUTHORIZATION
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Patient,
    Doctor,
    Staff,
    Admin,
}

impl ActorRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "patient" => Some(ActorRole::Patient),
            "doctor" => Some(ActorRole::Doctor),
            "staff" => Some(ActorRole::Staff),
            "admin" => Some(ActorRole::Admin),
            _ => None,
        }
    }

    /// Roles allowed to drive examination transitions and manual overrides.
    pub fn is_clinical(&self) -> bool {
        matches!(self, ActorRole::Doctor | ActorRole::Staff | ActorRole::Admin)
    }
}

/// The authenticated caller, resolved by the identity collaborator and passed
/// into the orchestrator explicitly.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn from_user(user: &User) -> Option<Self> {
        let role = ActorRole::parse(user.role.as_deref()?)?;
        Some(Self {
            id: user.id.clone(),
            role,
        })
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInDenial {
    TooEarly { minutes_until_open: i64 },
    TooLate { minutes_past_close: i64 },
}

impl fmt::Display for CheckInDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckInDenial::TooEarly { minutes_until_open } => {
                write!(f, "too early: window opens in {} minutes", minutes_until_open)
            }
            CheckInDenial::TooLate { minutes_past_close } => {
                write!(f, "too late: window closed {} minutes ago", minutes_past_close)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Time slot does not exist or is not available")]
    SlotUnavailable,

    #[error("Time slot already hosts a live appointment")]
    SlotAlreadyBooked,

    #[error("Doctor is unavailable at the requested time")]
    DoctorUnavailable,

    #[error("Patient already holds an overlapping appointment with this doctor")]
    DuplicateBookingForPatient,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Check-in window violation: {0}")]
    CheckInWindowViolation(CheckInDenial),

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Booking lost a race for the slot; safe to retry")]
    ConcurrencyConflict,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<SupabaseError> for SchedulingError {
    fn from(err: SupabaseError) -> Self {
        match err {
            // A 409 from the partial unique index on live appointments per
            // slot means we lost the check-and-set race, not a business rule.
            SupabaseError::Conflict(_) => SchedulingError::ConcurrencyConflict,
            other => SchedulingError::DatabaseError(other.to_string()),
        }
    }
}
