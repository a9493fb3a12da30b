pub mod cascade;
pub mod catalog;
pub mod checkin;
pub mod conflict;
pub mod lifecycle;
pub mod scheduling;

pub use cascade::{
    CancellationNotifier, TimeOffCascadeService, TracingNotifier, TIME_OFF_CANCELLATION_REASON,
};
pub use catalog::SlotCatalogService;
pub use checkin::CheckInValidatorService;
pub use conflict::ConflictDetectionService;
pub use lifecycle::{AppointmentLifecycleService, SlotDisposition, StatusChange};
pub use scheduling::SchedulingService;

use crate::models::SchedulingError;

/// Parse PostgREST rows into typed values.
pub(crate) fn rows_to<T: serde::de::DeserializeOwned>(
    rows: Vec<serde_json::Value>,
) -> Result<Vec<T>, SchedulingError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| SchedulingError::DatabaseError(format!("failed to parse rows: {}", e)))
}
