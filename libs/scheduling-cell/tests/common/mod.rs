use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use scheduling_cell::models::{Appointment, AppointmentStatus, AppointmentType, TimeSlot};

pub fn test_appointment(
    status: AppointmentStatus,
    appointment_type: AppointmentType,
    start: DateTime<Utc>,
) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        appointment_number: "APT-TEST0001-AAAA".to_string(),
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        hospital_id: None,
        time_slot_id: Uuid::new_v4(),
        scheduled_start_time: start,
        scheduled_end_time: start + Duration::minutes(30),
        appointment_type,
        status,
        queue_number: None,
        patient_notes: None,
        cancellation_reason: None,
        cancelled_by: None,
        checked_in_at: None,
        started_at: None,
        ended_at: None,
        cancelled_at: None,
        medical_record_id: None,
        created_at: start - Duration::days(1),
        updated_at: start - Duration::days(1),
    }
}

pub fn test_slot(doctor_id: Uuid, start: DateTime<Utc>) -> TimeSlot {
    TimeSlot {
        id: Uuid::new_v4(),
        doctor_id,
        start_time: start,
        end_time: start + Duration::minutes(30),
        is_available: true,
        time_off: false,
    }
}
