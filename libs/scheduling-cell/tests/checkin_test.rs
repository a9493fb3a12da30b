use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use scheduling_cell::models::{
    AppointmentStatus, AppointmentType, CheckInDenial, SchedulingError,
};
use scheduling_cell::services::checkin::CheckInValidatorService;

mod common;
use common::test_appointment;

#[test]
fn in_clinic_window_opens_30_minutes_before_start() {
    let validator = CheckInValidatorService::new();
    let start = Utc::now() + Duration::days(1);
    let appointment =
        test_appointment(AppointmentStatus::Confirmed, AppointmentType::InClinic, start);

    // 31 minutes early: denied
    assert_matches!(
        validator.can_check_in(&appointment, start - Duration::minutes(31)),
        Err(SchedulingError::CheckInWindowViolation(CheckInDenial::TooEarly { .. }))
    );

    // exactly at the boundary and just inside: allowed
    assert!(validator
        .can_check_in(&appointment, start - Duration::minutes(30))
        .is_ok());
    assert!(validator
        .can_check_in(&appointment, start - Duration::minutes(29))
        .is_ok());
}

#[test]
fn in_clinic_window_closes_15_minutes_after_start() {
    let validator = CheckInValidatorService::new();
    let start = Utc::now() + Duration::days(1);
    let appointment =
        test_appointment(AppointmentStatus::Confirmed, AppointmentType::InClinic, start);

    assert!(validator
        .can_check_in(&appointment, start + Duration::minutes(15))
        .is_ok());

    assert_matches!(
        validator.can_check_in(&appointment, start + Duration::minutes(16)),
        Err(SchedulingError::CheckInWindowViolation(CheckInDenial::TooLate { .. }))
    );
}

#[test]
fn video_window_uses_60_and_30_minute_bounds() {
    let validator = CheckInValidatorService::new();
    let start = Utc::now() + Duration::days(1);
    let appointment =
        test_appointment(AppointmentStatus::Confirmed, AppointmentType::Video, start);

    assert_matches!(
        validator.can_check_in(&appointment, start - Duration::minutes(61)),
        Err(SchedulingError::CheckInWindowViolation(CheckInDenial::TooEarly { .. }))
    );
    assert!(validator
        .can_check_in(&appointment, start - Duration::minutes(59))
        .is_ok());
    assert!(validator
        .can_check_in(&appointment, start + Duration::minutes(29))
        .is_ok());
    assert_matches!(
        validator.can_check_in(&appointment, start + Duration::minutes(31)),
        Err(SchedulingError::CheckInWindowViolation(CheckInDenial::TooLate { .. }))
    );
}

#[test]
fn too_early_denial_reports_minutes_until_open() {
    let validator = CheckInValidatorService::new();
    let start = Utc::now() + Duration::days(1);
    let appointment =
        test_appointment(AppointmentStatus::Confirmed, AppointmentType::InClinic, start);

    let err = validator
        .can_check_in(&appointment, start - Duration::minutes(90))
        .unwrap_err();
    assert_matches!(
        err,
        SchedulingError::CheckInWindowViolation(CheckInDenial::TooEarly {
            minutes_until_open: 60
        })
    );
}

#[test]
fn check_in_requires_confirmed_status() {
    let validator = CheckInValidatorService::new();
    let start = Utc::now() + Duration::minutes(10);

    for status in [
        AppointmentStatus::Pending,
        AppointmentStatus::CheckedIn,
        AppointmentStatus::Cancelled,
    ] {
        let appointment = test_appointment(status, AppointmentType::InClinic, start);
        assert_matches!(
            validator.can_check_in(&appointment, Utc::now()),
            Err(SchedulingError::InvalidTransition {
                to: AppointmentStatus::CheckedIn,
                ..
            })
        );
    }
}

#[test]
fn no_show_detection_fires_only_after_window_close() {
    let validator = CheckInValidatorService::new();
    let now = Utc::now();

    // in-clinic grace is 15 minutes past start
    let fresh = test_appointment(
        AppointmentStatus::Confirmed,
        AppointmentType::InClinic,
        now - Duration::minutes(10),
    );
    assert!(!validator.should_mark_no_show(&fresh, now));

    let stale = test_appointment(
        AppointmentStatus::Confirmed,
        AppointmentType::InClinic,
        now - Duration::minutes(16),
    );
    assert!(validator.should_mark_no_show(&stale, now));
}

#[test]
fn no_show_detection_ignores_non_confirmed_statuses() {
    let validator = CheckInValidatorService::new();
    let now = Utc::now();

    for status in [
        AppointmentStatus::Pending,
        AppointmentStatus::CheckedIn,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
    ] {
        let appointment =
            test_appointment(status, AppointmentType::InClinic, now - Duration::hours(3));
        assert!(!validator.should_mark_no_show(&appointment, now));
    }
}

#[test]
fn video_no_show_uses_the_wider_grace_period() {
    let validator = CheckInValidatorService::new();
    let now = Utc::now();

    // 20 minutes past start is late for in-clinic but still open for video
    let video = test_appointment(
        AppointmentStatus::Confirmed,
        AppointmentType::Video,
        now - Duration::minutes(20),
    );
    assert!(!validator.should_mark_no_show(&video, now));
    assert!(validator.can_check_in(&video, now).is_ok());

    let expired = test_appointment(
        AppointmentStatus::Confirmed,
        AppointmentType::Video,
        now - Duration::minutes(31),
    );
    assert!(validator.should_mark_no_show(&expired, now));
}
