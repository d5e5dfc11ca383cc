//! Aggregation-engine properties: total conservation, overnight wrap,
//! bucket precedence, rollup skipping and idempotence.

use care_roster::models::shift::{RateRow, ShiftTiming};
use care_roster::reporting::{calculate_shift_hours, summarize, BillableShift, DateRange};
use chrono::NaiveDate;
use uuid::Uuid;

const EPS: f64 = 1e-6;

fn nurse_rates() -> Vec<RateRow> {
    vec![RateRow {
        role: "Nurse".to_string(),
        weekday_rate: 20.0,
        weekend_rate: 26.0,
        emergency_weekday_rate: 32.0,
        emergency_weekend_rate: 40.0,
    }]
}

fn shift(date: NaiveDate, start: &str, end: &str, break_hours: Option<f64>) -> BillableShift {
    BillableShift {
        timesheet_id: Uuid::new_v4(),
        organization_id: Some(Uuid::new_v4()),
        staff_id: Some(Uuid::new_v4()),
        role: "Nurse".to_string(),
        shift_date: date,
        timing: ShiftTiming {
            start_time: start.to_string(),
            end_time: end.to_string(),
            break_hours,
            billable_hours: None,
        },
        is_emergency: false,
        is_holiday: false,
        rates: nurse_rates(),
    }
}

fn full_range() -> DateRange {
    DateRange {
        from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        to: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    }
}

#[test]
fn totals_equal_the_sum_of_per_record_contributions() {
    // Mon Mar 4 2024 and Tue Mar 5 2024: weekday rates apply.
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let shifts = vec![
        shift(monday, "09:00", "17:00", Some(0.5)), // 8h total, 7.5 billable
        shift(tuesday, "08:00", "14:00", None),     // 6h total, 6 billable
        shift(tuesday, "22:00", "06:00", Some(1.0)), // 8h total, 7 billable
    ];

    let summary = summarize(&shifts, &full_range());

    let expected_billable: f64 = shifts
        .iter()
        .map(|s| calculate_shift_hours(&s.timing).billable)
        .sum();
    assert!((summary.total_billable_hours - expected_billable).abs() < EPS);
    assert!((summary.total_billable_hours - 20.5).abs() < EPS);
    assert!((summary.total_hours - 22.0).abs() < EPS);
    assert!((summary.total_break_hours - 1.5).abs() < EPS);
    assert!((summary.total_pay - 20.5 * 20.0).abs() < EPS);
    assert_eq!(summary.shift_count, 3);
}

#[test]
fn overnight_shift_is_eight_hours_not_negative() {
    let hours = calculate_shift_hours(&ShiftTiming {
        start_time: "22:00".to_string(),
        end_time: "06:00".to_string(),
        break_hours: None,
        billable_hours: None,
    });
    assert!((hours.total - 8.0).abs() < EPS);
    assert!(hours.total > 0.0);
}

#[test]
fn saturday_overnight_lands_in_the_weekend_bucket() {
    // Sat Mar 9 2024, 20:00-04:00 with a half-hour break.
    let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    let record = shift(saturday, "20:00", "04:00", Some(0.5));
    let summary = summarize(&[record], &full_range());

    assert!((summary.total_hours - 8.0).abs() < EPS);
    assert!((summary.total_billable_hours - 7.5).abs() < EPS);
    assert!((summary.weekend_hours - 7.5).abs() < EPS);
    assert!(summary.regular_hours.abs() < EPS);
    // Weekend rate applied, not the weekday one.
    assert!((summary.total_pay - 7.5 * 26.0).abs() < EPS);
}

#[test]
fn bucket_precedence_is_holiday_emergency_weekend_regular() {
    let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

    let mut holiday_emergency = shift(saturday, "09:00", "17:00", None);
    holiday_emergency.is_holiday = true;
    holiday_emergency.is_emergency = true;
    let summary = summarize(&[holiday_emergency], &full_range());
    assert!((summary.holiday_hours - 8.0).abs() < EPS);
    assert!(summary.emergency_hours.abs() < EPS);
    assert!(summary.weekend_hours.abs() < EPS);

    let mut emergency_weekend = shift(saturday, "09:00", "17:00", None);
    emergency_weekend.is_emergency = true;
    let summary = summarize(&[emergency_weekend], &full_range());
    assert!((summary.emergency_hours - 8.0).abs() < EPS);
    assert!(summary.weekend_hours.abs() < EPS);
}

#[test]
fn rows_without_identifiers_are_skipped_not_fatal() {
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let mut anonymous = shift(monday, "09:00", "17:00", None);
    anonymous.organization_id = None;
    anonymous.staff_id = None;
    let named = shift(monday, "09:00", "13:00", None);

    let summary = summarize(&[anonymous, named], &full_range());

    // Totals still count both records.
    assert!((summary.total_hours - 12.0).abs() < EPS);
    // Rollups only see the identified one.
    assert_eq!(summary.organizations.len(), 1);
    assert_eq!(summary.staff.len(), 1);
    assert_eq!(summary.organizations[0].shift_count, 1);
}

#[test]
fn extremes_follow_first_encountered_order() {
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();

    // Equal billable hours: the tie goes to the first-encountered org.
    let mut first = shift(monday, "09:00", "17:00", None);
    first.organization_id = Some(org_a);
    let mut second = shift(monday, "10:00", "18:00", None);
    second.organization_id = Some(org_b);

    let summary = summarize(&[first.clone(), second], &full_range());
    assert_eq!(summary.top_organization.unwrap().id, org_a);
    assert_eq!(summary.least_organization.unwrap().id, org_a);

    // A single entity has a top but no meaningful least.
    let summary = summarize(&[first], &full_range());
    assert_eq!(summary.top_organization.unwrap().id, org_a);
    assert!(summary.least_organization.is_none());
}

#[test]
fn missing_rate_rows_degrade_to_zero_pay() {
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let mut unknown_role = shift(monday, "09:00", "17:00", None);
    unknown_role.role = "Locum".to_string();

    let summary = summarize(&[unknown_role], &full_range());
    assert!((summary.total_hours - 8.0).abs() < EPS);
    assert!(summary.total_pay.abs() < EPS);
}

#[test]
fn out_of_range_records_are_excluded() {
    let inside = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let outside = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
    let summary = summarize(
        &[shift(inside, "09:00", "17:00", None), shift(outside, "09:00", "17:00", None)],
        &full_range(),
    );
    assert_eq!(summary.shift_count, 1);
}

#[test]
fn empty_input_yields_a_zero_summary() {
    let summary = summarize(&[], &full_range());
    assert!(summary.total_hours.abs() < EPS);
    assert!(summary.total_pay.abs() < EPS);
    assert!(summary.organizations.is_empty());
    assert!(summary.staff.is_empty());
    assert!(summary.top_organization.is_none());
    assert!(summary.least_staff.is_none());
}

#[test]
fn summarize_is_idempotent() {
    let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let shifts = vec![
        shift(monday, "09:00", "17:00", Some(0.5)),
        shift(saturday, "20:00", "04:00", None),
    ];

    let first = summarize(&shifts, &full_range());
    let second = summarize(&shifts, &full_range());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
