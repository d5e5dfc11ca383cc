//! The aggregation engine.
//!
//! Everything here is a deterministic, side-effect-free fold: the same input
//! snapshot always produces the same summary, and malformed timing or rate
//! data degrades to a zero contribution for that record instead of failing
//! the whole report.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::shift::{RateRow, ShiftTiming};

/// Inclusive reporting window.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}

/// One approved timesheet flattened with its shift/rate snapshot, the unit
/// the fold consumes.
#[derive(Debug, Clone)]
pub struct BillableShift {
    pub timesheet_id: Uuid,
    /// Receiving organization; rows without one are skipped in the org rollup.
    pub organization_id: Option<Uuid>,
    /// Staff member; rows without one are skipped in the staff rollup.
    pub staff_id: Option<Uuid>,
    /// Role the shift was staffed as; keys the rate lookup.
    pub role: String,
    pub shift_date: NaiveDate,
    pub timing: ShiftTiming,
    pub is_emergency: bool,
    pub is_holiday: bool,
    pub rates: Vec<RateRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShiftHours {
    pub total: f64,
    pub break_hours: f64,
    pub billable: f64,
}

/// Hours worked for one shift timing.
///
/// An end before the start wraps past midnight (overnight shift). Billable
/// hours default to the worked time net of breaks, floored at zero.
/// Unparseable clock values contribute zero rather than failing the fold.
pub fn calculate_shift_hours(timing: &ShiftTiming) -> ShiftHours {
    let (start, end) = match (parse_clock(&timing.start_time), parse_clock(&timing.end_time)) {
        (Some(start), Some(end)) => (start, end),
        _ => return ShiftHours::default(),
    };

    let mut total = end - start;
    if total < 0.0 {
        total += 24.0;
    }
    let break_hours = timing.break_hours.unwrap_or(0.0);
    let billable = timing
        .billable_hours
        .unwrap_or_else(|| (total - break_hours).max(0.0));

    ShiftHours {
        total,
        break_hours,
        billable,
    }
}

/// "HH:MM" to fractional hours.
fn parse_clock(value: &str) -> Option<f64> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(f64::from(hours) + f64::from(minutes) / 60.0)
}

/// Rate for role + weekend/emergency. A missing row is a zero rate, never
/// an error; the weekend and emergency flags come from the shift record.
pub fn lookup_rate(rates: &[RateRow], role: &str, weekend: bool, emergency: bool) -> f64 {
    rates
        .iter()
        .find(|row| row.role == role)
        .map(|row| match (weekend, emergency) {
            (false, false) => row.weekday_rate,
            (true, false) => row.weekend_rate,
            (false, true) => row.emergency_weekday_rate,
            (true, true) => row.emergency_weekend_rate,
        })
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityRollup {
    pub id: Uuid,
    pub hours: f64,
    pub billable_hours: f64,
    pub pay: f64,
    pub shift_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollupExtreme {
    pub id: Uuid,
    pub billable_hours: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub total_hours: f64,
    pub total_billable_hours: f64,
    pub total_break_hours: f64,
    pub total_pay: f64,
    pub holiday_hours: f64,
    pub emergency_hours: f64,
    pub weekend_hours: f64,
    pub regular_hours: f64,
    pub shift_count: u64,
    /// Rollups in first-encountered order.
    pub organizations: Vec<EntityRollup>,
    pub staff: Vec<EntityRollup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_organization: Option<RollupExtreme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub least_organization: Option<RollupExtreme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_staff: Option<RollupExtreme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub least_staff: Option<RollupExtreme>,
}

/// Insertion-ordered rollup accumulator: first-encountered order decides
/// both the serialized order and extreme tie-breaks.
#[derive(Default)]
struct RollupMap {
    entries: Vec<EntityRollup>,
    index: HashMap<Uuid, usize>,
}

impl RollupMap {
    fn add(&mut self, id: Uuid, hours: &ShiftHours, pay: f64) {
        let position = *self.index.entry(id).or_insert_with(|| {
            self.entries.push(EntityRollup {
                id,
                hours: 0.0,
                billable_hours: 0.0,
                pay: 0.0,
                shift_count: 0,
            });
            self.entries.len() - 1
        });
        let entry = &mut self.entries[position];
        entry.hours += hours.total;
        entry.billable_hours += hours.billable;
        entry.pay += pay;
        entry.shift_count += 1;
    }

    fn extremes(&self) -> (Option<RollupExtreme>, Option<RollupExtreme>) {
        let mut top: Option<&EntityRollup> = None;
        let mut least: Option<&EntityRollup> = None;
        for entry in &self.entries {
            // Strict comparisons keep the first-encountered entry on ties.
            if top.map_or(true, |current| entry.billable_hours > current.billable_hours) {
                top = Some(entry);
            }
            if least.map_or(true, |current| entry.billable_hours < current.billable_hours) {
                least = Some(entry);
            }
        }
        let as_extreme = |entry: &EntityRollup| RollupExtreme {
            id: entry.id,
            billable_hours: entry.billable_hours,
        };
        let top = top.map(as_extreme);
        // "Least" is meaningless until two distinct entities compete.
        let least = if self.entries.len() >= 2 {
            least.map(as_extreme)
        } else {
            None
        };
        (top, least)
    }
}

/// Fold a snapshot of approved timesheets into the invoice summary.
pub fn summarize(shifts: &[BillableShift], range: &DateRange) -> InvoiceSummary {
    let mut summary = InvoiceSummary::default();
    let mut organizations = RollupMap::default();
    let mut staff = RollupMap::default();

    for shift in shifts {
        if !range.contains(shift.shift_date) {
            continue;
        }

        let hours = calculate_shift_hours(&shift.timing);
        let weekend = shift.shift_date.weekday().number_from_monday() > 5;
        let rate = lookup_rate(&shift.rates, &shift.role, weekend, shift.is_emergency);
        let pay = hours.billable * rate;

        summary.total_hours += hours.total;
        summary.total_billable_hours += hours.billable;
        summary.total_break_hours += hours.break_hours;
        summary.total_pay += pay;
        summary.shift_count += 1;

        // Buckets are mutually exclusive, in this precedence order.
        if shift.is_holiday {
            summary.holiday_hours += hours.billable;
        } else if shift.is_emergency {
            summary.emergency_hours += hours.billable;
        } else if weekend {
            summary.weekend_hours += hours.billable;
        } else {
            summary.regular_hours += hours.billable;
        }

        if let Some(organization_id) = shift.organization_id {
            organizations.add(organization_id, &hours, pay);
        }
        if let Some(staff_id) = shift.staff_id {
            staff.add(staff_id, &hours, pay);
        }
    }

    (summary.top_organization, summary.least_organization) = organizations.extremes();
    (summary.top_staff, summary.least_staff) = staff.extremes();
    summary.organizations = organizations.entries;
    summary.staff = staff.entries;
    summary
}
