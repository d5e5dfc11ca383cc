//! Invoice reporting: pure folds over approved timesheets.

pub mod summary;

pub use summary::{
    calculate_shift_hours, lookup_rate, summarize, BillableShift, DateRange, EntityRollup,
    InvoiceSummary, RollupExtreme, ShiftHours,
};
