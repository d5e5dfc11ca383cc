//! Timesheet lifecycle: the approval state machine, the two evidence
//! protocols (captured signature and single-use QR scan), and the scan
//! push hub.

pub mod approval;
pub mod machine;
pub mod scan;
