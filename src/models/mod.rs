pub mod organization;
pub mod rbac;
pub mod shift;
pub mod timesheet;
pub mod user;
