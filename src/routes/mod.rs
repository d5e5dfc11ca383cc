pub mod auth;
pub mod health;
pub mod rbac;
pub mod reports;
pub mod shifts;
pub mod timesheets;
pub mod users;
