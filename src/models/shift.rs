use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

use super::user::parse_id;

/// Shift lifecycle is owned by the scheduling subsystem; timesheets read it
/// but never drive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Scheduled,
    Completed,
    Canceled,
    Swapped,
}

impl ShiftStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(ShiftStatus::Scheduled),
            "completed" => Some(ShiftStatus::Completed),
            "canceled" => Some(ShiftStatus::Canceled),
            "swapped" => Some(ShiftStatus::Swapped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Scheduled => "scheduled",
            ShiftStatus::Completed => "completed",
            ShiftStatus::Canceled => "canceled",
            ShiftStatus::Swapped => "swapped",
        }
    }
}

/// Clock times as "HH:MM"; an end before the start wraps past midnight.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTiming {
    #[schema(example = "20:00")]
    pub start_time: String,
    #[schema(example = "04:00")]
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billable_hours: Option<f64>,
}

/// One row of the rate card snapshot embedded in a shift: four rates per
/// role, weekday/weekend crossed with normal/emergency.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateRow {
    #[schema(example = "Nurse")]
    pub role: String,
    pub weekday_rate: f64,
    pub weekend_rate: f64,
    pub emergency_weekday_rate: f64,
    pub emergency_weekend_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSchedule {
    pub id: Uuid,
    pub organization_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<Uuid>,
    pub staff_profile_id: Uuid,
    /// Role the shift is staffed as; keys the rate lookup.
    pub role: String,
    pub shift_date: NaiveDate,
    pub timing: ShiftTiming,
    pub is_emergency: bool,
    pub is_confirmed: bool,
    pub status: ShiftStatus,
    pub rates: Vec<RateRow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for ShiftSchedule {
    fn entity_type() -> &'static str { "shift_schedule" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Important }
}

impl ShiftSchedule {
    pub fn as_subject_data(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "organization_id": self.organization_id.to_string(),
            "staff_profile_id": self.staff_profile_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbShiftSchedule {
    pub id: String,
    pub organization_id: String,
    pub department_id: Option<String>,
    pub staff_profile_id: String,
    pub role: String,
    pub shift_date: NaiveDate,
    /// JSON-encoded [`ShiftTiming`].
    pub timing: String,
    pub is_emergency: bool,
    pub is_confirmed: bool,
    pub status: String,
    /// JSON-encoded rate card snapshot.
    pub rates: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbShiftSchedule> for ShiftSchedule {
    type Error = AppError;

    fn try_from(value: DbShiftSchedule) -> Result<Self, Self::Error> {
        let timing: ShiftTiming = serde_json::from_str(&value.timing)
            .map_err(|err| AppError::internal(format!("invalid stored shift timing: {err}")))?;
        let rates: Vec<RateRow> = serde_json::from_str(&value.rates)
            .map_err(|err| AppError::internal(format!("invalid stored rate card: {err}")))?;
        let status = ShiftStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown shift status `{}`", value.status)))?;

        Ok(ShiftSchedule {
            id: parse_id(&value.id)?,
            organization_id: parse_id(&value.organization_id)?,
            department_id: value.department_id.as_deref().map(parse_id).transpose()?,
            staff_profile_id: parse_id(&value.staff_profile_id)?,
            role: value.role,
            shift_date: value.shift_date,
            timing,
            is_emergency: value.is_emergency,
            is_confirmed: value.is_confirmed,
            status,
            rates,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftCreateRequest {
    pub staff_profile_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<Uuid>,
    #[schema(example = "Nurse")]
    pub role: String,
    pub shift_date: NaiveDate,
    pub timing: ShiftTiming,
    #[serde(default)]
    pub is_emergency: bool,
    #[serde(default)]
    pub rates: Vec<RateRow>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftStatusRequest {
    pub status: ShiftStatus,
    #[serde(default)]
    pub is_confirmed: Option<bool>,
}
