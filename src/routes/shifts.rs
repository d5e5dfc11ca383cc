//! Shift schedule endpoints.
//!
//! The scheduling subsystem owns the shift lifecycle; these handlers store
//! and serve schedules as collaborator data for timesheets, with no rota
//! logic of their own.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Action, Gate, Subject};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::shift::{DbShiftSchedule, ShiftCreateRequest, ShiftSchedule, ShiftStatus, ShiftStatusRequest};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_shifts).post(create_shift))
        .route("/:id", get(get_shift))
        .route("/:id/status", put(update_shift_status))
}

const SELECT_SHIFT: &str = "SELECT id, organization_id, department_id, staff_profile_id, role, shift_date, \
     timing, is_emergency, is_confirmed, status, rates, created_at, updated_at FROM shift_schedules";

#[utoipa::path(
    get,
    path = "/shifts",
    tag = "Shifts",
    responses((status = 200, description = "Shift schedules of the caller's organization", body = [ShiftSchedule])),
    security(("bearerAuth" = []))
)]
pub async fn list_shifts(State(state): State<AppState>, gate: Gate) -> AppResult<Json<Vec<ShiftSchedule>>> {
    let org = gate.user.organization_id;
    gate.require(
        Action::Read,
        Subject::ShiftSchedule,
        Some(&json!({"organization_id": org.to_string()})),
    )?;

    let rows = sqlx::query_as::<_, DbShiftSchedule>(
        &format!("{SELECT_SHIFT} WHERE organization_id = ? ORDER BY shift_date, created_at"),
    )
    .bind(org.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut shifts = Vec::with_capacity(rows.len());
    for row in rows {
        shifts.push(row.try_into()?);
    }
    Ok(Json(shifts))
}

#[utoipa::path(
    post,
    path = "/shifts",
    tag = "Shifts",
    request_body = ShiftCreateRequest,
    responses((status = 201, description = "Shift scheduled", body = ShiftSchedule)),
    security(("bearerAuth" = []))
)]
pub async fn create_shift(
    State(state): State<AppState>,
    gate: Gate,
    Json(req): Json<ShiftCreateRequest>,
) -> AppResult<(StatusCode, Json<ShiftSchedule>)> {
    let org = gate.user.organization_id;
    gate.require(
        Action::Schedule,
        Subject::ShiftSchedule,
        Some(&json!({"organization_id": org.to_string()})),
    )?;

    let staff_exists: Option<String> =
        sqlx::query_scalar("SELECT id FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(req.staff_profile_id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    if staff_exists.is_none() {
        return Err(AppError::bad_request("staff member not found"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let timing_raw = serde_json::to_string(&req.timing)
        .map_err(|err| AppError::internal(format!("failed to encode timing: {err}")))?;
    let rates_raw = serde_json::to_string(&req.rates)
        .map_err(|err| AppError::internal(format!("failed to encode rates: {err}")))?;

    sqlx::query(
        "INSERT INTO shift_schedules (id, organization_id, department_id, staff_profile_id, role, shift_date, \
         timing, is_emergency, is_confirmed, status, rates, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 'scheduled', ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(org.to_string())
    .bind(req.department_id.map(|d| d.to_string()))
    .bind(req.staff_profile_id.to_string())
    .bind(&req.role)
    .bind(req.shift_date)
    .bind(&timing_raw)
    .bind(req.is_emergency)
    .bind(&rates_raw)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let shift = ShiftSchedule {
        id,
        organization_id: org,
        department_id: req.department_id,
        staff_profile_id: req.staff_profile_id,
        role: req.role,
        shift_date: req.shift_date,
        timing: req.timing,
        is_emergency: req.is_emergency,
        is_confirmed: false,
        status: ShiftStatus::Scheduled,
        rates: req.rates,
        created_at: now,
        updated_at: now,
    };
    log_activity(&state.events, "created", Some(gate.user.id), &shift);

    Ok((StatusCode::CREATED, Json(shift)))
}

#[utoipa::path(
    get,
    path = "/shifts/{id}",
    tag = "Shifts",
    params(("id" = Uuid, Path, description = "Shift schedule id")),
    responses((status = 200, description = "Shift schedule detail", body = ShiftSchedule)),
    security(("bearerAuth" = []))
)]
pub async fn get_shift(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ShiftSchedule>> {
    let shift = fetch_shift(&state, id).await?;
    gate.require(Action::Read, Subject::ShiftSchedule, Some(&shift.as_subject_data()))?;
    Ok(Json(shift))
}

#[utoipa::path(
    put,
    path = "/shifts/{id}/status",
    tag = "Shifts",
    params(("id" = Uuid, Path, description = "Shift schedule id")),
    request_body = ShiftStatusRequest,
    responses((status = 200, description = "Shift status updated", body = ShiftSchedule)),
    security(("bearerAuth" = []))
)]
pub async fn update_shift_status(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
    Json(req): Json<ShiftStatusRequest>,
) -> AppResult<Json<ShiftSchedule>> {
    let mut shift = fetch_shift(&state, id).await?;
    gate.require(Action::Schedule, Subject::ShiftSchedule, Some(&shift.as_subject_data()))?;

    let now = utc_now();
    let is_confirmed = req.is_confirmed.unwrap_or(shift.is_confirmed);
    sqlx::query("UPDATE shift_schedules SET status = ?, is_confirmed = ?, updated_at = ? WHERE id = ?")
        .bind(req.status.as_str())
        .bind(is_confirmed)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let old = shift.clone();
    shift.status = req.status;
    shift.is_confirmed = is_confirmed;
    shift.updated_at = now;
    crate::events::log_activity_with_context(
        &state.events,
        "updated",
        Some(gate.user.id),
        &shift,
        Some(&old),
        None,
    );

    Ok(Json(shift))
}

pub(crate) async fn fetch_shift(state: &AppState, id: Uuid) -> AppResult<ShiftSchedule> {
    let row = sqlx::query_as::<_, DbShiftSchedule>(&format!("{SELECT_SHIFT} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("shift schedule not found"))?;
    row.try_into()
}
