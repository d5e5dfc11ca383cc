//! Timesheet endpoints: creation, listing, the guarded lifecycle
//! transitions, both approval protocols and the scan push channel.
//!
//! Every transition funnels through `timesheet::machine` and is applied
//! with a status-conditional UPDATE, so concurrent callers race on the
//! database row and the loser gets the reason-coded refusal instead of a
//! silent double-apply.

use std::convert::Infallible;
use std::pin::Pin;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Action, Gate, Subject};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::timesheet::{
    DbTimesheet, InvoiceStatusRequest, ReviewRequest, ScanRequest, SignatureApprovalRequest,
    Timesheet, TimesheetCreateRequest, TimesheetStatus,
};
use crate::timesheet::approval::{issue_scan_token, validate_signature};
use crate::timesheet::machine::{self, Actor, Evidence, TimesheetView, TransitionError};
use crate::timesheet::scan::{ScanOutcome, ScanStatus};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_timesheets).post(create_timesheet))
        .route("/scan", post(scan_qr))
        .route("/scan/:token/events", get(scan_events))
        .route("/:id", get(get_timesheet).delete(delete_timesheet))
        .route("/:id/approve", post(approve_with_signature))
        .route("/:id/reject", post(reject_timesheet))
        .route("/:id/invalidate", post(invalidate_timesheet))
        .route("/:id/invoice-status", post(advance_invoice_status))
        .route("/:id/review", put(review_timesheet))
}

const SELECT_TIMESHEET: &str = "SELECT id, shift_schedule_id, carer_id, organization_id, status, invoice_status, \
     sign_in_time, sign_out_time, signature_image, signer_name, signer_role, signature_url, \
     qr_token, is_holiday, rating, review, created_at, updated_at, deleted_at FROM timesheets";

// =============================================================================
// CRUD
// =============================================================================

/// Create a pending timesheet for a completed shift. The response carries
/// the freshly minted QR token; rendering it is the client's job.
#[utoipa::path(
    post,
    path = "/timesheets",
    tag = "Timesheets",
    request_body = TimesheetCreateRequest,
    responses(
        (status = 201, description = "Timesheet created", body = Timesheet),
        (status = 409, description = "Shift already has a timesheet"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Json(req): Json<TimesheetCreateRequest>,
) -> AppResult<(StatusCode, Json<Timesheet>)> {
    let shift = super::shifts::fetch_shift(&state, req.shift_schedule_id).await?;

    // The shift's own staff member may file their timesheet; anyone else
    // needs an explicit create grant.
    if gate.user.id != shift.staff_profile_id {
        gate.require(
            Action::Create,
            Subject::Timesheet,
            Some(&json!({"organization_id": shift.organization_id.to_string()})),
        )?;
    }

    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM timesheets WHERE shift_schedule_id = ? AND deleted_at IS NULL",
    )
    .bind(req.shift_schedule_id.to_string())
    .fetch_optional(&state.pool)
    .await?;
    if existing.is_some() {
        return Err(AppError::conflict("shift already has a timesheet"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let token = issue_scan_token();

    sqlx::query(
        "INSERT INTO timesheets (id, shift_schedule_id, carer_id, organization_id, status, invoice_status, \
         sign_in_time, sign_out_time, qr_token, is_holiday, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 'pending', 'draft', ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(shift.id.to_string())
    .bind(shift.staff_profile_id.to_string())
    .bind(shift.organization_id.to_string())
    .bind(req.sign_in_time)
    .bind(req.sign_out_time)
    .bind(&token)
    .bind(req.is_holiday)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "created", Some(gate.user.id), &timesheet);

    Ok((StatusCode::CREATED, Json(timesheet)))
}

/// Org staff with a read grant see the whole organization; everyone else
/// sees only their own timesheets.
#[utoipa::path(
    get,
    path = "/timesheets",
    tag = "Timesheets",
    responses((status = 200, description = "Timesheets visible to the caller", body = [Timesheet])),
    security(("bearerAuth" = []))
)]
pub async fn list_timesheets(State(state): State<AppState>, gate: Gate) -> AppResult<Json<Vec<Timesheet>>> {
    let org = gate.user.organization_id;
    let org_wide = gate.can(
        Action::Read,
        Subject::Timesheet,
        Some(&json!({"organization_id": org.to_string()})),
    );

    let rows = if org_wide {
        sqlx::query_as::<_, DbTimesheet>(
            &format!("{SELECT_TIMESHEET} WHERE organization_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"),
        )
        .bind(org.to_string())
        .fetch_all(&state.pool)
        .await?
    } else {
        sqlx::query_as::<_, DbTimesheet>(
            &format!("{SELECT_TIMESHEET} WHERE carer_id = ? AND deleted_at IS NULL ORDER BY created_at DESC"),
        )
        .bind(gate.user.id.to_string())
        .fetch_all(&state.pool)
        .await?
    };

    let mut timesheets = Vec::with_capacity(rows.len());
    for row in rows {
        timesheets.push(row.try_into()?);
    }
    Ok(Json(timesheets))
}

#[utoipa::path(
    get,
    path = "/timesheets/{id}",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    responses((status = 200, description = "Timesheet detail", body = Timesheet)),
    security(("bearerAuth" = []))
)]
pub async fn get_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Timesheet>> {
    let timesheet = load_timesheet(&state, id).await?;
    if gate.user.id != timesheet.carer_id {
        gate.require(Action::Read, Subject::Timesheet, Some(&timesheet.as_subject_data()))?;
    }
    Ok(Json(timesheet))
}

/// Soft-delete. The guard refuses approved/rejected rows that were never
/// invalidated; the conditional UPDATE enforces the same thing against
/// races.
#[utoipa::path(
    delete,
    path = "/timesheets/{id}",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    responses(
        (status = 204, description = "Timesheet deleted"),
        (status = 409, description = "Not deletable in its current status"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let db = fetch_db_timesheet(&state, id).await?;
    let view = build_view(&state, &db).await?;
    let actor = Actor::from_session(&gate.user);

    machine::ensure_deletable(&view, &actor)?;

    let now = utc_now();
    let result = sqlx::query(
        "UPDATE timesheets SET deleted_at = ?, updated_at = ? \
         WHERE id = ? AND deleted_at IS NULL AND status IN ('pending', 'invalidated')",
    )
    .bind(now)
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(TransitionError::NotInvalidated.into());
    }

    let timesheet = timesheet_from_db(db)?;
    log_activity(&state.events, "deleted", Some(gate.user.id), &timesheet);

    // A pending row with an open scan session just lost its token.
    if let Some(token) = timesheet.token_for_qr_code.as_deref() {
        state.scans.publish(token, ScanOutcome::failure(id, "timesheet deleted"));
    }

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// SIGNATURE APPROVAL (sub-protocol B)
// =============================================================================

/// Approve with captured-signature evidence. The payload is validated as a
/// whole and the transition applied atomically; a second approval attempt
/// fails with `already_approved` instead of silently succeeding.
#[utoipa::path(
    post,
    path = "/timesheets/{id}/approve",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    request_body = SignatureApprovalRequest,
    responses(
        (status = 200, description = "Timesheet approved", body = Timesheet),
        (status = 409, description = "Guard refused the transition"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_with_signature(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
    Json(req): Json<SignatureApprovalRequest>,
) -> AppResult<Json<Timesheet>> {
    let db = fetch_db_timesheet(&state, id).await?;
    let view = build_view(&state, &db).await?;
    let actor = Actor::from_session(&gate.user);

    machine::approve(&view, &actor, &Evidence::Signature(&req))?;
    let signature = validate_signature(&req)?;

    let now = utc_now();
    let result = sqlx::query(
        "UPDATE timesheets SET status = 'approved', signature_image = ?, signer_name = ?, signer_role = ?, \
         signature_url = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(&signature.image_data)
    .bind(&signature.signer_name)
    .bind(signature.signer_role.as_str())
    .bind(format!("/timesheets/{id}/signature.png"))
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        // Lost the race: someone else moved it first.
        return Err(refusal_for_current_status(&state, id).await?.into());
    }

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "approved", Some(gate.user.id), &timesheet);

    // Close any scan session awaiting this timesheet; the signature won.
    if let Some(token) = db.qr_token.as_deref() {
        state.scans.publish(token, ScanOutcome::success(id));
    }

    Ok(Json(timesheet))
}

// =============================================================================
// QR SCAN APPROVAL (sub-protocol A)
// =============================================================================

/// Apply a decoded QR token. Matching is atomic and single-use: only a
/// successful approval consumes the token, a replay is refused with
/// `code_already_used`, and a token bound to a different carer fails with
/// the retryable `token_mismatch`.
#[utoipa::path(
    post,
    path = "/timesheets/scan",
    tag = "Timesheets",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan accepted, timesheet approved", body = Timesheet),
        (status = 404, description = "Unknown token or carer mismatch"),
        (status = 409, description = "Code already used"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn scan_qr(
    State(state): State<AppState>,
    gate: Gate,
    Json(req): Json<ScanRequest>,
) -> AppResult<Json<Timesheet>> {
    let db = sqlx::query_as::<_, DbTimesheet>(
        &format!("{SELECT_TIMESHEET} WHERE qr_token = ? AND deleted_at IS NULL"),
    )
    .bind(&req.token)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("no timesheet matches this code"))?;

    let id = Uuid::parse_str(&db.id).unwrap_or_default();
    let view = build_view(&state, &db).await?;

    if view.status != TimesheetStatus::Pending {
        return Err(TransitionError::TokenAlreadyUsed.into());
    }
    if req.carer_id != view.carer_id {
        // Wrong carer on the scanning device; the token stays live.
        return Err(TransitionError::TokenMismatch.into());
    }

    let actor = Actor::from_session(&gate.user);
    machine::approve(&view, &actor, &Evidence::QrToken(&req.token))?;

    let now = utc_now();
    let result = sqlx::query(
        "UPDATE timesheets SET status = 'approved', updated_at = ? \
         WHERE id = ? AND status = 'pending' AND qr_token = ?",
    )
    .bind(now)
    .bind(id.to_string())
    .bind(&req.token)
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(TransitionError::TokenAlreadyUsed.into());
    }

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "approved", Some(gate.user.id), &timesheet);
    state.scans.publish(&req.token, ScanOutcome::success(id));

    Ok(Json(timesheet))
}

type OutcomeStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Scan-session subscription: one SSE connection per awaiting-scan screen,
/// delivering the single terminal outcome for the token. Subscribing after
/// the timesheet already left `pending` yields the outcome immediately.
#[utoipa::path(
    get,
    path = "/timesheets/scan/{token}/events",
    tag = "Timesheets",
    params(("token" = String, Path, description = "Scan token")),
    responses(
        (status = 200, description = "SSE stream with one terminal scan event"),
        (status = 404, description = "Unknown token"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn scan_events(
    State(state): State<AppState>,
    _gate: Gate,
    Path(token): Path<String>,
) -> AppResult<Sse<OutcomeStream>> {
    let db = sqlx::query_as::<_, DbTimesheet>(
        &format!("{SELECT_TIMESHEET} WHERE qr_token = ? AND deleted_at IS NULL"),
    )
    .bind(&token)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("no timesheet matches this code"))?;

    let id = Uuid::parse_str(&db.id).unwrap_or_default();
    let status = TimesheetStatus::parse(&db.status)
        .ok_or_else(|| AppError::internal(format!("unknown timesheet status `{}`", db.status)))?;

    let stream: OutcomeStream = if status == TimesheetStatus::Pending {
        let rx = state.scans.subscribe(&token);
        Box::pin(
            BroadcastStream::new(rx)
                .filter_map(|message| message.ok())
                .take(1)
                .map(|outcome| Ok(outcome_event(&outcome))),
        )
    } else {
        // Already terminal: answer without waiting on the hub.
        let outcome = if status == TimesheetStatus::Approved {
            ScanOutcome::success(id)
        } else {
            ScanOutcome::failure(id, status.as_str())
        };
        Box::pin(tokio_stream::once(Ok(outcome_event(&outcome))))
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn outcome_event(outcome: &ScanOutcome) -> Event {
    let event = Event::default().event("scan");
    match serde_json::to_string(outcome) {
        Ok(body) => event.data(body),
        Err(_) => event.data(match outcome.status {
            ScanStatus::Success => "{\"status\":\"success\"}",
            ScanStatus::Failure => "{\"status\":\"failure\"}",
        }),
    }
}

// =============================================================================
// REMAINING TRANSITIONS
// =============================================================================

#[utoipa::path(
    post,
    path = "/timesheets/{id}/reject",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    responses(
        (status = 200, description = "Timesheet rejected", body = Timesheet),
        (status = 409, description = "Guard refused the transition"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn reject_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Timesheet>> {
    let db = fetch_db_timesheet(&state, id).await?;
    let view = build_view(&state, &db).await?;
    let actor = Actor::from_session(&gate.user);

    machine::reject(&view, &actor)?;

    let now = utc_now();
    let result = sqlx::query("UPDATE timesheets SET status = 'rejected', updated_at = ? WHERE id = ? AND status = 'pending'")
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(refusal_for_current_status(&state, id).await?.into());
    }

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "rejected", Some(gate.user.id), &timesheet);

    // The awaiting-scan screen gets its terminal failure.
    if let Some(token) = db.qr_token.as_deref() {
        state.scans.publish(token, ScanOutcome::failure(id, "rejected"));
    }

    Ok(Json(timesheet))
}

#[utoipa::path(
    post,
    path = "/timesheets/{id}/invalidate",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    responses(
        (status = 200, description = "Timesheet invalidated", body = Timesheet),
        (status = 409, description = "Guard refused the transition"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn invalidate_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Timesheet>> {
    let db = fetch_db_timesheet(&state, id).await?;
    let view = build_view(&state, &db).await?;
    let actor = Actor::from_session(&gate.user);

    machine::invalidate(&view, &actor)?;

    let now = utc_now();
    let result = sqlx::query(
        "UPDATE timesheets SET status = 'invalidated', updated_at = ? \
         WHERE id = ? AND status IN ('approved', 'rejected')",
    )
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(TransitionError::NotInvalidatable.into());
    }

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "invalidated", Some(gate.user.id), &timesheet);

    Ok(Json(timesheet))
}

/// Advance the independent invoice lifecycle. Only invoicing moves it, and
/// only forwards.
#[utoipa::path(
    post,
    path = "/timesheets/{id}/invoice-status",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    request_body = InvoiceStatusRequest,
    responses(
        (status = 200, description = "Invoice status advanced", body = Timesheet),
        (status = 409, description = "Regression refused"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn advance_invoice_status(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
    Json(req): Json<InvoiceStatusRequest>,
) -> AppResult<Json<Timesheet>> {
    let db = fetch_db_timesheet(&state, id).await?;
    gate.require(
        Action::Update,
        Subject::Invoice,
        Some(&json!({"organization_id": db.organization_id.clone()})),
    )?;

    let current = crate::models::timesheet::InvoiceStatus::parse(&db.invoice_status)
        .ok_or_else(|| AppError::internal(format!("unknown invoice status `{}`", db.invoice_status)))?;
    let next = machine::advance_invoice(current, req.invoice_status)?;

    let now = utc_now();
    let result = sqlx::query(
        "UPDATE timesheets SET invoice_status = ?, updated_at = ? WHERE id = ? AND invoice_status = ?",
    )
    .bind(next.as_str())
    .bind(now)
    .bind(id.to_string())
    .bind(current.as_str())
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(TransitionError::InvoiceRegression.into());
    }

    let timesheet = load_timesheet(&state, id).await?;
    log_activity(&state.events, "invoiced", Some(gate.user.id), &timesheet);

    Ok(Json(timesheet))
}

/// Carer feedback on the worked shift.
#[utoipa::path(
    put,
    path = "/timesheets/{id}/review",
    tag = "Timesheets",
    params(("id" = Uuid, Path, description = "Timesheet id")),
    request_body = ReviewRequest,
    responses((status = 200, description = "Review stored", body = Timesheet)),
    security(("bearerAuth" = []))
)]
pub async fn review_timesheet(
    State(state): State<AppState>,
    gate: Gate,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<Timesheet>> {
    let db = fetch_db_timesheet(&state, id).await?;
    if db.carer_id != gate.user.id.to_string() {
        return Err(AppError::forbidden("only the timesheet's carer can review the shift"));
    }
    if !(1..=5).contains(&req.rating) {
        return Err(AppError::bad_request("rating must be between 1 and 5"));
    }

    let now = utc_now();
    sqlx::query("UPDATE timesheets SET rating = ?, review = ?, updated_at = ? WHERE id = ?")
        .bind(req.rating)
        .bind(&req.review)
        .bind(now)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    let timesheet = load_timesheet(&state, id).await?;
    Ok(Json(timesheet))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn fetch_db_timesheet(state: &AppState, id: Uuid) -> AppResult<DbTimesheet> {
    sqlx::query_as::<_, DbTimesheet>(&format!("{SELECT_TIMESHEET} WHERE id = ? AND deleted_at IS NULL"))
        .bind(id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found("timesheet not found"))
}

async fn load_timesheet(state: &AppState, id: Uuid) -> AppResult<Timesheet> {
    let db = fetch_db_timesheet(state, id).await?;
    timesheet_from_db(db)
}

fn timesheet_from_db(db: DbTimesheet) -> AppResult<Timesheet> {
    db.try_into()
}

/// Resolve the transition view, including the carer's employing
/// organization (agency staff may belong to a different one).
async fn build_view(state: &AppState, db: &DbTimesheet) -> AppResult<TimesheetView> {
    let status = TimesheetStatus::parse(&db.status)
        .ok_or_else(|| AppError::internal(format!("unknown timesheet status `{}`", db.status)))?;
    let carer_id = crate::models::user::parse_id(&db.carer_id)?;
    let organization_id = crate::models::user::parse_id(&db.organization_id)?;

    let carer_org: Option<String> = sqlx::query_scalar("SELECT organization_id FROM users WHERE id = ?")
        .bind(&db.carer_id)
        .fetch_optional(&state.pool)
        .await?;
    let carer_organization_id = match carer_org {
        Some(raw) => crate::models::user::parse_id(&raw)?,
        None => organization_id,
    };

    Ok(TimesheetView {
        status,
        carer_id,
        organization_id,
        carer_organization_id,
    })
}

/// Map a lost status race to the guard error the machine would have raised
/// had it seen the winner's state.
async fn refusal_for_current_status(state: &AppState, id: Uuid) -> AppResult<TransitionError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM timesheets WHERE id = ? AND deleted_at IS NULL")
            .bind(id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    Ok(match status.as_deref() {
        Some("approved") => TransitionError::AlreadyApproved,
        Some("invalidated") | Some("rejected") => TransitionError::NotPending,
        _ => TransitionError::NotPending,
    })
}
