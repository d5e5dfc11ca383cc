//! Invoice reporting endpoints: a thin shell over `reporting::summarize`.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;

use crate::app::AppState;
use crate::authz::{Action, Gate, Subject};
use crate::errors::{AppError, AppResult};
use crate::models::shift::{RateRow, ShiftTiming};
use crate::reporting::{summarize, BillableShift, DateRange, InvoiceSummary};

pub fn routes() -> Router<AppState> {
    Router::new().route("/invoice-summary", get(invoice_summary))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Fold the approved timesheets of the requested window into the invoice
/// summary. Organization admins and billing staff see their own
/// organization; the system super-admin sees all of them.
#[utoipa::path(
    get,
    path = "/reports/invoice-summary",
    tag = "Reports",
    params(
        ("from" = NaiveDate, Query, description = "Window start (inclusive)"),
        ("to" = NaiveDate, Query, description = "Window end (inclusive)")
    ),
    responses((status = 200, description = "Invoice summary for the window", body = InvoiceSummary)),
    security(("bearerAuth" = []))
)]
pub async fn invoice_summary(
    State(state): State<AppState>,
    gate: Gate,
    Query(query): Query<SummaryQuery>,
) -> AppResult<Json<InvoiceSummary>> {
    if query.to < query.from {
        return Err(AppError::bad_request("`to` must not precede `from`"));
    }

    let org = gate.user.organization_id;
    gate.require(
        Action::Export,
        Subject::Report,
        Some(&json!({"organization_id": org.to_string()})),
    )?;

    // Unconditional manage-all only holds for the system super-admin.
    let all_organizations = gate.can(Action::Manage, Subject::All, None);

    let mut sql = String::from(
        "SELECT t.id AS timesheet_id, t.organization_id, t.carer_id, t.is_holiday, \
         s.role, s.shift_date, s.timing, s.is_emergency, s.rates \
         FROM timesheets t JOIN shift_schedules s ON s.id = t.shift_schedule_id \
         WHERE t.status = 'approved' AND t.deleted_at IS NULL \
         AND s.shift_date >= ? AND s.shift_date <= ?",
    );
    if !all_organizations {
        sql.push_str(" AND t.organization_id = ?");
    }
    sql.push_str(" ORDER BY s.shift_date, t.created_at, t.id");

    let mut query_builder = sqlx::query(&sql).bind(query.from).bind(query.to);
    if !all_organizations {
        query_builder = query_builder.bind(org.to_string());
    }
    let rows = query_builder.fetch_all(&state.pool).await?;

    let mut shifts = Vec::with_capacity(rows.len());
    for row in &rows {
        let timing: ShiftTiming = serde_json::from_str(&row.get::<String, _>("timing"))
            .map_err(|err| AppError::internal(format!("invalid stored shift timing: {err}")))?;
        let rates: Vec<RateRow> = serde_json::from_str(&row.get::<String, _>("rates"))
            .map_err(|err| AppError::internal(format!("invalid stored rate card: {err}")))?;

        shifts.push(BillableShift {
            timesheet_id: crate::models::user::parse_id(&row.get::<String, _>("timesheet_id"))?,
            organization_id: crate::models::user::parse_id(&row.get::<String, _>("organization_id")).ok(),
            staff_id: crate::models::user::parse_id(&row.get::<String, _>("carer_id")).ok(),
            role: row.get("role"),
            shift_date: row.get("shift_date"),
            timing,
            is_emergency: row.get("is_emergency"),
            is_holiday: row.get("is_holiday"),
            rates,
        });
    }

    let range = DateRange {
        from: query.from,
        to: query.to,
    };
    Ok(Json(summarize(&shifts, &range)))
}
