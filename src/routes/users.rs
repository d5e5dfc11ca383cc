//! Staff management inside one organization.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Action, Gate, RoleKind, Subject};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::user::{DbUser, StaffCreateRequest, User};
use crate::utils::{hash_password, utc_now};

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_staff).post(create_staff))
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "Staff of the caller's organization", body = [User])),
    security(("bearerAuth" = []))
)]
pub async fn list_staff(State(state): State<AppState>, gate: Gate) -> AppResult<Json<Vec<User>>> {
    let org = gate.user.organization_id;
    gate.require(
        Action::Read,
        Subject::User,
        Some(&json!({"organization_id": org.to_string()})),
    )?;

    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, department_id, name, email, password_hash, created_at, updated_at, deleted_at \
         FROM users WHERE organization_id = ? AND deleted_at IS NULL ORDER BY created_at",
    )
    .bind(org.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(row.try_into()?);
    }
    Ok(Json(users))
}

/// Invite a staff member into the caller's organization, optionally with
/// initial roles (resolved by kind, not by display string).
#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = StaffCreateRequest,
    responses(
        (status = 201, description = "Staff member created", body = User),
        (status = 409, description = "Email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_staff(
    State(state): State<AppState>,
    gate: Gate,
    Json(req): Json<StaffCreateRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let org = gate.user.organization_id;
    gate.require(
        Action::Invite,
        Subject::User,
        Some(&json!({"organization_id": org.to_string()})),
    )?;

    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(&req.email)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_some() {
        return Err(AppError::conflict("email already in use"));
    }

    let password_hash = hash_password(&req.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, organization_id, department_id, name, email, password_hash, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(org.to_string())
    .bind(req.department_id.map(|id| id.to_string()))
    .bind(&req.name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for role_name in &req.roles {
        let role_row: Option<(String, String)> =
            sqlx::query_as("SELECT id, kind FROM roles WHERE name = ? ORDER BY created_at LIMIT 1")
                .bind(role_name)
                .fetch_optional(&mut *tx)
                .await?;
        let (role_id, kind_raw) =
            role_row.ok_or_else(|| AppError::bad_request(format!("unknown role `{role_name}`")))?;
        if RoleKind::from_name(&kind_raw) == RoleKind::SuperAdmin {
            return Err(AppError::forbidden("the system super-admin role cannot be assigned here"));
        }
        sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
            .bind(user_id.to_string())
            .bind(&role_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let user = User {
        id: user_id,
        organization_id: org,
        department_id: req.department_id,
        name: req.name,
        email: req.email,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    log_activity(&state.events, "created", Some(gate.user.id), &user);

    Ok((StatusCode::CREATED, Json(user)))
}
