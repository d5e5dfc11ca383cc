use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::organization::Organization;
use crate::models::user::{AuthResponse, DbUser, LoginRequest, RegisterRequest, User};
use crate::utils::{hash_password, utc_now, verify_password};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

const VALID_SECTORS: [&str; 2] = ["hospital", "care_home"];

/// Registration creates a tenant: the organization plus its first admin,
/// who gets the seeded Organization Admin role.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Organization and admin registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    if !VALID_SECTORS.contains(&req.sector.as_str()) {
        return Err(AppError::bad_request("sector must be hospital or care_home"));
    }
    if req.organization_name.trim().is_empty() {
        return Err(AppError::bad_request("organization name is required"));
    }

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
    let organization_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;

    sqlx::query("INSERT INTO organizations (id, name, sector, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(organization_id.to_string())
        .bind(req.organization_name.trim())
        .bind(&req.sector)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO users (id, organization_id, department_id, name, email, password_hash, created_at, updated_at) \
         VALUES (?, ?, NULL, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(organization_id.to_string())
    .bind(&req.name)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // First user administers the new organization.
    let admin_role_id: String =
        sqlx::query_scalar("SELECT id FROM roles WHERE kind = 'organization_admin' ORDER BY created_at LIMIT 1")
            .fetch_one(&mut *tx)
            .await?;
    sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(&admin_role_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let organization = Organization {
        id: organization_id,
        name: req.organization_name.trim().to_string(),
        sector: req.sector,
        created_at: now,
        updated_at: now,
    };
    let user = User {
        id: user_id,
        organization_id,
        department_id: None,
        name: req.name,
        email: req.email,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    log_activity(&state.events, "created", Some(user_id), &organization);
    log_activity(&state.events, "registered", Some(user_id), &user);

    let token = state.jwt.encode(user_id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, department_id, name, email, password_hash, created_at, updated_at, deleted_at \
         FROM users WHERE email = ? AND deleted_at IS NULL",
    )
    .bind(&req.email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&req.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user: User = db_user.try_into()?;
    log_activity(&state.events, "login", Some(user.id), &user);

    let token = state.jwt.encode(user.id)?;
    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, organization_id, department_id, name, email, password_hash, created_at, updated_at, deleted_at \
         FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(auth.user_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))?;

    Ok(Json(db_user.try_into()?))
}

/// Stateless JWT logout: the client drops the token and tears down its
/// ability session; the server only acknowledges.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged")),
    security(("bearerAuth" = []))
)]
pub async fn logout(_auth: AuthUser) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "logged out".to_string(),
    })
}
