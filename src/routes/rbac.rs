//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, user assignments and direct permission
//! grants. All RBAC modifications are logged to the activity log with
//! Critical severity. The role listing doubles as the one permission-gated
//! page: a denied caller is redirected instead of rendered.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{build_ability, fetch_session_user, Action, ConditionSet, Gate, RoleKind, Subject};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_context, RequestContext};
use crate::models::rbac::*;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        // User role assignments
        .route("/users/:user_id/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:role_id", delete(revoke_role_from_user))
        // User direct permissions
        .route("/users/:user_id/permissions", get(get_user_permissions).post(grant_permission_to_user))
        .route("/users/:user_id/permissions/:permission_id", delete(revoke_permission_from_user))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles. Permission-gated route: a caller who may not read roles
/// is redirected to /unauthorized rather than shown the page.
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 303, description = "Redirect for callers without access"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, gate: Gate) -> Result<Json<Vec<Role>>, Response> {
    gate.require_or_redirect(Action::Read, Subject::Role, None, None)?;

    let rows = sqlx::query_as::<_, DbRole>(
        "SELECT id, name, kind, is_system_role, sector, description, created_at, updated_at \
         FROM roles ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(|err| AppError::from(err).into_response())?;

    Ok(Json(rows.into_iter().map(Role::from).collect()))
}

/// Create a new role. The stable kind is resolved from the submitted name
/// here, once; evaluation never looks at the display name again.
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    gate: Gate,
    headers: HeaderMap,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    gate.require(Action::Manage, Subject::Role, None)?;

    let kind = RoleKind::from_name(&req.name);
    if kind == RoleKind::SuperAdmin {
        return Err(AppError::forbidden("the system super-admin role is seeded, not created"));
    }

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(&req.name)
        .fetch_optional(&state.pool)
        .await?;
    if existing.is_some() {
        return Err(AppError::conflict("role name already exists"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO roles (id, name, kind, is_system_role, sector, description, created_at, updated_at) \
         VALUES (?, ?, ?, 0, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&req.name)
    .bind(kind.as_str())
    .bind(&req.sector)
    .bind(&req.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let role = Role {
        id,
        name: req.name,
        kind,
        is_system_role: false,
        sector: req.sector,
        description: req.description,
        created_at: now,
        updated_at: now,
    };
    log_activity_with_context(
        &state.events,
        "created",
        Some(gate.user.id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses((status = 200, description = "Role detail", body = Role)),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    gate: Gate,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    gate.require(Action::Read, Subject::Role, None)?;

    let row = fetch_role(&state, role_id).await?;
    Ok(Json(row))
}

#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 403, description = "System roles cannot be deleted"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    gate: Gate,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    gate.require(Action::Manage, Subject::Role, None)?;

    let role = fetch_role(&state, role_id).await?;
    if role.is_system_role {
        return Err(AppError::forbidden("system roles cannot be deleted"));
    }

    sqlx::query("DELETE FROM user_roles WHERE role_id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;

    log_activity(&state.events, "deleted", Some(gate.user.id), &role);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_role(state: &AppState, role_id: Uuid) -> AppResult<Role> {
    let row = sqlx::query_as::<_, DbRole>(
        "SELECT id, name, kind, is_system_role, sector, description, created_at, updated_at \
         FROM roles WHERE id = ?",
    )
    .bind(role_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("role not found"))?;
    Ok(row.into())
}

// =============================================================================
// USER ROLE ASSIGNMENTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Roles held by the user", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    gate: Gate,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<Role>>> {
    require_user_admin(&state, &gate, user_id).await?;

    let rows = sqlx::query_as::<_, DbRole>(
        "SELECT r.id, r.name, r.kind, r.is_system_role, r.sector, r.description, r.created_at, r.updated_at \
         FROM roles r JOIN user_roles ur ON ur.role_id = r.id \
         WHERE ur.user_id = ? ORDER BY ur.created_at, r.id",
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(Role::from).collect()))
}

#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 409, description = "Role already assigned"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    gate: Gate,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    require_user_admin(&state, &gate, user_id).await?;

    let role = fetch_role(&state, req.role_id).await?;
    if role.kind == RoleKind::SuperAdmin && role.is_system_role {
        return Err(AppError::forbidden("the system super-admin role cannot be assigned here"));
    }

    let already: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM user_roles WHERE user_id = ? AND role_id = ?")
            .bind(user_id.to_string())
            .bind(req.role_id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    if already.is_some() {
        return Err(AppError::conflict("role already assigned"));
    }

    let now = utc_now();
    sqlx::query("INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(req.role_id.to_string())
        .bind(now)
        .execute(&state.pool)
        .await?;

    let assignment = UserRole {
        user_id,
        role_id: req.role_id,
        created_at: now,
    };
    log_activity(&state.events, "assigned", Some(gate.user.id), &assignment);

    Ok((StatusCode::CREATED, Json(assignment)))
}

#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User id"),
        ("role_id" = Uuid, Path, description = "Role id")
    ),
    responses((status = 204, description = "Role revoked")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    gate: Gate,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_user_admin(&state, &gate, user_id).await?;

    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found("assignment not found"));
    }

    let assignment = UserRole {
        user_id,
        role_id,
        created_at: utc_now(),
    };
    log_activity(&state.events, "revoked", Some(gate.user.id), &assignment);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// DIRECT PERMISSION GRANTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Direct grants for the user", body = Vec<UserPermission>)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    gate: Gate,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<UserPermission>>> {
    require_user_admin(&state, &gate, user_id).await?;

    let rows = sqlx::query_as::<_, (String, String, String, Option<String>, chrono::DateTime<chrono::Utc>)>(
        "SELECT id, action, subject, conditions, created_at FROM user_permissions \
         WHERE user_id = ? ORDER BY created_at, id",
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let mut grants = Vec::with_capacity(rows.len());
    for (id, action, subject, conditions, created_at) in rows {
        let conditions = conditions
            .map(|raw| serde_json::from_str::<Value>(&raw))
            .transpose()
            .map_err(|err| AppError::internal(format!("invalid stored conditions: {err}")))?;
        grants.push(UserPermission {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            user_id,
            action,
            subject,
            conditions,
            created_at,
        });
    }
    Ok(Json(grants))
}

/// Grant a can-rule directly to a user. Action, subject and the condition
/// operators are validated against the closed enums before anything is
/// stored.
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = GrantPermissionRequest,
    responses((status = 201, description = "Permission granted", body = UserPermission)),
    security(("bearerAuth" = []))
)]
pub async fn grant_permission_to_user(
    State(state): State<AppState>,
    gate: Gate,
    Path(user_id): Path<Uuid>,
    Json(req): Json<GrantPermissionRequest>,
) -> AppResult<(StatusCode, Json<UserPermission>)> {
    require_user_admin(&state, &gate, user_id).await?;

    Action::parse(&req.action).ok_or_else(|| AppError::bad_request(format!("unknown action `{}`", req.action)))?;
    Subject::parse(&req.subject)
        .ok_or_else(|| AppError::bad_request(format!("unknown subject `{}`", req.subject)))?;
    if let Some(conditions) = &req.conditions {
        ConditionSet::from_value(conditions).map_err(AppError::bad_request)?;
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let conditions_raw = req.conditions.as_ref().map(|value| value.to_string());

    sqlx::query(
        "INSERT INTO user_permissions (id, user_id, action, subject, conditions, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(&req.action)
    .bind(&req.subject)
    .bind(&conditions_raw)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let grant = UserPermission {
        id,
        user_id,
        action: req.action,
        subject: req.subject,
        conditions: req.conditions,
        created_at: now,
    };
    log_activity(&state.events, "granted", Some(gate.user.id), &grant);

    Ok((StatusCode::CREATED, Json(grant)))
}

#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User id"),
        ("permission_id" = Uuid, Path, description = "Grant id")
    ),
    responses((status = 204, description = "Permission revoked")),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission_from_user(
    State(state): State<AppState>,
    gate: Gate,
    Path((user_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_user_admin(&state, &gate, user_id).await?;

    let result = sqlx::query("DELETE FROM user_permissions WHERE id = ? AND user_id = ?")
        .bind(permission_id.to_string())
        .bind(user_id.to_string())
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found("grant not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// The compiled rule sequence for a user, in evaluation order. What the
/// ability would actually decide from, useful when debugging access.
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Compiled rules", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    gate: Gate,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    require_user_admin(&state, &gate, user_id).await?;

    let session_user = fetch_session_user(&state.pool, user_id).await?;
    let ability = build_ability(Some(&session_user));

    let role_names: Vec<String> = sqlx::query_scalar(
        "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id \
         WHERE ur.user_id = ? ORDER BY ur.created_at, r.id",
    )
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let rules = ability
        .rules()
        .iter()
        .map(|rule| EffectiveRule {
            action: rule.action.as_str().to_string(),
            subject: rule.subject.as_str().to_string(),
            effect: if rule.inverted { "cannot" } else { "can" }.to_string(),
            conditions: if rule.conditions.is_empty() {
                None
            } else {
                Some(rule.conditions.to_value())
            },
            fields: rule.fields.clone(),
        })
        .collect();

    Ok(Json(EffectivePermissions {
        user_id,
        roles: role_names,
        rules,
    }))
}

// =============================================================================
// HELPERS
// =============================================================================

/// RBAC mutations on a user require manage rights over that user's record.
pub async fn require_user_admin(state: &AppState, gate: &Gate, user_id: Uuid) -> AppResult<()> {
    let target_org: Option<String> =
        sqlx::query_scalar("SELECT organization_id FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(user_id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    let target_org = target_org.ok_or_else(|| AppError::not_found("user not found"))?;

    gate.require(
        Action::Manage,
        Subject::User,
        Some(&serde_json::json!({"id": user_id.to_string(), "organization_id": target_org})),
    )
}
