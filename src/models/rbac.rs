use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::RoleKind;
use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    /// Stable kind resolved from the name once at creation; evaluation
    /// matches on this, never on `name`.
    pub kind: RoleKind,
    pub is_system_role: bool,
    /// Optional sector scoping ("hospital" / "care_home").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub is_system_role: bool,
    pub sector: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbRole> for Role {
    fn from(db: DbRole) -> Self {
        Role {
            id: Uuid::parse_str(&db.id).unwrap_or_default(),
            name: db.name,
            kind: RoleKind::from_name(&db.kind),
            is_system_role: db.is_system_role,
            sector: db.sector,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Nurse")]
    pub name: String,
    #[schema(example = "Ward nursing staff")]
    pub description: Option<String>,
    #[schema(example = "hospital")]
    pub sector: Option<String>,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

// =============================================================================
// USER-PERMISSION DIRECT GRANT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPermission {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Action/subject of the granted can-rule.
    pub action: String,
    pub subject: String,
    /// Condition mapping as JSON; omitted means an unconditional grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub conditions: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Loggable for UserPermission {
    fn entity_type() -> &'static str { "user_permission" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantPermissionRequest {
    #[schema(example = "approve")]
    pub action: String,
    #[schema(example = "Timesheet")]
    pub subject: String,
    /// Optional condition JSON, e.g. {"organization_id": "..."}
    #[serde(default)]
    #[schema(value_type = Object)]
    pub conditions: Option<Value>,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    /// The compiled rule sequence, in evaluation order.
    pub rules: Vec<EffectiveRule>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectiveRule {
    pub action: String,
    pub subject: String,
    /// "can" or "cannot"
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub conditions: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fields: Vec<String>,
}
