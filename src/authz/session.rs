use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

use super::ability::Ability;
use super::conditions::ConditionSet;
use super::rules::build_ability;
use super::{Action, RoleKind, Subject};

/// One role as held by a user: the stable kind plus the system flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRole {
    pub kind: RoleKind,
    pub is_system_role: bool,
}

/// A dynamic per-user grant, appended after the role packs.
#[derive(Debug, Clone)]
pub struct PermissionGrant {
    pub action: Action,
    pub subject: Subject,
    pub conditions: ConditionSet,
}

/// Snapshot of the authenticated user as the ability builder consumes it.
/// Roles, grants and assignments keep their stored order so the compiled
/// rule sequence is identical across rebuilds.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub department_id: Option<Uuid>,
    pub roles: Vec<SessionRole>,
    pub grants: Vec<PermissionGrant>,
    pub assigned_patient_ids: Vec<Uuid>,
}

/// Load the session snapshot for `user_id`.
///
/// Every list is ordered by its assignment timestamp (id as tiebreaker), not
/// by hash iteration, which keeps rebuilt abilities deterministic.
pub async fn fetch_session_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<SessionUser> {
    let user_row = sqlx::query(
        "SELECT id, organization_id, department_id FROM users WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("user not found"))?;

    let organization_id = parse_uuid(user_row.get::<String, _>("organization_id"))?;
    let department_id = user_row
        .get::<Option<String>, _>("department_id")
        .map(parse_uuid)
        .transpose()?;

    let role_rows = sqlx::query(
        "SELECT r.kind, r.is_system_role FROM roles r \
         JOIN user_roles ur ON ur.role_id = r.id \
         WHERE ur.user_id = ? ORDER BY ur.created_at, r.id",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let roles = role_rows
        .iter()
        .map(|row| SessionRole {
            kind: RoleKind::from_name(row.get::<String, _>("kind").as_str()),
            is_system_role: row.get::<bool, _>("is_system_role"),
        })
        .collect();

    let grant_rows = sqlx::query(
        "SELECT action, subject, conditions FROM user_permissions \
         WHERE user_id = ? ORDER BY created_at, id",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut grants = Vec::with_capacity(grant_rows.len());
    for row in &grant_rows {
        let action_raw: String = row.get("action");
        let subject_raw: String = row.get("subject");
        let action = Action::parse(&action_raw)
            .ok_or_else(|| AppError::internal(format!("unknown stored action `{action_raw}`")))?;
        let subject = Subject::parse(&subject_raw)
            .ok_or_else(|| AppError::internal(format!("unknown stored subject `{subject_raw}`")))?;
        let conditions_raw: Option<String> = row.get("conditions");
        let conditions = match conditions_raw {
            None => ConditionSet::new(),
            Some(raw) => {
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|err| AppError::internal(format!("invalid stored conditions: {err}")))?;
                ConditionSet::from_value(&value).map_err(AppError::internal)?
            }
        };
        grants.push(PermissionGrant {
            action,
            subject,
            conditions,
        });
    }

    let patient_rows = sqlx::query(
        "SELECT patient_id FROM patient_assignments WHERE user_id = ? ORDER BY created_at, patient_id",
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut assigned_patient_ids = Vec::with_capacity(patient_rows.len());
    for row in &patient_rows {
        assigned_patient_ids.push(parse_uuid(row.get::<String, _>("patient_id"))?);
    }

    Ok(SessionUser {
        id: user_id,
        organization_id,
        department_id,
        roles,
        grants,
        assigned_patient_ids,
    })
}

fn parse_uuid(raw: String) -> AppResult<Uuid> {
    Uuid::parse_str(&raw).map_err(|err| AppError::internal(format!("invalid stored uuid `{raw}`: {err}")))
}

/// Session-scoped holder of the current ability.
///
/// Constructed holding the anonymous ability; `observe` rebuilds it
/// synchronously whenever the user identity changes; `end` tears the
/// session down on logout. Consuming a torn-down session is a caller
/// contract violation and panics rather than silently granting or denying.
#[derive(Debug)]
pub struct AbilitySession {
    user_id: Option<Uuid>,
    ability: Ability,
    active: bool,
}

impl AbilitySession {
    pub fn new() -> Self {
        Self {
            user_id: None,
            ability: build_ability(None),
            active: true,
        }
    }

    pub fn for_user(user: &SessionUser) -> Self {
        Self {
            user_id: Some(user.id),
            ability: build_ability(Some(user)),
            active: true,
        }
    }

    /// Rebuild only when the observed user identity differs from the one
    /// the current ability was compiled for.
    pub fn observe(&mut self, user: Option<&SessionUser>) {
        assert!(self.active, "AbilitySession used after end()");
        let observed = user.map(|u| u.id);
        if observed != self.user_id {
            self.user_id = observed;
            self.ability = build_ability(user);
        }
    }

    pub fn ability(&self) -> &Ability {
        assert!(self.active, "AbilitySession used after end()");
        &self.ability
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    /// Tear down on logout. Any later query is a programming error.
    pub fn end(&mut self) {
        self.active = false;
    }
}

impl Default for AbilitySession {
    fn default() -> Self {
        Self::new()
    }
}
