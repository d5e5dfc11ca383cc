//! Authorization module - ability engine and permission gates
//!
//! This module implements the ABAC ability engine with support for:
//! - Ordered can/cannot rules (last matching rule wins)
//! - Condition predicates over request data (equals, $ne, $in, $exists)
//! - Role rule packs appended in a fixed precedence order
//! - Dynamic per-user permission grants
//! - A session-scoped ability holder and thin route/render gates

mod ability;
mod conditions;
mod gate;
mod rules;
mod session;

pub use ability::{check_ability, Ability, AbilityBuilder, Rule};
pub use conditions::{Condition, ConditionSet};
pub use gate::{render, Gate};
pub use rules::build_ability;
pub use session::{fetch_session_user, AbilitySession, PermissionGrant, SessionRole, SessionUser};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of actions a rule can grant or deny.
///
/// `Manage` matches any action during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Manage,
    Invite,
    Assign,
    Approve,
    Export,
    Schedule,
}

impl Action {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Action::Create),
            "read" => Some(Action::Read),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            "manage" => Some(Action::Manage),
            "invite" => Some(Action::Invite),
            "assign" => Some(Action::Assign),
            "approve" => Some(Action::Approve),
            "export" => Some(Action::Export),
            "schedule" => Some(Action::Schedule),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Invite => "invite",
            Action::Assign => "assign",
            Action::Approve => "approve",
            Action::Export => "export",
            Action::Schedule => "schedule",
        }
    }

    pub const ALL: [Action; 10] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::Manage,
        Action::Invite,
        Action::Assign,
        Action::Approve,
        Action::Export,
        Action::Schedule,
    ];
}

/// Closed set of domain nouns rules apply to.
///
/// `All` matches any subject during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Subject {
    All,
    User,
    Organization,
    Department,
    Role,
    Patient,
    MedicalRecord,
    Appointment,
    Timesheet,
    ShiftSchedule,
    Invoice,
    AuditLog,
    Report,
}

impl Subject {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "All" => Some(Subject::All),
            "User" => Some(Subject::User),
            "Organization" => Some(Subject::Organization),
            "Department" => Some(Subject::Department),
            "Role" => Some(Subject::Role),
            "Patient" => Some(Subject::Patient),
            "MedicalRecord" => Some(Subject::MedicalRecord),
            "Appointment" => Some(Subject::Appointment),
            "Timesheet" => Some(Subject::Timesheet),
            "ShiftSchedule" => Some(Subject::ShiftSchedule),
            "Invoice" => Some(Subject::Invoice),
            "AuditLog" => Some(Subject::AuditLog),
            "Report" => Some(Subject::Report),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::All => "All",
            Subject::User => "User",
            Subject::Organization => "Organization",
            Subject::Department => "Department",
            Subject::Role => "Role",
            Subject::Patient => "Patient",
            Subject::MedicalRecord => "MedicalRecord",
            Subject::Appointment => "Appointment",
            Subject::Timesheet => "Timesheet",
            Subject::ShiftSchedule => "ShiftSchedule",
            Subject::Invoice => "Invoice",
            Subject::AuditLog => "AuditLog",
            Subject::Report => "Report",
        }
    }

    pub const ALL_SUBJECTS: [Subject; 13] = [
        Subject::All,
        Subject::User,
        Subject::Organization,
        Subject::Department,
        Subject::Role,
        Subject::Patient,
        Subject::MedicalRecord,
        Subject::Appointment,
        Subject::Timesheet,
        Subject::ShiftSchedule,
        Subject::Invoice,
        Subject::AuditLog,
        Subject::Report,
    ];
}

/// Stable role kind, resolved once when a role is created.
///
/// Evaluation matches on the kind, never on the display name, so renaming
/// a role cannot silently change what it authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    SuperAdmin,
    OrganizationAdmin,
    Manager,
    Doctor,
    Nurse,
    SeniorCarer,
    Carer,
    Receptionist,
    LabTechnician,
    BillingStaff,
    Custom,
}

impl RoleKind {
    /// Resolve a kind from a submitted role name at creation time.
    /// Unknown names become `Custom` and contribute no rule pack.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "super admin" | "super_admin" => RoleKind::SuperAdmin,
            "organization admin" | "organization_admin" | "org admin" => RoleKind::OrganizationAdmin,
            "manager" => RoleKind::Manager,
            "doctor" => RoleKind::Doctor,
            "nurse" => RoleKind::Nurse,
            "senior carer" | "senior_carer" => RoleKind::SeniorCarer,
            "carer" => RoleKind::Carer,
            "receptionist" => RoleKind::Receptionist,
            "lab technician" | "lab_technician" => RoleKind::LabTechnician,
            "billing staff" | "billing_staff" => RoleKind::BillingStaff,
            _ => RoleKind::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::SuperAdmin => "super_admin",
            RoleKind::OrganizationAdmin => "organization_admin",
            RoleKind::Manager => "manager",
            RoleKind::Doctor => "doctor",
            RoleKind::Nurse => "nurse",
            RoleKind::SeniorCarer => "senior_carer",
            RoleKind::Carer => "carer",
            RoleKind::Receptionist => "receptionist",
            RoleKind::LabTechnician => "lab_technician",
            RoleKind::BillingStaff => "billing_staff",
            RoleKind::Custom => "custom",
        }
    }
}

/// Medical-record types withheld from non-clinical staff.
pub const CONFIDENTIAL_RECORD_TYPES: [&str; 4] =
    ["Diagnosis", "LabResult", "Prescription", "ClinicalNote"];
