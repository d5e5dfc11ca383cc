//! Role rule packs.
//!
//! The packs below are policy data, not algorithm: each role contributes a
//! fixed list of scoped can/cannot rules, appended in one fixed precedence
//! order. Because the last matching rule wins, append order is the only
//! conflict-resolution mechanism — a user holding several roles gets each
//! pack in the order listed here, followed by their dynamic grants and the
//! self-service fallback.

use serde_json::Value;
use uuid::Uuid;

use super::ability::{Ability, AbilityBuilder};
use super::conditions::ConditionSet;
use super::session::SessionUser;
use super::{Action, RoleKind, Subject, CONFIDENTIAL_RECORD_TYPES};

fn id_value(id: Uuid) -> Value {
    Value::String(id.to_string())
}

/// Build the compiled ability for one user snapshot.
///
/// Append order:
/// 1. system super-admin: manage all, nothing else considered
/// 2. organization admin pack
/// 3. clinical/operational packs, one per held role, in held order
/// 4. dynamic per-user grants, in stored order
/// 5. self-service fallback (read/update own user record)
///
/// `None` (unauthenticated) only reads public data. The builder never
/// fails; roles with no pack contribute nothing.
pub fn build_ability(user: Option<&SessionUser>) -> Ability {
    let mut builder = AbilityBuilder::new();

    let user = match user {
        None => {
            builder.can(Action::Read, Subject::All, ConditionSet::new().eq("is_public", true));
            return builder.build();
        }
        Some(user) => user,
    };

    if user
        .roles
        .iter()
        .any(|role| role.kind == RoleKind::SuperAdmin && role.is_system_role)
    {
        builder.can(Action::Manage, Subject::All, ConditionSet::new());
        return builder.build();
    }

    if user.roles.iter().any(|role| role.kind == RoleKind::OrganizationAdmin) {
        organization_admin_pack(&mut builder, user);
    }

    for role in &user.roles {
        match role.kind {
            RoleKind::Doctor => doctor_pack(&mut builder, user),
            RoleKind::Nurse => nurse_pack(&mut builder, user),
            RoleKind::Receptionist => receptionist_pack(&mut builder, user),
            RoleKind::LabTechnician => lab_technician_pack(&mut builder, user),
            RoleKind::BillingStaff => billing_staff_pack(&mut builder, user),
            // Admin kinds were handled above; carer-side and custom roles
            // rely on dynamic grants and the self-service fallback.
            _ => {}
        }
    }

    for grant in &user.grants {
        builder.can(grant.action, grant.subject, grant.conditions.clone());
    }

    // Appended last so no earlier cannot-rule can revoke editing one's own
    // profile, and nothing widens it past the user's own record.
    builder.can(Action::Read, Subject::User, ConditionSet::new().eq("id", id_value(user.id)));
    builder.can(Action::Update, Subject::User, ConditionSet::new().eq("id", id_value(user.id)));

    builder.build()
}

fn organization_admin_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);

    builder.can(Action::Manage, Subject::User, ConditionSet::new());
    builder.can(
        Action::Manage,
        Subject::All,
        ConditionSet::new().eq("organization_id", org.clone()),
    );
    builder.cannot(
        Action::Read,
        Subject::Organization,
        ConditionSet::new().ne("id", org.clone()),
    );
    builder.cannot(
        Action::Manage,
        Subject::User,
        ConditionSet::new().ne("organization_id", org.clone()),
    );
    builder.can(
        Action::Read,
        Subject::AuditLog,
        ConditionSet::new().eq("organization_id", org),
    );
    // The role catalogue is global; admins read it to staff their own
    // organization. Managing it stays with the platform operator.
    builder.can(Action::Read, Subject::Role, ConditionSet::new());
}

fn doctor_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);
    let me = id_value(user.id);
    let assigned: Vec<Value> = user.assigned_patient_ids.iter().copied().map(id_value).collect();

    builder.can(
        Action::Read,
        Subject::Patient,
        ConditionSet::new().eq("organization_id", org),
    );
    builder.can(
        Action::Update,
        Subject::Patient,
        ConditionSet::new().eq("assigned_doctor_id", me.clone()),
    );
    builder.can(
        Action::Manage,
        Subject::MedicalRecord,
        ConditionSet::new().within("patient_id", assigned),
    );
    if let Some(department_id) = user.department_id {
        builder.can(
            Action::Read,
            Subject::MedicalRecord,
            ConditionSet::new().eq("department_id", id_value(department_id)),
        );
    }
    builder.can(Action::Read, Subject::Appointment, ConditionSet::new().eq("doctor_id", me.clone()));
    builder.can(Action::Schedule, Subject::Appointment, ConditionSet::new().eq("doctor_id", me));
}

fn nurse_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);

    match user.department_id {
        Some(department_id) => {
            let dept = id_value(department_id);
            builder.can(Action::Read, Subject::Patient, ConditionSet::new().eq("department_id", dept.clone()));
            builder.can(
                Action::Read,
                Subject::MedicalRecord,
                ConditionSet::new()
                    .eq("department_id", dept.clone())
                    .within("type", ["VitalSigns", "Medication", "CarePlan"]),
            );
            builder.can(
                Action::Update,
                Subject::MedicalRecord,
                ConditionSet::new()
                    .eq("department_id", dept)
                    .within("type", ["VitalSigns", "CarePlan"]),
            );
        }
        None => {
            builder.can(Action::Read, Subject::Patient, ConditionSet::new().eq("organization_id", org.clone()));
        }
    }

    builder.can(Action::Read, Subject::ShiftSchedule, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Read, Subject::Timesheet, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Approve, Subject::Timesheet, ConditionSet::new().eq("organization_id", org));
}

fn receptionist_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);

    builder.can(Action::Read, Subject::Patient, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Manage, Subject::Appointment, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Read, Subject::ShiftSchedule, ConditionSet::new().eq("organization_id", org));
    // Data segregation: no affirmative MedicalRecord grant exists for
    // receptionists, and the confidential types are denied outright even if
    // an earlier pack granted a broad read.
    builder.cannot(
        Action::Read,
        Subject::MedicalRecord,
        ConditionSet::new().within("type", CONFIDENTIAL_RECORD_TYPES),
    );
}

fn lab_technician_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);

    builder.can(
        Action::Read,
        Subject::MedicalRecord,
        ConditionSet::new()
            .eq("organization_id", org.clone())
            .within("type", ["LabResult"]),
    );
    builder.can(
        Action::Create,
        Subject::MedicalRecord,
        ConditionSet::new().eq("organization_id", org.clone()).eq("type", "LabResult"),
    );
    builder.can(
        Action::Update,
        Subject::MedicalRecord,
        ConditionSet::new().eq("organization_id", org.clone()).eq("type", "LabResult"),
    );
    builder.can_fields(
        Action::Read,
        Subject::Patient,
        ConditionSet::new().eq("organization_id", org),
        ["id", "name", "date_of_birth"],
    );
}

fn billing_staff_pack(builder: &mut AbilityBuilder, user: &SessionUser) {
    let org = id_value(user.organization_id);

    builder.can(Action::Read, Subject::Timesheet, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Manage, Subject::Invoice, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can(Action::Export, Subject::Report, ConditionSet::new().eq("organization_id", org.clone()));
    builder.can_fields(
        Action::Read,
        Subject::Patient,
        ConditionSet::new().eq("organization_id", org),
        ["id", "name", "organization_id"],
    );
    builder.cannot(Action::Read, Subject::MedicalRecord, ConditionSet::new());
}
