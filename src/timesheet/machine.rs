//! Guarded status transitions.
//!
//! The functions here are the single arbiter of the lifecycle invariants:
//! approval happens at most once, `invalidated` is reachable only from
//! `approved`/`rejected`, and an approved or rejected timesheet cannot be
//! deleted until it has been invalidated. Each refusal carries a stable
//! reason code so callers can tell a guard violation from a transport
//! failure.

use uuid::Uuid;

use crate::authz::{RoleKind, SessionUser};
use crate::models::timesheet::{InvoiceStatus, SignatureApprovalRequest, TimesheetStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("timesheet is already approved")]
    AlreadyApproved,
    #[error("timesheet is not pending")]
    NotPending,
    #[error("only approved or rejected timesheets can be invalidated")]
    NotInvalidatable,
    #[error("approved or rejected timesheets must be invalidated before deletion")]
    NotInvalidated,
    #[error("actor is not allowed to perform this transition")]
    ForbiddenActor,
    #[error("carers cannot approve their own timesheet")]
    OwnTimesheet,
    #[error("actor belongs to a different organization")]
    WrongOrganization,
    #[error("signer name is required")]
    SignerNameRequired,
    #[error("signature capture is empty")]
    SignatureEmpty,
    #[error("QR code does not match this carer")]
    TokenMismatch,
    #[error("QR code already used")]
    TokenAlreadyUsed,
    #[error("invoice status can only move forward")]
    InvoiceRegression,
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::AlreadyApproved => "already_approved",
            TransitionError::NotPending => "not_pending",
            TransitionError::NotInvalidatable => "not_invalidatable",
            TransitionError::NotInvalidated => "not_invalidated",
            TransitionError::ForbiddenActor => "forbidden_actor",
            TransitionError::OwnTimesheet => "own_timesheet",
            TransitionError::WrongOrganization => "wrong_organization",
            TransitionError::SignerNameRequired => "signer_name_required",
            TransitionError::SignatureEmpty => "signature_empty",
            TransitionError::TokenMismatch => "token_mismatch",
            TransitionError::TokenAlreadyUsed => "code_already_used",
            TransitionError::InvoiceRegression => "invoice_regression",
        }
    }
}

/// The transition-relevant slice of a timesheet row.
#[derive(Debug, Clone, Copy)]
pub struct TimesheetView {
    pub status: TimesheetStatus,
    pub carer_id: Uuid,
    /// Receiving organization (the home/ward the shift was worked at).
    pub organization_id: Uuid,
    /// Organization employing the carer; differs for agency staff.
    pub carer_organization_id: Uuid,
}

/// The transition-relevant slice of the acting user.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub is_admin: bool,
    /// Admins, managers and nurses may approve or reject.
    pub is_approver: bool,
}

impl Actor {
    pub fn from_session(user: &SessionUser) -> Self {
        let is_admin = user.roles.iter().any(|role| {
            matches!(role.kind, RoleKind::OrganizationAdmin)
                || (role.kind == RoleKind::SuperAdmin && role.is_system_role)
        });
        let is_approver = is_admin
            || user
                .roles
                .iter()
                .any(|role| matches!(role.kind, RoleKind::Manager | RoleKind::Nurse));
        Self {
            user_id: user.id,
            organization_id: user.organization_id,
            is_admin,
            is_approver,
        }
    }
}

/// Evidence accompanying an approve transition. Exactly one form exists per
/// call; the stored row keeps whichever form approved it.
#[derive(Debug)]
pub enum Evidence<'a> {
    Signature(&'a SignatureApprovalRequest),
    QrToken(&'a str),
}

fn ensure_pending(view: &TimesheetView) -> Result<(), TransitionError> {
    match view.status {
        TimesheetStatus::Pending => Ok(()),
        TimesheetStatus::Approved => Err(TransitionError::AlreadyApproved),
        _ => Err(TransitionError::NotPending),
    }
}

fn ensure_review_actor(view: &TimesheetView, actor: &Actor) -> Result<(), TransitionError> {
    // Self-approval is refused before role checks so a carer holding an
    // approver role still cannot sign off their own work.
    if actor.user_id == view.carer_id {
        return Err(TransitionError::OwnTimesheet);
    }
    if !actor.is_approver {
        return Err(TransitionError::ForbiddenActor);
    }
    if actor.organization_id != view.organization_id {
        return Err(TransitionError::WrongOrganization);
    }
    Ok(())
}

/// pending -> approved, with one valid evidence payload.
pub fn approve(
    view: &TimesheetView,
    actor: &Actor,
    evidence: &Evidence<'_>,
) -> Result<TimesheetStatus, TransitionError> {
    ensure_pending(view)?;
    ensure_review_actor(view, actor)?;
    if let Evidence::Signature(request) = evidence {
        super::approval::validate_signature(request)?;
    }
    Ok(TimesheetStatus::Approved)
}

/// pending -> rejected, same actor guard as approve.
pub fn reject(view: &TimesheetView, actor: &Actor) -> Result<TimesheetStatus, TransitionError> {
    ensure_pending(view)?;
    ensure_review_actor(view, actor)?;
    Ok(TimesheetStatus::Rejected)
}

/// approved | rejected -> invalidated, by an admin of either linked
/// organization.
pub fn invalidate(view: &TimesheetView, actor: &Actor) -> Result<TimesheetStatus, TransitionError> {
    match view.status {
        TimesheetStatus::Approved | TimesheetStatus::Rejected => {}
        _ => return Err(TransitionError::NotInvalidatable),
    }
    if !actor.is_admin {
        return Err(TransitionError::ForbiddenActor);
    }
    if actor.organization_id != view.organization_id
        && actor.organization_id != view.carer_organization_id
    {
        return Err(TransitionError::WrongOrganization);
    }
    Ok(TimesheetStatus::Invalidated)
}

/// Deletion is admin-only and permitted from pending or invalidated;
/// approved/rejected rows must be invalidated first.
pub fn ensure_deletable(view: &TimesheetView, actor: &Actor) -> Result<(), TransitionError> {
    if !actor.is_admin {
        return Err(TransitionError::ForbiddenActor);
    }
    match view.status {
        TimesheetStatus::Pending | TimesheetStatus::Invalidated => Ok(()),
        TimesheetStatus::Approved | TimesheetStatus::Rejected => Err(TransitionError::NotInvalidated),
    }
}

/// Invoice status only moves forward along its rank order.
pub fn advance_invoice(
    current: InvoiceStatus,
    requested: InvoiceStatus,
) -> Result<InvoiceStatus, TransitionError> {
    if requested.rank() > current.rank() {
        Ok(requested)
    } else {
        Err(TransitionError::InvoiceRegression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: TimesheetStatus) -> TimesheetView {
        TimesheetView {
            status,
            carer_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            carer_organization_id: Uuid::new_v4(),
        }
    }

    fn approver_for(view: &TimesheetView) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            organization_id: view.organization_id,
            is_admin: false,
            is_approver: true,
        }
    }

    fn admin_for(view: &TimesheetView) -> Actor {
        Actor {
            is_admin: true,
            ..approver_for(view)
        }
    }

    #[test]
    fn approve_happy_path_then_refuses_reapproval() {
        let mut v = view(TimesheetStatus::Pending);
        let actor = approver_for(&v);
        let evidence = Evidence::QrToken("tok");

        assert_eq!(approve(&v, &actor, &evidence), Ok(TimesheetStatus::Approved));

        v.status = TimesheetStatus::Approved;
        assert_eq!(approve(&v, &actor, &evidence), Err(TransitionError::AlreadyApproved));
    }

    #[test]
    fn carer_cannot_approve_own_timesheet() {
        let v = view(TimesheetStatus::Pending);
        let actor = Actor {
            user_id: v.carer_id,
            organization_id: v.organization_id,
            is_admin: false,
            is_approver: true,
        };
        assert_eq!(
            approve(&v, &actor, &Evidence::QrToken("tok")),
            Err(TransitionError::OwnTimesheet)
        );
    }

    #[test]
    fn approver_must_belong_to_receiving_organization() {
        let v = view(TimesheetStatus::Pending);
        let actor = Actor {
            organization_id: Uuid::new_v4(),
            ..approver_for(&v)
        };
        assert_eq!(reject(&v, &actor), Err(TransitionError::WrongOrganization));
    }

    #[test]
    fn invalidate_only_from_terminal_review_states() {
        let pending = view(TimesheetStatus::Pending);
        let admin = admin_for(&pending);
        assert_eq!(invalidate(&pending, &admin), Err(TransitionError::NotInvalidatable));

        let approved = view(TimesheetStatus::Approved);
        let admin = admin_for(&approved);
        assert_eq!(invalidate(&approved, &admin), Ok(TimesheetStatus::Invalidated));

        // Admin of the carer's own organization may invalidate too.
        let rejected = view(TimesheetStatus::Rejected);
        let agency_admin = Actor {
            user_id: Uuid::new_v4(),
            organization_id: rejected.carer_organization_id,
            is_admin: true,
            is_approver: true,
        };
        assert_eq!(invalidate(&rejected, &agency_admin), Ok(TimesheetStatus::Invalidated));
    }

    #[test]
    fn delete_requires_invalidation_of_reviewed_rows() {
        let approved = view(TimesheetStatus::Approved);
        let admin = admin_for(&approved);
        assert_eq!(ensure_deletable(&approved, &admin), Err(TransitionError::NotInvalidated));

        let invalidated = view(TimesheetStatus::Invalidated);
        let admin = admin_for(&invalidated);
        assert_eq!(ensure_deletable(&invalidated, &admin), Ok(()));

        let pending = view(TimesheetStatus::Pending);
        let admin = admin_for(&pending);
        assert_eq!(ensure_deletable(&pending, &admin), Ok(()));

        let non_admin = approver_for(&pending);
        assert_eq!(ensure_deletable(&pending, &non_admin), Err(TransitionError::ForbiddenActor));
    }

    #[test]
    fn invoice_status_never_regresses() {
        assert_eq!(
            advance_invoice(InvoiceStatus::Draft, InvoiceStatus::Invoiced),
            Ok(InvoiceStatus::Invoiced)
        );
        assert_eq!(
            advance_invoice(InvoiceStatus::Paid, InvoiceStatus::Draft),
            Err(TransitionError::InvoiceRegression)
        );
        assert_eq!(
            advance_invoice(InvoiceStatus::Paid, InvoiceStatus::Paid),
            Err(TransitionError::InvoiceRegression)
        );
    }
}
