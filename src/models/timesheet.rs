use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

use super::user::parse_id;

/// Primary approval lifecycle. `deleted` is removal, not a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimesheetStatus {
    Pending,
    Approved,
    Rejected,
    Invalidated,
}

impl TimesheetStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TimesheetStatus::Pending),
            "approved" => Some(TimesheetStatus::Approved),
            "rejected" => Some(TimesheetStatus::Rejected),
            "invalidated" => Some(TimesheetStatus::Invalidated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimesheetStatus::Pending => "pending",
            TimesheetStatus::Approved => "approved",
            TimesheetStatus::Rejected => "rejected",
            TimesheetStatus::Invalidated => "invalidated",
        }
    }
}

/// Secondary billing lifecycle, advanced only by invoicing and independent
/// of the approval status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    PendingInvoice,
    Invoiced,
    Paid,
    Approved,
}

impl InvoiceStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(InvoiceStatus::Draft),
            "pending_invoice" => Some(InvoiceStatus::PendingInvoice),
            "invoiced" => Some(InvoiceStatus::Invoiced),
            "paid" => Some(InvoiceStatus::Paid),
            "approved" => Some(InvoiceStatus::Approved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::PendingInvoice => "pending_invoice",
            InvoiceStatus::Invoiced => "invoiced",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Approved => "approved",
        }
    }

    /// Position in the advance-only ordering.
    pub fn rank(&self) -> u8 {
        match self {
            InvoiceStatus::Draft => 0,
            InvoiceStatus::PendingInvoice => 1,
            InvoiceStatus::Invoiced => 2,
            InvoiceStatus::Paid => 3,
            InvoiceStatus::Approved => 4,
        }
    }
}

/// Who may sign a timesheet on the approving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SignerRole {
    Admin,
    Manager,
    Nurse,
    SeniorCarer,
}

impl SignerRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(SignerRole::Admin),
            "manager" => Some(SignerRole::Manager),
            "nurse" => Some(SignerRole::Nurse),
            "senior-carer" => Some(SignerRole::SeniorCarer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Admin => "admin",
            SignerRole::Manager => "manager",
            SignerRole::Nurse => "nurse",
            SignerRole::SeniorCarer => "senior-carer",
        }
    }
}

/// Captured-signature approval evidence as stored and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Base64 image payload as captured by the canvas.
    pub image_data: String,
    pub signer_name: String,
    pub signer_role: SignerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// Wire shape of a timesheet. Field names (`invoiceStatus`,
/// `tokenForQrCode`, `signature.downloadUrl`) are part of the portal
/// contract and must not drift.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Timesheet {
    pub id: Uuid,
    pub shift_schedule_id: Uuid,
    pub carer_id: Uuid,
    pub organization_id: Uuid,
    pub status: TimesheetStatus,
    pub invoice_status: InvoiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_in_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_out_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Present only while pending; consumed by a successful scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_for_qr_code: Option<String>,
    pub is_holiday: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Timesheet {
    fn entity_type() -> &'static str { "timesheet" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

impl Timesheet {
    pub fn as_subject_data(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "organization_id": self.organization_id.to_string(),
            "carer_id": self.carer_id.to_string(),
            "status": self.status.as_str(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTimesheet {
    pub id: String,
    pub shift_schedule_id: String,
    pub carer_id: String,
    pub organization_id: String,
    pub status: String,
    pub invoice_status: String,
    pub sign_in_time: Option<DateTime<Utc>>,
    pub sign_out_time: Option<DateTime<Utc>>,
    pub signature_image: Option<String>,
    pub signer_name: Option<String>,
    pub signer_role: Option<String>,
    pub signature_url: Option<String>,
    pub qr_token: Option<String>,
    pub is_holiday: bool,
    pub rating: Option<i64>,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTimesheet> for Timesheet {
    type Error = AppError;

    fn try_from(value: DbTimesheet) -> Result<Self, Self::Error> {
        let status = TimesheetStatus::parse(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown timesheet status `{}`", value.status)))?;
        let invoice_status = InvoiceStatus::parse(&value.invoice_status)
            .ok_or_else(|| AppError::internal(format!("unknown invoice status `{}`", value.invoice_status)))?;

        let signature = match (value.signature_image, value.signer_name, value.signer_role) {
            (Some(image_data), Some(signer_name), Some(role_raw)) => {
                let signer_role = SignerRole::parse(&role_raw)
                    .ok_or_else(|| AppError::internal(format!("unknown signer role `{role_raw}`")))?;
                Some(Signature {
                    image_data,
                    signer_name,
                    signer_role,
                    download_url: value.signature_url,
                })
            }
            _ => None,
        };

        // The token is only surfaced while the timesheet can still be
        // approved by a scan.
        let token_for_qr_code = if status == TimesheetStatus::Pending {
            value.qr_token
        } else {
            None
        };

        Ok(Timesheet {
            id: parse_id(&value.id)?,
            shift_schedule_id: parse_id(&value.shift_schedule_id)?,
            carer_id: parse_id(&value.carer_id)?,
            organization_id: parse_id(&value.organization_id)?,
            status,
            invoice_status,
            sign_in_time: value.sign_in_time,
            sign_out_time: value.sign_out_time,
            signature,
            token_for_qr_code,
            is_holiday: value.is_holiday,
            rating: value.rating,
            review: value.review,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimesheetCreateRequest {
    pub shift_schedule_id: Uuid,
    #[serde(default)]
    pub is_holiday: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_in_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_out_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureApprovalRequest {
    #[schema(example = "Grace Hopper")]
    pub signer_name: String,
    pub signer_role: SignerRole,
    /// Base64 canvas capture; empty means no strokes were drawn.
    pub image_data: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Token decoded from the rendered QR code.
    pub token: String,
    /// Carer the scanning device believes the code belongs to.
    pub carer_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatusRequest {
    pub invoice_status: InvoiceStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[schema(minimum = 1, maximum = 5, example = 5)]
    pub rating: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
}
