use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

/// Tenant boundary: every user, shift and timesheet belongs to exactly one
/// organization, and the ability rules scope almost everything by it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// "hospital" or "care_home"; drives which portal features apply.
    pub sector: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Organization {
    fn entity_type() -> &'static str { "organization" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

impl Organization {
    /// Check data for ability rules. The organization mirrors its own id
    /// into `organization_id` so org-scoped grants reach it.
    pub fn as_subject_data(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "organization_id": self.id.to_string(),
        })
    }
}
