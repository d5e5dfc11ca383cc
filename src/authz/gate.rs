use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::Value;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;

use super::ability::{check_ability, Ability};
use super::session::{fetch_session_user, AbilitySession, SessionUser};
use super::{Action, Subject};

/// Conditional-render primitive: pick `allowed` when the check passes,
/// otherwise the fallback. No logic beyond delegating to the ability.
pub fn render<T>(
    ability: &Ability,
    action: Action,
    subject: Subject,
    data: Option<&Value>,
    allowed: T,
    fallback: T,
) -> T {
    if check_ability(ability, action, subject, data) {
        allowed
    } else {
        fallback
    }
}

/// Per-request permission gate.
///
/// Extraction authenticates the caller, loads their session snapshot and
/// compiles the ability once; every check in the handler reuses that single
/// compilation, so a guarded route decides exactly once per request.
pub struct Gate {
    pub user: SessionUser,
    session: AbilitySession,
}

impl Gate {
    pub fn for_user(user: SessionUser) -> Self {
        let session = AbilitySession::for_user(&user);
        Self { user, session }
    }

    pub fn ability(&self) -> &Ability {
        self.session.ability()
    }

    pub fn can(&self, action: Action, subject: Subject, data: Option<&Value>) -> bool {
        check_ability(self.session.ability(), action, subject, data)
    }

    /// API-facing guard: deny with 403 and a stable code.
    pub fn require(&self, action: Action, subject: Subject, data: Option<&Value>) -> AppResult<()> {
        if self.can(action, subject, data) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %self.user.id,
                action = action.as_str(),
                subject = subject.as_str(),
                "permission denied"
            );
            Err(AppError::forbidden(format!(
                "not allowed to {} {}",
                action.as_str(),
                subject.as_str()
            )))
        }
    }

    /// Route guard: redirect instead of rendering the guarded subtree.
    /// `target` defaults to `/unauthorized`.
    pub fn require_or_redirect(
        &self,
        action: Action,
        subject: Subject,
        data: Option<&Value>,
        target: Option<&str>,
    ) -> Result<(), Response> {
        if self.can(action, subject, data) {
            Ok(())
        } else {
            Err(Redirect::to(target.unwrap_or("/unauthorized")).into_response())
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Gate {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        let user = fetch_session_user(&state.pool, auth.user_id).await?;
        Ok(Gate::for_user(user))
    }
}
