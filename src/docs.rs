use axum::{routing::get, Json, Router};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz;
use crate::models;
use crate::reporting;
use crate::routes;
use crate::timesheet::scan;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::users::list_staff,
		routes::users::create_staff,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::delete_role,
		routes::rbac::get_user_roles,
		routes::rbac::assign_role_to_user,
		routes::rbac::revoke_role_from_user,
		routes::rbac::get_user_permissions,
		routes::rbac::grant_permission_to_user,
		routes::rbac::revoke_permission_from_user,
		routes::rbac::get_effective_permissions,
		routes::shifts::list_shifts,
		routes::shifts::create_shift,
		routes::shifts::get_shift,
		routes::shifts::update_shift_status,
		routes::timesheets::create_timesheet,
		routes::timesheets::list_timesheets,
		routes::timesheets::get_timesheet,
		routes::timesheets::delete_timesheet,
		routes::timesheets::approve_with_signature,
		routes::timesheets::scan_qr,
		routes::timesheets::scan_events,
		routes::timesheets::reject_timesheet,
		routes::timesheets::invalidate_timesheet,
		routes::timesheets::advance_invoice_status,
		routes::timesheets::review_timesheet,
		routes::reports::invoice_summary,
	),
	components(
		schemas(
			authz::RoleKind,
			routes::health::HealthResponse,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::StaffCreateRequest,
			models::organization::Organization,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::UserRole,
			models::rbac::AssignRoleRequest,
			models::rbac::UserPermission,
			models::rbac::GrantPermissionRequest,
			models::rbac::EffectivePermissions,
			models::rbac::EffectiveRule,
			models::shift::ShiftSchedule,
			models::shift::ShiftCreateRequest,
			models::shift::ShiftStatusRequest,
			models::shift::ShiftTiming,
			models::shift::RateRow,
			models::shift::ShiftStatus,
			models::timesheet::Timesheet,
			models::timesheet::TimesheetStatus,
			models::timesheet::InvoiceStatus,
			models::timesheet::Signature,
			models::timesheet::SignerRole,
			models::timesheet::TimesheetCreateRequest,
			models::timesheet::SignatureApprovalRequest,
			models::timesheet::ScanRequest,
			models::timesheet::InvoiceStatusRequest,
			models::timesheet::ReviewRequest,
			reporting::InvoiceSummary,
			reporting::EntityRollup,
			reporting::RollupExtreme,
			scan::ScanOutcome,
			scan::ScanStatus,
		)
	),
	tags(
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Users", description = "Staff management"),
		(name = "RBAC", description = "Roles and permission grants"),
		(name = "Shifts", description = "Shift schedules"),
		(name = "Timesheets", description = "Timesheet lifecycle and approvals"),
		(name = "Reports", description = "Invoice reporting"),
		(name = "Health", description = "Service health")
	)
)]
pub struct ApiDoc;

/// Build the OpenAPI document with the bearer scheme, a global security
/// requirement and a servers entry pointing at the running backend.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	if let Some(components) = doc.pointer_mut("/components").and_then(|c| c.as_object_mut()) {
		components.entry("securitySchemes").or_insert_with(|| {
			serde_json::json!({
				"bearerAuth": {
					"type": "http",
					"scheme": "bearer",
					"bearerFormat": "JWT"
				}
			})
		});
	}

	if doc.get("security").is_none() {
		doc["security"] = serde_json::json!([{ "bearerAuth": [] }]);
	}

	if doc.get("servers").is_none() {
		doc["servers"] = serde_json::json!([
			{ "url": format!("http://localhost:{}", port) }
		]);
	}

	Ok(serde_json::from_value(doc)?)
}

/// Serve the document at /api-docs/openapi.json and the Swagger UI at
/// /docs. The UI fetches the JSON at runtime, so clients always see the
/// normalized document.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_value = serde_json::to_value(&doc)?;
	let docs_route = Router::new().route(
		"/api-docs/openapi.json",
		get(move || {
			let value = doc_value.clone();
			async move { Json(value) }
		}),
	);

	Ok(docs_route.merge(SwaggerUi::new("/docs").config(swagger_config)))
}
