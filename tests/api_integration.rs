//! End-to-end flow over the router: tenant registration, staffing, shift
//! and timesheet lifecycle, the permission-gated route, invoicing and the
//! report fold.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use care_roster::create_app;

const BODY_LIMIT: usize = 10_485_760;

async fn setup() -> Result<(Router, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool).await?;
    Ok((app, dir))
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, value))
}

async fn register_org(app: &Router, name: &str, email: &str, org: &str) -> Result<(String, String)> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "name": name,
            "email": email,
            "password": "password123",
            "organization_name": org,
            "sector": "care_home"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = body["user"]["id"].as_str().context("missing user id")?.to_string();
    Ok((token, user_id))
}

async fn create_staff(
    app: &Router,
    admin_token: &str,
    name: &str,
    email: &str,
    roles: &[&str],
) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/users",
        Some(admin_token),
        Some(json!({
            "name": name,
            "email": email,
            "password": "password123",
            "roles": roles
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "staff create failed: {body}");
    Ok(body["id"].as_str().context("missing staff id")?.to_string())
}

async fn login(app: &Router, email: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": email, "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    Ok(body["token"].as_str().context("missing token")?.to_string())
}

async fn create_shift(app: &Router, admin_token: &str, carer_id: &str, date: &str) -> Result<String> {
    let (status, body) = request(
        app,
        "POST",
        "/shifts",
        Some(admin_token),
        Some(json!({
            "staffProfileId": carer_id,
            "role": "Carer",
            "shiftDate": date,
            "timing": {"startTime": "09:00", "endTime": "17:00", "breakHours": 0.5},
            "rates": [{
                "role": "Carer",
                "weekdayRate": 18.0,
                "weekendRate": 22.0,
                "emergencyWeekdayRate": 27.0,
                "emergencyWeekendRate": 33.0
            }]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "shift create failed: {body}");
    Ok(body["id"].as_str().context("missing shift id")?.to_string())
}

async fn create_timesheet(app: &Router, carer_token: &str, shift_id: &str) -> Result<Value> {
    let (status, body) = request(
        app,
        "POST",
        "/timesheets",
        Some(carer_token),
        Some(json!({"shiftScheduleId": shift_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "timesheet create failed: {body}");
    Ok(body)
}

#[tokio::test]
async fn full_portal_flow() -> Result<()> {
    let (app, _dir) = setup().await?;

    // Tenant + staff
    let (admin_token, _admin_id) = register_org(&app, "Ada Lovelace", "ada@rosehill.test", "Rosehill Care Home").await?;
    let carer_id = create_staff(&app, &admin_token, "Cara Carer", "cara@rosehill.test", &["Carer"]).await?;
    create_staff(&app, &admin_token, "Nina Nurse", "nina@rosehill.test", &["Nurse"]).await?;
    let carer_token = login(&app, "cara@rosehill.test").await?;
    let nurse_token = login(&app, "nina@rosehill.test").await?;

    // Profile and staff listing
    let (status, me) = request(&app, "GET", "/auth/me", Some(&carer_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "cara@rosehill.test");

    let (status, staff) = request(&app, "GET", "/users", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(staff.as_array().map(|a| a.len()), Some(3));

    // A carer cannot list the organization's staff
    let (status, _) = request(&app, "GET", "/users", Some(&carer_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Shift -> timesheet
    let shift_id = create_shift(&app, &admin_token, &carer_id, "2024-03-04").await?;
    let timesheet = create_timesheet(&app, &carer_token, &shift_id).await?;
    let timesheet_id = timesheet["id"].as_str().context("missing id")?.to_string();
    assert_eq!(timesheet["status"], "pending");
    assert_eq!(timesheet["invoiceStatus"], "draft");
    assert!(timesheet["tokenForQrCode"].is_string());

    // One timesheet per shift
    let (status, body) = request(
        &app,
        "POST",
        "/timesheets",
        Some(&carer_token),
        Some(json!({"shiftScheduleId": shift_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    // Carers cannot approve their own work
    let approve_body = json!({
        "signerName": "Nina Nurse",
        "signerRole": "nurse",
        "imageData": "iVBORw0KGgoAAAANSUhEUg=="
    });
    let (status, body) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/approve"),
        Some(&carer_token),
        Some(approve_body.clone()),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "own_timesheet");

    // Signature payload is validated as a whole
    let (status, body) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/approve"),
        Some(&nurse_token),
        Some(json!({"signerName": "   ", "signerRole": "nurse", "imageData": "iVBOR"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "signer_name_required");

    // Nurse approves with the captured signature
    let (status, approved) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/approve"),
        Some(&nurse_token),
        Some(approve_body.clone()),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["signature"]["signerName"], "Nina Nurse");
    assert!(approved["signature"]["downloadUrl"].is_string());
    // The consumed token is no longer surfaced.
    assert!(approved["tokenForQrCode"].is_null());

    // Approval happens at most once
    let (status, body) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/approve"),
        Some(&nurse_token),
        Some(approve_body),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_approved");

    // Approved rows cannot be deleted until invalidated
    let (status, body) = request(
        &app,
        "DELETE",
        &format!("/timesheets/{timesheet_id}"),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_invalidated");

    let (status, invalidated) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/invalidate"),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(invalidated["status"], "invalidated");

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/timesheets/{timesheet_id}"),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn permission_gated_route_redirects() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (admin_token, _) = register_org(&app, "Ada", "ada@gate.test", "Gate Home").await?;
    create_staff(&app, &admin_token, "Cara", "cara@gate.test", &["Carer"]).await?;
    let carer_token = login(&app, "cara@gate.test").await?;

    // Admin reads the catalogue.
    let (status, roles) = request(&app, "GET", "/rbac/roles", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(roles.as_array().map(|a| a.len() >= 10).unwrap_or(false));

    // A carer is redirected, not rendered.
    let req = Request::builder()
        .method("GET")
        .uri("/rbac/roles")
        .header("authorization", format!("Bearer {carer_token}"))
        .body(Body::empty())?;
    let response = app.clone().oneshot(req).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/unauthorized")
    );

    // Managing the global catalogue is reserved for the platform operator.
    let (status, _) = request(
        &app,
        "POST",
        "/rbac/roles",
        Some(&admin_token),
        Some(json!({"name": "Night Shift Lead"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn dynamic_grants_change_effective_permissions() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (admin_token, _) = register_org(&app, "Ada", "ada@grants.test", "Grants Home").await?;
    let carer_id = create_staff(&app, &admin_token, "Cara", "cara@grants.test", &["Carer"]).await?;
    let carer_token = login(&app, "cara@grants.test").await?;

    // Without a grant the carer cannot see the organization timesheet list
    // beyond their own rows; exporting reports is denied outright.
    let (status, _) = request(&app, "GET", "/reports/invoice-summary?from=2024-01-01&to=2024-12-31", Some(&carer_token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin grants report export scoped to the organization.
    let (status, grant) = request(
        &app,
        "POST",
        &format!("/rbac/users/{carer_id}/permissions"),
        Some(&admin_token),
        Some(json!({"action": "export", "subject": "Report"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{grant}");

    let (status, summary) = request(&app, "GET", "/reports/invoice-summary?from=2024-01-01&to=2024-12-31", Some(&carer_token), None).await?;
    assert_eq!(status, StatusCode::OK, "{summary}");
    assert_eq!(summary["shiftCount"], 0);

    // The compiled rule list reflects the grant, in evaluation order.
    let (status, effective) = request(
        &app,
        "GET",
        &format!("/rbac/users/{carer_id}/effective-permissions"),
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let rules = effective["rules"].as_array().context("rules missing")?;
    assert!(rules.iter().any(|rule| rule["action"] == "export" && rule["subject"] == "Report"));
    // The self-service fallback stays last.
    let last = rules.last().context("no rules")?;
    assert_eq!(last["action"], "update");
    assert_eq!(last["subject"], "User");

    // Unknown operators in grant conditions are rejected up front.
    let (status, _) = request(
        &app,
        "POST",
        &format!("/rbac/users/{carer_id}/permissions"),
        Some(&admin_token),
        Some(json!({"action": "read", "subject": "Timesheet", "conditions": {"hours": {"$gt": 3}}})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn invoicing_and_reporting_over_approved_timesheets() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (admin_token, _) = register_org(&app, "Ada", "ada@invoice.test", "Invoice Home").await?;
    let carer_id = create_staff(&app, &admin_token, "Cara", "cara@invoice.test", &["Carer"]).await?;
    create_staff(&app, &admin_token, "Nina", "nina@invoice.test", &["Nurse"]).await?;
    let carer_token = login(&app, "cara@invoice.test").await?;
    let nurse_token = login(&app, "nina@invoice.test").await?;

    // A weekday and a Saturday shift, both approved.
    let mut timesheet_ids = Vec::new();
    for date in ["2024-03-04", "2024-03-09"] {
        let shift_id = create_shift(&app, &admin_token, &carer_id, date).await?;
        let timesheet = create_timesheet(&app, &carer_token, &shift_id).await?;
        let id = timesheet["id"].as_str().context("missing id")?.to_string();
        let (status, _) = request(
            &app,
            "POST",
            &format!("/timesheets/{id}/approve"),
            Some(&nurse_token),
            Some(json!({"signerName": "Nina", "signerRole": "nurse", "imageData": "iVBOR"})),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        timesheet_ids.push(id);
    }

    // Invoice lifecycle advances and never regresses.
    let first = &timesheet_ids[0];
    let (status, advanced) = request(
        &app,
        "POST",
        &format!("/timesheets/{first}/invoice-status"),
        Some(&admin_token),
        Some(json!({"invoiceStatus": "invoiced"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{advanced}");
    assert_eq!(advanced["invoiceStatus"], "invoiced");

    let (status, body) = request(
        &app,
        "POST",
        &format!("/timesheets/{first}/invoice-status"),
        Some(&admin_token),
        Some(json!({"invoiceStatus": "draft"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invoice_regression");

    // Aggregation: 7.5 billable hours each; weekday at 18, Saturday at 22.
    let (status, summary) = request(
        &app,
        "GET",
        "/reports/invoice-summary?from=2024-03-01&to=2024-03-31",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{summary}");
    assert_eq!(summary["shiftCount"], 2);
    assert!((summary["totalBillableHours"].as_f64().unwrap() - 15.0).abs() < 1e-6);
    assert!((summary["weekendHours"].as_f64().unwrap() - 7.5).abs() < 1e-6);
    assert!((summary["regularHours"].as_f64().unwrap() - 7.5).abs() < 1e-6);
    let expected_pay = 7.5 * 18.0 + 7.5 * 22.0;
    assert!((summary["totalPay"].as_f64().unwrap() - expected_pay).abs() < 1e-6);
    assert_eq!(summary["staff"].as_array().map(|a| a.len()), Some(1));

    // A window before the shifts is a zero summary, not an error.
    let (status, empty) = request(
        &app,
        "GET",
        "/reports/invoice-summary?from=2023-01-01&to=2023-12-31",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["shiftCount"], 0);
    assert!(empty["topOrganization"].is_null());

    Ok(())
}
