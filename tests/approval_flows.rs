//! The QR scan protocol over the API: token binding, single use, replay
//! refusal and the terminal push event.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

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

/// Tenant with an admin, a carer, a nurse and one pending timesheet.
/// Returns (admin, carer, nurse tokens, carer id, timesheet id, scan token).
async fn scan_fixture(app: &Router, tag: &str) -> Result<(String, String, String, String, String, String)> {
    let (status, registered) = request(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "name": "Ada",
            "email": format!("ada@{tag}.test"),
            "password": "password123",
            "organization_name": format!("{tag} Home"),
            "sector": "care_home"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{registered}");
    let admin_token = registered["token"].as_str().context("token")?.to_string();

    let mut staff_ids = Vec::new();
    for (name, email, role) in [
        ("Cara", format!("cara@{tag}.test"), "Carer"),
        ("Nina", format!("nina@{tag}.test"), "Nurse"),
    ] {
        let (status, created) = request(
            app,
            "POST",
            "/users",
            Some(&admin_token),
            Some(json!({"name": name, "email": email, "password": "password123", "roles": [role]})),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        staff_ids.push(created["id"].as_str().context("id")?.to_string());
    }
    let carer_id = staff_ids[0].clone();

    let mut tokens = Vec::new();
    for email in [format!("cara@{tag}.test"), format!("nina@{tag}.test")] {
        let (status, logged_in) = request(
            app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": email, "password": "password123"})),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        tokens.push(logged_in["token"].as_str().context("token")?.to_string());
    }
    let (carer_token, nurse_token) = (tokens[0].clone(), tokens[1].clone());

    let (status, shift) = request(
        app,
        "POST",
        "/shifts",
        Some(&admin_token),
        Some(json!({
            "staffProfileId": carer_id,
            "role": "Carer",
            "shiftDate": "2024-03-04",
            "timing": {"startTime": "09:00", "endTime": "17:00"},
            "rates": []
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{shift}");

    let (status, timesheet) = request(
        app,
        "POST",
        "/timesheets",
        Some(&carer_token),
        Some(json!({"shiftScheduleId": shift["id"]})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{timesheet}");
    let timesheet_id = timesheet["id"].as_str().context("id")?.to_string();
    let scan_token = timesheet["tokenForQrCode"].as_str().context("token")?.to_string();

    Ok((admin_token, carer_token, nurse_token, carer_id, timesheet_id, scan_token))
}

#[tokio::test]
async fn scan_approves_once_and_refuses_replay() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (_admin, _carer_token, nurse_token, carer_id, timesheet_id, scan_token) =
        scan_fixture(&app, "scanonce").await?;

    // A token bound to a different carer is a retryable mismatch...
    let (status, body) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": scan_token, "carerId": Uuid::new_v4().to_string()})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "token_mismatch");

    // ...that does not consume the token.
    let (status, timesheet) = request(
        &app,
        "GET",
        &format!("/timesheets/{timesheet_id}"),
        Some(&nurse_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(timesheet["status"], "pending");
    assert_eq!(timesheet["tokenForQrCode"], scan_token.as_str());

    // The matching scan applies the approve transition.
    let (status, approved) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": scan_token, "carerId": carer_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["status"], "approved");

    // Replaying the identical payload is refused, not re-applied.
    let (status, body) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": scan_token, "carerId": carer_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "code_already_used");

    Ok(())
}

#[tokio::test]
async fn carer_cannot_scan_their_own_code() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (_admin, carer_token, _nurse_token, carer_id, timesheet_id, scan_token) =
        scan_fixture(&app, "selfscan").await?;

    let (status, body) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&carer_token),
        Some(json!({"token": scan_token, "carerId": carer_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "own_timesheet");

    // Nothing moved.
    let (status, timesheet) = request(
        &app,
        "GET",
        &format!("/timesheets/{timesheet_id}"),
        Some(&carer_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(timesheet["status"], "pending");

    Ok(())
}

#[tokio::test]
async fn unknown_tokens_are_distinct_from_used_ones() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (_admin, _carer, nurse_token, _carer_id, _timesheet_id, _scan_token) =
        scan_fixture(&app, "unknowntok").await?;

    let (status, body) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": "does-not-exist", "carerId": Uuid::new_v4().to_string()})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    Ok(())
}

#[tokio::test]
async fn scan_subscription_delivers_the_terminal_outcome() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (_admin, _carer, nurse_token, carer_id, timesheet_id, scan_token) =
        scan_fixture(&app, "scansse").await?;

    let (status, approved) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": scan_token, "carerId": carer_id})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{approved}");

    // Subscribing after the terminal transition answers immediately with
    // the stored outcome and closes the stream.
    let req = Request::builder()
        .method("GET")
        .uri(format!("/timesheets/scan/{scan_token}/events"))
        .header("authorization", format!("Bearer {nurse_token}"))
        .body(Body::empty())?;
    let response = app.clone().oneshot(req).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"), "{content_type}");

    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT).await?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("event: scan"), "{text}");
    assert!(text.contains("\"status\":\"success\""), "{text}");
    assert!(text.contains(&timesheet_id), "{text}");

    // A rejected timesheet reports failure the same way.
    Ok(())
}

#[tokio::test]
async fn rejection_ends_the_scan_session_with_failure() -> Result<()> {
    let (app, _dir) = setup().await?;
    let (_admin, _carer, nurse_token, _carer_id, timesheet_id, scan_token) =
        scan_fixture(&app, "scanreject").await?;

    let (status, rejected) = request(
        &app,
        "POST",
        &format!("/timesheets/{timesheet_id}/reject"),
        Some(&nurse_token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{rejected}");
    assert_eq!(rejected["status"], "rejected");

    let req = Request::builder()
        .method("GET")
        .uri(format!("/timesheets/scan/{scan_token}/events"))
        .header("authorization", format!("Bearer {nurse_token}"))
        .body(Body::empty())?;
    let response = app.clone().oneshot(req).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), BODY_LIMIT).await?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("\"status\":\"failure\""), "{text}");

    // The rejected timesheet cannot be approved by a late scan either.
    let (status, body) = request(
        &app,
        "POST",
        "/timesheets/scan",
        Some(&nurse_token),
        Some(json!({"token": scan_token, "carerId": Uuid::new_v4().to_string()})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "code_already_used");

    Ok(())
}
