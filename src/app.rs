use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, health, rbac, reports, shifts, timesheets, users};
use crate::timesheet::scan::ScanHub;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub events: EventBus,
    pub scans: Arc<ScanHub>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, events: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            events,
            scans: Arc::new(ScanHub::new()),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (events, events_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(events_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, events);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/health", get(health::health))
        .route("/unauthorized", get(unauthorized))
        .nest("/auth", auth::routes())
        .nest("/users", users::routes())
        .nest("/rbac", rbac::routes())
        .nest("/shifts", shifts::routes())
        .nest("/timesheets", timesheets::routes())
        .nest("/reports", reports::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

/// Landing target of the permission route guard.
async fn unauthorized() -> AppError {
    AppError::forbidden("you do not have access to this page")
}
