pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;
use crate::middleware::{
    admission_middleware, optional_auth, require_auth, require_owner_or_admin, require_roles,
    rate_limit::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER},
    RequiredRoles, TierGate,
};
use crate::models::Role;
use crate::services::{AdmissionControl, Authenticator, Tier};

const MANAGER_ROLES: &[Role] = &[Role::Manager, Role::Admin];
const ADMIN_ROLES: &[Role] = &[Role::Admin];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub authenticator: Authenticator,
    pub admission: Arc<dyn AdmissionControl>,
    /// Present when a Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        authenticator: Authenticator,
        admission: Arc<dyn AdmissionControl>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            authenticator,
            admission,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn tier(&self, tier: Tier) -> TierGate {
        TierGate::new(self.admission.clone(), tier)
    }
}

/// Assemble the service. Within each route group the authentication layer is
/// outermost, then admission, then any role check, then the handler.
pub fn build_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/api/auth/session", get(handlers::session::session))
        .layer(from_fn_with_state(
            state.tier(Tier::Authentication),
            admission_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), optional_auth));

    let dashboard_routes = Router::new()
        .route("/api/dashboard", get(handlers::dashboard::dashboard))
        .layer(from_fn_with_state(state.tier(Tier::General), admission_middleware))
        .layer(from_fn_with_state(state.clone(), optional_auth));

    let user_routes = Router::new()
        .route("/api/users/me", get(handlers::users::get_me))
        .merge(
            Router::new()
                .route("/api/users/:user_id", get(handlers::users::get_user))
                .route_layer(from_fn(require_owner_or_admin)),
        )
        .layer(from_fn_with_state(state.tier(Tier::General), admission_middleware))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let ticket_routes = Router::new()
        .route("/api/tickets", post(handlers::tickets::create_ticket))
        .layer(from_fn_with_state(
            state.tier(Tier::TicketCreation),
            admission_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let manager_routes = Router::new()
        .route("/api/manager/queue", get(handlers::tickets::manager_queue))
        .route_layer(from_fn_with_state(RequiredRoles(MANAGER_ROLES), require_roles))
        .layer(from_fn_with_state(state.tier(Tier::General), admission_middleware))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/api/admin/rate-limits/:tier/:key",
            delete(handlers::admin::reset_rate_limit),
        )
        .route_layer(from_fn_with_state(RequiredRoles(ADMIN_ROLES), require_roles))
        .layer(from_fn_with_state(state.tier(Tier::General), admission_middleware))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(session_routes)
        .merge(dashboard_routes)
        .merge(user_routes)
        .merge(ticket_routes)
        .merge(manager_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Ignoring invalid CORS origin '{}': {}", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
            HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
            HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

/// Periodically drop idle rate-limit buckets so memory tracks active callers.
pub fn spawn_bucket_sweeper(admission: Arc<dyn AdmissionControl>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = admission.sweep_idle();
            if removed > 0 {
                tracing::debug!(removed, "Swept idle rate limit buckets");
            }
        }
    })
}
