//! API server: builds the router and runs the HTTP and metrics listeners.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{admin_rest as admin, billing_rest as billing, portal_rest as portal, support_rest as support};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;

fn admin_routes() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/auth/login", post(admin::login))
        .route("/auth/refresh", post(admin::refresh))
        .route("/auth/logout", post(admin::logout))
        .route("/auth/me", get(admin::me))
        // Tenants
        .route("/tenants", get(admin::list_tenants).post(admin::create_tenant))
        .route(
            "/tenants/:id",
            get(admin::get_tenant)
                .put(admin::update_tenant)
                .delete(admin::delete_tenant),
        )
        .route("/tenants/:id/suspend", post(admin::suspend_tenant))
        .route("/tenants/:id/unsuspend", post(admin::unsuspend_tenant))
        .route("/tenants/:id/backup", post(admin::backup_tenant))
        .route("/tenants/:id/backups", get(admin::list_backups))
        .route("/tenants/:id/restore", post(admin::restore_tenant))
        .route("/tenants/:id/retry", post(admin::retry_tenant))
        // Customers
        .route("/customers", get(admin::list_customers).post(admin::create_customer))
        .route("/customers/:id", get(admin::get_customer).put(admin::update_customer))
        // Plans
        .route("/plans", get(admin::list_plans).post(admin::create_plan))
        .route(
            "/plans/:id",
            get(admin::get_plan)
                .put(admin::update_plan)
                .delete(admin::delete_plan),
        )
        // Subscriptions & audit
        .route("/subscriptions", get(admin::list_subscriptions))
        .route("/audit", get(admin::list_audit))
        .route("/audit/actions", get(admin::audit_actions))
        .route("/audit/resource-types", get(admin::audit_resource_types))
        .route("/audit/verify", get(admin::audit_verify))
        // Support
        .route("/support/:id/resolve", post(admin::resolve_ticket))
        // Dashboard & jobs
        .route("/dashboard/stats", get(admin::dashboard_stats))
        .route("/jobs", get(admin::queue_info))
        .route("/jobs/:id", get(admin::job_status))
}

fn portal_routes() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/auth/register", post(portal::register))
        .route("/auth/login", post(portal::login))
        .route("/auth/refresh", post(portal::refresh))
        .route("/auth/logout", post(portal::logout))
        .route("/auth/profile", get(portal::get_profile).put(portal::update_profile))
        // Tenants
        .route("/tenants", get(portal::list_tenants).post(portal::create_tenant))
        .route(
            "/tenants/:id",
            get(portal::get_tenant)
                .put(portal::update_tenant)
                .delete(portal::delete_tenant),
        )
        .route("/tenants/:id/backup", post(portal::backup_tenant))
        .route("/tenants/:id/backups", get(portal::list_backups))
        .route(
            "/tenants/:id/modules",
            get(portal::list_modules).post(portal::install_module),
        )
        .route(
            "/tenants/:id/modules/:module",
            axum::routing::delete(portal::uninstall_module),
        )
        // Billing
        .route("/billing/plans", get(billing::list_plans))
        .route("/billing/subscriptions", get(billing::list_subscriptions))
        .route("/billing/subscriptions/:id", get(billing::get_subscription))
        .route("/billing/cancel-subscription", post(billing::cancel_subscription))
        .route("/billing/usage", get(billing::usage))
        // Support
        .route("/support", get(support::list_tickets).post(support::create_ticket))
        .route("/support/:id", get(support::get_ticket).put(support::reply_ticket))
        .route("/support/:id/close", post(support::close_ticket))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assemble every route with its middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.api.cors_origins);

    Router::new()
        .nest("/api/admin", admin_routes())
        .nest("/api/portal", portal_routes())
        // Billing provider callbacks
        .route("/webhooks/stripe", post(billing::stripe_webhook))
        .route("/webhooks/paddle", post(billing::paddle_webhook))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .route("/api-docs/openapi.json", get(openapi_json))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the REST API and the Prometheus exporter.
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the HTTP REST server and serve until `shutdown` resolves.
    pub async fn start_http(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let config = &self.state.config;
        let app = build_router(self.state.clone());

        let addr = SocketAddr::new(config.api.host.parse()?, config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port. Must be called from
    /// within the tokio runtime, which drives the exporter's listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        let config = &self.state.config;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                config.api.host.parse()?,
                config.metrics.port,
            ))
            .install()?;

        info!(port = config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
