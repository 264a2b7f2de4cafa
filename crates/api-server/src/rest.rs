//! Shared application state and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use saas_billing::plans::{PlanStats, PublicPlan};
use saas_billing::subscriptions::BillingInterval;
use saas_billing::{PlanCatalog, SubscriptionLedger, WebhookProcessor};
use saas_core::config::AppConfig;
use saas_core::types::AuditAction;
use saas_jobs::{
    JobExecutor, JobQueue, Maintenance, Notifier, TenantJobs, TenantLifecycle,
};
use saas_ops::provisioner::OdooProvisioner;
use saas_ops::BackupCatalog;
use saas_platform::audit::AuditRecord;
use saas_platform::auth::{AccessToken, Audience, TokenKind};
use saas_platform::customers::Customer;
use saas_platform::rate_limit::RatePolicy;
use saas_platform::tenancy::{TenancySettings, Tenant};
use saas_platform::{
    AuditLog, AuthManager, CustomerDirectory, RateLimiter, SupportDesk, TenantManager,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Session;
use crate::error::{ApiError, ApiResult};
use crate::models::{QuotaSummary, TenantDetail};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthManager>,
    pub customers: Arc<CustomerDirectory>,
    pub tenants: Arc<TenantManager>,
    pub plans: Arc<PlanCatalog>,
    pub subscriptions: Arc<SubscriptionLedger>,
    pub webhooks: Arc<WebhookProcessor>,
    pub audit: Arc<AuditLog>,
    pub backups: Arc<BackupCatalog>,
    pub support: Arc<SupportDesk>,
    pub rate_limiter: Arc<RateLimiter>,
    pub queue: Arc<JobQueue>,
    pub lifecycle: Arc<TenantLifecycle>,
    pub executor: Arc<JobExecutor>,
    pub maintenance: Arc<Maintenance>,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every store and service from configuration.
    pub fn new(
        config: AppConfig,
        provisioner: Arc<dyn OdooProvisioner>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let auth = Arc::new(AuthManager::new(&config.auth)?);
        let customers = Arc::new(CustomerDirectory::new());
        let tenants = Arc::new(TenantManager::new(TenancySettings {
            base_domain: config.odoo.base_domain.clone(),
            filestore_root: config.odoo.filestore_root.clone(),
            odoo_version: config.odoo.default_version.clone(),
        }));
        let plans = Arc::new(PlanCatalog::new());
        let subscriptions = Arc::new(SubscriptionLedger::new());
        let webhooks = Arc::new(WebhookProcessor::new(
            customers.clone(),
            plans.clone(),
            subscriptions.clone(),
            config.billing.clone(),
        ));
        let audit = Arc::new(AuditLog::new());
        let backups = Arc::new(BackupCatalog::new(config.backup.retention_days));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.enabled));
        let queue = Arc::new(JobQueue::new(config.jobs.lane_capacity));

        let lifecycle = Arc::new(TenantLifecycle::new(
            tenants.clone(),
            customers.clone(),
            plans.clone(),
            backups.clone(),
            audit.clone(),
            queue.clone(),
        ));
        let jobs = Arc::new(TenantJobs::new(
            tenants.clone(),
            audit.clone(),
            backups.clone(),
            provisioner.clone(),
            notifier,
        ));
        let executor = Arc::new(JobExecutor::new(
            queue.clone(),
            jobs,
            config.jobs.job_timeout_secs,
        ));
        let maintenance = Arc::new(Maintenance::new(
            tenants.clone(),
            plans.clone(),
            backups.clone(),
            provisioner,
            lifecycle.clone(),
            queue.clone(),
            auth.clone(),
            rate_limiter.clone(),
            webhooks.clone(),
            config.quota.clone(),
            config.jobs.result_ttl_secs,
        ));

        Ok(Self {
            node_id: config.node_id.clone(),
            config: Arc::new(config),
            auth,
            customers,
            tenants,
            plans,
            subscriptions,
            webhooks,
            audit,
            backups,
            support: Arc::new(SupportDesk::new()),
            rate_limiter,
            queue,
            lifecycle,
            executor,
            maintenance,
            start_time: Instant::now(),
        })
    }

    /// Count a request against `policy` for `caller`, failing with 429 once
    /// the window is used up.
    pub fn check_rate(&self, policy: &RatePolicy, caller: &str) -> ApiResult<()> {
        let result = self.rate_limiter.check(policy, caller);
        if result.allowed {
            Ok(())
        } else {
            Err(ApiError::rate_limited(policy, result))
        }
    }

    /// Hash a password on the blocking pool.
    pub async fn hash_password(&self, password: &str) -> ApiResult<String> {
        let auth = self.auth.clone();
        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || auth.hash_password(&password))
            .await
            .map_err(ApiError::internal)??;
        Ok(hash)
    }

    /// Check login credentials on the blocking pool.
    pub async fn authenticate(&self, email: &str, password: &str) -> ApiResult<Customer> {
        let auth = self.auth.clone();
        let customers = self.customers.clone();
        let (email, password) = (email.to_string(), password.to_string());
        let customer =
            tokio::task::spawn_blocking(move || auth.authenticate(&customers, &email, &password))
                .await
                .map_err(ApiError::internal)??;
        Ok(customer)
    }

    pub fn tenant_detail(&self, tenant: Tenant) -> TenantDetail {
        let plan = self.plans.get(tenant.plan_id);
        let mut recent_backups = self.backups.list_for_tenant(tenant.id);
        recent_backups.truncate(RECENT_BACKUPS);
        TenantDetail {
            usage: plan.as_ref().map(|p| tenant.usage_percentages(&p.quota())),
            plan: plan.as_ref().map(PublicPlan::from),
            recent_backups,
            latest_restore_point: self.backups.latest_completed(tenant.id),
            usage_history: self.tenants.usage_history(tenant.id),
            tenant,
        }
    }

    pub fn quota_summary(&self, customer: &Customer) -> QuotaSummary {
        let tenants = self.tenants.list_for_customer(customer.id);
        let storage_used_bytes: u64 = tenants
            .iter()
            .filter(|t| t.is_live())
            .map(Tenant::total_storage_bytes)
            .sum();
        let limit = customer.max_quota_gb as u64 * GB;
        let storage_percent = if limit == 0 {
            0.0
        } else {
            ((storage_used_bytes as f64 / limit as f64) * 10_000.0).round() / 100.0
        };
        QuotaSummary {
            tenants_used: tenants.iter().filter(|t| t.is_live()).count() as u32,
            max_tenants: customer.max_tenants,
            storage_used_bytes,
            max_quota_gb: customer.max_quota_gb,
            storage_percent,
        }
    }

    pub fn plan_stats(&self, plan_id: Uuid) -> PlanStats {
        let (tenant_count, active_tenant_count) = self.tenants.count_on_plan(plan_id);
        let mut stats = PlanStats {
            tenant_count,
            active_tenant_count,
            ..Default::default()
        };
        for sub in self.subscriptions.for_plan(plan_id) {
            if !sub.status.is_good_standing() {
                continue;
            }
            stats.active_subscriptions += 1;
            match sub.interval {
                BillingInterval::Month => stats.monthly_revenue += sub.amount,
                BillingInterval::Year => stats.yearly_revenue += sub.amount,
            }
        }
        stats
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh_access(&self, audience: Audience, refresh_token: &str) -> ApiResult<AccessToken> {
        let (_, access) = self.auth.refresh(&self.customers, refresh_token, audience)?;
        Ok(access)
    }

    /// Revoke the presented access token and, when given, its refresh token.
    pub fn logout(&self, session: &Session, audience: Audience, refresh_token: Option<&str>) {
        self.auth.revoke(&session.claims);
        if let Some(token) = refresh_token {
            if let Ok(claims) = self.auth.verify(token, audience, TokenKind::Refresh) {
                if claims.sub == session.customer.id {
                    self.auth.revoke(&claims);
                }
            }
        }
        self.audit.record(
            &session.actor(),
            AuditRecord::new(AuditAction::Logout, "customer", session.customer.id),
        );
        info!(customer_id = %session.customer.id, audience = audience.as_str(), "Logged out");
    }
}

const RECENT_BACKUPS: usize = 5;
const GB: u64 = 1024 * 1024 * 1024;

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queued_jobs: state.queue.info().total_queued,
    })
}

/// GET /ready: Readiness probe for Kubernetes.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to serve traffic"),
        (status = 503, description = "Not configured"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.config.auth.jwt_secret.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /live: Liveness probe for Kubernetes.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub queued_jobs: usize,
}
