//! Request and response bodies shared by the admin and portal APIs.

use saas_billing::plans::{Plan, PlanStats, PublicPlan};
use saas_billing::subscriptions::{PaymentEvent, Subscription};
use saas_core::types::{CustomerRole, TenantState};
use saas_jobs::queue::{JobRecord, QueueInfo};
use saas_ops::backup::BackupRecord;
use saas_platform::auth::TokenPair;
use saas_platform::customers::{Customer, CustomerStats};
use saas_platform::tenancy::{Tenant, TenantStats, UsagePercentages, UsageRecord};
use saas_billing::subscriptions::SubscriptionStats;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// ─── Auth ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub customer: Customer,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ─── Tenants ───────────────────────────────────────────────────────────────

/// Returned when work has been queued rather than done.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

impl JobAccepted {
    pub fn new(job: &JobRecord, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            status: "queued".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TenantCreated {
    pub tenant: Tenant,
    pub job_id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TenantDetail {
    #[serde(flatten)]
    pub tenant: Tenant,
    pub plan: Option<PublicPlan>,
    pub usage: Option<UsagePercentages>,
    pub recent_backups: Vec<BackupRecord>,
    /// Newest backup that can be restored from.
    pub latest_restore_point: Option<BackupRecord>,
    pub usage_history: Vec<UsageRecord>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PortalTenantUpdate {
    pub name: Option<String>,
    pub custom_domain: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RestoreRequest {
    pub backup_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ModuleRequest {
    pub module_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleList {
    pub installed: Vec<String>,
    pub available: Vec<String>,
}

// ─── Customers ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCustomerRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: Option<CustomerRole>,
    pub max_tenants: Option<u32>,
    pub max_quota_gb: Option<u32>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateCustomerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: Option<CustomerRole>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    pub max_tenants: Option<u32>,
    pub max_quota_gb: Option<u32>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaSummary {
    pub tenants_used: u32,
    pub max_tenants: u32,
    pub storage_used_bytes: u64,
    pub max_quota_gb: u32,
    pub storage_percent: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub customer: Customer,
    pub tenants: Vec<Tenant>,
    pub subscriptions: Vec<Subscription>,
    pub quota: QuotaSummary,
}

// ─── Plans & billing ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct PlanDetail {
    #[serde(flatten)]
    pub plan: Plan,
    pub stats: PlanStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionDetail {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan: Option<PublicPlan>,
    pub recent_payments: Vec<PaymentEvent>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TenantUsage {
    pub tenant_id: Uuid,
    pub name: String,
    pub slug: String,
    pub state: TenantState,
    pub db_size_bytes: u64,
    pub filestore_size_bytes: u64,
    pub current_users: u32,
    pub percentages: Option<UsagePercentages>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UsageOverview {
    pub tenants: Vec<TenantUsage>,
    pub quota: QuotaSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub event_id: String,
    pub event_type: String,
}

// ─── Dashboard ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardStats {
    pub tenants: TenantStats,
    pub customers: CustomerStats,
    pub subscriptions: SubscriptionStats,
    pub revenue_last_30_days: f64,
    pub plans: usize,
    pub logins_last_24h: u64,
    pub audit_entries: usize,
    pub queue: QueueInfo,
}
