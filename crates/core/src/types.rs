use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of a tenant's Odoo instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TenantState {
    Creating,
    Active,
    Suspended,
    Deleting,
    Deleted,
    Error,
}

impl TenantState {
    pub const ALL: [TenantState; 6] = [
        TenantState::Creating,
        TenantState::Active,
        TenantState::Suspended,
        TenantState::Deleting,
        TenantState::Deleted,
        TenantState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantState::Creating => "creating",
            TenantState::Active => "active",
            TenantState::Suspended => "suspended",
            TenantState::Deleting => "deleting",
            TenantState::Deleted => "deleted",
            TenantState::Error => "error",
        }
    }
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown tenant state '{s}'"))
    }
}

/// Why a tenant was suspended. Billing and quota suspensions can be lifted
/// automatically; admin suspensions only by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionReason {
    Admin,
    Billing,
    Quota,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerRole {
    Owner,
    Admin,
    Viewer,
}

impl CustomerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerRole::Owner => "owner",
            CustomerRole::Admin => "admin",
            CustomerRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for CustomerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Suspend,
    Unsuspend,
    Backup,
    Restore,
    Login,
    Logout,
    ModuleInstall,
    ModuleUninstall,
    Impersonate,
}

impl AuditAction {
    pub const ALL: [AuditAction; 12] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Suspend,
        AuditAction::Unsuspend,
        AuditAction::Backup,
        AuditAction::Restore,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::ModuleInstall,
        AuditAction::ModuleUninstall,
        AuditAction::Impersonate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Suspend => "suspend",
            AuditAction::Unsuspend => "unsuspend",
            AuditAction::Backup => "backup",
            AuditAction::Restore => "restore",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::ModuleInstall => "module_install",
            AuditAction::ModuleUninstall => "module_uninstall",
            AuditAction::Impersonate => "impersonate",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingProvider {
    Stripe,
    Paddle,
}

impl BillingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingProvider::Stripe => "stripe",
            BillingProvider::Paddle => "paddle",
        }
    }
}

impl fmt::Display for BillingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    Paused,
}

impl SubscriptionStatus {
    /// Map a provider status string onto our status set.
    /// Stripe and Paddle spell cancellation differently.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "trialing" => Some(SubscriptionStatus::Trialing),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" | "cancelled" | "deleted" => Some(SubscriptionStatus::Canceled),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "incomplete" | "incomplete_expired" => Some(SubscriptionStatus::Incomplete),
            "paused" => Some(SubscriptionStatus::Paused),
            _ => None,
        }
    }

    /// Statuses that should cut off tenant access when enforcement is on.
    pub fn is_delinquent(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid)
    }

    pub fn is_good_standing(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// Storage and seat limits a plan grants to each tenant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlanQuota {
    pub max_db_size_gb: u32,
    pub max_filestore_gb: u32,
    pub max_users_per_tenant: u32,
}

/// The authenticated principal performing an action, plus request context
/// used for auditing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<Uuid>,
    pub email: Option<String>,
    pub role: Option<CustomerRole>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl Actor {
    /// Background work that runs without a user.
    pub fn system() -> Self {
        Self {
            email: Some("system".to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Page/per-page request, clamped before use.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    20
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Clamp to `page >= 1` and `1 <= per_page <= max_per_page`.
    pub fn clamped(self, max_per_page: u32) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, max_per_page.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
    pub per_page: u32,
    pub total: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Slice an already filtered and ordered list into one page.
pub fn paginate<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total = items.len() as u64;
    let per_page = request.per_page.max(1);
    let page = request.page.max(1);
    let pages = total.div_ceil(per_page as u64) as u32;
    let skip = (page as usize - 1).saturating_mul(per_page as usize);

    let items: Vec<T> = items.into_iter().skip(skip).take(per_page as usize).collect();

    Page {
        items,
        pagination: Pagination {
            page,
            pages,
            per_page,
            total,
            has_next: page < pages,
            has_prev: page > 1,
        },
    }
}
