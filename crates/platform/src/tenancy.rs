//! Multi-tenancy: tenant records, the lifecycle state machine, quotas, and
//! usage tracking.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use saas_core::types::{
    paginate, Page, PageRequest, PlanQuota, SortDirection, SuspensionReason, TenantState,
};
use saas_core::validation::{validate_domain, validate_length, validate_slug};
use saas_core::SaasError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const GB: u64 = 1024 * 1024 * 1024;

/// Usage history entries kept per tenant.
const USAGE_HISTORY_LIMIT: usize = 96;

#[derive(Error, Debug)]
pub enum TenantError {
    #[error("Tenant not found")]
    NotFound,

    #[error("Tenant slug '{0}' already exists")]
    SlugTaken(String),

    #[error("Maximum number of tenants ({max}) reached")]
    LimitReached { max: u32 },

    #[error("Cannot {action} tenant in state '{from}'")]
    InvalidTransition {
        from: TenantState,
        action: &'static str,
    },

    #[error(transparent)]
    Validation(#[from] SaasError),
}

/// A single customer tenant: one Odoo database plus its filestore.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub name: String,
    pub slug: String,
    pub db_name: String,
    pub filestore_path: String,
    pub state: TenantState,
    pub state_message: Option<String>,
    pub suspension_reason: Option<SuspensionReason>,
    pub custom_domain: Option<String>,
    pub full_domain: String,
    pub odoo_version: String,
    pub installed_modules: Vec<String>,
    pub db_size_bytes: u64,
    pub filestore_size_bytes: u64,
    pub current_users: u32,
    pub suspended_at: Option<DateTime<Utc>>,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// State to fall back to if a pending delete fails.
    #[serde(skip)]
    pub(crate) state_before_delete: Option<TenantState>,
}

impl Tenant {
    pub fn total_storage_bytes(&self) -> u64 {
        self.db_size_bytes + self.filestore_size_bytes
    }

    pub fn is_live(&self) -> bool {
        self.state != TenantState::Deleted
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.installed_modules.iter().any(|m| m == module)
    }

    /// Usage as a percentage of the plan's limits.
    pub fn usage_percentages(&self, quota: &PlanQuota) -> UsagePercentages {
        UsagePercentages {
            db_size: percent(self.db_size_bytes, quota.max_db_size_gb as u64 * GB),
            filestore_size: percent(self.filestore_size_bytes, quota.max_filestore_gb as u64 * GB),
            users: percent(self.current_users as u64, quota.max_users_per_tenant as u64),
        }
    }

    /// Whether storage usage exceeds the plan's limits.
    pub fn exceeds_quota(&self, quota: &PlanQuota) -> bool {
        self.db_size_bytes > quota.max_db_size_gb as u64 * GB
            || self.filestore_size_bytes > quota.max_filestore_gb as u64 * GB
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    ((used as f64 / limit as f64) * 10_000.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct UsagePercentages {
    pub db_size: f64,
    pub filestore_size: f64,
    pub users: f64,
}

/// Point-in-time usage reading reported by the Odoo service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub db_size_bytes: u64,
    pub filestore_size_bytes: u64,
    pub users_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub db_size_bytes: u64,
    pub filestore_size_bytes: u64,
    pub users_count: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub name: String,
    pub slug: String,
    pub custom_domain: Option<String>,
}

/// Partial update. An empty `custom_domain` clears it.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub custom_domain: Option<String>,
    pub plan_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantOrder {
    #[default]
    CreatedAt,
    UpdatedAt,
    Name,
    Slug,
    State,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantFilter {
    pub state: Option<TenantState>,
    pub customer_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub search: Option<String>,
    #[serde(default)]
    pub order_by: TenantOrder,
    #[serde(default)]
    pub order_dir: SortDirection,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantStats {
    pub total: u64,
    pub by_state: HashMap<String, u64>,
    pub total_storage_bytes: u64,
    pub total_db_bytes: u64,
    pub total_filestore_bytes: u64,
}

/// Naming and placement rules applied to new tenants.
#[derive(Debug, Clone)]
pub struct TenancySettings {
    pub base_domain: String,
    pub filestore_root: String,
    pub odoo_version: String,
}

impl Default for TenancySettings {
    fn default() -> Self {
        Self {
            base_domain: "odoo-saas.local".to_string(),
            filestore_root: "/var/lib/odoo/filestore".to_string(),
            odoo_version: "16.0".to_string(),
        }
    }
}

/// Tenant store and lifecycle state machine backed by DashMap.
/// Swap to PostgreSQL for production.
pub struct TenantManager {
    tenants: DashMap<Uuid, Tenant>,
    slugs: DashMap<String, Uuid>,
    usage_history: DashMap<Uuid, Vec<UsageRecord>>,
    create_lock: parking_lot::Mutex<()>,
    settings: TenancySettings,
}

impl Default for TenantManager {
    fn default() -> Self {
        Self::new(TenancySettings::default())
    }
}

impl TenantManager {
    pub fn new(settings: TenancySettings) -> Self {
        Self {
            tenants: DashMap::new(),
            slugs: DashMap::new(),
            usage_history: DashMap::new(),
            create_lock: parking_lot::Mutex::new(()),
            settings,
        }
    }

    pub fn db_name_for(slug: &str) -> String {
        format!("tenant_{}", slug.replace('-', "_"))
    }

    fn full_domain(&self, slug: &str, custom_domain: Option<&str>) -> String {
        match custom_domain {
            Some(domain) => domain.to_string(),
            None => format!("{}.{}", slug, self.settings.base_domain),
        }
    }

    /// Register a new tenant in `creating`. The slug uniqueness and the
    /// per-customer limit are checked under one lock with the insert.
    pub fn create(&self, new: NewTenant, max_tenants: u32) -> Result<Tenant, TenantError> {
        let name = new.name.trim().to_string();
        validate_length("Tenant name", &name, 2, 200)?;
        let slug = new.slug.trim().to_lowercase();
        validate_slug(&slug)?;
        let custom_domain = normalize_custom_domain(new.custom_domain)?;

        let _guard = self.create_lock.lock();

        if self.slugs.contains_key(&slug) {
            return Err(TenantError::SlugTaken(slug));
        }

        let live = self.count_live_for_customer(new.customer_id);
        if live >= max_tenants as usize {
            return Err(TenantError::LimitReached { max: max_tenants });
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            customer_id: new.customer_id,
            plan_id: new.plan_id,
            name,
            db_name: Self::db_name_for(&slug),
            filestore_path: format!("{}/{}", self.settings.filestore_root, slug),
            full_domain: self.full_domain(&slug, custom_domain.as_deref()),
            slug: slug.clone(),
            state: TenantState::Creating,
            state_message: None,
            suspension_reason: None,
            custom_domain,
            odoo_version: self.settings.odoo_version.clone(),
            installed_modules: Vec::new(),
            db_size_bytes: 0,
            filestore_size_bytes: 0,
            current_users: 0,
            suspended_at: None,
            last_backup_at: None,
            created_at: now,
            updated_at: now,
            state_before_delete: None,
        };

        self.slugs.insert(slug, tenant.id);
        self.tenants.insert(tenant.id, tenant.clone());
        info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            customer_id = %tenant.customer_id,
            "Tenant registered"
        );
        Ok(tenant)
    }

    pub fn get(&self, id: Uuid) -> Option<Tenant> {
        self.tenants.get(&id).map(|e| e.value().clone())
    }

    /// Look up a tenant only if it belongs to `customer_id`.
    pub fn get_for_customer(&self, id: Uuid, customer_id: Uuid) -> Option<Tenant> {
        self.get(id).filter(|t| t.customer_id == customer_id)
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Tenant> {
        let id = *self.slugs.get(slug)?;
        self.get(id)
    }

    pub fn list_for_customer(&self, customer_id: Uuid) -> Vec<Tenant> {
        let mut tenants: Vec<Tenant> = self
            .tenants
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .map(|e| e.value().clone())
            .collect();
        tenants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tenants
    }

    pub fn list_in_state(&self, state: TenantState) -> Vec<Tenant> {
        self.tenants
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count_live_for_customer(&self, customer_id: Uuid) -> usize {
        self.tenants
            .iter()
            .filter(|e| e.customer_id == customer_id && e.is_live())
            .count()
    }

    pub fn count_on_plan(&self, plan_id: Uuid) -> (u64, u64) {
        let mut total = 0;
        let mut active = 0;
        for entry in self.tenants.iter() {
            if entry.plan_id == plan_id && entry.is_live() {
                total += 1;
                if entry.state == TenantState::Active {
                    active += 1;
                }
            }
        }
        (total, active)
    }

    pub fn list(&self, filter: &TenantFilter, page: PageRequest) -> Page<Tenant> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut tenants: Vec<Tenant> = self
            .tenants
            .iter()
            .filter(|e| {
                let t = e.value();
                if filter.state.is_some_and(|s| t.state != s) {
                    return false;
                }
                if filter.customer_id.is_some_and(|c| t.customer_id != c) {
                    return false;
                }
                if filter.plan_id.is_some_and(|p| t.plan_id != p) {
                    return false;
                }
                if let Some(ref needle) = search {
                    let domain_hit = t
                        .custom_domain
                        .as_deref()
                        .is_some_and(|d| d.contains(needle.as_str()));
                    if !t.name.to_lowercase().contains(needle.as_str())
                        && !t.slug.contains(needle.as_str())
                        && !domain_hit
                    {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.value().clone())
            .collect();

        tenants.sort_by(|a, b| {
            let ord = match filter.order_by {
                TenantOrder::CreatedAt => a.created_at.cmp(&b.created_at),
                TenantOrder::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                TenantOrder::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                TenantOrder::Slug => a.slug.cmp(&b.slug),
                TenantOrder::State => a.state.as_str().cmp(b.state.as_str()),
            };
            match filter.order_dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        paginate(tenants, page.clamped(100))
    }

    /// Apply a guarded mutation. The closure sees the current record and
    /// rejects illegal transitions before anything is written.
    fn transition<F>(&self, id: Uuid, f: F) -> Result<Tenant, TenantError>
    where
        F: FnOnce(&mut Tenant) -> Result<(), TenantError>,
    {
        let mut entry = self.tenants.get_mut(&id).ok_or(TenantError::NotFound)?;
        let mut draft = entry.value().clone();
        f(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft.clone();
        Ok(draft)
    }

    /// Fail unless the tenant is in one of `allowed`.
    pub fn ensure_state(
        &self,
        id: Uuid,
        allowed: &[TenantState],
        action: &'static str,
    ) -> Result<Tenant, TenantError> {
        let tenant = self.get(id).ok_or(TenantError::NotFound)?;
        if allowed.contains(&tenant.state) {
            Ok(tenant)
        } else {
            Err(TenantError::InvalidTransition {
                from: tenant.state,
                action,
            })
        }
    }

    /// `creating -> active`
    pub fn complete_provisioning(&self, id: Uuid) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Creating], "activate")?;
            t.state = TenantState::Active;
            t.state_message = None;
            Ok(())
        })?;
        info!(tenant_id = %id, "Tenant provisioned");
        Ok(tenant)
    }

    /// `creating -> error`
    pub fn fail_provisioning(&self, id: Uuid, message: &str) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Creating], "fail provisioning of")?;
            t.state = TenantState::Error;
            t.state_message = Some(message.to_string());
            Ok(())
        })?;
        warn!(tenant_id = %id, error = message, "Tenant provisioning failed");
        Ok(tenant)
    }

    /// `error -> creating`
    pub fn retry_provisioning(&self, id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(id, |t| {
            require(t, &[TenantState::Error], "retry provisioning of")?;
            t.state = TenantState::Creating;
            t.state_message = None;
            Ok(())
        })
    }

    /// `active -> suspended`
    pub fn suspend(&self, id: Uuid, reason: SuspensionReason) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Active], "suspend")?;
            t.state = TenantState::Suspended;
            t.suspension_reason = Some(reason);
            t.suspended_at = Some(Utc::now());
            Ok(())
        })?;
        info!(tenant_id = %id, reason = ?reason, "Tenant suspended");
        Ok(tenant)
    }

    /// `suspended -> active`
    pub fn unsuspend(&self, id: Uuid) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Suspended], "unsuspend")?;
            t.state = TenantState::Active;
            t.suspension_reason = None;
            t.suspended_at = None;
            Ok(())
        })?;
        info!(tenant_id = %id, "Tenant unsuspended");
        Ok(tenant)
    }

    /// Start a delete from any non-terminal state, remembering where to
    /// return if the delete fails.
    pub fn begin_delete(&self, id: Uuid) -> Result<Tenant, TenantError> {
        self.transition(id, |t| {
            if matches!(t.state, TenantState::Deleting | TenantState::Deleted) {
                return Err(TenantError::InvalidTransition {
                    from: t.state,
                    action: "delete",
                });
            }
            t.state_before_delete = Some(t.state);
            t.state = TenantState::Deleting;
            t.state_message = None;
            Ok(())
        })
    }

    /// `deleting -> deleted`
    pub fn complete_delete(&self, id: Uuid) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Deleting], "finish deleting")?;
            t.state = TenantState::Deleted;
            t.state_before_delete = None;
            Ok(())
        })?;
        info!(tenant_id = %id, "Tenant deleted");
        Ok(tenant)
    }

    /// `deleting -> <previous state>`
    pub fn fail_delete(&self, id: Uuid, message: &str) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            require(t, &[TenantState::Deleting], "roll back deletion of")?;
            t.state = t.state_before_delete.take().unwrap_or(TenantState::Active);
            t.state_message = Some(message.to_string());
            Ok(())
        })?;
        warn!(tenant_id = %id, restored = %tenant.state, error = message, "Tenant deletion failed");
        Ok(tenant)
    }

    /// Apply name/domain/plan changes. Returns `(before, after)`.
    pub fn update(&self, id: Uuid, update: TenantUpdate) -> Result<(Tenant, Tenant), TenantError> {
        if let Some(ref name) = update.name {
            validate_length("Tenant name", name, 2, 200)?;
        }
        let custom_domain = match update.custom_domain {
            Some(domain) => Some(normalize_custom_domain(Some(domain))?),
            None => None,
        };

        let before = self.get(id).ok_or(TenantError::NotFound)?;
        let after = self.transition(id, |t| {
            if matches!(t.state, TenantState::Deleting | TenantState::Deleted) {
                return Err(TenantError::InvalidTransition {
                    from: t.state,
                    action: "update",
                });
            }
            if let Some(name) = update.name {
                t.name = name.trim().to_string();
            }
            if let Some(domain) = custom_domain {
                t.full_domain = match domain.as_deref() {
                    Some(d) => d.to_string(),
                    None => format!("{}.{}", t.slug, self.settings.base_domain),
                };
                t.custom_domain = domain;
            }
            if let Some(plan_id) = update.plan_id {
                t.plan_id = plan_id;
            }
            Ok(())
        })?;
        Ok((before, after))
    }

    pub fn mark_module_installed(&self, id: Uuid, module: &str) -> Result<Tenant, TenantError> {
        self.transition(id, |t| {
            if !t.has_module(module) {
                t.installed_modules.push(module.to_string());
                t.installed_modules.sort();
            }
            Ok(())
        })
    }

    pub fn mark_module_uninstalled(&self, id: Uuid, module: &str) -> Result<Tenant, TenantError> {
        self.transition(id, |t| {
            t.installed_modules.retain(|m| m != module);
            Ok(())
        })
    }

    pub fn record_backup(&self, id: Uuid, at: DateTime<Utc>) -> Result<Tenant, TenantError> {
        self.transition(id, |t| {
            t.last_backup_at = Some(at);
            Ok(())
        })
    }

    /// Store a usage reading on the tenant and append it to the history.
    pub fn record_usage(&self, id: Uuid, snapshot: UsageSnapshot) -> Result<Tenant, TenantError> {
        let tenant = self.transition(id, |t| {
            t.db_size_bytes = snapshot.db_size_bytes;
            t.filestore_size_bytes = snapshot.filestore_size_bytes;
            t.current_users = snapshot.users_count;
            Ok(())
        })?;

        let now = Utc::now();
        let mut history = self.usage_history.entry(id).or_default();
        let period_start = history.last().map(|r| r.period_end).unwrap_or(tenant.created_at);
        history.push(UsageRecord {
            id: Uuid::new_v4(),
            tenant_id: id,
            db_size_bytes: snapshot.db_size_bytes,
            filestore_size_bytes: snapshot.filestore_size_bytes,
            users_count: snapshot.users_count,
            period_start,
            period_end: now,
            recorded_at: now,
        });
        if history.len() > USAGE_HISTORY_LIMIT {
            let excess = history.len() - USAGE_HISTORY_LIMIT;
            history.drain(..excess);
        }
        Ok(tenant)
    }

    pub fn usage_history(&self, id: Uuid) -> Vec<UsageRecord> {
        self.usage_history
            .get(&id)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> TenantStats {
        let mut by_state: HashMap<String, u64> = TenantState::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut total = 0;
        let mut total_db_bytes = 0;
        let mut total_filestore_bytes = 0;

        for entry in self.tenants.iter() {
            total += 1;
            *by_state.entry(entry.state.as_str().to_string()).or_default() += 1;
            if entry.is_live() {
                total_db_bytes += entry.db_size_bytes;
                total_filestore_bytes += entry.filestore_size_bytes;
            }
        }

        TenantStats {
            total,
            by_state,
            total_storage_bytes: total_db_bytes + total_filestore_bytes,
            total_db_bytes,
            total_filestore_bytes,
        }
    }
}

fn require(
    tenant: &Tenant,
    allowed: &[TenantState],
    action: &'static str,
) -> Result<(), TenantError> {
    if allowed.contains(&tenant.state) {
        Ok(())
    } else {
        Err(TenantError::InvalidTransition {
            from: tenant.state,
            action,
        })
    }
}

/// Trim, lowercase and validate. `Some("")` means "clear".
fn normalize_custom_domain(domain: Option<String>) -> Result<Option<String>, SaasError> {
    match domain.map(|d| d.trim().to_lowercase()) {
        Some(d) if d.is_empty() => Ok(None),
        Some(d) => {
            validate_domain(&d)?;
            Ok(Some(d))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_tenant(customer_id: Uuid, slug: &str) -> NewTenant {
        NewTenant {
            customer_id,
            plan_id: Uuid::new_v4(),
            name: format!("Tenant {slug}"),
            slug: slug.to_string(),
            custom_domain: None,
        }
    }

    fn active_tenant(mgr: &TenantManager, slug: &str) -> Tenant {
        let t = mgr.create(new_tenant(Uuid::new_v4(), slug), 5).unwrap();
        mgr.complete_provisioning(t.id).unwrap()
    }

    #[test]
    fn test_create_tenant_derives_names() {
        let mgr = TenantManager::default();
        let tenant = mgr.create(new_tenant(Uuid::new_v4(), "acme-corp"), 5).unwrap();

        assert_eq!(tenant.state, TenantState::Creating);
        assert_eq!(tenant.db_name, "tenant_acme_corp");
        assert_eq!(tenant.filestore_path, "/var/lib/odoo/filestore/acme-corp");
        assert_eq!(tenant.full_domain, "acme-corp.odoo-saas.local");
        assert_eq!(tenant.odoo_version, "16.0");
        assert_eq!(mgr.get_by_slug("acme-corp").unwrap().id, tenant.id);
    }

    #[test]
    fn test_duplicate_slug_rejected_even_after_delete() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "acme");
        mgr.begin_delete(t.id).unwrap();
        mgr.complete_delete(t.id).unwrap();

        let err = mgr.create(new_tenant(Uuid::new_v4(), "acme"), 5).unwrap_err();
        assert!(matches!(err, TenantError::SlugTaken(_)));
    }

    #[test]
    fn test_tenant_limit_counts_live_tenants_only() {
        let mgr = TenantManager::default();
        let customer = Uuid::new_v4();
        let first = mgr.create(new_tenant(customer, "one"), 1).unwrap();

        let err = mgr.create(new_tenant(customer, "two"), 1).unwrap_err();
        assert!(matches!(err, TenantError::LimitReached { max: 1 }));

        mgr.begin_delete(first.id).unwrap();
        mgr.complete_delete(first.id).unwrap();
        assert!(mgr.create(new_tenant(customer, "two"), 1).is_ok());
    }

    #[test]
    fn test_invalid_slug_and_domain() {
        let mgr = TenantManager::default();
        let mut bad = new_tenant(Uuid::new_v4(), "Bad Slug");
        assert!(matches!(mgr.create(bad.clone(), 5), Err(TenantError::Validation(_))));

        bad.slug = "good-slug".into();
        bad.custom_domain = Some("not a domain".into());
        assert!(matches!(mgr.create(bad, 5), Err(TenantError::Validation(_))));
    }

    #[test]
    fn test_concurrent_creates_with_same_slug_yield_one_tenant() {
        let mgr = Arc::new(TenantManager::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                std::thread::spawn(move || mgr.create(new_tenant(Uuid::new_v4(), "race"), 5).is_ok())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn test_suspend_unsuspend_cycle() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "cycle");

        let suspended = mgr.suspend(t.id, SuspensionReason::Admin).unwrap();
        assert_eq!(suspended.state, TenantState::Suspended);
        assert!(suspended.suspended_at.is_some());
        assert_eq!(suspended.suspension_reason, Some(SuspensionReason::Admin));

        assert!(matches!(
            mgr.suspend(t.id, SuspensionReason::Admin),
            Err(TenantError::InvalidTransition { from: TenantState::Suspended, .. })
        ));

        let active = mgr.unsuspend(t.id).unwrap();
        assert_eq!(active.state, TenantState::Active);
        assert!(active.suspended_at.is_none());
        assert!(active.suspension_reason.is_none());
        assert!(mgr.unsuspend(t.id).is_err());
    }

    #[test]
    fn test_illegal_transitions_from_creating() {
        let mgr = TenantManager::default();
        let t = mgr.create(new_tenant(Uuid::new_v4(), "fresh"), 5).unwrap();
        assert!(mgr.suspend(t.id, SuspensionReason::Admin).is_err());
        assert!(mgr.unsuspend(t.id).is_err());
        assert!(mgr.complete_delete(t.id).is_err());
        assert!(mgr.retry_provisioning(t.id).is_err());
        assert!(mgr
            .ensure_state(t.id, &[TenantState::Active], "back up")
            .is_err());
    }

    #[test]
    fn test_provisioning_failure_and_retry() {
        let mgr = TenantManager::default();
        let t = mgr.create(new_tenant(Uuid::new_v4(), "flaky"), 5).unwrap();

        let failed = mgr.fail_provisioning(t.id, "db create failed").unwrap();
        assert_eq!(failed.state, TenantState::Error);
        assert_eq!(failed.state_message.as_deref(), Some("db create failed"));

        let retried = mgr.retry_provisioning(t.id).unwrap();
        assert_eq!(retried.state, TenantState::Creating);
        assert!(retried.state_message.is_none());
        assert_eq!(mgr.complete_provisioning(t.id).unwrap().state, TenantState::Active);
    }

    #[test]
    fn test_failed_delete_restores_previous_state() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "keepme");
        mgr.suspend(t.id, SuspensionReason::Billing).unwrap();

        assert_eq!(mgr.begin_delete(t.id).unwrap().state, TenantState::Deleting);
        assert!(mgr.begin_delete(t.id).is_err());

        let restored = mgr.fail_delete(t.id, "drop failed").unwrap();
        assert_eq!(restored.state, TenantState::Suspended);
        assert_eq!(restored.state_message.as_deref(), Some("drop failed"));
    }

    #[test]
    fn test_deleted_is_terminal() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "gone");
        mgr.begin_delete(t.id).unwrap();
        mgr.complete_delete(t.id).unwrap();

        assert!(mgr.begin_delete(t.id).is_err());
        assert!(mgr.unsuspend(t.id).is_err());
        assert!(mgr.update(t.id, TenantUpdate::default()).is_err());
    }

    #[test]
    fn test_update_custom_domain_and_clear() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "brand");

        let (before, after) = mgr
            .update(
                t.id,
                TenantUpdate {
                    custom_domain: Some("ERP.Brand.com".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(before.custom_domain.is_none());
        assert_eq!(after.full_domain, "erp.brand.com");

        let (_, cleared) = mgr
            .update(
                t.id,
                TenantUpdate {
                    custom_domain: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.custom_domain.is_none());
        assert_eq!(cleared.full_domain, "brand.odoo-saas.local");
    }

    #[test]
    fn test_usage_and_quota() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "usage");
        let quota = PlanQuota {
            max_db_size_gb: 1,
            max_filestore_gb: 1,
            max_users_per_tenant: 10,
        };

        let t2 = mgr
            .record_usage(
                t.id,
                UsageSnapshot {
                    db_size_bytes: GB / 2,
                    filestore_size_bytes: GB / 4,
                    users_count: 5,
                },
            )
            .unwrap();
        let pct = t2.usage_percentages(&quota);
        assert_eq!(pct.db_size, 50.0);
        assert_eq!(pct.filestore_size, 25.0);
        assert_eq!(pct.users, 50.0);
        assert!(!t2.exceeds_quota(&quota));

        let t3 = mgr
            .record_usage(
                t.id,
                UsageSnapshot {
                    db_size_bytes: 2 * GB,
                    filestore_size_bytes: 0,
                    users_count: 5,
                },
            )
            .unwrap();
        assert!(t3.exceeds_quota(&quota));
        let history = mgr.usage_history(t.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].period_start, history[0].period_end);
    }

    #[test]
    fn test_list_filters_and_pagination() {
        let mgr = TenantManager::default();
        let customer = Uuid::new_v4();
        for slug in ["alpha", "beta", "gamma"] {
            mgr.create(new_tenant(customer, slug), 10).unwrap();
        }
        let other = active_tenant(&mgr, "delta");

        let filter = TenantFilter {
            customer_id: Some(customer),
            order_by: TenantOrder::Slug,
            order_dir: SortDirection::Asc,
            ..Default::default()
        };
        let page = mgr.list(&filter, PageRequest::new(1, 2));
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.items[0].slug, "alpha");
        assert!(page.pagination.has_next);

        let active = mgr.list(
            &TenantFilter {
                state: Some(TenantState::Active),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(active.items.len(), 1);
        assert_eq!(active.items[0].id, other.id);

        let search = mgr.list(
            &TenantFilter {
                search: Some("GAM".into()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(search.items.len(), 1);
    }

    #[test]
    fn test_modules_and_stats() {
        let mgr = TenantManager::default();
        let t = active_tenant(&mgr, "mods");
        mgr.mark_module_installed(t.id, "sale").unwrap();
        mgr.mark_module_installed(t.id, "sale").unwrap();
        let t = mgr.mark_module_installed(t.id, "crm").unwrap();
        assert_eq!(t.installed_modules, vec!["crm", "sale"]);
        let t = mgr.mark_module_uninstalled(t.id, "sale").unwrap();
        assert!(!t.has_module("sale"));

        let stats = mgr.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_state["active"], 1);
        assert_eq!(stats.by_state["deleted"], 0);
    }
}
