//! Plan catalog: pricing, quotas, module allowances, and provider price ids.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use saas_core::types::{PlanQuota, SortDirection};
use saas_core::validation::validate_length;
use saas_core::SaasError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

/// Wildcard entry in `allowed_modules` that permits every module.
pub const ALL_MODULES: &str = "*";

/// Modules offered when a plan allows everything.
pub const STANDARD_MODULES: &[&str] = &[
    "base", "web", "mail", "contacts", "calendar", "sale", "crm", "project", "hr", "account",
    "stock", "purchase", "website", "portal", "note", "mrp", "maintenance", "fleet",
];

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Plan not found")]
    NotFound,

    #[error("A plan named '{0}' already exists")]
    NameTaken(String),

    #[error("This plan has {tenants} tenants. Migrate tenants before deleting.")]
    InUse { tenants: u64 },

    #[error(transparent)]
    Validation(#[from] SaasError),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub currency: String,
    pub max_tenants: u32,
    pub max_users_per_tenant: u32,
    pub max_db_size_gb: u32,
    pub max_filestore_gb: u32,
    pub features: Vec<String>,
    pub allowed_modules: Vec<String>,
    pub stripe_price_id_monthly: Option<String>,
    pub stripe_price_id_yearly: Option<String>,
    pub paddle_plan_id: Option<String>,
    pub is_active: bool,
    pub trial_days: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn quota(&self) -> PlanQuota {
        PlanQuota {
            max_db_size_gb: self.max_db_size_gb,
            max_filestore_gb: self.max_filestore_gb,
            max_users_per_tenant: self.max_users_per_tenant,
        }
    }

    pub fn allows_all_modules(&self) -> bool {
        self.allowed_modules.iter().any(|m| m == ALL_MODULES)
    }

    pub fn allows_module(&self, module: &str) -> bool {
        self.allows_all_modules() || self.allowed_modules.iter().any(|m| m == module)
    }

    /// Modules a tenant on this plan may install.
    pub fn available_modules(&self) -> Vec<String> {
        if self.allows_all_modules() {
            STANDARD_MODULES.iter().map(|m| m.to_string()).collect()
        } else {
            self.allowed_modules.clone()
        }
    }

    /// What a customer saves per year by paying yearly. Never negative.
    pub fn yearly_savings(&self) -> f64 {
        (self.price_monthly * 12.0 - self.price_yearly).max(0.0)
    }
}

fn default_currency() -> String {
    "USD".to_string()
}
fn default_max_tenants() -> u32 {
    1
}
fn default_max_users() -> u32 {
    10
}
fn default_max_db_gb() -> u32 {
    5
}
fn default_max_filestore_gb() -> u32 {
    2
}
fn default_allowed_modules() -> Vec<String> {
    vec![ALL_MODULES.to_string()]
}
fn default_true() -> bool {
    true
}
fn default_trial_days() -> u32 {
    14
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPlan {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub price_monthly: f64,
    #[serde(default)]
    pub price_yearly: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_max_tenants")]
    pub max_tenants: u32,
    #[serde(default = "default_max_users")]
    pub max_users_per_tenant: u32,
    #[serde(default = "default_max_db_gb")]
    pub max_db_size_gb: u32,
    #[serde(default = "default_max_filestore_gb")]
    pub max_filestore_gb: u32,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
    pub stripe_price_id_monthly: Option<String>,
    pub stripe_price_id_yearly: Option<String>,
    pub paddle_plan_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,
}

impl NewPlan {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            price_monthly: 0.0,
            price_yearly: 0.0,
            currency: default_currency(),
            max_tenants: default_max_tenants(),
            max_users_per_tenant: default_max_users(),
            max_db_size_gb: default_max_db_gb(),
            max_filestore_gb: default_max_filestore_gb(),
            features: Vec::new(),
            allowed_modules: default_allowed_modules(),
            stripe_price_id_monthly: None,
            stripe_price_id_yearly: None,
            paddle_plan_id: None,
            is_active: true,
            trial_days: default_trial_days(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_monthly: Option<f64>,
    pub price_yearly: Option<f64>,
    pub currency: Option<String>,
    pub max_tenants: Option<u32>,
    pub max_users_per_tenant: Option<u32>,
    pub max_db_size_gb: Option<u32>,
    pub max_filestore_gb: Option<u32>,
    pub features: Option<Vec<String>>,
    pub allowed_modules: Option<Vec<String>>,
    pub stripe_price_id_monthly: Option<String>,
    pub stripe_price_id_yearly: Option<String>,
    pub paddle_plan_id: Option<String>,
    pub is_active: Option<bool>,
    pub trial_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatusFilter {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrder {
    #[default]
    PriceMonthly,
    Name,
    CreatedAt,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanFilter {
    pub status: Option<PlanStatusFilter>,
    pub search: Option<String>,
    #[serde(default)]
    pub order_by: PlanOrder,
    pub order_dir: Option<SortDirection>,
}

/// Usage figures for a single plan.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PlanStats {
    pub tenant_count: u64,
    pub active_tenant_count: u64,
    pub active_subscriptions: u64,
    pub monthly_revenue: f64,
    pub yearly_revenue: f64,
}

/// Catalog entry shown to customers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub currency: String,
    pub max_tenants: u32,
    pub max_users_per_tenant: u32,
    pub max_db_size_gb: u32,
    pub max_filestore_gb: u32,
    pub features: Vec<String>,
    pub trial_days: u32,
    pub yearly_savings: f64,
}

impl From<&Plan> for PublicPlan {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id,
            name: plan.name.clone(),
            description: plan.description.clone(),
            price_monthly: plan.price_monthly,
            price_yearly: plan.price_yearly,
            currency: plan.currency.clone(),
            max_tenants: plan.max_tenants,
            max_users_per_tenant: plan.max_users_per_tenant,
            max_db_size_gb: plan.max_db_size_gb,
            max_filestore_gb: plan.max_filestore_gb,
            features: plan.features.clone(),
            trial_days: plan.trial_days,
            yearly_savings: plan.yearly_savings(),
        }
    }
}

fn check_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), SaasError> {
    if value < min || value > max {
        return Err(SaasError::validation(format!(
            "{field} must be between {min} and {max}"
        )));
    }
    Ok(())
}

fn check_price(field: &str, value: f64) -> Result<(), SaasError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SaasError::validation(format!("{field} must be a non-negative amount")));
    }
    Ok(())
}

fn validate_plan(plan: &Plan) -> Result<(), SaasError> {
    validate_length("Name", &plan.name, 2, 100)?;
    check_price("price_monthly", plan.price_monthly)?;
    check_price("price_yearly", plan.price_yearly)?;
    if plan.currency.len() != 3 || !plan.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SaasError::validation("currency must be a 3-letter code"));
    }
    check_range("max_tenants", plan.max_tenants, 1, 100)?;
    check_range("max_users_per_tenant", plan.max_users_per_tenant, 1, 1000)?;
    check_range("max_db_size_gb", plan.max_db_size_gb, 1, 500)?;
    check_range("max_filestore_gb", plan.max_filestore_gb, 1, 500)?;
    check_range("trial_days", plan.trial_days, 0, 90)?;
    Ok(())
}

/// Plan store backed by DashMap. Name uniqueness is checked under `write_lock`.
pub struct PlanCatalog {
    plans: DashMap<Uuid, Plan>,
    write_lock: Mutex<()>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self {
            plans: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.plans
            .iter()
            .any(|p| Some(p.id) != except && p.name.eq_ignore_ascii_case(name))
    }

    pub fn create(&self, new: NewPlan) -> Result<Plan, PlanError> {
        let now = Utc::now();
        let plan = Plan {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            description: new.description,
            price_monthly: new.price_monthly,
            price_yearly: new.price_yearly,
            currency: new.currency.to_uppercase(),
            max_tenants: new.max_tenants,
            max_users_per_tenant: new.max_users_per_tenant,
            max_db_size_gb: new.max_db_size_gb,
            max_filestore_gb: new.max_filestore_gb,
            features: new.features,
            allowed_modules: new.allowed_modules,
            stripe_price_id_monthly: new.stripe_price_id_monthly,
            stripe_price_id_yearly: new.stripe_price_id_yearly,
            paddle_plan_id: new.paddle_plan_id,
            is_active: new.is_active,
            trial_days: new.trial_days,
            created_at: now,
            updated_at: now,
        };
        validate_plan(&plan)?;

        let _guard = self.write_lock.lock();
        if self.name_taken(&plan.name, None) {
            return Err(PlanError::NameTaken(plan.name));
        }
        self.plans.insert(plan.id, plan.clone());
        info!(plan_id = %plan.id, name = %plan.name, "Plan created");
        Ok(plan)
    }

    pub fn get(&self, id: Uuid) -> Option<Plan> {
        self.plans.get(&id).map(|p| p.value().clone())
    }

    /// Returns `(before, after)`.
    pub fn update(&self, id: Uuid, update: PlanUpdate) -> Result<(Plan, Plan), PlanError> {
        let _guard = self.write_lock.lock();
        let before = self.get(id).ok_or(PlanError::NotFound)?;
        let mut plan = before.clone();

        if let Some(v) = update.name {
            plan.name = v.trim().to_string();
        }
        if let Some(v) = update.description {
            plan.description = Some(v).filter(|d| !d.is_empty());
        }
        if let Some(v) = update.price_monthly {
            plan.price_monthly = v;
        }
        if let Some(v) = update.price_yearly {
            plan.price_yearly = v;
        }
        if let Some(v) = update.currency {
            plan.currency = v.to_uppercase();
        }
        if let Some(v) = update.max_tenants {
            plan.max_tenants = v;
        }
        if let Some(v) = update.max_users_per_tenant {
            plan.max_users_per_tenant = v;
        }
        if let Some(v) = update.max_db_size_gb {
            plan.max_db_size_gb = v;
        }
        if let Some(v) = update.max_filestore_gb {
            plan.max_filestore_gb = v;
        }
        if let Some(v) = update.features {
            plan.features = v;
        }
        if let Some(v) = update.allowed_modules {
            plan.allowed_modules = v;
        }
        if let Some(v) = update.stripe_price_id_monthly {
            plan.stripe_price_id_monthly = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = update.stripe_price_id_yearly {
            plan.stripe_price_id_yearly = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = update.paddle_plan_id {
            plan.paddle_plan_id = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = update.is_active {
            plan.is_active = v;
        }
        if let Some(v) = update.trial_days {
            plan.trial_days = v;
        }
        validate_plan(&plan)?;

        if plan.name != before.name && self.name_taken(&plan.name, Some(id)) {
            return Err(PlanError::NameTaken(plan.name));
        }
        plan.updated_at = Utc::now();
        self.plans.insert(id, plan.clone());
        Ok((before, plan))
    }

    /// Remove a plan. `tenants_on_plan` is supplied by the caller since
    /// tenants live outside the catalog.
    pub fn delete(&self, id: Uuid, tenants_on_plan: u64) -> Result<Plan, PlanError> {
        if tenants_on_plan > 0 {
            return Err(PlanError::InUse {
                tenants: tenants_on_plan,
            });
        }
        let (_, plan) = self.plans.remove(&id).ok_or(PlanError::NotFound)?;
        info!(plan_id = %id, "Plan deleted");
        Ok(plan)
    }

    pub fn list(&self, filter: &PlanFilter) -> Vec<Plan> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| match filter.status {
                Some(PlanStatusFilter::Active) => p.is_active,
                Some(PlanStatusFilter::Inactive) => !p.is_active,
                None => true,
            })
            .filter(|p| {
                search.as_ref().map_or(true, |needle| {
                    p.name.to_lowercase().contains(needle.as_str())
                        || p.description
                            .as_deref()
                            .is_some_and(|d| d.to_lowercase().contains(needle.as_str()))
                })
            })
            .map(|p| p.value().clone())
            .collect();

        plans.sort_by(|a, b| {
            let ord = match filter.order_by {
                PlanOrder::PriceMonthly => a.price_monthly.total_cmp(&b.price_monthly),
                PlanOrder::Name => a.name.cmp(&b.name),
                PlanOrder::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            match filter.order_dir.unwrap_or(SortDirection::Asc) {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        plans
    }

    /// Active plans for the customer-facing catalog, cheapest first.
    pub fn public_catalog(&self) -> Vec<PublicPlan> {
        self.list(&PlanFilter {
            status: Some(PlanStatusFilter::Active),
            ..Default::default()
        })
        .iter()
        .map(PublicPlan::from)
        .collect()
    }

    pub fn find_by_stripe_price(&self, price_id: &str) -> Option<Plan> {
        self.plans
            .iter()
            .find(|p| {
                p.stripe_price_id_monthly.as_deref() == Some(price_id)
                    || p.stripe_price_id_yearly.as_deref() == Some(price_id)
            })
            .map(|p| p.value().clone())
    }

    pub fn find_by_paddle_plan(&self, paddle_plan_id: &str) -> Option<Plan> {
        self.plans
            .iter()
            .find(|p| p.paddle_plan_id.as_deref() == Some(paddle_plan_id))
            .map(|p| p.value().clone())
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starter() -> NewPlan {
        let mut plan = NewPlan::named("Starter");
        plan.price_monthly = 29.0;
        plan.price_yearly = 290.0;
        plan.stripe_price_id_monthly = Some("price_starter_m".into());
        plan.stripe_price_id_yearly = Some("price_starter_y".into());
        plan.paddle_plan_id = Some("1001".into());
        plan
    }

    #[test]
    fn test_defaults_and_savings() {
        let catalog = PlanCatalog::new();
        let plan = catalog.create(starter()).unwrap();
        assert_eq!(plan.currency, "USD");
        assert_eq!(plan.trial_days, 14);
        assert_eq!(plan.max_db_size_gb, 5);
        assert!((plan.yearly_savings() - 58.0).abs() < f64::EPSILON);

        let mut pricey = NewPlan::named("Odd");
        pricey.price_monthly = 10.0;
        pricey.price_yearly = 200.0;
        assert_eq!(catalog.create(pricey).unwrap().yearly_savings(), 0.0);
    }

    #[test]
    fn test_name_unique_case_insensitive() {
        let catalog = PlanCatalog::new();
        catalog.create(starter()).unwrap();
        assert!(matches!(
            catalog.create(NewPlan::named("starter")),
            Err(PlanError::NameTaken(_))
        ));

        let other = catalog.create(NewPlan::named("Business")).unwrap();
        let rename = PlanUpdate {
            name: Some("Starter".into()),
            ..Default::default()
        };
        assert!(matches!(catalog.update(other.id, rename), Err(PlanError::NameTaken(_))));
    }

    #[test]
    fn test_range_validation() {
        let catalog = PlanCatalog::new();
        let mut plan = NewPlan::named("Huge");
        plan.max_db_size_gb = 501;
        assert!(matches!(catalog.create(plan), Err(PlanError::Validation(_))));

        let mut plan = NewPlan::named("Negative");
        plan.price_monthly = -1.0;
        assert!(matches!(catalog.create(plan), Err(PlanError::Validation(_))));

        let ok = catalog.create(NewPlan::named("Fine")).unwrap();
        let bad = PlanUpdate {
            trial_days: Some(120),
            ..Default::default()
        };
        assert!(matches!(catalog.update(ok.id, bad), Err(PlanError::Validation(_))));
        assert_eq!(catalog.get(ok.id).unwrap().trial_days, 14);
    }

    #[test]
    fn test_delete_blocked_when_in_use() {
        let catalog = PlanCatalog::new();
        let plan = catalog.create(starter()).unwrap();
        assert!(matches!(
            catalog.delete(plan.id, 2),
            Err(PlanError::InUse { tenants: 2 })
        ));
        assert!(catalog.delete(plan.id, 0).is_ok());
        assert!(matches!(catalog.delete(plan.id, 0), Err(PlanError::NotFound)));
    }

    #[test]
    fn test_lookups_and_catalog() {
        let catalog = PlanCatalog::new();
        let plan = catalog.create(starter()).unwrap();
        let mut hidden = NewPlan::named("Legacy");
        hidden.is_active = false;
        catalog.create(hidden).unwrap();

        assert_eq!(catalog.find_by_stripe_price("price_starter_y").unwrap().id, plan.id);
        assert_eq!(catalog.find_by_paddle_plan("1001").unwrap().id, plan.id);
        assert!(catalog.find_by_stripe_price("price_unknown").is_none());

        let public = catalog.public_catalog();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].name, "Starter");
    }

    #[test]
    fn test_module_allowance() {
        let catalog = PlanCatalog::new();
        let all = catalog.create(NewPlan::named("All")).unwrap();
        assert!(all.allows_module("crm"));
        assert!(all.available_modules().contains(&"stock".to_string()));

        let mut limited = NewPlan::named("Limited");
        limited.allowed_modules = vec!["sale".into(), "crm".into()];
        let limited = catalog.create(limited).unwrap();
        assert!(limited.allows_module("crm"));
        assert!(!limited.allows_module("mrp"));
    }

    #[test]
    fn test_list_ordering() {
        let catalog = PlanCatalog::new();
        let mut pro = NewPlan::named("Pro");
        pro.price_monthly = 99.0;
        catalog.create(pro).unwrap();
        catalog.create(starter()).unwrap();

        let names: Vec<_> = catalog
            .list(&PlanFilter::default())
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Starter", "Pro"]);
    }
}
