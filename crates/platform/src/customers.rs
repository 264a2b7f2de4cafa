//! Customer accounts: registration, profile updates, and lookups used by
//! auth and billing.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use saas_core::types::{paginate, BillingProvider, CustomerRole, Page, PageRequest, SortDirection};
use saas_core::validation::{normalize_email, validate_length, validate_phone};
use saas_core::SaasError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CustomerError {
    #[error("Customer not found")]
    NotFound,

    #[error("A customer with email '{0}' already exists")]
    EmailTaken(String),

    #[error("You cannot change your own role")]
    SelfRoleChange,

    #[error("You cannot deactivate your own account")]
    SelfDeactivation,

    #[error(transparent)]
    Validation(#[from] SaasError),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: CustomerRole,
    pub is_active: bool,
    pub is_verified: bool,
    pub max_tenants: u32,
    pub max_quota_gb: u32,
    pub stripe_customer_id: Option<String>,
    pub paddle_customer_id: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == CustomerRole::Admin
    }
}

/// Fields for a new account. The password must already be hashed.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: CustomerRole,
    pub is_verified: bool,
    pub max_tenants: u32,
    pub max_quota_gb: u32,
}

impl NewCustomer {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password_hash: password_hash.into(),
            first_name: None,
            last_name: None,
            company: None,
            phone: None,
            role: CustomerRole::Owner,
            is_verified: false,
            max_tenants: 5,
            max_quota_gb: 50,
        }
    }
}

/// Partial update. `password_hash` is set by the caller after hashing.
#[derive(Debug, Clone, Default)]
pub struct CustomerUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: Option<CustomerRole>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
    pub max_tenants: Option<u32>,
    pub max_quota_gb: Option<u32>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerOrder {
    #[default]
    CreatedAt,
    Email,
    LastLogin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatusFilter {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    pub role: Option<CustomerRole>,
    pub status: Option<CustomerStatusFilter>,
    pub verified: Option<bool>,
    pub search: Option<String>,
    #[serde(default)]
    pub order_by: CustomerOrder,
    #[serde(default)]
    pub order_dir: SortDirection,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CustomerStats {
    pub total: u64,
    pub active: u64,
    pub verified: u64,
    pub new_last_30_days: u64,
}

/// Customer store backed by DashMap, with a unique email index.
pub struct CustomerDirectory {
    customers: DashMap<Uuid, Customer>,
    emails: DashMap<String, Uuid>,
}

impl Default for CustomerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomerDirectory {
    pub fn new() -> Self {
        Self {
            customers: DashMap::new(),
            emails: DashMap::new(),
        }
    }

    pub fn create(&self, new: NewCustomer) -> Result<Customer, CustomerError> {
        let email = normalize_email(&new.email)?;
        if let Some(ref phone) = new.phone {
            validate_phone(phone)?;
        }
        for (field, value) in [("First name", &new.first_name), ("Last name", &new.last_name)] {
            if let Some(v) = value {
                validate_length(field, v, 1, 100)?;
            }
        }

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            company: new.company,
            phone: new.phone,
            role: new.role,
            is_active: true,
            is_verified: new.is_verified,
            max_tenants: new.max_tenants,
            max_quota_gb: new.max_quota_gb,
            stripe_customer_id: None,
            paddle_customer_id: None,
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        match self.emails.entry(email.clone()) {
            Entry::Occupied(_) => return Err(CustomerError::EmailTaken(email)),
            Entry::Vacant(slot) => {
                slot.insert(customer.id);
                self.customers.insert(customer.id, customer.clone());
            }
        }

        info!(customer_id = %customer.id, role = %customer.role, "Customer created");
        Ok(customer)
    }

    pub fn get(&self, id: Uuid) -> Option<Customer> {
        self.customers.get(&id).map(|e| e.value().clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<Customer> {
        let id = *self.emails.get(&email.trim().to_lowercase())?;
        self.get(id)
    }

    pub fn find_by_provider_customer_id(
        &self,
        provider: BillingProvider,
        external_id: &str,
    ) -> Option<Customer> {
        self.customers
            .iter()
            .find(|e| {
                let linked = match provider {
                    BillingProvider::Stripe => e.stripe_customer_id.as_deref(),
                    BillingProvider::Paddle => e.paddle_customer_id.as_deref(),
                };
                linked == Some(external_id)
            })
            .map(|e| e.value().clone())
    }

    /// Apply an update. `acting_id` is the account making the change, used
    /// to stop admins from demoting or disabling themselves.
    pub fn update(
        &self,
        id: Uuid,
        update: CustomerUpdate,
        acting_id: Option<Uuid>,
    ) -> Result<(Customer, Customer), CustomerError> {
        if let Some(ref phone) = update.phone {
            if !phone.is_empty() {
                validate_phone(phone)?;
            }
        }

        let mut entry = self.customers.get_mut(&id).ok_or(CustomerError::NotFound)?;
        let before = entry.value().clone();

        if acting_id == Some(id) {
            if update.role.is_some_and(|r| r != before.role) {
                return Err(CustomerError::SelfRoleChange);
            }
            if update.is_active == Some(false) {
                return Err(CustomerError::SelfDeactivation);
            }
        }

        let c = entry.value_mut();
        if let Some(v) = update.first_name {
            c.first_name = non_empty(v);
        }
        if let Some(v) = update.last_name {
            c.last_name = non_empty(v);
        }
        if let Some(v) = update.company {
            c.company = non_empty(v);
        }
        if let Some(v) = update.phone {
            c.phone = non_empty(v);
        }
        if let Some(v) = update.role {
            c.role = v;
        }
        if let Some(v) = update.is_active {
            c.is_active = v;
        }
        if let Some(v) = update.is_verified {
            c.is_verified = v;
        }
        if let Some(v) = update.max_tenants {
            c.max_tenants = v;
        }
        if let Some(v) = update.max_quota_gb {
            c.max_quota_gb = v;
        }
        if let Some(v) = update.password_hash {
            c.password_hash = v;
        }
        c.updated_at = Utc::now();

        Ok((before, c.clone()))
    }

    pub fn record_login(&self, id: Uuid) {
        if let Some(mut entry) = self.customers.get_mut(&id) {
            entry.last_login = Some(Utc::now());
        }
    }

    /// Remember the provider's customer id the first time we see it.
    pub fn link_provider_customer(&self, id: Uuid, provider: BillingProvider, external_id: &str) {
        if let Some(mut entry) = self.customers.get_mut(&id) {
            let slot = match provider {
                BillingProvider::Stripe => &mut entry.stripe_customer_id,
                BillingProvider::Paddle => &mut entry.paddle_customer_id,
            };
            if slot.is_none() {
                *slot = Some(external_id.to_string());
                info!(customer_id = %id, provider = %provider, "Linked billing customer");
            }
        }
    }

    pub fn list(&self, filter: &CustomerFilter, page: PageRequest) -> Page<Customer> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut customers: Vec<Customer> = self
            .customers
            .iter()
            .filter(|e| {
                let c = e.value();
                if filter.role.is_some_and(|r| c.role != r) {
                    return false;
                }
                match filter.status {
                    Some(CustomerStatusFilter::Active) if !c.is_active => return false,
                    Some(CustomerStatusFilter::Inactive) if c.is_active => return false,
                    _ => {}
                }
                if filter.verified.is_some_and(|v| c.is_verified != v) {
                    return false;
                }
                if let Some(ref needle) = search {
                    let hit = c.email.contains(needle.as_str())
                        || [&c.first_name, &c.last_name, &c.company].iter().any(|f| {
                            f.as_deref()
                                .is_some_and(|v| v.to_lowercase().contains(needle.as_str()))
                        });
                    if !hit {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.value().clone())
            .collect();

        customers.sort_by(|a, b| {
            let ord = match filter.order_by {
                CustomerOrder::CreatedAt => a.created_at.cmp(&b.created_at),
                CustomerOrder::Email => a.email.cmp(&b.email),
                CustomerOrder::LastLogin => a.last_login.cmp(&b.last_login),
            };
            match filter.order_dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        paginate(customers, page.clamped(100))
    }

    pub fn stats(&self) -> CustomerStats {
        let cutoff = Utc::now() - Duration::days(30);
        let mut stats = CustomerStats {
            total: 0,
            active: 0,
            verified: 0,
            new_last_30_days: 0,
        };
        for entry in self.customers.iter() {
            stats.total += 1;
            if entry.is_active {
                stats.active += 1;
            }
            if entry.is_verified {
                stats.verified += 1;
            }
            if entry.created_at >= cutoff {
                stats.new_last_30_days += 1;
            }
        }
        stats
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(email: &str) -> (CustomerDirectory, Customer) {
        let dir = CustomerDirectory::new();
        let c = dir.create(NewCustomer::new(email, "hash")).unwrap();
        (dir, c)
    }

    #[test]
    fn test_email_is_lowercased_and_unique() {
        let (dir, c) = directory_with("Jane@Example.com");
        assert_eq!(c.email, "jane@example.com");
        assert_eq!(c.max_tenants, 5);
        assert!(dir.find_by_email("JANE@example.COM").is_some());

        let err = dir.create(NewCustomer::new("jane@example.com", "x")).unwrap_err();
        assert!(matches!(err, CustomerError::EmailTaken(_)));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let (_, c) = directory_with("a@example.com");
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "owner");
    }

    #[test]
    fn test_self_protection() {
        let (dir, admin) = directory_with("admin@example.com");
        let err = dir
            .update(
                admin.id,
                CustomerUpdate {
                    role: Some(CustomerRole::Viewer),
                    ..Default::default()
                },
                Some(admin.id),
            )
            .unwrap_err();
        assert!(matches!(err, CustomerError::SelfRoleChange));

        let err = dir
            .update(
                admin.id,
                CustomerUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                Some(admin.id),
            )
            .unwrap_err();
        assert!(matches!(err, CustomerError::SelfDeactivation));

        // Same role is not a change.
        assert!(dir
            .update(
                admin.id,
                CustomerUpdate {
                    role: Some(CustomerRole::Owner),
                    ..Default::default()
                },
                Some(admin.id),
            )
            .is_ok());

        // Another admin may deactivate the account.
        let (_, after) = dir
            .update(
                admin.id,
                CustomerUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                Some(Uuid::new_v4()),
            )
            .unwrap();
        assert!(!after.is_active);
    }

    #[test]
    fn test_provider_link_is_sticky() {
        let (dir, c) = directory_with("billing@example.com");
        dir.link_provider_customer(c.id, BillingProvider::Stripe, "cus_123");
        dir.link_provider_customer(c.id, BillingProvider::Stripe, "cus_456");

        let found = dir
            .find_by_provider_customer_id(BillingProvider::Stripe, "cus_123")
            .unwrap();
        assert_eq!(found.id, c.id);
        assert!(dir
            .find_by_provider_customer_id(BillingProvider::Paddle, "cus_123")
            .is_none());
    }

    #[test]
    fn test_list_filters() {
        let dir = CustomerDirectory::new();
        let mut admin = NewCustomer::new("ops@example.com", "h");
        admin.role = CustomerRole::Admin;
        admin.is_verified = true;
        dir.create(admin).unwrap();
        let mut acme = NewCustomer::new("owner@acme.io", "h");
        acme.company = Some("Acme Industries".into());
        dir.create(acme).unwrap();

        let admins = dir.list(
            &CustomerFilter {
                role: Some(CustomerRole::Admin),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(admins.items.len(), 1);

        let by_company = dir.list(
            &CustomerFilter {
                search: Some("industries".into()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(by_company.items[0].email, "owner@acme.io");

        let stats = dir.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.new_last_30_days, 2);
    }
}
