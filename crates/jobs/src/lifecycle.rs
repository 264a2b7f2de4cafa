//! Request-side tenant operations. Each call checks ownership-independent
//! preconditions, applies the synchronous part of the change, audits it, and
//! queues the slow part as a job.

use saas_billing::plans::PlanCatalog;
use saas_billing::webhooks::FollowUp;
use saas_core::types::{Actor, AuditAction, SuspensionReason, TenantState};
use saas_core::SaasError;
use saas_ops::backup::{BackupCatalog, BackupStatus};
use saas_platform::audit::{AuditLog, AuditRecord};
use saas_platform::customers::CustomerDirectory;
use saas_platform::tenancy::{NewTenant, Tenant, TenantError, TenantManager, TenantUpdate};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::notify::Notification;
use crate::queue::{JobKind, JobQueue, JobRecord, QueueError};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Validation(#[from] SaasError),

    #[error("Customer not found")]
    CustomerNotFound,

    #[error("Customer account is disabled")]
    CustomerInactive,

    #[error("Plan not found")]
    PlanNotFound,

    #[error("Plan '{0}' is not available")]
    PlanInactive(String),

    #[error("Module '{0}' is not available on the current plan")]
    ModuleNotAllowed(String),

    #[error("Module '{0}' is already installed")]
    ModuleAlreadyInstalled(String),

    #[error("Module '{0}' is not installed")]
    ModuleNotInstalled(String),

    #[error("Backup not found")]
    BackupNotFound,

    #[error("Backup is not completed")]
    BackupNotCompleted,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TenantRequest {
    pub name: String,
    pub slug: String,
    pub plan_id: Uuid,
    pub custom_domain: Option<String>,
}

/// Modules every tenant needs to function.
const CORE_MODULES: [&str; 2] = ["base", "web"];

fn validate_module_name(module: &str) -> Result<(), SaasError> {
    let valid = !module.is_empty()
        && module.len() <= 64
        && module
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SaasError::validation(format!("Invalid module name '{module}'")))
    }
}

pub struct TenantLifecycle {
    tenants: Arc<TenantManager>,
    customers: Arc<CustomerDirectory>,
    plans: Arc<PlanCatalog>,
    backups: Arc<BackupCatalog>,
    audit: Arc<AuditLog>,
    queue: Arc<JobQueue>,
}

impl TenantLifecycle {
    pub fn new(
        tenants: Arc<TenantManager>,
        customers: Arc<CustomerDirectory>,
        plans: Arc<PlanCatalog>,
        backups: Arc<BackupCatalog>,
        audit: Arc<AuditLog>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            tenants,
            customers,
            plans,
            backups,
            audit,
            queue,
        }
    }

    fn audit_tenant(&self, actor: &Actor, record: AuditRecord) {
        self.audit.record(actor, record);
    }

    fn active_plan(&self, plan_id: Uuid) -> Result<saas_billing::plans::Plan, LifecycleError> {
        let plan = self.plans.get(plan_id).ok_or(LifecycleError::PlanNotFound)?;
        if !plan.is_active {
            return Err(LifecycleError::PlanInactive(plan.name));
        }
        Ok(plan)
    }

    /// Register a tenant for `customer_id` and queue its provisioning.
    pub fn create_tenant(
        &self,
        actor: &Actor,
        customer_id: Uuid,
        request: TenantRequest,
    ) -> Result<(Tenant, JobRecord), LifecycleError> {
        let customer = self
            .customers
            .get(customer_id)
            .ok_or(LifecycleError::CustomerNotFound)?;
        if !customer.is_active {
            return Err(LifecycleError::CustomerInactive);
        }
        self.active_plan(request.plan_id)?;

        let tenant = self.tenants.create(
            NewTenant {
                customer_id,
                plan_id: request.plan_id,
                name: request.name,
                slug: request.slug,
                custom_domain: request.custom_domain,
            },
            customer.max_tenants,
        )?;
        self.audit_tenant(
            actor,
            AuditRecord::new(AuditAction::Create, "tenant", tenant.id).new_values(json!({
                "name": tenant.name,
                "slug": tenant.slug,
                "plan_id": tenant.plan_id,
                "customer_id": tenant.customer_id,
                "custom_domain": tenant.custom_domain,
            })),
        );
        metrics::counter!("tenants.created").increment(1);

        let job = self.queue.enqueue(
            JobKind::Provision {
                tenant_id: tenant.id,
            },
            actor.clone(),
        );
        match job {
            Ok(job) => Ok((tenant, job)),
            Err(e) => {
                self.tenants.fail_provisioning(tenant.id, &e.to_string())?;
                Err(e.into())
            }
        }
    }

    pub fn update_tenant(
        &self,
        actor: &Actor,
        tenant_id: Uuid,
        update: TenantUpdate,
    ) -> Result<Tenant, LifecycleError> {
        if let Some(plan_id) = update.plan_id {
            self.active_plan(plan_id)?;
        }
        let (before, after) = self.tenants.update(tenant_id, update)?;
        self.audit_tenant(
            actor,
            AuditRecord::new(AuditAction::Update, "tenant", tenant_id)
                .old_values(json!({
                    "name": before.name,
                    "custom_domain": before.custom_domain,
                    "plan_id": before.plan_id,
                }))
                .new_values(json!({
                    "name": after.name,
                    "custom_domain": after.custom_domain,
                    "plan_id": after.plan_id,
                })),
        );
        Ok(after)
    }

    /// Move the tenant to `deleting` and queue the teardown. If the job can't
    /// be queued the tenant goes back to where it was.
    pub fn delete_tenant(&self, actor: &Actor, tenant_id: Uuid) -> Result<JobRecord, LifecycleError> {
        let tenant = self.tenants.begin_delete(tenant_id)?;
        match self
            .queue
            .enqueue(JobKind::Delete { tenant_id }, actor.clone())
        {
            Ok(job) => {
                info!(tenant_id = %tenant_id, slug = %tenant.slug, job_id = %job.id, "Tenant deletion queued");
                Ok(job)
            }
            Err(e) => {
                self.tenants.fail_delete(tenant_id, &e.to_string())?;
                Err(e.into())
            }
        }
    }

    pub fn suspend_tenant(
        &self,
        actor: &Actor,
        tenant_id: Uuid,
        reason: SuspensionReason,
    ) -> Result<Tenant, LifecycleError> {
        let tenant = self.tenants.suspend(tenant_id, reason)?;
        self.audit_tenant(
            actor,
            AuditRecord::new(AuditAction::Suspend, "tenant", tenant_id)
                .old_values(json!({ "state": TenantState::Active }))
                .new_values(json!({ "state": tenant.state, "reason": reason })),
        );
        metrics::counter!("tenants.suspended").increment(1);
        Ok(tenant)
    }

    pub fn unsuspend_tenant(&self, actor: &Actor, tenant_id: Uuid) -> Result<Tenant, LifecycleError> {
        let before = self.tenants.get(tenant_id).ok_or(TenantError::NotFound)?;
        let tenant = self.tenants.unsuspend(tenant_id)?;
        self.audit_tenant(
            actor,
            AuditRecord::new(AuditAction::Unsuspend, "tenant", tenant_id)
                .old_values(json!({ "state": before.state, "reason": before.suspension_reason }))
                .new_values(json!({ "state": tenant.state })),
        );
        Ok(tenant)
    }

    /// Re-queue provisioning for a tenant stuck in `error`.
    pub fn retry_provisioning(&self, actor: &Actor, tenant_id: Uuid) -> Result<JobRecord, LifecycleError> {
        self.tenants.retry_provisioning(tenant_id)?;
        match self
            .queue
            .enqueue(JobKind::Provision { tenant_id }, actor.clone())
        {
            Ok(job) => Ok(job),
            Err(e) => {
                self.tenants.fail_provisioning(tenant_id, &e.to_string())?;
                Err(e.into())
            }
        }
    }

    pub fn request_backup(&self, actor: &Actor, tenant_id: Uuid) -> Result<JobRecord, LifecycleError> {
        self.tenants
            .ensure_state(tenant_id, &[TenantState::Active], "back up")?;
        Ok(self
            .queue
            .enqueue(JobKind::Backup { tenant_id }, actor.clone())?)
    }

    pub fn request_restore(
        &self,
        actor: &Actor,
        tenant_id: Uuid,
        backup_id: Uuid,
    ) -> Result<JobRecord, LifecycleError> {
        self.tenants.ensure_state(
            tenant_id,
            &[TenantState::Active, TenantState::Suspended],
            "restore",
        )?;
        let backup = self
            .backups
            .get(backup_id)
            .filter(|b| b.tenant_id == tenant_id)
            .ok_or(LifecycleError::BackupNotFound)?;
        if backup.status != BackupStatus::Completed {
            return Err(LifecycleError::BackupNotCompleted);
        }
        Ok(self.queue.enqueue(
            JobKind::Restore {
                tenant_id,
                backup_id,
            },
            actor.clone(),
        )?)
    }

    pub fn request_module_install(
        &self,
        actor: &Actor,
        tenant_id: Uuid,
        module: &str,
    ) -> Result<JobRecord, LifecycleError> {
        validate_module_name(module)?;
        let tenant = self
            .tenants
            .ensure_state(tenant_id, &[TenantState::Active], "install a module on")?;
        let plan = self
            .plans
            .get(tenant.plan_id)
            .ok_or(LifecycleError::PlanNotFound)?;
        if !plan.allows_module(module) {
            return Err(LifecycleError::ModuleNotAllowed(module.to_string()));
        }
        if tenant.has_module(module) {
            return Err(LifecycleError::ModuleAlreadyInstalled(module.to_string()));
        }
        Ok(self.queue.enqueue(
            JobKind::InstallModule {
                tenant_id,
                module: module.to_string(),
            },
            actor.clone(),
        )?)
    }

    pub fn request_module_uninstall(
        &self,
        actor: &Actor,
        tenant_id: Uuid,
        module: &str,
    ) -> Result<JobRecord, LifecycleError> {
        validate_module_name(module)?;
        if CORE_MODULES.contains(&module) {
            return Err(SaasError::validation(format!("Module '{module}' cannot be uninstalled")).into());
        }
        let tenant = self
            .tenants
            .ensure_state(tenant_id, &[TenantState::Active], "uninstall a module from")?;
        if !tenant.has_module(module) {
            return Err(LifecycleError::ModuleNotInstalled(module.to_string()));
        }
        Ok(self.queue.enqueue(
            JobKind::UninstallModule {
                tenant_id,
                module: module.to_string(),
            },
            actor.clone(),
        )?)
    }

    /// Act on what a billing webhook asked for. Returns how many tenants
    /// changed state.
    pub fn apply_follow_ups(&self, follow_ups: Vec<FollowUp>) -> usize {
        let system = Actor::system();
        let mut changed = 0;

        for follow_up in follow_ups {
            match follow_up {
                FollowUp::Notify(notice) => {
                    let notification = Notification::from(notice);
                    if let Err(e) = self
                        .queue
                        .enqueue(JobKind::Notify(notification), system.clone())
                    {
                        warn!(error = %e, "Could not queue billing notification");
                    }
                }
                FollowUp::SuspendForBilling { customer_id } => {
                    for tenant in self.tenants.list_for_customer(customer_id) {
                        if tenant.state != TenantState::Active {
                            continue;
                        }
                        match self.suspend_tenant(&system, tenant.id, SuspensionReason::Billing) {
                            Ok(_) => changed += 1,
                            Err(e) => warn!(tenant_id = %tenant.id, error = %e, "Billing suspension failed"),
                        }
                    }
                }
                FollowUp::RestoreFromBilling { customer_id } => {
                    for tenant in self.tenants.list_for_customer(customer_id) {
                        if tenant.state != TenantState::Suspended
                            || tenant.suspension_reason != Some(SuspensionReason::Billing)
                        {
                            continue;
                        }
                        match self.unsuspend_tenant(&system, tenant.id) {
                            Ok(_) => changed += 1,
                            Err(e) => warn!(tenant_id = %tenant.id, error = %e, "Billing restore failed"),
                        }
                    }
                }
            }
        }
        changed
    }
}
