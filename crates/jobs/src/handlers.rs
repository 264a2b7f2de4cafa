//! Tenant job handlers: each job drives the provisioner and moves the tenant
//! through its state machine, auditing started/completed/failed along the way.

use saas_core::types::{Actor, AuditAction, TenantState};
use saas_ops::backup::{BackupCatalog, BackupError, BackupStatus, BackupType};
use saas_ops::provisioner::{OdooProvisioner, ProvisionError, TenantSpec};
use saas_platform::audit::{AuditLog, AuditRecord};
use saas_platform::tenancy::{TenantError, TenantManager};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::{Notification, Notifier, NotifyError};
use crate::queue::{Job, JobKind, QueueError};

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Backup {backup_id} does not belong to tenant {tenant_id}")]
    ForeignBackup { backup_id: Uuid, tenant_id: Uuid },

    #[error("Job timed out after {0}s")]
    Timeout(u64),
}

/// Executes tenant jobs against the stores and the Odoo service.
pub struct TenantJobs {
    tenants: Arc<TenantManager>,
    audit: Arc<AuditLog>,
    backups: Arc<BackupCatalog>,
    provisioner: Arc<dyn OdooProvisioner>,
    notifier: Arc<dyn Notifier>,
}

impl TenantJobs {
    pub fn new(
        tenants: Arc<TenantManager>,
        audit: Arc<AuditLog>,
        backups: Arc<BackupCatalog>,
        provisioner: Arc<dyn OdooProvisioner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tenants,
            audit,
            backups,
            provisioner,
            notifier,
        }
    }

    pub async fn run(&self, job: &Job) -> Result<(), JobError> {
        let actor = &job.actor;
        match &job.kind {
            JobKind::Provision { tenant_id } => self.provision(actor, *tenant_id).await,
            JobKind::Delete { tenant_id } => self.delete(actor, *tenant_id).await,
            JobKind::InstallModule { tenant_id, module } => {
                self.install_module(actor, *tenant_id, module).await
            }
            JobKind::UninstallModule { tenant_id, module } => {
                self.uninstall_module(actor, *tenant_id, module).await
            }
            JobKind::Backup { tenant_id } => self.backup(actor, *tenant_id).await.map(|_| ()),
            JobKind::Restore {
                tenant_id,
                backup_id,
            } => self.restore(actor, *tenant_id, *backup_id).await,
            JobKind::Notify(notification) => Ok(self.notifier.notify(notification)?),
        }
    }

    /// Compensate for a job that was cut off mid-flight, leaving the tenant
    /// in the same state a provisioner failure would have.
    pub fn abandon(&self, job: &Job, reason: &str) {
        let actor = &job.actor;
        match &job.kind {
            JobKind::Provision { tenant_id } => {
                if self.tenants.fail_provisioning(*tenant_id, reason).is_ok() {
                    self.audit_tenant(
                        actor,
                        AuditAction::Create,
                        *tenant_id,
                        json!({ "status": "provisioning_failed", "error": reason }),
                    );
                    metrics::counter!("tenants.provisioning_failed").increment(1);
                }
            }
            JobKind::Delete { tenant_id } => {
                if let Ok(restored) = self.tenants.fail_delete(*tenant_id, reason) {
                    self.audit_tenant(
                        actor,
                        AuditAction::Delete,
                        *tenant_id,
                        json!({
                            "status": "deletion_failed",
                            "error": reason,
                            "restored_state": restored.state,
                        }),
                    );
                }
            }
            JobKind::Backup { tenant_id } => {
                for record in self.backups.list_for_tenant(*tenant_id) {
                    if record.status == BackupStatus::Running && self.backups.fail(record.id, reason).is_ok() {
                        self.audit_tenant(
                            actor,
                            AuditAction::Backup,
                            *tenant_id,
                            json!({ "backup_id": record.id, "status": "failed", "error": reason }),
                        );
                        metrics::counter!("backups.failed").increment(1);
                    }
                }
            }
            JobKind::Restore {
                tenant_id,
                backup_id,
            } => self.audit_tenant(
                actor,
                AuditAction::Restore,
                *tenant_id,
                json!({ "backup_id": backup_id, "status": "failed", "error": reason }),
            ),
            JobKind::InstallModule { tenant_id, module } => self.audit_tenant(
                actor,
                AuditAction::ModuleInstall,
                *tenant_id,
                json!({ "module": module, "status": "failed", "error": reason }),
            ),
            JobKind::UninstallModule { tenant_id, module } => self.audit_tenant(
                actor,
                AuditAction::ModuleUninstall,
                *tenant_id,
                json!({ "module": module, "status": "failed", "error": reason }),
            ),
            JobKind::Notify(_) => {}
        }
        warn!(job_id = %job.id, kind = job.kind.name(), reason, "Job abandoned");
    }

    fn audit_tenant(&self, actor: &Actor, action: AuditAction, tenant_id: Uuid, values: serde_json::Value) {
        self.audit.record(
            actor,
            AuditRecord::new(action, "tenant", tenant_id).new_values(values),
        );
    }

    async fn provision(&self, actor: &Actor, tenant_id: Uuid) -> Result<(), JobError> {
        let tenant = self
            .tenants
            .ensure_state(tenant_id, &[TenantState::Creating], "provision")?;
        self.audit_tenant(
            actor,
            AuditAction::Create,
            tenant_id,
            json!({ "status": "provisioning_started", "slug": tenant.slug }),
        );

        let spec = TenantSpec {
            tenant_id,
            db_name: tenant.db_name.clone(),
            slug: tenant.slug.clone(),
            domain: tenant.full_domain.clone(),
            odoo_version: tenant.odoo_version.clone(),
        };

        match self.provisioner.create_tenant(&spec).await {
            Ok(()) => {
                let tenant = self.tenants.complete_provisioning(tenant_id)?;
                self.audit_tenant(
                    actor,
                    AuditAction::Create,
                    tenant_id,
                    json!({ "status": "provisioning_completed", "domain": tenant.full_domain }),
                );
                metrics::counter!("tenants.provisioned").increment(1);

                let welcome = Notification::Welcome {
                    customer_id: tenant.customer_id,
                    tenant_id,
                    domain: tenant.full_domain,
                };
                if let Err(e) = self.notifier.notify(&welcome) {
                    warn!(tenant_id = %tenant_id, error = %e, "Welcome notification failed");
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.tenants.fail_provisioning(tenant_id, &message)?;
                self.audit_tenant(
                    actor,
                    AuditAction::Create,
                    tenant_id,
                    json!({ "status": "provisioning_failed", "error": message }),
                );
                metrics::counter!("tenants.provisioning_failed").increment(1);
                Err(e.into())
            }
        }
    }

    async fn delete(&self, actor: &Actor, tenant_id: Uuid) -> Result<(), JobError> {
        let tenant = self
            .tenants
            .ensure_state(tenant_id, &[TenantState::Deleting], "delete")?;
        self.audit_tenant(
            actor,
            AuditAction::Delete,
            tenant_id,
            json!({ "status": "deletion_started", "db_name": tenant.db_name }),
        );

        match self.provisioner.delete_tenant(tenant_id).await {
            Ok(()) => {
                self.tenants.complete_delete(tenant_id)?;
                self.audit_tenant(
                    actor,
                    AuditAction::Delete,
                    tenant_id,
                    json!({ "status": "deletion_completed" }),
                );
                metrics::counter!("tenants.deleted").increment(1);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let restored = self.tenants.fail_delete(tenant_id, &message)?;
                self.audit_tenant(
                    actor,
                    AuditAction::Delete,
                    tenant_id,
                    json!({
                        "status": "deletion_failed",
                        "error": message,
                        "restored_state": restored.state,
                    }),
                );
                Err(e.into())
            }
        }
    }

    async fn install_module(&self, actor: &Actor, tenant_id: Uuid, module: &str) -> Result<(), JobError> {
        self.tenants
            .ensure_state(tenant_id, &[TenantState::Active], "install a module on")?;
        self.audit_tenant(
            actor,
            AuditAction::ModuleInstall,
            tenant_id,
            json!({ "module": module, "status": "started" }),
        );

        match self.provisioner.install_module(tenant_id, module).await {
            Ok(()) => {
                self.tenants.mark_module_installed(tenant_id, module)?;
                self.audit_tenant(
                    actor,
                    AuditAction::ModuleInstall,
                    tenant_id,
                    json!({ "module": module, "status": "completed" }),
                );
                info!(tenant_id = %tenant_id, module, "Module installed");
                Ok(())
            }
            Err(e) => {
                self.audit_tenant(
                    actor,
                    AuditAction::ModuleInstall,
                    tenant_id,
                    json!({ "module": module, "status": "failed", "error": e.to_string() }),
                );
                Err(e.into())
            }
        }
    }

    async fn uninstall_module(&self, actor: &Actor, tenant_id: Uuid, module: &str) -> Result<(), JobError> {
        self.tenants
            .ensure_state(tenant_id, &[TenantState::Active], "uninstall a module from")?;
        self.audit_tenant(
            actor,
            AuditAction::ModuleUninstall,
            tenant_id,
            json!({ "module": module, "status": "started" }),
        );

        match self.provisioner.uninstall_module(tenant_id, module).await {
            Ok(()) => {
                self.tenants.mark_module_uninstalled(tenant_id, module)?;
                self.audit_tenant(
                    actor,
                    AuditAction::ModuleUninstall,
                    tenant_id,
                    json!({ "module": module, "status": "completed" }),
                );
                info!(tenant_id = %tenant_id, module, "Module uninstalled");
                Ok(())
            }
            Err(e) => {
                self.audit_tenant(
                    actor,
                    AuditAction::ModuleUninstall,
                    tenant_id,
                    json!({ "module": module, "status": "failed", "error": e.to_string() }),
                );
                Err(e.into())
            }
        }
    }

    /// Take a full backup. Returns the catalog record id.
    pub async fn backup(&self, actor: &Actor, tenant_id: Uuid) -> Result<Uuid, JobError> {
        self.tenants
            .ensure_state(tenant_id, &[TenantState::Active], "back up")?;
        let record = self.backups.start(tenant_id, BackupType::Full);
        self.backups.mark_running(record.id)?;
        self.audit_tenant(
            actor,
            AuditAction::Backup,
            tenant_id,
            json!({ "backup_id": record.id, "status": "started" }),
        );

        match self.provisioner.backup_tenant(tenant_id).await {
            Ok(artifact) => {
                let done = self.backups.complete(record.id, &artifact)?;
                if let Some(at) = done.completed_at {
                    self.tenants.record_backup(tenant_id, at)?;
                }
                self.audit_tenant(
                    actor,
                    AuditAction::Backup,
                    tenant_id,
                    json!({
                        "backup_id": record.id,
                        "status": "completed",
                        "size_bytes": done.size_bytes,
                    }),
                );
                metrics::counter!("backups.completed").increment(1);
                Ok(record.id)
            }
            Err(e) => {
                let message = e.to_string();
                self.backups.fail(record.id, &message)?;
                self.audit_tenant(
                    actor,
                    AuditAction::Backup,
                    tenant_id,
                    json!({ "backup_id": record.id, "status": "failed", "error": message }),
                );
                metrics::counter!("backups.failed").increment(1);
                Err(e.into())
            }
        }
    }

    async fn restore(&self, actor: &Actor, tenant_id: Uuid, backup_id: Uuid) -> Result<(), JobError> {
        self.tenants.ensure_state(
            tenant_id,
            &[TenantState::Active, TenantState::Suspended],
            "restore",
        )?;
        let record = self.backups.get(backup_id).ok_or(BackupError::NotFound)?;
        if record.tenant_id != tenant_id {
            return Err(JobError::ForeignBackup {
                backup_id,
                tenant_id,
            });
        }
        if record.status != BackupStatus::Completed {
            return Err(BackupError::NotCompleted.into());
        }

        self.audit_tenant(
            actor,
            AuditAction::Restore,
            tenant_id,
            json!({ "backup_id": backup_id, "status": "started" }),
        );

        let result = async {
            self.backups
                .verify_integrity(&record, self.provisioner.as_ref())
                .await?;
            let location = record.location.as_deref().ok_or(BackupError::NotCompleted)?;
            self.provisioner.restore_tenant(tenant_id, location).await?;
            Ok::<(), JobError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.audit_tenant(
                    actor,
                    AuditAction::Restore,
                    tenant_id,
                    json!({ "backup_id": backup_id, "status": "completed" }),
                );
                info!(tenant_id = %tenant_id, backup_id = %backup_id, "Tenant restored");
                Ok(())
            }
            Err(e) => {
                self.audit_tenant(
                    actor,
                    AuditAction::Restore,
                    tenant_id,
                    json!({ "backup_id": backup_id, "status": "failed", "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CapturingNotifier;
    use saas_ops::provisioner::{InMemoryProvisioner, ProvisionOp};
    use saas_platform::audit::AuditFilter;
    use saas_platform::tenancy::NewTenant;
    use saas_core::types::PageRequest;

    struct Fixture {
        tenants: Arc<TenantManager>,
        audit: Arc<AuditLog>,
        backups: Arc<BackupCatalog>,
        odoo: Arc<InMemoryProvisioner>,
        notifier: Arc<CapturingNotifier>,
        jobs: TenantJobs,
    }

    fn fixture() -> Fixture {
        let tenants = Arc::new(TenantManager::default());
        let audit = Arc::new(AuditLog::new());
        let backups = Arc::new(BackupCatalog::new(30));
        let odoo = Arc::new(InMemoryProvisioner::new());
        let notifier = Arc::new(CapturingNotifier::new());
        let jobs = TenantJobs::new(
            tenants.clone(),
            audit.clone(),
            backups.clone(),
            odoo.clone(),
            notifier.clone(),
        );
        Fixture {
            tenants,
            audit,
            backups,
            odoo,
            notifier,
            jobs,
        }
    }

    fn job(kind: JobKind) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind,
            actor: Actor::system(),
        }
    }

    fn new_tenant(f: &Fixture, slug: &str) -> Uuid {
        f.tenants
            .create(
                NewTenant {
                    customer_id: Uuid::new_v4(),
                    plan_id: Uuid::new_v4(),
                    name: "Acme Corp".into(),
                    slug: slug.into(),
                    custom_domain: None,
                },
                5,
            )
            .unwrap()
            .id
    }

    async fn active_tenant(f: &Fixture, slug: &str) -> Uuid {
        let id = new_tenant(f, slug);
        f.jobs.run(&job(JobKind::Provision { tenant_id: id })).await.unwrap();
        id
    }

    fn statuses(f: &Fixture, action: AuditAction, tenant_id: Uuid) -> Vec<String> {
        let filter = AuditFilter {
            action: Some(action),
            resource_id: Some(tenant_id.to_string()),
            order_dir: saas_core::types::SortDirection::Asc,
            ..Default::default()
        };
        f.audit
            .query(&filter, PageRequest::new(1, 100))
            .items
            .into_iter()
            .filter_map(|e| e.new_values)
            .filter_map(|v| v["status"].as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_provision_activates_and_welcomes() {
        let f = fixture();
        let id = active_tenant(&f, "acme").await;

        assert_eq!(f.tenants.get(id).unwrap().state, TenantState::Active);
        assert!(f.odoo.has_tenant(id));
        assert_eq!(f.notifier.count_kind("welcome"), 1);
        assert_eq!(
            statuses(&f, AuditAction::Create, id),
            vec!["provisioning_started", "provisioning_completed"]
        );
    }

    #[tokio::test]
    async fn test_provision_failure_moves_to_error() {
        let f = fixture();
        f.odoo.fail_on(ProvisionOp::Create);
        let id = new_tenant(&f, "broken");

        let result = f.jobs.run(&job(JobKind::Provision { tenant_id: id })).await;
        assert!(matches!(result, Err(JobError::Provision(_))));

        let tenant = f.tenants.get(id).unwrap();
        assert_eq!(tenant.state, TenantState::Error);
        assert!(tenant.state_message.unwrap().contains("simulated"));
        assert_eq!(f.notifier.count(), 0);
        assert_eq!(
            statuses(&f, AuditAction::Create, id),
            vec!["provisioning_started", "provisioning_failed"]
        );
    }

    #[tokio::test]
    async fn test_delete_success_and_rollback() {
        let f = fixture();
        let id = active_tenant(&f, "gone").await;

        f.odoo.fail_on(ProvisionOp::Delete);
        f.tenants.begin_delete(id).unwrap();
        assert!(f.jobs.run(&job(JobKind::Delete { tenant_id: id })).await.is_err());
        let tenant = f.tenants.get(id).unwrap();
        assert_eq!(tenant.state, TenantState::Active);
        assert!(tenant.state_message.is_some());

        f.odoo.clear_failures();
        f.tenants.begin_delete(id).unwrap();
        f.jobs.run(&job(JobKind::Delete { tenant_id: id })).await.unwrap();
        assert_eq!(f.tenants.get(id).unwrap().state, TenantState::Deleted);
        assert!(!f.odoo.has_tenant(id));
        assert_eq!(
            statuses(&f, AuditAction::Delete, id),
            vec!["deletion_started", "deletion_failed", "deletion_started", "deletion_completed"]
        );
    }

    #[tokio::test]
    async fn test_module_jobs_require_active_tenant() {
        let f = fixture();
        let id = active_tenant(&f, "mods").await;

        let install = JobKind::InstallModule {
            tenant_id: id,
            module: "sale".into(),
        };
        f.jobs.run(&job(install.clone())).await.unwrap();
        assert!(f.tenants.get(id).unwrap().has_module("sale"));
        assert!(f.odoo.modules(id).contains(&"sale".to_string()));

        f.jobs
            .run(&job(JobKind::UninstallModule {
                tenant_id: id,
                module: "sale".into(),
            }))
            .await
            .unwrap();
        assert!(!f.tenants.get(id).unwrap().has_module("sale"));

        f.tenants
            .suspend(id, saas_core::types::SuspensionReason::Admin)
            .unwrap();
        assert!(matches!(
            f.jobs.run(&job(install)).await,
            Err(JobError::Tenant(TenantError::InvalidTransition { .. }))
        ));
    }

    #[tokio::test]
    async fn test_backup_then_restore() {
        let f = fixture();
        let id = active_tenant(&f, "safe").await;

        let backup_id = f.jobs.backup(&Actor::system(), id).await.unwrap();
        let record = f.backups.get(backup_id).unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert!(f.tenants.get(id).unwrap().last_backup_at.is_some());

        f.jobs
            .run(&job(JobKind::Restore {
                tenant_id: id,
                backup_id,
            }))
            .await
            .unwrap();
        assert_eq!(f.odoo.last_restore(id), record.location);
        assert_eq!(
            statuses(&f, AuditAction::Restore, id),
            vec!["started", "completed"]
        );
    }

    #[tokio::test]
    async fn test_restore_rejects_corrupt_or_foreign_backup() {
        let f = fixture();
        let id = active_tenant(&f, "first").await;
        let other = active_tenant(&f, "second").await;
        let backup_id = f.jobs.backup(&Actor::system(), id).await.unwrap();

        assert!(matches!(
            f.jobs
                .run(&job(JobKind::Restore {
                    tenant_id: other,
                    backup_id,
                }))
                .await,
            Err(JobError::ForeignBackup { .. })
        ));

        let location = f.backups.get(backup_id).unwrap().location.unwrap();
        f.odoo.corrupt_artifact(&location);
        assert!(matches!(
            f.jobs
                .run(&job(JobKind::Restore {
                    tenant_id: id,
                    backup_id,
                }))
                .await,
            Err(JobError::Backup(BackupError::ChecksumMismatch { .. }))
        ));
        assert!(f.odoo.last_restore(id).is_none());
        assert_eq!(
            statuses(&f, AuditAction::Restore, id),
            vec!["started", "failed"]
        );
    }

    #[tokio::test]
    async fn test_failed_backup_is_recorded() {
        let f = fixture();
        let id = active_tenant(&f, "flaky").await;
        f.odoo.fail_on(ProvisionOp::Backup);

        assert!(f.jobs.backup(&Actor::system(), id).await.is_err());
        let records = f.backups.list_for_tenant(id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BackupStatus::Failed);
        assert!(f.tenants.get(id).unwrap().last_backup_at.is_none());
    }

    #[tokio::test]
    async fn test_suspended_tenant_backup_rejected() {
        let f = fixture();
        let id = active_tenant(&f, "paused").await;
        f.tenants
            .suspend(id, saas_core::types::SuspensionReason::Admin)
            .unwrap();

        let result = f.jobs.backup(&Actor::system(), id).await;
        assert!(matches!(
            result,
            Err(JobError::Tenant(TenantError::InvalidTransition { .. }))
        ));
        assert!(f.backups.list_for_tenant(id).is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_jobs_are_compensated() {
        let f = fixture();
        let creating = new_tenant(&f, "stalled");
        f.jobs.abandon(
            &job(JobKind::Provision { tenant_id: creating }),
            "Job timed out after 1s",
        );
        assert_eq!(f.tenants.get(creating).unwrap().state, TenantState::Error);
        assert_eq!(
            statuses(&f, AuditAction::Create, creating),
            vec!["provisioning_failed"]
        );

        let id = active_tenant(&f, "busy").await;
        let record = f.backups.start(id, BackupType::Full);
        f.backups.mark_running(record.id).unwrap();
        f.jobs.abandon(&job(JobKind::Backup { tenant_id: id }), "Job timed out after 1s");
        assert_eq!(f.backups.get(record.id).unwrap().status, BackupStatus::Failed);

        f.tenants.begin_delete(id).unwrap();
        f.jobs.abandon(&job(JobKind::Delete { tenant_id: id }), "Job timed out after 1s");
        assert_eq!(f.tenants.get(id).unwrap().state, TenantState::Active);
        assert_eq!(
            statuses(&f, AuditAction::Delete, id),
            vec!["deletion_failed"]
        );
    }
}
