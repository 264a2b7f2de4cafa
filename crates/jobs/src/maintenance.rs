//! Periodic housekeeping run by the binary on fixed intervals.

use chrono::{Duration, Utc};
use saas_billing::plans::PlanCatalog;
use saas_billing::webhooks::WebhookProcessor;
use saas_core::config::QuotaConfig;
use saas_core::types::{Actor, SuspensionReason, TenantState};
use saas_ops::backup::BackupCatalog;
use saas_ops::provisioner::OdooProvisioner;
use saas_platform::auth::AuthManager;
use saas_platform::rate_limit::RateLimiter;
use saas_platform::tenancy::{TenantManager, UsageSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::lifecycle::TenantLifecycle;
use crate::notify::Notification;
use crate::queue::{JobKind, JobQueue};

/// Webhook event ids are remembered for longer than Stripe and Paddle keep
/// retrying a delivery.
const WEBHOOK_CLAIM_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub checked: usize,
    pub over_quota: usize,
    pub suspended: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub revoked_tokens: usize,
    pub job_records: usize,
    pub rate_limit_windows: usize,
    pub webhook_claims: usize,
}

pub struct Maintenance {
    tenants: Arc<TenantManager>,
    plans: Arc<PlanCatalog>,
    backups: Arc<BackupCatalog>,
    provisioner: Arc<dyn OdooProvisioner>,
    lifecycle: Arc<TenantLifecycle>,
    queue: Arc<JobQueue>,
    auth: Arc<AuthManager>,
    rate_limiter: Arc<RateLimiter>,
    webhooks: Arc<WebhookProcessor>,
    quota: QuotaConfig,
    result_ttl: Duration,
}

impl Maintenance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<TenantManager>,
        plans: Arc<PlanCatalog>,
        backups: Arc<BackupCatalog>,
        provisioner: Arc<dyn OdooProvisioner>,
        lifecycle: Arc<TenantLifecycle>,
        queue: Arc<JobQueue>,
        auth: Arc<AuthManager>,
        rate_limiter: Arc<RateLimiter>,
        webhooks: Arc<WebhookProcessor>,
        quota: QuotaConfig,
        result_ttl_secs: i64,
    ) -> Self {
        Self {
            tenants,
            plans,
            backups,
            provisioner,
            lifecycle,
            queue,
            auth,
            rate_limiter,
            webhooks,
            quota,
            result_ttl: Duration::seconds(result_ttl_secs),
        }
    }

    /// Read usage for every active tenant and enforce plan storage limits.
    pub async fn collect_usage(&self) -> UsageReport {
        let mut report = UsageReport::default();
        let system = Actor::system();

        for tenant in self.tenants.list_in_state(TenantState::Active) {
            report.checked += 1;
            let usage = match self.provisioner.tenant_stats(tenant.id).await {
                Ok(usage) => usage,
                Err(e) => {
                    report.errors += 1;
                    warn!(tenant_id = %tenant.id, error = %e, "Usage collection failed");
                    continue;
                }
            };
            let tenant = match self.tenants.record_usage(
                tenant.id,
                UsageSnapshot {
                    db_size_bytes: usage.db_size_bytes,
                    filestore_size_bytes: usage.filestore_size_bytes,
                    users_count: usage.users_count,
                },
            ) {
                Ok(t) => t,
                Err(e) => {
                    report.errors += 1;
                    warn!(tenant_id = %tenant.id, error = %e, "Could not record usage");
                    continue;
                }
            };

            let Some(plan) = self.plans.get(tenant.plan_id) else {
                continue;
            };
            let quota = plan.quota();
            if !tenant.exceeds_quota(&quota) {
                continue;
            }

            report.over_quota += 1;
            metrics::counter!("tenants.over_quota").increment(1);
            warn!(
                tenant_id = %tenant.id,
                db_size_bytes = tenant.db_size_bytes,
                filestore_size_bytes = tenant.filestore_size_bytes,
                plan = %plan.name,
                "Tenant exceeds storage quota"
            );

            let notification = Notification::QuotaExceeded {
                customer_id: tenant.customer_id,
                tenant_id: tenant.id,
                usage: tenant.usage_percentages(&quota),
            };
            if let Err(e) = self.queue.enqueue(JobKind::Notify(notification), system.clone()) {
                warn!(tenant_id = %tenant.id, error = %e, "Could not queue quota notification");
            }

            if self.quota.suspend_on_exceed {
                match self
                    .lifecycle
                    .suspend_tenant(&system, tenant.id, SuspensionReason::Quota)
                {
                    Ok(_) => report.suspended += 1,
                    Err(e) => warn!(tenant_id = %tenant.id, error = %e, "Quota suspension failed"),
                }
            }
        }

        info!(
            checked = report.checked,
            over_quota = report.over_quota,
            suspended = report.suspended,
            errors = report.errors,
            "Usage collection finished"
        );
        report
    }

    /// Delete artifacts of backups past retention. Artifacts that fail to
    /// delete stay `completed` and are retried on the next run.
    pub async fn cleanup_backups(&self) -> usize {
        let mut removed = 0;
        for record in self.backups.expired(Utc::now()) {
            if let Some(location) = record.location.as_deref() {
                if let Err(e) = self.provisioner.delete_backup(location).await {
                    warn!(backup_id = %record.id, error = %e, "Backup artifact cleanup failed");
                    continue;
                }
            }
            if self.backups.mark_expired(record.id).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Expired backups cleaned up");
        }
        removed
    }

    pub fn purge(&self) -> PurgeReport {
        let report = PurgeReport {
            revoked_tokens: self.auth.purge_expired(),
            job_records: self.queue.purge_finished(self.result_ttl),
            rate_limit_windows: self.rate_limiter.purge_stale(),
            webhook_claims: self
                .webhooks
                .purge_claims(Duration::days(WEBHOOK_CLAIM_RETENTION_DAYS)),
        };
        info!(
            revoked_tokens = report.revoked_tokens,
            job_records = report.job_records,
            rate_limit_windows = report.rate_limit_windows,
            webhook_claims = report.webhook_claims,
            "Purge finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TenantRequest;
    use saas_billing::plans::NewPlan;
    use saas_billing::subscriptions::SubscriptionLedger;
    use saas_core::config::{AuthConfig, BillingConfig};
    use saas_core::types::BillingProvider;
    use saas_ops::backup::{BackupStatus, BackupType};
    use saas_ops::provisioner::{
        BackupArtifact, InMemoryProvisioner, ProvisionOp, TenantSpec, TenantUsage,
    };
    use saas_platform::audit::AuditLog;
    use saas_platform::customers::{CustomerDirectory, NewCustomer};
    use uuid::Uuid;

    const GB: u64 = 1024 * 1024 * 1024;

    struct Fixture {
        tenants: Arc<TenantManager>,
        plans: Arc<PlanCatalog>,
        backups: Arc<BackupCatalog>,
        odoo: Arc<InMemoryProvisioner>,
        queue: Arc<JobQueue>,
        lifecycle: Arc<TenantLifecycle>,
        webhooks: Arc<WebhookProcessor>,
        customer_id: Uuid,
        plan_id: Uuid,
    }

    fn fixture() -> Fixture {
        let tenants = Arc::new(TenantManager::default());
        let customers = Arc::new(CustomerDirectory::new());
        let plans = Arc::new(PlanCatalog::new());
        let backups = Arc::new(BackupCatalog::new(0));
        let queue = Arc::new(JobQueue::new(64));
        let lifecycle = Arc::new(TenantLifecycle::new(
            tenants.clone(),
            customers.clone(),
            plans.clone(),
            backups.clone(),
            Arc::new(AuditLog::new()),
            queue.clone(),
        ));
        let customer_id = customers
            .create(NewCustomer::new("ops@acme.test", "hash"))
            .unwrap()
            .id;
        let mut plan = NewPlan::named("Tiny");
        plan.max_db_size_gb = 1;
        plan.max_filestore_gb = 1;
        let plan_id = plans.create(plan).unwrap().id;
        let webhooks = Arc::new(WebhookProcessor::new(
            customers,
            plans.clone(),
            Arc::new(SubscriptionLedger::new()),
            BillingConfig::default(),
        ));
        Fixture {
            tenants,
            plans,
            backups,
            odoo: Arc::new(InMemoryProvisioner::new()),
            queue,
            lifecycle,
            webhooks,
            customer_id,
            plan_id,
        }
    }

    fn maintenance(f: &Fixture, suspend_on_exceed: bool) -> Maintenance {
        let auth_config = AuthConfig {
            password_hash_memory_kib: 256,
            password_hash_iterations: 1,
            ..AuthConfig::default()
        };
        Maintenance::new(
            f.tenants.clone(),
            f.plans.clone(),
            f.backups.clone(),
            f.odoo.clone(),
            f.lifecycle.clone(),
            f.queue.clone(),
            Arc::new(AuthManager::new(&auth_config).unwrap()),
            Arc::new(RateLimiter::new(true)),
            f.webhooks.clone(),
            QuotaConfig {
                collect_interval_secs: 60,
                suspend_on_exceed,
            },
            3600,
        )
    }

    async fn active_tenant(f: &Fixture, slug: &str) -> Uuid {
        let (tenant, _) = f
            .lifecycle
            .create_tenant(
                &Actor::system(),
                f.customer_id,
                TenantRequest {
                    name: "Acme".into(),
                    slug: slug.into(),
                    plan_id: f.plan_id,
                    custom_domain: None,
                },
            )
            .unwrap();
        f.odoo
            .create_tenant(&TenantSpec {
                tenant_id: tenant.id,
                db_name: tenant.db_name.clone(),
                slug: tenant.slug.clone(),
                domain: tenant.full_domain.clone(),
                odoo_version: tenant.odoo_version.clone(),
            })
            .await
            .unwrap();
        f.tenants.complete_provisioning(tenant.id).unwrap();
        tenant.id
    }

    #[tokio::test]
    async fn test_collect_usage_records_and_flags() {
        let f = fixture();
        let small = active_tenant(&f, "small").await;
        let big = active_tenant(&f, "big").await;
        f.odoo.set_usage(
            big,
            TenantUsage {
                db_size_bytes: 2 * GB,
                filestore_size_bytes: 0,
                users_count: 3,
            },
        );

        let report = maintenance(&f, false).collect_usage().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.over_quota, 1);
        assert_eq!(report.suspended, 0);

        assert_eq!(f.tenants.get(small).unwrap().current_users, 1);
        assert_eq!(f.tenants.get(big).unwrap().db_size_bytes, 2 * GB);
        assert_eq!(f.tenants.get(big).unwrap().state, TenantState::Active);
        assert_eq!(f.tenants.usage_history(big).len(), 1);
        // Two provisioning jobs plus one quota notification.
        assert_eq!(f.queue.info().total_queued, 3);
    }

    #[tokio::test]
    async fn test_collect_usage_suspends_when_configured() {
        let f = fixture();
        let big = active_tenant(&f, "heavy").await;
        f.odoo.set_usage(
            big,
            TenantUsage {
                db_size_bytes: 0,
                filestore_size_bytes: 3 * GB,
                users_count: 1,
            },
        );

        let report = maintenance(&f, true).collect_usage().await;
        assert_eq!(report.suspended, 1);
        let tenant = f.tenants.get(big).unwrap();
        assert_eq!(tenant.state, TenantState::Suspended);
        assert_eq!(tenant.suspension_reason, Some(SuspensionReason::Quota));
    }

    #[tokio::test]
    async fn test_collect_usage_counts_errors() {
        let f = fixture();
        active_tenant(&f, "quiet").await;
        f.odoo.fail_on(ProvisionOp::Stats);
        let report = maintenance(&f, false).collect_usage().await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.over_quota, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired_backups() {
        let f = fixture();
        let tenant_id = active_tenant(&f, "archive").await;
        let artifact: BackupArtifact = f.odoo.backup_tenant(tenant_id).await.unwrap();
        let record = f.backups.start(tenant_id, BackupType::Full);
        f.backups.complete(record.id, &artifact).unwrap();

        // Retention is zero days, so the record is already due.
        let removed = maintenance(&f, false).cleanup_backups().await;
        assert_eq!(removed, 1);
        assert!(!f.odoo.artifact_exists(&artifact.location));
        assert_eq!(f.backups.get(record.id).unwrap().status, BackupStatus::Expired);
    }

    #[tokio::test]
    async fn test_cleanup_retries_failed_deletes() {
        let f = fixture();
        let tenant_id = active_tenant(&f, "sticky").await;
        let artifact = f.odoo.backup_tenant(tenant_id).await.unwrap();
        let record = f.backups.start(tenant_id, BackupType::Full);
        f.backups.complete(record.id, &artifact).unwrap();

        f.odoo.fail_on(ProvisionOp::DeleteBackup);
        let maintenance = maintenance(&f, false);
        assert_eq!(maintenance.cleanup_backups().await, 0);
        assert_eq!(f.backups.get(record.id).unwrap().status, BackupStatus::Completed);

        f.odoo.clear_failures();
        assert_eq!(maintenance.cleanup_backups().await, 1);
    }

    #[test]
    fn test_purge_drops_old_job_records() {
        let f = fixture();
        let job = f
            .queue
            .enqueue(
                JobKind::Backup {
                    tenant_id: Uuid::new_v4(),
                },
                Actor::system(),
            )
            .unwrap();
        f.queue.mark_finished(job.id);

        let mut maintenance = maintenance(&f, false);
        assert_eq!(maintenance.purge().job_records, 0);
        maintenance.result_ttl = Duration::seconds(-1);
        assert_eq!(maintenance.purge().job_records, 1);
    }

    #[test]
    fn test_purge_reports_webhook_claims() {
        let f = fixture();
        assert!(f.webhooks.claim(BillingProvider::Stripe, "evt_recent"));

        let report = maintenance(&f, false).purge();
        assert_eq!(report.webhook_claims, 0);
        assert_eq!(f.webhooks.processed_events(), 1);
    }
}
