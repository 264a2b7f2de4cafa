//! Worker pool: spawns and supervises N job workers sharing one queue.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::handlers::{JobError, TenantJobs};
use crate::queue::{Job, JobQueue};

/// Runs one job at a time against the handlers, keeping the queue's status
/// records in step.
pub struct JobExecutor {
    queue: Arc<JobQueue>,
    jobs: Arc<TenantJobs>,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(queue: Arc<JobQueue>, jobs: Arc<TenantJobs>, timeout_secs: u64) -> Self {
        Self {
            queue,
            jobs,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub async fn execute(&self, job: Job) -> Result<(), JobError> {
        let lane = job.lane().as_str();
        let kind = job.kind.name();
        self.queue.mark_started(job.id);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.jobs.run(&job)).await {
            Ok(result) => result,
            Err(_) => {
                let err = JobError::Timeout(self.timeout.as_secs());
                self.jobs.abandon(&job, &err.to_string());
                Err(err)
            }
        };
        metrics::histogram!("jobs.duration_seconds", "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(()) => {
                self.queue.mark_finished(job.id);
                metrics::counter!("jobs.completed", "queue" => lane).increment(1);
                info!(job_id = %job.id, kind, queue = lane, "Job finished");
            }
            Err(e) => {
                self.queue.mark_failed(job.id, &e.to_string());
                metrics::counter!("jobs.failed", "queue" => lane).increment(1);
                warn!(job_id = %job.id, kind, queue = lane, error = %e, "Job failed");
            }
        }
        result
    }

    /// Run every job already queued, in priority order, on the current task.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(job) = self.queue.try_next() {
            let _ = self.execute(job).await;
            processed += 1;
        }
        processed
    }
}

/// Manages the lifecycle of all job workers in this process.
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            executor,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self, workers: usize) {
        for i in 0..workers.max(1) {
            let worker_id = format!("worker-{i:02}");
            let executor = self.executor.clone();
            let mut shutdown = self.shutdown.subscribe();

            let handle = tokio::spawn(async move {
                info!(worker_id = %worker_id, "Job worker started");
                while let Some(job) = executor.queue().next(&mut shutdown).await {
                    let _ = executor.execute(job).await;
                }
                info!(worker_id = %worker_id, "Job worker stopped");
            });
            self.handles.push(handle);
        }
        info!(count = self.handles.len(), "All job workers spawned");
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Ask workers to stop after their current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for all workers to complete.
    pub async fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Job worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{CapturingNotifier, Notification};
    use crate::queue::{JobKind, JobStatus};
    use saas_core::types::Actor;
    use saas_ops::backup::BackupCatalog;
    use saas_core::types::TenantState;
    use saas_ops::provisioner::{InMemoryProvisioner, ProvisionOp};
    use saas_platform::audit::AuditLog;
    use saas_platform::tenancy::{NewTenant, TenantManager};
    use uuid::Uuid;

    fn executor(notifier: Arc<CapturingNotifier>) -> Arc<JobExecutor> {
        let jobs = TenantJobs::new(
            Arc::new(TenantManager::default()),
            Arc::new(AuditLog::new()),
            Arc::new(BackupCatalog::new(30)),
            Arc::new(InMemoryProvisioner::new()),
            notifier,
        );
        Arc::new(JobExecutor::new(Arc::new(JobQueue::new(32)), Arc::new(jobs), 5))
    }

    fn welcome() -> JobKind {
        JobKind::Notify(Notification::Welcome {
            customer_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            domain: "acme.local".into(),
        })
    }

    #[tokio::test]
    async fn test_drain_records_outcomes() {
        let notifier = Arc::new(CapturingNotifier::new());
        let executor = executor(notifier.clone());
        let ok = executor.queue().enqueue(welcome(), Actor::system()).unwrap();
        let missing = executor
            .queue()
            .enqueue(
                JobKind::Provision {
                    tenant_id: Uuid::new_v4(),
                },
                Actor::system(),
            )
            .unwrap();

        assert_eq!(executor.drain().await, 2);
        assert_eq!(notifier.count(), 1);
        assert_eq!(executor.queue().status(ok.id).unwrap().status, JobStatus::Finished);

        let failed = executor.queue().status(missing.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Tenant not found"));
    }

    #[tokio::test]
    async fn test_pool_processes_and_shuts_down() {
        let notifier = Arc::new(CapturingNotifier::new());
        let executor = executor(notifier.clone());
        let mut pool = WorkerPool::new(executor.clone());
        pool.start(3);
        assert_eq!(pool.worker_count(), 3);

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(executor.queue().enqueue(welcome(), Actor::system()).unwrap().id);
        }

        for _ in 0..200 {
            if notifier.count() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(notifier.count(), 5);

        pool.shutdown();
        pool.wait().await;
        assert_eq!(pool.worker_count(), 0);
        for id in ids {
            assert_eq!(executor.queue().status(id).unwrap().status, JobStatus::Finished);
        }
    }

    #[tokio::test]
    async fn test_timed_out_jobs_roll_back_tenant_state() {
        let tenants = Arc::new(TenantManager::default());
        let odoo = Arc::new(InMemoryProvisioner::new());
        let jobs = TenantJobs::new(
            tenants.clone(),
            Arc::new(AuditLog::new()),
            Arc::new(BackupCatalog::new(30)),
            odoo.clone(),
            Arc::new(CapturingNotifier::new()),
        );
        let executor = JobExecutor::new(Arc::new(JobQueue::new(32)), Arc::new(jobs), 1);
        let tenant = tenants
            .create(
                NewTenant {
                    customer_id: Uuid::new_v4(),
                    plan_id: Uuid::new_v4(),
                    name: "Slow Corp".into(),
                    slug: "slow".into(),
                    custom_domain: None,
                },
                5,
            )
            .unwrap();

        odoo.stall_on(ProvisionOp::Create, Duration::from_secs(5));
        let provision = executor
            .queue()
            .enqueue(JobKind::Provision { tenant_id: tenant.id }, Actor::system())
            .unwrap();
        assert_eq!(executor.drain().await, 1);

        let stuck = tenants.get(tenant.id).unwrap();
        assert_eq!(stuck.state, TenantState::Error);
        assert!(stuck.state_message.unwrap().contains("timed out"));
        let record = executor.queue().status(provision.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Job timed out after 1s"));

        // The operator can retry once the provisioner recovers.
        tenants.retry_provisioning(tenant.id).unwrap();
        odoo.stall_on(ProvisionOp::Create, Duration::ZERO);
        executor
            .queue()
            .enqueue(JobKind::Provision { tenant_id: tenant.id }, Actor::system())
            .unwrap();
        executor.drain().await;
        assert_eq!(tenants.get(tenant.id).unwrap().state, TenantState::Active);

        // A delete that never returns puts the tenant back where it was.
        odoo.stall_on(ProvisionOp::Delete, Duration::from_secs(5));
        tenants.begin_delete(tenant.id).unwrap();
        executor
            .queue()
            .enqueue(JobKind::Delete { tenant_id: tenant.id }, Actor::system())
            .unwrap();
        executor.drain().await;
        assert_eq!(tenants.get(tenant.id).unwrap().state, TenantState::Active);
    }
}
