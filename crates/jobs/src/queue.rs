//! Priority job queue: three bounded tokio mpsc lanes plus a status record
//! per job.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use saas_core::types::Actor;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::notify::Notification;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job queue lane '{0}' is full")]
    Full(Lane),

    #[error("Job queue is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    High,
    Default,
    Low,
}

impl Lane {
    /// Highest priority first.
    pub const ALL: [Lane; 3] = [Lane::High, Lane::Default, Lane::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::High => "high",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Provision { tenant_id: Uuid },
    Delete { tenant_id: Uuid },
    InstallModule { tenant_id: Uuid, module: String },
    UninstallModule { tenant_id: Uuid, module: String },
    Backup { tenant_id: Uuid },
    Restore { tenant_id: Uuid, backup_id: Uuid },
    Notify(Notification),
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Provision { .. } => "provision",
            JobKind::Delete { .. } => "delete",
            JobKind::InstallModule { .. } => "install_module",
            JobKind::UninstallModule { .. } => "uninstall_module",
            JobKind::Backup { .. } => "backup",
            JobKind::Restore { .. } => "restore",
            JobKind::Notify(_) => "notify",
        }
    }

    /// Tenant lifecycle changes jump ahead of routine work, which jumps
    /// ahead of notifications.
    pub fn lane(&self) -> Lane {
        match self {
            JobKind::Provision { .. } | JobKind::Delete { .. } | JobKind::Restore { .. } => {
                Lane::High
            }
            JobKind::InstallModule { .. }
            | JobKind::UninstallModule { .. }
            | JobKind::Backup { .. } => Lane::Default,
            JobKind::Notify(_) => Lane::Low,
        }
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            JobKind::Provision { tenant_id }
            | JobKind::Delete { tenant_id }
            | JobKind::InstallModule { tenant_id, .. }
            | JobKind::UninstallModule { tenant_id, .. }
            | JobKind::Backup { tenant_id }
            | JobKind::Restore { tenant_id, .. } => Some(*tenant_id),
            JobKind::Notify(_) => None,
        }
    }
}

/// A unit of work plus the principal that requested it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub actor: Actor,
}

impl Job {
    pub fn lane(&self) -> Lane {
        self.kind.lane()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: Lane,
    pub kind: String,
    pub tenant_id: Option<Uuid>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LaneInfo {
    pub name: Lane,
    pub queued: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueInfo {
    pub lanes: Vec<LaneInfo>,
    pub total_queued: usize,
}

struct Receivers {
    high: mpsc::Receiver<Job>,
    default: mpsc::Receiver<Job>,
    low: mpsc::Receiver<Job>,
}

impl Receivers {
    fn try_take(&mut self) -> Option<Job> {
        self.high
            .try_recv()
            .or_else(|_| self.default.try_recv())
            .or_else(|_| self.low.try_recv())
            .ok()
    }
}

pub struct JobQueue {
    high: mpsc::Sender<Job>,
    default: mpsc::Sender<Job>,
    low: mpsc::Sender<Job>,
    receivers: tokio::sync::Mutex<Receivers>,
    records: DashMap<Uuid, JobRecord>,
}

impl JobQueue {
    pub fn new(lane_capacity: usize) -> Self {
        let capacity = lane_capacity.max(1);
        let (high, high_rx) = mpsc::channel(capacity);
        let (default, default_rx) = mpsc::channel(capacity);
        let (low, low_rx) = mpsc::channel(capacity);
        Self {
            high,
            default,
            low,
            receivers: tokio::sync::Mutex::new(Receivers {
                high: high_rx,
                default: default_rx,
                low: low_rx,
            }),
            records: DashMap::new(),
        }
    }

    fn sender(&self, lane: Lane) -> &mpsc::Sender<Job> {
        match lane {
            Lane::High => &self.high,
            Lane::Default => &self.default,
            Lane::Low => &self.low,
        }
    }

    /// Queue a job on its lane. The status record exists before a worker can
    /// pick the job up.
    pub fn enqueue(&self, kind: JobKind, actor: Actor) -> Result<JobRecord, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            kind,
            actor,
        };
        let lane = job.lane();
        let record = JobRecord {
            id: job.id,
            queue: lane,
            kind: job.kind.name().to_string(),
            tenant_id: job.kind.tenant_id(),
            status: JobStatus::Queued,
            error: None,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        self.records.insert(record.id, record.clone());

        if let Err(e) = self.sender(lane).try_send(job) {
            self.records.remove(&record.id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full(lane),
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            });
        }

        metrics::counter!("jobs.enqueued", "queue" => lane.as_str()).increment(1);
        debug!(job_id = %record.id, kind = %record.kind, queue = %lane, "Job enqueued");
        Ok(record)
    }

    /// Wait for the next job, always preferring higher lanes. Returns `None`
    /// once shutdown is signalled.
    pub async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Job> {
        if *shutdown.borrow() {
            return None;
        }
        let mut guard = tokio::select! {
            biased;
            _ = shutdown.changed() => return None,
            guard = self.receivers.lock() => guard,
        };
        let rx = &mut *guard;
        tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            Some(job) = rx.high.recv() => Some(job),
            Some(job) = rx.default.recv() => Some(job),
            Some(job) = rx.low.recv() => Some(job),
            else => None,
        }
    }

    /// Take the highest-priority queued job without waiting.
    pub fn try_next(&self) -> Option<Job> {
        self.receivers.try_lock().ok()?.try_take()
    }

    fn modify(&self, id: Uuid, f: impl FnOnce(&mut JobRecord)) -> Option<JobRecord> {
        let mut record = self.records.get_mut(&id)?;
        f(record.value_mut());
        Some(record.clone())
    }

    pub fn mark_started(&self, id: Uuid) -> Option<JobRecord> {
        self.modify(id, |r| {
            r.status = JobStatus::Started;
            r.attempts += 1;
            r.started_at = Some(Utc::now());
        })
    }

    pub fn mark_finished(&self, id: Uuid) -> Option<JobRecord> {
        self.modify(id, |r| {
            r.status = JobStatus::Finished;
            r.error = None;
            r.ended_at = Some(Utc::now());
        })
    }

    pub fn mark_failed(&self, id: Uuid, error: &str) -> Option<JobRecord> {
        self.modify(id, |r| {
            r.status = JobStatus::Failed;
            r.error = Some(error.to_string());
            r.ended_at = Some(Utc::now());
        })
    }

    pub fn status(&self, id: Uuid) -> Option<JobRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn info(&self) -> QueueInfo {
        let mut lanes: Vec<LaneInfo> = Lane::ALL
            .iter()
            .map(|&name| LaneInfo {
                name,
                queued: 0,
                started: 0,
                finished: 0,
                failed: 0,
            })
            .collect();

        for record in self.records.iter() {
            let Some(lane) = lanes.iter_mut().find(|l| l.name == record.queue) else {
                continue;
            };
            match record.status {
                JobStatus::Queued => lane.queued += 1,
                JobStatus::Started => lane.started += 1,
                JobStatus::Finished => lane.finished += 1,
                JobStatus::Failed => lane.failed += 1,
            }
        }

        let total_queued = lanes.iter().map(|l| l.queued).sum();
        QueueInfo {
            lanes,
            total_queued,
        }
    }

    /// Drop finished and failed records that ended more than `ttl` ago.
    pub fn purge_finished(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let before = self.records.len();
        self.records.retain(|_, r| {
            !(matches!(r.status, JobStatus::Finished | JobStatus::Failed)
                && r.ended_at.is_some_and(|at| at < cutoff))
        });
        before - self.records.len()
    }
}
