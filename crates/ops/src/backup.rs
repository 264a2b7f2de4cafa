//! Tenant backup catalog: records, retention, and integrity checks.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::provisioner::{BackupArtifact, OdooProvisioner, ProvisionError};

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found")]
    NotFound,

    #[error("Backup is not completed")]
    NotCompleted,

    #[error("Backup checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    #[default]
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackupRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub size_bytes: u64,
    pub location: Option<String>,
    pub checksum_sha256: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

pub struct BackupCatalog {
    records: DashMap<Uuid, BackupRecord>,
    retention: Duration,
}

impl BackupCatalog {
    pub fn new(retention_days: i64) -> Self {
        info!(retention_days, "Backup catalog initialized");
        Self {
            records: DashMap::new(),
            retention: Duration::days(retention_days),
        }
    }

    pub fn start(&self, tenant_id: Uuid, backup_type: BackupType) -> BackupRecord {
        let record = BackupRecord {
            id: Uuid::new_v4(),
            tenant_id,
            backup_type,
            status: BackupStatus::Pending,
            size_bytes: 0,
            location: None,
            checksum_sha256: None,
            started_at: Utc::now(),
            completed_at: None,
            expires_at: None,
            error_message: None,
            retry_count: 0,
        };
        self.records.insert(record.id, record.clone());
        record
    }

    fn modify(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut BackupRecord),
    ) -> Result<BackupRecord, BackupError> {
        let mut record = self.records.get_mut(&id).ok_or(BackupError::NotFound)?;
        f(record.value_mut());
        Ok(record.clone())
    }

    pub fn mark_running(&self, id: Uuid) -> Result<BackupRecord, BackupError> {
        self.modify(id, |r| r.status = BackupStatus::Running)
    }

    pub fn complete(&self, id: Uuid, artifact: &BackupArtifact) -> Result<BackupRecord, BackupError> {
        let now = Utc::now();
        let retention = self.retention;
        let record = self.modify(id, |r| {
            r.status = BackupStatus::Completed;
            r.size_bytes = artifact.size_bytes;
            r.location = Some(artifact.location.clone());
            r.checksum_sha256 = Some(artifact.checksum_sha256.clone());
            r.completed_at = Some(now);
            r.expires_at = Some(now + retention);
            r.error_message = None;
        })?;
        info!(
            backup_id = %id,
            tenant_id = %record.tenant_id,
            size_bytes = record.size_bytes,
            "Backup completed"
        );
        Ok(record)
    }

    pub fn fail(&self, id: Uuid, message: &str) -> Result<BackupRecord, BackupError> {
        let record = self.modify(id, |r| {
            r.status = BackupStatus::Failed;
            r.error_message = Some(message.to_string());
            r.retry_count += 1;
        })?;
        warn!(backup_id = %id, tenant_id = %record.tenant_id, error = message, "Backup failed");
        Ok(record)
    }

    pub fn get(&self, id: Uuid) -> Option<BackupRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    /// Newest first.
    pub fn list_for_tenant(&self, tenant_id: Uuid) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    pub fn latest_completed(&self, tenant_id: Uuid) -> Option<BackupRecord> {
        self.list_for_tenant(tenant_id)
            .into_iter()
            .find(|r| r.status == BackupStatus::Completed)
    }

    /// Completed backups whose retention has run out.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<BackupRecord> {
        self.records
            .iter()
            .filter(|r| r.status == BackupStatus::Completed && r.expires_at.is_some_and(|at| at <= now))
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn mark_expired(&self, id: Uuid) -> Result<BackupRecord, BackupError> {
        self.modify(id, |r| r.status = BackupStatus::Expired)
    }

    /// Compare the recorded checksum against the stored artifact.
    pub async fn verify_integrity(
        &self,
        record: &BackupRecord,
        provisioner: &dyn OdooProvisioner,
    ) -> Result<(), BackupError> {
        let (Some(location), Some(expected)) = (&record.location, &record.checksum_sha256) else {
            return Err(BackupError::NotCompleted);
        };
        let actual = provisioner.artifact_checksum(location).await?;
        if &actual != expected {
            warn!(backup_id = %record.id, "Backup checksum mismatch");
            return Err(BackupError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
