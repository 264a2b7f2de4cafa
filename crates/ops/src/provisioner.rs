//! Seam between the control plane and the Odoo service that owns tenant
//! databases, filestores, and dumps.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use saas_core::config::OdooConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Odoo service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Tenant database not found")]
    TenantNotFound,

    #[error("Backup artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Odoo service unreachable: {0}")]
    Transport(String),

    #[error("Invalid response from Odoo service: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProvisionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProvisionError::InvalidResponse(e.to_string())
        } else {
            ProvisionError::Transport(e.to_string())
        }
    }
}

/// What the Odoo service needs to create a tenant database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    pub tenant_id: Uuid,
    pub db_name: String,
    pub slug: String,
    pub domain: String,
    pub odoo_version: String,
}

/// A finished database dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub location: String,
    pub size_bytes: u64,
    pub checksum_sha256: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantUsage {
    pub db_size_bytes: u64,
    pub filestore_size_bytes: u64,
    pub users_count: u32,
}

#[async_trait]
pub trait OdooProvisioner: Send + Sync {
    async fn create_tenant(&self, spec: &TenantSpec) -> Result<(), ProvisionError>;

    async fn delete_tenant(&self, tenant_id: Uuid) -> Result<(), ProvisionError>;

    async fn install_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError>;

    async fn uninstall_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError>;

    async fn backup_tenant(&self, tenant_id: Uuid) -> Result<BackupArtifact, ProvisionError>;

    async fn restore_tenant(&self, tenant_id: Uuid, location: &str) -> Result<(), ProvisionError>;

    async fn tenant_stats(&self, tenant_id: Uuid) -> Result<TenantUsage, ProvisionError>;

    async fn delete_backup(&self, location: &str) -> Result<(), ProvisionError>;

    /// Current SHA-256 of a stored artifact.
    async fn artifact_checksum(&self, location: &str) -> Result<String, ProvisionError>;
}

// ── HTTP client ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ServiceError {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChecksumResponse {
    checksum_sha256: String,
}

#[derive(Debug, Serialize)]
struct RestoreRequest<'a> {
    location: &'a str,
}

/// Talks to the Odoo service over HTTP.
pub struct HttpOdooProvisioner {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpOdooProvisioner {
    pub fn new(config: &OdooConfig) -> Result<Self, ProvisionError> {
        let mut raw = config.service_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| ProvisionError::Transport(format!("invalid service url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(url = %base_url, timeout_secs = config.timeout_secs, "Odoo service client ready");
        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> Result<Url, ProvisionError> {
        self.base_url
            .join(path)
            .map_err(|e| ProvisionError::Transport(e.to_string()))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ProvisionError> {
        debug!(method = %method, url = %url, "Calling Odoo service");
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProvisionError::TenantNotFound);
        }
        let message = response
            .json::<ServiceError>()
            .await
            .ok()
            .and_then(|e| e.error.or(e.message))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
        Err(ProvisionError::Service {
            status: status.as_u16(),
            message,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProvisionError> {
        let url = self.url(path)?;
        Ok(self.send(method, url, body).await?.json::<T>().await?)
    }

    async fn call_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), ProvisionError> {
        let url = self.url(path)?;
        self.send(method, url, body).await.map(|_| ())
    }

    fn backup_url(&self, path: &str, location: &str) -> Result<Url, ProvisionError> {
        let mut url = self.url(path)?;
        url.query_pairs_mut().append_pair("location", location);
        Ok(url)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ProvisionError> {
    serde_json::to_value(value).map_err(|e| ProvisionError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl OdooProvisioner for HttpOdooProvisioner {
    async fn create_tenant(&self, spec: &TenantSpec) -> Result<(), ProvisionError> {
        let path = format!("tenants/{}/create", spec.tenant_id);
        self.call_unit(Method::POST, &path, Some(to_json(spec)?)).await
    }

    async fn delete_tenant(&self, tenant_id: Uuid) -> Result<(), ProvisionError> {
        self.call_unit(Method::DELETE, &format!("tenants/{tenant_id}/delete"), None)
            .await
    }

    async fn install_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError> {
        let path = format!("tenants/{tenant_id}/modules/{module}/install");
        self.call_unit(Method::POST, &path, None).await
    }

    async fn uninstall_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError> {
        let path = format!("tenants/{tenant_id}/modules/{module}/uninstall");
        self.call_unit(Method::DELETE, &path, None).await
    }

    async fn backup_tenant(&self, tenant_id: Uuid) -> Result<BackupArtifact, ProvisionError> {
        self.call(Method::POST, &format!("tenants/{tenant_id}/backup"), None)
            .await
    }

    async fn restore_tenant(&self, tenant_id: Uuid, location: &str) -> Result<(), ProvisionError> {
        let body = to_json(&RestoreRequest { location })?;
        self.call_unit(Method::POST, &format!("tenants/{tenant_id}/restore"), Some(body))
            .await
    }

    async fn tenant_stats(&self, tenant_id: Uuid) -> Result<TenantUsage, ProvisionError> {
        self.call(Method::GET, &format!("tenants/{tenant_id}/stats"), None)
            .await
    }

    async fn delete_backup(&self, location: &str) -> Result<(), ProvisionError> {
        let url = self.backup_url("backups", location)?;
        match self.send(Method::DELETE, url, None).await {
            Ok(_) | Err(ProvisionError::TenantNotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn artifact_checksum(&self, location: &str) -> Result<String, ProvisionError> {
        let url = self.backup_url("backups/checksum", location)?;
        match self.send(Method::GET, url, None).await {
            Ok(response) => Ok(response.json::<ChecksumResponse>().await?.checksum_sha256),
            Err(ProvisionError::TenantNotFound) => {
                Err(ProvisionError::ArtifactNotFound(location.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

// ── In-memory simulator ────────────────────────────────────────────────

/// Operations that can be made to fail or stall on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionOp {
    Create,
    Delete,
    InstallModule,
    UninstallModule,
    Backup,
    Restore,
    Stats,
    DeleteBackup,
}

#[derive(Debug, Clone)]
struct SimulatedTenant {
    db_name: String,
    modules: BTreeSet<String>,
    usage: TenantUsage,
}

/// Simulated Odoo service for dev mode and tests. Dumps are generated
/// bytes, so checksums are real SHA-256 digests.
pub struct InMemoryProvisioner {
    tenants: DashMap<Uuid, SimulatedTenant>,
    artifacts: DashMap<String, Vec<u8>>,
    failures: Mutex<HashSet<ProvisionOp>>,
    stalls: Mutex<HashMap<ProvisionOp, Duration>>,
    restores: DashMap<Uuid, String>,
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            artifacts: DashMap::new(),
            failures: Mutex::new(HashSet::new()),
            stalls: Mutex::new(HashMap::new()),
            restores: DashMap::new(),
        }
    }

    /// Make every future call of `op` fail until cleared.
    pub fn fail_on(&self, op: ProvisionOp) {
        self.failures.lock().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Delay every future call of `op` by `delay` before it does anything.
    pub fn stall_on(&self, op: ProvisionOp, delay: Duration) {
        self.stalls.lock().insert(op, delay);
    }

    async fn check(&self, op: ProvisionOp) -> Result<(), ProvisionError> {
        let stall = self.stalls.lock().get(&op).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().contains(&op) {
            return Err(ProvisionError::Service {
                status: 500,
                message: format!("simulated {op:?} failure"),
            });
        }
        Ok(())
    }

    pub fn has_tenant(&self, tenant_id: Uuid) -> bool {
        self.tenants.contains_key(&tenant_id)
    }

    pub fn modules(&self, tenant_id: Uuid) -> Vec<String> {
        self.tenants
            .get(&tenant_id)
            .map(|t| t.modules.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Set what `tenant_stats` reports for a tenant.
    pub fn set_usage(&self, tenant_id: Uuid, usage: TenantUsage) {
        if let Some(mut t) = self.tenants.get_mut(&tenant_id) {
            t.usage = usage;
        }
    }

    pub fn artifact_exists(&self, location: &str) -> bool {
        self.artifacts.contains_key(location)
    }

    /// Overwrite an artifact's bytes, as disk corruption would.
    pub fn corrupt_artifact(&self, location: &str) {
        if let Some(mut bytes) = self.artifacts.get_mut(location) {
            bytes.push(0xFF);
        }
    }

    pub fn last_restore(&self, tenant_id: Uuid) -> Option<String> {
        self.restores.get(&tenant_id).map(|l| l.value().clone())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl OdooProvisioner for InMemoryProvisioner {
    async fn create_tenant(&self, spec: &TenantSpec) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::Create).await?;
        let modules = ["base", "web"].iter().map(|m| m.to_string()).collect();
        self.tenants.insert(
            spec.tenant_id,
            SimulatedTenant {
                db_name: spec.db_name.clone(),
                modules,
                usage: TenantUsage {
                    db_size_bytes: 50 * 1024 * 1024,
                    filestore_size_bytes: 0,
                    users_count: 1,
                },
            },
        );
        info!(tenant_id = %spec.tenant_id, db_name = %spec.db_name, "Simulated tenant created");
        Ok(())
    }

    async fn delete_tenant(&self, tenant_id: Uuid) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::Delete).await?;
        self.tenants.remove(&tenant_id);
        Ok(())
    }

    async fn install_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::InstallModule).await?;
        let mut tenant = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or(ProvisionError::TenantNotFound)?;
        tenant.modules.insert(module.to_string());
        Ok(())
    }

    async fn uninstall_module(&self, tenant_id: Uuid, module: &str) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::UninstallModule).await?;
        let mut tenant = self
            .tenants
            .get_mut(&tenant_id)
            .ok_or(ProvisionError::TenantNotFound)?;
        tenant.modules.remove(module);
        Ok(())
    }

    async fn backup_tenant(&self, tenant_id: Uuid) -> Result<BackupArtifact, ProvisionError> {
        self.check(ProvisionOp::Backup).await?;
        let tenant = self
            .tenants
            .get(&tenant_id)
            .ok_or(ProvisionError::TenantNotFound)?
            .clone();

        let now = Utc::now();
        let dump = serde_json::json!({
            "db_name": tenant.db_name,
            "modules": tenant.modules,
            "usage": tenant.usage,
            "taken_at": now.to_rfc3339(),
            "nonce": Uuid::new_v4(),
        })
        .to_string()
        .into_bytes();

        let location = format!(
            "memory://backups/{}_{}.dump",
            tenant_id,
            now.format("%Y%m%d_%H%M%S%.3f")
        );
        let artifact = BackupArtifact {
            location: location.clone(),
            size_bytes: dump.len() as u64,
            checksum_sha256: sha256_hex(&dump),
        };
        self.artifacts.insert(location, dump);
        Ok(artifact)
    }

    async fn restore_tenant(&self, tenant_id: Uuid, location: &str) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::Restore).await?;
        if !self.tenants.contains_key(&tenant_id) {
            return Err(ProvisionError::TenantNotFound);
        }
        if !self.artifacts.contains_key(location) {
            return Err(ProvisionError::ArtifactNotFound(location.to_string()));
        }
        self.restores.insert(tenant_id, location.to_string());
        Ok(())
    }

    async fn tenant_stats(&self, tenant_id: Uuid) -> Result<TenantUsage, ProvisionError> {
        self.check(ProvisionOp::Stats).await?;
        self.tenants
            .get(&tenant_id)
            .map(|t| t.usage)
            .ok_or(ProvisionError::TenantNotFound)
    }

    async fn delete_backup(&self, location: &str) -> Result<(), ProvisionError> {
        self.check(ProvisionOp::DeleteBackup).await?;
        self.artifacts.remove(location);
        Ok(())
    }

    async fn artifact_checksum(&self, location: &str) -> Result<String, ProvisionError> {
        self.artifacts
            .get(location)
            .map(|bytes| sha256_hex(bytes.value()))
            .ok_or_else(|| ProvisionError::ArtifactNotFound(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TenantSpec {
        TenantSpec {
            tenant_id: Uuid::new_v4(),
            db_name: "tenant_acme".into(),
            slug: "acme".into(),
            domain: "acme.odoo-saas.local".into(),
            odoo_version: "16.0".into(),
        }
    }

    #[tokio::test]
    async fn test_simulated_lifecycle() {
        let odoo = InMemoryProvisioner::new();
        let spec = spec();
        odoo.create_tenant(&spec).await.unwrap();
        assert!(odoo.has_tenant(spec.tenant_id));

        odoo.install_module(spec.tenant_id, "crm").await.unwrap();
        assert!(odoo.modules(spec.tenant_id).contains(&"crm".to_string()));
        odoo.uninstall_module(spec.tenant_id, "crm").await.unwrap();
        assert!(!odoo.modules(spec.tenant_id).contains(&"crm".to_string()));

        let usage = odoo.tenant_stats(spec.tenant_id).await.unwrap();
        assert_eq!(usage.users_count, 1);

        odoo.delete_tenant(spec.tenant_id).await.unwrap();
        assert!(matches!(
            odoo.tenant_stats(spec.tenant_id).await,
            Err(ProvisionError::TenantNotFound)
        ));
    }

    #[tokio::test]
    async fn test_backup_checksum_is_real() {
        let odoo = InMemoryProvisioner::new();
        let spec = spec();
        odoo.create_tenant(&spec).await.unwrap();

        let artifact = odoo.backup_tenant(spec.tenant_id).await.unwrap();
        assert_eq!(artifact.checksum_sha256.len(), 64);
        assert_eq!(
            odoo.artifact_checksum(&artifact.location).await.unwrap(),
            artifact.checksum_sha256
        );

        odoo.corrupt_artifact(&artifact.location);
        assert_ne!(
            odoo.artifact_checksum(&artifact.location).await.unwrap(),
            artifact.checksum_sha256
        );

        odoo.restore_tenant(spec.tenant_id, &artifact.location).await.unwrap();
        assert_eq!(odoo.last_restore(spec.tenant_id), Some(artifact.location.clone()));

        odoo.delete_backup(&artifact.location).await.unwrap();
        assert!(!odoo.artifact_exists(&artifact.location));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let odoo = InMemoryProvisioner::new();
        odoo.fail_on(ProvisionOp::Create);
        let err = odoo.create_tenant(&spec()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Service { status: 500, .. }));

        odoo.clear_failures();
        assert!(odoo.create_tenant(&spec()).await.is_ok());
    }

    #[test]
    fn test_http_client_rejects_bad_url() {
        let config = OdooConfig {
            service_url: "not a url".into(),
            ..OdooConfig::default()
        };
        assert!(HttpOdooProvisioner::new(&config).is_err());
    }
}
