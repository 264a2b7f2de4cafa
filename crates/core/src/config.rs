use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `SAAS_CONTROL__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub odoo: OdooConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Allowed CORS origins. Empty means permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl_secs")]
    pub access_ttl_secs: i64,
    #[serde(default = "default_remember_me_ttl_secs")]
    pub remember_me_ttl_secs: i64,
    #[serde(default = "default_refresh_ttl_secs")]
    pub refresh_ttl_secs: i64,
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_hash_memory_kib")]
    pub password_hash_memory_kib: u32,
    #[serde(default = "default_hash_iterations")]
    pub password_hash_iterations: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub stripe_webhook_secret: String,
    #[serde(default)]
    pub paddle_webhook_secret: String,
    /// Maximum age of a signed webhook timestamp.
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,
    /// Suspend tenants when a subscription becomes canceled or unpaid.
    #[serde(default)]
    pub enforce_subscription_state: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OdooConfig {
    #[serde(default = "default_odoo_service_url")]
    pub service_url: String,
    #[serde(default = "default_odoo_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
    #[serde(default = "default_filestore_root")]
    pub filestore_root: String,
    #[serde(default = "default_odoo_version")]
    pub default_version: String,
    /// Use the in-memory provisioner instead of the Odoo service.
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How long finished and failed job records are kept.
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: i64,
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_collect_interval_secs")]
    pub collect_interval_secs: u64,
    #[serde(default)]
    pub suspend_on_exceed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default functions
fn default_node_id() -> String {
    "control-plane-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}
fn default_access_ttl_secs() -> i64 {
    3600
}
fn default_remember_me_ttl_secs() -> i64 {
    86_400
}
fn default_refresh_ttl_secs() -> i64 {
    30 * 86_400
}
fn default_hash_memory_kib() -> u32 {
    19_456
}
fn default_hash_iterations() -> u32 {
    2
}
fn default_webhook_tolerance_secs() -> i64 {
    300
}
fn default_odoo_service_url() -> String {
    "http://odoo-service:8080".to_string()
}
fn default_odoo_timeout_secs() -> u64 {
    300
}
fn default_base_domain() -> String {
    "odoo-saas.local".to_string()
}
fn default_filestore_root() -> String {
    "/var/lib/odoo/filestore".to_string()
}
fn default_odoo_version() -> String {
    "16.0".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_job_timeout_secs() -> u64 {
    1800
}
fn default_result_ttl_secs() -> i64 {
    86_400
}
fn default_lane_capacity() -> usize {
    1024
}
fn default_retention_days() -> i64 {
    30
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
fn default_collect_interval_secs() -> u64 {
    900
}
fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            access_ttl_secs: default_access_ttl_secs(),
            remember_me_ttl_secs: default_remember_me_ttl_secs(),
            refresh_ttl_secs: default_refresh_ttl_secs(),
            password_hash_memory_kib: default_hash_memory_kib(),
            password_hash_iterations: default_hash_iterations(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_webhook_secret: String::new(),
            paddle_webhook_secret: String::new(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            enforce_subscription_state: false,
        }
    }
}

impl Default for OdooConfig {
    fn default() -> Self {
        Self {
            service_url: default_odoo_service_url(),
            timeout_secs: default_odoo_timeout_secs(),
            base_domain: default_base_domain(),
            filestore_root: default_filestore_root(),
            default_version: default_odoo_version(),
            dev_mode: false,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            job_timeout_secs: default_job_timeout_secs(),
            result_ttl_secs: default_result_ttl_secs(),
            lane_capacity: default_lane_capacity(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: default_collect_interval_secs(),
            suspend_on_exceed: false,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            billing: BillingConfig::default(),
            odoo: OdooConfig::default(),
            jobs: JobsConfig::default(),
            backup: BackupConfig::default(),
            quota: QuotaConfig::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("SAAS_CONTROL")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("api.cors_origins"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Whether the JWT secret is still the built-in development value.
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.auth.jwt_secret == default_jwt_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.metrics.port, 9091);
        assert_eq!(config.backup.retention_days, 30);
        assert_eq!(config.jobs.job_timeout_secs, 1800);
        assert_eq!(config.odoo.default_version, "16.0");
        assert!(config.rate_limit.enabled);
        assert!(!config.billing.enforce_subscription_state);
        assert!(config.uses_default_jwt_secret());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "api": { "http_port": 9000 },
            "odoo": { "dev_mode": true }
        }))
        .unwrap();
        assert_eq!(config.api.http_port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert!(config.odoo.dev_mode);
        assert_eq!(config.odoo.timeout_secs, 300);
    }
}
