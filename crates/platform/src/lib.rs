//! Platform services for the control plane: customer accounts, the tenant
//! state machine, the tamper-evident audit log, authentication, rate
//! limiting, and support tickets.

pub mod audit;
pub mod auth;
pub mod customers;
pub mod rate_limit;
pub mod support;
pub mod tenancy;

pub use audit::AuditLog;
pub use auth::AuthManager;
pub use customers::CustomerDirectory;
pub use rate_limit::RateLimiter;
pub use support::SupportDesk;
pub use tenancy::TenantManager;
