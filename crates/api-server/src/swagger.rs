//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Odoo SaaS Control Plane API",
        version = "0.1.0",
        description = "Multi-tenant control plane for hosted Odoo instances.\n\nCovers tenant provisioning and lifecycle, customer accounts, plans and subscriptions, backups, support tickets, and billing provider webhooks.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Admin", description = "Operator console: tenants, customers, plans, audit, jobs"),
        (name = "Portal", description = "Customer self-service: account, tenants, modules"),
        (name = "Billing", description = "Plans, subscriptions and usage for portal customers"),
        (name = "Support", description = "Customer support tickets"),
        (name = "Webhooks", description = "Stripe and Paddle event receivers"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
        // Admin
        crate::admin_rest::login,
        crate::admin_rest::refresh,
        crate::admin_rest::logout,
        crate::admin_rest::me,
        crate::admin_rest::list_tenants,
        crate::admin_rest::create_tenant,
        crate::admin_rest::get_tenant,
        crate::admin_rest::update_tenant,
        crate::admin_rest::delete_tenant,
        crate::admin_rest::suspend_tenant,
        crate::admin_rest::unsuspend_tenant,
        crate::admin_rest::backup_tenant,
        crate::admin_rest::list_backups,
        crate::admin_rest::restore_tenant,
        crate::admin_rest::retry_tenant,
        crate::admin_rest::list_customers,
        crate::admin_rest::create_customer,
        crate::admin_rest::get_customer,
        crate::admin_rest::update_customer,
        crate::admin_rest::list_plans,
        crate::admin_rest::create_plan,
        crate::admin_rest::get_plan,
        crate::admin_rest::update_plan,
        crate::admin_rest::delete_plan,
        crate::admin_rest::list_subscriptions,
        crate::admin_rest::list_audit,
        crate::admin_rest::audit_actions,
        crate::admin_rest::audit_resource_types,
        crate::admin_rest::audit_verify,
        crate::admin_rest::resolve_ticket,
        crate::admin_rest::dashboard_stats,
        crate::admin_rest::queue_info,
        crate::admin_rest::job_status,
        // Portal
        crate::portal_rest::register,
        crate::portal_rest::login,
        crate::portal_rest::refresh,
        crate::portal_rest::logout,
        crate::portal_rest::get_profile,
        crate::portal_rest::update_profile,
        crate::portal_rest::list_tenants,
        crate::portal_rest::create_tenant,
        crate::portal_rest::get_tenant,
        crate::portal_rest::update_tenant,
        crate::portal_rest::delete_tenant,
        crate::portal_rest::backup_tenant,
        crate::portal_rest::list_backups,
        crate::portal_rest::list_modules,
        crate::portal_rest::install_module,
        crate::portal_rest::uninstall_module,
        // Billing
        crate::billing_rest::list_plans,
        crate::billing_rest::list_subscriptions,
        crate::billing_rest::get_subscription,
        crate::billing_rest::cancel_subscription,
        crate::billing_rest::usage,
        // Support
        crate::support_rest::list_tickets,
        crate::support_rest::create_ticket,
        crate::support_rest::get_ticket,
        crate::support_rest::reply_ticket,
        crate::support_rest::close_ticket,
        // Webhooks
        crate::billing_rest::stripe_webhook,
        crate::billing_rest::paddle_webhook,
    ),
    components(schemas(
        // Shared enums and value types
        saas_core::types::TenantState,
        saas_core::types::SuspensionReason,
        saas_core::types::CustomerRole,
        saas_core::types::AuditAction,
        saas_core::types::BillingProvider,
        saas_core::types::SubscriptionStatus,
        saas_core::types::PlanQuota,
        saas_core::types::Pagination,
        // Platform
        saas_platform::auth::TokenPair,
        saas_platform::auth::AccessToken,
        saas_platform::tenancy::Tenant,
        saas_platform::tenancy::TenantUpdate,
        saas_platform::tenancy::TenantStats,
        saas_platform::tenancy::UsagePercentages,
        saas_platform::customers::Customer,
        saas_platform::customers::CustomerStats,
        saas_platform::audit::AuditEntry,
        saas_platform::audit::ChainVerification,
        saas_platform::support::SupportTicket,
        saas_platform::support::NewTicket,
        saas_platform::support::TicketStats,
        saas_platform::support::TicketPriority,
        saas_platform::support::TicketCategory,
        saas_platform::support::TicketStatus,
        // Billing
        saas_billing::plans::Plan,
        saas_billing::plans::NewPlan,
        saas_billing::plans::PlanUpdate,
        saas_billing::plans::PlanStats,
        saas_billing::plans::PublicPlan,
        saas_billing::subscriptions::Subscription,
        saas_billing::subscriptions::BillingInterval,
        saas_billing::subscriptions::PaymentEvent,
        saas_billing::subscriptions::PaymentStatus,
        saas_billing::subscriptions::SubscriptionStats,
        // Ops and jobs
        saas_ops::backup::BackupRecord,
        saas_ops::backup::BackupType,
        saas_ops::backup::BackupStatus,
        saas_jobs::queue::JobRecord,
        saas_jobs::queue::JobStatus,
        saas_jobs::queue::Lane,
        saas_jobs::queue::LaneInfo,
        saas_jobs::queue::QueueInfo,
        saas_jobs::lifecycle::TenantRequest,
        // REST error/health types
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
        // Request and response bodies
        crate::admin_rest::AdminTenantRequest,
        crate::admin_rest::TicketResolution,
        crate::support_rest::TicketReply,
        crate::models::LoginRequest,
        crate::models::RegisterRequest,
        crate::models::RefreshRequest,
        crate::models::LogoutRequest,
        crate::models::AuthResponse,
        crate::models::ProfileUpdate,
        crate::models::MessageResponse,
        crate::models::JobAccepted,
        crate::models::TenantCreated,
        crate::models::TenantDetail,
        crate::models::PortalTenantUpdate,
        crate::models::RestoreRequest,
        crate::models::ModuleRequest,
        crate::models::ModuleList,
        crate::models::CreateCustomerRequest,
        crate::models::UpdateCustomerRequest,
        crate::models::QuotaSummary,
        crate::models::CustomerDetail,
        crate::models::PlanDetail,
        crate::models::SubscriptionDetail,
        crate::models::CancelSubscriptionRequest,
        crate::models::TenantUsage,
        crate::models::UsageOverview,
        crate::models::WebhookAck,
        crate::models::DashboardStats,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_every_surface() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/api/admin/tenants"));
        assert!(paths.contains_key("/api/admin/tenants/{id}/restore"));
        assert!(paths.contains_key("/api/portal/tenants/{id}/modules/{module}"));
        assert!(paths.contains_key("/api/portal/billing/plans"));
        assert!(paths.contains_key("/api/portal/support/{id}/close"));
        assert!(paths.contains_key("/webhooks/stripe"));
        assert!(paths.contains_key("/webhooks/paddle"));
    }

    #[test]
    fn openapi_document_has_schemas() {
        let doc = ApiDoc::openapi();
        let schemas = &doc.components.as_ref().expect("components").schemas;
        assert!(schemas.contains_key("Tenant"));
        assert!(schemas.contains_key("ErrorResponse"));
        assert!(schemas.contains_key("TenantState"));
        assert!(schemas.contains_key("AuthResponse"));
    }
}
