//! Admin REST API under `/api/admin`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use saas_billing::plans::{NewPlan, Plan, PlanFilter, PlanUpdate};
use saas_billing::subscriptions::{Subscription, SubscriptionFilter};
use saas_core::types::{AuditAction, Page, PageRequest, SuspensionReason};
use saas_core::validation::validate_password;
use saas_jobs::lifecycle::TenantRequest;
use saas_jobs::queue::{JobRecord, QueueInfo};
use saas_ops::backup::BackupRecord;
use saas_platform::audit::{AuditEntry, AuditFilter, AuditRecord, ChainVerification};
use saas_platform::auth::{AccessToken, Audience, AuthError};
use saas_platform::customers::{Customer, CustomerFilter, CustomerUpdate, NewCustomer};
use saas_platform::rate_limit::policies;
use saas_platform::support::SupportTicket;
use saas_platform::tenancy::{Tenant, TenantFilter, TenantUpdate};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AdminUser, ClientInfo};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::rest::{AppState, ErrorResponse};

const MAX_PER_PAGE: u32 = 100;
const MAX_AUDIT_PER_PAGE: u32 = 200;

// ─── Auth ──────────────────────────────────────────────────────────────────

/// POST /api/admin/auth/login: Admin login.
#[utoipa::path(
    post,
    path = "/api/admin/auth/login",
    tag = "Admin",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Not an admin account", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    state.check_rate(&policies::ADMIN_LOGIN, client.caller())?;

    let customer = state.authenticate(&req.email, &req.password).await?;
    if !customer.is_admin() {
        info!(customer_id = %customer.id, "Non-admin attempted admin login");
        return Err(AuthError::InsufficientRole.into());
    }

    let tokens = state.auth.issue_pair(&customer, Audience::Admin, req.remember_me)?;
    state.customers.record_login(customer.id);
    state.audit.record(
        &client.actor_for(&customer, None),
        AuditRecord::new(AuditAction::Login, "customer", customer.id)
            .metadata(json!({ "audience": "admin", "remember_me": req.remember_me })),
    );
    metrics::counter!("auth.logins", "audience" => "admin").increment(1);
    Ok(Json(AuthResponse { tokens, customer }))
}

/// POST /api/admin/auth/refresh: Exchange a refresh token.
#[utoipa::path(
    post,
    path = "/api/admin/auth/refresh",
    tag = "Admin",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessToken),
        (status = 401, description = "Invalid refresh token", body = ErrorResponse),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<AccessToken>> {
    state.refresh_access(Audience::Admin, &req.refresh_token).map(Json)
}

/// POST /api/admin/auth/logout: Revoke the current tokens.
#[utoipa::path(
    post,
    path = "/api/admin/auth/logout",
    tag = "Admin",
    responses((status = 200, description = "Logged out", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    AdminUser(session): AdminUser,
    body: Option<Json<LogoutRequest>>,
) -> Json<MessageResponse> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    state.logout(&session, Audience::Admin, req.refresh_token.as_deref());
    Json(MessageResponse::new("Logged out"))
}

/// GET /api/admin/auth/me: The signed-in admin.
#[utoipa::path(
    get,
    path = "/api/admin/auth/me",
    tag = "Admin",
    responses((status = 200, description = "Current admin", body = Customer))
)]
pub async fn me(AdminUser(session): AdminUser) -> Json<Customer> {
    Json(session.customer)
}

// ─── Tenants ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminTenantRequest {
    pub customer_id: Uuid,
    #[serde(flatten)]
    pub tenant: TenantRequest,
}

fn existing_tenant(state: &AppState, id: Uuid) -> ApiResult<Tenant> {
    state
        .tenants
        .get(id)
        .ok_or_else(|| ApiError::not_found("Tenant not found"))
}

/// GET /api/admin/tenants: List tenants with filters.
#[utoipa::path(
    get,
    path = "/api/admin/tenants",
    tag = "Admin",
    responses((status = 200, description = "Paginated tenants"))
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<TenantFilter>,
    Query(page): Query<PageRequest>,
) -> Json<Page<Tenant>> {
    Json(state.tenants.list(&filter, page.clamped(MAX_PER_PAGE)))
}

/// POST /api/admin/tenants: Create a tenant for a customer.
#[utoipa::path(
    post,
    path = "/api/admin/tenants",
    tag = "Admin",
    request_body = AdminTenantRequest,
    responses(
        (status = 201, description = "Tenant registered, provisioning queued", body = TenantCreated),
        (status = 400, description = "Validation failed or tenant limit reached", body = ErrorResponse),
        (status = 409, description = "Slug already exists", body = ErrorResponse),
    )
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<AdminTenantRequest>,
) -> ApiResult<(StatusCode, Json<TenantCreated>)> {
    state.check_rate(&policies::ADMIN_TENANT_CREATE, &admin.caller())?;
    let (tenant, job) = state
        .lifecycle
        .create_tenant(&admin.actor(), req.customer_id, req.tenant)?;
    Ok((
        StatusCode::CREATED,
        Json(TenantCreated {
            tenant,
            job_id: job.id,
            message: "Tenant creation started".to_string(),
        }),
    ))
}

/// GET /api/admin/tenants/:id: Tenant with usage and recent backups.
#[utoipa::path(
    get,
    path = "/api/admin/tenants/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant detail", body = TenantDetail),
        (status = 404, description = "Tenant not found", body = ErrorResponse),
    )
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TenantDetail>> {
    let tenant = existing_tenant(&state, id)?;
    Ok(Json(state.tenant_detail(tenant)))
}

/// PUT /api/admin/tenants/:id: Rename, change domain or plan.
#[utoipa::path(
    put,
    path = "/api/admin/tenants/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    request_body = TenantUpdate,
    responses((status = 200, description = "Updated tenant", body = Tenant))
)]
pub async fn update_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(update): Json<TenantUpdate>,
) -> ApiResult<Json<Tenant>> {
    state.check_rate(&policies::ADMIN_TENANT_UPDATE, &admin.caller())?;
    Ok(Json(state.lifecycle.update_tenant(&admin.actor(), id, update)?))
}

/// DELETE /api/admin/tenants/:id: Queue tenant deletion.
#[utoipa::path(
    delete,
    path = "/api/admin/tenants/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 202, description = "Deletion queued", body = JobAccepted))
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::ADMIN_TENANT_DELETE, &admin.caller())?;
    let job = state.lifecycle.delete_tenant(&admin.actor(), id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Tenant deletion started"))))
}

/// POST /api/admin/tenants/:id/suspend
#[utoipa::path(
    post,
    path = "/api/admin/tenants/{id}/suspend",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Tenant suspended", body = Tenant))
)]
pub async fn suspend_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Tenant>> {
    state.check_rate(&policies::ADMIN_TENANT_SUSPEND, &admin.caller())?;
    Ok(Json(state.lifecycle.suspend_tenant(
        &admin.actor(),
        id,
        SuspensionReason::Admin,
    )?))
}

/// POST /api/admin/tenants/:id/unsuspend
#[utoipa::path(
    post,
    path = "/api/admin/tenants/{id}/unsuspend",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Tenant reactivated", body = Tenant))
)]
pub async fn unsuspend_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Tenant>> {
    state.check_rate(&policies::ADMIN_TENANT_SUSPEND, &admin.caller())?;
    Ok(Json(state.lifecycle.unsuspend_tenant(&admin.actor(), id)?))
}

/// POST /api/admin/tenants/:id/backup: Queue a backup.
#[utoipa::path(
    post,
    path = "/api/admin/tenants/{id}/backup",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 202, description = "Backup queued", body = JobAccepted))
)]
pub async fn backup_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::ADMIN_BACKUP, &admin.caller())?;
    let job = state.lifecycle.request_backup(&admin.actor(), id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Backup started"))))
}

/// GET /api/admin/tenants/:id/backups
#[utoipa::path(
    get,
    path = "/api/admin/tenants/{id}/backups",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Backups, newest first", body = [BackupRecord]))
)]
pub async fn list_backups(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<BackupRecord>>> {
    existing_tenant(&state, id)?;
    Ok(Json(state.backups.list_for_tenant(id)))
}

/// POST /api/admin/tenants/:id/restore: Queue a restore from a backup.
#[utoipa::path(
    post,
    path = "/api/admin/tenants/{id}/restore",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    request_body = RestoreRequest,
    responses((status = 202, description = "Restore queued", body = JobAccepted))
)]
pub async fn restore_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::ADMIN_RESTORE, &admin.caller())?;
    let job = state
        .lifecycle
        .request_restore(&admin.actor(), id, req.backup_id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Restore started"))))
}

/// POST /api/admin/tenants/:id/retry: Re-provision a failed tenant.
#[utoipa::path(
    post,
    path = "/api/admin/tenants/{id}/retry",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 202, description = "Provisioning queued", body = JobAccepted))
)]
pub async fn retry_tenant(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::ADMIN_TENANT_CREATE, &admin.caller())?;
    let job = state.lifecycle.retry_provisioning(&admin.actor(), id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Provisioning restarted"))))
}

// ─── Customers ─────────────────────────────────────────────────────────────

/// GET /api/admin/customers
#[utoipa::path(
    get,
    path = "/api/admin/customers",
    tag = "Admin",
    responses((status = 200, description = "Paginated customers"))
)]
pub async fn list_customers(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<CustomerFilter>,
    Query(page): Query<PageRequest>,
) -> Json<Page<Customer>> {
    Json(state.customers.list(&filter, page.clamped(MAX_PER_PAGE)))
}

/// POST /api/admin/customers: Create a verified customer account.
#[utoipa::path(
    post,
    path = "/api/admin/customers",
    tag = "Admin",
    request_body = CreateCustomerRequest,
    responses(
        (status = 201, description = "Customer created", body = Customer),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
pub async fn create_customer(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<CreateCustomerRequest>,
) -> ApiResult<(StatusCode, Json<Customer>)> {
    validate_password(&req.password)?;
    let hash = state.hash_password(&req.password).await?;

    let mut new = NewCustomer::new(req.email, hash);
    new.first_name = req.first_name;
    new.last_name = req.last_name;
    new.company = req.company;
    new.phone = req.phone;
    new.is_verified = true;
    if let Some(role) = req.role {
        new.role = role;
    }
    if let Some(max) = req.max_tenants {
        new.max_tenants = max;
    }
    if let Some(max) = req.max_quota_gb {
        new.max_quota_gb = max;
    }

    let customer = state.customers.create(new)?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Create, "customer", customer.id).new_values(json!({
            "email": customer.email,
            "role": customer.role,
        })),
    );
    metrics::counter!("customers.created", "source" => "admin").increment(1);
    Ok((StatusCode::CREATED, Json(customer)))
}

/// GET /api/admin/customers/:id: Customer with tenants, subscriptions and quota.
#[utoipa::path(
    get,
    path = "/api/admin/customers/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses(
        (status = 200, description = "Customer detail", body = CustomerDetail),
        (status = 404, description = "Customer not found", body = ErrorResponse),
    )
)]
pub async fn get_customer(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CustomerDetail>> {
    let customer = state
        .customers
        .get(id)
        .ok_or_else(|| ApiError::not_found("Customer not found"))?;
    Ok(Json(CustomerDetail {
        tenants: state.tenants.list_for_customer(id),
        subscriptions: state.subscriptions.list_for_customer(id),
        quota: state.quota_summary(&customer),
        customer,
    }))
}

/// PUT /api/admin/customers/:id
#[utoipa::path(
    put,
    path = "/api/admin/customers/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Customer id")),
    request_body = UpdateCustomerRequest,
    responses(
        (status = 200, description = "Updated customer", body = Customer),
        (status = 400, description = "Cannot change own role or deactivate self", body = ErrorResponse),
    )
)]
pub async fn update_customer(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCustomerRequest>,
) -> ApiResult<Json<Customer>> {
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(state.hash_password(password).await?)
        }
        None => None,
    };
    let update = CustomerUpdate {
        first_name: req.first_name,
        last_name: req.last_name,
        company: req.company,
        phone: req.phone,
        role: req.role,
        is_active: req.is_active,
        is_verified: req.is_verified,
        max_tenants: req.max_tenants,
        max_quota_gb: req.max_quota_gb,
        password_hash,
    };

    let (before, after) = state.customers.update(id, update, Some(admin.id()))?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Update, "customer", id)
            .old_values(json!(before))
            .new_values(json!(after)),
    );
    Ok(Json(after))
}

// ─── Plans ─────────────────────────────────────────────────────────────────

/// GET /api/admin/plans
#[utoipa::path(
    get,
    path = "/api/admin/plans",
    tag = "Admin",
    responses((status = 200, description = "Plans", body = [Plan]))
)]
pub async fn list_plans(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<PlanFilter>,
) -> Json<Vec<Plan>> {
    Json(state.plans.list(&filter))
}

/// POST /api/admin/plans
#[utoipa::path(
    post,
    path = "/api/admin/plans",
    tag = "Admin",
    request_body = NewPlan,
    responses(
        (status = 201, description = "Plan created", body = Plan),
        (status = 409, description = "Plan name taken", body = ErrorResponse),
    )
)]
pub async fn create_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(new): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    let plan = state.plans.create(new)?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Create, "plan", plan.id).new_values(json!(plan)),
    );
    Ok((StatusCode::CREATED, Json(plan)))
}

/// GET /api/admin/plans/:id: Plan with tenant and revenue figures.
#[utoipa::path(
    get,
    path = "/api/admin/plans/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses((status = 200, description = "Plan detail", body = PlanDetail))
)]
pub async fn get_plan(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PlanDetail>> {
    let plan = state
        .plans
        .get(id)
        .ok_or_else(|| ApiError::not_found("Plan not found"))?;
    Ok(Json(PlanDetail {
        stats: state.plan_stats(id),
        plan,
    }))
}

/// PUT /api/admin/plans/:id
#[utoipa::path(
    put,
    path = "/api/admin/plans/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Plan id")),
    request_body = PlanUpdate,
    responses((status = 200, description = "Updated plan", body = Plan))
)]
pub async fn update_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(update): Json<PlanUpdate>,
) -> ApiResult<Json<Plan>> {
    let (before, after) = state.plans.update(id, update)?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Update, "plan", id)
            .old_values(json!(before))
            .new_values(json!(after)),
    );
    Ok(Json(after))
}

/// DELETE /api/admin/plans/:id: Only plans without live tenants.
#[utoipa::path(
    delete,
    path = "/api/admin/plans/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan deleted", body = MessageResponse),
        (status = 400, description = "Plan still has tenants", body = ErrorResponse),
    )
)]
pub async fn delete_plan(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    let (tenants_on_plan, _) = state.tenants.count_on_plan(id);
    let plan = state.plans.delete(id, tenants_on_plan)?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Delete, "plan", id).old_values(json!(plan)),
    );
    Ok(Json(MessageResponse::new(format!("Plan '{}' deleted", plan.name))))
}

// ─── Subscriptions ─────────────────────────────────────────────────────────

/// GET /api/admin/subscriptions
#[utoipa::path(
    get,
    path = "/api/admin/subscriptions",
    tag = "Admin",
    responses((status = 200, description = "Paginated subscriptions"))
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<SubscriptionFilter>,
    Query(page): Query<PageRequest>,
) -> Json<Page<Subscription>> {
    Json(state.subscriptions.list(&filter, page.clamped(MAX_PER_PAGE)))
}

// ─── Audit ─────────────────────────────────────────────────────────────────

/// GET /api/admin/audit
#[utoipa::path(
    get,
    path = "/api/admin/audit",
    tag = "Admin",
    responses((status = 200, description = "Paginated audit entries"))
)]
pub async fn list_audit(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<PageRequest>,
) -> Json<Page<AuditEntry>> {
    Json(state.audit.query(&filter, page.clamped(MAX_AUDIT_PER_PAGE)))
}

/// GET /api/admin/audit/actions
#[utoipa::path(
    get,
    path = "/api/admin/audit/actions",
    tag = "Admin",
    responses((status = 200, description = "Actions present in the log", body = [AuditAction]))
)]
pub async fn audit_actions(State(state): State<AppState>, _admin: AdminUser) -> Json<Vec<AuditAction>> {
    Json(state.audit.distinct_actions())
}

/// GET /api/admin/audit/resource-types
#[utoipa::path(
    get,
    path = "/api/admin/audit/resource-types",
    tag = "Admin",
    responses((status = 200, description = "Resource types present in the log", body = [String]))
)]
pub async fn audit_resource_types(State(state): State<AppState>, _admin: AdminUser) -> Json<Vec<String>> {
    Json(state.audit.distinct_resource_types())
}

/// GET /api/admin/audit/verify: Check the hash chain.
#[utoipa::path(
    get,
    path = "/api/admin/audit/verify",
    tag = "Admin",
    responses((status = 200, description = "Chain verification result", body = ChainVerification))
)]
pub async fn audit_verify(State(state): State<AppState>, _admin: AdminUser) -> Json<ChainVerification> {
    Json(state.audit.verify_chain())
}

// ─── Support ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct TicketResolution {
    pub resolution: String,
}

/// POST /api/admin/support/:id/resolve: Mark a ticket resolved.
/// A customer reply reopens it.
#[utoipa::path(
    post,
    path = "/api/admin/support/{id}/resolve",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Ticket id")),
    request_body = TicketResolution,
    responses(
        (status = 200, description = "Resolved ticket", body = SupportTicket),
        (status = 400, description = "Ticket is closed", body = ErrorResponse),
    )
)]
pub async fn resolve_ticket(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TicketResolution>,
) -> ApiResult<Json<SupportTicket>> {
    let resolution = req.resolution.trim();
    if resolution.is_empty() {
        return Err(ApiError::bad_request("Resolution is required"));
    }
    let ticket = state.support.resolve(id, resolution)?;
    state.audit.record(
        &admin.actor(),
        AuditRecord::new(AuditAction::Update, "support_ticket", id)
            .new_values(json!({ "status": ticket.status, "resolution": ticket.resolution })),
    );
    Ok(Json(ticket))
}

// ─── Dashboard & jobs ──────────────────────────────────────────────────────

/// GET /api/admin/dashboard/stats
#[utoipa::path(
    get,
    path = "/api/admin/dashboard/stats",
    tag = "Admin",
    responses((status = 200, description = "Platform totals", body = DashboardStats))
)]
pub async fn dashboard_stats(State(state): State<AppState>, _admin: AdminUser) -> Json<DashboardStats> {
    let now = Utc::now();
    let month_ago = now - Duration::days(30);
    Json(DashboardStats {
        tenants: state.tenants.stats(),
        customers: state.customers.stats(),
        subscriptions: state.subscriptions.stats(month_ago),
        revenue_last_30_days: state.subscriptions.revenue_since(month_ago),
        plans: state.plans.len(),
        logins_last_24h: state.audit.count_since(AuditAction::Login, now - Duration::hours(24)),
        audit_entries: state.audit.len(),
        queue: state.queue.info(),
    })
}

/// GET /api/admin/jobs: Queue depth per lane.
#[utoipa::path(
    get,
    path = "/api/admin/jobs",
    tag = "Admin",
    responses((status = 200, description = "Queue info", body = QueueInfo))
)]
pub async fn queue_info(State(state): State<AppState>, _admin: AdminUser) -> Json<QueueInfo> {
    Json(state.queue.info())
}

/// GET /api/admin/jobs/:id: Status of one job.
#[utoipa::path(
    get,
    path = "/api/admin/jobs/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job status", body = JobRecord),
        (status = 404, description = "Unknown or expired job", body = ErrorResponse),
    )
)]
pub async fn job_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobRecord>> {
    state
        .queue
        .status(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}
