//! Customer portal REST API under `/api/portal`.
//!
//! Every tenant, subscription and ticket lookup is scoped to the calling
//! customer; another customer's resource is reported as not found.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use saas_core::types::{AuditAction, CustomerRole, Page, PageRequest, TenantState};
use saas_core::validation::validate_password;
use saas_jobs::lifecycle::TenantRequest;
use saas_ops::backup::BackupRecord;
use saas_platform::audit::AuditRecord;
use saas_platform::auth::{AccessToken, Audience};
use saas_platform::customers::{Customer, CustomerUpdate, NewCustomer};
use saas_platform::rate_limit::policies;
use saas_platform::tenancy::{Tenant, TenantFilter, TenantUpdate};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{ClientInfo, PortalUser, Session};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::rest::{AppState, ErrorResponse};

const MAX_PER_PAGE: u32 = 100;

/// Accounts created through self-service registration may own one tenant
/// until an admin raises the limit.
const REGISTERED_MAX_TENANTS: u32 = 1;

/// Look up a tenant owned by the session's customer.
pub(crate) fn owned_tenant(state: &AppState, session: &Session, id: Uuid) -> ApiResult<Tenant> {
    state
        .tenants
        .get_for_customer(id, session.id())
        .ok_or_else(|| ApiError::not_found("Tenant not found"))
}

// ─── Auth ──────────────────────────────────────────────────────────────────

/// POST /api/portal/auth/register: Self-service signup.
#[utoipa::path(
    post,
    path = "/api/portal/auth/register",
    tag = "Portal",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Weak password or invalid fields", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    state.check_rate(&policies::PORTAL_REGISTER, client.caller())?;
    validate_password(&req.password)?;
    let hash = state.hash_password(&req.password).await?;

    let mut new = NewCustomer::new(req.email, hash);
    new.first_name = req.first_name;
    new.last_name = req.last_name;
    new.company = req.company;
    new.phone = req.phone;
    new.role = CustomerRole::Owner;
    new.max_tenants = REGISTERED_MAX_TENANTS;

    let customer = state.customers.create(new)?;
    state.audit.record(
        &client.actor_for(&customer, None),
        AuditRecord::new(AuditAction::Create, "customer", customer.id)
            .new_values(json!({ "email": customer.email, "source": "registration" })),
    );
    metrics::counter!("customers.created", "source" => "registration").increment(1);

    let tokens = state.auth.issue_pair(&customer, Audience::Portal, false)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { tokens, customer })))
}

/// POST /api/portal/auth/login
#[utoipa::path(
    post,
    path = "/api/portal/auth/login",
    tag = "Portal",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token pair issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account disabled", body = ErrorResponse),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    state.check_rate(&policies::PORTAL_LOGIN, client.caller())?;
    let mut customer = state.authenticate(&req.email, &req.password).await?;

    let tokens = state.auth.issue_pair(&customer, Audience::Portal, req.remember_me)?;
    state.customers.record_login(customer.id);
    if let Some(updated) = state.customers.get(customer.id) {
        customer = updated;
    }
    state.audit.record(
        &client.actor_for(&customer, None),
        AuditRecord::new(AuditAction::Login, "customer", customer.id)
            .metadata(json!({ "audience": "portal", "remember_me": req.remember_me })),
    );
    metrics::counter!("auth.logins", "audience" => "portal").increment(1);
    Ok(Json(AuthResponse { tokens, customer }))
}

/// POST /api/portal/auth/refresh
#[utoipa::path(
    post,
    path = "/api/portal/auth/refresh",
    tag = "Portal",
    request_body = RefreshRequest,
    responses((status = 200, description = "New access token", body = AccessToken))
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<AccessToken>> {
    state.refresh_access(Audience::Portal, &req.refresh_token).map(Json)
}

/// POST /api/portal/auth/logout
#[utoipa::path(
    post,
    path = "/api/portal/auth/logout",
    tag = "Portal",
    responses((status = 200, description = "Logged out", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    body: Option<Json<LogoutRequest>>,
) -> Json<MessageResponse> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    state.logout(&session, Audience::Portal, req.refresh_token.as_deref());
    Json(MessageResponse::new("Logged out"))
}

/// GET /api/portal/auth/profile
#[utoipa::path(
    get,
    path = "/api/portal/auth/profile",
    tag = "Portal",
    responses((status = 200, description = "Current customer", body = Customer))
)]
pub async fn get_profile(PortalUser(session): PortalUser) -> Json<Customer> {
    Json(session.customer)
}

/// PUT /api/portal/auth/profile
#[utoipa::path(
    put,
    path = "/api/portal/auth/profile",
    tag = "Portal",
    request_body = ProfileUpdate,
    responses((status = 200, description = "Updated profile", body = Customer))
)]
pub async fn update_profile(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Json(req): Json<ProfileUpdate>,
) -> ApiResult<Json<Customer>> {
    let update = CustomerUpdate {
        first_name: req.first_name,
        last_name: req.last_name,
        company: req.company,
        phone: req.phone,
        ..Default::default()
    };
    let (before, after) = state
        .customers
        .update(session.id(), update, Some(session.id()))?;
    state.audit.record(
        &session.actor(),
        AuditRecord::new(AuditAction::Update, "customer", session.id())
            .old_values(json!(before))
            .new_values(json!(after)),
    );
    Ok(Json(after))
}

// ─── Tenants ───────────────────────────────────────────────────────────────

/// GET /api/portal/tenants: The caller's tenants.
#[utoipa::path(
    get,
    path = "/api/portal/tenants",
    tag = "Portal",
    responses((status = 200, description = "Paginated tenants"))
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Query(mut filter): Query<TenantFilter>,
    Query(page): Query<PageRequest>,
) -> Json<Page<Tenant>> {
    filter.customer_id = Some(session.id());
    Json(state.tenants.list(&filter, page.clamped(MAX_PER_PAGE)))
}

/// POST /api/portal/tenants
#[utoipa::path(
    post,
    path = "/api/portal/tenants",
    tag = "Portal",
    request_body = TenantRequest,
    responses(
        (status = 201, description = "Tenant registered, provisioning queued", body = TenantCreated),
        (status = 400, description = "Validation failed or tenant limit reached", body = ErrorResponse),
        (status = 409, description = "Slug already exists", body = ErrorResponse),
    )
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Json(req): Json<TenantRequest>,
) -> ApiResult<(StatusCode, Json<TenantCreated>)> {
    state.check_rate(&policies::PORTAL_TENANT_CREATE, &session.caller())?;
    let (tenant, job) = state
        .lifecycle
        .create_tenant(&session.actor(), session.id(), req)?;
    Ok((
        StatusCode::CREATED,
        Json(TenantCreated {
            tenant,
            job_id: job.id,
            message: "Tenant creation started".to_string(),
        }),
    ))
}

/// GET /api/portal/tenants/:id
#[utoipa::path(
    get,
    path = "/api/portal/tenants/{id}",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 200, description = "Tenant detail", body = TenantDetail),
        (status = 404, description = "Not found or not owned", body = ErrorResponse),
    )
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TenantDetail>> {
    let tenant = owned_tenant(&state, &session, id)?;
    Ok(Json(state.tenant_detail(tenant)))
}

/// PUT /api/portal/tenants/:id: Rename or change the custom domain.
#[utoipa::path(
    put,
    path = "/api/portal/tenants/{id}",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    request_body = PortalTenantUpdate,
    responses((status = 200, description = "Updated tenant", body = Tenant))
)]
pub async fn update_tenant(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
    Json(req): Json<PortalTenantUpdate>,
) -> ApiResult<Json<Tenant>> {
    state.check_rate(&policies::PORTAL_TENANT_UPDATE, &session.caller())?;
    owned_tenant(&state, &session, id)?;
    state
        .tenants
        .ensure_state(id, &[TenantState::Active], "update")?;
    let update = TenantUpdate {
        name: req.name,
        custom_domain: req.custom_domain,
        plan_id: None,
    };
    Ok(Json(state.lifecycle.update_tenant(&session.actor(), id, update)?))
}

/// DELETE /api/portal/tenants/:id
#[utoipa::path(
    delete,
    path = "/api/portal/tenants/{id}",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 202, description = "Deletion queued", body = JobAccepted))
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::PORTAL_TENANT_DELETE, &session.caller())?;
    owned_tenant(&state, &session, id)?;
    let job = state.lifecycle.delete_tenant(&session.actor(), id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Tenant deletion started"))))
}

/// POST /api/portal/tenants/:id/backup
#[utoipa::path(
    post,
    path = "/api/portal/tenants/{id}/backup",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 202, description = "Backup queued", body = JobAccepted))
)]
pub async fn backup_tenant(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::PORTAL_BACKUP, &session.caller())?;
    owned_tenant(&state, &session, id)?;
    let job = state.lifecycle.request_backup(&session.actor(), id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::new(&job, "Backup started"))))
}

/// GET /api/portal/tenants/:id/backups
#[utoipa::path(
    get,
    path = "/api/portal/tenants/{id}/backups",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Backups, newest first", body = [BackupRecord]))
)]
pub async fn list_backups(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<BackupRecord>>> {
    owned_tenant(&state, &session, id)?;
    Ok(Json(state.backups.list_for_tenant(id)))
}

// ─── Modules ───────────────────────────────────────────────────────────────

/// GET /api/portal/tenants/:id/modules: Installed and installable modules.
#[utoipa::path(
    get,
    path = "/api/portal/tenants/{id}/modules",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    responses((status = 200, description = "Module list", body = ModuleList))
)]
pub async fn list_modules(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ModuleList>> {
    let tenant = owned_tenant(&state, &session, id)?;
    let available = state
        .plans
        .get(tenant.plan_id)
        .map(|plan| plan.available_modules())
        .unwrap_or_default()
        .into_iter()
        .filter(|m| !tenant.has_module(m))
        .collect();
    Ok(Json(ModuleList {
        installed: tenant.installed_modules,
        available,
    }))
}

/// POST /api/portal/tenants/:id/modules: Queue a module install.
#[utoipa::path(
    post,
    path = "/api/portal/tenants/{id}/modules",
    tag = "Portal",
    params(("id" = Uuid, Path, description = "Tenant id")),
    request_body = ModuleRequest,
    responses(
        (status = 202, description = "Install queued", body = JobAccepted),
        (status = 400, description = "Module already installed", body = ErrorResponse),
        (status = 403, description = "Module not included in the plan", body = ErrorResponse),
    )
)]
pub async fn install_module(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::PORTAL_MODULE, &session.caller())?;
    owned_tenant(&state, &session, id)?;
    let job = state
        .lifecycle
        .request_module_install(&session.actor(), id, &req.module_name)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted::new(
            &job,
            format!("Module {} installation started", req.module_name),
        )),
    ))
}

/// DELETE /api/portal/tenants/:id/modules/:module: Queue a module uninstall.
#[utoipa::path(
    delete,
    path = "/api/portal/tenants/{id}/modules/{module}",
    tag = "Portal",
    params(
        ("id" = Uuid, Path, description = "Tenant id"),
        ("module" = String, Path, description = "Technical module name"),
    ),
    responses((status = 202, description = "Uninstall queued", body = JobAccepted))
)]
pub async fn uninstall_module(
    State(state): State<AppState>,
    PortalUser(session): PortalUser,
    Path((id, module)): Path<(Uuid, String)>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    state.check_rate(&policies::PORTAL_MODULE, &session.caller())?;
    owned_tenant(&state, &session, id)?;
    let job = state
        .lifecycle
        .request_module_uninstall(&session.actor(), id, &module)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted::new(&job, format!("Module {module} uninstallation started"))),
    ))
}
