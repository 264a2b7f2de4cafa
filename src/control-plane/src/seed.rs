//! Demo data for local development: the default plan ladder, an operator
//! account, and a customer to log into the portal with.

use saas_api::AppState;
use saas_billing::plans::NewPlan;
use saas_core::types::{Actor, AuditAction, CustomerRole};
use saas_platform::audit::AuditRecord;
use saas_platform::customers::NewCustomer;
use serde_json::json;
use tracing::{info, warn};

const DEMO_ADMIN_EMAIL: &str = "admin@example.com";
const DEMO_ADMIN_PASSWORD: &str = "Admin123!";
const DEMO_CUSTOMER_EMAIL: &str = "demo@example.com";
const DEMO_CUSTOMER_PASSWORD: &str = "Demo123!";

fn modules(names: &[&str]) -> Vec<String> {
    names.iter().map(|m| m.to_string()).collect()
}

fn features(names: &[&str]) -> Vec<String> {
    modules(names)
}

fn default_plans() -> Vec<NewPlan> {
    let basic = [
        "base", "web", "mail", "contacts", "calendar", "note", "portal", "website",
    ];
    let business = [
        "base", "web", "mail", "contacts", "calendar", "sale", "crm", "project", "hr",
        "account", "stock", "purchase", "website", "portal", "note",
    ];
    let growth: Vec<&str> = business
        .iter()
        .copied()
        .chain([
            "mrp",
            "maintenance",
            "fleet",
            "helpdesk",
            "marketing_automation",
            "social",
            "survey",
        ])
        .collect();

    let mut free = NewPlan::named("Free");
    free.description = Some("Try hosted Odoo with the essentials".into());
    free.max_tenants = 1;
    free.max_users_per_tenant = 3;
    free.max_db_size_gb = 1;
    free.max_filestore_gb = 1;
    free.allowed_modules = modules(&basic);
    free.features = features(&["community_support"]);
    free.trial_days = 0;

    let mut starter = NewPlan::named("Starter");
    starter.description = Some("For small businesses getting started".into());
    starter.price_monthly = 29.0;
    starter.price_yearly = 290.0;
    starter.max_tenants = 1;
    starter.max_users_per_tenant = 10;
    starter.max_db_size_gb = 5;
    starter.max_filestore_gb = 5;
    starter.allowed_modules = modules(&business);
    starter.features = features(&["custom_domain", "email_support", "api_access"]);
    starter.trial_days = 14;

    let mut professional = NewPlan::named("Professional");
    professional.description = Some("Advanced features for growing businesses".into());
    professional.price_monthly = 79.0;
    professional.price_yearly = 790.0;
    professional.max_tenants = 3;
    professional.max_users_per_tenant = 25;
    professional.max_db_size_gb = 20;
    professional.max_filestore_gb = 20;
    professional.allowed_modules = modules(&growth);
    professional.features = features(&[
        "custom_domain",
        "priority_support",
        "api_access",
        "advanced_reporting",
    ]);
    professional.trial_days = 14;

    let mut enterprise = NewPlan::named("Enterprise");
    enterprise.description = Some("Every module with dedicated support".into());
    enterprise.price_monthly = 199.0;
    enterprise.price_yearly = 1990.0;
    enterprise.max_tenants = 10;
    enterprise.max_users_per_tenant = 100;
    enterprise.max_db_size_gb = 100;
    enterprise.max_filestore_gb = 100;
    enterprise.features = features(&[
        "custom_domain",
        "phone_support",
        "api_access",
        "advanced_reporting",
        "custom_modules",
    ]);
    enterprise.trial_days = 30;

    vec![free, starter, professional, enterprise]
}

/// Seed plans and demo accounts. Existing plan names and emails are left
/// untouched, so running twice is harmless.
pub fn seed_demo(state: &AppState) -> anyhow::Result<()> {
    let system = Actor::system();

    let mut plans = 0;
    for plan in default_plans() {
        let name = plan.name.clone();
        match state.plans.create(plan) {
            Ok(created) => {
                state.audit.record(
                    &system,
                    AuditRecord::new(AuditAction::Create, "plan", created.id)
                        .metadata(json!({ "source": "seed" })),
                );
                plans += 1;
            }
            Err(e) => warn!(plan = %name, error = %e, "Skipping demo plan"),
        }
    }

    let accounts = [
        (DEMO_ADMIN_EMAIL, DEMO_ADMIN_PASSWORD, CustomerRole::Admin, "Admin"),
        (DEMO_CUSTOMER_EMAIL, DEMO_CUSTOMER_PASSWORD, CustomerRole::Owner, "Demo"),
    ];
    for (email, password, role, first_name) in accounts {
        if state.customers.find_by_email(email).is_some() {
            continue;
        }
        let mut new = NewCustomer::new(email, state.auth.hash_password(password)?);
        new.first_name = Some(first_name.into());
        new.last_name = Some("User".into());
        new.company = Some("Demo Company".into());
        new.role = role;
        new.is_verified = true;
        new.max_tenants = 5;
        new.max_quota_gb = 100;
        let customer = state.customers.create(new)?;
        state.audit.record(
            &system,
            AuditRecord::new(AuditAction::Create, "customer", customer.id)
                .new_values(json!({ "email": customer.email, "role": role.as_str() }))
                .metadata(json!({ "source": "seed", "demo": true })),
        );
    }

    info!(
        plans,
        admin = DEMO_ADMIN_EMAIL,
        customer = DEMO_CUSTOMER_EMAIL,
        "Demo data seeded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_ladder() {
        let plans = default_plans();
        let names: Vec<_> = plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Free", "Starter", "Professional", "Enterprise"]);
        assert!(plans.windows(2).all(|w| w[0].price_monthly <= w[1].price_monthly));
        // Only the top tier allows every module.
        assert_eq!(plans[3].allowed_modules, vec!["*".to_string()]);
        assert!(plans[2].allowed_modules.iter().any(|m| m == "helpdesk"));
    }
}
