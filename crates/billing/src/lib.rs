//! Billing for the control plane: the plan catalog, subscriptions and
//! payment events, and Stripe/Paddle webhook processing.
//!
//! Data stored in DashMap (development); swap to PostgreSQL for production.

pub mod plans;
pub mod subscriptions;
pub mod webhooks;

pub use plans::PlanCatalog;
pub use subscriptions::SubscriptionLedger;
pub use webhooks::WebhookProcessor;
