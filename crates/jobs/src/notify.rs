//! Customer notifications raised by background work.
//!
//! Delivery (email, chat) lives behind the `Notifier` trait. The default
//! implementation writes structured log lines; tests capture instead.

use chrono::{DateTime, Utc};
use saas_billing::webhooks::BillingNotice;
use saas_platform::tenancy::UsagePercentages;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Welcome {
        customer_id: Uuid,
        tenant_id: Uuid,
        domain: String,
    },
    TrialEnding {
        customer_id: Uuid,
        subscription_id: Uuid,
        trial_end: Option<DateTime<Utc>>,
    },
    PaymentFailed {
        customer_id: Uuid,
        subscription_id: Uuid,
        amount: f64,
        currency: String,
    },
    QuotaExceeded {
        customer_id: Uuid,
        tenant_id: Uuid,
        usage: UsagePercentages,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Welcome { .. } => "welcome",
            Notification::TrialEnding { .. } => "trial_ending",
            Notification::PaymentFailed { .. } => "payment_failed",
            Notification::QuotaExceeded { .. } => "quota_exceeded",
        }
    }

    pub fn customer_id(&self) -> Uuid {
        match self {
            Notification::Welcome { customer_id, .. }
            | Notification::TrialEnding { customer_id, .. }
            | Notification::PaymentFailed { customer_id, .. }
            | Notification::QuotaExceeded { customer_id, .. } => *customer_id,
        }
    }
}

impl From<BillingNotice> for Notification {
    fn from(notice: BillingNotice) -> Self {
        match notice {
            BillingNotice::TrialEnding {
                customer_id,
                subscription_id,
                trial_end,
            } => Notification::TrialEnding {
                customer_id,
                subscription_id,
                trial_end,
            },
            BillingNotice::PaymentFailed {
                customer_id,
                subscription_id,
                amount,
                currency,
            } => Notification::PaymentFailed {
                customer_id,
                subscription_id,
                amount,
                currency,
            },
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs each notification as a structured event.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification).map_err(|e| NotifyError(e.to_string()))?;
        info!(
            kind = notification.kind(),
            customer_id = %notification.customer_id(),
            payload = %payload,
            "Notification dispatched"
        );
        metrics::counter!("notifications.sent", "kind" => notification.kind()).increment(1);
        Ok(())
    }
}

/// Records every notification. Used in tests.
#[derive(Default)]
pub struct CapturingNotifier {
    sent: parking_lot::Mutex<Vec<Notification>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|n| n.kind() == kind).count()
    }
}

impl Notifier for CapturingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_notice_conversion() {
        let customer_id = Uuid::new_v4();
        let notice = BillingNotice::PaymentFailed {
            customer_id,
            subscription_id: Uuid::new_v4(),
            amount: 49.0,
            currency: "USD".into(),
        };
        let notification = Notification::from(notice);
        assert_eq!(notification.kind(), "payment_failed");
        assert_eq!(notification.customer_id(), customer_id);
    }

    #[test]
    fn test_capturing_notifier() {
        let notifier = CapturingNotifier::new();
        notifier
            .notify(&Notification::Welcome {
                customer_id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                domain: "acme.odoo-saas.local".into(),
            })
            .unwrap();
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.count_kind("welcome"), 1);
        assert_eq!(notifier.count_kind("quota_exceeded"), 0);
    }

    #[test]
    fn test_serialized_shape_is_tagged() {
        let value = serde_json::to_value(Notification::TrialEnding {
            customer_id: Uuid::nil(),
            subscription_id: Uuid::nil(),
            trial_end: None,
        })
        .unwrap();
        assert_eq!(value["kind"], "trial_ending");
    }
}
