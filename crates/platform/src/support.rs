//! Customer support tickets.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use saas_core::types::{paginate, Page, PageRequest};
use saas_core::validation::validate_length;
use saas_core::SaasError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

const RESPONSE_SEPARATOR: &str = "\n\n--- Customer Response ---\n";

#[derive(Error, Debug)]
pub enum SupportError {
    #[error("Ticket not found")]
    NotFound,

    #[error("Ticket is closed")]
    Closed,

    #[error(transparent)]
    Validation(#[from] SaasError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    Billing,
    Technical,
    FeatureRequest,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SupportTicket {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
    pub category: TicketCategory,
    pub status: TicketStatus,
    pub assigned_to: Option<Uuid>,
    pub resolution: Option<String>,
    pub last_response_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    #[serde(default)]
    pub priority: TicketPriority,
    pub category: TicketCategory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub category: Option<TicketCategory>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct TicketStats {
    pub open: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub closed: u64,
    pub total: u64,
}

pub struct SupportDesk {
    tickets: DashMap<Uuid, SupportTicket>,
}

impl Default for SupportDesk {
    fn default() -> Self {
        Self::new()
    }
}

impl SupportDesk {
    pub fn new() -> Self {
        Self {
            tickets: DashMap::new(),
        }
    }

    pub fn create(&self, customer_id: Uuid, new: NewTicket) -> Result<SupportTicket, SupportError> {
        let subject = new.subject.trim().to_string();
        validate_length("Subject", &subject, 3, 200)?;
        validate_length("Description", &new.description, 10, 5000)?;

        let now = Utc::now();
        let ticket = SupportTicket {
            id: Uuid::new_v4(),
            customer_id,
            subject,
            description: new.description,
            priority: new.priority,
            category: new.category,
            status: TicketStatus::Open,
            assigned_to: None,
            resolution: None,
            last_response_at: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };
        self.tickets.insert(ticket.id, ticket.clone());
        info!(ticket_id = %ticket.id, customer_id = %customer_id, "Support ticket created");
        Ok(ticket)
    }

    /// Tickets are only visible to the customer who opened them.
    pub fn get(&self, customer_id: Uuid, id: Uuid) -> Result<SupportTicket, SupportError> {
        self.tickets
            .get(&id)
            .filter(|t| t.customer_id == customer_id)
            .map(|t| t.value().clone())
            .ok_or(SupportError::NotFound)
    }

    /// Newest first.
    pub fn list(&self, customer_id: Uuid, filter: &TicketFilter, page: PageRequest) -> Page<SupportTicket> {
        let mut tickets: Vec<SupportTicket> = self
            .tickets
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.category.map_or(true, |c| t.category == c))
            .map(|t| t.value().clone())
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(tickets, page.clamped(100))
    }

    /// Append a customer response. A resolved ticket is reopened.
    pub fn respond(&self, customer_id: Uuid, id: Uuid, text: &str) -> Result<SupportTicket, SupportError> {
        validate_length("Description", text, 10, 5000)?;
        let mut entry = self
            .tickets
            .get_mut(&id)
            .filter(|t| t.customer_id == customer_id)
            .ok_or(SupportError::NotFound)?;
        if entry.status == TicketStatus::Closed {
            return Err(SupportError::Closed);
        }

        let now = Utc::now();
        entry.description.push_str(RESPONSE_SEPARATOR);
        entry
            .description
            .push_str(&format!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S UTC"), text));
        entry.last_response_at = Some(now);
        entry.updated_at = now;
        if entry.status == TicketStatus::Resolved {
            entry.status = TicketStatus::Open;
            entry.resolved_at = None;
        }
        Ok(entry.value().clone())
    }

    pub fn close(&self, customer_id: Uuid, id: Uuid) -> Result<SupportTicket, SupportError> {
        let mut entry = self
            .tickets
            .get_mut(&id)
            .filter(|t| t.customer_id == customer_id)
            .ok_or(SupportError::NotFound)?;
        if entry.status == TicketStatus::Closed {
            return Err(SupportError::Closed);
        }
        let now = Utc::now();
        entry.status = TicketStatus::Closed;
        entry.resolved_at = Some(now);
        entry.updated_at = now;
        info!(ticket_id = %id, "Support ticket closed");
        Ok(entry.value().clone())
    }

    pub fn stats(&self, customer_id: Uuid) -> TicketStats {
        let mut stats = TicketStats::default();
        for t in self.tickets.iter().filter(|t| t.customer_id == customer_id) {
            stats.total += 1;
            match t.status {
                TicketStatus::Open => stats.open += 1,
                TicketStatus::InProgress => stats.in_progress += 1,
                TicketStatus::Resolved => stats.resolved += 1,
                TicketStatus::Closed => stats.closed += 1,
            }
        }
        stats
    }

    /// Staff-side status change, used when support resolves a ticket.
    pub fn resolve(&self, id: Uuid, resolution: impl Into<String>) -> Result<SupportTicket, SupportError> {
        let mut entry = self.tickets.get_mut(&id).ok_or(SupportError::NotFound)?;
        if entry.status == TicketStatus::Closed {
            return Err(SupportError::Closed);
        }
        let now = Utc::now();
        entry.status = TicketStatus::Resolved;
        entry.resolution = Some(resolution.into());
        entry.resolved_at = Some(now);
        entry.updated_at = now;
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> NewTicket {
        NewTicket {
            subject: "Cannot log in".into(),
            description: "The login page spins forever.".into(),
            priority: TicketPriority::High,
            category: TicketCategory::Technical,
        }
    }

    #[test]
    fn test_create_validates_lengths() {
        let desk = SupportDesk::new();
        let mut bad = ticket();
        bad.description = "short".into();
        assert!(matches!(
            desk.create(Uuid::new_v4(), bad),
            Err(SupportError::Validation(_))
        ));

        let t = desk.create(Uuid::new_v4(), ticket()).unwrap();
        assert_eq!(t.status, TicketStatus::Open);
    }

    #[test]
    fn test_tickets_scoped_to_owner() {
        let desk = SupportDesk::new();
        let owner = Uuid::new_v4();
        let t = desk.create(owner, ticket()).unwrap();
        assert!(desk.get(owner, t.id).is_ok());
        assert!(matches!(desk.get(Uuid::new_v4(), t.id), Err(SupportError::NotFound)));
        assert!(desk
            .list(Uuid::new_v4(), &TicketFilter::default(), PageRequest::default())
            .items
            .is_empty());
    }

    #[test]
    fn test_response_reopens_resolved_ticket() {
        let desk = SupportDesk::new();
        let owner = Uuid::new_v4();
        let t = desk.create(owner, ticket()).unwrap();
        desk.resolve(t.id, "Cleared the session cache").unwrap();

        let updated = desk.respond(owner, t.id, "Still happening today.").unwrap();
        assert_eq!(updated.status, TicketStatus::Open);
        assert!(updated.resolved_at.is_none());
        assert!(updated.description.contains("--- Customer Response ---"));
        assert!(updated.description.ends_with("Still happening today."));
    }

    #[test]
    fn test_closed_ticket_is_final() {
        let desk = SupportDesk::new();
        let owner = Uuid::new_v4();
        let t = desk.create(owner, ticket()).unwrap();
        let closed = desk.close(owner, t.id).unwrap();
        assert!(closed.resolved_at.is_some());

        assert!(matches!(desk.close(owner, t.id), Err(SupportError::Closed)));
        assert!(matches!(
            desk.respond(owner, t.id, "Another long reply"),
            Err(SupportError::Closed)
        ));
        assert_eq!(desk.stats(owner).closed, 1);
    }
}
