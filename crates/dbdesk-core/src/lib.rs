//! Core domain model for the DB Desk client/ticket importer.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grouping key for client names: lowercase, whitespace runs collapsed, trimmed.
pub fn normalize_name(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identifier used when a row carries no external id of its own.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    Closed,
    ClosedRemote,
    ClosedOnsite,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
            Self::ClosedRemote => "CLOSED_REMOTE",
            Self::ClosedOnsite => "CLOSED_ONSITE",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed label → enum table with a fallback value.
///
/// Lookups are exact and case-sensitive. Anything not in the table, including
/// an empty or missing label, resolves to `default`; translation never fails.
#[derive(Debug, Clone, Copy)]
pub struct Vocabulary<T: Copy + 'static> {
    entries: &'static [(&'static str, T)],
    default: T,
}

impl<T: Copy + 'static> Vocabulary<T> {
    pub const fn new(entries: &'static [(&'static str, T)], default: T) -> Self {
        Self { entries, default }
    }

    pub fn translate(&self, label: Option<&str>) -> T {
        let Some(label) = label else {
            return self.default;
        };
        self.entries
            .iter()
            .find(|(source, _)| *source == label)
            .map(|(_, target)| *target)
            .unwrap_or(self.default)
    }

    pub fn default_value(&self) -> T {
        self.default
    }
}

pub const STATUS_VOCABULARY: Vocabulary<TicketStatus> = Vocabulary::new(
    &[
        ("OPEN", TicketStatus::Open),
        ("CLOSED", TicketStatus::Closed),
        ("CHIUSO", TicketStatus::Closed),
        ("CHIUSA ONSITE", TicketStatus::ClosedOnsite),
        ("CHIUSO ONSITE", TicketStatus::ClosedOnsite),
        ("CHIUSA REMOTO", TicketStatus::ClosedRemote),
        ("CHIUSO REMOTO", TicketStatus::ClosedRemote),
        ("PLANNED", TicketStatus::Open),
        ("PLANNED_ONSITE", TicketStatus::Open),
        ("VERIFYING", TicketStatus::Open),
        ("WAITING_CLIENT", TicketStatus::Open),
        ("APERTO", TicketStatus::Open),
        ("IN ATTESA CLIENTE", TicketStatus::Open),
        ("DA RIPORTARE", TicketStatus::Open),
    ],
    TicketStatus::Open,
);

pub const PRIORITY_VOCABULARY: Vocabulary<TicketPriority> = Vocabulary::new(
    &[
        ("BASSA", TicketPriority::Low),
        ("MEDIA", TicketPriority::Medium),
        ("ALTA", TicketPriority::High),
        ("URGENTE", TicketPriority::Urgent),
    ],
    TicketPriority::Medium,
);

/// Client row as read from the external clients extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawClientRecord {
    /// 1-based data row number in the source extract.
    pub row: usize,
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub chain: Option<String>,
}

/// Ticket row as read from the external tickets extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawTicketRecord {
    pub row: usize,
    pub external_id: Option<String>,
    pub ticket_number: Option<String>,
    pub client_ref_id: Option<String>,
    pub client_name: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
}

impl RawTicketRecord {
    /// Best identifier for log lines: ticket number, then external id.
    pub fn display_ref(&self) -> &str {
        self.ticket_number
            .as_deref()
            .or(self.external_id.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClient {
    /// Explicit identifier; the store generates one when absent.
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub chain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedClient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub chain: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub client_id: String,
    pub assigned_to_id: String,
    pub created_by_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTicket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub client_id: String,
    pub assigned_to_id: String,
    pub created_by_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Technician,
    User,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Technician => "TECHNICIAN",
            Self::User => "USER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(Self::Admin),
            "TECHNICIAN" => Some(Self::Technician),
            "USER" => Some(Self::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_name("  Acme   Srl "), "acme srl");
        assert_eq!(normalize_name("ACME\tSRL"), "acme srl");
        assert_eq!(normalize_name("Caffè  Roma"), "caffè roma");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn unknown_or_empty_labels_fall_back_to_defaults() {
        assert_eq!(STATUS_VOCABULARY.translate(Some("BOGUS_STATUS")), TicketStatus::Open);
        assert_eq!(STATUS_VOCABULARY.translate(None), TicketStatus::Open);
        assert_eq!(PRIORITY_VOCABULARY.translate(Some("")), TicketPriority::Medium);
        assert_eq!(PRIORITY_VOCABULARY.translate(None), TicketPriority::Medium);
    }

    #[test]
    fn status_lookup_is_case_sensitive() {
        assert_eq!(
            STATUS_VOCABULARY.translate(Some("CHIUSA ONSITE")),
            TicketStatus::ClosedOnsite
        );
        assert_eq!(STATUS_VOCABULARY.translate(Some("chiusa onsite")), TicketStatus::Open);
        assert_eq!(
            STATUS_VOCABULARY.translate(Some("CHIUSO REMOTO")),
            TicketStatus::ClosedRemote
        );
        assert_eq!(STATUS_VOCABULARY.translate(Some("CHIUSO")), TicketStatus::Closed);
    }

    #[test]
    fn priority_table_maps_italian_labels() {
        assert_eq!(PRIORITY_VOCABULARY.translate(Some("BASSA")), TicketPriority::Low);
        assert_eq!(PRIORITY_VOCABULARY.translate(Some("ALTA")), TicketPriority::High);
        assert_eq!(PRIORITY_VOCABULARY.translate(Some("URGENTE")), TicketPriority::Urgent);
        assert_eq!(PRIORITY_VOCABULARY.translate(Some("Alta")), TicketPriority::Medium);
    }

    #[test]
    fn display_ref_prefers_ticket_number() {
        let mut ticket = RawTicketRecord {
            external_id: Some("t-1".into()),
            ticket_number: Some("T0042".into()),
            ..Default::default()
        };
        assert_eq!(ticket.display_ref(), "T0042");
        ticket.ticket_number = None;
        assert_eq!(ticket.display_ref(), "t-1");
        ticket.external_id = None;
        assert_eq!(ticket.display_ref(), "unknown");
    }
}
