use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite identity of a support conversation: one requester inside one
/// managed group. At most one non-closed [`Ticket`] may exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketKey {
    pub group_id: String,
    pub requester_id: String,
}

impl TicketKey {
    pub fn new(group_id: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            requester_id: requester_id.into(),
        }
    }
}

impl std::fmt::Display for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group_id, self.requester_id)
    }
}

/// Who performed the terminal close on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedBy {
    /// A staff member closed the ticket (manual close command).
    Staff(String),
    /// The inactivity sweep closed the ticket.
    System,
}

/// One requester's support conversation and its lifecycle state.
///
/// Tickets are never deleted. A ticket transitions to closed exactly once and
/// the closed record is retained for audit consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Stable audit id, assigned at creation.
    pub id: Uuid,
    pub key: TicketKey,
    /// The staff-facing channel created for this conversation.
    pub conversation_channel_id: String,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
    /// Updated on every relayed message in either direction.
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<ClosedBy>,
    pub close_reason: Option<String>,
}

impl Ticket {
    /// Create a freshly opened ticket.
    pub fn open(key: TicketKey, conversation_channel_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            conversation_channel_id,
            closed: false,
            created_at: now,
            last_activity_at: now,
            closed_at: None,
            closed_by: None,
            close_reason: None,
        }
    }

    /// Mark this ticket closed. The caller is responsible for persisting the
    /// result and for ensuring the transition happens at most once.
    pub fn mark_closed(&mut self, closed_by: ClosedBy, reason: Option<String>, now: DateTime<Utc>) {
        self.closed = true;
        self.closed_at = Some(now);
        self.closed_by = Some(closed_by);
        self.close_reason = reason;
    }

    /// Seconds of inactivity as of `now`. Saturates at zero for clock skew.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        let idle = now.signed_duration_since(self.last_activity_at);
        if idle < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            idle
        }
    }
}
