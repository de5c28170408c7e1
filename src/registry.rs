//! Authoritative in-memory index of live tickets.
//!
//! All state mutation for a given ticket key runs inside that key's critical
//! section, so concurrent first messages cannot create two conversations and
//! racing close paths cannot double-fire side effects. Events for different
//! keys proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::cooldown::{ActionKind, CooldownGuard};
use crate::error::{RelayError, Result};
use crate::platform::ChatPlatform;
use crate::policy::GroupPolicy;
use crate::store::TicketStore;
use crate::ticket::{ClosedBy, Ticket, TicketKey};

/// Outcome of a close request. `AlreadyClosed` is a success: the caller skips
/// closure side effects but reports no error.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseResult {
    Closed(Ticket),
    AlreadyClosed,
}

pub struct TicketRegistry {
    store: Arc<dyn TicketStore>,
    platform: Arc<dyn ChatPlatform>,
    cooldown: Arc<CooldownGuard>,
    open: RwLock<HashMap<TicketKey, Ticket>>,
    by_channel: RwLock<HashMap<String, TicketKey>>,
    // Per-key critical sections. Entries are kept for the process lifetime;
    // dropping one while a holder is parked would let a second lock appear
    // for the same key.
    locks: Mutex<HashMap<TicketKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TicketRegistry {
    pub fn new(
        store: Arc<dyn TicketStore>,
        platform: Arc<dyn ChatPlatform>,
        cooldown: Arc<CooldownGuard>,
    ) -> Self {
        Self {
            store,
            platform,
            cooldown,
            open: RwLock::new(HashMap::new()),
            by_channel: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild the open-ticket index from the store after a restart. Returns
    /// how many tickets were restored.
    pub async fn rehydrate(&self) -> Result<usize> {
        let tickets = self.store.open_tickets().await?;
        let count = tickets.len();

        let mut open = self.open.write();
        let mut by_channel = self.by_channel.write();
        for ticket in tickets {
            by_channel.insert(ticket.conversation_channel_id.clone(), ticket.key.clone());
            open.insert(ticket.key.clone(), ticket);
        }

        tracing::info!(target: "modmail::registry", restored = count, "rehydrated open tickets");
        Ok(count)
    }

    pub(crate) fn key_lock(&self, key: &TicketKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Resolve the requester's live ticket, creating one (and its conversation
    /// channel) if none exists. The bool is `true` only for a genuine create.
    pub async fn resolve_or_create(
        &self,
        group_id: &str,
        requester_id: &str,
        policy: &GroupPolicy,
    ) -> Result<(Ticket, bool)> {
        let key = TicketKey::new(group_id, requester_id);
        let lock = self.key_lock(&key);
        let _serial = lock.lock().await;

        if let Some(existing) = self.open.read().get(&key).cloned() {
            return Ok((existing, false));
        }

        let open_for_requester = self
            .open
            .read()
            .keys()
            .filter(|k| k.requester_id == requester_id)
            .count();
        if open_for_requester >= policy.max_open_tickets {
            return Err(RelayError::LimitExceeded {
                limit: policy.max_open_tickets,
            });
        }

        let now = Instant::now();
        if !self
            .cooldown
            .try_consume(requester_id, ActionKind::CreateTicket, now)
        {
            let retry_after = self
                .cooldown
                .retry_after(requester_id, ActionKind::CreateTicket, now)
                .unwrap_or_default();
            return Err(RelayError::RateLimited { retry_after });
        }

        let channel_id = self
            .platform
            .create_conversation_channel(group_id, requester_id)
            .await
            .map_err(RelayError::platform)?;

        let ticket = Ticket::open(key.clone(), channel_id.clone(), Utc::now());
        // If this write fails the channel is orphaned on the platform side;
        // the ticket itself never becomes live.
        self.store.put(&ticket).await?;

        self.open.write().insert(key.clone(), ticket.clone());
        self.by_channel.write().insert(channel_id, key.clone());

        tracing::info!(
            target: "modmail::registry",
            ticket = %key,
            channel = %ticket.conversation_channel_id,
            "opened ticket"
        );
        Ok((ticket, true))
    }

    pub fn get(&self, key: &TicketKey) -> Option<Ticket> {
        self.open.read().get(key).cloned()
    }

    /// Reverse lookup for outbound relay: conversation channel to live ticket.
    pub fn lookup_by_conversation_channel(&self, channel_id: &str) -> Option<Ticket> {
        let key = self.by_channel.read().get(channel_id).cloned()?;
        self.open.read().get(&key).cloned()
    }

    /// Snapshot of all open tickets, for the inactivity sweep.
    pub fn open_snapshot(&self) -> Vec<Ticket> {
        self.open.read().values().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Close the ticket. Idempotent: closing an already-closed (or unknown)
    /// ticket is a no-op success, so racing manual and automatic closure can
    /// never double-fire side effects. Returns the previous state so the
    /// caller performs cleanup only on genuine first-close.
    pub async fn close(
        &self,
        key: &TicketKey,
        closed_by: ClosedBy,
        reason: Option<String>,
    ) -> Result<CloseResult> {
        let lock = self.key_lock(key);
        let _serial = lock.lock().await;

        let Some(mut ticket) = self.open.read().get(key).cloned() else {
            return Ok(CloseResult::AlreadyClosed);
        };

        ticket.mark_closed(closed_by, reason, Utc::now());
        // Persist first: if the store rejects the write the ticket stays open
        // and the caller may retry.
        self.store.put(&ticket).await?;

        self.open.write().remove(key);
        self.by_channel
            .write()
            .remove(&ticket.conversation_channel_id);

        tracing::info!(
            target: "modmail::registry",
            ticket = %key,
            closed_by = ?ticket.closed_by,
            reason = ticket.close_reason.as_deref().unwrap_or(""),
            "closed ticket"
        );
        Ok(CloseResult::Closed(ticket))
    }

    /// Record relay activity on the ticket. Fire-and-forget: the index is
    /// updated synchronously, persistence happens in the background and a
    /// failure is logged, never surfaced to the message path.
    pub fn touch(self: &Arc<Self>, key: &TicketKey) {
        let updated = {
            let mut open = self.open.write();
            match open.get_mut(key) {
                Some(ticket) => {
                    ticket.last_activity_at = Utc::now();
                    Some(ticket.clone())
                }
                None => None,
            }
        };
        let Some(ticket) = updated else { return };

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = registry.store.put(&ticket).await {
                tracing::warn!(
                    target: "modmail::registry",
                    ticket = %ticket.key,
                    error = %error,
                    "activity timestamp write failed"
                );
            }
        });
    }
}
