//! Confirmation, cancellation, and timeout when closing a ticket.
//!
//! Each outstanding confirmation is a tokened waiter with a bounded lifetime:
//! a generation number ties the expiry timer to the request that created it,
//! so a replaced request simply orphans the old timer. Manual closure and the
//! inactivity sweep both terminate a ticket through [`CloseWorkflow::close_now`],
//! which delegates to the registry's idempotent close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::message_map::MessageMap;
use crate::platform::ChatPlatform;
use crate::registry::{CloseResult, TicketRegistry};
use crate::ticket::{ClosedBy, TicketKey};

/// Fixed lifetime of an outstanding close confirmation.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct PendingClose {
    initiator_id: String,
    reason: Option<String>,
    requested_at: Instant,
    generation: u64,
}

/// Outcome of a close request.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseRequestOutcome {
    /// Policy did not require confirmation; the ticket is closed.
    Closed(crate::ticket::Ticket),
    /// The ticket was already closed; nothing happened.
    AlreadyClosed,
    /// A confirmation is now pending and will expire after `expires_in`.
    AwaitingConfirmation { expires_in: Duration },
}

/// Outcome of a confirmation response.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Closed(crate::ticket::Ticket),
    AlreadyClosed,
    Cancelled,
}

pub struct CloseWorkflow {
    registry: Arc<TicketRegistry>,
    platform: Arc<dyn ChatPlatform>,
    map: Arc<MessageMap>,
    pending: Mutex<HashMap<TicketKey, PendingClose>>,
    confirm_window: Duration,
    generations: AtomicU64,
}

impl CloseWorkflow {
    pub fn new(
        registry: Arc<TicketRegistry>,
        platform: Arc<dyn ChatPlatform>,
        map: Arc<MessageMap>,
    ) -> Self {
        Self::with_confirm_window(registry, platform, map, CONFIRM_WINDOW)
    }

    /// Same as [`CloseWorkflow::new`] with a custom confirmation lifetime.
    pub fn with_confirm_window(
        registry: Arc<TicketRegistry>,
        platform: Arc<dyn ChatPlatform>,
        map: Arc<MessageMap>,
        confirm_window: Duration,
    ) -> Self {
        Self {
            registry,
            platform,
            map,
            pending: Mutex::new(HashMap::new()),
            confirm_window,
            generations: AtomicU64::new(0),
        }
    }

    /// Begin closing a ticket. Closes immediately when the group policy does
    /// not require confirmation; otherwise parks a pending confirmation and
    /// arms its expiry timer. A second request while one is pending replaces
    /// it and restarts the timer.
    pub async fn request_close(
        self: &Arc<Self>,
        key: &TicketKey,
        initiator_id: &str,
        reason: Option<String>,
        confirmation_required: bool,
    ) -> Result<CloseRequestOutcome> {
        if !confirmation_required {
            return match self
                .close_now(key, ClosedBy::Staff(initiator_id.to_string()), reason)
                .await?
            {
                CloseResult::Closed(ticket) => Ok(CloseRequestOutcome::Closed(ticket)),
                CloseResult::AlreadyClosed => Ok(CloseRequestOutcome::AlreadyClosed),
            };
        }

        if self.registry.get(key).is_none() {
            return Ok(CloseRequestOutcome::AlreadyClosed);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(
            key.clone(),
            PendingClose {
                initiator_id: initiator_id.to_string(),
                reason,
                requested_at: Instant::now(),
                generation,
            },
        );

        let workflow = Arc::clone(self);
        let expire_key = key.clone();
        let window = self.confirm_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            workflow.expire(&expire_key, generation).await;
        });

        tracing::debug!(
            target: "modmail::close",
            ticket = %key,
            initiator = %initiator_id,
            "close confirmation pending"
        );
        Ok(CloseRequestOutcome::AwaitingConfirmation {
            expires_in: window,
        })
    }

    /// Confirm a pending close. Fails with `Expired` when no confirmation is
    /// pending or its window has elapsed.
    pub async fn confirm(&self, key: &TicketKey) -> Result<ConfirmationOutcome> {
        let pending = {
            let mut pending = self.pending.lock();
            pending.remove(key).ok_or(RelayError::Expired)?
        };
        if pending.requested_at.elapsed() >= self.confirm_window {
            // The timer task lost the race; treat it as expired anyway.
            return Err(RelayError::Expired);
        }

        match self
            .close_now(key, ClosedBy::Staff(pending.initiator_id), pending.reason)
            .await?
        {
            CloseResult::Closed(ticket) => Ok(ConfirmationOutcome::Closed(ticket)),
            CloseResult::AlreadyClosed => Ok(ConfirmationOutcome::AlreadyClosed),
        }
    }

    /// Cancel a pending close, returning the ticket to its open state with no
    /// side effects. Fails with `Expired` when nothing is pending.
    pub fn cancel(&self, key: &TicketKey) -> Result<ConfirmationOutcome> {
        self.pending
            .lock()
            .remove(key)
            .ok_or(RelayError::Expired)?;
        tracing::debug!(target: "modmail::close", ticket = %key, "close cancelled");
        Ok(ConfirmationOutcome::Cancelled)
    }

    /// Expiry path, invoked by the timer armed in [`request_close`]. The
    /// generation check makes a replaced request's stale timer a no-op.
    ///
    /// [`request_close`]: CloseWorkflow::request_close
    async fn expire(&self, key: &TicketKey, generation: u64) {
        let expired = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(p) if p.generation == generation => pending.remove(key),
                _ => None,
            }
        };
        let Some(pending) = expired else { return };

        tracing::info!(
            target: "modmail::close",
            ticket = %key,
            initiator = %pending.initiator_id,
            "close confirmation timed out"
        );

        // Report the timeout where the initiator asked, unlike a plain cancel.
        if let Some(ticket) = self.registry.get(key) {
            if let Err(error) = self
                .platform
                .post_message(
                    &ticket.conversation_channel_id,
                    "Ticket close cancelled: confirmation timed out.",
                )
                .await
            {
                tracing::warn!(
                    target: "modmail::close",
                    ticket = %key,
                    error = %error,
                    "timeout notice failed"
                );
            }
        }
    }

    /// The single terminal close path, shared by manual closure and the
    /// inactivity sweep. Announces the closure to both sides only on genuine
    /// first-close; announcements are best-effort once the state transition
    /// has committed.
    pub async fn close_now(
        &self,
        key: &TicketKey,
        closed_by: ClosedBy,
        reason: Option<String>,
    ) -> Result<CloseResult> {
        let result = self.registry.close(key, closed_by, reason).await?;
        self.pending.lock().remove(key);

        if let CloseResult::Closed(ticket) = &result {
            self.map.evict_ticket(key);
            self.announce(ticket).await;
        }
        Ok(result)
    }

    async fn announce(&self, ticket: &crate::ticket::Ticket) {
        let reason = ticket.close_reason.as_deref().unwrap_or("No reason provided");
        let notice = format!("This ticket has been closed. Reason: {reason}");

        if let Err(error) = self
            .platform
            .post_message(&ticket.conversation_channel_id, &notice)
            .await
        {
            tracing::warn!(
                target: "modmail::close",
                ticket = %ticket.key,
                error = %error,
                "channel closure notice failed"
            );
        }

        match self
            .platform
            .open_direct_channel(&ticket.key.requester_id)
            .await
        {
            Ok(dm_channel) => {
                if let Err(error) = self.platform.post_message(&dm_channel, &notice).await {
                    tracing::warn!(
                        target: "modmail::close",
                        ticket = %ticket.key,
                        error = %error,
                        "requester closure notice failed"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    target: "modmail::close",
                    ticket = %ticket.key,
                    error = %error,
                    "requester channel unavailable for closure notice"
                );
            }
        }
    }

    /// Whether a confirmation is currently pending for the ticket.
    pub fn is_pending(&self, key: &TicketKey) -> bool {
        self.pending.lock().contains_key(key)
    }
}
