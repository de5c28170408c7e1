use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cap on tracked (actor, kind) entries. Stale entries are pruned when the
/// table grows past this.
const MAX_TRACKED: usize = 4096;

/// The rate-limited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreateTicket,
    RequesterMessage,
    StaffReply,
}

/// Per-kind cooldown windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownConfig {
    pub create_ticket: Duration,
    pub requester_message: Duration,
    pub staff_reply: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            create_ticket: Duration::from_secs(60),
            requester_message: Duration::from_secs(2),
            staff_reply: Duration::from_secs(1),
        }
    }
}

impl CooldownConfig {
    fn window(&self, kind: ActionKind) -> Duration {
        match kind {
            ActionKind::CreateTicket => self.create_ticket,
            ActionKind::RequesterMessage => self.requester_message,
            ActionKind::StaffReply => self.staff_reply,
        }
    }

    fn longest_window(&self) -> Duration {
        self.create_ticket
            .max(self.requester_message)
            .max(self.staff_reply)
    }
}

/// Per-actor rate limiter for ticket creation and message sends.
///
/// The check-and-record step runs under one lock so concurrent calls for the
/// same actor see a single authoritative timestamp, never a read-modify-write
/// race.
#[derive(Debug)]
pub struct CooldownGuard {
    config: CooldownConfig,
    last_permitted: Mutex<HashMap<(String, ActionKind), Instant>>,
}

impl CooldownGuard {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            last_permitted: Mutex::new(HashMap::new()),
        }
    }

    /// Permit the action and record `now`, or reject it if the actor is still
    /// inside the window for this kind.
    pub fn try_consume(&self, actor_id: &str, kind: ActionKind, now: Instant) -> bool {
        let mut last = self.last_permitted.lock();

        if let Some(permitted_at) = last.get(&(actor_id.to_string(), kind)) {
            if now.duration_since(*permitted_at) < self.config.window(kind) {
                return false;
            }
        }

        if last.len() >= MAX_TRACKED {
            let horizon = self.config.longest_window();
            last.retain(|_, permitted_at| now.duration_since(*permitted_at) < horizon);
        }

        last.insert((actor_id.to_string(), kind), now);
        true
    }

    /// Time remaining before the actor may perform the action again.
    /// `None` means the action would be permitted now.
    pub fn retry_after(&self, actor_id: &str, kind: ActionKind, now: Instant) -> Option<Duration> {
        let last = self.last_permitted.lock();
        let permitted_at = last.get(&(actor_id.to_string(), kind))?;
        self.config
            .window(kind)
            .checked_sub(now.duration_since(*permitted_at))
            .filter(|remaining| !remaining.is_zero())
    }
}
