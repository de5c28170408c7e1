//! Bidirectional message forwarding between a requester's private channel and
//! the ticket's conversation channel.
//!
//! Delivery for a given ticket runs inside that ticket's critical section, so
//! messages from the same requester reach the conversation channel in receipt
//! order even under concurrent delivery latency.

use std::sync::Arc;
use std::time::Instant;

use crate::cooldown::{ActionKind, CooldownGuard};
use crate::error::{RelayError, Result};
use crate::message_map::{ForwardedRef, MessageMap};
use crate::platform::ChatPlatform;
use crate::policy::PolicyProvider;
use crate::registry::TicketRegistry;
use crate::ticket::Ticket;

/// Result of relaying an inbound direct message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReceipt {
    pub ticket: Ticket,
    /// `true` only when this message opened the ticket.
    pub created: bool,
}

pub struct RelayEngine {
    registry: Arc<TicketRegistry>,
    platform: Arc<dyn ChatPlatform>,
    policies: Arc<dyn PolicyProvider>,
    cooldown: Arc<CooldownGuard>,
    map: Arc<MessageMap>,
}

impl RelayEngine {
    pub fn new(
        registry: Arc<TicketRegistry>,
        platform: Arc<dyn ChatPlatform>,
        policies: Arc<dyn PolicyProvider>,
        cooldown: Arc<CooldownGuard>,
        map: Arc<MessageMap>,
    ) -> Self {
        Self {
            registry,
            platform,
            policies,
            cooldown,
            map,
        }
    }

    /// Relay a requester's direct message into the conversation channel,
    /// opening a ticket if this is the first message.
    pub async fn forward_inbound(
        &self,
        group_id: &str,
        requester_id: &str,
        source_message_id: &str,
        text: &str,
    ) -> Result<InboundReceipt> {
        let policy = self.policies.policy(group_id).await;
        let (ticket, created) = self
            .registry
            .resolve_or_create(group_id, requester_id, &policy)
            .await?;

        let now = Instant::now();
        if !self
            .cooldown
            .try_consume(requester_id, ActionKind::RequesterMessage, now)
        {
            let retry_after = self
                .cooldown
                .retry_after(requester_id, ActionKind::RequesterMessage, now)
                .unwrap_or_default();
            return Err(RelayError::RateLimited { retry_after });
        }

        let lock = self.registry.key_lock(&ticket.key);
        let _serial = lock.lock().await;

        let forwarded_id = self
            .platform
            .post_message(
                &ticket.conversation_channel_id,
                &format!("{requester_id}: {text}"),
            )
            .await
            .map_err(RelayError::platform)?;

        self.map.insert(
            source_message_id,
            ForwardedRef {
                channel_id: ticket.conversation_channel_id.clone(),
                message_id: forwarded_id,
                key: ticket.key.clone(),
            },
        );
        self.registry.touch(&ticket.key);

        tracing::debug!(
            target: "modmail::relay",
            ticket = %ticket.key,
            created = created,
            "relayed inbound message"
        );
        Ok(InboundReceipt { ticket, created })
    }

    /// Relay a staff reply from the conversation channel to the requester's
    /// private channel. Fails with `NoActiveTicket` when the channel is not a
    /// live conversation (e.g. stale channel after close); the caller must
    /// surface that to the sender.
    pub async fn forward_outbound(
        &self,
        conversation_channel_id: &str,
        staff_id: &str,
        source_message_id: &str,
        text: &str,
    ) -> Result<Ticket> {
        let ticket = self
            .registry
            .lookup_by_conversation_channel(conversation_channel_id)
            .ok_or(RelayError::NoActiveTicket)?;

        let now = Instant::now();
        if !self.cooldown.try_consume(staff_id, ActionKind::StaffReply, now) {
            let retry_after = self
                .cooldown
                .retry_after(staff_id, ActionKind::StaffReply, now)
                .unwrap_or_default();
            return Err(RelayError::RateLimited { retry_after });
        }

        let lock = self.registry.key_lock(&ticket.key);
        let _serial = lock.lock().await;

        let dm_channel = self
            .platform
            .open_direct_channel(&ticket.key.requester_id)
            .await
            .map_err(RelayError::platform)?;
        let forwarded_id = self
            .platform
            .post_message(&dm_channel, text)
            .await
            .map_err(RelayError::platform)?;

        self.map.insert(
            source_message_id,
            ForwardedRef {
                channel_id: dm_channel,
                message_id: forwarded_id,
                key: ticket.key.clone(),
            },
        );
        self.registry.touch(&ticket.key);

        tracing::debug!(
            target: "modmail::relay",
            ticket = %ticket.key,
            staff = %staff_id,
            "relayed outbound message"
        );
        Ok(ticket)
    }

    /// Propagate an edit of a source message to its forwarded copy.
    /// Best-effort: a missing mapping (evicted, or predates a restart) and a
    /// platform failure are both logged, never surfaced.
    pub async fn propagate_edit(&self, source_message_id: &str, new_text: &str) {
        let Some(forwarded) = self.map.get(source_message_id) else {
            tracing::debug!(
                target: "modmail::relay",
                source = %source_message_id,
                "edit for unmapped message, skipping"
            );
            return;
        };

        if let Err(error) = self
            .platform
            .edit_message(&forwarded.channel_id, &forwarded.message_id, new_text)
            .await
        {
            tracing::warn!(
                target: "modmail::relay",
                ticket = %forwarded.key,
                error = %error,
                "edit propagation failed"
            );
        }
    }

    /// Propagate a delete of a source message to its forwarded copy.
    /// Best-effort, same degradation rules as [`propagate_edit`].
    ///
    /// [`propagate_edit`]: RelayEngine::propagate_edit
    pub async fn propagate_delete(&self, source_message_id: &str) {
        let Some(forwarded) = self.map.get(source_message_id) else {
            tracing::debug!(
                target: "modmail::relay",
                source = %source_message_id,
                "delete for unmapped message, skipping"
            );
            return;
        };

        if let Err(error) = self
            .platform
            .delete_message(&forwarded.channel_id, &forwarded.message_id)
            .await
        {
            tracing::warn!(
                target: "modmail::relay",
                ticket = %forwarded.key,
                error = %error,
                "delete propagation failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::cooldown::CooldownConfig;
    use crate::error::StoreError;
    use crate::policy::{GroupPolicy, StaticPolicies};
    use crate::store::TicketStore;
    use crate::ticket::{Ticket, TicketKey};

    #[derive(Default)]
    struct MemStore {
        tickets: Mutex<HashMap<TicketKey, Ticket>>,
    }

    #[async_trait]
    impl TicketStore for MemStore {
        async fn put(&self, ticket: &Ticket) -> std::result::Result<(), StoreError> {
            self.tickets.lock().insert(ticket.key.clone(), ticket.clone());
            Ok(())
        }

        async fn open_tickets(&self) -> std::result::Result<Vec<Ticket>, StoreError> {
            Ok(self
                .tickets
                .lock()
                .values()
                .filter(|t| !t.closed)
                .cloned()
                .collect())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Post { channel: String, content: String },
        Edit { channel: String, message: String, content: String },
        Delete { channel: String, message: String },
    }

    #[derive(Default)]
    struct RecordingPlatform {
        calls: Mutex<Vec<Call>>,
        posted: AtomicUsize,
        post_delay: Option<Duration>,
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        async fn create_conversation_channel(
            &self,
            group_id: &str,
            requester_id: &str,
        ) -> anyhow::Result<String> {
            Ok(format!("conv-{group_id}-{requester_id}"))
        }

        async fn open_direct_channel(&self, user_id: &str) -> anyhow::Result<String> {
            Ok(format!("dm-{user_id}"))
        }

        async fn post_message(&self, channel_id: &str, content: &str) -> anyhow::Result<String> {
            if let Some(delay) = self.post_delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().push(Call::Post {
                channel: channel_id.into(),
                content: content.into(),
            });
            Ok(format!("fwd-{}", self.posted.fetch_add(1, Ordering::SeqCst)))
        }

        async fn edit_message(
            &self,
            channel_id: &str,
            message_id: &str,
            content: &str,
        ) -> anyhow::Result<()> {
            self.calls.lock().push(Call::Edit {
                channel: channel_id.into(),
                message: message_id.into(),
                content: content.into(),
            });
            Ok(())
        }

        async fn delete_message(&self, channel_id: &str, message_id: &str) -> anyhow::Result<()> {
            self.calls.lock().push(Call::Delete {
                channel: channel_id.into(),
                message: message_id.into(),
            });
            Ok(())
        }
    }

    fn no_cooldowns() -> CooldownConfig {
        CooldownConfig {
            create_ticket: Duration::ZERO,
            requester_message: Duration::ZERO,
            staff_reply: Duration::ZERO,
        }
    }

    fn engine_with(platform: Arc<RecordingPlatform>, cooldowns: CooldownConfig) -> Arc<RelayEngine> {
        let cooldown = Arc::new(CooldownGuard::new(cooldowns));
        let registry = Arc::new(TicketRegistry::new(
            Arc::new(MemStore::default()),
            platform.clone(),
            cooldown.clone(),
        ));
        Arc::new(RelayEngine::new(
            registry,
            platform,
            Arc::new(StaticPolicies::default()),
            cooldown,
            Arc::new(MessageMap::default()),
        ))
    }

    fn posts(platform: &RecordingPlatform) -> Vec<(String, String)> {
        platform
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Post { channel, content } => Some((channel.clone(), content.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn first_inbound_opens_ticket_and_relays() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform.clone(), no_cooldowns());

        let receipt = engine
            .forward_inbound("g", "alice", "src-1", "hello")
            .await
            .unwrap();
        assert!(receipt.created);

        let posts = posts(&platform);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "conv-g-alice");
        assert_eq!(posts[0].1, "alice: hello");
    }

    #[tokio::test]
    async fn second_inbound_reuses_ticket() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform.clone(), no_cooldowns());

        let first = engine
            .forward_inbound("g", "alice", "src-1", "hello")
            .await
            .unwrap();
        let second = engine
            .forward_inbound("g", "alice", "src-2", "anyone there?")
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.ticket.id, second.ticket.id);
        assert_eq!(posts(&platform).len(), 2);
    }

    #[tokio::test]
    async fn inbound_messages_keep_receipt_order() {
        let platform = Arc::new(RecordingPlatform {
            post_delay: Some(Duration::from_millis(10)),
            ..RecordingPlatform::default()
        });
        let engine = engine_with(platform.clone(), no_cooldowns());

        engine
            .forward_inbound("g", "alice", "src-1", "first")
            .await
            .unwrap();
        engine
            .forward_inbound("g", "alice", "src-2", "second")
            .await
            .unwrap();

        let posts = posts(&platform);
        assert_eq!(posts[0].1, "alice: first");
        assert_eq!(posts[1].1, "alice: second");
    }

    #[tokio::test]
    async fn inbound_rate_limit_rejects_burst() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(
            platform,
            CooldownConfig {
                requester_message: Duration::from_secs(2),
                ..no_cooldowns()
            },
        );

        engine
            .forward_inbound("g", "alice", "src-1", "hello")
            .await
            .unwrap();
        let err = engine
            .forward_inbound("g", "alice", "src-2", "hello again")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn outbound_reaches_requester_dm() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform.clone(), no_cooldowns());

        let receipt = engine
            .forward_inbound("g", "alice", "src-1", "hello")
            .await
            .unwrap();
        engine
            .forward_outbound(
                &receipt.ticket.conversation_channel_id,
                "staff-1",
                "src-2",
                "how can we help?",
            )
            .await
            .unwrap();

        let posts = posts(&platform);
        assert_eq!(posts[1].0, "dm-alice");
        assert_eq!(posts[1].1, "how can we help?");
    }

    #[tokio::test]
    async fn outbound_to_unknown_channel_fails() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform, no_cooldowns());

        let err = engine
            .forward_outbound("stale-channel", "staff-1", "src-1", "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NoActiveTicket));
    }

    #[tokio::test]
    async fn edit_and_delete_follow_the_forwarded_copy() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform.clone(), no_cooldowns());

        engine
            .forward_inbound("g", "alice", "src-1", "helo")
            .await
            .unwrap();
        engine.propagate_edit("src-1", "alice: hello").await;
        engine.propagate_delete("src-1").await;

        let calls = platform.calls.lock().clone();
        assert!(matches!(
            &calls[1],
            Call::Edit { channel, message, content }
                if channel == "conv-g-alice" && message == "fwd-0" && content == "alice: hello"
        ));
        assert!(matches!(
            &calls[2],
            Call::Delete { channel, message }
                if channel == "conv-g-alice" && message == "fwd-0"
        ));
    }

    #[tokio::test]
    async fn edit_of_unmapped_message_is_silent() {
        let platform = Arc::new(RecordingPlatform::default());
        let engine = engine_with(platform.clone(), no_cooldowns());

        engine.propagate_edit("never-seen", "new text").await;
        engine.propagate_delete("never-seen").await;
        assert!(platform.calls.lock().is_empty());
    }
}
