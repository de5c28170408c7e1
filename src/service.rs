//! Platform-facing surface of the relay core.
//!
//! One handler per platform event, each returning a specific outcome (or one
//! of the [`RelayError`] kinds) for the calling layer to render.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::autoclose::{AutoCloseScheduler, SWEEP_INTERVAL};
use crate::close_flow::{
    CloseRequestOutcome, CloseWorkflow, ConfirmationOutcome, CONFIRM_WINDOW,
};
use crate::cooldown::{CooldownConfig, CooldownGuard};
use crate::error::{RelayError, Result};
use crate::message_map::MessageMap;
use crate::platform::ChatPlatform;
use crate::policy::PolicyProvider;
use crate::registry::TicketRegistry;
use crate::relay::{InboundReceipt, RelayEngine};
use crate::store::TicketStore;
use crate::ticket::Ticket;

/// Tunables that are fixed per process rather than per group.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cooldowns: CooldownConfig,
    pub confirm_window: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cooldowns: CooldownConfig::default(),
            confirm_window: CONFIRM_WINDOW,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// Wires the registry, relay engine, close workflow, and sweep together over
/// one store, one platform, and one policy source.
pub struct RelayService {
    registry: Arc<TicketRegistry>,
    engine: RelayEngine,
    close_flow: Arc<CloseWorkflow>,
    policies: Arc<dyn PolicyProvider>,
    sweep_interval: Duration,
}

impl RelayService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        platform: Arc<dyn ChatPlatform>,
        policies: Arc<dyn PolicyProvider>,
    ) -> Self {
        Self::with_config(store, platform, policies, ServiceConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TicketStore>,
        platform: Arc<dyn ChatPlatform>,
        policies: Arc<dyn PolicyProvider>,
        config: ServiceConfig,
    ) -> Self {
        let cooldown = Arc::new(CooldownGuard::new(config.cooldowns));
        let map = Arc::new(MessageMap::default());
        let registry = Arc::new(TicketRegistry::new(store, platform.clone(), cooldown.clone()));
        let engine = RelayEngine::new(
            registry.clone(),
            platform.clone(),
            policies.clone(),
            cooldown,
            map.clone(),
        );
        let close_flow = Arc::new(CloseWorkflow::with_confirm_window(
            registry.clone(),
            platform,
            map,
            config.confirm_window,
        ));

        Self {
            registry,
            engine,
            close_flow,
            policies,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Restore the open-ticket index from the store. Call once at startup,
    /// before handling events.
    pub async fn rehydrate(&self) -> Result<usize> {
        self.registry.rehydrate().await
    }

    /// Spawn the inactivity sweep. Returns the task handle and the shutdown
    /// sender; flipping it to `true` stops the sweep after its current pass.
    pub fn spawn_auto_close(&self) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
        let scheduler = Arc::new(AutoCloseScheduler::new(
            self.registry.clone(),
            self.close_flow.clone(),
            self.policies.clone(),
            self.sweep_interval,
        ));
        let (tx, rx) = watch::channel(false);
        (tokio::spawn(scheduler.run(rx)), tx)
    }

    /// A requester wrote to the operator's inbox.
    pub async fn on_inbound_direct_message(
        &self,
        group_id: &str,
        requester_id: &str,
        source_message_id: &str,
        text: &str,
    ) -> Result<InboundReceipt> {
        self.engine
            .forward_inbound(group_id, requester_id, source_message_id, text)
            .await
    }

    /// Staff wrote inside a conversation channel.
    pub async fn on_conversation_channel_message(
        &self,
        conversation_channel_id: &str,
        staff_id: &str,
        source_message_id: &str,
        text: &str,
    ) -> Result<Ticket> {
        self.engine
            .forward_outbound(conversation_channel_id, staff_id, source_message_id, text)
            .await
    }

    /// A previously relayed message was edited at its source.
    pub async fn on_message_edited(&self, source_message_id: &str, new_text: &str) {
        self.engine.propagate_edit(source_message_id, new_text).await;
    }

    /// A previously relayed message was deleted at its source.
    pub async fn on_message_deleted(&self, source_message_id: &str) {
        self.engine.propagate_delete(source_message_id).await;
    }

    /// Staff issued the close command inside a conversation channel.
    pub async fn on_close_command(
        &self,
        conversation_channel_id: &str,
        initiator_id: &str,
        reason: Option<String>,
    ) -> Result<CloseRequestOutcome> {
        let ticket = self
            .registry
            .lookup_by_conversation_channel(conversation_channel_id)
            .ok_or(RelayError::NoActiveTicket)?;
        let policy = self.policies.policy(&ticket.key.group_id).await;

        self.close_flow
            .request_close(
                &ticket.key,
                initiator_id,
                reason,
                policy.close_confirmation,
            )
            .await
    }

    /// Staff answered the close confirmation prompt.
    pub async fn on_confirmation_response(
        &self,
        conversation_channel_id: &str,
        approved: bool,
    ) -> Result<ConfirmationOutcome> {
        let ticket = self
            .registry
            .lookup_by_conversation_channel(conversation_channel_id)
            .ok_or(RelayError::NoActiveTicket)?;

        if approved {
            self.close_flow.confirm(&ticket.key).await
        } else {
            self.close_flow.cancel(&ticket.key)
        }
    }

    /// Live ticket for a conversation channel, if any.
    pub fn ticket_for_channel(&self, conversation_channel_id: &str) -> Option<Ticket> {
        self.registry
            .lookup_by_conversation_channel(conversation_channel_id)
    }

    pub fn open_ticket_count(&self) -> usize {
        self.registry.open_count()
    }
}
