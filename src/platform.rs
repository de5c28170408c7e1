//! Interface to the chat platform collaborator.
//!
//! The core consumes channel/message primitives only; presentation (embeds,
//! buttons, slash-command parsing) stays on the platform side.

use async_trait::async_trait;

/// Platform operations the relay core depends on. All ids are the platform's
/// opaque strings. Implementations are expected to be cheap to clone behind an
/// `Arc` and safe to call concurrently.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Create the staff-facing conversation channel for a new ticket and
    /// return its id.
    async fn create_conversation_channel(
        &self,
        group_id: &str,
        requester_id: &str,
    ) -> anyhow::Result<String>;

    /// Resolve (opening if needed) the requester's private channel.
    async fn open_direct_channel(&self, user_id: &str) -> anyhow::Result<String>;

    /// Post a message into a channel, returning the new message id.
    async fn post_message(&self, channel_id: &str, content: &str) -> anyhow::Result<String>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> anyhow::Result<()>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> anyhow::Result<()>;
}
