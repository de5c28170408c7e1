//! # modmail-relay
//!
//! Ticket lifecycle and message-relay core for a private-support bridge: a
//! requester's direct messages are relayed into a dedicated conversation
//! channel inside a managed group, and staff replies flow back, without
//! either party needing direct contact.
//!
//! The crate owns the hard parts only: mapping each requester to exactly one
//! live conversation, guarding creation and closure against races and abuse,
//! relaying messages with per-ticket ordering and edit/delete propagation,
//! and reclaiming idle conversations. The chat platform, durable policy
//! storage, and all presentation stay behind the [`ChatPlatform`],
//! [`TicketStore`], and [`PolicyProvider`] traits.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use modmail_relay::{JsonFileStore, RelayService, StaticPolicies};
//! # use modmail_relay::ChatPlatform;
//! # async fn demo(platform: Arc<dyn ChatPlatform>) -> anyhow::Result<()> {
//! let store = Arc::new(JsonFileStore::open(modmail_relay::default_store_path())?);
//! let service = RelayService::new(store, platform, Arc::new(StaticPolicies::default()));
//! service.rehydrate().await?;
//! let (_sweep, _shutdown) = service.spawn_auto_close();
//!
//! let receipt = service
//!     .on_inbound_direct_message("guild-1", "user-42", "msg-1", "hello, I need help")
//!     .await?;
//! assert!(receipt.created);
//! # Ok(())
//! # }
//! ```

pub mod autoclose;
pub mod close_flow;
pub mod cooldown;
pub mod error;
pub mod logging;
pub mod message_map;
pub mod platform;
pub mod policy;
pub mod registry;
pub mod relay;
pub mod service;
pub mod store;
pub mod ticket;

pub use autoclose::{AutoCloseScheduler, SweepReport, SWEEP_INTERVAL};
pub use close_flow::{CloseRequestOutcome, CloseWorkflow, ConfirmationOutcome, CONFIRM_WINDOW};
pub use cooldown::{ActionKind, CooldownConfig, CooldownGuard};
pub use error::{RelayError, Result, StoreError};
pub use logging::init_logging;
pub use message_map::{ForwardedRef, MessageMap};
pub use platform::ChatPlatform;
pub use policy::{AutoClosePolicy, GroupPolicy, PolicyProvider, StaticPolicies};
pub use registry::{CloseResult, TicketRegistry};
pub use relay::{InboundReceipt, RelayEngine};
pub use service::{RelayService, ServiceConfig};
pub use store::{default_store_path, JsonFileStore, TicketStore};
pub use ticket::{ClosedBy, Ticket, TicketKey};
