//! # Weir Coordinator
//!
//! The cluster-wide singleton of the weir CDC platform. It owns the
//! global view of all changefeeds and assigns each changefeed's
//! maintainer to exactly one worker node, rebalancing as the fleet
//! changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Coordinator Controller                    │
//! │              (single-consumer event loop + API)              │
//! ├──────────────┬───────────────┬───────────────────────────────┤
//! │ Bootstrapper │  Schedulers   │      Operator Controller      │
//! │  handshake   │ basic/balance │  add / move / remove in-flight│
//! ├──────────────┴───────────────┴───────────────────────────────┤
//! │                     Changefeed Registry                      │
//! │        Absent │ Scheduling │ Replicating │ Stopped           │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲ heartbeats                      │ commands
//!          └────────── maintainer nodes ◄────┘
//! ```
//!
//! Maintainers send periodic heartbeats carrying per-feed status; the
//! controller folds them into the registry and operator controller; the
//! schedulers inspect the registry and file new operators; the operator
//! controller sends commands to nodes, which ack via their next
//! heartbeat.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use weir_coordinator::{Controller, CoordinatorConfig, Event};
//!
//! let (event_tx, event_rx) = tokio::sync::mpsc::channel(1024);
//! let controller = Controller::new(
//!     CoordinatorConfig::new("coordinator-1"),
//!     backend,
//!     transport,
//!     node_manager,
//!     event_tx.clone(),
//!     updated_tx,
//!     state_tx,
//! )?;
//! controller.spawn_event_loop(event_rx);
//!
//! // wire incoming transport messages into the loop
//! event_tx.send(Event::Message(message)).await?;
//! ```

pub mod backend;
pub mod bootstrap;
pub mod changefeed;
pub mod config;
pub mod controller;
pub mod error;
pub mod messaging;
pub mod node;
pub mod observability;
pub mod operator;
pub mod operator_controller;
pub mod protocol;
pub mod registry;
pub mod scheduler;

// Re-export main types
pub use backend::{MemoryBackend, MetadataBackend};
pub use bootstrap::Bootstrapper;
pub use changefeed::{
    Changefeed, ChangefeedId, ChangefeedInfo, ChangefeedMeta, ChangefeedStatus, DisplayName,
    FeedState, Progress,
};
pub use config::{CoordinatorConfig, OwnerMismatchPolicy};
pub use controller::{ChangefeedStateChangeEvent, Controller, Event};
pub use error::{CoordinatorError, Result};
pub use messaging::{IncomingMessage, LocalRouter, MessageSender, OutboundMessage};
pub use node::{NodeId, NodeInfo, NodeManager};
pub use operator::{Operator, OperatorCommand, RemoveReason};
pub use operator_controller::OperatorController;
pub use protocol::{
    decode_message, encode_message, ComponentState, CoordinatorMessage, MaintainerStatus,
    RunningError,
};
pub use registry::{Bucket, ChangefeedRegistry, RegistrySizes};
pub use scheduler::{BalanceScheduler, BasicScheduler, Scheduler};

/// Re-export common types
pub mod prelude {
    pub use crate::changefeed::*;
    pub use crate::config::*;
    pub use crate::controller::*;
    pub use crate::error::*;
    pub use crate::node::*;
    pub use crate::protocol::*;
}
