//! # brume-core
//!
//! Core types and message routing for the brume telemetry relay.
//!
//! This crate provides the transport-independent half of the relay:
//!
//! - **TopicRegistry** - Exact-match topic -> subscriber-set mapping
//! - **SessionTable** - Live sessions, outbound queues, liveness deadlines
//! - **Broker** - Fan-out: registry lookup + per-subscriber enqueue
//! - **Message** - Immutable routed message
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │   Session   │────▶│   Broker    │────▶│ TopicRegistry │
//! │   worker    │     └─────────────┘     └───────────────┘
//! └─────────────┘            │
//!        ▲                   ▼
//!        │            ┌─────────────┐
//!        └────────────│ SessionTable│  (outbound queues)
//!                     └─────────────┘
//! ```

pub mod broker;
pub mod message;
pub mod registry;
pub mod session;
pub mod topic;

pub use broker::Broker;
pub use message::Message;
pub use registry::{RegistryStats, SessionId, TopicRegistry};
pub use session::{SessionHandle, SessionTable};
pub use topic::{validate_topic_name, TopicId};
