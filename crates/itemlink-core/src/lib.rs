//! Core types for ItemLink.
//!
//! This crate defines the wire message model, the shared bus handles that
//! relays publish onto, unique-id generation and relay configuration. The
//! relay protocol itself lives in `itemlink-relay`.

pub mod bus;
pub mod config;
pub mod error;
pub mod id;
pub mod message;

pub use bus::{BusPermit, BusReceiver, HandoffError, MessageBus, SharedBus, DEFAULT_BUS_CAPACITY};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use id::{IdGenerator, SharedIdGenerator, UuidIdGenerator};
pub use message::{is_empty_id, Message, MessageType, EMPTY_ID_SENTINEL};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::bus::{MessageBus, SharedBus};
    pub use crate::config::{env_vars, RelayConfig};
    pub use crate::error::{Error, Result};
    pub use crate::id::{IdGenerator, UuidIdGenerator};
    pub use crate::message::{Message, MessageType};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
