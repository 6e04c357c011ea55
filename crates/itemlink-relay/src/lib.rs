//! Per-item reliability relay.
//!
//! Each item (a device in the room) gets one [`Relay`]. It sits between the
//! shared device bus and the shared internal bus and provides:
//!
//! - **Reliable outbound delivery**: at most one command in flight, re-sent
//!   at a fixed interval until the device acknowledges it
//! - **Inbound deduplication**: reports are forwarded to the internal bus at
//!   most once while their id is resident in a bounded FIFO cache
//! - **Auxiliary item state**: effect flags and a phase marker, cleared
//!   together with the protocol state by [`Relay::reset`]
//!
//! All mutable state is owned by a single actor task; the send loop, the
//! receive loop and callers talk to it through commands.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use itemlink_core::{Message, MessageBus, RelayConfig};
//! use itemlink_relay::Relay;
//!
//! #[tokio::main]
//! async fn main() -> itemlink_core::Result<()> {
//!     let (device_bus, _device_rx) = MessageBus::new("device");
//!     let (internal_bus, _internal_rx) = MessageBus::new("internal");
//!
//!     let relay = Relay::spawn(
//!         "door-1",
//!         RelayConfig::default(),
//!         Arc::new(device_bus),
//!         Arc::new(internal_bus),
//!     )?;
//!     relay.enqueue(Message::command("console", vec!["unlock".to_string()]))?;
//!     Ok(())
//! }
//! ```

mod actor;
pub mod dedup;
mod queue;
mod receive_loop;
pub mod relay;
mod send_loop;
pub mod state;

pub use dedup::{DuplicateDetector, Verdict};
pub use relay::Relay;
pub use state::{AckOutcome, RelayState, RelayStats, SendDecision, SendState};
