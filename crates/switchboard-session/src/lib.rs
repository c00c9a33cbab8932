//! Client session management for Switchboard.
//!
//! This crate answers two questions about every connected client:
//!
//! 1. **Who is it?**: [`ClientRegistry`] binds a connection to a stable
//!    [`ClientId`](switchboard_protocol::ClientId), allocating anonymous
//!    identities and refusing to hand an identity that is already in use
//!    to a second connection.
//! 2. **What may it call?**: [`ModuleTable`] tracks the capability
//!    modules each identity holds, which gate handler lookup.
//!
//! # How it fits in the stack
//!
//! ```text
//! Broker core (above)  ← owns one registry + one module table
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below)  ← ClientId, reserved names
//! ```
//!
//! Neither type is thread-safe on its own. Both are owned by the broker's
//! single core task.

mod error;
mod modules;
mod registry;

pub use error::SessionError;
pub use modules::ModuleTable;
pub use registry::{BindOutcome, BindWarning, ClientRegistry};
