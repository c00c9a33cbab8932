//! # Switchboard
//!
//! Real-time message broker over WebSocket.
//!
//! Clients connect, claim an identity, and exchange JSON envelopes. The
//! broker routes each envelope to every registered handler that declares
//! its method, accepts its version, and shares a module with the sender.
//! Handlers answer by relaying messages to clients or channels. Channels
//! fan a message out to every subscriber.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchboard::prelude::*;
//!
//! async fn echo(inv: Invocation) -> HandlerResult {
//!     inv.reply(inv.params.clone()).await
//! }
//!
//! # async fn run() -> Result<(), SwitchboardError> {
//! switchboard::init_tracing();
//!
//! let server = SwitchboardServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .handler(
//!         Handler::builder("echo", "1.0")
//!             .module("chat")
//!             .method("echo", echo)
//!             .build(),
//!     )
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! ## Layers
//!
//! ```text
//! transport (bytes) → protocol (Envelope) → session (identity, modules)
//!                                         → channel (fan-out)
//!                                         → registry (who handles what)
//! ```
//!
//! This crate ties them together: [`Broker`] owns every table behind a
//! single task, the dispatcher runs handlers, and [`SwitchboardServer`]
//! accepts connections.

mod broker;
mod config;
mod connection;
mod core_handler;
mod dispatcher;
mod error;
mod notifier;
mod plugin;
mod server;

pub use broker::{Broker, BrokerHandle, ChannelResults, SubscriptionResults};
pub use config::BrokerConfig;
pub use core_handler::{MESSAGE_METHOD, core_handler};
pub use dispatcher::DispatchReport;
pub use error::{BrokerError, HandlerError, SwitchboardError};
pub use notifier::{Notification, Notifier, Outbox};
pub use plugin::{EntryPoint, Handler, HandlerBuilder, HandlerResult, Invocation};
pub use server::{SwitchboardServer, SwitchboardServerBuilder};

/// Installs a `tracing` subscriber that reads `RUST_LOG`, falling back to
/// `info`. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Convenience re-exports for handler authors.
///
/// ```rust
/// use switchboard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Broker, BrokerConfig, BrokerError, BrokerHandle, DispatchReport, Handler, HandlerError,
        HandlerResult, Invocation, Notification, SwitchboardError, SwitchboardServer,
    };
    pub use switchboard_channel::SubscribeOptions;
    pub use switchboard_protocol::{
        ClientId, DispatchContext, Envelope, NotifyKind, Receiver, SequenceId, codes,
    };
    pub use switchboard_registry::{Describe, HandlerDescriptor};
}
