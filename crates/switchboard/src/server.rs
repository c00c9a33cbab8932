//! `SwitchboardServer` builder and accept loop.
//!
//! This is the entry point for running a broker. It ties together all the
//! layers: transport → protocol → session/channel/registry → handlers.

use std::sync::Arc;
use std::time::Duration;

use switchboard_transport::{Transport, WebSocketTransport};

use crate::connection::handle_connection;
use crate::{Broker, BrokerConfig, BrokerHandle, Handler, SwitchboardError};

/// Builder for configuring and starting a Switchboard server.
///
/// # Example
///
/// ```rust,ignore
/// use switchboard::prelude::*;
///
/// let server = SwitchboardServer::builder()
///     .bind("0.0.0.0:8080")
///     .handler_timeout(Duration::from_secs(2))
///     .handler(my_handler)
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct SwitchboardServerBuilder {
    bind_addr: String,
    config: BrokerConfig,
    handlers: Vec<Handler>,
}

impl SwitchboardServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: BrokerConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole broker configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = timeout;
        self
    }

    pub fn max_concurrent_invocations(mut self, limit: usize) -> Self {
        self.config.max_concurrent_invocations = limit;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Modules every new identity starts with.
    pub fn default_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn command_channel_size(mut self, size: usize) -> Self {
        self.config.command_channel_size = size;
        self
    }

    /// Adds a handler, registered after the built-in `core` handler in
    /// the order given.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Binds the listener, starts the broker, and registers handlers.
    ///
    /// A handler the registry refuses is logged and skipped; the server
    /// still starts.
    pub async fn build(self) -> Result<SwitchboardServer, SwitchboardError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let broker = Broker::spawn(&self.config);

        for handler in self.handlers {
            let name = handler.name().to_owned();
            if let Err(e) = broker.register(handler).await? {
                tracing::error!(handler = %name, code = e.code(), error = %e, "handler not registered");
            }
        }

        Ok(SwitchboardServer {
            transport,
            broker,
            config: Arc::new(self.config),
        })
    }
}

impl Default for SwitchboardServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Switchboard server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct SwitchboardServer {
    transport: WebSocketTransport,
    broker: BrokerHandle,
    config: Arc<BrokerConfig>,
}

impl SwitchboardServer {
    /// Creates a new builder.
    pub fn builder() -> SwitchboardServerBuilder {
        SwitchboardServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Handle to the running broker, for registering handlers or pushing
    /// messages from outside any connection.
    pub fn broker(&self) -> BrokerHandle {
        self.broker.clone()
    }

    /// Runs the accept loop.
    ///
    /// Spawns a task per accepted connection. Runs until the process is
    /// terminated.
    pub async fn run(mut self) -> Result<(), SwitchboardError> {
        tracing::info!("switchboard server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let broker = self.broker.clone();
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, broker, config).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
