//! Broker configuration.

use std::time::Duration;

use switchboard_protocol::Templates;

/// Tunables for the broker core, the dispatcher, and connection tasks.
///
/// Start from `BrokerConfig::default()` and override the fields you care
/// about, or go through
/// [`SwitchboardServerBuilder`](crate::SwitchboardServerBuilder).
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Budget for a single handler invocation. Exceeding it aborts that
    /// invocation only.
    ///
    /// Default: 5 seconds.
    pub handler_timeout: Duration,

    /// Handler invocations allowed to run at once across all connections.
    pub max_concurrent_invocations: usize,

    /// How long a new connection has to send its opening frame.
    pub handshake_timeout: Duration,

    /// Close a connection that sends nothing for this long. `None` keeps
    /// idle connections open indefinitely.
    pub idle_timeout: Option<Duration>,

    /// Modules every newly bound identity starts with.
    pub default_modules: Vec<String>,

    /// Capacity of the core's command queue. When full, callers wait.
    pub command_channel_size: usize,

    /// Notification text, keyed by code.
    pub templates: Templates,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(5),
            max_concurrent_invocations: 64,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: None,
            default_modules: Vec::new(),
            command_channel_size: 1024,
            templates: Templates::default(),
        }
    }
}
