//! The broker core: a single task that owns every table.
//!
//! The client registry, module table, channel broker, handler registry and
//! notifier all live inside one [`BrokerCore`] running in its own Tokio
//! task. Nothing else touches them. Connection tasks and handler
//! invocations talk to the core through a cloneable [`BrokerHandle`]:
//! each call sends a [`Command`] over an mpsc channel and, where there is
//! an answer, waits for it on a oneshot.
//!
//! ```text
//!  connection task ─┐
//!  connection task ─┼── mpsc<Command> ──→ BrokerCore ──→ outboxes
//!  handler task    ─┘        ↑               │
//!                            └── oneshot ────┘
//! ```
//!
//! The core never awaits anything but its own queue, so a slow or stuck
//! handler can never stall it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_channel::{
    ChannelBroker, ChannelError, PublishReport, SubscribeOptions, Subscription,
};
use switchboard_protocol::{
    ALL_CHANNELS, BROADCAST, BROADCAST_BOUNCE, ClientId, DispatchContext, Envelope,
    Receiver, codes,
};
use switchboard_registry::{Describe, HandlerDescriptor, HandlerRegistry, RegistrationError};
use switchboard_session::{BindOutcome, BindWarning, ClientRegistry, ModuleTable, SessionError};
use switchboard_transport::ConnectionId;
use tokio::sync::{Semaphore, mpsc, oneshot};

use crate::core_handler::core_handler;
use crate::dispatcher::{self, DispatchReport};
use crate::notifier::{Notification, Notifier, Outbox, Router};
use crate::{BrokerConfig, BrokerError, Handler};

/// Per-name outcome of a channel lifecycle call.
pub type ChannelResults = Vec<Result<String, ChannelError>>;

/// Per-name outcome of a subscribe or unsubscribe call.
pub type SubscriptionResults = Vec<Result<Subscription, ChannelError>>;

/// Commands sent to the core through its channel.
///
/// Variants with a `reply` are requests; the rest are fire-and-forget.
pub(crate) enum Command {
    Connect {
        connection: ConnectionId,
        outbox: Outbox,
        requested: String,
        reply: oneshot::Sender<BindOutcome>,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Plan {
        origin: ClientId,
        method: String,
        version: String,
        reply: oneshot::Sender<Vec<Arc<Handler>>>,
    },
    Relay {
        ctx: DispatchContext,
        receiver: Receiver,
        message: Value,
        allow_server_identity: bool,
        reply: oneshot::Sender<Result<PublishReport, BrokerError>>,
    },
    Notify {
        ctx: DispatchContext,
        notification: Notification,
    },
    Subscribe {
        ctx: DispatchContext,
        identity: ClientId,
        channels: Vec<String>,
        options: SubscribeOptions,
        reply: oneshot::Sender<SubscriptionResults>,
    },
    Unsubscribe {
        ctx: DispatchContext,
        identity: ClientId,
        channels: Vec<String>,
        reply: oneshot::Sender<SubscriptionResults>,
    },
    Create {
        ctx: DispatchContext,
        channels: Vec<String>,
        reply: oneshot::Sender<ChannelResults>,
    },
    Destroy {
        ctx: DispatchContext,
        channels: Vec<String>,
        reply: oneshot::Sender<ChannelResults>,
    },
    AssignModules {
        ctx: DispatchContext,
        identity: ClientId,
        modules: Vec<String>,
        reply: oneshot::Sender<Result<Vec<String>, SessionError>>,
    },
    RemoveModules {
        ctx: DispatchContext,
        identity: ClientId,
        modules: Vec<String>,
        reply: oneshot::Sender<Result<Vec<String>, SessionError>>,
    },
    Modules {
        identity: ClientId,
        reply: oneshot::Sender<BTreeSet<String>>,
    },
    Subscriptions {
        identity: ClientId,
        reply: oneshot::Sender<Vec<String>>,
    },
    Register {
        handler: Arc<Handler>,
        reply: oneshot::Sender<Result<(), RegistrationError>>,
    },
    Unregister {
        descriptor: HandlerDescriptor,
        reply: oneshot::Sender<usize>,
    },
    Handlers {
        identity: Option<ClientId>,
        reply: oneshot::Sender<Vec<HandlerDescriptor>>,
    },
    Clients {
        reply: oneshot::Sender<Vec<ClientId>>,
    },
}

// ---------------------------------------------------------------------------
// BrokerHandle
// ---------------------------------------------------------------------------

/// Handle to the running broker core.
///
/// Cheap to clone: an `mpsc::Sender` plus the shared dispatch limits.
/// Every method fails with [`BrokerError::Unavailable`] once the core has
/// stopped.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<Command>,
    permits: Arc<Semaphore>,
    handler_timeout: Duration,
}

impl BrokerHandle {
    async fn send(&self, command: Command) -> Result<(), BrokerError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| BrokerError::Unavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(build(reply_tx)).await?;
        reply_rx.await.map_err(|_| BrokerError::Unavailable)
    }

    pub(crate) fn permits(&self) -> &Arc<Semaphore> {
        &self.permits
    }

    /// Budget for one handler invocation.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Binds `connection` to `requested` (or an anonymous identity),
    /// subscribes it to the system channels, and queues its connection
    /// notifications on `outbox`.
    pub async fn connect(
        &self,
        connection: ConnectionId,
        outbox: Outbox,
        requested: &str,
    ) -> Result<BindOutcome, BrokerError> {
        self.request(|reply| Command::Connect {
            connection,
            outbox,
            requested: requested.to_owned(),
            reply,
        })
        .await
    }

    /// Unbinds `connection` and tears down its subscriptions and modules.
    /// Unknown connections are ignored.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), BrokerError> {
        self.send(Command::Disconnect { connection }).await
    }

    /// Resolves, invokes, and reports on every handler eligible for
    /// `envelope`. Returns once every invocation has finished or timed out.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<DispatchReport, BrokerError> {
        dispatcher::dispatch(self, envelope).await
    }

    /// Handlers eligible for `method` at `version` given `origin`'s
    /// modules, in registration order.
    pub async fn plan(
        &self,
        origin: &ClientId,
        method: &str,
        version: &str,
    ) -> Result<Vec<Arc<Handler>>, BrokerError> {
        self.request(|reply| Command::Plan {
            origin: origin.clone(),
            method: method.to_owned(),
            version: version.to_owned(),
            reply,
        })
        .await
    }

    /// Normalizes `message` in `ctx` and pushes it to `receiver`.
    pub async fn relay(
        &self,
        ctx: DispatchContext,
        receiver: Receiver,
        message: Value,
        allow_server_identity: bool,
    ) -> Result<PublishReport, BrokerError> {
        self.request(|reply| Command::Relay {
            ctx,
            receiver,
            message,
            allow_server_identity,
            reply,
        })
        .await?
    }

    /// Queues a notification. Does not wait for delivery.
    pub async fn notify(
        &self,
        ctx: DispatchContext,
        notification: Notification,
    ) -> Result<(), BrokerError> {
        self.send(Command::Notify { ctx, notification }).await
    }

    pub async fn subscribe(
        &self,
        ctx: DispatchContext,
        identity: ClientId,
        channels: Vec<String>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionResults, BrokerError> {
        self.request(|reply| Command::Subscribe {
            ctx,
            identity,
            channels,
            options,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(
        &self,
        ctx: DispatchContext,
        identity: ClientId,
        channels: Vec<String>,
    ) -> Result<SubscriptionResults, BrokerError> {
        self.request(|reply| Command::Unsubscribe {
            ctx,
            identity,
            channels,
            reply,
        })
        .await
    }

    pub async fn create(
        &self,
        ctx: DispatchContext,
        channels: Vec<String>,
    ) -> Result<ChannelResults, BrokerError> {
        self.request(|reply| Command::Create {
            ctx,
            channels,
            reply,
        })
        .await
    }

    pub async fn destroy(
        &self,
        ctx: DispatchContext,
        channels: Vec<String>,
    ) -> Result<ChannelResults, BrokerError> {
        self.request(|reply| Command::Destroy {
            ctx,
            channels,
            reply,
        })
        .await
    }

    /// Adds modules to `identity`; returns the ones newly added.
    pub async fn assign_modules(
        &self,
        ctx: DispatchContext,
        identity: ClientId,
        modules: Vec<String>,
    ) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .request(|reply| Command::AssignModules {
                ctx,
                identity,
                modules,
                reply,
            })
            .await??)
    }

    /// Removes modules from `identity`, all or nothing.
    pub async fn remove_modules(
        &self,
        ctx: DispatchContext,
        identity: ClientId,
        modules: Vec<String>,
    ) -> Result<Vec<String>, BrokerError> {
        Ok(self
            .request(|reply| Command::RemoveModules {
                ctx,
                identity,
                modules,
                reply,
            })
            .await??)
    }

    pub async fn modules(&self, identity: &ClientId) -> Result<BTreeSet<String>, BrokerError> {
        self.request(|reply| Command::Modules {
            identity: identity.clone(),
            reply,
        })
        .await
    }

    /// Channels `identity` is subscribed to, sorted.
    pub async fn subscriptions(&self, identity: &ClientId) -> Result<Vec<String>, BrokerError> {
        self.request(|reply| Command::Subscriptions {
            identity: identity.clone(),
            reply,
        })
        .await
    }

    /// Registers a handler. On error the handler is skipped and the
    /// reason is logged and returned.
    pub async fn register(
        &self,
        handler: Handler,
    ) -> Result<Result<(), RegistrationError>, BrokerError> {
        let handler = Arc::new(handler);
        self.request(|reply| Command::Register { handler, reply })
            .await
    }

    /// Removes every handler with this descriptor. Returns how many.
    pub async fn unregister(&self, descriptor: HandlerDescriptor) -> Result<usize, BrokerError> {
        self.request(|reply| Command::Unregister { descriptor, reply })
            .await
    }

    /// Descriptors visible to `identity`, or every descriptor for `None`.
    pub async fn handlers(
        &self,
        identity: Option<ClientId>,
    ) -> Result<Vec<HandlerDescriptor>, BrokerError> {
        self.request(|reply| Command::Handlers { identity, reply })
            .await
    }

    /// Every bound identity, sorted.
    pub async fn clients(&self) -> Result<Vec<ClientId>, BrokerError> {
        self.request(|reply| Command::Clients { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Entry point for starting a broker core.
pub struct Broker;

impl Broker {
    /// Spawns the core task with the built-in `core` handler registered
    /// and returns a handle to it.
    ///
    /// The core stops when every handle has been dropped.
    pub fn spawn(config: &BrokerConfig) -> BrokerHandle {
        let (sender, receiver) = mpsc::channel(config.command_channel_size.max(1));

        let mut core = BrokerCore {
            clients: ClientRegistry::new(),
            modules: ModuleTable::new(),
            channels: ChannelBroker::new(),
            handlers: HandlerRegistry::new(),
            notifier: Notifier::new(config.templates.clone()),
            default_modules: config.default_modules.clone(),
            receiver,
        };
        if core.register(Arc::new(core_handler())).is_err() {
            tracing::error!("built-in handler rejected");
        }

        tokio::spawn(core.run());

        BrokerHandle {
            sender,
            permits: Arc::new(Semaphore::new(config.max_concurrent_invocations.max(1))),
            handler_timeout: config.handler_timeout,
        }
    }
}

/// The single owner of all broker state. Runs inside a Tokio task.
struct BrokerCore {
    clients: ClientRegistry<Outbox>,
    modules: ModuleTable,
    channels: ChannelBroker,
    handlers: HandlerRegistry<Handler>,
    notifier: Notifier,
    default_modules: Vec<String>,
    receiver: mpsc::Receiver<Command>,
}

impl BrokerCore {
    /// Runs the actor loop until every handle is dropped.
    async fn run(mut self) {
        tracing::info!("broker core started");

        while let Some(command) = self.receiver.recv().await {
            self.handle(command);
        }

        tracing::info!("broker core stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                connection,
                outbox,
                requested,
                reply,
            } => {
                let outcome = self.handle_connect(connection, outbox, &requested);
                let _ = reply.send(outcome);
            }
            Command::Disconnect { connection } => self.handle_disconnect(connection),
            Command::Plan {
                origin,
                method,
                version,
                reply,
            } => {
                let modules = self.modules.modules(&origin);
                let _ = reply.send(self.handlers.lookup(&method, &modules, &version));
            }
            Command::Relay {
                ctx,
                receiver,
                message,
                allow_server_identity,
                reply,
            } => {
                let result = self.notifier.relay(
                    &self.router(),
                    &ctx,
                    &receiver,
                    message,
                    allow_server_identity,
                );
                let _ = reply.send(result);
            }
            Command::Notify { ctx, notification } => self.notify(&ctx, &notification),
            Command::Subscribe {
                ctx,
                identity,
                channels,
                options,
                reply,
            } => {
                let results = self.handle_subscribe(&ctx, &identity, &channels, options);
                let _ = reply.send(results);
            }
            Command::Unsubscribe {
                ctx,
                identity,
                channels,
                reply,
            } => {
                let results = self.handle_unsubscribe(&ctx, &identity, &channels);
                let _ = reply.send(results);
            }
            Command::Create {
                ctx,
                channels,
                reply,
            } => {
                let results = self.handle_create(&ctx, &channels);
                let _ = reply.send(results);
            }
            Command::Destroy {
                ctx,
                channels,
                reply,
            } => {
                let results = self.handle_destroy(&ctx, &channels);
                let _ = reply.send(results);
            }
            Command::AssignModules {
                ctx,
                identity,
                modules,
                reply,
            } => {
                let result = self.handle_assign(&ctx, &identity, modules);
                let _ = reply.send(result);
            }
            Command::RemoveModules {
                ctx,
                identity,
                modules,
                reply,
            } => {
                let result = self.handle_remove(&ctx, &identity, modules);
                let _ = reply.send(result);
            }
            Command::Modules { identity, reply } => {
                let _ = reply.send(self.modules.modules(&identity));
            }
            Command::Subscriptions { identity, reply } => {
                let _ = reply.send(self.channels.subscriptions(&identity));
            }
            Command::Register { handler, reply } => {
                let _ = reply.send(self.register(handler));
            }
            Command::Unregister { descriptor, reply } => {
                let _ = reply.send(self.unregister(&descriptor));
            }
            Command::Handlers { identity, reply } => {
                let descriptors = match identity {
                    Some(identity) => self.handlers.visible(&self.modules.modules(&identity)),
                    None => self.handlers.descriptors(),
                };
                let _ = reply.send(descriptors);
            }
            Command::Clients { reply } => {
                let _ = reply.send(self.clients.identities());
            }
        }
    }

    fn router(&self) -> Router<'_> {
        Router {
            clients: &self.clients,
            channels: &self.channels,
        }
    }

    fn notify(&self, ctx: &DispatchContext, notification: &Notification) {
        self.notifier.notify(&self.router(), ctx, notification);
    }

    // ---------------------------------------------------------------------
    // Handlers
    // ---------------------------------------------------------------------

    fn register(&mut self, handler: Arc<Handler>) -> Result<(), RegistrationError> {
        let descriptor = handler.descriptor().clone();
        let result = self.handlers.register(handler);
        self.notify(&DispatchContext::system(), &registration_notice(&descriptor, &result));
        result
    }

    fn unregister(&mut self, descriptor: &HandlerDescriptor) -> usize {
        let removed = self.handlers.unregister(descriptor).len();
        if removed > 0 {
            self.notify(
                &DispatchContext::system(),
                &Notification::info(codes::HANDLER_UNREGISTERED)
                    .param("name", descriptor.name.as_str())
                    .param("version", descriptor.version.as_str())
                    .param("_removed", removed),
            );
        }
        removed
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    fn handle_connect(
        &mut self,
        connection: ConnectionId,
        outbox: Outbox,
        requested: &str,
    ) -> BindOutcome {
        let outcome = self.clients.bind(connection, outbox, requested);
        let identity = outcome.identity.clone();

        if !self.default_modules.is_empty() {
            if let Err(e) = self.modules.assign(&identity, self.default_modules.clone()) {
                tracing::warn!(%identity, error = %e, "default modules not assigned");
            }
        }
        self.channels
            .subscribe(&identity, [BROADCAST], SubscribeOptions::default());
        self.channels
            .subscribe(&identity, [BROADCAST_BOUNCE], SubscribeOptions::bounce());

        let ctx = DispatchContext::system();
        let me = Receiver::Client(identity.clone());
        self.notify(
            &ctx,
            &Notification::info(codes::CONNECTED)
                .to(me.clone())
                .param("identity", identity.as_str())
                .param("_connection", connection.to_string()),
        );

        let requested = outcome.requested.clone().unwrap_or_default();
        let followup = match outcome.warning {
            Some(BindWarning::Hijack) => Some(Notification::warning(codes::IDENTITY_HIJACK)),
            Some(BindWarning::ReservedIdentity) => {
                Some(Notification::warning(codes::RESERVED_IDENTITY))
            }
            None if outcome.anonymous => Some(Notification::info(codes::ANONYMOUS_IDENTITY)),
            None => None,
        };
        if let Some(notification) = followup {
            self.notify(
                &ctx,
                &notification
                    .to(me)
                    .param("identity", identity.as_str())
                    .param("requested", requested),
            );
        }

        outcome
    }

    fn handle_disconnect(&mut self, connection: ConnectionId) {
        let Some(identity) = self.clients.unbind(connection) else {
            tracing::debug!(%connection, "disconnect for unknown connection");
            return;
        };
        let dropped = self.channels.unsubscribe(&identity, [ALL_CHANNELS]);
        self.modules.clear(&identity);

        // The system channels hear about the departure through 401 below.
        let ctx = DispatchContext::system();
        for sub in dropped.iter().flatten() {
            if ChannelBroker::is_reserved(&sub.channel) {
                continue;
            }
            self.notify(
                &ctx,
                &Notification::info(codes::UNSUBSCRIBED)
                    .to(Receiver::channel(sub.channel.as_str()))
                    .param("identity", sub.identity.as_str())
                    .param("channel", sub.channel.as_str()),
            );
        }

        self.notify(
            &ctx,
            &Notification::info(codes::DISCONNECTED)
                .to(Receiver::channel(BROADCAST))
                .param("identity", identity.as_str())
                .param("_channels", dropped.len()),
        );
    }

    // ---------------------------------------------------------------------
    // Channels
    // ---------------------------------------------------------------------

    fn handle_subscribe(
        &mut self,
        ctx: &DispatchContext,
        identity: &ClientId,
        channels: &[String],
        options: SubscribeOptions,
    ) -> SubscriptionResults {
        let results = self.channels.subscribe(identity, channels, options);
        for result in &results {
            match result {
                Ok(sub) => self.notify(
                    ctx,
                    &Notification::info(codes::SUBSCRIBED)
                        .to(Receiver::channel(sub.channel.as_str()))
                        .param("identity", sub.identity.as_str())
                        .param("channel", sub.channel.as_str())
                        .param("bounce", sub.bounce),
                ),
                Err(e) => self.report_channel_error(ctx, identity, e),
            }
        }
        results
    }

    fn handle_unsubscribe(
        &mut self,
        ctx: &DispatchContext,
        identity: &ClientId,
        channels: &[String],
    ) -> SubscriptionResults {
        let results = self.channels.unsubscribe(identity, channels);
        for result in &results {
            match result {
                Ok(sub) => self.notify(
                    ctx,
                    &Notification::info(codes::UNSUBSCRIBED)
                        .to(Receiver::channel(sub.channel.as_str()))
                        .to(Receiver::Client(sub.identity.clone()))
                        .param("identity", sub.identity.as_str())
                        .param("channel", sub.channel.as_str()),
                ),
                Err(e) => self.report_channel_error(ctx, identity, e),
            }
        }
        results
    }

    fn handle_create(&mut self, ctx: &DispatchContext, channels: &[String]) -> ChannelResults {
        let results = self.channels.create(channels);
        for result in &results {
            match result {
                Ok(name) => self.notify(
                    ctx,
                    &Notification::info(codes::CHANNEL_CREATED)
                        .to(Receiver::Client(ctx.origin.clone()))
                        .param("channel", name.as_str()),
                ),
                Err(e) => self.report_channel_error(ctx, &ctx.origin, e),
            }
        }
        results
    }

    /// Every forced unsubscribe is reported to the affected client before
    /// any destroy is reported to the caller.
    fn handle_destroy(&mut self, ctx: &DispatchContext, channels: &[String]) -> ChannelResults {
        let destroyed = self.channels.destroy(channels);
        for sub in &destroyed.forced {
            self.notify(
                ctx,
                &Notification::info(codes::UNSUBSCRIBED)
                    .to(Receiver::Client(sub.identity.clone()))
                    .param("identity", sub.identity.as_str())
                    .param("channel", sub.channel.as_str()),
            );
        }
        for result in &destroyed.results {
            match result {
                Ok(name) => self.notify(
                    ctx,
                    &Notification::info(codes::CHANNEL_DESTROYED)
                        .to(Receiver::Client(ctx.origin.clone()))
                        .param("channel", name.as_str())
                        .param("_forced", destroyed.forced.len()),
                ),
                Err(e) => self.report_channel_error(ctx, &ctx.origin, e),
            }
        }
        destroyed.results
    }

    fn report_channel_error(&self, ctx: &DispatchContext, identity: &ClientId, error: &ChannelError) {
        self.notify(
            ctx,
            &Notification::warning(error.code())
                .to(Receiver::Client(ctx.origin.clone()))
                .param("identity", identity.as_str())
                .param("channel", error.channel())
                .param("_error", error.to_string()),
        );
    }

    // ---------------------------------------------------------------------
    // Modules
    // ---------------------------------------------------------------------

    fn handle_assign(
        &mut self,
        ctx: &DispatchContext,
        identity: &ClientId,
        modules: Vec<String>,
    ) -> Result<Vec<String>, SessionError> {
        let result = self.ensure_bound(identity).and_then(|()| self.modules.assign(identity, modules));
        match &result {
            Ok(added) => self.notify(
                ctx,
                &Notification::info(codes::MODULES_ASSIGNED)
                    .to(Receiver::Client(ctx.origin.clone()))
                    .param("identity", identity.as_str())
                    .param("modules", added.clone()),
            ),
            Err(e) => self.report_session_error(ctx, identity, e),
        }
        result
    }

    fn handle_remove(
        &mut self,
        ctx: &DispatchContext,
        identity: &ClientId,
        modules: Vec<String>,
    ) -> Result<Vec<String>, SessionError> {
        let result = self.ensure_bound(identity).and_then(|()| self.modules.remove(identity, modules));
        match &result {
            Ok(removed) => self.notify(
                ctx,
                &Notification::info(codes::MODULES_REMOVED)
                    .to(Receiver::Client(ctx.origin.clone()))
                    .param("identity", identity.as_str())
                    .param("modules", removed.clone()),
            ),
            Err(e) => self.report_session_error(ctx, identity, e),
        }
        result
    }

    fn ensure_bound(&self, identity: &ClientId) -> Result<(), SessionError> {
        if self.clients.contains(identity) {
            Ok(())
        } else {
            Err(SessionError::UnknownClient(identity.clone()))
        }
    }

    fn report_session_error(&self, ctx: &DispatchContext, identity: &ClientId, error: &SessionError) {
        let module = match error {
            SessionError::InvalidModule(m) | SessionError::ModuleNotAssigned { module: m, .. } => {
                m.as_str()
            }
            SessionError::UnknownClient(_) => "",
        };
        self.notify(
            ctx,
            &Notification::warning(error.code())
                .to(Receiver::Client(ctx.origin.clone()))
                .param("identity", identity.as_str())
                .param("client", identity.as_str())
                .param("module", module),
        );
    }
}

/// The record of a registration attempt. Registration happens outside any
/// client request, so the notice has no receivers and is only logged.
fn registration_notice(
    descriptor: &HandlerDescriptor,
    result: &Result<(), RegistrationError>,
) -> Notification {
    let notification = match result {
        Ok(()) => Notification::info(codes::HANDLER_REGISTERED),
        Err(e) => Notification::warning(e.code()).param("reason", e.to_string()),
    };
    notification
        .param("name", descriptor.name.as_str())
        .param("version", descriptor.version.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_protocol::{NOTIFY_METHOD, NotifyKind, SequenceId};
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn client(handle: &BrokerHandle, id: u64, name: &str) -> (ClientId, UnboundedReceiver<Envelope>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = handle.connect(ConnectionId::new(id), tx, name).await.unwrap();
        // CONNECTED, plus the anonymous/hijack notice when there is one.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.params["code"], codes::CONNECTED);
        if outcome.anonymous {
            rx.recv().await.unwrap();
        }
        (outcome.identity, rx)
    }

    fn ctx(origin: &ClientId, seq: i64) -> DispatchContext {
        DispatchContext::new(origin.clone(), "test", SequenceId::Id(seq))
    }

    fn codes_of(rx: &mut UnboundedReceiver<Envelope>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(env) = rx.try_recv() {
            if env.method == NOTIFY_METHOD {
                out.push(env.params["code"].as_u64().unwrap_or_default());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_connect_subscribes_to_system_channels() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, _rx) = client(&handle, 1, "alice").await;

        let subs = handle.subscriptions(&alice).await.unwrap();

        assert_eq!(subs, vec![BROADCAST.to_owned(), BROADCAST_BOUNCE.to_owned()]);
    }

    #[tokio::test]
    async fn test_connect_blank_identity_is_anonymous_with_notice() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = handle.connect(ConnectionId::new(1), tx, "").await.unwrap();

        assert!(outcome.anonymous);
        let connected = rx.recv().await.unwrap();
        assert_eq!(connected.params["params"]["identity"], outcome.identity.as_str());
        assert!(connected.params["params"].get("_connection").is_none());
        assert_eq!(rx.recv().await.unwrap().params["code"], codes::ANONYMOUS_IDENTITY);
    }

    #[tokio::test]
    async fn test_connect_default_modules_are_assigned() {
        let config = BrokerConfig {
            default_modules: vec!["chat".into()],
            ..BrokerConfig::default()
        };
        let handle = Broker::spawn(&config);
        let (alice, _rx) = client(&handle, 1, "alice").await;

        let modules = handle.modules(&alice).await.unwrap();

        assert!(modules.contains("chat"));
    }

    #[tokio::test]
    async fn test_disconnect_clears_subscriptions_and_modules() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, _rx) = client(&handle, 1, "alice").await;
        handle
            .assign_modules(ctx(&alice, 1), alice.clone(), vec!["chat".into()])
            .await
            .unwrap();

        handle.disconnect(ConnectionId::new(1)).await.unwrap();

        assert!(handle.subscriptions(&alice).await.unwrap().is_empty());
        assert!(handle.modules(&alice).await.unwrap().is_empty());
        assert!(handle.clients().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_broadcast() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (_alice, _arx) = client(&handle, 1, "alice").await;
        let (_bob, mut brx) = client(&handle, 2, "bob").await;

        handle.disconnect(ConnectionId::new(1)).await.unwrap();
        handle.clients().await.unwrap();

        assert_eq!(codes_of(&mut brx), vec![u64::from(codes::DISCONNECTED)]);
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_channel_subscribers() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, _arx) = client(&handle, 1, "alice").await;
        let (bob, mut brx) = client(&handle, 2, "bob").await;
        let room = vec!["room".to_owned()];
        handle
            .subscribe(ctx(&alice, 1), alice.clone(), room.clone(), SubscribeOptions::lazy())
            .await
            .unwrap();
        handle
            .subscribe(ctx(&bob, 1), bob.clone(), room, SubscribeOptions::default())
            .await
            .unwrap();
        handle
            .unsubscribe(ctx(&bob, 2), bob.clone(), vec![BROADCAST.to_owned()])
            .await
            .unwrap();
        codes_of(&mut brx);

        handle.disconnect(ConnectionId::new(1)).await.unwrap();
        handle.clients().await.unwrap();

        let mut notices = Vec::new();
        while let Ok(env) = brx.try_recv() {
            notices.push(env);
        }
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].params["code"], codes::UNSUBSCRIBED);
        assert_eq!(notices[0].params["params"]["identity"], "alice");
        assert_eq!(notices[0].params["params"]["channel"], "room");
    }

    #[tokio::test]
    async fn test_subscribe_twice_reports_already_subscribed() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, mut rx) = client(&handle, 1, "alice").await;
        let room = vec!["room".to_owned()];

        handle
            .subscribe(ctx(&alice, 1), alice.clone(), room.clone(), SubscribeOptions::lazy())
            .await
            .unwrap();
        let second = handle
            .subscribe(ctx(&alice, 2), alice.clone(), room, SubscribeOptions::default())
            .await
            .unwrap();

        assert!(matches!(second[0], Err(ChannelError::AlreadySubscribed { .. })));
        assert_eq!(
            codes_of(&mut rx),
            vec![u64::from(codes::SUBSCRIBED), u64::from(codes::ALREADY_SUBSCRIBED)]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_notifies_client_and_remaining_subscribers() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, mut arx) = client(&handle, 1, "alice").await;
        let (bob, mut brx) = client(&handle, 2, "bob").await;
        let room = vec!["room".to_owned()];
        handle
            .subscribe(ctx(&alice, 1), alice.clone(), room.clone(), SubscribeOptions::lazy())
            .await
            .unwrap();
        handle
            .subscribe(ctx(&bob, 1), bob.clone(), room.clone(), SubscribeOptions::default())
            .await
            .unwrap();
        codes_of(&mut arx);
        codes_of(&mut brx);

        handle.unsubscribe(ctx(&alice, 2), alice.clone(), room).await.unwrap();

        assert_eq!(codes_of(&mut arx), vec![u64::from(codes::UNSUBSCRIBED)]);
        assert_eq!(codes_of(&mut brx), vec![u64::from(codes::UNSUBSCRIBED)]);
    }

    #[tokio::test]
    async fn test_destroy_sends_one_unsubscribe_per_subscriber_first() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (alice, mut arx) = client(&handle, 1, "alice").await;
        let (bob, mut brx) = client(&handle, 2, "bob").await;
        let (carol, mut crx) = client(&handle, 3, "carol").await;
        let room = vec!["room".to_owned()];
        handle.create(ctx(&alice, 1), room.clone()).await.unwrap();
        for who in [&bob, &carol] {
            handle
                .subscribe(ctx(who, 1), who.clone(), room.clone(), SubscribeOptions::default())
                .await
                .unwrap();
        }
        codes_of(&mut arx);
        codes_of(&mut brx);
        codes_of(&mut crx);

        let results = handle.destroy(ctx(&alice, 2), room.clone()).await.unwrap();

        assert_eq!(results, vec![Ok("room".to_owned())]);
        assert_eq!(codes_of(&mut brx), vec![u64::from(codes::UNSUBSCRIBED)]);
        assert_eq!(codes_of(&mut crx), vec![u64::from(codes::UNSUBSCRIBED)]);
        assert_eq!(codes_of(&mut arx), vec![u64::from(codes::CHANNEL_DESTROYED)]);

        let relay = handle
            .relay(
                ctx(&bob, 3),
                Receiver::channel("room"),
                json!({"method": "message", "params": {}}),
                false,
            )
            .await;
        assert_eq!(
            relay,
            Err(BrokerError::Channel(ChannelError::UnknownChannel("room".into())))
        );
    }

    #[tokio::test]
    async fn test_assign_modules_for_unknown_client_is_refused() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let ghost = ClientId::new("ghost");

        let result = handle
            .assign_modules(ctx(&ghost, 1), ghost.clone(), vec!["chat".into()])
            .await;

        assert_eq!(
            result,
            Err(BrokerError::Session(SessionError::UnknownClient(ghost)))
        );
    }

    #[tokio::test]
    async fn test_core_handler_is_registered_on_spawn() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let names: Vec<String> = handle
            .handlers(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["core"]);
    }

    #[test]
    fn test_registration_notice_reports_outcome() {
        let descriptor = HandlerDescriptor::new("chat", "1.0");

        let ok = registration_notice(&descriptor, &Ok(()));
        assert_eq!(ok.code, codes::HANDLER_REGISTERED);
        assert_eq!(ok.kind, NotifyKind::Info);
        assert_eq!(ok.params["name"], "chat");
        assert!(ok.receivers.is_empty());

        let refused = registration_notice(
            &descriptor,
            &Err(RegistrationError::AlreadyRegistered { name: "chat".into() }),
        );
        assert_eq!(refused.code, codes::DUPLICATE_HANDLER);
        assert_eq!(refused.kind, NotifyKind::Warning);
        assert!(refused.params["reason"].as_str().unwrap().contains("already registered"));
    }

    #[tokio::test]
    async fn test_register_then_unregister_reaches_no_client() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let (_alice, mut rx) = client(&handle, 1, "alice").await;
        let handler = Handler::builder("chat", "1.0").module("chat").declare("say").build();
        let descriptor = handler.descriptor().clone();

        assert_eq!(handle.register(handler).await.unwrap(), Ok(()));
        assert_eq!(handle.unregister(descriptor.clone()).await.unwrap(), 1);
        assert_eq!(handle.unregister(descriptor).await.unwrap(), 0);

        assert!(codes_of(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate_handler_is_skipped() {
        let handle = Broker::spawn(&BrokerConfig::default());
        let build = || Handler::builder("chat", "1.0").module("chat").declare("say").build();

        assert_eq!(handle.register(build()).await.unwrap(), Ok(()));
        let second = handle.register(build()).await.unwrap();

        assert!(matches!(second, Err(RegistrationError::Duplicate { .. })));
        assert_eq!(handle.handlers(None).await.unwrap().len(), 2);
    }
}
