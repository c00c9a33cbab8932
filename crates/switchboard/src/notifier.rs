//! Notifications and the relay primitive.
//!
//! Every byte the broker pushes to a client leaves through
//! [`Notifier::relay`]: replies, channel fan-out, and the templated
//! `notify` envelopes built by [`Notifier::notify`]. Relay always stamps
//! the dispatch context's sequence-id and runs the message through
//! [`normalize`] before anything is delivered.

use serde_json::{Map, Value, json};
use switchboard_channel::{ChannelBroker, PublishReport};
use switchboard_protocol::{
    ClientId, DispatchContext, Envelope, NOTIFY_METHOD, NotifyKind, Receiver,
    SEQUENCE_NONE, SERVER_IDENTITY, SequenceId, Templates, normalize,
};
use switchboard_session::ClientRegistry;
use tokio::sync::mpsc;

use crate::BrokerError;

/// Per-connection outbound queue. Drained by the connection's writer task.
pub type Outbox = mpsc::UnboundedSender<Envelope>;

/// The delivery targets a relay can reach. Borrowed from the broker core
/// for the duration of one relay.
pub(crate) struct Router<'a> {
    pub(crate) clients: &'a ClientRegistry<Outbox>,
    pub(crate) channels: &'a ChannelBroker,
}

impl Router<'_> {
    fn push(&self, identity: &ClientId, envelope: Envelope) -> bool {
        self.clients
            .get(identity)
            .is_some_and(|outbox| outbox.send(envelope).is_ok())
    }
}

/// A templated broker notification, built fluently.
///
/// ```rust
/// use switchboard::Notification;
/// use switchboard_protocol::{Receiver, codes};
///
/// let n = Notification::warning(codes::UNKNOWN_CHANNEL)
///     .to(Receiver::client("alice"))
///     .param("channel", "lobby");
/// assert_eq!(n.code, codes::UNKNOWN_CHANNEL);
/// ```
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotifyKind,
    pub code: u16,
    pub receivers: Vec<Receiver>,
    /// Template values. Keys starting with `_` are used for rendering and
    /// logging but never sent on the wire.
    pub params: Map<String, Value>,
    /// Skip the log record.
    pub no_log: bool,
    /// Detail for the log record only, such as an error chain.
    pub exception: Option<String>,
}

impl Notification {
    pub fn new(kind: NotifyKind, code: u16) -> Self {
        Self {
            kind,
            code,
            receivers: Vec::new(),
            params: Map::new(),
            no_log: false,
            exception: None,
        }
    }

    pub fn info(code: u16) -> Self {
        Self::new(NotifyKind::Info, code)
    }

    pub fn warning(code: u16) -> Self {
        Self::new(NotifyKind::Warning, code)
    }

    pub fn error(code: u16) -> Self {
        Self::new(NotifyKind::Error, code)
    }

    pub fn to(mut self, receiver: Receiver) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn no_log(mut self) -> Self {
        self.no_log = true;
        self
    }

    pub fn exception(mut self, detail: impl Into<String>) -> Self {
        self.exception = Some(detail.into());
        self
    }
}

/// Renders notifications and relays messages.
#[derive(Debug, Clone)]
pub struct Notifier {
    templates: Templates,
}

impl Notifier {
    pub fn new(templates: Templates) -> Self {
        Self { templates }
    }

    /// Renders `notification` and relays it to each of its receivers.
    /// Returns how many pushes succeeded.
    ///
    /// An undeliverable receiver is logged at debug and skipped; it never
    /// fails the whole notification.
    pub(crate) fn notify(
        &self,
        router: &Router<'_>,
        ctx: &DispatchContext,
        notification: &Notification,
    ) -> usize {
        let text = self
            .templates
            .render(notification.code, &notification.params);
        let message = self.build(notification, &text);

        let mut delivered = 0;
        for receiver in &notification.receivers {
            match self.relay(router, ctx, receiver, message.clone(), true) {
                Ok(report) => delivered += report.delivered,
                Err(e) => tracing::debug!(
                    code = notification.code,
                    %receiver,
                    error = %e,
                    "notification not delivered"
                ),
            }
        }

        if !notification.no_log {
            log(notification, &text);
        }
        delivered
    }

    /// The wire message for a notification: a server envelope whose params
    /// carry `{type, code, message, params}`.
    fn build(&self, notification: &Notification, text: &str) -> Value {
        let public: Map<String, Value> = notification
            .params
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({
            "identity": SERVER_IDENTITY,
            "method": NOTIFY_METHOD,
            "params": {
                "type": notification.kind,
                "code": notification.code,
                "message": text,
                "params": public,
            },
        })
    }

    /// Stamps `ctx`'s sequence-id onto `message`, normalizes it, and pushes
    /// it to `receiver`.
    ///
    /// The message is normalized as coming from `ctx.origin`, or from the
    /// server when it claims the server identity and
    /// `allow_server_identity` is set.
    ///
    /// # Errors
    /// - [`BrokerError::Protocol`] if the message is not a valid envelope
    /// - [`BrokerError::UnknownClient`] / [`BrokerError::Channel`] if the
    ///   receiver does not exist
    pub(crate) fn relay(
        &self,
        router: &Router<'_>,
        ctx: &DispatchContext,
        receiver: &Receiver,
        mut message: Value,
        allow_server_identity: bool,
    ) -> Result<PublishReport, BrokerError> {
        let claims_server = message
            .get("identity")
            .and_then(Value::as_str)
            .is_some_and(|id| id == SERVER_IDENTITY);
        if let Value::Object(fields) = &mut message {
            fields.insert("sequence-id".into(), wire_sequence(ctx.sequence_id));
        }

        let origin = if claims_server && allow_server_identity {
            ClientId::server()
        } else {
            ctx.origin.clone()
        };
        let envelope = normalize(message, &origin, allow_server_identity)?;

        match receiver {
            Receiver::Client(identity) => {
                if !router.clients.contains(identity) {
                    return Err(BrokerError::UnknownClient(identity.clone()));
                }
                let mut report = PublishReport::default();
                if router.push(identity, envelope) {
                    report.delivered = 1;
                } else {
                    report.failed = 1;
                }
                Ok(report)
            }
            Receiver::Channel(name) => {
                let sender = envelope.identity.clone();
                let report = router.channels.publish(name, &sender, |subscriber| {
                    router.push(&subscriber.identity, envelope.clone())
                })?;
                tracing::trace!(
                    channel = %name,
                    %sender,
                    delivered = report.delivered,
                    skipped = report.skipped,
                    failed = report.failed,
                    "channel relay"
                );
                Ok(report)
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Templates::default())
    }
}

fn wire_sequence(sequence_id: SequenceId) -> Value {
    match sequence_id {
        SequenceId::Id(id) => Value::from(id),
        SequenceId::None => Value::from(SEQUENCE_NONE),
    }
}

fn log(notification: &Notification, text: &str) {
    let code = notification.code;
    let exception = notification.exception.as_deref().unwrap_or("");
    match notification.kind {
        NotifyKind::Info => tracing::info!(code, exception, "{text}"),
        NotifyKind::Warning => tracing::warn!(code, exception, "{text}"),
        NotifyKind::Error => tracing::error!(code, exception, "{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_channel::SubscribeOptions;
    use switchboard_protocol::{BROADCAST, codes};
    use switchboard_transport::ConnectionId;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        clients: ClientRegistry<Outbox>,
        channels: ChannelBroker,
        notifier: Notifier,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clients: ClientRegistry::new(),
                channels: ChannelBroker::new(),
                notifier: Notifier::default(),
            }
        }

        fn connect(&mut self, id: u64, name: &str) -> UnboundedReceiver<Envelope> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.clients.bind(ConnectionId::new(id), tx, name);
            self.channels
                .subscribe(&ClientId::new(name), [BROADCAST], SubscribeOptions::default());
            rx
        }

        fn router(&self) -> Router<'_> {
            Router {
                clients: &self.clients,
                channels: &self.channels,
            }
        }
    }

    fn ctx(origin: &str, seq: i64) -> DispatchContext {
        DispatchContext::new(ClientId::new(origin), "send", SequenceId::Id(seq))
    }

    #[test]
    fn test_relay_stamps_sequence_and_origin() {
        let mut fx = Fixture::new();
        let mut rx = fx.connect(1, "bob");

        fx.notifier
            .relay(
                &fx.router(),
                &ctx("alice", 42),
                &Receiver::client("bob"),
                json!({"method": "message", "params": {"x": 1}, "sequence-id": 1}),
                false,
            )
            .unwrap();

        let env = rx.try_recv().unwrap();
        assert_eq!(env.identity, ClientId::new("alice"));
        assert_eq!(env.sequence_id, SequenceId::Id(42));
        assert_eq!(env.params, json!({"x": 1}));
    }

    #[test]
    fn test_relay_to_unknown_client_is_error() {
        let fx = Fixture::new();
        let result = fx.notifier.relay(
            &fx.router(),
            &ctx("alice", 1),
            &Receiver::client("ghost"),
            json!({"method": "m", "params": {}}),
            false,
        );
        assert_eq!(result, Err(BrokerError::UnknownClient(ClientId::new("ghost"))));
    }

    #[test]
    fn test_relay_rejects_server_identity_without_permission() {
        let mut fx = Fixture::new();
        let _rx = fx.connect(1, "bob");
        let result = fx.notifier.relay(
            &fx.router(),
            &ctx("alice", 1),
            &Receiver::client("bob"),
            json!({"identity": "server", "method": "m", "params": {}}),
            false,
        );
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
    }

    #[test]
    fn test_relay_to_channel_skips_sender_without_bounce() {
        let mut fx = Fixture::new();
        let mut alice = fx.connect(1, "alice");
        let mut bob = fx.connect(2, "bob");

        let report = fx
            .notifier
            .relay(
                &fx.router(),
                &ctx("alice", 3),
                &Receiver::channel(BROADCAST),
                json!({"method": "message", "params": "hi"}),
                false,
            )
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert!(alice.try_recv().is_err());
        assert_eq!(bob.try_recv().unwrap().params, json!("hi"));
    }

    #[test]
    fn test_notify_builds_server_envelope_and_strips_private_params() {
        let mut fx = Fixture::new();
        let mut rx = fx.connect(1, "alice");

        let n = Notification::warning(codes::UNKNOWN_CHANNEL)
            .to(Receiver::client("alice"))
            .param("channel", "lobby")
            .param("_internal", "secret");
        let delivered = fx.notifier.notify(&fx.router(), &ctx("alice", 8), &n);

        assert_eq!(delivered, 1);
        let env = rx.try_recv().unwrap();
        assert!(env.identity.is_server());
        assert_eq!(env.method, NOTIFY_METHOD);
        assert_eq!(env.sequence_id, SequenceId::Id(8));
        assert_eq!(
            env.params,
            json!({
                "type": "warning",
                "code": 112,
                "message": "unknown channel 'lobby'",
                "params": {"channel": "lobby"},
            })
        );
    }

    #[test]
    fn test_notify_unknown_receiver_does_not_stop_the_rest() {
        let mut fx = Fixture::new();
        let mut rx = fx.connect(1, "alice");

        let n = Notification::info(codes::CONNECTED)
            .to(Receiver::client("ghost"))
            .to(Receiver::client("alice"))
            .param("identity", "alice");
        let delivered = fx.notifier.notify(&fx.router(), &DispatchContext::system(), &n);

        assert_eq!(delivered, 1);
        assert_eq!(rx.try_recv().unwrap().params["code"], 400);
    }

    #[test]
    fn test_notify_unknown_code_uses_fallback_text() {
        let mut fx = Fixture::new();
        let mut rx = fx.connect(1, "alice");
        let n = Notification::info(9999).to(Receiver::client("alice"));

        fx.notifier.notify(&fx.router(), &DispatchContext::system(), &n);

        assert_eq!(
            rx.try_recv().unwrap().params["message"],
            Templates::UNKNOWN_CODE
        );
    }
}
