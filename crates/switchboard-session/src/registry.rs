//! The client registry: which connection speaks for which identity.
//!
//! Binding is where identity hijacking is stopped. A connection may ask for
//! any name it likes, but if that name is already bound to a *different*
//! live connection the request is refused and the newcomer gets an
//! anonymous identity instead. The first holder is never disconnected.

use std::collections::HashMap;

use switchboard_protocol::ClientId;
use switchboard_transport::ConnectionId;

/// Why a bind did not grant the requested identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindWarning {
    /// The identity is bound to another connection.
    Hijack,
    /// The reserved server identity was requested.
    ReservedIdentity,
}

/// Result of [`ClientRegistry::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// The identity the connection is now bound to.
    pub identity: ClientId,
    /// What the connection asked for (`None` when blank).
    pub requested: Option<String>,
    /// `true` when `identity` was allocated by the broker.
    pub anonymous: bool,
    /// Set when a requested identity was refused.
    pub warning: Option<BindWarning>,
}

/// One bound identity.
#[derive(Debug)]
struct Binding<C> {
    connection: ConnectionId,
    handle: C,
}

/// Maps identities to connection handles and back.
///
/// `C` is whatever the owner uses to push to a connection (the broker
/// stores an outbound queue sender). The registry never looks inside it.
///
/// ## Lifecycle
///
/// ```text
/// bind(conn, "mark") ──→ [mark → conn]  ──→ unbind(conn) ──→ gone
///                             │
///      bind(conn2, "mark") ───┘ refused: conn2 becomes anonymous-N
/// ```
#[derive(Debug)]
pub struct ClientRegistry<C> {
    clients: HashMap<ClientId, Binding<C>>,
    by_connection: HashMap<ConnectionId, ClientId>,
    next_anonymous: u64,
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
            by_connection: HashMap::new(),
            next_anonymous: 1,
        }
    }

    /// Binds `connection` to `requested`, or to a fresh anonymous identity
    /// when the request is blank, reserved, or already held by another
    /// connection.
    ///
    /// The mapping for the chosen identity is overwritten, so a connection
    /// re-binding its own identity simply replaces the old handle. If the
    /// connection was previously bound under a different identity, that
    /// stale mapping is dropped.
    pub fn bind(
        &mut self,
        connection: ConnectionId,
        handle: C,
        requested: &str,
    ) -> BindOutcome {
        let requested = requested.trim();
        let requested_opt = (!requested.is_empty()).then(|| requested.to_owned());

        let (identity, warning) = if requested.is_empty() {
            (self.allocate_anonymous(), None)
        } else if ClientId::new(requested).is_server() {
            tracing::warn!(
                %connection,
                requested,
                "connection requested the reserved server identity"
            );
            (self.allocate_anonymous(), Some(BindWarning::ReservedIdentity))
        } else {
            let wanted = ClientId::new(requested);
            match self.clients.get(&wanted) {
                Some(existing) if existing.connection != connection => {
                    tracing::warn!(
                        %connection,
                        holder = %existing.connection,
                        requested,
                        "identity hijack attempt refused"
                    );
                    (self.allocate_anonymous(), Some(BindWarning::Hijack))
                }
                _ => (wanted, None),
            }
        };

        if let Some(previous) = self.by_connection.get(&connection) {
            if *previous != identity {
                let previous = previous.clone();
                self.clients.remove(&previous);
            }
        }

        self.clients.insert(
            identity.clone(),
            Binding {
                connection,
                handle,
            },
        );
        self.by_connection.insert(connection, identity.clone());

        let anonymous = requested_opt.is_none() || warning.is_some();
        tracing::info!(%connection, %identity, anonymous, "client bound");

        BindOutcome {
            identity,
            requested: requested_opt,
            anonymous,
            warning,
        }
    }

    /// Removes whatever identity `connection` is bound to.
    ///
    /// Returns `None` (and changes nothing) for an unknown connection. The
    /// caller is responsible for tearing down the identity's channel
    /// subscriptions and module assignment.
    pub fn unbind(&mut self, connection: ConnectionId) -> Option<ClientId> {
        let identity = self.by_connection.remove(&connection)?;
        // Only drop the identity mapping if it still points at us.
        if self
            .clients
            .get(&identity)
            .is_some_and(|b| b.connection == connection)
        {
            self.clients.remove(&identity);
        }
        tracing::info!(%connection, %identity, "client unbound");
        Some(identity)
    }

    /// Returns the push handle bound to `identity`.
    pub fn get(&self, identity: &ClientId) -> Option<&C> {
        self.clients.get(identity).map(|b| &b.handle)
    }

    /// Reverse lookup: which identity a connection is bound to.
    pub fn identity_of(&self, connection: ConnectionId) -> Option<&ClientId> {
        self.by_connection.get(&connection)
    }

    /// Forward lookup: which connection speaks for `identity`.
    pub fn connection_of(&self, identity: &ClientId) -> Option<ConnectionId> {
        self.clients.get(identity).map(|b| b.connection)
    }

    pub fn contains(&self, identity: &ClientId) -> bool {
        self.clients.contains_key(identity)
    }

    /// Every bound identity, sorted.
    pub fn identities(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Next free `anonymous-N`. Skips names a client happened to claim.
    fn allocate_anonymous(&mut self) -> ClientId {
        loop {
            let candidate = ClientId::new(format!("anonymous-{}", self.next_anonymous));
            self.next_anonymous += 1;
            if !self.clients.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================
