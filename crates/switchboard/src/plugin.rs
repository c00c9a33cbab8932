//! The handler plugin contract.
//!
//! A handler is a descriptor plus one async entry point per method:
//!
//! ```rust,no_run
//! use switchboard::prelude::*;
//!
//! async fn echo(inv: Invocation) -> HandlerResult {
//!     inv.reply(inv.params.clone()).await
//! }
//!
//! let handler = Handler::builder("echo", "1.0")
//!     .description("replies with whatever it was sent")
//!     .module("demo")
//!     .method("echo", echo)
//!     .build();
//! ```
//!
//! Entry points never touch broker state directly. Everything they do
//! (reply, relay, subscribe, notify) goes through the [`BrokerHandle`]
//! carried by the [`Invocation`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use switchboard_channel::PublishReport;
use switchboard_protocol::{ClientId, DispatchContext, Receiver, SERVER_IDENTITY};
use switchboard_registry::{Describe, HandlerDescriptor};

use crate::notifier::Notification;
use crate::dispatcher::{self, DispatchReport};
use crate::{BrokerHandle, HandlerError};

/// What every entry point returns.
pub type HandlerResult = Result<(), HandlerError>;

/// A type-erased async entry point.
pub type EntryPoint = Arc<dyn Fn(Invocation) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A registered handler: descriptor plus entry points.
pub struct Handler {
    descriptor: HandlerDescriptor,
    entries: HashMap<String, EntryPoint>,
}

impl Handler {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> HandlerBuilder {
        HandlerBuilder {
            descriptor: HandlerDescriptor::new(name, version),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The entry point for `method`, if the handler implements it.
    pub fn entry_point(&self, method: &str) -> Option<EntryPoint> {
        self.entries.get(method).cloned()
    }
}

impl Describe for Handler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut implemented: Vec<&String> = self.entries.keys().collect();
        implemented.sort();
        f.debug_struct("Handler")
            .field("descriptor", &self.descriptor)
            .field("implemented", &implemented)
            .finish()
    }
}

/// Fluent construction of a [`Handler`].
pub struct HandlerBuilder {
    descriptor: HandlerDescriptor,
    entries: HashMap<String, EntryPoint>,
}

impl HandlerBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    /// Adds a capability module callers must hold.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.descriptor.modules.insert(module.into());
        self
    }

    /// Declares `method` and binds its entry point.
    pub fn method<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let method = method.into();
        self.descriptor.methods.insert(method.clone());
        let entry: EntryPoint = Arc::new(move |inv: Invocation| f(inv).boxed());
        self.entries.insert(method, entry);
        self
    }

    /// Declares `method` without an entry point. Lookups will find the
    /// handler, and every call is reported as misconfigured.
    pub fn declare(mut self, method: impl Into<String>) -> Self {
        self.descriptor.methods.insert(method.into());
        self
    }

    pub fn build(self) -> Handler {
        for method in &self.descriptor.methods {
            if !self.entries.contains_key(method) {
                tracing::warn!(
                    handler = %self.descriptor.name,
                    method = %method,
                    "method declared without an entry point"
                );
            }
        }
        Handler {
            descriptor: self.descriptor,
            entries: self.entries,
        }
    }
}

/// One call of one entry point.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The request being served.
    pub ctx: DispatchContext,
    /// The request's params, untouched.
    pub params: Value,
    /// The request's protocol version.
    pub version: String,
    /// Everything the handler may do goes through here.
    pub broker: BrokerHandle,
}

impl Invocation {
    pub(crate) fn new(
        ctx: DispatchContext,
        params: Value,
        version: String,
        broker: BrokerHandle,
    ) -> Self {
        Self {
            ctx,
            params,
            version,
            broker,
        }
    }

    pub fn origin(&self) -> &ClientId {
        &self.ctx.origin
    }

    /// Deserializes the params into `T`.
    ///
    /// # Errors
    /// [`HandlerError::InvalidParams`] if they don't fit.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.params.clone())?)
    }

    /// Sends `params` back to the caller as a server message carrying the
    /// request's method and sequence-id.
    pub async fn reply(&self, params: Value) -> HandlerResult {
        let message = json!({
            "identity": SERVER_IDENTITY,
            "method": self.ctx.method,
            "params": params,
        });
        self.broker
            .relay(
                self.ctx.clone(),
                Receiver::Client(self.ctx.origin.clone()),
                message,
                true,
            )
            .await?;
        Ok(())
    }

    /// Relays a message on behalf of the caller to a client or channel.
    pub async fn relay(
        &self,
        receiver: Receiver,
        method: &str,
        params: Value,
    ) -> Result<PublishReport, HandlerError> {
        let message = json!({ "method": method, "params": params });
        Ok(self
            .broker
            .relay(self.ctx.clone(), receiver, message, false)
            .await?)
    }

    /// Sends a notification in the context of this request.
    pub async fn notify(&self, notification: Notification) -> HandlerResult {
        self.broker.notify(self.ctx.clone(), notification).await?;
        Ok(())
    }

    /// Dispatches `method` as if the caller had sent it, inside this
    /// invocation's time budget.
    pub async fn invoke(
        &self,
        method: &str,
        params: Value,
    ) -> Result<DispatchReport, HandlerError> {
        let ctx = DispatchContext::new(self.ctx.origin.clone(), method, self.ctx.sequence_id);
        Ok(dispatcher::dispatch_nested(&self.broker, ctx, params, &self.version).await?)
    }
}
