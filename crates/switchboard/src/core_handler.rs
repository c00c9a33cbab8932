//! The built-in `core` handler.
//!
//! Exposes the broker's own operations to clients as ordinary methods.
//! Declares the universal module, so every client may call it without
//! holding any module.
//!
//! | Method            | Params                                   |
//! |-------------------|------------------------------------------|
//! | `subscribe`       | `{channels, bounce?, create?}`           |
//! | `unsubscribe`     | `{channels}` (`"all"` allowed)           |
//! | `create`          | `{channels}`                             |
//! | `destroy`         | `{channels}`                             |
//! | `send`            | `{channel \| client, payload}`           |
//! | `modules.assign`  | `{modules}`                              |
//! | `modules.remove`  | `{modules}`                              |
//! | `modules.list`    | none                                     |
//! | `subscriptions`   | none                                     |
//! | `handlers`        | none                                     |
//!
//! `channels` and `modules` take a single name or a list.

use serde::Deserialize;
use serde_json::{Value, json};
use switchboard_channel::SubscribeOptions;
use switchboard_protocol::{PROTOCOL_VERSION, Receiver, UNIVERSAL_MODULE, codes};

use crate::notifier::Notification;
use crate::plugin::{Handler, HandlerResult, Invocation};
use crate::{BrokerError, HandlerError};

/// Method name used for everything `send` delivers.
pub const MESSAGE_METHOD: &str = "message";

/// One name or several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Names {
    One(String),
    Many(Vec<String>),
}

impl Names {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    channels: Names,
    #[serde(default)]
    bounce: bool,
    #[serde(default)]
    create: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelsParams {
    channels: Names,
}

#[derive(Debug, Deserialize)]
struct ModulesParams {
    modules: Names,
}

#[derive(Debug, Deserialize)]
struct SendParams {
    channel: Option<String>,
    client: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Builds the `core` handler.
pub fn core_handler() -> Handler {
    Handler::builder("core", PROTOCOL_VERSION)
        .description("channel, module and introspection methods every client may call")
        .module(UNIVERSAL_MODULE)
        .method("subscribe", subscribe)
        .method("unsubscribe", unsubscribe)
        .method("create", create)
        .method("destroy", destroy)
        .method("send", send)
        .method("modules.assign", assign_modules)
        .method("modules.remove", remove_modules)
        .method("modules.list", list_modules)
        .method("subscriptions", subscriptions)
        .method("handlers", handlers)
        .build()
}

// Per-name failures are reported to the caller by the core as
// notifications, so the entry points below only fail on bad params or a
// stopped broker.

async fn subscribe(inv: Invocation) -> HandlerResult {
    let params: SubscribeParams = inv.parse()?;
    let options = SubscribeOptions {
        bounce: params.bounce,
        create_lazy: params.create,
    };
    inv.broker
        .subscribe(
            inv.ctx.clone(),
            inv.origin().clone(),
            params.channels.into_vec(),
            options,
        )
        .await?;
    Ok(())
}

async fn unsubscribe(inv: Invocation) -> HandlerResult {
    let params: ChannelsParams = inv.parse()?;
    inv.broker
        .unsubscribe(inv.ctx.clone(), inv.origin().clone(), params.channels.into_vec())
        .await?;
    Ok(())
}

async fn create(inv: Invocation) -> HandlerResult {
    let params: ChannelsParams = inv.parse()?;
    inv.broker
        .create(inv.ctx.clone(), params.channels.into_vec())
        .await?;
    Ok(())
}

async fn destroy(inv: Invocation) -> HandlerResult {
    let params: ChannelsParams = inv.parse()?;
    inv.broker
        .destroy(inv.ctx.clone(), params.channels.into_vec())
        .await?;
    Ok(())
}

async fn send(inv: Invocation) -> HandlerResult {
    let params: SendParams = inv.parse()?;
    let (receiver, body) = match (params.channel, params.client) {
        (Some(channel), None) => {
            let body = json!({"channel": channel, "payload": params.payload});
            (Receiver::Channel(channel), body)
        }
        (None, Some(client)) => (Receiver::client(client), json!({"payload": params.payload})),
        _ => {
            return Err(HandlerError::InvalidParams(
                "exactly one of 'channel' or 'client' is required".into(),
            ));
        }
    };

    match inv.relay(receiver, MESSAGE_METHOD, body).await {
        Ok(_) => Ok(()),
        Err(HandlerError::Broker(BrokerError::Channel(e))) => {
            inv.notify(
                Notification::warning(e.code())
                    .to(Receiver::Client(inv.origin().clone()))
                    .param("channel", e.channel())
                    .param("identity", inv.origin().as_str()),
            )
            .await
        }
        Err(HandlerError::Broker(BrokerError::UnknownClient(client))) => {
            inv.notify(
                Notification::warning(codes::UNKNOWN_CLIENT)
                    .to(Receiver::Client(inv.origin().clone()))
                    .param("client", client.as_str()),
            )
            .await
        }
        Err(e) => Err(e),
    }
}

async fn assign_modules(inv: Invocation) -> HandlerResult {
    let params: ModulesParams = inv.parse()?;
    let result = inv
        .broker
        .assign_modules(inv.ctx.clone(), inv.origin().clone(), params.modules.into_vec())
        .await;
    ignore_refusal(result)
}

async fn remove_modules(inv: Invocation) -> HandlerResult {
    let params: ModulesParams = inv.parse()?;
    let result = inv
        .broker
        .remove_modules(inv.ctx.clone(), inv.origin().clone(), params.modules.into_vec())
        .await;
    ignore_refusal(result)
}

/// Module refusals have already been reported to the caller by the core.
fn ignore_refusal<T>(result: Result<T, BrokerError>) -> HandlerResult {
    match result {
        Ok(_) | Err(BrokerError::Session(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn list_modules(inv: Invocation) -> HandlerResult {
    let modules = inv.broker.modules(inv.origin()).await?;
    inv.reply(json!({ "modules": modules })).await
}

async fn subscriptions(inv: Invocation) -> HandlerResult {
    let channels = inv.broker.subscriptions(inv.origin()).await?;
    inv.reply(json!({ "channels": channels })).await
}

async fn handlers(inv: Invocation) -> HandlerResult {
    let descriptors = inv.broker.handlers(Some(inv.origin().clone())).await?;
    inv.reply(json!({ "handlers": descriptors })).await
}
