//! Method dispatch.
//!
//! For one normalized envelope the dispatcher asks the core which handlers
//! are eligible, then runs them one after another in registration order.
//! Each invocation:
//!
//! 1. takes a permit from the shared semaphore
//! 2. runs on its own Tokio task under the handler timeout
//! 3. is reported to the caller if it is missing, fails, panics, or times out
//!
//! Whatever a handler does wrong stays with that handler. The broker, the
//! connection, and the other handlers for the same request carry on.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;
use switchboard_protocol::{DispatchContext, Envelope, Receiver, codes};
use switchboard_registry::Describe;

use crate::notifier::Notification;
use crate::plugin::{EntryPoint, Handler, Invocation};
use crate::{BrokerError, BrokerHandle, HandlerError};

/// What happened to one dispatched request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Eligible handlers found.
    pub matched: usize,
    /// Invocations that returned `Ok`.
    pub completed: usize,
    /// Handlers declaring the method without an entry point.
    pub misconfigured: usize,
    /// Invocations that returned an error or panicked.
    pub failed: usize,
    /// Invocations aborted for exceeding the budget.
    pub timed_out: usize,
}

/// How a single invocation ended.
enum Outcome {
    Completed,
    Failed { error: String, detail: String },
    TimedOut,
}

/// Dispatches `envelope` with a fresh permit and time budget per handler.
pub(crate) async fn dispatch(
    broker: &BrokerHandle,
    envelope: Envelope,
) -> Result<DispatchReport, BrokerError> {
    let ctx = DispatchContext::for_envelope(&envelope);
    let handlers = broker
        .plan(&ctx.origin, &envelope.method, &envelope.version)
        .await?;

    let mut report = DispatchReport {
        matched: handlers.len(),
        ..DispatchReport::default()
    };
    if handlers.is_empty() {
        report_no_handler(broker, &ctx, &envelope.version).await?;
        return Ok(report);
    }

    for handler in handlers {
        let Some(entry) = handler.entry_point(&ctx.method) else {
            report_misconfigured(broker, &ctx, &handler).await?;
            report.misconfigured += 1;
            continue;
        };
        let invocation = Invocation::new(
            ctx.clone(),
            envelope.params.clone(),
            envelope.version.clone(),
            broker.clone(),
        );
        let outcome = run_spawned(broker, entry, invocation).await?;
        record(broker, &ctx, &handler, outcome, &mut report).await?;
    }

    Ok(report)
}

/// Dispatches from inside a running invocation. Runs inline, within the
/// caller's permit and time budget.
pub(crate) async fn dispatch_nested(
    broker: &BrokerHandle,
    ctx: DispatchContext,
    params: Value,
    version: &str,
) -> Result<DispatchReport, BrokerError> {
    let handlers = broker.plan(&ctx.origin, &ctx.method, version).await?;

    let mut report = DispatchReport {
        matched: handlers.len(),
        ..DispatchReport::default()
    };
    if handlers.is_empty() {
        report_no_handler(broker, &ctx, version).await?;
        return Ok(report);
    }

    for handler in handlers {
        let Some(entry) = handler.entry_point(&ctx.method) else {
            report_misconfigured(broker, &ctx, &handler).await?;
            report.misconfigured += 1;
            continue;
        };
        let invocation =
            Invocation::new(ctx.clone(), params.clone(), version.to_owned(), broker.clone());
        let outcome = match AssertUnwindSafe(entry(invocation)).catch_unwind().await {
            Ok(result) => finished(result),
            Err(panic) => panicked(panic),
        };
        record(broker, &ctx, &handler, outcome, &mut report).await?;
    }

    Ok(report)
}

async fn run_spawned(
    broker: &BrokerHandle,
    entry: EntryPoint,
    invocation: Invocation,
) -> Result<Outcome, BrokerError> {
    let permit = broker
        .permits()
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| BrokerError::Unavailable)?;

    let task = tokio::spawn(async move {
        let _permit = permit;
        entry(invocation).await
    });
    let abort = task.abort_handle();

    let outcome = match tokio::time::timeout(broker.handler_timeout(), task).await {
        Ok(Ok(result)) => finished(result),
        Ok(Err(join_error)) if join_error.is_panic() => panicked(join_error.into_panic()),
        Ok(Err(join_error)) => Outcome::Failed {
            error: "invocation cancelled".to_owned(),
            detail: join_error.to_string(),
        },
        Err(_) => {
            abort.abort();
            Outcome::TimedOut
        }
    };
    Ok(outcome)
}

fn finished(result: Result<(), HandlerError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Completed,
        Err(e) => Outcome::Failed {
            error: e.to_string(),
            detail: format!("{e:?}"),
        },
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> Outcome {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned());
    Outcome::Failed {
        error: format!("panicked: {message}"),
        detail: message,
    }
}

async fn record(
    broker: &BrokerHandle,
    ctx: &DispatchContext,
    handler: &Handler,
    outcome: Outcome,
    report: &mut DispatchReport,
) -> Result<(), BrokerError> {
    let origin = Receiver::Client(ctx.origin.clone());
    match outcome {
        Outcome::Completed => {
            report.completed += 1;
            tracing::debug!(
                handler = handler.name(),
                method = %ctx.method,
                origin = %ctx.origin,
                "invocation completed"
            );
        }
        Outcome::Failed { error, detail } => {
            report.failed += 1;
            broker
                .notify(
                    ctx.clone(),
                    Notification::error(codes::HANDLER_FAILED)
                        .to(origin)
                        .param("handler", handler.name())
                        .param("method", ctx.method.as_str())
                        .param("error", error)
                        .exception(detail),
                )
                .await?;
        }
        Outcome::TimedOut => {
            report.timed_out += 1;
            let timeout_ms = u64::try_from(broker.handler_timeout().as_millis()).unwrap_or(u64::MAX);
            broker
                .notify(
                    ctx.clone(),
                    Notification::error(codes::HANDLER_TIMEOUT)
                        .to(origin)
                        .param("handler", handler.name())
                        .param("method", ctx.method.as_str())
                        .param("timeout_ms", timeout_ms),
                )
                .await?;
        }
    }
    Ok(())
}

async fn report_no_handler(
    broker: &BrokerHandle,
    ctx: &DispatchContext,
    version: &str,
) -> Result<(), BrokerError> {
    broker
        .notify(
            ctx.clone(),
            Notification::warning(codes::NO_HANDLER_FOUND)
                .to(Receiver::Client(ctx.origin.clone()))
                .param("method", ctx.method.as_str())
                .param("version", version),
        )
        .await
}

async fn report_misconfigured(
    broker: &BrokerHandle,
    ctx: &DispatchContext,
    handler: &Handler,
) -> Result<(), BrokerError> {
    broker
        .notify(
            ctx.clone(),
            Notification::error(codes::HANDLER_MISCONFIGURED)
                .to(Receiver::Client(ctx.origin.clone()))
                .param("handler", handler.name())
                .param("method", ctx.method.as_str())
                .param("_version", handler.descriptor().version.as_str()),
        )
        .await
}
