//! The method → handlers index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::{Describe, HandlerDescriptor, RegistrationError};

/// Holds registered handlers and indexes them by method.
///
/// Every index keeps registration order, so [`lookup`](Self::lookup)
/// returns matches in the order their handlers were registered.
#[derive(Debug)]
pub struct HandlerRegistry<H> {
    handlers: Vec<Arc<H>>,
    by_method: HashMap<String, Vec<Arc<H>>>,
}

impl<H: Describe> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            by_method: HashMap::new(),
        }
    }

    /// Validates and indexes `handler` under each of its methods.
    ///
    /// # Errors
    /// - [`RegistrationError::InvalidDescriptor`] for a missing or empty field
    /// - [`RegistrationError::AlreadyRegistered`] for the same instance twice
    /// - [`RegistrationError::Duplicate`] when a handler with the same name
    ///   and version already serves one of its modules
    ///
    /// The handler is skipped on error and nothing changes.
    pub fn register(&mut self, handler: Arc<H>) -> Result<(), RegistrationError> {
        let result = self.check(&handler);
        let descriptor = handler.descriptor();

        if let Err(e) = result {
            tracing::debug!(
                handler = %descriptor.name,
                version = %descriptor.version,
                error = %e,
                "handler registration skipped"
            );
            return Err(e);
        }

        for method in &descriptor.methods {
            self.by_method
                .entry(method.clone())
                .or_default()
                .push(Arc::clone(&handler));
        }
        tracing::debug!(
            handler = %descriptor.name,
            version = %descriptor.version,
            methods = ?descriptor.methods,
            modules = ?descriptor.modules,
            "handler registered"
        );
        self.handlers.push(handler);
        Ok(())
    }

    fn check(&self, handler: &Arc<H>) -> Result<(), RegistrationError> {
        let descriptor = handler.descriptor();
        descriptor.validate()?;

        for existing in &self.handlers {
            if Arc::ptr_eq(existing, handler) {
                return Err(RegistrationError::AlreadyRegistered {
                    name: descriptor.name.clone(),
                });
            }
            if let Some(module) = existing.descriptor().conflicts_with(descriptor) {
                return Err(RegistrationError::Duplicate {
                    name: descriptor.name.clone(),
                    version: descriptor.version.clone(),
                    module: module.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Removes every handler whose descriptor equals `descriptor` from every
    /// index. Returns the removed handlers; empty when none matched.
    pub fn unregister(&mut self, descriptor: &HandlerDescriptor) -> Vec<Arc<H>> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .handlers
            .drain(..)
            .partition(|h| h.descriptor() == descriptor);
        self.handlers = kept;

        if removed.is_empty() {
            return removed;
        }

        self.by_method.retain(|_, list| {
            list.retain(|h| !removed.iter().any(|r| Arc::ptr_eq(r, h)));
            !list.is_empty()
        });
        tracing::debug!(
            handler = %descriptor.name,
            version = %descriptor.version,
            "handler unregistered"
        );
        removed
    }

    /// Handlers serving `method` that a client holding `client_modules`
    /// may call at `version`, in registration order.
    pub fn lookup(
        &self,
        method: &str,
        client_modules: &BTreeSet<String>,
        version: &str,
    ) -> Vec<Arc<H>> {
        self.by_method
            .get(method)
            .map(|list| {
                list.iter()
                    .filter(|h| h.descriptor().admits(client_modules, version))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Descriptors of every handler a client holding `client_modules` may
    /// call at any version, in registration order.
    pub fn visible(&self, client_modules: &BTreeSet<String>) -> Vec<HandlerDescriptor> {
        self.handlers
            .iter()
            .map(|h| h.descriptor())
            .filter(|d| d.is_universal() || !d.modules.is_disjoint(client_modules))
            .cloned()
            .collect()
    }

    /// Every registered descriptor, in registration order.
    pub fn descriptors(&self) -> Vec<HandlerDescriptor> {
        self.handlers.iter().map(|h| h.descriptor().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: Describe> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
