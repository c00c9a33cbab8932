//! Capability module assignment.
//!
//! A module is just a tag. Handlers declare the modules they serve; a
//! client may call a handler only if it holds one of them (or the handler
//! declares the universal `core` module, which every client satisfies
//! without holding it).

use std::collections::{BTreeSet, HashMap};

use switchboard_protocol::ClientId;

use crate::SessionError;

/// Per-identity set of capability modules.
#[derive(Debug, Default)]
pub struct ModuleTable {
    assignments: HashMap<ClientId, BTreeSet<String>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `modules` to the identity's set and returns the ones that were
    /// not already held. Validates every name before changing anything.
    ///
    /// # Errors
    /// [`SessionError::InvalidModule`] for an empty or blank name.
    pub fn assign<I, S>(
        &mut self,
        identity: &ClientId,
        modules: I,
    ) -> Result<Vec<String>, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let modules = validated(modules)?;
        let held = self.assignments.entry(identity.clone()).or_default();
        let added = modules
            .into_iter()
            .filter(|m| held.insert(m.clone()))
            .collect::<Vec<_>>();
        if !added.is_empty() {
            tracing::debug!(%identity, ?added, "modules assigned");
        }
        Ok(added)
    }

    /// Removes `modules` from the identity's set.
    ///
    /// All-or-nothing: if any module is not held, nothing is removed.
    ///
    /// # Errors
    /// - [`SessionError::InvalidModule`] for an empty name
    /// - [`SessionError::ModuleNotAssigned`] for a module not held
    pub fn remove<I, S>(
        &mut self,
        identity: &ClientId,
        modules: I,
    ) -> Result<Vec<String>, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let modules = validated(modules)?;
        let held = self.assignments.get_mut(identity);
        for module in &modules {
            if !held.as_ref().is_some_and(|h| h.contains(module)) {
                return Err(SessionError::ModuleNotAssigned {
                    identity: identity.clone(),
                    module: module.clone(),
                });
            }
        }
        if let Some(held) = held {
            for module in &modules {
                held.remove(module);
            }
        }
        tracing::debug!(%identity, removed = ?modules, "modules removed");
        Ok(modules)
    }

    /// The identity's current modules (empty when none were assigned).
    pub fn modules(&self, identity: &ClientId) -> BTreeSet<String> {
        self.assignments.get(identity).cloned().unwrap_or_default()
    }

    /// Forgets the identity entirely. Called on unbind.
    pub fn clear(&mut self, identity: &ClientId) {
        self.assignments.remove(identity);
    }
}

fn validated<I, S>(modules: I) -> Result<Vec<String>, SessionError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = Vec::new();
    for module in modules {
        let module = module.into();
        if module.trim().is_empty() {
            return Err(SessionError::InvalidModule(module));
        }
        if !out.contains(&module) {
            out.push(module);
        }
    }
    Ok(out)
}
