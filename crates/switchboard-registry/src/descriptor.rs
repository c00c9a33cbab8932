//! Handler descriptors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use switchboard_protocol::UNIVERSAL_MODULE;

use crate::RegistrationError;

/// What a handler is and who may call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    /// Capability modules. A client must hold at least one of them, unless
    /// the set contains the universal module.
    pub modules: BTreeSet<String>,
    /// Methods this handler answers.
    pub methods: BTreeSet<String>,
}

impl HandlerDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: version.into(),
            modules: BTreeSet::new(),
            methods: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.modules.insert(module.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.methods.insert(method.into());
        self
    }

    /// `true` when any client may call this handler regardless of its
    /// assigned modules.
    pub fn is_universal(&self) -> bool {
        self.modules.contains(UNIVERSAL_MODULE)
    }

    /// Whether a client holding `client_modules` may call this handler at
    /// `version`.
    pub fn admits(&self, client_modules: &BTreeSet<String>, version: &str) -> bool {
        self.version == version
            && (self.is_universal() || !self.modules.is_disjoint(client_modules))
    }

    /// Checks every field is present and non-empty.
    ///
    /// # Errors
    /// [`RegistrationError::InvalidDescriptor`] naming the first problem.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        let invalid = |reason: &str| {
            Err(RegistrationError::InvalidDescriptor {
                name: self.name.clone(),
                reason: reason.to_owned(),
            })
        };

        if self.name.trim().is_empty() {
            return invalid("name is empty");
        }
        if self.version.trim().is_empty() {
            return invalid("version is empty");
        }
        if self.methods.is_empty() {
            return invalid("no methods declared");
        }
        if self.methods.iter().any(|m| m.trim().is_empty()) {
            return invalid("empty method name");
        }
        if self.modules.is_empty() {
            return invalid("no modules declared");
        }
        if self.modules.iter().any(|m| m.trim().is_empty()) {
            return invalid("empty module name");
        }
        Ok(())
    }

    /// Same name and version with at least one module in common. Returns
    /// the first shared module.
    pub fn conflicts_with<'a>(&'a self, other: &'a HandlerDescriptor) -> Option<&'a str> {
        if self.name != other.name || self.version != other.version {
            return None;
        }
        self.modules
            .intersection(&other.modules)
            .next()
            .map(String::as_str)
    }
}

/// Anything the registry can hold.
pub trait Describe {
    fn descriptor(&self) -> &HandlerDescriptor;
}

impl Describe for HandlerDescriptor {
    fn descriptor(&self) -> &HandlerDescriptor {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn chat() -> HandlerDescriptor {
        HandlerDescriptor::new("chat", "1.0")
            .with_module("chat")
            .with_method("say")
    }

    #[test]
    fn test_validate_complete_descriptor_is_ok() {
        assert_eq!(chat().validate(), Ok(()));
    }

    #[test]
    fn test_validate_reports_each_missing_field() {
        let cases = [
            (HandlerDescriptor::new("", "1.0").with_module("m").with_method("x"), "name is empty"),
            (HandlerDescriptor::new("h", " ").with_module("m").with_method("x"), "version is empty"),
            (HandlerDescriptor::new("h", "1.0").with_module("m"), "no methods declared"),
            (HandlerDescriptor::new("h", "1.0").with_module("m").with_method(""), "empty method name"),
            (HandlerDescriptor::new("h", "1.0").with_method("x"), "no modules declared"),
            (HandlerDescriptor::new("h", "1.0").with_module("").with_method("x"), "empty module name"),
        ];
        for (descriptor, expected) in cases {
            match descriptor.validate() {
                Err(RegistrationError::InvalidDescriptor { reason, .. }) => {
                    assert_eq!(reason, expected);
                }
                other => panic!("expected InvalidDescriptor({expected}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_admits_requires_version_and_module() {
        let d = chat();
        assert!(d.admits(&modules(&["chat"]), "1.0"));
        assert!(!d.admits(&modules(&["chat"]), "2.0"));
        assert!(!d.admits(&modules(&["game"]), "1.0"));
        assert!(!d.admits(&BTreeSet::new(), "1.0"));
    }

    #[test]
    fn test_admits_universal_module_needs_no_assignment() {
        let d = HandlerDescriptor::new("core", "1.0")
            .with_module(UNIVERSAL_MODULE)
            .with_method("subscribe");
        assert!(d.admits(&BTreeSet::new(), "1.0"));
        assert!(!d.admits(&BTreeSet::new(), "2.0"));
    }

    #[test]
    fn test_conflicts_with_needs_name_version_and_shared_module() {
        let a = chat().with_module("extra");
        assert_eq!(a.conflicts_with(&chat()), Some("chat"));

        let other_version = HandlerDescriptor::new("chat", "2.0").with_module("chat");
        assert_eq!(a.conflicts_with(&other_version), None);

        let disjoint = HandlerDescriptor::new("chat", "1.0").with_module("game");
        assert_eq!(a.conflicts_with(&disjoint), None);
    }
}
