//! Registration and lookup across several handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use switchboard_registry::{HandlerDescriptor, HandlerRegistry, RegistrationError};

fn modules(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

fn handler(name: &str, version: &str, mods: &[&str], methods: &[&str]) -> Arc<HandlerDescriptor> {
    let mut d = HandlerDescriptor::new(name, version).with_description(format!("{name} handler"));
    for m in mods {
        d = d.with_module(*m);
    }
    for m in methods {
        d = d.with_method(*m);
    }
    Arc::new(d)
}

fn names(found: &[Arc<HandlerDescriptor>]) -> Vec<&str> {
    found.iter().map(|h| h.name.as_str()).collect()
}

#[test]
fn test_lookup_filters_by_module_and_version() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("chat", "1.0", &["chat"], &["say"])).unwrap();
    reg.register(handler("chat", "2.0", &["chat"], &["say"])).unwrap();
    reg.register(handler("game", "1.0", &["game"], &["say"])).unwrap();

    assert_eq!(names(&reg.lookup("say", &modules(&["chat"]), "1.0")), vec!["chat"]);
    assert_eq!(reg.lookup("say", &modules(&["chat"]), "2.0")[0].version, "2.0");
    assert!(reg.lookup("say", &modules(&["admin"]), "1.0").is_empty());
    assert!(reg.lookup("shout", &modules(&["chat"]), "1.0").is_empty());
}

#[test]
fn test_lookup_universal_module_matches_every_client() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("core", "1.0", &["core"], &["ping"])).unwrap();

    assert_eq!(names(&reg.lookup("ping", &BTreeSet::new(), "1.0")), vec!["core"]);
    assert_eq!(names(&reg.lookup("ping", &modules(&["game"]), "1.0")), vec!["core"]);
}

#[test]
fn test_lookup_returns_matches_in_registration_order() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("second", "1.0", &["b"], &["m"])).unwrap();
    reg.register(handler("first", "1.0", &["a"], &["m"])).unwrap();

    let found = reg.lookup("m", &modules(&["a", "b"]), "1.0");

    assert_eq!(names(&found), vec!["second", "first"]);
}

#[test]
fn test_register_overlapping_module_same_version_is_duplicate() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("chat", "1.0", &["chat", "social"], &["say"])).unwrap();

    let result = reg.register(handler("chat", "1.0", &["social"], &["whisper"]));

    assert_eq!(
        result,
        Err(RegistrationError::Duplicate {
            name: "chat".into(),
            version: "1.0".into(),
            module: "social".into(),
        })
    );
    assert!(reg.lookup("whisper", &modules(&["social"]), "1.0").is_empty());
}

#[test]
fn test_register_same_name_disjoint_modules_is_allowed() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("chat", "1.0", &["a"], &["say"])).unwrap();
    reg.register(handler("chat", "1.0", &["b"], &["say"])).unwrap();
    assert_eq!(reg.len(), 2);
}

#[test]
fn test_unregister_removes_from_every_method() {
    let mut reg = HandlerRegistry::new();
    let chat = handler("chat", "1.0", &["chat"], &["say", "whisper"]);
    reg.register(Arc::clone(&chat)).unwrap();
    reg.register(handler("other", "1.0", &["chat"], &["say"])).unwrap();

    reg.unregister(&chat);

    let mods = modules(&["chat"]);
    assert_eq!(names(&reg.lookup("say", &mods, "1.0")), vec!["other"]);
    assert!(reg.lookup("whisper", &mods, "1.0").is_empty());
}

#[test]
fn test_unregister_unknown_descriptor_is_noop() {
    let mut reg: HandlerRegistry<HandlerDescriptor> = HandlerRegistry::new();
    let removed = reg.unregister(&HandlerDescriptor::new("ghost", "1.0"));
    assert!(removed.is_empty());
}

#[test]
fn test_visible_hides_handlers_for_other_modules() {
    let mut reg = HandlerRegistry::new();
    reg.register(handler("core", "1.0", &["core"], &["ping"])).unwrap();
    reg.register(handler("chat", "1.0", &["chat"], &["say"])).unwrap();
    reg.register(handler("game", "1.0", &["game"], &["move"])).unwrap();

    let visible: Vec<String> = reg
        .visible(&modules(&["chat"]))
        .into_iter()
        .map(|d| d.name)
        .collect();

    assert_eq!(visible, vec!["core", "chat"]);
}

#[test]
fn test_descriptor_serializes_sets_as_arrays() {
    let d = handler("chat", "1.0", &["chat"], &["say"]);
    let json = serde_json::to_value(&*d).unwrap();
    assert_eq!(json["modules"], serde_json::json!(["chat"]));
    assert_eq!(json["methods"], serde_json::json!(["say"]));
}
