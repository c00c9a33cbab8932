//! Notification codes and their message templates.
//!
//! The broker reports every outcome a client might care about (a channel
//! was created, a handler timed out, someone tried to take your name) as a
//! `notify` envelope carrying a numeric code. Codes are grouped by family
//! in blocks of one hundred and are part of the wire contract: a code never
//! changes meaning once published.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable notification codes.
pub mod codes {
    // -- Channel lifecycle (1xx) --
    pub const SUBSCRIBED: u16 = 100;
    pub const UNSUBSCRIBED: u16 = 101;
    pub const CHANNEL_CREATED: u16 = 102;
    pub const CHANNEL_DESTROYED: u16 = 103;
    pub const ALREADY_SUBSCRIBED: u16 = 110;
    pub const NOT_SUBSCRIBED: u16 = 111;
    pub const UNKNOWN_CHANNEL: u16 = 112;
    pub const RESERVED_CHANNEL: u16 = 113;
    pub const CHANNEL_EXISTS: u16 = 114;
    pub const SHORTCUT_NOT_ALLOWED: u16 = 115;
    pub const INVALID_CHANNEL_NAME: u16 = 116;

    // -- Capability modules (2xx) --
    pub const MODULES_ASSIGNED: u16 = 200;
    pub const MODULES_REMOVED: u16 = 201;
    pub const INVALID_MODULE: u16 = 210;
    pub const MODULE_NOT_ASSIGNED: u16 = 211;

    // -- Handler registration (3xx) --
    pub const HANDLER_REGISTERED: u16 = 300;
    pub const HANDLER_UNREGISTERED: u16 = 301;
    pub const INVALID_HANDLER: u16 = 310;
    pub const DUPLICATE_HANDLER: u16 = 311;

    // -- Connection lifecycle (4xx) --
    pub const CONNECTED: u16 = 400;
    pub const DISCONNECTED: u16 = 401;

    // -- Identity binding (5xx) --
    pub const ANONYMOUS_IDENTITY: u16 = 500;
    pub const IDENTITY_HIJACK: u16 = 501;
    pub const RESERVED_IDENTITY: u16 = 502;

    // -- Dispatch (6xx) --
    pub const NO_HANDLER_FOUND: u16 = 600;
    pub const HANDLER_MISCONFIGURED: u16 = 601;
    pub const HANDLER_FAILED: u16 = 602;
    pub const HANDLER_TIMEOUT: u16 = 603;

    // -- Protocol (7xx) --
    pub const MALFORMED_MESSAGE: u16 = 700;
    pub const NO_MESSAGE_GIVEN: u16 = 701;
    pub const INVALID_IDENTITY: u16 = 702;
    pub const AMBIGUOUS_IDENTITY: u16 = 703;
    pub const INVALID_FORMAT: u16 = 704;
    pub const MANDATORY_KEY_MISSING: u16 = 705;
    pub const DISALLOWED_KEY: u16 = 706;

    // -- Relay (8xx) --
    pub const UNKNOWN_CLIENT: u16 = 800;
}

/// Built-in template table. `{name}` placeholders are filled from the
/// notification's params.
const DEFAULT_TEMPLATES: &[(u16, &str)] = &[
    (codes::SUBSCRIBED, "{identity} subscribed to channel '{channel}'"),
    (codes::UNSUBSCRIBED, "{identity} unsubscribed from channel '{channel}'"),
    (codes::CHANNEL_CREATED, "channel '{channel}' created"),
    (codes::CHANNEL_DESTROYED, "channel '{channel}' destroyed"),
    (codes::ALREADY_SUBSCRIBED, "already subscribed to channel '{channel}'"),
    (codes::NOT_SUBSCRIBED, "not subscribed to channel '{channel}'"),
    (codes::UNKNOWN_CHANNEL, "unknown channel '{channel}'"),
    (codes::RESERVED_CHANNEL, "channel '{channel}' is reserved"),
    (codes::CHANNEL_EXISTS, "channel '{channel}' already exists"),
    (codes::SHORTCUT_NOT_ALLOWED, "'{channel}' cannot be used here"),
    (codes::INVALID_CHANNEL_NAME, "invalid channel name '{channel}'"),
    (codes::MODULES_ASSIGNED, "modules {modules} assigned to {identity}"),
    (codes::MODULES_REMOVED, "modules {modules} removed from {identity}"),
    (codes::INVALID_MODULE, "invalid module name '{module}'"),
    (codes::MODULE_NOT_ASSIGNED, "module '{module}' is not assigned to {identity}"),
    (codes::HANDLER_REGISTERED, "handler '{name}' v{version} registered"),
    (codes::HANDLER_UNREGISTERED, "handler '{name}' v{version} unregistered"),
    (codes::INVALID_HANDLER, "handler '{name}' rejected: {reason}"),
    (codes::DUPLICATE_HANDLER, "handler '{name}' rejected: {reason}"),
    (codes::CONNECTED, "connected as {identity}"),
    (codes::DISCONNECTED, "{identity} disconnected"),
    (codes::ANONYMOUS_IDENTITY, "no identity requested, using {identity}"),
    (
        codes::IDENTITY_HIJACK,
        "identity '{requested}' is bound to another connection, using {identity}",
    ),
    (
        codes::RESERVED_IDENTITY,
        "identity '{requested}' is reserved, using {identity}",
    ),
    (codes::NO_HANDLER_FOUND, "no handler found for method '{method}'"),
    (
        codes::HANDLER_MISCONFIGURED,
        "handler '{handler}' declares '{method}' but does not implement it",
    ),
    (codes::HANDLER_FAILED, "handler '{handler}' failed on '{method}': {error}"),
    (
        codes::HANDLER_TIMEOUT,
        "handler '{handler}' timed out on '{method}' after {timeout_ms}ms",
    ),
    (codes::MALFORMED_MESSAGE, "malformed message: {error}"),
    (codes::NO_MESSAGE_GIVEN, "no message given"),
    (codes::INVALID_IDENTITY, "invalid identity: {error}"),
    (codes::AMBIGUOUS_IDENTITY, "ambiguous identity: {error}"),
    (codes::INVALID_FORMAT, "invalid format: {error}"),
    (codes::MANDATORY_KEY_MISSING, "{error}"),
    (codes::DISALLOWED_KEY, "{error}"),
    (codes::UNKNOWN_CLIENT, "unknown client '{client}'"),
];

/// Severity of a notification. Carried on the wire as `type` and used as
/// the log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Code → template lookup with placeholder rendering.
#[derive(Debug, Clone)]
pub struct Templates {
    table: HashMap<u16, String>,
}

impl Templates {
    /// Text used when a code is unknown or renders to nothing.
    pub const UNKNOWN_CODE: &'static str = "no such notification code";

    /// An empty table; every code renders to the fallback.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Adds or replaces the template for `code`.
    pub fn insert(&mut self, code: u16, template: impl Into<String>) {
        self.table.insert(code, template.into());
    }

    pub fn get(&self, code: u16) -> Option<&str> {
        self.table.get(&code).map(String::as_str)
    }

    /// Renders `code`, substituting each `{name}` whose key exists in
    /// `params`. Strings are inserted bare; other values as compact JSON.
    /// Placeholders without a matching param are left untouched.
    ///
    /// The template is scanned once, so text coming from a param is never
    /// itself treated as a placeholder.
    pub fn render(&self, code: u16, params: &Map<String, Value>) -> String {
        let Some(template) = self.get(code) else {
            return Self::UNKNOWN_CODE.to_owned();
        };

        let mut text = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            text.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                rest = &rest[open..];
                break;
            };
            let key = &after[..close];
            match params.get(key) {
                Some(Value::String(s)) => text.push_str(s),
                Some(other) => text.push_str(&other.to_string()),
                None => {
                    text.push('{');
                    text.push_str(key);
                    text.push('}');
                }
            }
            rest = &after[close + 1..];
        }
        text.push_str(rest);

        if text.trim().is_empty() {
            Self::UNKNOWN_CODE.to_owned()
        } else {
            text
        }
    }
}

impl Default for Templates {
    fn default() -> Self {
        let mut templates = Self::empty();
        for (code, template) in DEFAULT_TEMPLATES {
            templates.insert(*code, *template);
        }
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_render_substitutes_named_placeholders() {
        let text = Templates::default().render(
            codes::SUBSCRIBED,
            &params(json!({"identity": "c1", "channel": "news"})),
        );
        assert_eq!(text, "c1 subscribed to channel 'news'");
    }

    #[test]
    fn test_render_non_string_values_as_json() {
        let text = Templates::default().render(
            codes::HANDLER_TIMEOUT,
            &params(json!({"handler": "slow", "method": "m", "timeout_ms": 250})),
        );
        assert_eq!(text, "handler 'slow' timed out on 'm' after 250ms");
    }

    #[test]
    fn test_render_unknown_code_falls_back() {
        let text = Templates::default().render(9999, &Map::new());
        assert_eq!(text, Templates::UNKNOWN_CODE);
    }

    #[test]
    fn test_render_empty_result_falls_back() {
        let mut templates = Templates::empty();
        templates.insert(1, "{blank}");
        let text = templates.render(1, &params(json!({"blank": ""})));
        assert_eq!(text, Templates::UNKNOWN_CODE);
    }

    #[test]
    fn test_render_leaves_missing_placeholders() {
        let text = Templates::default().render(codes::UNKNOWN_CHANNEL, &Map::new());
        assert_eq!(text, "unknown channel '{channel}'");
    }

    #[test]
    fn test_render_does_not_expand_placeholders_inside_values() {
        let text = Templates::default().render(
            codes::SUBSCRIBED,
            &params(json!({"channel": "{identity}", "identity": "alice"})),
        );
        assert_eq!(text, "alice subscribed to channel '{identity}'");
    }

    #[test]
    fn test_render_keeps_unclosed_brace() {
        let mut templates = Templates::empty();
        templates.insert(1, "{a} and {b");
        let text = templates.render(1, &params(json!({"a": "x", "b": "y"})));
        assert_eq!(text, "x and {b");
    }

    #[test]
    fn test_every_default_code_has_a_template() {
        let templates = Templates::default();
        for code in [
            codes::SUBSCRIBED,
            codes::MODULES_ASSIGNED,
            codes::HANDLER_REGISTERED,
            codes::CONNECTED,
            codes::IDENTITY_HIJACK,
            codes::NO_HANDLER_FOUND,
            codes::DISALLOWED_KEY,
            codes::UNKNOWN_CLIENT,
        ] {
            assert!(templates.get(code).is_some(), "missing template {code}");
        }
    }

    #[test]
    fn test_notify_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_value(NotifyKind::Warning).unwrap(), json!("warning"));
    }
}
