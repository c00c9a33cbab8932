//! Envelope normalization.
//!
//! [`normalize`] is the single gate every message passes through, in both
//! directions: client input on the way in, and every relay on the way out.
//! It is pure. Given the same input it always produces the same envelope
//! or the same [`ProtocolError`].

use serde_json::{Map, Value};

use crate::{
    ClientId, Envelope, MANDATORY_KEYS, PROTOCOL_VERSION, ProtocolError,
    SEQUENCE_NONE, SequenceId,
};

/// Input accepted by [`normalize`]: undecoded bytes/text, or an already
/// structured JSON value.
#[derive(Debug, Clone)]
pub enum RawMessage<'a> {
    Bytes(&'a [u8]),
    Value(Value),
}

impl<'a> From<&'a [u8]> for RawMessage<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for RawMessage<'a> {
    fn from(text: &'a str) -> Self {
        Self::Bytes(text.as_bytes())
    }
}

impl From<Value> for RawMessage<'_> {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Validates `raw` and returns the canonical envelope sent by `origin`.
///
/// Steps, in order:
/// 1. decode to JSON (`MalformedMessage`); blank input is `NoMessageGiven`
/// 2. reject `null` / `{}` (`NoMessageGiven`)
/// 3. resolve identity: the reserved server identity needs
///    `allow_server_identity` (`InvalidIdentity`); a claimed identity other
///    than `origin` is `AmbiguousIdentity`; `origin` always wins
/// 4. default `version`, default and check `sequence-id` (`InvalidFormat`)
/// 5. every mandatory key present (`MandatoryKeyMissing`)
/// 6. no other keys (`DisallowedKey`)
pub fn normalize<'a>(
    raw: impl Into<RawMessage<'a>>,
    origin: &ClientId,
    allow_server_identity: bool,
) -> Result<Envelope, ProtocolError> {
    let value = match raw.into() {
        RawMessage::Bytes(bytes) => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Err(ProtocolError::NoMessageGiven);
            }
            serde_json::from_slice::<Value>(bytes)
                .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?
        }
        RawMessage::Value(value) => value,
    };

    let mut fields = match value {
        Value::Null => return Err(ProtocolError::NoMessageGiven),
        Value::Object(map) if map.is_empty() => {
            return Err(ProtocolError::NoMessageGiven);
        }
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::MalformedMessage(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )));
        }
    };

    resolve_identity(&mut fields, origin, allow_server_identity)?;

    match fields.get("version") {
        None | Some(Value::Null) => {
            fields.insert("version".into(), Value::from(PROTOCOL_VERSION));
        }
        Some(Value::String(_)) => {}
        Some(other) => {
            return Err(ProtocolError::InvalidFormat {
                key: "version",
                reason: format!("expected a string, got {}", json_kind(other)),
            });
        }
    }

    let sequence_id = match fields.get("sequence-id") {
        None | Some(Value::Null) => Some(SequenceId::None),
        Some(Value::String(s)) if s == SEQUENCE_NONE => Some(SequenceId::None),
        Some(Value::Number(n)) => n.as_i64().map(SequenceId::Id),
        Some(_) => None,
    };
    let Some(sequence_id) = sequence_id else {
        return Err(ProtocolError::InvalidFormat {
            key: "sequence-id",
            reason: format!(
                "expected an integer or \"{SEQUENCE_NONE}\", got {}",
                fields.get("sequence-id").unwrap_or(&Value::Null)
            ),
        });
    };
    let wire_sequence = match sequence_id {
        SequenceId::Id(id) => Value::from(id),
        SequenceId::None => Value::from(SEQUENCE_NONE),
    };
    fields.insert("sequence-id".into(), wire_sequence);

    let missing: Vec<&'static str> = MANDATORY_KEYS
        .iter()
        .copied()
        .filter(|key| !fields.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ProtocolError::MandatoryKeyMissing(missing));
    }

    if let Some(extra) = fields.keys().find(|k| !MANDATORY_KEYS.contains(&k.as_str())) {
        return Err(ProtocolError::DisallowedKey(extra.clone()));
    }

    let method = match fields.remove("method") {
        Some(Value::String(m)) if !m.trim().is_empty() => m,
        Some(other) => {
            return Err(ProtocolError::InvalidFormat {
                key: "method",
                reason: format!("expected a non-empty string, got {other}"),
            });
        }
        None => return Err(ProtocolError::MandatoryKeyMissing(vec!["method"])),
    };

    let version = match fields.remove("version") {
        Some(Value::String(v)) => v,
        _ => PROTOCOL_VERSION.to_owned(),
    };

    Ok(Envelope {
        identity: origin.clone(),
        method,
        params: fields.remove("params").unwrap_or(Value::Null),
        sequence_id,
        version,
    })
}

/// Checks the claimed identity against the sender and rewrites it to the
/// sender's canonical identity.
fn resolve_identity(
    fields: &mut Map<String, Value>,
    origin: &ClientId,
    allow_server_identity: bool,
) -> Result<(), ProtocolError> {
    match fields.get("identity") {
        None | Some(Value::Null) => {}
        Some(Value::String(claimed)) if claimed.is_empty() => {}
        Some(Value::String(claimed)) => {
            if ClientId::new(claimed.as_str()).is_server() && !allow_server_identity {
                return Err(ProtocolError::InvalidIdentity(claimed.clone()));
            }
            if claimed != origin.as_str() {
                return Err(ProtocolError::AmbiguousIdentity {
                    claimed: claimed.clone(),
                    origin: origin.to_string(),
                });
            }
        }
        Some(other) => {
            return Err(ProtocolError::InvalidFormat {
                key: "identity",
                reason: format!("expected a string, got {}", json_kind(other)),
            });
        }
    }

    if origin.is_server() && !allow_server_identity {
        return Err(ProtocolError::InvalidIdentity(origin.to_string()));
    }

    fields.insert("identity".into(), Value::from(origin.as_str()));
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn c1() -> ClientId {
        ClientId::new("c1")
    }

    // =====================================================================
    // Decoding
    // =====================================================================

    #[test]
    fn test_normalize_garbage_is_malformed() {
        let result = normalize("not json at all", &c1(), false);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_normalize_array_is_malformed() {
        let result = normalize("[1, 2]", &c1(), false);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_normalize_blank_null_and_empty_object_give_no_message() {
        for raw in ["", "   ", "null", "{}"] {
            assert_eq!(
                normalize(raw, &c1(), false),
                Err(ProtocolError::NoMessageGiven),
                "input {raw:?}"
            );
        }
    }

    // =====================================================================
    // Defaults
    // =====================================================================

    #[test]
    fn test_normalize_fills_identity_version_and_sequence() {
        let env = normalize(r#"{"method": "echo", "params": [1]}"#, &c1(), false)
            .expect("should normalize");
        assert_eq!(env.identity, c1());
        assert_eq!(env.version, PROTOCOL_VERSION);
        assert_eq!(env.sequence_id, SequenceId::None);
        assert_eq!(env.params, json!([1]));
    }

    #[test]
    fn test_normalize_accepts_structured_input() {
        let env = normalize(
            json!({"method": "echo", "params": null, "sequence-id": 7, "version": "2.0"}),
            &c1(),
            false,
        )
        .unwrap();
        assert_eq!(env.sequence_id, SequenceId::Id(7));
        assert_eq!(env.version, "2.0");
        assert_eq!(env.params, Value::Null);
    }

    // =====================================================================
    // Identity
    // =====================================================================

    #[test]
    fn test_normalize_matching_identity_is_accepted() {
        let env = normalize(
            json!({"identity": "c1", "method": "m", "params": {}}),
            &c1(),
            false,
        )
        .unwrap();
        assert_eq!(env.identity, c1());
    }

    #[test]
    fn test_normalize_conflicting_identity_is_ambiguous() {
        let result = normalize(
            json!({"identity": "mallory", "method": "m", "params": {}}),
            &c1(),
            false,
        );
        assert!(matches!(result, Err(ProtocolError::AmbiguousIdentity { .. })));
    }

    #[test]
    fn test_normalize_server_identity_needs_permission() {
        let msg = json!({"identity": "server", "method": "notify", "params": {}});
        let result = normalize(msg.clone(), &c1(), false);
        assert_eq!(result, Err(ProtocolError::InvalidIdentity("server".into())));

        let env = normalize(msg, &ClientId::server(), true).unwrap();
        assert!(env.identity.is_server());
    }

    #[test]
    fn test_normalize_server_origin_without_permission_is_invalid() {
        let result = normalize(
            json!({"method": "notify", "params": {}}),
            &ClientId::server(),
            false,
        );
        assert!(matches!(result, Err(ProtocolError::InvalidIdentity(_))));
    }

    // =====================================================================
    // Format checks
    // =====================================================================

    #[test]
    fn test_normalize_non_integer_sequence_is_invalid_format() {
        for seq in [json!("soon"), json!(1.5), json!([1])] {
            let result = normalize(
                json!({"method": "m", "params": {}, "sequence-id": seq}),
                &c1(),
                false,
            );
            assert!(
                matches!(result, Err(ProtocolError::InvalidFormat { key: "sequence-id", .. })),
                "got {result:?}"
            );
        }
    }

    #[test]
    fn test_normalize_sentinel_sequence_is_accepted() {
        let env = normalize(
            json!({"method": "m", "params": {}, "sequence-id": "none"}),
            &c1(),
            false,
        )
        .unwrap();
        assert_eq!(env.sequence_id, SequenceId::None);
    }

    #[test]
    fn test_normalize_missing_keys_are_all_reported() {
        let result = normalize(json!({"sequence-id": 1}), &c1(), false);
        assert_eq!(
            result,
            Err(ProtocolError::MandatoryKeyMissing(vec!["method", "params"]))
        );
    }

    #[test]
    fn test_normalize_missing_params_only() {
        let result = normalize(json!({"method": "m"}), &c1(), false);
        assert_eq!(result, Err(ProtocolError::MandatoryKeyMissing(vec!["params"])));
    }

    #[test]
    fn test_normalize_extra_key_is_disallowed() {
        let result = normalize(
            json!({"method": "m", "params": {}, "channel": "x"}),
            &c1(),
            false,
        );
        assert_eq!(result, Err(ProtocolError::DisallowedKey("channel".into())));
    }

    #[test]
    fn test_normalize_empty_method_is_invalid_format() {
        let result = normalize(json!({"method": "", "params": {}}), &c1(), false);
        assert!(matches!(
            result,
            Err(ProtocolError::InvalidFormat { key: "method", .. })
        ));
    }

    #[test]
    fn test_normalize_is_idempotent_on_its_output() {
        let env = normalize(
            json!({"method": "m", "params": {"a": 1}, "sequence-id": 4}),
            &c1(),
            false,
        )
        .unwrap();
        let again = normalize(serde_json::to_value(&env).unwrap(), &c1(), false).unwrap();
        assert_eq!(env, again);
    }
}
