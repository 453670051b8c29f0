//! JSON-Schema validation of messages
//!
//! A [`Validator`] aggregates three kinds of schemas:
//!
//! - the base schema, describing the envelope every message shares
//! - the error schema, describing replies that carry `data.errors`
//! - one schema per module, describing complete messages of that module
//!
//! The validator is immutable after construction and is shared by reference
//! across every task. Validation is pure.

use crate::{Error, Message, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Every schema known to a validator, as served on the MQTT `jsonschemas` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaBundle {
    pub base: Value,
    pub error: Value,
    pub modules: BTreeMap<String, Value>,
}

/// Envelope shared by all messages
pub fn base_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "module": {"type": "string", "pattern": "^[a-z][a-z0-9_]*$"},
            "kind": {"enum": ["request", "reply", "notification"]},
            "action": {"type": "string", "pattern": "^[a-z][a-z0-9_]*$"},
            "data": {"type": "object"}
        },
        "required": ["module", "kind", "action"],
        "additionalProperties": false
    })
}

/// Replies produced when a request cannot be served
pub fn error_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "kind": {"const": "reply"},
            "data": {
                "type": "object",
                "properties": {
                    "errors": {
                        "type": "array",
                        "items": {"type": "string"},
                        "minItems": 1
                    }
                },
                "required": ["errors"],
                "additionalProperties": false
            }
        },
        "required": ["kind", "data"]
    })
}

fn compile(name: &str, schema: &Value) -> Result<jsonschema::Validator> {
    jsonschema::options()
        .build(schema)
        .map_err(|e| Error::InvalidSchema {
            name: name.to_string(),
            message: e.to_string(),
        })
}

fn collect_errors(validator: &jsonschema::Validator, instance: &Value) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Message validator
pub struct Validator {
    base: jsonschema::Validator,
    error: jsonschema::Validator,
    modules: BTreeMap<String, jsonschema::Validator>,
    bundle: SchemaBundle,
}

impl Validator {
    /// Build a validator from per-module schemas, using the built-in base and
    /// error schemas.
    pub fn new<I, S>(modules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self::with_schemas(base_schema(), error_schema(), modules)
    }

    pub fn with_schemas<I, S>(base: Value, error: Value, modules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let compiled_base = compile("base", &base)?;
        let compiled_error = compile("error", &error)?;

        let mut compiled_modules = BTreeMap::new();
        let mut module_schemas = BTreeMap::new();
        for (name, schema) in modules {
            let name = name.into();
            compiled_modules.insert(name.clone(), compile(&name, &schema)?);
            module_schemas.insert(name, schema);
        }

        Ok(Self {
            base: compiled_base,
            error: compiled_error,
            modules: compiled_modules,
            bundle: SchemaBundle {
                base,
                error,
                modules: module_schemas,
            },
        })
    }

    /// Validate a raw message.
    ///
    /// The base shape is always checked. Replies carrying `data.errors` are
    /// checked against the error schema, everything else against the schema
    /// of its module when that module is known.
    pub fn validate(&self, message: &Value) -> Result<()> {
        if let Some(errors) = collect_errors(&self.base, message) {
            return Err(Error::ValidationFailed(errors));
        }

        let is_error_reply = message.get("kind").and_then(Value::as_str) == Some("reply")
            && message
                .get("data")
                .and_then(|data| data.get("errors"))
                .is_some();

        if is_error_reply {
            if let Some(errors) = collect_errors(&self.error, message) {
                return Err(Error::ValidationFailed(errors));
            }
            return Ok(());
        }

        let module = message
            .get("module")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Some(schema) = self.modules.get(module) {
            if let Some(errors) = collect_errors(schema, message) {
                return Err(Error::ValidationFailed(format!("{}: {}", module, errors)));
            }
        }

        Ok(())
    }

    pub fn validate_message(&self, message: &Message) -> Result<()> {
        self.validate(&message.to_value())
    }

    pub fn is_valid(&self, message: &Value) -> bool {
        self.validate(message).is_ok()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn schema_bundle(&self) -> &SchemaBundle {
        &self.bundle
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("modules", &self.bundle.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_schema() -> Value {
        json!({
            "oneOf": [
                {
                    "properties": {
                        "module": {"const": "echo"},
                        "kind": {"const": "request"},
                        "action": {"const": "echo"},
                        "data": {"$ref": "#/definitions/payload"}
                    },
                    "required": ["data"]
                },
                {
                    "properties": {
                        "module": {"const": "echo"},
                        "kind": {"const": "reply"},
                        "action": {"const": "echo"},
                        "data": {"$ref": "#/definitions/payload"}
                    },
                    "required": ["data"]
                }
            ],
            "definitions": {
                "payload": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                    "additionalProperties": false
                }
            }
        })
    }

    fn validator() -> Validator {
        Validator::new([("echo", echo_schema())]).unwrap()
    }

    #[test]
    fn test_base_shape() {
        let v = validator();
        assert!(v.is_valid(&json!({"module": "echo", "kind": "request", "action": "echo", "data": {"text": "x"}})));
        assert!(!v.is_valid(&json!({"module": "echo", "kind": "request"})));
        assert!(!v.is_valid(&json!({"module": "echo", "kind": "ask", "action": "echo"})));
        assert!(!v.is_valid(&json!({"module": "Echo", "kind": "request", "action": "echo"})));
        assert!(!v.is_valid(&json!({"module": "echo", "kind": "request", "action": "echo", "extra": 1})));
        assert!(!v.is_valid(&json!([1, 2, 3])));
    }

    #[test]
    fn test_module_schema() {
        let v = validator();
        let bad = json!({"module": "echo", "kind": "request", "action": "echo", "data": {"text": 5}});
        match v.validate(&bad) {
            Err(Error::ValidationFailed(msg)) => assert!(msg.starts_with("echo:")),
            other => panic!("expected validation failure, got {:?}", other),
        }
        let missing = json!({"module": "echo", "kind": "request", "action": "shout"});
        assert!(!v.is_valid(&missing));
    }

    #[test]
    fn test_unknown_module_checks_only_base() {
        let v = validator();
        assert!(v.is_valid(&json!({"module": "nosuch", "kind": "request", "action": "foo"})));
        assert!(!v.has_module("nosuch"));
    }

    #[test]
    fn test_error_reply() {
        let v = validator();
        assert!(v.is_valid(&json!({"module": "echo", "kind": "reply", "action": "echo", "data": {"errors": ["boom"]}})));
        assert!(!v.is_valid(&json!({"module": "echo", "kind": "reply", "action": "echo", "data": {"errors": []}})));
        assert!(!v.is_valid(&json!({"module": "echo", "kind": "reply", "action": "echo", "data": {"errors": ["a"], "x": 1}})));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let result = Validator::new([("broken", json!({"type": "nonsense"}))]);
        assert!(matches!(result, Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_bundle() {
        let v = validator();
        let bundle = v.schema_bundle();
        assert_eq!(bundle.modules.len(), 1);
        assert_eq!(bundle.base, base_schema());
        assert_eq!(v.module_names().collect::<Vec<_>>(), vec!["echo"]);
    }
}
