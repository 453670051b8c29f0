//! Router tests
//!
//! Dispatch through the full validate → resolve → handle → validate path
//! using an in-test module, plus external executable modules.

use async_trait::async_trait;
use foris_core::{Backend, MessageKind, Notifier};
use foris_router::{
    HandlerError, HandlerResult, Module, ModuleContext, ModuleLoader, ModuleProvider, Result,
    Router, ERR_INCORRECT_INPUT, ERR_WRONG_KIND,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn echo_schema() -> Value {
    json!({
        "definitions": {
            "text": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
                "additionalProperties": false
            }
        },
        "oneOf": [
            {
                "properties": {
                    "kind": {"const": "request"},
                    "action": {"const": "echo"},
                    "data": {"$ref": "#/definitions/text"}
                },
                "required": ["data"]
            },
            {
                "properties": {
                    "kind": {"const": "reply"},
                    "action": {"enum": ["echo", "bad_reply"]},
                    "data": {"$ref": "#/definitions/text"}
                },
                "required": ["data"]
            },
            {
                "properties": {
                    "kind": {"const": "request"},
                    "action": {"enum": ["boom", "bad_reply"]}
                },
                "not": {"required": ["data"]}
            },
            {
                "properties": {
                    "kind": {"const": "notification"},
                    "action": {"const": "echoed"},
                    "data": {"$ref": "#/definitions/text"}
                },
                "required": ["data"]
            }
        ]
    })
}

struct EchoModule {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for EchoModule {
    async fn handle(&self, action: &str, data: Option<Value>) -> HandlerResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match action {
            "echo" => Ok(data),
            "bad_reply" => Ok(Some(json!({"number": 1}))),
            "boom" => Err(HandlerError::Backend("uci is gone".into())),
            other => Err(HandlerError::UnknownAction(other.into())),
        }
    }
}

struct EchoProvider {
    calls: Arc<AtomicUsize>,
}

impl ModuleProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        "0.1"
    }

    fn actions(&self) -> Vec<String> {
        vec!["echo".into(), "boom".into(), "bad_reply".into()]
    }

    fn schema(&self) -> Result<Value> {
        Ok(echo_schema())
    }

    fn instantiate(&self, _ctx: &ModuleContext) -> Result<Arc<dyn Module>> {
        Ok(Arc::new(EchoModule {
            calls: self.calls.clone(),
        }))
    }
}

fn router() -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut loader = ModuleLoader::new();
    loader.register(Arc::new(EchoProvider {
        calls: calls.clone(),
    }));
    let validator = Arc::new(loader.build_validator().unwrap());
    let ctx = ModuleContext::new(Backend::Mock, Notifier::null());
    let registry = Arc::new(loader.instantiate(&ctx, None).unwrap());
    (Router::new(registry, validator), calls)
}

#[tokio::test]
async fn test_request_reply_mirrors_request() {
    let (router, calls) = router();
    let reply = router
        .process(&json!({"module": "echo", "kind": "request", "action": "echo", "data": {"text": "hi"}}))
        .await;

    assert_eq!(reply.kind, MessageKind::Reply);
    assert_eq!(reply.module, "echo");
    assert_eq!(reply.action, "echo");
    assert_eq!(reply.data, Some(json!({"text": "hi"})));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_input_has_no_side_effect() {
    let (router, calls) = router();
    let reply = router
        .process(&json!({"module": "echo", "kind": "request", "action": "echo", "data": {"text": 5}}))
        .await;

    assert_eq!(reply.errors(), Some(vec![ERR_INCORRECT_INPUT]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_message() {
    let (router, _) = router();

    let reply = router.process(&json!("not an object")).await;
    assert_eq!(reply.module, "");
    assert_eq!(reply.errors(), Some(vec![ERR_INCORRECT_INPUT]));

    let reply = router
        .process(&json!({"module": "echo", "kind": "request", "action": "echo", "extra": 1}))
        .await;
    assert_eq!(reply.errors(), Some(vec![ERR_INCORRECT_INPUT]));
}

#[tokio::test]
async fn test_wrong_kind_not_dispatched() {
    let (router, calls) = router();

    for message in [
        json!({"module": "echo", "kind": "notification", "action": "echoed", "data": {"text": "x"}}),
        json!({"module": "echo", "kind": "reply", "action": "echo", "data": {"text": "x"}}),
    ] {
        let reply = router.process(&message).await;
        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.errors(), Some(vec![ERR_WRONG_KIND]));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_module() {
    let (router, _) = router();
    let reply = router
        .process(&json!({"module": "nosuch", "kind": "request", "action": "foo"}))
        .await;

    let errors = reply.errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("nosuch"));
    assert_eq!(reply.module, "nosuch");
    assert_eq!(reply.action, "foo");
}

#[tokio::test]
async fn test_handler_error_names_kind() {
    let (router, _) = router();
    let reply = router
        .process(&json!({"module": "echo", "kind": "request", "action": "boom"}))
        .await;

    let errors = reply.errors().unwrap();
    assert_eq!(errors[0], "Internal error BackendError('uci is gone')");
}

#[tokio::test]
async fn test_invalid_output_embeds_reply() {
    let (router, _) = router();
    let reply = router
        .process(&json!({"module": "echo", "kind": "request", "action": "bad_reply"}))
        .await;

    let errors = reply.errors().unwrap();
    assert!(errors[0].starts_with("Incorrect output "));
    assert!(errors[0].contains("\"number\":1"));
}

#[cfg(unix)]
mod external {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const HANDLER: &str = "#!/bin/sh\n\
        if [ \"$1\" = fail ]; then echo \"broken\" >&2; exit 3; fi\n\
        cat\n";

    fn write_module(root: &Path, name: &str, with_schema: bool) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("module.toml"),
            format!("name = \"{}\"\nversion = \"1.2\"\nactions = [\"get\", \"fail\"]\n", name),
        )
        .unwrap();
        if with_schema {
            std::fs::write(dir.join("schema.json"), "{}").unwrap();
        }
        let handler = dir.join("handler");
        std::fs::write(&handler, HANDLER).unwrap();
        std::fs::set_permissions(&handler, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn external_router(root: &Path) -> Router {
        let mut loader = ModuleLoader::new();
        assert_eq!(loader.load_extra_path(root).unwrap(), 1);
        let validator = Arc::new(loader.build_validator().unwrap());
        let ctx = ModuleContext::new(Backend::Mock, Notifier::null());
        let registry = Arc::new(loader.instantiate(&ctx, None).unwrap());
        Router::new(registry, validator)
    }

    #[tokio::test]
    async fn test_external_module_round_trip() {
        let root = tempfile::tempdir().unwrap();
        write_module(root.path(), "sample", true);
        let router = external_router(root.path());

        let (name, descriptor) = router.registry().list_modules(None)[0];
        assert_eq!(name, "sample");
        assert_eq!(descriptor.version, "1.2");

        let reply = router
            .process(&json!({"module": "sample", "kind": "request", "action": "get", "data": {"x": 1}}))
            .await;
        assert_eq!(reply.data, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_external_module_failure() {
        let root = tempfile::tempdir().unwrap();
        write_module(root.path(), "sample", true);
        let router = external_router(root.path());

        let reply = router
            .process(&json!({"module": "sample", "kind": "request", "action": "fail"}))
            .await;
        let errors = reply.errors().unwrap();
        assert!(errors[0].starts_with("Internal error CommandError("));
        assert!(errors[0].contains("broken"));
    }

    #[tokio::test]
    async fn test_external_module_without_schema() {
        let root = tempfile::tempdir().unwrap();
        write_module(root.path(), "sample", false);

        let mut loader = ModuleLoader::new();
        assert!(loader.load_extra_path(root.path()).is_err());
    }
}
