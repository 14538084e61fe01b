//! Tool catalog — the closed registry of diagnostic capabilities.
//!
//! Tools are what let the orchestrator look at the world: search logs,
//! grep source, look up tickets, check pipeline status. Every handler
//! is read-only by contract; that precondition is what makes it safe to
//! run a model turn's tool requests concurrently with no rollback
//! logic.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema describing one tool, serialized verbatim for the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The unique tool name (e.g., "log_search", "ticket_lookup").
    pub name: String,

    /// Description of what the tool does (sent to the model).
    pub description: String,

    /// JSON Schema describing the tool's accepted parameters.
    pub input_schema: serde_json::Value,
}

/// A read-only capability supplied by a surrounding subsystem.
///
/// The catalog treats every handler as synchronous from its own
/// perspective even when it performs network I/O; failures are returned
/// as values, never panics.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError>;
}

struct Registered {
    spec: ToolSpec,
    handler: Box<dyn ToolHandler>,
}

/// The closed tool registry.
///
/// Populated once at process start, then held behind an `Arc` by the
/// orchestration loops. `describe()` returns the catalog in
/// registration order, so the schema presented to the model is
/// byte-identical across every turn of an exchange.
pub struct ToolCatalog {
    /// Registration order; describe() must be stable across turns.
    entries: Vec<Registered>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(
        &mut self,
        spec: ToolSpec,
        handler: Box<dyn ToolHandler>,
    ) -> std::result::Result<(), ToolError> {
        if self.index.contains_key(&spec.name) {
            return Err(ToolError::Duplicate(spec.name.clone()));
        }
        self.index.insert(spec.name.clone(), self.entries.len());
        self.entries.push(Registered { spec, handler });
        Ok(())
    }

    /// All tool schemas, in registration order.
    pub fn describe(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Returns `ToolError::Unknown` for unregistered names and passes
    /// handler failures through as `ToolError`. The orchestration loops
    /// convert every error into an error-payload result for the model —
    /// a failing tool never aborts an exchange.
    pub async fn dispatch(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let idx = self
            .index
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        self.entries[*idx].handler.execute(input).await
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn execute(
            &self,
            input: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            Ok(json!({ "echo": input["text"].as_str().unwrap_or("") }))
        }
    }

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: "Echoes back the input".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            }),
        }
    }

    #[test]
    fn register_and_describe() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo_spec("echo"), Box::new(EchoTool)).unwrap();
        let specs = catalog.describe();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo_spec("echo"), Box::new(EchoTool)).unwrap();
        let err = catalog
            .register(echo_spec("echo"), Box::new(EchoTool))
            .unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(_)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn describe_is_stable_in_registration_order() {
        let mut catalog = ToolCatalog::new();
        for name in ["zeta", "alpha", "mu"] {
            catalog.register(echo_spec(name), Box::new(EchoTool)).unwrap();
        }
        let first: Vec<String> = catalog.describe().into_iter().map(|s| s.name).collect();
        let second: Vec<String> = catalog.describe().into_iter().map(|s| s.name).collect();
        assert_eq!(first, vec!["zeta", "alpha", "mu"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn dispatch_executes_handler() {
        let mut catalog = ToolCatalog::new();
        catalog.register(echo_spec("echo"), Box::new(EchoTool)).unwrap();

        let out = catalog
            .dispatch("echo", json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out["echo"], "hello world");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool() {
        let catalog = ToolCatalog::new();
        let err = catalog.dispatch("nonexistent", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }
}
