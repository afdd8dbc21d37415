// Handler abstraction for worker processes
//
// A handler is the code that executes a node, identified by the string in the
// node's definition. Workers hold a registry of the built-in handlers known
// at startup and look tasks up by name.
//
// Handlers must be effectively idempotent: workers dedupe by task id, but a
// handler may still run twice across a crash/resurrection boundary.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::message::TaskMessage;

/// The single-method capability a worker dispatches tasks through
#[async_trait]
pub trait Handler: Send + Sync {
    /// Registry name for this handler
    fn name(&self) -> &str;

    /// Execute the task and return its output object
    async fn process(&self, task: &TaskMessage) -> Result<Value>;
}

/// Registry mapping handler names to implementations
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            registry: Self::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Fluent builder for a handler registry
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.registry.register(Arc::new(handler));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct UpperHandler;

    #[async_trait]
    impl Handler for UpperHandler {
        fn name(&self) -> &str {
            "upper"
        }

        async fn process(&self, task: &TaskMessage) -> Result<Value> {
            let text = task.config["text"].as_str().unwrap_or_default();
            Ok(json!({ "text": text.to_uppercase() }))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_and_dispatch() {
        let registry = HandlerRegistry::builder().handler(UpperHandler).build();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());

        let task = TaskMessage::new("e", "n", "upper", json!({"text": "hi"}));
        let handler = registry.get("upper").unwrap();
        let output = handler.process(&task).await.unwrap();
        assert_eq!(output, json!({"text": "HI"}));
    }
}
