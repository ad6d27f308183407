//! Node handlers and the handler registry
//!
//! Handler and Router nodes name the work they run through `handler_name`.
//! Names are resolved at run start against a [`HandlerRegistry`] populated by
//! the application, so a graph can be built before its handlers exist and a
//! missing name is reported as a configuration error before anything runs.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::{HandlerRegistry, NodeExecutionResult};
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("double", |inputs, _ctx| async move {
//!     let x = inputs.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
//!     NodeExecutionResult::success([("x".to_string(), json!(x * 2))])
//! });
//!
//! assert!(registry.contains("double"));
//! assert!(registry.resolve("missing").is_err());
//! ```

use crate::error::{GraphError, Result};
use crate::node_result::NodeExecutionResult;
use async_trait::async_trait;
use flowgraph_checkpoint::{ChannelSet, NodeOutputs};
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opaque dependency provider handed to handlers and sub-graphs
pub type Services = Arc<dyn Any + Send + Sync>;

/// Everything a handler gets besides its inputs
#[derive(Clone)]
pub struct NodeContext {
    /// Execution id of the (possibly nested) run
    pub execution_id: String,
    /// Id of the node being executed
    pub node_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Fires on run cancellation or node timeout
    pub cancellation: CancellationToken,
    /// Isolated channel scope of this task
    pub channels: ChannelSet,
    /// Application services, if any were configured
    pub services: Option<Services>,
}

impl NodeContext {
    /// Context with a fresh token and an empty channel scope
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            attempt: 1,
            cancellation: CancellationToken::new(),
            channels: ChannelSet::new(),
            services: None,
        }
    }

    /// Whether the handler should stop
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Downcast the services to a concrete type
    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.as_ref().and_then(|s| s.downcast_ref::<T>())
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_services", &self.services.is_some())
            .finish()
    }
}

/// Work executed by a Handler or Router node
///
/// Failures, suspension and cancellation are reported through the returned
/// [`NodeExecutionResult`]. Long-running handlers should watch
/// `ctx.cancellation`; the orchestrator also drops the future when the token
/// fires.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, inputs: NodeOutputs, ctx: NodeContext) -> NodeExecutionResult;
}

/// Boxed async handler function
pub type HandlerFn = Arc<dyn Fn(NodeOutputs, NodeContext) -> BoxFuture<'static, NodeExecutionResult> + Send + Sync>;

struct FnHandler {
    f: HandlerFn,
}

#[async_trait]
impl NodeHandler for FnHandler {
    async fn execute(&self, inputs: NodeOutputs, ctx: NodeContext) -> NodeExecutionResult {
        (self.f)(inputs, ctx).await
    }
}

/// Produces a handler instance on resolution
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn NodeHandler> + Send + Sync>;

/// Name -> handler factory map, populated at startup
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; each resolution calls it
    pub fn register_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn NodeHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a shared handler instance
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.register_factory(name, move || Arc::clone(&handler));
    }

    /// Register an async closure
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(NodeOutputs, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeExecutionResult> + Send + 'static,
    {
        let f: HandlerFn = Arc::new(
            move |inputs: NodeOutputs, ctx: NodeContext| -> BoxFuture<'static, NodeExecutionResult> {
                Box::pin(f(inputs, ctx))
            },
        );
        self.register(name, Arc::new(FnHandler { f }));
    }

    /// Whether a handler is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted handler names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a handler; unknown names are a configuration error
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn NodeHandler>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                GraphError::Configuration(format!(
                    "handler '{}' is not registered (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl NodeHandler for Echo {
        async fn execute(&self, inputs: NodeOutputs, _ctx: NodeContext) -> NodeExecutionResult {
            NodeExecutionResult::from_outputs(inputs)
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", Arc::new(Echo));
        registry.register_fn("const", |_inputs, ctx| async move {
            NodeExecutionResult::success([("node".to_string(), json!(ctx.node_id))])
        });

        let inputs: NodeOutputs = [("a".to_string(), json!(1))].into_iter().collect();
        let echoed = registry
            .resolve("echo")
            .unwrap()
            .execute(inputs.clone(), NodeContext::new("run", "n1"))
            .await;
        assert_eq!(echoed.outputs(), Some(&inputs));

        let constant = registry
            .resolve("const")
            .unwrap()
            .execute(NodeOutputs::new(), NodeContext::new("run", "n2"))
            .await;
        assert_eq!(constant.outputs().unwrap()["node"], json!("n2"));
        assert_eq!(registry.names(), vec!["const", "echo"]);
    }

    #[test]
    fn test_missing_handler_is_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve("nope").err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_factory_called_per_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = HandlerRegistry::new();
        registry.register_factory("echo", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(Echo) as Arc<dyn NodeHandler>
        });
        registry.resolve("echo").unwrap();
        registry.resolve("echo").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_services_downcast() {
        let mut ctx = NodeContext::new("run", "n");
        ctx.services = Some(Arc::new(String::from("db-pool")));
        assert_eq!(ctx.service::<String>().map(String::as_str), Some("db-pool"));
        assert!(ctx.service::<u32>().is_none());
    }
}
