//! Shared helpers for the integration tests

#![allow(dead_code)]

use flowgraph_core::{HandlerRegistry, NodeExecutionResult, NodeOutputs};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn outputs(pairs: &[(&str, Value)]) -> NodeOutputs {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Per-node call counters and the order in which nodes ran
#[derive(Clone, Default)]
pub struct CallLog {
    order: Arc<Mutex<Vec<String>>>,
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl CallLog {
    pub fn record(&self, node_id: &str) {
        self.order.lock().push(node_id.to_string());
        *self.counts.lock().entry(node_id.to_string()).or_insert(0) += 1;
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    pub fn count(&self, node_id: &str) -> usize {
        self.counts.lock().get(node_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.order.lock().len()
    }
}

/// Register `name` as a handler that records the call and passes its inputs
/// through, adding `<node_id>: true`
pub fn register_passthrough(handlers: &mut HandlerRegistry, name: &str, log: &CallLog) {
    let log = log.clone();
    handlers.register_fn(name, move |mut inputs, ctx| {
        let log = log.clone();
        async move {
            log.record(&ctx.node_id);
            inputs.insert(ctx.node_id.clone(), Value::Bool(true));
            NodeExecutionResult::from_outputs(inputs)
        }
    });
}

/// Tracks the highest number of handlers running at the same time
#[derive(Clone, Default)]
pub struct Concurrency {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Concurrency {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}
