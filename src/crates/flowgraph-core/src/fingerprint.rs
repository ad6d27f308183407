//! Content fingerprints for incremental execution
//!
//! ```text
//! fingerprint = SHA-256( scope ‖ node_id ‖ handler
//!                      ‖ canonical(resolved inputs)
//!                      ‖ upstream fingerprints ordered by upstream id
//!                      ‖ global seed )
//! ```
//!
//! Canonical JSON sorts object keys at every depth, so two structurally equal
//! input maps always hash the same regardless of insertion order. Every field
//! is length-prefixed before hashing, which keeps `("ab", "c")` and
//! `("a", "bc")` apart.
//!
//! The scope is the channel namespace of the run the node belongs to
//! (`root`, `root/review`, ...), so a node inside a sub-graph never shares a
//! fingerprint with a same-named node of its parent.
//!
//! Changing the seed invalidates every cached result at once.

use crate::graph::{Graph, NodeType};
use flowgraph_checkpoint::NodeOutputs;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Serialize a JSON value with object keys sorted at every depth
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Canonical form of a node's input map
pub fn canonical_inputs(inputs: &NodeOutputs) -> String {
    let object: serde_json::Map<String, Value> =
        inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    canonical_json(&Value::Object(object))
}

const ROOT_SCOPE: &str = "root";

/// Computes node fingerprints under a global seed
#[derive(Debug, Clone, Default)]
pub struct FingerprintCalculator {
    seed: String,
}

impl FingerprintCalculator {
    /// Create a calculator with the given global seed
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }

    /// Global seed
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Hex-encoded SHA-256 fingerprint of one node execution in the root scope
    pub fn compute(
        &self,
        node_id: &str,
        inputs: &NodeOutputs,
        upstream: &BTreeMap<String, String>,
    ) -> String {
        self.compute_scoped(ROOT_SCOPE, node_id, None, inputs, upstream)
    }

    /// Fingerprint of a node running under `scope` with the given handler
    pub fn compute_scoped(
        &self,
        scope: &str,
        node_id: &str,
        handler: Option<&str>,
        inputs: &NodeOutputs,
        upstream: &BTreeMap<String, String>,
    ) -> String {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, scope.as_bytes());
        update_field(&mut hasher, node_id.as_bytes());
        update_field(&mut hasher, handler.unwrap_or_default().as_bytes());
        update_field(&mut hasher, canonical_inputs(inputs).as_bytes());
        hasher.update((upstream.len() as u64).to_le_bytes());
        for (id, fingerprint) in upstream {
            update_field(&mut hasher, id.as_bytes());
            update_field(&mut hasher, fingerprint.as_bytes());
        }
        update_field(&mut hasher, self.seed.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fingerprints of `node_id`'s non-boundary predecessors, keyed by id.
    ///
    /// Predecessors without a known fingerprint are left out.
    pub fn upstream_of(
        graph: &Graph,
        node_id: &str,
        known: &HashMap<String, String>,
    ) -> BTreeMap<String, String> {
        graph
            .predecessors(node_id)
            .into_iter()
            .filter(|id| {
                graph
                    .node(id)
                    .map(|n| !matches!(n.node_type, NodeType::Start | NodeType::End))
                    .unwrap_or(false)
            })
            .filter_map(|id| known.get(&id).cloned().map(|fp| (id, fp)))
            .collect()
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
