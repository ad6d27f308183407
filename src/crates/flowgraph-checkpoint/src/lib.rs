//! # flowgraph-checkpoint - State and Persistence for Graph Execution
//!
//! **Typed channels, namespaced state scopes and checkpoint stores** used by
//! the `flowgraph-core` orchestrator to share state between nodes and to
//! resume runs after a crash or a human-in-the-loop pause.
//!
//! ## Core Concepts
//!
//! ### 1. Channels
//!
//! A [`Channel`] is one named piece of mutable state with a fixed update
//! discipline ([`UpdateSemantics`]):
//!
//! - [`LastValueChannel`] - `set` overwrites; `update` is rejected
//! - [`AppendChannel`] - `set` seeds a one-element list; `update` appends
//! - [`ReducerChannel`] - only `update`, folded through a reduce function
//! - [`BarrierChannel`] - readable once `required_count` values arrived
//! - [`EphemeralChannel`] - single transient value, cleared every step
//!
//! Every write increments the channel's version.
//!
//! ### 2. Channel Sets
//!
//! A [`ChannelSet`] is a namespaced, lock-protected map of channels. Parallel
//! tasks each receive a [`ChannelSet::fork`]; the orchestrator folds the forks
//! back with [`ChannelSet::merge`], honouring each channel's semantics.
//!
//! ### 3. Checkpoints
//!
//! A [`GraphCheckpoint`] records completed nodes, their outputs and
//! fingerprints, channel snapshots and any pending [`SuspendState`].
//! [`CheckpointStore`] abstracts persistence; this crate ships
//! [`InMemoryCheckpointStore`] and [`FileCheckpointStore`].
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgraph_checkpoint::{ChannelSet, UpdateSemantics};
//! use serde_json::json;
//!
//! let state = ChannelSet::new();
//! state.declare("log", UpdateSemantics::Append).unwrap();
//!
//! let fork = state.fork();
//! fork.update("log", json!(["from task"])).unwrap();
//! state.merge(&fork).unwrap();
//!
//! assert_eq!(state.get("log").unwrap(), json!(["from task"]));
//! ```
//!
//! ```rust,no_run
//! use flowgraph_checkpoint::{CheckpointStore, GraphCheckpoint, InMemoryCheckpointStore};
//!
//! # async fn demo() -> flowgraph_checkpoint::Result<()> {
//! let store = InMemoryCheckpointStore::new();
//! store.save(GraphCheckpoint::new("run-1").with_sequence(0)).await?;
//! let latest = store.load_latest("run-1").await?;
//! assert!(latest.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`channels`] - [`Channel`] trait, last-value / append / reducer channels
//! - [`channels_ext`] - barrier and ephemeral channels
//! - [`channel_set`] - [`ChannelSet`] state scopes
//! - [`checkpoint`] - [`GraphCheckpoint`], [`SuspendState`], [`CheckpointSummary`]
//! - [`traits`] - [`CheckpointStore`], [`RetentionPolicy`]
//! - [`memory`] / [`file`] - store implementations
//! - [`error`] - [`CheckpointError`]

pub mod channel_set;
pub mod channels;
pub mod channels_ext;
pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use channel_set::{ChannelSet, INPUT_PREFIX, OUTPUT_PREFIX, ROOT_NAMESPACE};
pub use channels::{
    AppendChannel, Channel, ChannelSnapshot, LastValueChannel, ReduceFn, ReducerChannel,
    UpdateSemantics,
};
pub use channels_ext::{BarrierChannel, EphemeralChannel};
pub use checkpoint::{
    CheckpointId, CheckpointSummary, GraphCheckpoint, NodeOutputs, SuspendState,
    CHECKPOINT_SCHEMA_VERSION,
};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use traits::{CheckpointStore, RetentionPolicy};
