//! Checkpoint recovery, cross-instance resume and artifact lineage

mod common;

use common::{init_tracing, outputs, register_passthrough, CallLog};
use flowgraph_core::config::{CheckpointFrequency, OrchestratorConfig};
use flowgraph_core::{
    ArtifactKey, ArtifactRegistry, CheckpointStore, FileCheckpointStore, Graph, GraphBuilder,
    GraphError, HandlerRegistry, InMemoryArtifactRegistry, InMemoryCheckpointStore, Node,
    NodeExecutionResult, Orchestrator, RunStatus, END, START,
};
use serde_json::json;
use std::sync::Arc;

fn pipeline() -> Graph {
    GraphBuilder::new()
        .add_node(Node::handler("A", "step"))
        .add_node(Node::handler("B", "step"))
        .add_node(Node::handler("C", "finish"))
        .chain(&[START, "A", "B", "C", END])
        .build()
}

/// Registry whose `finish` handler fails permanently or passes through
fn registry(log: &CallLog, finish_fails: bool) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    register_passthrough(&mut handlers, "step", log);
    if finish_fails {
        handlers.register_fn("finish", |_inputs, _ctx| async move {
            NodeExecutionResult::failure("disk full")
        });
    } else {
        register_passthrough(&mut handlers, "finish", log);
    }
    handlers
}

async fn crash_then_recover(store: Arc<dyn CheckpointStore>) {
    let first_log = CallLog::default();
    let crashed = Orchestrator::new(registry(&first_log, true))
        .with_checkpoint_store(Arc::clone(&store))
        .execute(pipeline(), outputs(&[("job", json!("nightly"))]))
        .await
        .unwrap();

    assert_eq!(crashed.status, RunStatus::Failed);
    assert_eq!(first_log.order(), vec!["A", "B"]);

    let latest = store.load_latest(&crashed.execution_id).await.unwrap().unwrap();
    assert_eq!(latest.completed_nodes.len(), 2);
    assert!(!latest.is_suspended());

    // A new process: fresh orchestrator, same store
    let second_log = CallLog::default();
    let recovered = Orchestrator::new(registry(&second_log, false))
        .with_checkpoint_store(Arc::clone(&store))
        .recover(pipeline(), &crashed.execution_id)
        .await
        .unwrap();

    assert_eq!(recovered.status, RunStatus::Completed);
    assert_eq!(recovered.execution_id, crashed.execution_id);
    assert_eq!(second_log.order(), vec!["C"]);
    assert_eq!(recovered.outputs["job"], json!("nightly"));
    assert_eq!(recovered.outputs["A"], json!(true));
    assert_eq!(recovered.outputs["C"], json!(true));

    let summaries = store.list_checkpoints(&crashed.execution_id).await.unwrap();
    assert_eq!(summaries.len(), 4);
    let newest = store.load_latest(&crashed.execution_id).await.unwrap().unwrap();
    assert_eq!(newest.sequence, 3);
    assert_eq!(newest.completed_nodes.len(), 3);
}

#[tokio::test]
async fn test_recover_from_memory_checkpoint() {
    init_tracing();
    crash_then_recover(Arc::new(InMemoryCheckpointStore::new())).await;
}

#[tokio::test]
async fn test_recover_from_file_checkpoint() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    crash_then_recover(Arc::new(FileCheckpointStore::new(dir.path()))).await;

    // One JSON file per checkpoint under the execution's directory
    let mut files = 0;
    for execution in std::fs::read_dir(dir.path())? {
        files += std::fs::read_dir(execution?.path())?.count();
    }
    assert_eq!(files, 4);
    Ok(())
}

#[tokio::test]
async fn test_recover_unknown_execution_fails() {
    let orchestrator = Orchestrator::new(registry(&CallLog::default(), false))
        .with_checkpoint_store(Arc::new(InMemoryCheckpointStore::new()));
    let err = orchestrator.recover(pipeline(), "missing").await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidResume(_)));

    let no_store = Orchestrator::new(registry(&CallLog::default(), false));
    assert!(no_store.recover(pipeline(), "missing").await.unwrap_err().is_configuration());
}

fn approval_graph() -> Graph {
    GraphBuilder::new()
        .add_node(Node::handler("prepare", "step"))
        .add_node(Node::handler("approve", "approval"))
        .add_node(Node::handler("ship", "step"))
        .chain(&[START, "prepare", "approve", "ship", END])
        .build()
}

fn approval_registry(log: &CallLog) -> HandlerRegistry {
    let mut handlers = registry(log, false);
    handlers.register_fn("approval", |_inputs, _ctx| async move {
        NodeExecutionResult::suspended("ticket-7").with_partial(json!({"reviewer": "ops"}))
    });
    handlers
}

#[tokio::test]
async fn test_resume_from_store_in_new_instance() {
    init_tracing();
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let config = OrchestratorConfig {
        checkpoint_frequency: CheckpointFrequency::OnSuspend,
        ..Default::default()
    };

    let first_log = CallLog::default();
    let suspended = Orchestrator::new(approval_registry(&first_log))
        .with_config(config.clone())
        .unwrap()
        .with_checkpoint_store(Arc::clone(&store))
        .execute(approval_graph(), Default::default())
        .await
        .unwrap();
    assert_eq!(suspended.status, RunStatus::Suspended);
    assert_eq!(
        suspended.suspension.as_ref().unwrap().resume_value,
        Some(json!({"reviewer": "ops"}))
    );

    let summaries = store.list_checkpoints(&suspended.execution_id).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].suspended);

    let second_log = CallLog::default();
    let orchestrator = Orchestrator::new(approval_registry(&second_log))
        .with_config(config)
        .unwrap()
        .with_checkpoint_store(Arc::clone(&store));

    // Crash recovery refuses a suspended run
    let err = orchestrator
        .recover(approval_graph(), &suspended.execution_id)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidResume(_)));

    let err = orchestrator
        .resume_with_graph(approval_graph(), &suspended.execution_id, "ticket-8", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidResume(_)));

    let resumed = orchestrator
        .resume_with_graph(
            approval_graph(),
            &suspended.execution_id,
            "ticket-7",
            json!({"approved_by": "alice"}),
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(second_log.order(), vec!["ship"]);
    assert_eq!(resumed.outputs["approved_by"], json!("alice"));
    assert_eq!(resumed.outputs["ship"], json!(true));
}

#[tokio::test]
async fn test_resume_inside_sub_graph_from_store() {
    init_tracing();
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let graph = || {
        let inner = GraphBuilder::new()
            .add_node(Node::handler("approve", "approval"))
            .add_node(Node::handler("ship", "step"))
            .chain(&[START, "approve", "ship", END])
            .build();
        GraphBuilder::new()
            .add_node(Node::handler("prepare", "step"))
            .add_node(Node::sub_graph("release", inner))
            .chain(&[START, "prepare", "release", END])
            .build()
    };

    let first_log = CallLog::default();
    let suspended = Orchestrator::new(approval_registry(&first_log))
        .with_checkpoint_store(Arc::clone(&store))
        .execute(graph(), Default::default())
        .await
        .unwrap();
    assert_eq!(suspended.status, RunStatus::Suspended);

    let latest = store.load_latest(&suspended.execution_id).await.unwrap().unwrap();
    let suspension = latest.suspension.unwrap();
    assert_eq!(suspension.path(), vec!["release", "approve"]);
    assert!(suspension.nested.unwrap().completed_nodes.is_empty());

    let second_log = CallLog::default();
    let resumed = Orchestrator::new(approval_registry(&second_log))
        .with_checkpoint_store(Arc::clone(&store))
        .resume_with_graph(graph(), &suspended.execution_id, "ticket-7", json!({"approved_by": "alice"}))
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(second_log.order(), vec!["ship"]);
    assert_eq!(resumed.outputs["approved_by"], json!("alice"));
    assert_eq!(resumed.outputs["ship"], json!(true));
}

#[tokio::test]
async fn test_checkpoints_record_skipped_nodes() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = || {
        GraphBuilder::new()
            .add_node(Node::handler("A", "step"))
            .add_node(Node::handler("B", "finish"))
            .add_node(Node::handler("C", "step"))
            .chain(&[START, "A", "B", "C", END])
            .build()
    };

    let failed = Orchestrator::new(registry(&CallLog::default(), true))
        .with_checkpoint_store(store.clone())
        .execute(graph(), Default::default())
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);

    let latest = store.load_latest(&failed.execution_id).await.unwrap().unwrap();
    assert!(latest.skipped_nodes.contains("C"));
    assert!(!latest.completed_nodes.contains("C"));

    let log = CallLog::default();
    let recovered = Orchestrator::new(registry(&log, false))
        .with_checkpoint_store(store.clone())
        .recover(graph(), &failed.execution_id)
        .await
        .unwrap();
    assert_eq!(recovered.status, RunStatus::Completed);
    assert_eq!(log.order(), vec!["B", "C"]);

    let newest = store.load_latest(&failed.execution_id).await.unwrap().unwrap();
    assert!(newest.skipped_nodes.is_empty());
}

#[tokio::test]
async fn test_never_frequency_writes_no_checkpoints() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = OrchestratorConfig {
        checkpoint_frequency: CheckpointFrequency::Never,
        ..Default::default()
    };
    let outcome = Orchestrator::new(registry(&CallLog::default(), false))
        .with_config(config)
        .unwrap()
        .with_checkpoint_store(store.clone())
        .execute(pipeline(), Default::default())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(store.checkpoint_count().await, 0);
}

#[tokio::test]
async fn test_write_behind_still_persists() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = OrchestratorConfig {
        write_behind: true,
        ..Default::default()
    };
    let outcome = Orchestrator::new(registry(&CallLog::default(), false))
        .with_config(config)
        .unwrap()
        .with_checkpoint_store(store.clone())
        .execute(pipeline(), Default::default())
        .await
        .unwrap();
    assert!(outcome.is_completed());

    let mut saved = 0;
    for _ in 0..50 {
        saved = store.list_checkpoints(&outcome.execution_id).await.unwrap().len();
        if saved == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(saved, 3);
}

#[tokio::test]
async fn test_artifact_versions_and_lineage() {
    init_tracing();
    let registry_store = Arc::new(InMemoryArtifactRegistry::new());
    let raw = ArtifactKey::new("raw/events");
    let report = ArtifactKey::partitioned("reports/daily", "2024-01-01");

    let graph = GraphBuilder::new()
        .add_node(Node::handler("ingest", "step").produces(raw.clone()))
        .add_node(
            Node::handler("summarize", "step")
                .requires(raw.clone())
                .produces(report.clone()),
        )
        .chain(&[START, "ingest", "summarize", END])
        .build();

    let orchestrator = Orchestrator::new(registry(&CallLog::default(), false))
        .with_artifact_registry(registry_store.clone());
    let outcome = orchestrator.execute(graph.clone(), Default::default()).await.unwrap();
    assert!(outcome.is_completed());

    let raw_version = registry_store.latest_version(&raw).await.unwrap().unwrap();
    assert_eq!(&raw_version, &outcome.snapshot.node_fingerprints["ingest"]);

    let report_version = registry_store.latest_version(&report).await.unwrap().unwrap();
    let lineage = registry_store.get_lineage(&report, &report_version).await.unwrap();
    assert_eq!(lineage.get(&raw), Some(&raw_version));

    let metadata = registry_store
        .get_metadata(&report, &report_version)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.produced_by_node_id, "summarize");
    assert_eq!(metadata.execution_id, outcome.execution_id);
    assert_eq!(
        registry_store.get_producing_node_ids(&report).await.unwrap(),
        vec!["summarize"]
    );

    // Identical rerun produces identical versions; nothing new is registered
    orchestrator.execute(graph, Default::default()).await.unwrap();
    assert_eq!(registry_store.version_count().await, 2);
}
