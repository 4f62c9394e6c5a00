//! End-to-end orchestrator scenarios over the in-memory stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conflux_component::{Component, ComponentError, ComponentRegistry};
use conflux_coordinator::ExecutionCoordinator;
use conflux_core::{ExecutionId, ExecutionStatus, NodeId, NodeRunStatus, TaskId, UserId, WorkflowId};
use conflux_engine::{Orchestrator, RetryPolicy, WorkerPool};
use conflux_state::{Message, NodeResult, TokenUsage, WorkflowState};
use conflux_store::{
    BudgetLimits, ExecutionRecord, ExecutionRepo, Job, JobQueue, KvStore, MemoryKv, MemoryQueue,
    MemoryRepo, PendingTask, WorkflowRecord,
};
use conflux_topology::{EdgeLabel, EdgeRecord, NodeRecord, WorkflowGraph};
use serde_json::{json, Value};

struct Harness {
    repo: Arc<MemoryRepo>,
    kv: Arc<MemoryKv>,
    queue: Arc<MemoryQueue>,
    orchestrator: Arc<Orchestrator>,
    pool: WorkerPool,
}

fn harness() -> Harness {
    let repo = Arc::new(MemoryRepo::new());
    let kv = Arc::new(MemoryKv::new());
    let queue = Arc::new(MemoryQueue::new());
    let orchestrator = Arc::new(
        Orchestrator::new(
            repo.clone(),
            kv.clone(),
            queue.clone(),
            test_registry(),
        )
        .with_retry_policy(RetryPolicy::fixed(
            3,
            Duration::from_millis(100),
            Duration::from_secs(5),
        )),
    );
    let pool = WorkerPool::new(orchestrator.clone(), queue.clone());
    Harness {
        repo,
        kv,
        queue,
        orchestrator,
        pool,
    }
}

/// Test components on top of the built-ins:
/// `agent` replies with an AI message and records usage, `code` echoes
/// its configured value, `loop_items` seeds a loop from its config,
/// `item_echo` captures the current loop item, `flaky` fails a
/// configured number of times, `boom` always fails permanently.
fn test_registry() -> Arc<ComponentRegistry> {
    let registry = ComponentRegistry::with_builtins();

    registry.register(
        "agent",
        Arc::new(|config: &Value| {
            let reply = config
                .get("reply")
                .and_then(Value::as_str)
                .unwrap_or("done")
                .to_string();
            let tokens = config.get("tokens").and_then(Value::as_u64).unwrap_or(10);
            Ok(Box::new(move |_state: &WorkflowState| {
                Ok::<_, ComponentError>(
                    NodeResult::output(json!({ "reply": reply.clone() }))
                        .with_message(Message::ai(reply.clone()))
                        .with_usage(TokenUsage {
                            input_tokens: tokens / 2,
                            output_tokens: tokens - tokens / 2,
                            total_tokens: tokens,
                            cost_usd: 0.001,
                            llm_calls: 1,
                        }),
                )
            }) as Box<dyn Component>)
        }),
    );

    registry.register(
        "code",
        Arc::new(|config: &Value| {
            let value = config.get("value").cloned().unwrap_or(json!(42));
            Ok(Box::new(move |_state: &WorkflowState| {
                Ok::<_, ComponentError>(NodeResult::output(value.clone()))
            }) as Box<dyn Component>)
        }),
    );

    registry.register(
        "loop_items",
        Arc::new(|config: &Value| {
            let items = config
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(move |_state: &WorkflowState| {
                Ok::<_, ComponentError>(NodeResult::loop_over(items.clone()))
            }) as Box<dyn Component>)
        }),
    );

    registry.register(
        "item_echo",
        Arc::new(|_config: &Value| {
            Ok(Box::new(|state: &WorkflowState| {
                let item = state
                    .loop_scope
                    .as_ref()
                    .map_or(Value::Null, |scope| scope.item.clone());
                Ok::<_, ComponentError>(NodeResult::default().with_port("item", item))
            }) as Box<dyn Component>)
        }),
    );

    registry.register(
        "flaky",
        Arc::new(|config: &Value| {
            let failures = config.get("failures").and_then(Value::as_u64).unwrap_or(1) as u32;
            let remaining = Arc::new(AtomicU32::new(failures));
            Ok(Box::new(move |_state: &WorkflowState| {
                if remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    Err(ComponentError::Transient("upstream timeout".into()))
                } else {
                    Ok(NodeResult::output(json!("recovered")))
                }
            }) as Box<dyn Component>)
        }),
    );

    registry.register(
        "boom",
        Arc::new(|_config: &Value| {
            Ok(Box::new(|_state: &WorkflowState| {
                Err::<NodeResult, _>(ComponentError::Permanent("kaboom".into()))
            }) as Box<dyn Component>)
        }),
    );

    Arc::new(registry)
}

fn trigger() -> NodeRecord {
    NodeRecord::new("t", "trigger_manual")
}

async fn install_workflow(
    harness: &Harness,
    slug: &str,
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
) {
    let record = WorkflowRecord::new(
        WorkflowId::new(slug),
        WorkflowGraph::new(WorkflowId::new(slug), nodes, edges),
    );
    harness.repo.insert_workflow(record).await.unwrap();
}

async fn start_and_drain(harness: &Harness, slug: &str, payload: Value) -> ExecutionId {
    let record = ExecutionRecord::new(WorkflowId::new(slug), UserId::new("u1"), payload)
        .with_trigger_node(NodeId::new("t"));
    let execution_id = record.execution_id;
    harness.repo.create_execution(record).await.unwrap();
    harness
        .queue
        .enqueue(Job::StartExecution { execution_id })
        .await
        .unwrap();
    harness.pool.run_until_idle().await;
    execution_id
}

async fn node_runs(harness: &Harness, execution_id: &ExecutionId, node: &str) -> usize {
    harness
        .repo
        .logs(execution_id)
        .await
        .unwrap()
        .iter()
        .filter(|entry| entry.node_id.as_str() == node)
        .count()
}

#[tokio::test(start_paused = true)]
async fn linear_pipeline_completes() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("agent-a", json!({"reply": "categorized"}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "linear",
        vec![
            trigger(),
            NodeRecord::new("agent_a", "agent").with_config("agent-a"),
            NodeRecord::new("code_b", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "agent_a"),
            EdgeRecord::direct("agent_a", "code_b"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "linear", json!({"text": "hello"})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.completed_at.is_some());
    // code_b sets no explicit output, so the last AI message wins
    assert_eq!(
        record.final_output,
        Some(json!({"message": "categorized"}))
    );
    assert_eq!(record.usage.llm_calls, 1);

    assert_eq!(node_runs(&harness, &execution_id, "agent_a").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "code_b").await, 1);
    // coordination keys are gone after finalization
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn switch_routes_by_rule_and_fallback() {
    let harness = harness();
    harness
        .repo
        .insert_component_config(
            "switch-cfg",
            json!({
                "rules": [
                    {"id": "r1", "field": "trigger.text", "operator": "contains", "value": "code"},
                ],
                "extra_config": {"enable_fallback": true},
            }),
        )
        .await
        .unwrap();
    let nodes = vec![
        trigger(),
        NodeRecord::new("switch_1", "switch").with_config("switch-cfg"),
        NodeRecord::new("code_c", "code"),
        NodeRecord::new("code_d", "code"),
    ];
    let edges = vec![
        EdgeRecord::direct("t", "switch_1"),
        EdgeRecord::conditional("switch_1", "code_c", "r1"),
        EdgeRecord::conditional("switch_1", "code_d", "__other__"),
    ];
    install_workflow(&harness, "routed", nodes, edges).await;

    let matched = start_and_drain(&harness, "routed", json!({"text": "run code"})).await;
    assert_eq!(node_runs(&harness, &matched, "code_c").await, 1);
    assert_eq!(node_runs(&harness, &matched, "code_d").await, 0);

    let fallback = start_and_drain(&harness, "routed", json!({"text": "hi"})).await;
    assert_eq!(node_runs(&harness, &fallback, "code_c").await, 0);
    assert_eq!(node_runs(&harness, &fallback, "code_d").await, 1);

    for execution_id in [matched, fallback] {
        let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn fan_in_merge_runs_once_after_all_parents() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("agent-a", json!({"reply": "from a"}))
        .await
        .unwrap();
    harness
        .repo
        .insert_component_config("agent-b", json!({"reply": "from b"}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "diamond",
        vec![
            trigger(),
            NodeRecord::new("a", "agent").with_config("agent-a"),
            NodeRecord::new("b", "agent").with_config("agent-b"),
            NodeRecord::new("merge_1", "merge"),
            NodeRecord::new("code_z", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "a"),
            EdgeRecord::direct("t", "b"),
            EdgeRecord::direct("a", "merge_1"),
            EdgeRecord::direct("b", "merge_1"),
            EdgeRecord::direct("merge_1", "code_z"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "diamond", json!({"text": "go"})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "merge_1").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "code_z").await, 1);

    // the merge observed both parents' outputs
    let logs = harness.repo.logs(&execution_id).await.unwrap();
    let merge_row = logs
        .iter()
        .find(|entry| entry.node_id.as_str() == "merge_1")
        .unwrap();
    let merged = &merge_row.output.as_ref().unwrap()["merged"];
    assert_eq!(merged["a"]["output"]["reply"], json!("from a"));
    assert_eq!(merged["b"]["output"]["reply"], json!("from b"));
}

#[tokio::test(start_paused = true)]
async fn loop_iterates_in_order_and_collects_results() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("loop-cfg", json!({"items": [1, 2, 3]}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "looped",
        vec![
            trigger(),
            NodeRecord::new("loop_1", "loop_items").with_config("loop-cfg"),
            NodeRecord::new("body", "item_echo"),
            NodeRecord::new("sink", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "loop_1"),
            EdgeRecord::direct("loop_1", "body").with_label(EdgeLabel::LoopBody),
            EdgeRecord::direct("body", "loop_1").with_label(EdgeLabel::LoopReturn),
            EdgeRecord::direct("loop_1", "sink"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "looped", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "body").await, 3);
    assert_eq!(node_runs(&harness, &execution_id, "sink").await, 1);

    // the loop's results hold one snapshot per iteration, in item order
    let final_output = record.final_output.unwrap();
    let results = final_output["node_outputs"]["loop_1"]["results"]
        .as_array()
        .unwrap();
    assert_eq!(results.len(), 3);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result["body"]["item"], json!(index + 1));
    }
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn multi_node_loop_body_chains_before_closing() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("loop-cfg", json!({"items": ["x", "y"]}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "chained-loop",
        vec![
            trigger(),
            NodeRecord::new("loop_1", "loop_items").with_config("loop-cfg"),
            NodeRecord::new("body_a", "item_echo"),
            NodeRecord::new("body_b", "code"),
            NodeRecord::new("sink", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "loop_1"),
            EdgeRecord::direct("loop_1", "body_a").with_label(EdgeLabel::LoopBody),
            EdgeRecord::direct("body_a", "body_b"),
            EdgeRecord::direct("body_b", "loop_1").with_label(EdgeLabel::LoopReturn),
            EdgeRecord::direct("loop_1", "sink"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "chained-loop", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    // the whole chain runs once per item; only the dead-end node closes
    // the iteration
    assert_eq!(node_runs(&harness, &execution_id, "body_a").await, 2);
    assert_eq!(node_runs(&harness, &execution_id, "body_b").await, 2);
    assert_eq!(node_runs(&harness, &execution_id, "sink").await, 1);

    let final_output = record.final_output.unwrap();
    let results = final_output["node_outputs"]["loop_1"]["results"]
        .as_array()
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["body_a"]["item"], json!("x"));
    assert_eq!(results[1]["body_a"]["item"], json!("y"));
}

#[tokio::test(start_paused = true)]
async fn empty_loop_is_a_noop() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("loop-cfg", json!({"items": []}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "empty-loop",
        vec![
            trigger(),
            NodeRecord::new("loop_1", "loop_items").with_config("loop-cfg"),
            NodeRecord::new("body", "item_echo"),
            NodeRecord::new("sink", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "loop_1"),
            EdgeRecord::direct("loop_1", "body").with_label(EdgeLabel::LoopBody),
            EdgeRecord::direct("body", "loop_1").with_label(EdgeLabel::LoopReturn),
            EdgeRecord::direct("loop_1", "sink"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "empty-loop", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "body").await, 0);
    assert_eq!(node_runs(&harness, &execution_id, "sink").await, 1);
    let final_output = record.final_output.unwrap();
    assert_eq!(
        final_output["node_outputs"]["loop_1"],
        json!({"results": []})
    );
}

#[tokio::test(start_paused = true)]
async fn subworkflow_suspends_and_resumes_with_child_output() {
    let harness = harness();
    // child workflow
    harness
        .repo
        .insert_component_config("child-agent", json!({"reply": "child reply"}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "child-wf",
        vec![
            trigger(),
            NodeRecord::new("child_agent", "agent").with_config("child-agent"),
        ],
        vec![EdgeRecord::direct("t", "child_agent")],
    )
    .await;
    // parent workflow
    harness
        .repo
        .insert_component_config("sub-cfg", json!({"workflow": "child-wf", "trigger_node": "t"}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "parent-wf",
        vec![
            trigger(),
            NodeRecord::new("sub_1", "subworkflow").with_config("sub-cfg"),
            NodeRecord::new("next", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "sub_1"),
            EdgeRecord::direct("sub_1", "next"),
        ],
    )
    .await;

    let parent_id = start_and_drain(&harness, "parent-wf", json!({"text": "start"})).await;

    let parent = harness.repo.execution(&parent_id).await.unwrap().unwrap();
    assert_eq!(parent.status, ExecutionStatus::Completed);

    // exactly one child, linked back to the suspending node
    let children: Vec<ExecutionRecord> = harness
        .repo
        .running_started_before(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert!(children.is_empty(), "no execution left running");
    // the sub node ran twice: suspend, then completion with the child's
    // output injected
    assert_eq!(node_runs(&harness, &parent_id, "sub_1").await, 2);
    assert_eq!(node_runs(&harness, &parent_id, "next").await, 1);

    let final_output = parent.final_output.unwrap();
    assert_eq!(
        final_output["node_outputs"]["sub_1"]["output"],
        json!({"message": "child reply"})
    );
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupt_and_resume_confirmed() {
    let harness = harness();
    install_workflow(
        &harness,
        "confirmed-wf",
        vec![
            trigger(),
            NodeRecord::new("confirm_1", "human_confirmation"),
            NodeRecord::new("code_x", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "confirm_1"),
            EdgeRecord::conditional("confirm_1", "code_x", "confirmed"),
            EdgeRecord::conditional("confirm_1", "__end__", "cancelled"),
        ],
    )
    .await;

    let execution_id =
        start_and_drain(&harness, "confirmed-wf", json!({"text": "deploy", "chat_id": 7})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Interrupted);
    let task = harness
        .repo
        .pending_task_for(&execution_id)
        .await
        .unwrap()
        .expect("pending task");
    assert_eq!(task.node_id.as_str(), "confirm_1");
    assert_eq!(task.chat_id, Some(7));

    harness
        .orchestrator
        .resume_node(&execution_id, "yes")
        .await
        .unwrap();
    harness.pool.run_until_idle().await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "code_x").await, 1);
    // the pending task was consumed
    assert!(harness
        .repo
        .pending_task_for(&execution_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn interrupt_and_resume_cancelled_skips_downstream() {
    let harness = harness();
    install_workflow(
        &harness,
        "cancelled-wf",
        vec![
            trigger(),
            NodeRecord::new("confirm_1", "human_confirmation"),
            NodeRecord::new("code_x", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "confirm_1"),
            EdgeRecord::conditional("confirm_1", "code_x", "confirmed"),
            EdgeRecord::conditional("confirm_1", "__end__", "cancelled"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "cancelled-wf", json!({"text": "deploy"})).await;
    harness
        .orchestrator
        .resume_node(&execution_id, "no")
        .await
        .unwrap();
    harness.pool.run_until_idle().await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "code_x").await, 0);
}

#[tokio::test(start_paused = true)]
async fn interrupt_before_flag_parks_before_running() {
    let harness = harness();
    install_workflow(
        &harness,
        "gated",
        vec![
            trigger(),
            NodeRecord::new("code_x", "code").with_interrupt_before(),
        ],
        vec![EdgeRecord::direct("t", "code_x")],
    )
    .await;

    let execution_id = start_and_drain(&harness, "gated", json!({"text": "go"})).await;
    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Interrupted);
    // the node never ran
    assert_eq!(node_runs(&harness, &execution_id, "code_x").await, 0);

    harness
        .orchestrator
        .resume_node(&execution_id, "go ahead")
        .await
        .unwrap();
    harness.pool.run_until_idle().await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(node_runs(&harness, &execution_id, "code_x").await, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_confirmation_fails_the_execution() {
    let harness = harness();
    install_workflow(
        &harness,
        "stale",
        vec![trigger(), NodeRecord::new("code_x", "code")],
        vec![EdgeRecord::direct("t", "code_x")],
    )
    .await;

    // hand-build an interrupted execution with a lapsed task
    let mut record =
        ExecutionRecord::new(WorkflowId::new("stale"), UserId::new("u1"), json!({}));
    record.transition(ExecutionStatus::Running).unwrap();
    record.transition(ExecutionStatus::Interrupted).unwrap();
    let execution_id = record.execution_id;
    harness.repo.create_execution(record).await.unwrap();
    harness
        .repo
        .create_pending_task(PendingTask {
            task_id: TaskId::generate(),
            execution_id,
            node_id: NodeId::new("code_x"),
            prompt: "Proceed?".into(),
            chat_id: None,
            expires_at: Utc::now() - chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    harness
        .orchestrator
        .resume_node(&execution_id, "yes")
        .await
        .unwrap();

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("confirmation timed out"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_until_success() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("flaky-cfg", json!({"failures": 2}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "retrying",
        vec![
            trigger(),
            NodeRecord::new("flaky_1", "flaky").with_config("flaky-cfg"),
        ],
        vec![EdgeRecord::direct("t", "flaky_1")],
    )
    .await;

    let execution_id = start_and_drain(&harness, "retrying", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);

    let logs = harness.repo.logs(&execution_id).await.unwrap();
    let failed = logs
        .iter()
        .filter(|entry| entry.status == NodeRunStatus::Failed)
        .count();
    let completed = logs
        .iter()
        .filter(|entry| entry.status == NodeRunStatus::Completed)
        .count();
    assert_eq!(failed, 2, "one log row per failed attempt");
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_to_failure() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("flaky-cfg", json!({"failures": 100}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "doomed",
        vec![
            trigger(),
            NodeRecord::new("flaky_1", "flaky")
                .with_config("flaky-cfg")
                .with_max_retries(1),
        ],
        vec![EdgeRecord::direct("t", "flaky_1")],
    )
    .await;

    let execution_id = start_and_drain(&harness, "doomed", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("flaky_1"));
    // initial attempt plus one retry, each with its own log row
    assert_eq!(node_runs(&harness, &execution_id, "flaky_1").await, 2);
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_fails_immediately_with_contiguous_logs() {
    let harness = harness();
    install_workflow(
        &harness,
        "fatal",
        vec![
            trigger(),
            NodeRecord::new("code_a", "code"),
            NodeRecord::new("boom_b", "boom"),
            NodeRecord::new("code_c", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "code_a"),
            EdgeRecord::direct("code_a", "boom_b"),
            EdgeRecord::direct("boom_b", "code_c"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "fatal", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("kaboom"));

    // every node that ran has a row; nothing downstream of the failure ran
    assert_eq!(node_runs(&harness, &execution_id, "code_a").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "boom_b").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "code_c").await, 0);
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn loop_body_errors_are_captured_not_fatal() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("loop-cfg", json!({"items": ["a", "b"]}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "loop-errors",
        vec![
            trigger(),
            NodeRecord::new("loop_1", "loop_items").with_config("loop-cfg"),
            NodeRecord::new("body", "boom").with_max_retries(0),
            NodeRecord::new("sink", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "loop_1"),
            EdgeRecord::direct("loop_1", "body").with_label(EdgeLabel::LoopBody),
            EdgeRecord::direct("body", "loop_1").with_label(EdgeLabel::LoopReturn),
            EdgeRecord::direct("loop_1", "sink"),
        ],
    )
    .await;

    let execution_id = start_and_drain(&harness, "loop-errors", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);

    let final_output = record.final_output.unwrap();
    let results = final_output["node_outputs"]["loop_1"]["results"]
        .as_array()
        .unwrap();
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result["_errors"]["body"]["error"]
            .as_str()
            .unwrap()
            .contains("kaboom"));
    }
}

#[tokio::test(start_paused = true)]
async fn budget_halts_mid_run() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("agent-cfg", json!({"reply": "x", "tokens": 100}))
        .await
        .unwrap();
    let workflow = WorkflowRecord::new(
        WorkflowId::new("capped"),
        WorkflowGraph::new(
            WorkflowId::new("capped"),
            vec![
                trigger(),
                NodeRecord::new("a1", "agent").with_config("agent-cfg"),
                NodeRecord::new("a2", "agent").with_config("agent-cfg"),
                NodeRecord::new("a3", "agent").with_config("agent-cfg"),
            ],
            vec![
                EdgeRecord::direct("t", "a1"),
                EdgeRecord::direct("a1", "a2"),
                EdgeRecord::direct("a2", "a3"),
            ],
        ),
    )
    .with_budget(BudgetLimits {
        max_total_tokens: Some(150),
        ..BudgetLimits::default()
    });
    harness.repo.insert_workflow(workflow).await.unwrap();

    let execution_id = start_and_drain(&harness, "capped", json!({})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("budget exceeded"));
    // the second agent tripped the limit; the third never ran
    assert_eq!(node_runs(&harness, &execution_id, "a2").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "a3").await, 0);
    assert!(harness.kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn zombie_recovery_fails_and_cleans() {
    let harness = harness();
    install_workflow(
        &harness,
        "undead",
        vec![trigger(), NodeRecord::new("code_x", "code")],
        vec![EdgeRecord::direct("t", "code_x")],
    )
    .await;

    let mut record =
        ExecutionRecord::new(WorkflowId::new("undead"), UserId::new("u1"), json!({}));
    record.transition(ExecutionStatus::Running).unwrap();
    record.started_at = Some(Utc::now() - chrono::Duration::minutes(30));
    let execution_id = record.execution_id;
    harness.repo.create_execution(record.clone()).await.unwrap();

    // leave coordination litter behind, as a crashed worker would
    let coord = ExecutionCoordinator::new(
        harness.kv.clone() as Arc<dyn KvStore>,
        execution_id,
        WorkflowId::new("undead"),
    );
    coord.increment_inflight().await.unwrap();
    assert!(!harness.kv.is_empty());

    let mut events = harness.kv.subscribe();
    let recovered = harness.orchestrator.recover_zombies().await.unwrap();
    assert_eq!(recovered, 1);

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("zombie"));
    assert!(record.completed_at.is_some());
    assert!(harness.kv.is_empty());

    let (_, message) = events.try_recv().unwrap();
    assert_eq!(message["type"], "execution_failed");

    // the sweep is idempotent
    assert_eq!(harness.orchestrator.recover_zombies().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_failure_callback_fails_running_execution() {
    let harness = harness();
    install_workflow(
        &harness,
        "dropped",
        vec![trigger(), NodeRecord::new("code_x", "code")],
        vec![EdgeRecord::direct("t", "code_x")],
    )
    .await;

    let mut record =
        ExecutionRecord::new(WorkflowId::new("dropped"), UserId::new("u1"), json!({}));
    record.transition(ExecutionStatus::Running).unwrap();
    let execution_id = record.execution_id;
    harness.repo.create_execution(record).await.unwrap();

    let job = Job::ExecuteNode {
        execution_id,
        node_id: NodeId::new("code_x"),
        retry_count: 0,
    };
    harness
        .orchestrator
        .on_job_failure(&job, "SIGKILL: worker killed")
        .await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error_message.unwrap().contains("worker killed"));

    // already-terminal executions are left alone
    harness.orchestrator.on_job_failure(&job, "again").await;
    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert!(record.error_message.unwrap().contains("worker killed"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_execution_stops_at_preflight() {
    let harness = harness();
    install_workflow(
        &harness,
        "cancelled-run",
        vec![trigger(), NodeRecord::new("code_x", "code")],
        vec![EdgeRecord::direct("t", "code_x")],
    )
    .await;

    let record = ExecutionRecord::new(
        WorkflowId::new("cancelled-run"),
        UserId::new("u1"),
        json!({}),
    )
    .with_trigger_node(NodeId::new("t"));
    let execution_id = record.execution_id;
    harness.repo.create_execution(record).await.unwrap();
    harness
        .queue
        .enqueue(Job::StartExecution { execution_id })
        .await
        .unwrap();

    // start, then cancel before the node job is picked up
    let start_job = harness.queue.next_job().await.unwrap();
    harness.orchestrator.handle(&start_job).await.unwrap();
    let mut record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    record.transition(ExecutionStatus::Cancelled).unwrap();
    harness.repo.update_execution(&record).await.unwrap();

    harness.pool.run_until_idle().await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
    assert_eq!(node_runs(&harness, &execution_id, "code_x").await, 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_of_completed_node_is_a_noop() {
    let harness = harness();
    install_workflow(
        &harness,
        "dedup",
        vec![
            trigger(),
            NodeRecord::new("a", "code"),
            NodeRecord::new("b", "code"),
        ],
        vec![
            EdgeRecord::direct("t", "a"),
            EdgeRecord::direct("a", "b"),
        ],
    )
    .await;

    let record = ExecutionRecord::new(WorkflowId::new("dedup"), UserId::new("u1"), json!({}))
        .with_trigger_node(NodeId::new("t"));
    let execution_id = record.execution_id;
    harness.repo.create_execution(record).await.unwrap();

    // start the execution, which enqueues `a` with one token
    let start_job = Job::StartExecution { execution_id };
    harness.orchestrator.handle(&start_job).await.unwrap();

    // simulate at-least-once delivery: a stray extra token-less copy
    // of `a` sits behind the real one
    let coord = ExecutionCoordinator::new(
        harness.kv.clone() as Arc<dyn KvStore>,
        execution_id,
        WorkflowId::new("dedup"),
    );
    coord.increment_inflight().await.unwrap(); // pin the counter above zero
    harness
        .queue
        .enqueue(Job::ExecuteNode {
            execution_id,
            node_id: NodeId::new("a"),
            retry_count: 0,
        })
        .await
        .unwrap();

    harness.pool.run_until_idle().await;

    // `a` ran once; the duplicate neither re-ran it nor corrupted the
    // counter (the pin is still held, so the execution has not finalized)
    assert_eq!(node_runs(&harness, &execution_id, "a").await, 1);
    assert_eq!(node_runs(&harness, &execution_id, "b").await, 1);
    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);

    // releasing the pin drains the execution
    let remaining = coord.decrement_inflight().await.unwrap();
    assert_eq!(remaining, 0);
    harness.orchestrator.finalize(&execution_id).await.unwrap();
    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn error_handler_workflow_runs_on_failure() {
    let harness = harness();
    harness
        .repo
        .insert_component_config("handler-agent", json!({"reply": "notified"}))
        .await
        .unwrap();
    install_workflow(
        &harness,
        "handler-wf",
        vec![
            trigger(),
            NodeRecord::new("notify", "agent").with_config("handler-agent"),
        ],
        vec![EdgeRecord::direct("t", "notify")],
    )
    .await;

    let workflow = WorkflowRecord::new(
        WorkflowId::new("fragile"),
        WorkflowGraph::new(
            WorkflowId::new("fragile"),
            vec![trigger(), NodeRecord::new("boom_1", "boom")],
            vec![EdgeRecord::direct("t", "boom_1")],
        ),
    )
    .with_error_handler(WorkflowId::new("handler-wf"));
    harness.repo.insert_workflow(workflow).await.unwrap();

    let execution_id = start_and_drain(&harness, "fragile", json!({"text": "x"})).await;

    let record = harness.repo.execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);

    // the handler child ran to completion with the failure context
    let children = harness.repo.child_executions(&execution_id).await.unwrap();
    assert_eq!(children.len(), 1);
    let handler = &children[0];
    assert_eq!(handler.workflow_id, WorkflowId::new("handler-wf"));
    assert_eq!(handler.parent_node_id, Some(NodeId::new("__error_handler__")));
    assert_eq!(handler.status, ExecutionStatus::Completed);
    assert!(handler.trigger_payload["error"]
        .as_str()
        .unwrap()
        .contains("kaboom"));
    assert_eq!(
        handler.trigger_payload["source_execution_id"],
        json!(execution_id.to_string())
    );
    assert_eq!(
        node_runs(&harness, &handler.execution_id, "notify").await,
        1
    );
}
