use std::sync::Arc;
use std::sync::atomic::Ordering;

use agent_flow::agents::{AgentPool, AgentRunner, EchoRunner, InMemoryAgentPool};
use agent_flow::config::EngineConfig;
use agent_flow::store::{JsonFileStore, Store};
use agent_flow::tasks::{TaskScheduler, spawn_dispatch_loop};
use agent_flow::workflow::{Connection, WorkflowEngine, WorkflowNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env()?;

    eprintln!("🤖 Agent Flow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Agents: {}", config.agent_count);
    eprintln!(
        "   Dispatch: {} (every {}ms)",
        if config.scheduler.dispatch_enabled { "on" } else { "off" },
        config.scheduler.dispatch_interval.as_millis()
    );

    // ── Storage ──────────────────────────────────────────────────────────
    let store: Option<Arc<dyn Store>> = match config.data_dir {
        Some(ref dir) => {
            eprintln!("   Store: {}", dir.display());
            let json = JsonFileStore::open(dir.clone()).await?;
            Some(Arc::new(json))
        }
        None => {
            eprintln!("   Store: in-memory only");
            None
        }
    };

    // ── Scheduler & engine ───────────────────────────────────────────────
    let mut scheduler = TaskScheduler::new(config.scheduler.max_retries);
    if let Some(ref store) = store {
        scheduler = scheduler.with_store(Arc::clone(store));
    }
    let scheduler = Arc::new(scheduler);

    let mut engine = WorkflowEngine::with_task_priority(
        Arc::clone(&scheduler),
        config.scheduler.workflow_task_priority,
    );
    if let Some(ref store) = store {
        engine = engine.with_store(Arc::clone(store));
    }

    scheduler.restore().await;
    engine.restore().await;

    // ── Agents ───────────────────────────────────────────────────────────
    let pool: Arc<dyn AgentPool> = Arc::new(InMemoryAgentPool::with_capacity(config.agent_count));
    let runner: Arc<dyn AgentRunner> = Arc::new(EchoRunner);

    let dispatch = if config.scheduler.dispatch_enabled {
        Some(spawn_dispatch_loop(
            Arc::clone(&scheduler),
            pool,
            runner,
            config.scheduler.dispatch_interval,
        ))
    } else {
        None
    };

    // ── Demo workflow ────────────────────────────────────────────────────
    let workflow = engine.create_workflow("Demo: summarize and gate").await;
    let id = workflow.id.as_str();

    engine
        .add_node(
            id,
            WorkflowNode::input("source").with_prompt("Quarterly revenue grew 12% on strong demand."),
        )
        .await?;
    engine
        .add_node(id, WorkflowNode::process("summarize", "Summarize the input in one line"))
        .await?;
    engine
        .add_node(id, WorkflowNode::condition("has-summary", "has_input"))
        .await?;
    engine.add_node(id, WorkflowNode::output("result")).await?;

    engine
        .connect_nodes(id, Connection::between("source", "summarize"))
        .await?;
    engine
        .connect_nodes(id, Connection::between("summarize", "has-summary"))
        .await?;
    engine
        .connect_nodes(id, Connection::between("summarize", "result"))
        .await?;
    engine
        .connect_nodes(id, Connection::between("has-summary", "result"))
        .await?;

    if dispatch.is_none() {
        eprintln!("   ⚠ Dispatch disabled, not running the demo workflow");
        println!("{}", engine.export_workflow(id).await?);
        return Ok(());
    }

    let report = engine.execute_workflow(id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let stats = scheduler.queue_stats().await;
    eprintln!(
        "   Tasks: {} total, {} completed, {} failed",
        stats.total, stats.completed, stats.failed
    );

    if let Some((handle, shutdown)) = dispatch {
        shutdown.store(true, Ordering::Relaxed);
        handle.await?;
    }

    Ok(())
}
