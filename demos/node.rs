//! Runnable node: listens for KRRA connections and serves agent traffic.
//!
//! ```text
//! cargo run --example node -- [config.json]
//! RUST_LOG=korra_node=debug cargo run --example node
//! ```
//!
//! The bundled engine only knows the `echo` agent type, which returns its
//! input unchanged.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use korra_node::diagnostics::{fatal, init_logging, install_crash_handler};
use korra_node::protocol::NodeInfo;
use korra_node::{
    serve_connection, AgentEngine, AgentHandle, AgentHandler, NodeConfig, NodeError, Result, Role,
    Transport, WorkerPool,
};

#[derive(Default)]
struct EchoEngine {
    next: AtomicU64,
    live: Mutex<HashSet<u64>>,
}

impl AgentEngine for EchoEngine {
    fn create(&self, agent_type: &str, _config: &str) -> Result<AgentHandle> {
        if agent_type != "echo" {
            return Err(NodeError::Agent(format!(
                "unsupported agent type: {}",
                agent_type
            )));
        }
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(raw);
        Ok(AgentHandle::from_raw(raw))
    }

    fn execute(&self, handle: &AgentHandle, input: &[u8]) -> Result<Vec<u8>> {
        if !self.live.lock().contains(&handle.raw()) {
            return Err(NodeError::Agent(format!("{} was destroyed", handle)));
        }
        Ok(input.to_vec())
    }

    fn destroy(&self, handle: AgentHandle) {
        self.live.lock().remove(&handle.raw());
    }
}

fn load_config() -> NodeConfig {
    match std::env::args().nth(1) {
        Some(path) => match NodeConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => fatal(&format!("cannot load {}: {}", path, e)),
        },
        None => NodeConfig::default(),
    }
}

#[tokio::main]
async fn main() {
    init_logging("info");
    install_crash_handler();

    let config = load_config();
    let pool = match WorkerPool::new(config.pool.clone()) {
        Ok(pool) => Arc::new(pool),
        Err(e) => fatal(&format!("cannot start worker pool: {}", e)),
    };
    let listening =
        Transport::initialize(&config.listen_addr, Role::Server, config.transport.clone()).await;
    let mut server = match listening {
        Ok(server) => server,
        Err(e) => fatal(&format!("cannot listen on {}: {}", config.listen_addr, e)),
    };

    let addr = server.local_addr();
    let info = NodeInfo::new(&config.node_id, addr.ip().to_string(), addr.port())
        .with_capability("agents", "echo")
        .with_capability("workers", config.pool.workers.to_string());
    let handler = Arc::new(AgentHandler::new(EchoEngine::default(), info));

    tracing::info!(node_id = %config.node_id, addr = %addr, "Node started");

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok(connection) => {
                    let pool = pool.clone();
                    let handler = handler.clone();
                    let session = config.session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(connection, pool, handler, session).await {
                            tracing::warn!("Session ended with error: {}", e);
                        }
                    });
                }
                Err(e) => tracing::error!("Accept failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    server.close().await;
    let stopper = pool.clone();
    match tokio::task::spawn_blocking(move || stopper.shutdown()).await {
        Ok(Ok(())) => tracing::info!(
            completed = pool.completed_tasks(),
            panicked = pool.panicked_tasks(),
            "Node stopped"
        ),
        Ok(Err(e)) => tracing::error!("Worker pool shutdown failed: {}", e),
        Err(e) => tracing::error!("Shutdown task failed: {}", e),
    }
}
