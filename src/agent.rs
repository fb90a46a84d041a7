//! Agent engine boundary and the message handler built on it.
//!
//! The engine that actually runs agents lives outside this crate. It is
//! reached only through [`AgentEngine`]: create an agent from a type name and
//! configuration string, execute it on bytes, destroy it. Agents are named by
//! opaque [`AgentHandle`]s the engine hands out.
//!
//! [`AgentHandler`] maps protocol messages onto those three calls and keeps
//! the agent-id → handle table for one node.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::node::MessageHandler;
use crate::protocol::{
    AgentRegistration, AgentStatus, AgentUpdate, JobResult, JobSubmit, Message, MessageType,
    NodeInfo,
};

/// Opaque reference to an agent owned by an [`AgentEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentHandle(u64);

impl AgentHandle {
    /// Wrap an engine-specific identifier.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The engine-specific identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// The external agent-execution engine.
///
/// Called from pool worker threads, possibly several at once. An engine must
/// reject handles it has already destroyed with an error rather than panic.
pub trait AgentEngine: Send + Sync + 'static {
    /// Instantiate an agent. `config` is engine-specific, usually JSON.
    fn create(&self, agent_type: &str, config: &str) -> Result<AgentHandle>;

    /// Run the agent on `input` and return its output.
    fn execute(&self, handle: &AgentHandle, input: &[u8]) -> Result<Vec<u8>>;

    /// Release the agent. The handle must not be used afterwards.
    ///
    /// Never called while an `execute` on the same handle is in flight.
    fn destroy(&self, handle: AgentHandle);
}

/// A registered agent. The engine handle is destroyed when the last lease
/// drops, so a job running on a replaced or retired agent finishes first.
struct AgentSlot<E: AgentEngine> {
    handle: AgentHandle,
    engine: Arc<E>,
}

impl<E: AgentEngine> Drop for AgentSlot<E> {
    fn drop(&mut self) {
        tracing::debug!(handle = %self.handle, "Destroying agent");
        self.engine.destroy(self.handle);
    }
}

/// Serves agent traffic for one node.
///
/// | Request         | Reply                                   |
/// |-----------------|-----------------------------------------|
/// | `Heartbeat`     | `Heartbeat`                             |
/// | `AgentRegister` | `AgentUpdate` (`ready` or `failed`)     |
/// | `JobSubmit`     | `JobResult`                             |
/// | `NodeInfo`      | `NodeInfo` describing this node         |
/// | anything else   | none                                    |
///
/// Every agent still registered is destroyed when the handler is dropped.
/// Replacing, retiring or dropping an agent defers its `destroy` until jobs
/// already executing on it have returned.
pub struct AgentHandler<E: AgentEngine> {
    engine: Arc<E>,
    node_info: NodeInfo,
    agents: Mutex<HashMap<String, Arc<AgentSlot<E>>>>,
}

impl<E: AgentEngine> AgentHandler<E> {
    /// Handler with an empty agent table.
    pub fn new(engine: E, node_info: NodeInfo) -> Self {
        Self {
            engine: Arc::new(engine),
            node_info,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Create an agent and store its handle under `agent_id`.
    ///
    /// An agent already registered under the same id is retired, as by
    /// [`unregister`](Self::unregister).
    pub fn register(&self, registration: &AgentRegistration) -> AgentUpdate {
        match self
            .engine
            .create(&registration.agent_type, &registration.config)
        {
            Ok(handle) => {
                let slot = Arc::new(AgentSlot {
                    handle,
                    engine: self.engine.clone(),
                });
                let previous = self
                    .agents
                    .lock()
                    .insert(registration.agent_id.clone(), slot);
                if let Some(old) = previous {
                    tracing::info!(
                        agent_id = %registration.agent_id,
                        old = %old.handle,
                        "Replacing agent"
                    );
                }
                tracing::info!(
                    agent_id = %registration.agent_id,
                    agent_type = %registration.agent_type,
                    %handle,
                    "Agent registered"
                );
                AgentUpdate {
                    agent_id: registration.agent_id.clone(),
                    status: AgentStatus::Ready,
                    detail: None,
                }
            }
            Err(e) => {
                tracing::warn!(agent_id = %registration.agent_id, "Agent creation failed: {}", e);
                AgentUpdate {
                    agent_id: registration.agent_id.clone(),
                    status: AgentStatus::Failed,
                    detail: Some(e.to_string()),
                }
            }
        }
    }

    /// Retire the agent registered under `agent_id`. Returns whether one existed.
    ///
    /// The handle is destroyed now, or when the last running job on it ends.
    pub fn unregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.lock().remove(agent_id);
        match removed {
            Some(slot) => {
                tracing::info!(agent_id, handle = %slot.handle, "Agent retired");
                true
            }
            None => false,
        }
    }

    /// Run a job on its agent. Failures are reported in the result.
    pub fn run_job(&self, job: &JobSubmit) -> JobResult {
        let lease = self.agents.lock().get(&job.agent_id).cloned();
        let Some(slot) = lease else {
            tracing::warn!(job_id = %job.job_id, agent_id = %job.agent_id, "Job for unknown agent");
            return JobResult::failed(&job.job_id, format!("unknown agent: {}", job.agent_id));
        };

        match self.engine.execute(&slot.handle, &job.input) {
            Ok(output) => {
                tracing::debug!(job_id = %job.job_id, output = output.len(), "Job completed");
                JobResult::completed(&job.job_id, output)
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, "Job failed: {}", e);
                JobResult::failed(&job.job_id, e.to_string())
            }
        }
    }

    /// Number of registered agents.
    pub fn agent_count(&self) -> usize {
        self.agents.lock().len()
    }

    /// Description returned for `NodeInfo` requests.
    #[inline]
    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    /// The wrapped engine.
    #[inline]
    pub fn engine(&self) -> &E {
        self.engine.as_ref()
    }
}

impl<E: AgentEngine> MessageHandler for AgentHandler<E> {
    fn handle(&self, message: Message) -> Result<Option<Message>> {
        match message.msg_type {
            MessageType::Heartbeat => Ok(Some(Message::heartbeat())),
            MessageType::AgentRegister => {
                let registration: AgentRegistration = message.body()?;
                let update = self.register(&registration);
                Ok(Some(Message::with_body(MessageType::AgentUpdate, &update)?))
            }
            MessageType::JobSubmit => {
                let job: JobSubmit = message.body()?;
                let result = self.run_job(&job);
                Ok(Some(Message::with_body(MessageType::JobResult, &result)?))
            }
            MessageType::NodeInfo => Ok(Some(Message::with_body(
                MessageType::NodeInfo,
                &self.node_info,
            )?)),
            other => {
                tracing::debug!(msg_type = %other, "No reply for message type");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Engine whose "upper" agents uppercase their input.
    #[derive(Default)]
    struct FakeEngine {
        next: AtomicU64,
        live: Arc<Mutex<HashSet<u64>>>,
    }

    impl AgentEngine for FakeEngine {
        fn create(&self, agent_type: &str, _config: &str) -> Result<AgentHandle> {
            if agent_type != "upper" {
                return Err(NodeError::Agent(format!("unsupported type {}", agent_type)));
            }
            let raw = self.next.fetch_add(1, Ordering::SeqCst);
            self.live.lock().insert(raw);
            Ok(AgentHandle::from_raw(raw))
        }

        fn execute(&self, handle: &AgentHandle, input: &[u8]) -> Result<Vec<u8>> {
            if !self.live.lock().contains(&handle.raw()) {
                return Err(NodeError::Agent(format!("stale handle {}", handle)));
            }
            if input.is_empty() {
                return Err(NodeError::Agent("empty input".to_string()));
            }
            Ok(input.to_ascii_uppercase())
        }

        fn destroy(&self, handle: AgentHandle) {
            self.live.lock().remove(&handle.raw());
        }
    }

    fn handler() -> AgentHandler<FakeEngine> {
        AgentHandler::new(FakeEngine::default(), NodeInfo::new("node-a", "localhost", 7400))
    }

    fn registration(agent_id: &str, agent_type: &str) -> Message {
        Message::with_body(
            MessageType::AgentRegister,
            &AgentRegistration {
                agent_id: agent_id.to_string(),
                agent_type: agent_type.to_string(),
                config: "{}".to_string(),
            },
        )
        .unwrap()
    }

    fn job(agent_id: &str, input: &[u8]) -> Message {
        Message::with_body(
            MessageType::JobSubmit,
            &JobSubmit {
                job_id: "job-1".to_string(),
                agent_id: agent_id.to_string(),
                input: input.to_vec(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_heartbeat_reply() {
        let reply = handler().handle(Message::heartbeat()).unwrap();
        assert_eq!(reply, Some(Message::heartbeat()));
    }

    #[test]
    fn test_register_then_run_job() {
        let handler = handler();

        let reply = handler.handle(registration("a-1", "upper")).unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageType::AgentUpdate);
        assert_eq!(reply.body::<AgentUpdate>().unwrap().status, AgentStatus::Ready);
        assert_eq!(handler.agent_count(), 1);

        let reply = handler.handle(job("a-1", b"hello")).unwrap().unwrap();
        let result: JobResult = reply.body().unwrap();
        assert!(result.success);
        assert_eq!(result.output, b"HELLO");
    }

    #[test]
    fn test_register_failure_reports_failed_status() {
        let handler = handler();

        let reply = handler.handle(registration("a-1", "wasm")).unwrap().unwrap();
        let update: AgentUpdate = reply.body().unwrap();

        assert_eq!(update.status, AgentStatus::Failed);
        assert!(update.detail.unwrap().contains("unsupported type"));
        assert_eq!(handler.agent_count(), 0);
    }

    #[test]
    fn test_reregister_destroys_previous_handle() {
        let handler = handler();
        handler.handle(registration("a-1", "upper")).unwrap();
        handler.handle(registration("a-1", "upper")).unwrap();

        assert_eq!(handler.agent_count(), 1);
        assert_eq!(handler.engine().live.lock().len(), 1);
    }

    #[test]
    fn test_job_for_unknown_agent_fails() {
        let result: JobResult = handler()
            .handle(job("missing", b"x"))
            .unwrap()
            .unwrap()
            .body()
            .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown agent"));
    }

    #[test]
    fn test_engine_error_becomes_failed_result() {
        let handler = handler();
        handler.handle(registration("a-1", "upper")).unwrap();

        let result: JobResult = handler
            .handle(job("a-1", b""))
            .unwrap()
            .unwrap()
            .body()
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Agent error: empty input"));
    }

    #[test]
    fn test_node_info_reply() {
        let reply = handler()
            .handle(Message::empty(MessageType::NodeInfo))
            .unwrap()
            .unwrap();

        let info: NodeInfo = reply.body().unwrap();
        assert_eq!(info.node_id, "node-a");
        assert_eq!(info.port, 7400);
    }

    #[test]
    fn test_other_types_have_no_reply() {
        let handler = handler();
        assert_eq!(
            handler.handle(Message::empty(MessageType::StateSync)).unwrap(),
            None
        );
        assert_eq!(
            handler.handle(Message::empty(MessageType::JobResult)).unwrap(),
            None
        );
    }

    #[test]
    fn test_malformed_body_is_error() {
        let result = handler().handle(Message::new(MessageType::JobSubmit, &b"\xc1"[..]));
        assert!(matches!(result, Err(NodeError::MsgPackDecode(_))));
    }

    #[test]
    fn test_unregister_and_drop_destroy_handles() {
        let engine = FakeEngine::default();
        let live = engine.live.clone();
        let handler = AgentHandler::new(engine, NodeInfo::new("n", "h", 1));

        handler.handle(registration("a-1", "upper")).unwrap();
        handler.handle(registration("a-2", "upper")).unwrap();
        assert!(handler.unregister("a-1"));
        assert!(!handler.unregister("a-1"));
        assert_eq!(live.lock().len(), 1);

        drop(handler);
        assert!(live.lock().is_empty());
    }

    /// Engine that parks inside `execute` and records any destroy that lands
    /// while an execution is running on the same handle.
    struct SlowEngine {
        next: AtomicU64,
        running: Mutex<HashSet<u64>>,
        live: Mutex<HashSet<u64>>,
        entered: std::sync::Barrier,
        destroyed_while_running: std::sync::atomic::AtomicBool,
    }

    impl SlowEngine {
        fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
                running: Mutex::new(HashSet::new()),
                live: Mutex::new(HashSet::new()),
                entered: std::sync::Barrier::new(2),
                destroyed_while_running: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl AgentEngine for SlowEngine {
        fn create(&self, _agent_type: &str, _config: &str) -> Result<AgentHandle> {
            let raw = self.next.fetch_add(1, Ordering::SeqCst);
            self.live.lock().insert(raw);
            Ok(AgentHandle::from_raw(raw))
        }

        fn execute(&self, handle: &AgentHandle, input: &[u8]) -> Result<Vec<u8>> {
            self.running.lock().insert(handle.raw());
            self.entered.wait();
            std::thread::sleep(std::time::Duration::from_millis(150));
            self.running.lock().remove(&handle.raw());
            Ok(input.to_vec())
        }

        fn destroy(&self, handle: AgentHandle) {
            if self.running.lock().contains(&handle.raw()) {
                self.destroyed_while_running.store(true, Ordering::SeqCst);
            }
            self.live.lock().remove(&handle.raw());
        }
    }

    fn slow_handler() -> Arc<AgentHandler<SlowEngine>> {
        let handler = AgentHandler::new(SlowEngine::new(), NodeInfo::new("n", "h", 1));
        handler.handle(registration("a-1", "slow")).unwrap();
        Arc::new(handler)
    }

    fn run_job_in_background(
        handler: &Arc<AgentHandler<SlowEngine>>,
    ) -> std::thread::JoinHandle<JobResult> {
        let handler = handler.clone();
        std::thread::spawn(move || {
            handler
                .handle(job("a-1", b"payload"))
                .unwrap()
                .unwrap()
                .body()
                .unwrap()
        })
    }

    #[test]
    fn test_reregister_waits_for_running_job() {
        let handler = slow_handler();
        let running = run_job_in_background(&handler);

        handler.engine().entered.wait();
        handler.handle(registration("a-1", "slow")).unwrap();
        // The replaced handle is still alive while its job runs.
        assert!(handler.engine().live.lock().contains(&0));

        let result = running.join().unwrap();
        assert!(result.success);
        assert_eq!(result.output, b"payload");

        let engine = handler.engine();
        assert!(!engine.destroyed_while_running.load(Ordering::SeqCst));
        assert_eq!(*engine.live.lock(), HashSet::from([1]));
    }

    #[test]
    fn test_unregister_waits_for_running_job() {
        let handler = slow_handler();
        let running = run_job_in_background(&handler);

        handler.engine().entered.wait();
        assert!(handler.unregister("a-1"));
        assert_eq!(handler.agent_count(), 0);

        assert!(running.join().unwrap().success);
        let engine = handler.engine();
        assert!(!engine.destroyed_while_running.load(Ordering::SeqCst));
        assert!(engine.live.lock().is_empty());
    }
}
