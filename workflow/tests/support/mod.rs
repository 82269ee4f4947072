#![allow(dead_code)]

use async_trait::async_trait;
use docflow_workflow::ConnectionManager;
use docflow_workflow::ExecutionId;
use docflow_workflow::ExecutionSnapshot;
use docflow_workflow::FetchError;
use docflow_workflow::StatusChannel;
use docflow_workflow::StatusSource;
use docflow_workflow::Transport;
use docflow_workflow::TransportError;
use docflow_workflow::TransportEvent;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;

/// In-memory transport that records what the manager asks of it.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    auto_connect: bool,
}

#[derive(Default)]
struct MockState {
    events: Option<UnboundedSender<TransportEvent>>,
    connects: usize,
    disconnects: usize,
    emitted: Vec<(String, Value)>,
}

impl MockTransport {
    /// Reports `Connected` as soon as `connect` is called.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            auto_connect: true,
        })
    }

    /// Stays silent until the test pushes events.
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, event: TransportEvent) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(event);
        }
    }

    pub fn update(&self, event: &str, payload: Value) {
        self.push(TransportEvent::Message {
            event: event.to_string(),
            payload,
        });
    }

    pub fn workflow_update(&self, payload: Value) {
        self.update("workflow_update", payload);
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state.lock().emitted.clone()
    }

    pub fn joins_for(&self, key: &str, id: &str) -> usize {
        self.emitted()
            .iter()
            .filter(|(_, payload)| payload.get(key).and_then(Value::as_str) == Some(id))
            .count()
    }
}

impl Transport for MockTransport {
    fn connect(&self, events: UnboundedSender<TransportEvent>) {
        let mut state = self.state.lock();
        state.connects += 1;
        if self.auto_connect {
            let _ = events.send(TransportEvent::Connected { reconnect: false });
        }
        state.events = Some(events);
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.events = None;
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(TransportError::NotConnected);
        }
        state.emitted.push((event.to_string(), payload));
        Ok(())
    }
}

/// Status source answering from a canned result, optionally held until the
/// test releases it.
pub struct MockSource {
    result: Mutex<Option<Result<ExecutionSnapshot, FetchError>>>,
    gate: Option<Arc<Notify>>,
}

impl MockSource {
    pub fn empty() -> Arc<Self> {
        Self::answering(Ok(ExecutionSnapshot::default()))
    }

    pub fn answering(result: Result<ExecutionSnapshot, FetchError>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Some(result)),
            gate: None,
        })
    }

    pub fn held(result: Result<ExecutionSnapshot, FetchError>, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Some(result)),
            gate: Some(gate),
        })
    }
}

#[async_trait]
impl StatusSource for MockSource {
    async fn fetch(&self, _execution_id: &ExecutionId) -> Result<ExecutionSnapshot, FetchError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.result
            .lock()
            .take()
            .unwrap_or_else(|| Ok(ExecutionSnapshot::default()))
    }
}

pub fn channel(transport: &Arc<MockTransport>, source: Arc<MockSource>) -> StatusChannel {
    let transport: Arc<dyn Transport> = transport.clone();
    StatusChannel::new(ConnectionManager::new(transport), source)
}

/// Lets the dispatcher and prefill tasks drain on the current-thread runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Shared recorder of handler invocations, in call order.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}
