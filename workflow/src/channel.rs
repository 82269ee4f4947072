//! Live status of one workflow execution.
//!
//! [`StatusChannel::open`] prefills the view with a one-shot fetch and joins
//! the execution's room over the shared realtime connection. Every handler
//! invocation for a subscription happens under that subscription's gate, so
//! calls are sequential, and once [`Subscription::close`] returns no handler
//! runs again. Handlers may close their own subscription.

use crate::connection::ConnectionManager;
use crate::error::ChannelError;
use crate::fetch::ExecutionSnapshot;
use crate::fetch::StatusSource;
use crate::protocol::ChannelVocabulary;
use crate::protocol::ExecutionId;
use crate::protocol::UpdateMessage;
use crate::status::ExecutionStatus;
use crate::status::LogEntry;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionPhase {
    /// Waiting for the connection; the join has not been sent yet.
    Opening,
    Live,
    /// A success status was observed and `on_finish` has run.
    Finished,
    Closed,
}

type LogHandler = Box<dyn FnMut(&LogEntry) + Send>;
type StatusHandler = Box<dyn FnMut(&ExecutionStatus) + Send>;
type FinishHandler = Box<dyn FnOnce() + Send>;
type ErrorHandler = Box<dyn FnMut(&ChannelError) + Send>;

/// Callbacks for one subscription. All of them are optional.
#[derive(Default)]
pub struct Handlers {
    on_log: Option<LogHandler>,
    on_status_change: Option<StatusHandler>,
    on_finish: Option<FinishHandler>,
    on_error: Option<ErrorHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_log(mut self, handler: impl FnMut(&LogEntry) + Send + 'static) -> Self {
        self.on_log = Some(Box::new(handler));
        self
    }

    pub fn on_status_change(
        mut self,
        handler: impl FnMut(&ExecutionStatus) + Send + 'static,
    ) -> Self {
        self.on_status_change = Some(Box::new(handler));
        self
    }

    pub fn on_finish(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(handler));
        self
    }

    /// Non-fatal problems: a failed initial fetch or a transport that gave
    /// up reconnecting.
    pub fn on_error(mut self, handler: impl FnMut(&ChannelError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_log", &self.on_log.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct ChannelState {
    phase: SubscriptionPhase,
    status: Option<ExecutionStatus>,
    logs: Vec<LogEntry>,
    finished: bool,
    snapshot: Option<ExecutionSnapshot>,
    prefill: Option<AbortHandle>,
}

struct CoreCell {
    state: RefCell<ChannelState>,
    handlers: RefCell<Handlers>,
}

pub(crate) struct SubscriptionCore {
    id: u64,
    execution_id: ExecutionId,
    vocabulary: ChannelVocabulary,
    gate: ReentrantMutex<CoreCell>,
}

impl SubscriptionCore {
    fn new(execution_id: ExecutionId, vocabulary: ChannelVocabulary, handlers: Handlers) -> Self {
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            execution_id,
            vocabulary,
            gate: ReentrantMutex::new(CoreCell {
                state: RefCell::new(ChannelState {
                    phase: SubscriptionPhase::Opening,
                    status: None,
                    logs: Vec::new(),
                    finished: false,
                    snapshot: None,
                    prefill: None,
                }),
                handlers: RefCell::new(handlers),
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub(crate) fn vocabulary(&self) -> ChannelVocabulary {
        self.vocabulary
    }

    fn phase(&self) -> SubscriptionPhase {
        self.gate.lock().state.borrow().phase
    }

    fn is_closed(cell: &CoreCell) -> bool {
        cell.state.borrow().phase == SubscriptionPhase::Closed
    }

    pub(crate) fn mark_live(&self) {
        let cell = self.gate.lock();
        let mut state = cell.state.borrow_mut();
        if state.phase == SubscriptionPhase::Opening {
            state.phase = SubscriptionPhase::Live;
        }
    }

    fn set_prefill(&self, task: AbortHandle) {
        let cell = self.gate.lock();
        let mut state = cell.state.borrow_mut();
        if state.phase == SubscriptionPhase::Closed {
            task.abort();
        } else if state.snapshot.is_none() {
            state.prefill = Some(task);
        }
    }

    pub(crate) fn deliver(&self, update: &UpdateMessage) {
        let cell = self.gate.lock();
        if Self::is_closed(&cell) {
            return;
        }
        if !update.is_for(&self.execution_id) {
            debug!(
                execution_id = %self.execution_id,
                other = update.execution_id().unwrap_or_default(),
                "ignoring update for another execution"
            );
            return;
        }
        self.mark_live();

        if let Some(entry) = update.log_entry() {
            cell.state.borrow_mut().logs.push(entry.clone());
            if let Some(on_log) = cell.handlers.borrow_mut().on_log.as_mut() {
                on_log(&entry);
            }
            if Self::is_closed(&cell) {
                return;
            }
        }

        if let Some(status) = update.effective_status() {
            self.apply_status(&cell, status);
        }
    }

    fn apply_status(&self, cell: &CoreCell, status: ExecutionStatus) {
        cell.state.borrow_mut().status = Some(status.clone());
        if let Some(on_status_change) = cell.handlers.borrow_mut().on_status_change.as_mut() {
            on_status_change(&status);
        }
        if !status.is_success() {
            return;
        }

        let on_finish = {
            let mut state = cell.state.borrow_mut();
            if state.finished || state.phase == SubscriptionPhase::Closed {
                return;
            }
            state.finished = true;
            state.phase = SubscriptionPhase::Finished;
            cell.handlers.borrow_mut().on_finish.take()
        };
        info!(execution_id = %self.execution_id, %status, "execution finished");
        if let Some(on_finish) = on_finish {
            on_finish();
        }
    }

    fn apply_snapshot(&self, snapshot: ExecutionSnapshot) {
        let cell = self.gate.lock();
        if Self::is_closed(&cell) {
            return;
        }
        let status = snapshot.status.clone();
        {
            let mut state = cell.state.borrow_mut();
            state.snapshot = Some(snapshot);
            state.prefill = None;
        }
        // Assets alone never finish a subscription, only an explicit status.
        if let Some(status) = status {
            self.apply_status(&cell, status);
        }
    }

    pub(crate) fn report_error(&self, error: &ChannelError) {
        let cell = self.gate.lock();
        if Self::is_closed(&cell) {
            return;
        }
        if let Some(on_error) = cell.handlers.borrow_mut().on_error.as_mut() {
            on_error(error);
        }
    }

    async fn prefill(&self, source: &dyn StatusSource) {
        match source.fetch(&self.execution_id).await {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(err) => {
                warn!(execution_id = %self.execution_id, "initial status fetch failed: {err}");
                self.report_error(&ChannelError::Fetch(err));
            }
        }
    }

    /// Returns true for the call that actually closed the subscription.
    fn close(&self) -> bool {
        let cell = self.gate.lock();
        {
            let mut state = cell.state.borrow_mut();
            if state.phase == SubscriptionPhase::Closed {
                return false;
            }
            state.phase = SubscriptionPhase::Closed;
            if let Some(prefill) = state.prefill.take() {
                prefill.abort();
            }
        }
        // Still borrowed when a handler closes its own subscription; the
        // handlers are then dropped with the subscription instead.
        if let Ok(mut handlers) = cell.handlers.try_borrow_mut() {
            *handlers = Handlers::default();
        }
        true
    }
}

/// Opens subscriptions that share one [`ConnectionManager`].
#[derive(Clone)]
pub struct StatusChannel {
    manager: ConnectionManager,
    source: Arc<dyn StatusSource>,
    vocabulary: ChannelVocabulary,
}

impl StatusChannel {
    pub fn new(manager: ConnectionManager, source: Arc<dyn StatusSource>) -> Self {
        Self {
            manager,
            source,
            vocabulary: ChannelVocabulary::default(),
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: ChannelVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Starts following `execution_id`. Must be called from within a Tokio
    /// runtime.
    pub fn open(
        &self,
        execution_id: impl Into<ExecutionId>,
        handlers: Handlers,
    ) -> Result<Subscription, ChannelError> {
        let execution_id = execution_id.into();
        if execution_id.is_empty() {
            return Err(ChannelError::EmptyExecutionId);
        }
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let core = Arc::new(SubscriptionCore::new(
            execution_id,
            self.vocabulary,
            handlers,
        ));
        let prefill_core = Arc::clone(&core);
        let source = Arc::clone(&self.source);
        let prefill = runtime.spawn(async move {
            prefill_core.prefill(source.as_ref()).await;
        });
        core.set_prefill(prefill.abort_handle());

        self.manager.acquire(Arc::clone(&core));
        info!(
            execution_id = %core.execution_id(),
            vocabulary = ?self.vocabulary,
            "opened status subscription"
        );
        Ok(Subscription {
            handle: SubscriptionHandle {
                core,
                manager: self.manager.clone(),
            },
        })
    }
}

/// Cloneable view of a subscription that can close it, e.g. from inside one
/// of its own handlers. Dropping a handle does not close anything.
#[derive(Clone)]
pub struct SubscriptionHandle {
    core: Arc<SubscriptionCore>,
    manager: ConnectionManager,
}

impl SubscriptionHandle {
    pub fn execution_id(&self) -> &ExecutionId {
        self.core.execution_id()
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.core.phase()
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.core.gate.lock().state.borrow().status.clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.core.gate.lock().state.borrow().logs.clone()
    }

    pub fn snapshot(&self) -> Option<ExecutionSnapshot> {
        self.core.gate.lock().state.borrow().snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.core.gate.lock().state.borrow().finished
    }

    /// Idempotent. After it returns no handler of this subscription runs.
    pub fn close(&self) {
        if self.core.close() {
            self.manager.release(self.core.id());
            debug!(execution_id = %self.core.execution_id(), "closed status subscription");
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("execution_id", self.execution_id())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Owning side of a subscription; closes it when dropped.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn execution_id(&self) -> &ExecutionId {
        self.handle.execution_id()
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.handle.phase()
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.handle.status()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.handle.logs()
    }

    pub fn snapshot(&self) -> Option<ExecutionSnapshot> {
        self.handle.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}
