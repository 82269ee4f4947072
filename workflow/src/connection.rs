use crate::channel::SubscriptionCore;
use crate::error::ChannelError;
use crate::error::TransportError;
use crate::protocol::UpdateMessage;
use crate::transport::Transport;
use crate::transport::TransportEvent;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Shares one realtime connection between any number of subscriptions.
///
/// The connection is opened when the first subscription is registered and
/// closed when the last one is released. Every (re)connect re-sends the join
/// of each registered subscription.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
}

#[derive(Default)]
struct ManagerState {
    routes: BTreeMap<u64, Arc<SubscriptionCore>>,
    connected: bool,
    /// Set once the transport stopped retrying; the next registration
    /// starts a fresh connection.
    stopped: bool,
    dispatcher: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// Number of subscriptions currently holding the connection.
    pub fn live_subscriptions(&self) -> usize {
        self.inner.state.lock().routes.len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub(crate) fn acquire(&self, core: Arc<SubscriptionCore>) {
        let connected = {
            let mut state = self.inner.state.lock();
            let needs_connect = state.routes.is_empty() || state.stopped;
            state.routes.insert(core.id(), Arc::clone(&core));
            if needs_connect {
                if let Some(previous) = state.dispatcher.take() {
                    previous.abort();
                }
                let (events_tx, events_rx) = mpsc::unbounded_channel();
                state.connected = false;
                state.stopped = false;
                state.dispatcher = Some(tokio::spawn(dispatch(
                    Arc::downgrade(&self.inner),
                    events_rx,
                )));
                info!("opening shared realtime connection");
                self.inner.transport.connect(events_tx);
            }
            state.connected
        };
        if connected {
            self.inner.join(&core);
        }
    }

    pub(crate) fn release(&self, id: u64) {
        let mut state = self.inner.state.lock();
        if state.routes.remove(&id).is_none() {
            return;
        }
        if !state.routes.is_empty() {
            debug!(remaining = state.routes.len(), "connection still in use");
            return;
        }
        state.connected = false;
        if let Some(dispatcher) = state.dispatcher.take() {
            dispatcher.abort();
        }
        info!("closing shared realtime connection");
        self.inner.transport.disconnect();
    }
}

impl ManagerInner {
    fn routes_where(&self, keep: impl Fn(&SubscriptionCore) -> bool) -> Vec<Arc<SubscriptionCore>> {
        self.state
            .lock()
            .routes
            .values()
            .filter(|core| keep(core))
            .cloned()
            .collect()
    }

    fn join(&self, core: &SubscriptionCore) {
        let vocabulary = core.vocabulary();
        let payload = vocabulary.join_payload(core.execution_id());
        match self.transport.emit(vocabulary.join_event(), payload) {
            Ok(()) => {
                debug!(execution_id = %core.execution_id(), event = vocabulary.join_event(), "joined");
                core.mark_live();
            }
            Err(err) => warn!(
                execution_id = %core.execution_id(),
                "join failed, retrying on next connect: {err}"
            ),
        }
    }
}

async fn dispatch(inner: Weak<ManagerInner>, mut events: UnboundedReceiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Connected { reconnect } => {
                inner.state.lock().connected = true;
                let routes = inner.routes_where(|_| true);
                info!(reconnect, subscriptions = routes.len(), "realtime connection ready");
                for core in &routes {
                    inner.join(core);
                }
            }
            TransportEvent::Disconnected { reason } => {
                inner.state.lock().connected = false;
                info!(%reason, "realtime connection interrupted");
            }
            TransportEvent::GaveUp { attempts } => {
                {
                    let mut state = inner.state.lock();
                    state.connected = false;
                    state.stopped = true;
                }
                let error = ChannelError::Transport(TransportError::GaveUp { attempts });
                for core in inner.routes_where(|_| true) {
                    core.report_error(&error);
                }
            }
            TransportEvent::Message { event, payload } => {
                let routes = inner.routes_where(|core| core.vocabulary().update_event() == event);
                if routes.is_empty() {
                    debug!(%event, "no subscription for event");
                    continue;
                }
                let update = match UpdateMessage::from_value(payload) {
                    Ok(update) => update,
                    Err(err) => {
                        warn!(%event, "dropping malformed update: {err}");
                        continue;
                    }
                };
                for core in routes {
                    core.deliver(&update);
                }
            }
        }
    }
}
