// Connection manager: one socket per channel, shared by every subscriber of
// that channel.
//
// The registry is the only owner of sockets. Each live channel runs one tokio
// task that connects, forwards frames and schedules reconnects; the subscriber
// count decides when that task exists. Subscribers receive frames and state
// changes through their own unbounded queue, so a subscriber that stops
// reading never blocks the others.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use radiant_core::config::ReconnectConfig;
use radiant_core::protocol::{self, Channel, SequenceCheck, SequenceTracker};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::Connector;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle of one channel's socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Socket dropped; retry number `attempt` starts after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries exhausted. Terminal until `reconnect` or a fresh subscriber.
    Error { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt} in {}ms)", delay.as_millis())
            }
            ConnectionState::Error { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A parsed JSON frame, shared between all subscribers of the channel.
    Message(Arc<Value>),
    State(ConnectionState),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct ChannelEntry {
    url: String,
    state: ConnectionState,
    subscribers: BTreeMap<u64, mpsc::UnboundedSender<ChannelEvent>>,
    /// Retries scheduled since the last successful open.
    attempt: u32,
    sequence: SequenceTracker,
    /// Identifies the task allowed to write this entry; bumped on restart.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ChannelEntry {
    fn new(url: String) -> Self {
        Self {
            url,
            state: ConnectionState::Disconnected,
            subscribers: BTreeMap::new(),
            attempt: 0,
            sequence: SequenceTracker::new(),
            generation: 0,
            task: None,
        }
    }

    fn set_state(&mut self, channel: &Channel, state: ConnectionState) {
        debug!(channel = %channel, state = %state, "Channel state changed");
        self.state = state.clone();
        self.broadcast(channel, ChannelEvent::State(state));
    }

    fn broadcast(&self, channel: &Channel, event: ChannelEvent) {
        for (id, tx) in &self.subscribers {
            if tx.send(event.clone()).is_err() {
                warn!(channel = %channel, subscription = id, "Subscriber stopped listening; skipping");
            }
        }
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct Registry {
    channels: HashMap<Channel, ChannelEntry>,
    next_subscription: u64,
    next_generation: u64,
}

struct Shared {
    ws_base_url: String,
    reconnect: ReconnectConfig,
    connector: Arc<dyn Connector>,
    registry: Mutex<Registry>,
}

/// What the channel task does after its socket closed.
enum AfterClose {
    Retry(Duration),
    Stop,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a fresh channel task for `entry`, retiring any previous one.
    fn start(self: &Arc<Self>, registry: &mut Registry, channel: &Channel) {
        registry.next_generation += 1;
        let generation = registry.next_generation;
        let Some(entry) = registry.channels.get_mut(channel) else {
            return;
        };
        entry.stop_task();
        entry.attempt = 0;
        entry.generation = generation;
        entry.set_state(channel, ConnectionState::Connecting);
        info!(channel = %channel, url = %entry.url, "Opening channel");

        let shared = Arc::clone(self);
        let task_channel = channel.clone();
        let url = entry.url.clone();
        entry.task = Some(tokio::spawn(async move {
            run_channel(shared, task_channel, url, generation).await;
        }));
    }

    fn on_open(&self, channel: &Channel, generation: u64) -> bool {
        let mut registry = self.registry();
        let Some(entry) = live_entry(&mut registry, channel, generation) else {
            return false;
        };
        entry.attempt = 0;
        entry.set_state(channel, ConnectionState::Connected);
        info!(channel = %channel, "Channel connected");
        true
    }

    fn on_frame(&self, channel: &Channel, generation: u64, text: &str) {
        let frame = match protocol::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Dropping unparseable frame");
                return;
            }
        };
        let sequence = protocol::sequence_of(&frame);

        let mut registry = self.registry();
        let Some(entry) = live_entry(&mut registry, channel, generation) else {
            return;
        };
        if let SequenceCheck::OutOfOrder { last } = entry.sequence.observe(sequence) {
            warn!(
                channel = %channel,
                sequence = ?sequence,
                last_sequence = last,
                "Out-of-order frame; delivering anyway"
            );
        }
        debug!(channel = %channel, kind = ?protocol::message_type(&frame), "Dispatching frame");
        entry.broadcast(channel, ChannelEvent::Message(Arc::new(frame)));
    }

    fn on_close(&self, channel: &Channel, generation: u64, reason: String) -> AfterClose {
        let mut registry = self.registry();
        let Some(entry) = live_entry(&mut registry, channel, generation) else {
            return AfterClose::Stop;
        };

        if entry.subscribers.is_empty() {
            info!(channel = %channel, "Channel closed with no subscribers; removing");
            registry.channels.remove(channel);
            return AfterClose::Stop;
        }

        if entry.attempt >= self.reconnect.max_attempts {
            warn!(
                channel = %channel,
                attempts = entry.attempt,
                reason = %reason,
                "Giving up on channel"
            );
            entry.task = None;
            let reason = format!(
                "gave up after {} reconnect attempts: {reason}",
                entry.attempt
            );
            entry.set_state(channel, ConnectionState::Error { reason });
            return AfterClose::Stop;
        }

        let delay = self.reconnect.delay_for_attempt(entry.attempt);
        entry.attempt += 1;
        info!(
            channel = %channel,
            attempt = entry.attempt,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Scheduling reconnect"
        );
        let attempt = entry.attempt;
        entry.set_state(channel, ConnectionState::Reconnecting { attempt, delay });
        AfterClose::Retry(delay)
    }

    /// Flip a channel back to `Connecting` once its backoff timer fired.
    fn before_retry(&self, channel: &Channel, generation: u64) -> bool {
        let mut registry = self.registry();
        let Some(entry) = live_entry(&mut registry, channel, generation) else {
            return false;
        };
        entry.set_state(channel, ConnectionState::Connecting);
        true
    }
}

/// The entry for `channel`, if it is still owned by task `generation`.
fn live_entry<'a>(
    registry: &'a mut Registry,
    channel: &Channel,
    generation: u64,
) -> Option<&'a mut ChannelEntry> {
    registry
        .channels
        .get_mut(channel)
        .filter(|entry| entry.generation == generation)
}

async fn run_channel(shared: Arc<Shared>, channel: Channel, url: String, generation: u64) {
    loop {
        let reason = match shared.connector.connect(&url).await {
            Ok(mut frames) => {
                if !shared.on_open(&channel, generation) {
                    return;
                }
                let mut reason = "closed by server".to_string();
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(text) => shared.on_frame(&channel, generation, &text),
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Socket error");
                            reason = e.to_string();
                            break;
                        }
                    }
                }
                reason
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "Connect failed");
                e.to_string()
            }
        };

        match shared.on_close(&channel, generation, reason) {
            AfterClose::Retry(delay) => {
                tokio::time::sleep(delay).await;
                if !shared.before_retry(&channel, generation) {
                    return;
                }
            }
            AfterClose::Stop => return,
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Registry of channel sockets, reference counted by subscriber.
///
/// Cloning is cheap and every clone talks to the same registry; build one per
/// session and hand clones to the stores. Methods that may open a socket must
/// run inside a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("ws_base_url", &self.inner.ws_base_url)
            .field("channels", &self.channels())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        ws_base_url: impl Into<String>,
        reconnect: ReconnectConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                ws_base_url: ws_base_url.into(),
                reconnect,
                connector,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Socket URL for `channel`.
    pub fn url_for(&self, channel: &Channel) -> String {
        channel.url(&self.inner.ws_base_url)
    }

    /// Join `channel`. The first subscriber opens the socket; later ones
    /// share it and immediately receive the current state. A channel sitting
    /// in `Error` is restarted.
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.inner.registry();
        registry.next_subscription += 1;
        let id = registry.next_subscription;

        let url = self.url_for(&channel);
        let entry = registry
            .channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelEntry::new(url));
        entry.subscribers.insert(id, tx.clone());
        let count = entry.subscribers.len();
        debug!(channel = %channel, subscription = id, subscribers = count, "Subscribed");

        if entry.task.is_none() {
            self.inner.start(&mut registry, &channel);
        } else if tx.send(ChannelEvent::State(entry.state.clone())).is_err() {
            debug!(channel = %channel, "Subscriber dropped before first event");
        }
        drop(registry);

        Subscription {
            id,
            channel,
            manager: self.clone(),
            rx,
        }
    }

    /// Leave `channel`. When the last subscriber leaves, any pending reconnect
    /// is cancelled, the socket is dropped and the entry removed.
    fn unsubscribe(&self, channel: &Channel, id: u64) {
        let mut registry = self.inner.registry();
        let Some(entry) = registry.channels.get_mut(channel) else {
            return;
        };
        if entry.subscribers.remove(&id).is_none() {
            return;
        }
        debug!(channel = %channel, subscription = id, subscribers = entry.subscribers.len(), "Unsubscribed");

        if entry.subscribers.is_empty() {
            entry.stop_task();
            registry.channels.remove(channel);
            info!(channel = %channel, "Last subscriber left; channel closed");
        }
    }

    /// Force a fresh connection now: reset the retry counter, drop any socket
    /// or pending timer, and connect without backoff. Returns `false` when
    /// nobody is subscribed to `channel`.
    pub fn reconnect(&self, channel: &Channel) -> bool {
        let mut registry = self.inner.registry();
        if !registry.channels.contains_key(channel) {
            return false;
        }
        info!(channel = %channel, "Manual reconnect");
        self.inner.start(&mut registry, channel);
        true
    }

    pub fn state(&self, channel: &Channel) -> ConnectionState {
        self.inner
            .registry()
            .channels
            .get(channel)
            .map(|entry| entry.state.clone())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner
            .registry()
            .channels
            .get(channel)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Last sequence number seen on `channel`, 0 when none.
    pub fn last_sequence(&self, channel: &Channel) -> u64 {
        self.inner
            .registry()
            .channels
            .get(channel)
            .map_or(0, |entry| entry.sequence.last())
    }

    /// Channels with at least one subscriber, sorted.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.inner.registry().channels.keys().cloned().collect();
        channels.sort();
        channels
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live membership in one channel. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    channel: Channel,
    manager: ConnectionManager,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Next frame or state change. Pending forever while the channel is idle.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.channel, self.id);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
