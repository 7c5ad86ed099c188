// Domain data stores: one per screen kind, each tracking a single entity.
//
// A store owns its channel subscription and its in-flight HTTP fetches. Both
// report back through `next_update()`, which the caller drives in a loop; all
// state changes therefore happen on the caller's task, one at a time.
//
// HTTP fetches run as spawned tasks and carry the epoch and sequence number
// that were current when they were issued. A result from an older epoch is
// discarded, and a result for a slice that a newer push has already written
// is skipped.

pub mod hero_draft;
pub mod team_draft;
pub mod tournament;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use radiant_core::protocol::{Channel, SequenceCheck, SequenceTracker};
use radiant_core::Pk;
use radiant_ws::{ChannelEvent, ConnectionManager, ConnectionState, Subscription};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use hero_draft::HeroDraftStore;
pub use team_draft::TeamDraftStore;
pub use tournament::TournamentStore;

// ---------------------------------------------------------------------------
// Slices
// ---------------------------------------------------------------------------

/// Independently loaded part of a store's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slice {
    Metadata,
    Users,
    Teams,
    Games,
    Draft,
    Events,
    HeroDraft,
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slice::Metadata => "metadata",
            Slice::Users => "users",
            Slice::Teams => "teams",
            Slice::Games => "games",
            Slice::Draft => "draft",
            Slice::Events => "events",
            Slice::HeroDraft => "hero_draft",
        };
        f.write_str(name)
    }
}

/// Loading flags for one slice, for partial-loading UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceStatus {
    pub loading: bool,
    pub error: Option<String>,
    /// Holds data for the tracked entity, from HTTP or a push.
    pub loaded: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SliceStatuses(BTreeMap<Slice, SliceStatus>);

impl SliceStatuses {
    pub(crate) fn get(&self, slice: Slice) -> SliceStatus {
        self.0.get(&slice).cloned().unwrap_or_default()
    }

    pub(crate) fn start(&mut self, slice: Slice) {
        let status = self.0.entry(slice).or_default();
        status.loading = true;
        status.error = None;
    }

    pub(crate) fn loaded(&mut self, slice: Slice) {
        let status = self.0.entry(slice).or_default();
        status.loading = false;
        status.error = None;
        status.loaded = true;
    }

    pub(crate) fn failed(&mut self, slice: Slice, error: String) {
        let status = self.0.entry(slice).or_default();
        status.loading = false;
        status.error = Some(error);
    }

    /// Fetch finished without being applied.
    pub(crate) fn settled(&mut self, slice: Slice) {
        self.0.entry(slice).or_default().loading = false;
    }

    pub(crate) fn is_loaded(&self, slice: Slice) -> bool {
        self.0.get(&slice).is_some_and(|s| s.loaded)
    }

    pub(crate) fn any_loading(&self) -> bool {
        self.0.values().any(|s| s.loading)
    }

    pub(crate) fn clear(&mut self) {
        self.0.clear();
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// What one `next_update()` step changed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// Mirror of the channel's connection state.
    Connection(ConnectionState),
    /// A push message was merged.
    Pushed { kind: &'static str, sequence: Option<u64> },
    /// A countdown tick replaced the timing fields.
    Ticked,
    Loaded(Slice),
    LoadFailed { slice: Slice, error: String },
    /// A push already wrote this slice after the fetch was issued.
    StaleHttpSkipped(Slice),
    /// The fetch belonged to an entity that is no longer tracked.
    Discarded(Slice),
    /// The push frame failed validation.
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Fetch plumbing
// ---------------------------------------------------------------------------

/// An HTTP result on its way back to the store.
#[derive(Debug)]
pub struct Fetched<P> {
    pub tracked_id: Pk,
    pub epoch: u64,
    pub sequence_at_request: u64,
    pub payload: P,
}

/// Handed to a fetch task; tags each result with the request's context.
pub(crate) struct FetchSink<P> {
    tracked_id: Pk,
    epoch: u64,
    sequence_at_request: u64,
    tx: mpsc::UnboundedSender<Fetched<P>>,
}

impl<P> FetchSink<P> {
    pub(crate) fn send(&self, payload: P) {
        let fetched = Fetched {
            tracked_id: self.tracked_id,
            epoch: self.epoch,
            sequence_at_request: self.sequence_at_request,
            payload,
        };
        if self.tx.send(fetched).is_err() {
            debug!(tracked_id = self.tracked_id, "Store dropped before fetch completed");
        }
    }
}

pub(crate) enum LinkEvent<P> {
    Channel(ChannelEvent),
    Fetched(Fetched<P>),
}

/// A store's connection to the outside: at most one channel subscription,
/// plus the queue its fetch tasks report into.
pub(crate) struct Link<P> {
    manager: ConnectionManager,
    subscription: Option<Subscription>,
    fetch_tx: mpsc::UnboundedSender<Fetched<P>>,
    fetch_rx: mpsc::UnboundedReceiver<Fetched<P>>,
}

impl<P: Send + 'static> Link<P> {
    pub(crate) fn new(manager: ConnectionManager) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            manager,
            subscription: None,
            fetch_tx,
            fetch_rx,
        }
    }

    pub(crate) fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Subscribe to `channel`, dropping any previous subscription first.
    pub(crate) fn connect(&mut self, channel: Channel) {
        self.subscription = None;
        self.subscription = Some(self.manager.subscribe(channel));
    }

    pub(crate) fn disconnect(&mut self) {
        self.subscription = None;
    }

    pub(crate) fn channel(&self) -> Option<&Channel> {
        self.subscription.as_ref().map(Subscription::channel)
    }

    /// Run `job` on a new task. Everything it sends is tagged with the
    /// given request context.
    pub(crate) fn spawn<F, Fut>(&self, tracked_id: Pk, epoch: u64, sequence_at_request: u64, job: F)
    where
        F: FnOnce(FetchSink<P>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sink = FetchSink {
            tracked_id,
            epoch,
            sequence_at_request,
            tx: self.fetch_tx.clone(),
        };
        tokio::spawn(job(sink));
    }

    /// Wait for the next channel event or fetch result. `None` when no
    /// channel is subscribed.
    pub(crate) async fn next(&mut self) -> Option<LinkEvent<P>> {
        let subscription = self.subscription.as_mut()?;
        tokio::select! {
            event = subscription.recv() => event.map(LinkEvent::Channel),
            Some(fetched) = self.fetch_rx.recv() => Some(LinkEvent::Fetched(fetched)),
        }
    }
}

/// Record a push's sequence on the store's tracker, logging regressions.
pub(crate) fn observe_sequence(
    tracker: &mut SequenceTracker,
    store: &'static str,
    tracked_id: Option<Pk>,
    sequence: Option<u64>,
) {
    if let SequenceCheck::OutOfOrder { last } = tracker.observe(sequence) {
        warn!(
            store,
            tracked_id = ?tracked_id,
            sequence = ?sequence,
            last_sequence = last,
            "Out-of-order push; applying anyway"
        );
    }
}

/// Outcome of checking a fetch result against the store's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchVerdict {
    Apply,
    Discard,
    SkipStale,
}

/// Decide whether a fetch result may be applied.
///
/// Results issued under another epoch are discarded. A result for a slice
/// that already holds data is skipped when the store's sequence moved past
/// the value captured at request time, since a push then wrote newer state.
pub(crate) fn judge_fetch<P>(
    fetched: &Fetched<P>,
    epoch: u64,
    sequence: &SequenceTracker,
    statuses: &SliceStatuses,
    slice: Slice,
) -> FetchVerdict {
    if fetched.epoch != epoch {
        return FetchVerdict::Discard;
    }
    if sequence.last() > fetched.sequence_at_request && statuses.is_loaded(slice) {
        return FetchVerdict::SkipStale;
    }
    FetchVerdict::Apply
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
