//! Anchor sharing coordinator.
//!
//! Two independent branches run per perception session:
//!
//! ```text
//! creation:  Idle -> AwaitingLocalMark -> PendingReadiness -> Persisting -> Persisted -> Reported
//! discovery: NotStarted -> Locating -> Located -> Finished
//! ```
//!
//! The session feeds [`SessionEvent`]s in order through [`AnchorSharingCoordinator::run`].
//! User actions (`mark_point`, `attach_note`, `cancel_mark`) may interleave
//! with those events at any point. Cloud and index calls run on spawned
//! tasks so event handling never waits on the network. Outcomes are
//! published as [`CoordinatorEvent`]s.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anchorshare_protocol::LocateStatus;
use anchorshare_protocol::NOTE_PROPERTY_KEY;
use anchorshare_utils_readiness::ReadinessTracker;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::cloud::AnchorLocatedEvent;
use crate::cloud::CloudAnchorService;
use crate::cloud::CloudError;
use crate::config::ClientConfig;
use crate::index_client::AnchorIndexApi;
use crate::record::AnchorRecord;
use crate::record::PoseHandle;
use crate::watcher::LocateSession;
use crate::watcher::WatchBatch;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Input pushed by the perception session, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    /// A frame was processed; `progress` is the latest create-progress value.
    Updated { progress: f32 },
    /// The session understands the environment well enough to start locating.
    Stabilized,
    /// The session is gone. Records and pending marks are dropped.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreationPhase {
    Idle,
    /// A point was marked; waiting for the user's note.
    AwaitingLocalMark,
    PendingReadiness,
    Persisting,
    Persisted { anchor_id: String },
    Reported { anchor_id: String },
}

impl CreationPhase {
    fn accepts_new_mark(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Persisted { .. } | Self::Reported { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    NotStarted,
    Locating,
    /// At least one anchor was located; the watcher may still report more.
    Located,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    AnchorSaved(AnchorRecord),
    AnchorReported {
        anchor_id: String,
        grouping_key: String,
    },
    /// The anchor exists in the cloud but could not be added to the index.
    ReportFailed {
        anchor_id: String,
        grouping_key: String,
        error: String,
    },
    SaveFailed {
        note: String,
        error: String,
    },
    /// A mark waited longer than the configured bound for readiness.
    SaveAbandoned {
        note: String,
        waited: Duration,
    },
    AnchorLocated(AnchorRecord),
    DiscoveryFinished {
        located: usize,
        skipped: usize,
    },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("an anchor save is already in progress")]
    SaveInProgress,

    #[error("no marked point is waiting for a note")]
    NoPendingMark,

    #[error("note must not be empty")]
    EmptyNote,

    #[error("perception session has ended")]
    SessionEnded,
}

struct CoordinatorState {
    phase: CreationPhase,
    /// Bumped on every mark; stale task results compare against it.
    save_id: u64,
    draft: Option<AnchorRecord>,
    pending_since: Option<Instant>,
    discovery: DiscoveryPhase,
    records: HashMap<String, AnchorRecord>,
    ended: bool,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            phase: CreationPhase::Idle,
            save_id: 0,
            draft: None,
            pending_since: None,
            discovery: DiscoveryPhase::NotStarted,
            records: HashMap::new(),
            ended: false,
        }
    }

    fn is_current(&self, save_id: u64) -> bool {
        !self.ended && self.save_id == save_id
    }

    fn reset_creation(&mut self) {
        self.phase = CreationPhase::Idle;
        self.draft = None;
        self.pending_since = None;
    }
}

struct Inner {
    config: ClientConfig,
    cloud: Arc<dyn CloudAnchorService>,
    index: Arc<dyn AnchorIndexApi>,
    readiness: ReadinessTracker,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<CoordinatorEvent>,
}

/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct AnchorSharingCoordinator {
    inner: Arc<Inner>,
}

impl AnchorSharingCoordinator {
    pub fn new(
        config: ClientConfig,
        cloud: Arc<dyn CloudAnchorService>,
        index: Arc<dyn AnchorIndexApi>,
    ) -> Self {
        let readiness = ReadinessTracker::with_threshold(config.readiness_threshold);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                cloud,
                index,
                readiness,
                state: Mutex::new(CoordinatorState::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.inner.readiness
    }

    pub fn grouping_key(&self) -> &str {
        &self.inner.config.grouping_key
    }

    pub async fn creation_phase(&self) -> CreationPhase {
        self.inner.state.lock().await.phase.clone()
    }

    pub async fn discovery_phase(&self) -> DiscoveryPhase {
        self.inner.state.lock().await.discovery
    }

    /// Saved and located anchors known in this session.
    pub async fn records(&self) -> Vec<AnchorRecord> {
        self.inner.state.lock().await.records.values().cloned().collect()
    }

    pub async fn is_ended(&self) -> bool {
        self.inner.state.lock().await.ended
    }

    /// Consume session events until the session ends or the sender is dropped.
    pub async fn run(&self, mut session: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = session.recv().await {
            self.handle_session_event(event).await;
            if event == SessionEvent::Ended {
                return;
            }
        }
        tracing::debug!("session event source closed");
        self.handle_session_event(SessionEvent::Ended).await;
    }

    pub async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Updated { progress } => {
                self.inner.readiness.update(progress);
                self.on_tick().await;
            }
            SessionEvent::Stabilized => self.on_stabilized().await,
            SessionEvent::Ended => self.on_ended().await,
        }
    }

    /// The user marked a physical point. Only one save may be in flight.
    pub async fn mark_point(&self, pose: PoseHandle) -> Result<(), CoordinatorError> {
        let mut state = self.inner.state.lock().await;
        if state.ended {
            return Err(CoordinatorError::SessionEnded);
        }
        if !state.phase.accepts_new_mark() {
            return Err(CoordinatorError::SaveInProgress);
        }
        state.save_id += 1;
        state.draft = Some(AnchorRecord::draft(self.grouping_key(), pose));
        state.phase = CreationPhase::AwaitingLocalMark;
        tracing::debug!(save_id = state.save_id, %pose, "point marked");
        Ok(())
    }

    /// Attach the note to the marked point and start waiting for readiness.
    pub async fn attach_note(&self, note: impl Into<String>) -> Result<(), CoordinatorError> {
        let note = note.into();
        let mut state = self.inner.state.lock().await;
        if state.ended {
            return Err(CoordinatorError::SessionEnded);
        }
        if state.phase != CreationPhase::AwaitingLocalMark {
            return Err(CoordinatorError::NoPendingMark);
        }
        if note.trim().is_empty() {
            return Err(CoordinatorError::EmptyNote);
        }
        let Some(draft) = state.draft.as_mut() else {
            return Err(CoordinatorError::NoPendingMark);
        };
        draft.note = note;
        state.phase = CreationPhase::PendingReadiness;
        state.pending_since = Some(Instant::now());
        tracing::debug!(save_id = state.save_id, "waiting for readiness");

        if let Some(limit) = self.inner.config.pending_readiness_timeout() {
            let this = self.clone();
            let save_id = state.save_id;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                this.abandon_if_pending(save_id).await;
            });
        }
        Ok(())
    }

    /// Drop a marked point that has no note yet.
    pub async fn cancel_mark(&self) -> Result<(), CoordinatorError> {
        let mut state = self.inner.state.lock().await;
        if state.phase != CreationPhase::AwaitingLocalMark {
            return Err(CoordinatorError::NoPendingMark);
        }
        state.reset_creation();
        tracing::debug!(save_id = state.save_id, "mark cancelled");
        Ok(())
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn on_tick(&self) {
        let mut state = self.inner.state.lock().await;
        if state.ended || state.phase != CreationPhase::PendingReadiness {
            return;
        }
        if !self.inner.readiness.is_ready() {
            return;
        }
        let Some(draft) = state.draft.clone() else {
            state.reset_creation();
            return;
        };
        let Some(pose) = draft.local_pose else {
            state.reset_creation();
            return;
        };
        state.phase = CreationPhase::Persisting;
        let save_id = state.save_id;
        tracing::info!(
            save_id,
            progress = self.inner.readiness.progress(),
            "environment ready, saving anchor"
        );
        drop(state);

        let this = self.clone();
        tokio::spawn(async move {
            this.persist(save_id, pose, draft.note).await;
        });
    }

    async fn abandon_if_pending(&self, save_id: u64) {
        let mut state = self.inner.state.lock().await;
        if !state.is_current(save_id) || state.phase != CreationPhase::PendingReadiness {
            return;
        }
        let waited = state
            .pending_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        let note = state
            .draft
            .as_ref()
            .map(|draft| draft.note.clone())
            .unwrap_or_default();
        state.reset_creation();
        drop(state);

        tracing::warn!(
            grouping_key = %self.grouping_key(),
            ?waited,
            "gave up waiting for readiness, mark discarded"
        );
        self.emit(CoordinatorEvent::SaveAbandoned { note, waited });
    }

    async fn persist(&self, save_id: u64, pose: PoseHandle, note: String) {
        // Readiness has no memory; it may have dropped since the tick.
        if !self.inner.readiness.is_ready() {
            let mut state = self.inner.state.lock().await;
            if state.is_current(save_id) && state.phase == CreationPhase::Persisting {
                state.phase = CreationPhase::PendingReadiness;
                tracing::debug!(save_id, "readiness lost before save, waiting again");
            }
            return;
        }

        let grouping_key = self.grouping_key().to_string();
        let properties = HashMap::from([(NOTE_PROPERTY_KEY.to_string(), note.clone())]);
        let result = bounded(
            self.inner.config.request_timeout(),
            "create_anchor",
            self.inner.cloud.create_anchor(pose, &properties),
        )
        .await;

        let anchor_id = match result {
            Ok(anchor_id) => anchor_id,
            Err(e) => {
                tracing::error!(grouping_key, error = %e, "anchor save failed");
                let mut state = self.inner.state.lock().await;
                if state.is_current(save_id) {
                    state.reset_creation();
                }
                drop(state);
                self.emit(CoordinatorEvent::SaveFailed {
                    note,
                    error: e.to_string(),
                });
                return;
            }
        };

        let record = AnchorRecord {
            id: Some(anchor_id.clone()),
            grouping_key: grouping_key.clone(),
            note,
            local_pose: Some(pose),
        };
        {
            let mut state = self.inner.state.lock().await;
            if !state.is_current(save_id) {
                tracing::warn!(
                    anchor_id,
                    grouping_key,
                    "anchor saved after session ended, not reported to index"
                );
                return;
            }
            state.phase = CreationPhase::Persisted {
                anchor_id: anchor_id.clone(),
            };
            state.draft = None;
            state.pending_since = None;
            state.records.insert(anchor_id.clone(), record.clone());
        }
        tracing::info!(anchor_id, grouping_key, "anchor saved");
        self.emit(CoordinatorEvent::AnchorSaved(record));

        self.report(save_id, anchor_id, grouping_key).await;
    }

    async fn report(&self, save_id: u64, anchor_id: String, grouping_key: String) {
        match self.inner.index.append(&grouping_key, &anchor_id).await {
            Ok(()) => {
                let mut state = self.inner.state.lock().await;
                let still_persisted = matches!(
                    &state.phase,
                    CreationPhase::Persisted { anchor_id: current } if *current == anchor_id
                );
                if state.is_current(save_id) && still_persisted {
                    state.phase = CreationPhase::Reported {
                        anchor_id: anchor_id.clone(),
                    };
                }
                drop(state);
                tracing::info!(anchor_id, grouping_key, "anchor reported to index");
                self.emit(CoordinatorEvent::AnchorReported {
                    anchor_id,
                    grouping_key,
                });
            }
            Err(e) => {
                // The anchor stays saved in the cloud but is not discoverable by key.
                tracing::error!(
                    anchor_id,
                    grouping_key,
                    error = %e,
                    "failed to report anchor to index"
                );
                self.emit(CoordinatorEvent::ReportFailed {
                    anchor_id,
                    grouping_key,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn on_stabilized(&self) {
        let mut state = self.inner.state.lock().await;
        if state.ended || state.discovery != DiscoveryPhase::NotStarted {
            return;
        }
        state.discovery = DiscoveryPhase::Locating;
        drop(state);

        let this = self.clone();
        tokio::spawn(async move {
            this.discover().await;
        });
    }

    async fn discover(&self) {
        let grouping_key = self.grouping_key().to_string();
        tracing::debug!(grouping_key, "looking up anchors for group");

        let identifiers = match self.inner.index.lookup(&grouping_key).await {
            Ok(identifiers) => identifiers,
            Err(e) if e.is_not_found() => {
                tracing::info!(grouping_key, "no anchors saved for group yet");
                self.finish_discovery(0, 0).await;
                return;
            }
            Err(e) => {
                tracing::warn!(grouping_key, error = %e, "anchor lookup failed");
                self.finish_discovery(0, 0).await;
                return;
            }
        };

        let batch = WatchBatch::split(identifiers, self.inner.config.max_watcher_ids);
        let skipped = batch.skipped.len();
        let started = bounded(
            self.inner.config.request_timeout(),
            "create_watcher",
            LocateSession::start(self.inner.cloud.as_ref(), &batch),
        )
        .await;
        let mut session = match started {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(grouping_key, error = %e, "could not start watcher");
                self.finish_discovery(0, skipped).await;
                return;
            }
        };

        let mut located = 0;
        while let Some(outcome) = session.next_outcome().await {
            match self.on_locate_outcome(outcome).await {
                Some(true) => located += 1,
                Some(false) => {}
                None => return,
            }
        }
        tracing::debug!(
            grouping_key,
            unresolved = session.unresolved(),
            "watcher closed"
        );
        self.finish_discovery(located, skipped).await;
    }

    /// `Some(true)` when a new record was added, `None` once the session ended.
    async fn on_locate_outcome(&self, outcome: AnchorLocatedEvent) -> Option<bool> {
        let anchor_id = outcome.identifier;
        match outcome.status {
            LocateStatus::Located => {
                let Some(anchor) = outcome.anchor else {
                    tracing::warn!(anchor_id, "located event without anchor");
                    return Some(false);
                };
                let record = AnchorRecord {
                    id: Some(anchor.identifier),
                    grouping_key: self.grouping_key().to_string(),
                    note: anchor
                        .properties
                        .get(NOTE_PROPERTY_KEY)
                        .cloned()
                        .unwrap_or_default(),
                    local_pose: Some(anchor.pose),
                };

                let mut state = self.inner.state.lock().await;
                if state.ended {
                    return None;
                }
                if state.records.contains_key(&anchor_id) {
                    tracing::debug!(anchor_id, "located anchor already known");
                    return Some(false);
                }
                state.records.insert(anchor_id.clone(), record.clone());
                state.discovery = DiscoveryPhase::Located;
                drop(state);

                tracing::info!(anchor_id, "anchor located");
                self.emit(CoordinatorEvent::AnchorLocated(record));
                Some(true)
            }
            LocateStatus::AlreadyTracked => {
                tracing::debug!(anchor_id, "anchor already tracked");
                Some(false)
            }
            LocateStatus::NotLocatedAnchorDoesNotExist => {
                tracing::info!(anchor_id, "anchor no longer exists in cloud service");
                Some(false)
            }
            LocateStatus::NotLocated => {
                tracing::trace!(anchor_id, "anchor not located yet");
                Some(false)
            }
        }
    }

    async fn finish_discovery(&self, located: usize, skipped: usize) {
        let mut state = self.inner.state.lock().await;
        if state.ended {
            return;
        }
        state.discovery = DiscoveryPhase::Finished;
        drop(state);
        tracing::debug!(located, skipped, "discovery finished");
        self.emit(CoordinatorEvent::DiscoveryFinished { located, skipped });
    }

    async fn on_ended(&self) {
        let mut state = self.inner.state.lock().await;
        if state.ended {
            return;
        }
        state.ended = true;
        state.reset_creation();
        let dropped = state.records.len();
        state.records.clear();
        tracing::info!(dropped, "perception session ended");
    }
}

/// Await `call`, failing with [`CloudError::Timeout`] after `limit` when set.
async fn bounded<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    call: F,
) -> Result<T, CloudError>
where
    F: Future<Output = Result<T, CloudError>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, call)
            .await
            .map_err(|_| CloudError::Timeout { operation, after })?,
        None => call.await,
    }
}
