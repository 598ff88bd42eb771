//! Deterministic in-process [`CloudAnchorService`].
//!
//! Hands out sequential ids, remembers the properties of every anchor it
//! created or was seeded with, and answers watchers from that table:
//! known anchors are `Located`, unknown ones `NotLocatedAnchorDoesNotExist`,
//! unless an id was marked as already tracked or not (yet) located.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use anchorshare_protocol::LocateStatus;
use anchorshare_protocol::NOTE_PROPERTY_KEY;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::cloud::AnchorLocatedEvent;
use crate::cloud::CloudAnchorService;
use crate::cloud::CloudError;
use crate::cloud::LocatedAnchor;
use crate::cloud::WatcherEvent;
use crate::record::PoseHandle;

#[derive(Default)]
struct ScriptState {
    next_id: u64,
    next_pose: u64,
    anchors: HashMap<String, HashMap<String, String>>,
    created: Vec<(PoseHandle, HashMap<String, String>)>,
    pending_failures: Vec<String>,
    pending_watcher_failures: Vec<String>,
    already_tracked: HashSet<String>,
    not_located: HashSet<String>,
    watcher_requests: Vec<Vec<String>>,
}

pub struct ScriptedCloudService {
    state: Mutex<ScriptState>,
    creates_paused: watch::Sender<bool>,
}

impl Default for ScriptedCloudService {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCloudService {
    pub fn new() -> Self {
        let (creates_paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(ScriptState::default()),
            creates_paused,
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an anchor saved elsewhere (e.g. by another device).
    pub fn seed_anchor(&self, identifier: &str, note: &str) {
        let properties = HashMap::from([(NOTE_PROPERTY_KEY.to_string(), note.to_string())]);
        self.state()
            .anchors
            .insert(identifier.to_string(), properties);
    }

    /// Make the next `create_anchor` call fail with `reason`.
    pub fn fail_next_create(&self, reason: &str) {
        self.state().pending_failures.push(reason.to_string());
    }

    /// Make the next `create_watcher` call fail with `reason`.
    pub fn fail_next_watcher(&self, reason: &str) {
        self.state().pending_watcher_failures.push(reason.to_string());
    }

    pub fn mark_already_tracked(&self, identifier: &str) {
        self.state().already_tracked.insert(identifier.to_string());
    }

    pub fn mark_not_located(&self, identifier: &str) {
        self.state().not_located.insert(identifier.to_string());
    }

    /// Hold `create_anchor` calls until [`Self::resume_creates`].
    pub fn pause_creates(&self) {
        self.creates_paused.send_replace(true);
    }

    pub fn resume_creates(&self) {
        self.creates_paused.send_replace(false);
    }

    /// Successful creations so far, in call order.
    pub fn created(&self) -> Vec<(PoseHandle, HashMap<String, String>)> {
        self.state().created.clone()
    }

    /// Identifier batches passed to `create_watcher`, in call order.
    pub fn watcher_requests(&self) -> Vec<Vec<String>> {
        self.state().watcher_requests.clone()
    }

    fn outcome(state: &mut ScriptState, identifier: &str) -> AnchorLocatedEvent {
        let status = if state.already_tracked.contains(identifier) {
            LocateStatus::AlreadyTracked
        } else if state.not_located.contains(identifier) {
            LocateStatus::NotLocated
        } else if state.anchors.contains_key(identifier) {
            LocateStatus::Located
        } else {
            LocateStatus::NotLocatedAnchorDoesNotExist
        };

        let anchor = match (status, state.anchors.get(identifier)) {
            (LocateStatus::Located, Some(properties)) => {
                let properties = properties.clone();
                state.next_pose += 1;
                Some(LocatedAnchor {
                    identifier: identifier.to_string(),
                    pose: PoseHandle(state.next_pose),
                    properties,
                })
            }
            _ => None,
        };

        AnchorLocatedEvent {
            identifier: identifier.to_string(),
            status,
            anchor,
        }
    }
}

#[async_trait]
impl CloudAnchorService for ScriptedCloudService {
    async fn create_anchor(
        &self,
        pose: PoseHandle,
        properties: &HashMap<String, String>,
    ) -> Result<String, CloudError> {
        let mut paused = self.creates_paused.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = paused.wait_for(|paused| !*paused).await;

        let mut state = self.state();
        if !state.pending_failures.is_empty() {
            let reason = state.pending_failures.remove(0);
            return Err(CloudError::CreateFailed(reason));
        }

        state.next_id += 1;
        let identifier = format!("anchor-{:04}", state.next_id);
        state
            .anchors
            .insert(identifier.clone(), properties.clone());
        state.created.push((pose, properties.clone()));
        Ok(identifier)
    }

    async fn create_watcher(
        &self,
        identifiers: &[String],
    ) -> Result<mpsc::Receiver<WatcherEvent>, CloudError> {
        let events: Vec<WatcherEvent> = {
            let mut state = self.state();
            state.watcher_requests.push(identifiers.to_vec());
            if !state.pending_watcher_failures.is_empty() {
                let reason = state.pending_watcher_failures.remove(0);
                return Err(CloudError::WatcherFailed(reason));
            }
            identifiers
                .iter()
                .map(|id| WatcherEvent::AnchorLocated(Self::outcome(&mut state, id)))
                .chain(std::iter::once(WatcherEvent::LocateCompleted))
                .collect()
        };

        let (tx, rx) = mpsc::channel(events.len());
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        Ok(rx)
    }
}
