//! Watcher/location protocol.
//!
//! A single watcher is asked to locate at most [`MAX_WATCHER_IDS`]
//! identifiers. Anything beyond that is skipped for this pass; running
//! further watchers for the remainder is not implemented.

use std::collections::HashSet;

use anchorshare_protocol::MAX_WATCHER_IDS;
use tokio::sync::mpsc;

use crate::cloud::AnchorLocatedEvent;
use crate::cloud::CloudAnchorService;
use crate::cloud::CloudError;
use crate::cloud::WatcherEvent;

/// Identifiers split into the ones a watcher will look for and the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBatch {
    pub submitted: Vec<String>,
    pub skipped: Vec<String>,
}

impl WatchBatch {
    /// Keep the first `limit` identifiers (never more than [`MAX_WATCHER_IDS`]).
    pub fn split(mut identifiers: Vec<String>, limit: usize) -> Self {
        let limit = limit.clamp(1, MAX_WATCHER_IDS);
        let skipped = if identifiers.len() > limit {
            identifiers.split_off(limit)
        } else {
            Vec::new()
        };
        Self {
            submitted: identifiers,
            skipped,
        }
    }
}

/// Outcomes of one running watcher.
pub struct LocateSession {
    events: mpsc::Receiver<WatcherEvent>,
    submitted: HashSet<String>,
    /// Submitted ids without a terminal report yet.
    unresolved: HashSet<String>,
    completed: bool,
}

impl LocateSession {
    /// Submit `batch.submitted` to a new watcher.
    pub async fn start(
        cloud: &dyn CloudAnchorService,
        batch: &WatchBatch,
    ) -> Result<Self, CloudError> {
        if !batch.skipped.is_empty() {
            tracing::warn!(
                submitted = batch.submitted.len(),
                skipped = batch.skipped.len(),
                "watcher batch limit reached, remaining anchors not located this pass"
            );
        }
        let events = cloud.create_watcher(&batch.submitted).await?;
        Ok(Self {
            events,
            submitted: batch.submitted.iter().cloned().collect(),
            unresolved: batch.submitted.iter().cloned().collect(),
            completed: false,
        })
    }

    /// Next outcome for one of the submitted identifiers.
    ///
    /// Returns `None` once the watcher signals completion or goes away.
    /// Reports for identifiers that were not submitted are dropped.
    pub async fn next_outcome(&mut self) -> Option<AnchorLocatedEvent> {
        if self.completed {
            return None;
        }
        while let Some(event) = self.events.recv().await {
            match event {
                WatcherEvent::AnchorLocated(event) if self.submitted.contains(&event.identifier) => {
                    if event.status.is_terminal() {
                        self.unresolved.remove(&event.identifier);
                    }
                    return Some(event);
                }
                WatcherEvent::AnchorLocated(event) => {
                    tracing::debug!(
                        anchor_id = %event.identifier,
                        "ignoring report for identifier not in this watcher"
                    );
                }
                WatcherEvent::LocateCompleted => break,
            }
        }
        self.completed = true;
        if !self.unresolved.is_empty() {
            tracing::debug!(
                unresolved = self.unresolved.len(),
                "watcher finished before every anchor was resolved"
            );
        }
        None
    }

    /// Submitted ids still waiting for a terminal report.
    pub fn unresolved(&self) -> usize {
        self.unresolved.len()
    }

    /// Whether the batch-completed signal (or channel close) was observed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedCloudService;
    use anchorshare_protocol::LocateStatus;
    use pretty_assertions::assert_eq;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id-{i:02}")).collect()
    }

    #[test]
    fn fifteen_ids_submit_first_ten() {
        let batch = WatchBatch::split(ids(15), MAX_WATCHER_IDS);
        assert_eq!(batch.submitted, ids(10));
        assert_eq!(batch.skipped, ids(15)[10..].to_vec());
    }

    #[test]
    fn small_batches_are_untouched() {
        let batch = WatchBatch::split(ids(3), MAX_WATCHER_IDS);
        assert_eq!(batch.submitted, ids(3));
        assert!(batch.skipped.is_empty());
    }

    #[test]
    fn limit_never_exceeds_protocol_maximum() {
        let batch = WatchBatch::split(ids(20), 50);
        assert_eq!(batch.submitted.len(), MAX_WATCHER_IDS);
    }

    #[tokio::test]
    async fn only_submitted_ids_reach_the_cloud() {
        let cloud = ScriptedCloudService::new();
        for id in ids(15) {
            cloud.seed_anchor(&id, "n");
        }
        let batch = WatchBatch::split(ids(15), MAX_WATCHER_IDS);
        let mut session = LocateSession::start(&cloud, &batch).await.unwrap();

        let mut located = Vec::new();
        while let Some(outcome) = session.next_outcome().await {
            assert_eq!(outcome.status, LocateStatus::Located);
            located.push(outcome.identifier);
        }
        assert!(session.is_completed());
        assert_eq!(session.unresolved(), 0);
        assert_eq!(located, ids(10));
        assert_eq!(cloud.watcher_requests(), vec![ids(10)]);
    }

    #[tokio::test]
    async fn foreign_reports_are_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut session = LocateSession {
            events: rx,
            submitted: HashSet::from(["mine".to_string()]),
            unresolved: HashSet::from(["mine".to_string()]),
            completed: false,
        };
        for identifier in ["other", "mine"] {
            tx.send(WatcherEvent::AnchorLocated(AnchorLocatedEvent {
                identifier: identifier.to_string(),
                status: LocateStatus::NotLocated,
                anchor: None,
            }))
            .await
            .unwrap();
        }
        drop(tx);

        let first = session.next_outcome().await.unwrap();
        assert_eq!(first.identifier, "mine");
        assert!(session.next_outcome().await.is_none());
        assert!(session.is_completed());
        // NotLocated is not terminal.
        assert_eq!(session.unresolved(), 1);
    }
}
