//! Readiness gate fed by the perception session's create-progress signal.
//!
//! The session pushes a progress scalar after every processed frame. The
//! tracker is ready while the latest value is strictly above the threshold.
//! There is no hysteresis: a regression at or below the threshold turns the
//! gate off again immediately, so callers must check at the moment they act.

use std::sync::Arc;

use tokio::sync::watch;

/// Progress above which the environment is understood well enough to persist.
pub const DEFAULT_READY_THRESHOLD: f32 = 1.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("readiness tracker dropped before becoming ready")]
    TrackerClosed,
}

/// Shared handle to the latest session progress.
///
/// Clones observe and update the same value.
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    progress: Arc<watch::Sender<f32>>,
    threshold: f32,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_READY_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            progress: Arc::new(progress),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Record the latest progress value pushed by the perception session.
    ///
    /// NaN is treated as no progress. Infinities compare as usual.
    pub fn update(&self, progress: f32) {
        let progress = if progress.is_nan() { 0.0 } else { progress };
        tracing::trace!(progress, "session progress");
        self.progress.send_replace(progress);
    }

    /// Latest progress value.
    pub fn progress(&self) -> f32 {
        *self.progress.borrow()
    }

    /// True iff the latest progress is strictly above the threshold.
    pub fn is_ready(&self) -> bool {
        self.progress() > self.threshold
    }

    /// Wait until the latest progress crosses the threshold.
    ///
    /// Returns immediately when already ready. Readiness may be lost again
    /// right after this resolves; re-check with [`Self::is_ready`] before acting.
    pub async fn wait_until_ready(&self) -> Result<(), ReadinessError> {
        let mut rx = self.progress.subscribe();
        let threshold = self.threshold;
        rx.wait_for(|progress| *progress > threshold)
            .await
            .map(|_| ())
            .map_err(|_| ReadinessError::TrackerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_not_ready() {
        let tracker = ReadinessTracker::new();
        assert!(!tracker.is_ready());
        assert_eq!(tracker.progress(), 0.0);
    }

    #[test]
    fn readiness_follows_latest_progress_without_memory() {
        let tracker = ReadinessTracker::new();
        let observed: Vec<bool> = [0.2_f32, 0.9, 1.3, 0.5]
            .into_iter()
            .map(|p| {
                tracker.update(p);
                tracker.is_ready()
            })
            .collect();
        assert_eq!(observed, vec![false, false, true, false]);
    }

    #[test]
    fn threshold_is_exclusive() {
        let tracker = ReadinessTracker::new();
        tracker.update(1.0);
        assert!(!tracker.is_ready());
        tracker.update(1.0001);
        assert!(tracker.is_ready());
    }

    #[test]
    fn nan_is_no_progress_but_infinity_is_ready() {
        let tracker = ReadinessTracker::new();
        tracker.update(f32::NAN);
        assert!(!tracker.is_ready());
        assert_eq!(tracker.progress(), 0.0);
        tracker.update(f32::INFINITY);
        assert!(tracker.is_ready());
        tracker.update(f32::NEG_INFINITY);
        assert!(!tracker.is_ready());
    }

    #[test]
    fn clones_share_progress() {
        let tracker = ReadinessTracker::with_threshold(0.5);
        let reader = tracker.clone();
        tracker.update(0.75);
        assert!(reader.is_ready());
        assert_eq!(reader.threshold(), 0.5);
    }

    #[tokio::test]
    async fn wait_until_ready_returns_immediately_when_ready() {
        let tracker = ReadinessTracker::new();
        tracker.update(2.0);
        assert_eq!(tracker.wait_until_ready().await, Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wait_until_ready_resolves_on_crossing() {
        let tracker = ReadinessTracker::new();
        let feeder = tracker.clone();
        let handle = tokio::spawn(async move {
            for p in [0.3_f32, 0.8, 1.0, 1.2] {
                tokio::time::sleep(Duration::from_millis(5)).await;
                feeder.update(p);
            }
        });

        tokio::time::timeout(Duration::from_secs(5), tracker.wait_until_ready())
            .await
            .expect("timed out waiting for readiness")
            .expect("tracker closed");
        assert!(tracker.progress() > 1.0);
        handle.await.expect("feeder panicked");
    }
}
