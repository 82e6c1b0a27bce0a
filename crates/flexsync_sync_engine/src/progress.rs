//! Upload and download progress streams.

use crate::error::{SyncError, SyncResult};
use flexsync_sync_protocol::{ProgressDirection, ProgressReport};
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

/// How long a progress stream lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressMode {
    /// Track the bytes known at registration and finish once they are
    /// transferred.
    CurrentChanges,
    /// Report every change until the stream is dropped.
    Indefinitely,
}

/// One progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Direction of the transfer.
    pub direction: ProgressDirection,
    /// Bytes transferred so far.
    pub transferred_bytes: u64,
    /// Bytes known to be transferable.
    pub transferable_bytes: u64,
}

impl Progress {
    /// True once everything known to be transferable has been transferred.
    #[must_use]
    pub fn is_transfer_complete(&self) -> bool {
        self.transferred_bytes >= self.transferable_bytes
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    transferred: u64,
    transferable: u64,
}

struct Registration {
    direction: ProgressDirection,
    /// Fixed transferable count for `CurrentChanges`.
    target: Option<u64>,
    sender: mpsc::UnboundedSender<Progress>,
}

impl Registration {
    fn sample(&self, counters: Counters) -> Progress {
        Progress {
            direction: self.direction,
            transferred_bytes: counters.transferred,
            transferable_bytes: self.target.unwrap_or(counters.transferable),
        }
    }
}

#[derive(Default)]
struct TrackerState {
    next_id: u64,
    upload: Counters,
    download: Counters,
    registrations: HashMap<u64, Registration>,
}

impl TrackerState {
    fn counters_mut(&mut self, direction: ProgressDirection) -> &mut Counters {
        match direction {
            ProgressDirection::Upload => &mut self.upload,
            ProgressDirection::Download => &mut self.download,
        }
    }
}

/// Turns the session's raw transfer counters into [`ProgressStream`]s.
///
/// Every call to [`progress`](Self::progress) gets its own registration;
/// dropping a stream removes only that registration.
pub struct ProgressTracker {
    flexible: bool,
    state: Arc<Mutex<TrackerState>>,
}

impl ProgressTracker {
    /// Creates a tracker. Flexible sync sessions do not report progress.
    #[must_use]
    pub fn new(flexible: bool) -> Self {
        Self {
            flexible,
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Opens a progress stream.
    ///
    /// The stream always yields the current counters first. In
    /// `CurrentChanges` mode it ends after the first complete sample, so an
    /// idle session yields exactly one event.
    ///
    /// # Errors
    ///
    /// [`SyncError::UnsupportedOperation`] on flexible sync sessions.
    pub fn progress(&self, direction: ProgressDirection, mode: ProgressMode) -> SyncResult<ProgressStream> {
        if self.flexible {
            return Err(SyncError::UnsupportedOperation(
                "Progress listeners are not support for Flexible Sync".into(),
            ));
        }

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let counters = *state.counters_mut(direction);
        let (sender, receiver) = mpsc::unbounded_channel();
        let registration = Registration {
            direction,
            target: match mode {
                ProgressMode::CurrentChanges => Some(counters.transferable),
                ProgressMode::Indefinitely => None,
            },
            sender,
        };

        let first = registration.sample(counters);
        // The receiver is still in hand, so this cannot fail.
        let _ = registration.sender.send(first);
        if mode == ProgressMode::Indefinitely || !first.is_transfer_complete() {
            state.registrations.insert(id, registration);
        }
        trace!(id, ?direction, ?mode, "registered progress stream");

        Ok(ProgressStream {
            id,
            receiver,
            tracker: Arc::downgrade(&self.state),
        })
    }

    /// Feeds a report from the session to every matching stream.
    pub fn on_report(&self, report: &ProgressReport) {
        let mut state = self.state.lock();
        let counters = Counters {
            transferred: report.transferred,
            transferable: report.transferable,
        };
        *state.counters_mut(report.direction) = counters;

        state.registrations.retain(|id, registration| {
            if registration.direction != report.direction {
                return true;
            }
            let sample = registration.sample(counters);
            if registration.sender.send(sample).is_err() {
                trace!(id, "dropping closed progress stream");
                return false;
            }
            // Finished `CurrentChanges` streams end once their sender drops.
            registration.target.is_none() || !sample.is_transfer_complete()
        });
    }

    /// Ends every open stream. Later reports reach only streams opened
    /// after this call.
    pub fn close(&self) {
        let closed = std::mem::take(&mut self.state.lock().registrations);
        if !closed.is_empty() {
            trace!(streams = closed.len(), "closing progress streams");
        }
    }

    /// Number of live registrations.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.state.lock().registrations.len()
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("flexible", &self.flexible)
            .field("active_streams", &self.active_streams())
            .finish()
    }
}

/// A stream of [`Progress`] samples for one registration.
///
/// Dropping it unregisters from the tracker.
#[derive(Debug)]
pub struct ProgressStream {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Progress>,
    tracker: Weak<Mutex<TrackerState>>,
}

impl Stream for ProgressStream {
    type Item = Progress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Progress>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.lock().registrations.remove(&self.id);
        }
    }
}

/// Extra operators on progress streams.
pub trait ProgressStreamExt: Stream<Item = Progress> + Sized {
    /// Counts transfer milestones.
    ///
    /// Keeps complete samples and drops consecutive duplicates. For each
    /// remaining sample it yields the running count of milestones, where a
    /// milestone is a sample whose transferable byte count grew past the
    /// last one. The `(0, 0)` seed itself is never yielded, so an idle first
    /// sample yields `0`.
    fn completion_counter(self) -> impl Stream<Item = u64> {
        let mut last: Option<Progress> = None;
        self.filter(|p| futures::future::ready(p.is_transfer_complete()))
            .filter(move |p| {
                let fresh = last != Some(*p);
                last = Some(*p);
                futures::future::ready(fresh)
            })
            .scan((0u64, 0u64), |(bytes, completed), progress| {
                if progress.transferable_bytes > *bytes {
                    *bytes = progress.transferred_bytes;
                    *completed += 1;
                }
                futures::future::ready(Some(*completed))
            })
    }
}

impl<S: Stream<Item = Progress>> ProgressStreamExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn report(direction: ProgressDirection, transferred: u64, transferable: u64) -> ProgressReport {
        ProgressReport {
            direction,
            transferred,
            transferable,
        }
    }

    fn sample(transferred: u64, transferable: u64) -> Progress {
        Progress {
            direction: ProgressDirection::Upload,
            transferred_bytes: transferred,
            transferable_bytes: transferable,
        }
    }

    #[tokio::test]
    async fn idle_current_changes_yields_one_terminal_event() {
        let tracker = ProgressTracker::new(false);
        let events: Vec<_> = tracker
            .progress(ProgressDirection::Download, ProgressMode::CurrentChanges)
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_transfer_complete());
        assert_eq!(tracker.active_streams(), 0);
    }

    #[tokio::test]
    async fn current_changes_tracks_registration_target() {
        let tracker = ProgressTracker::new(false);
        tracker.on_report(&report(ProgressDirection::Upload, 0, 100));
        let stream = tracker
            .progress(ProgressDirection::Upload, ProgressMode::CurrentChanges)
            .unwrap();

        // More data arrives, but this stream only waits for the first 100.
        tracker.on_report(&report(ProgressDirection::Upload, 50, 300));
        tracker.on_report(&report(ProgressDirection::Download, 0, 10));
        tracker.on_report(&report(ProgressDirection::Upload, 100, 300));
        tracker.on_report(&report(ProgressDirection::Upload, 300, 300));

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![sample(0, 100), sample(50, 100), sample(100, 100)]);
    }

    #[tokio::test]
    async fn indefinitely_keeps_reporting() {
        let tracker = ProgressTracker::new(false);
        let mut stream = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        tracker.on_report(&report(ProgressDirection::Upload, 10, 10));
        tracker.on_report(&report(ProgressDirection::Upload, 10, 20));
        tracker.on_report(&report(ProgressDirection::Upload, 20, 20));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(stream.next().await.unwrap());
        }
        assert_eq!(seen, vec![sample(0, 0), sample(10, 10), sample(10, 20), sample(20, 20)]);
        assert_eq!(tracker.active_streams(), 1);
    }

    #[tokio::test]
    async fn dropping_one_stream_leaves_others() {
        let tracker = ProgressTracker::new(false);
        let first = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        let mut second = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        assert_eq!(tracker.active_streams(), 2);

        drop(first);
        assert_eq!(tracker.active_streams(), 1);

        tracker.on_report(&report(ProgressDirection::Upload, 5, 5));
        assert_eq!(second.next().await, Some(sample(0, 0)));
        assert_eq!(second.next().await, Some(sample(5, 5)));
    }

    #[tokio::test]
    async fn close_ends_open_streams() {
        let tracker = ProgressTracker::new(false);
        let stream = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        tracker.on_report(&report(ProgressDirection::Upload, 4, 8));

        tracker.close();
        assert_eq!(tracker.active_streams(), 0);
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events, vec![sample(0, 0), sample(4, 8)]);
    }

    #[tokio::test]
    async fn panicking_consumer_unregisters_its_stream() {
        let tracker = ProgressTracker::new(false);
        let mut stream = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        assert_eq!(tracker.active_streams(), 1);

        let consumer = tokio::spawn(async move {
            let first = stream.next().await;
            panic!("consumer failed after {first:?}");
        });
        assert!(consumer.await.unwrap_err().is_panic());
        assert_eq!(tracker.active_streams(), 0);

        let mut later = tracker
            .progress(ProgressDirection::Upload, ProgressMode::Indefinitely)
            .unwrap();
        tracker.on_report(&report(ProgressDirection::Upload, 3, 9));
        assert_eq!(later.next().await, Some(sample(0, 0)));
        assert_eq!(later.next().await, Some(sample(3, 9)));
    }

    #[test]
    fn flexible_sync_is_unsupported() {
        let tracker = ProgressTracker::new(true);
        let err = tracker
            .progress(ProgressDirection::Upload, ProgressMode::CurrentChanges)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Progress listeners are not support for Flexible Sync"
        );
    }

    #[tokio::test]
    async fn completion_counter_counts_milestones() {
        let samples = vec![
            sample(0, 0),
            sample(0, 100),
            sample(100, 100),
            sample(100, 100),
            sample(100, 250),
            sample(250, 250),
            sample(250, 250),
            sample(400, 400),
        ];
        let counts: Vec<u64> = stream::iter(samples).completion_counter().collect().await;
        assert_eq!(counts, vec![0, 1, 2, 3]);
    }
}
