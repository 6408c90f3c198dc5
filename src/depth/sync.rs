use std::collections::VecDeque;

use super::book::OrderBook;
use super::wire::{DepthDiff, DepthSnapshot};

/// Events buffered while waiting for a snapshot; oldest dropped beyond this.
const BUFFER_CAP: usize = 5000;

/// Snapshot retries before the failure is escalated to an error log.
/// Recovery keeps going regardless.
pub const MAX_SNAPSHOT_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Event applied, `last_update_id` advanced.
    Applied,
    /// Duplicate or stale (`u <= local`), dropped.
    Stale,
    /// Sequence hole; book marked not ready, event re-buffered.
    Gap,
    /// Book not ready yet, event buffered for bootstrap.
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Ready,
    /// Snapshot predates the buffered stream; fetch a newer one.
    SnapshotTooOld,
    /// Buffered events do not chain onto the snapshot; fetch again.
    GapInBuffer,
}

/// Diff-stream / snapshot reconciliation state machine. Pure and
/// synchronous; the tracker feeds it from the socket and REST tasks.
#[derive(Debug, Default)]
pub struct BookSync {
    book: OrderBook,
    buffer: VecDeque<DepthDiff>,
    ready: bool,
    snapshot_retries: u32,
}

impl BookSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn snapshot_retries(&self) -> u32 {
        self.snapshot_retries
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all sync state; used when the stream (re)connects.
    pub fn invalidate(&mut self) {
        self.ready = false;
        self.buffer.clear();
        self.snapshot_retries = 0;
    }

    fn push_buffer(&mut self, diff: DepthDiff) {
        if self.buffer.len() == BUFFER_CAP {
            self.buffer.pop_front();
        }
        self.buffer.push_back(diff);
    }

    /// Feed one event from the socket, live or pre-bootstrap.
    pub fn on_event(&mut self, diff: DepthDiff) -> LiveOutcome {
        if !self.ready {
            self.push_buffer(diff);
            return LiveOutcome::Buffered;
        }

        let local = self.book.last_update_id();
        if diff.final_update_id <= local {
            return LiveOutcome::Stale;
        }
        if diff.first_update_id > local + 1 {
            self.ready = false;
            self.push_buffer(diff);
            return LiveOutcome::Gap;
        }

        self.book.apply_diff(&diff);
        LiveOutcome::Applied
    }

    /// Try to initialize the book from a REST snapshot plus the buffer.
    /// On success the buffer is drained and the book is ready.
    pub fn apply_bootstrap_snapshot(&mut self, snapshot: &DepthSnapshot) -> BootstrapOutcome {
        if let Some(front) = self.buffer.front() {
            if snapshot.last_update_id < front.first_update_id {
                self.snapshot_retries += 1;
                return BootstrapOutcome::SnapshotTooOld;
            }
        }

        // plan before mutating so a failed chain keeps the buffer usable
        let mut local = snapshot.last_update_id;
        let mut plan: Vec<usize> = Vec::new();
        for (idx, ev) in self.buffer.iter().enumerate() {
            if ev.final_update_id <= local {
                continue;
            }
            if ev.first_update_id > local + 1 {
                self.snapshot_retries += 1;
                return BootstrapOutcome::GapInBuffer;
            }
            plan.push(idx);
            local = ev.final_update_id;
        }

        self.book.reset_from_snapshot(snapshot);
        for idx in plan {
            let diff = self.buffer[idx].clone();
            self.book.apply_diff(&diff);
        }
        self.buffer.clear();
        self.ready = true;
        self.snapshot_retries = 0;
        BootstrapOutcome::Ready
    }

    /// Periodic refresh while ready: replace the book atomically iff the
    /// snapshot is at least as new as the local stream position.
    pub fn resync(&mut self, snapshot: &DepthSnapshot) -> bool {
        if !self.ready || snapshot.last_update_id < self.book.last_update_id() {
            return false;
        }
        self.book.reset_from_snapshot(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(first: u64, last: u64) -> DepthDiff {
        DepthDiff {
            first_update_id: first,
            final_update_id: last,
            bids: vec![],
            asks: vec![],
        }
    }

    fn snap(last: u64) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: last,
            bids: vec![],
            asks: vec![],
        }
    }

    #[test]
    fn bootstrap_skips_covered_events_and_chains_the_rest() {
        let mut sync = BookSync::new();
        sync.on_event(diff(5, 7));
        sync.on_event(diff(8, 9));
        sync.on_event(diff(10, 11));
        assert_eq!(sync.buffered(), 3);

        let outcome = sync.apply_bootstrap_snapshot(&snap(8));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert!(sync.is_ready());
        assert_eq!(sync.book().last_update_id(), 11);
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn snapshot_older_than_buffer_is_retried() {
        let mut sync = BookSync::new();
        sync.on_event(diff(50, 55));

        assert_eq!(
            sync.apply_bootstrap_snapshot(&snap(40)),
            BootstrapOutcome::SnapshotTooOld
        );
        assert!(!sync.is_ready());
        assert_eq!(sync.snapshot_retries(), 1);

        // a fresh snapshot inside the buffered range succeeds
        assert_eq!(
            sync.apply_bootstrap_snapshot(&snap(52)),
            BootstrapOutcome::Ready
        );
        assert_eq!(sync.snapshot_retries(), 0);
    }

    #[test]
    fn gap_between_snapshot_and_buffer_is_retried() {
        let mut sync = BookSync::new();
        sync.on_event(diff(100, 105));

        assert_eq!(
            sync.apply_bootstrap_snapshot(&snap(42)),
            BootstrapOutcome::SnapshotTooOld
        );

        // snapshot ahead of the buffer start but below the chain
        let mut sync = BookSync::new();
        sync.on_event(diff(100, 105));
        sync.on_event(diff(110, 115));
        assert_eq!(
            sync.apply_bootstrap_snapshot(&snap(106)),
            BootstrapOutcome::GapInBuffer
        );
        assert!(!sync.is_ready());
    }

    #[test]
    fn live_gap_marks_not_ready_and_rebuffers() {
        let mut sync = BookSync::new();
        sync.on_event(diff(99, 100));
        assert_eq!(sync.apply_bootstrap_snapshot(&snap(99)), BootstrapOutcome::Ready);
        assert_eq!(sync.book().last_update_id(), 100);

        assert_eq!(sync.on_event(diff(110, 120)), LiveOutcome::Gap);
        assert!(!sync.is_ready());
        assert_eq!(sync.buffered(), 1);
    }

    #[test]
    fn stale_event_is_a_no_op() {
        let mut sync = BookSync::new();
        assert_eq!(sync.apply_bootstrap_snapshot(&snap(100)), BootstrapOutcome::Ready);

        assert_eq!(sync.on_event(diff(90, 100)), LiveOutcome::Stale);
        assert_eq!(sync.book().last_update_id(), 100);
    }

    #[test]
    fn applied_events_advance_to_final_update_id() {
        let mut sync = BookSync::new();
        assert_eq!(sync.apply_bootstrap_snapshot(&snap(10)), BootstrapOutcome::Ready);

        assert_eq!(sync.on_event(diff(11, 12)), LiveOutcome::Applied);
        assert_eq!(sync.on_event(diff(13, 15)), LiveOutcome::Applied);
        // overlapping range is fine as long as it covers local+1
        assert_eq!(sync.on_event(diff(14, 18)), LiveOutcome::Applied);
        assert_eq!(sync.book().last_update_id(), 18);
    }

    #[test]
    fn resync_keeps_newer_local_book() {
        let mut sync = BookSync::new();
        assert_eq!(sync.apply_bootstrap_snapshot(&snap(100)), BootstrapOutcome::Ready);

        assert!(!sync.resync(&snap(99)));
        assert_eq!(sync.book().last_update_id(), 100);

        assert!(sync.resync(&snap(100)));
        assert!(sync.resync(&snap(150)));
        assert_eq!(sync.book().last_update_id(), 150);
    }

    #[test]
    fn buffer_is_capped() {
        let mut sync = BookSync::new();
        for i in 0..6000u64 {
            sync.on_event(diff(i, i));
        }
        assert_eq!(sync.buffered(), 5000);
    }
}
