//! Bookkeeping across commit cycles: cycle backoff and per-record attempts.

use crate::config::BackoffConfig;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub(crate) struct CommitTracker {
    backoff: BackoffConfig,
    consecutive_failures: u32,
    skip_remaining: u32,
    attempts: HashMap<Uuid, u32>,
    flagged: HashSet<Uuid>,
}

impl CommitTracker {
    pub(crate) fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            consecutive_failures: 0,
            skip_remaining: 0,
            attempts: HashMap::new(),
            flagged: HashSet::new(),
        }
    }

    /// Consume one skipped cycle if backing off.
    pub(crate) fn should_skip(&mut self) -> bool {
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn skip_remaining(&self) -> u32 {
        self.skip_remaining
    }

    /// Forget cycle failures, e.g. after the remote sink was restarted.
    pub(crate) fn reset_backoff(&mut self) {
        self.consecutive_failures = 0;
        self.skip_remaining = 0;
    }

    /// Record one cycle. Returns records that just crossed the suspect
    /// threshold, with their attempt counts.
    pub(crate) fn record_cycle(&mut self, attempted: &[Uuid], committed: &[Uuid]) -> Vec<(Uuid, u32)> {
        let committed: HashSet<&Uuid> = committed.iter().collect();
        let mut suspects = Vec::new();

        for id in attempted {
            if committed.contains(id) {
                self.attempts.remove(id);
                self.flagged.remove(id);
                continue;
            }
            let count = self.attempts.entry(*id).or_insert(0);
            *count += 1;
            let threshold = self.backoff.suspect_after_attempts;
            if threshold > 0 && *count >= threshold && self.flagged.insert(*id) {
                suspects.push((*id, *count));
            }
        }

        if !attempted.is_empty() && committed.is_empty() {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.skip_remaining = self.backoff.skip_cycles(self.consecutive_failures);
        } else {
            self.reset_backoff();
        }

        suspects
    }

    pub(crate) fn attempts(&self, id: &Uuid) -> u32 {
        self.attempts.get(id).copied().unwrap_or(0)
    }

    /// Drop counters for records no longer pending (e.g. after a clear).
    pub(crate) fn forget_all(&mut self) {
        self.attempts.clear();
        self.flagged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_backoff_grows_then_resets_on_progress() {
        let mut tracker = CommitTracker::new(BackoffConfig::default());
        let batch = ids(2);

        tracker.record_cycle(&batch, &[]);
        assert_eq!(tracker.skip_remaining(), 1);
        assert!(tracker.should_skip());
        assert!(!tracker.should_skip());

        tracker.record_cycle(&batch, &[]);
        assert_eq!(tracker.skip_remaining(), 2);

        tracker.record_cycle(&batch, &batch[..1]);
        assert_eq!(tracker.skip_remaining(), 0);
        assert_eq!(tracker.attempts(&batch[0]), 0);
        assert_eq!(tracker.attempts(&batch[1]), 3);
    }

    #[test]
    fn test_fixed_interval_never_skips() {
        let mut tracker = CommitTracker::new(BackoffConfig::fixed_interval());
        let batch = ids(1);
        for _ in 0..5 {
            tracker.record_cycle(&batch, &[]);
            assert!(!tracker.should_skip());
        }
    }

    #[test]
    fn test_suspect_reported_once() {
        let backoff = BackoffConfig {
            suspect_after_attempts: 3,
            ..BackoffConfig::fixed_interval()
        };
        let mut tracker = CommitTracker::new(backoff);
        let batch = ids(1);

        assert!(tracker.record_cycle(&batch, &[]).is_empty());
        assert!(tracker.record_cycle(&batch, &[]).is_empty());
        assert_eq!(tracker.record_cycle(&batch, &[]), vec![(batch[0], 3)]);
        assert!(tracker.record_cycle(&batch, &[]).is_empty());
    }
}
