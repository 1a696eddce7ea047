//! Progress tracking for block synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records the heights a sync session has
//! applied, counts blocks and transactions, and logs progress at a fixed block interval. At the end
//! of a session it reports gaps in the applied heights, which would indicate a skipped block.

use crate::chain::ChainHeight;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{info, warn};

/// Default number of blocks between progress logs
pub const DEFAULT_PROGRESS_LOG_INTERVAL: u64 = 1000;

/// Service for tracking synchronization progress of one backend
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Backend name used in logs
    backend: String,
    /// Height the session started from
    start_height: ChainHeight,
    /// The highest height applied so far
    highest_applied: Option<ChainHeight>,
    /// Every height applied in this session
    applied_heights: BTreeSet<ChainHeight>,
    /// Total transactions in applied blocks
    transactions_applied: usize,
    /// Height at which progress was last logged
    last_logged_height: ChainHeight,
    /// Blocks between progress logs
    log_interval: u64,
    started_at: Instant,
}

impl SyncProgressTracker {
    /// Create a new progress tracker for a session starting at `start_height`.
    pub fn new(backend: &str, start_height: ChainHeight, log_interval: u64) -> Self {
        Self {
            backend: backend.to_string(),
            start_height,
            highest_applied: None,
            applied_heights: BTreeSet::new(),
            transactions_applied: 0,
            last_logged_height: start_height,
            log_interval: log_interval.max(1),
            started_at: Instant::now(),
        }
    }

    /// Record an applied block with `transactions` regular and stake transactions.
    pub fn record_block(&mut self, height: ChainHeight, transactions: usize) {
        self.highest_applied = Some(self.highest_applied.map_or(height, |h| h.max(height)));
        self.applied_heights.insert(height);
        self.transactions_applied += transactions;
    }

    /// Check for gaps in applied heights
    ///
    /// Returns (last applied before the gap, first applied after it) pairs.
    pub fn check_for_gaps(&self) -> Vec<(ChainHeight, ChainHeight)> {
        self.applied_heights
            .iter()
            .zip(self.applied_heights.iter().skip(1))
            .filter(|(a, b)| **b - **a > 1)
            .map(|(a, b)| (*a, *b))
            .collect()
    }

    fn blocks_per_second(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.applied_heights.len() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log progress every `log_interval` blocks or when forced
    pub fn log_progress(&mut self, force: bool, tip: ChainHeight) {
        let Some(highest) = self.highest_applied else {
            return;
        };
        let blocks_since_last_log = highest.saturating_sub(self.last_logged_height).max(0) as u64;
        if force || blocks_since_last_log >= self.log_interval {
            info!(
                "{} sync progress: height {}/{} ({} blocks, {} transactions, {:.1} blocks/s)",
                self.backend,
                highest,
                tip,
                self.applied_heights.len(),
                self.transactions_applied,
                self.blocks_per_second()
            );
            self.last_logged_height = highest;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            highest_applied: self.highest_applied,
            blocks_applied: self.applied_heights.len(),
            transactions_applied: self.transactions_applied,
            gaps: self.check_for_gaps(),
        }
    }

    /// Warn about any gaps found in the session.
    pub fn validate_completion(&self) {
        for (before, after) in self.check_for_gaps() {
            warn!(
                "{} gap detected: missing heights between {} and {}",
                self.backend, before, after
            );
        }
    }
}

/// Statistics about one sync session
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStats {
    pub start_height: ChainHeight,
    pub highest_applied: Option<ChainHeight>,
    pub blocks_applied: usize,
    pub transactions_applied: usize,
    pub gaps: Vec<(ChainHeight, ChainHeight)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} blocks, {} transactions{}",
            self.start_height,
            self.highest_applied
                .map_or_else(|| "nothing".to_string(), |h| h.to_string()),
            self.blocks_applied,
            self.transactions_applied,
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", self.gaps.len())
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_blocks_and_transactions() {
        let mut tracker = SyncProgressTracker::new("embedded", 50, 10);
        for height in 50..=55 {
            tracker.record_block(height, 2);
        }
        let stats = tracker.get_stats();
        assert_eq!(stats.highest_applied, Some(55));
        assert_eq!(stats.blocks_applied, 6);
        assert_eq!(stats.transactions_applied, 12);
        assert!(stats.gaps.is_empty());
        assert_eq!(stats.summary(), "Sync from 50 to 55: 6 blocks, 12 transactions");
    }

    #[test]
    fn reports_gaps() {
        let mut tracker = SyncProgressTracker::new("embedded", 0, 10);
        for height in [0, 1, 4, 5, 9] {
            tracker.record_block(height, 0);
        }
        assert_eq!(tracker.check_for_gaps(), vec![(1, 4), (5, 9)]);
    }

    #[test]
    fn empty_session_summary() {
        let tracker = SyncProgressTracker::new("embedded", 7, 10);
        assert_eq!(tracker.get_stats().summary(), "Sync from 7 to nothing: 0 blocks, 0 transactions");
    }
}
