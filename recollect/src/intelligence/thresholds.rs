use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::models::{RetentionTier, ThresholdSnapshot};

/// Rolling view of recent decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdStats {
    pub decisions: u64,
    pub window: usize,
    pub long_term_share: f64,
    pub immediate_share: f64,
    pub mean_score: f64,
    pub snapshot: ThresholdSnapshot,
}

#[derive(Debug)]
struct ControllerState {
    history: VecDeque<(RetentionTier, f64)>,
    decisions: u64,
    snapshot: ThresholdSnapshot,
}

/// Nudges tier cutoffs toward target tier proportions.
///
/// One instance per session. Cutoffs move by a bounded exponential step and
/// stay inside their configured bands with `long_term > short_term`.
#[derive(Debug)]
pub struct ThresholdController {
    config: ThresholdConfig,
    state: Mutex<ControllerState>,
}

impl ThresholdController {
    pub fn new(config: ThresholdConfig) -> Self {
        let snapshot = ThresholdSnapshot::new(config.long_term, config.short_term);
        Self {
            state: Mutex::new(ControllerState {
                history: VecDeque::with_capacity(config.window.max(1)),
                decisions: 0,
                snapshot,
            }),
            config,
        }
    }

    pub fn snapshot(&self) -> ThresholdSnapshot {
        self.lock().snapshot
    }

    /// Record one classification and return the snapshot now in effect.
    pub fn record_decision(&self, tier: RetentionTier, score: f64) -> ThresholdSnapshot {
        let mut state = self.lock();
        state.history.push_back((tier, score));
        while state.history.len() > self.config.window.max(1) {
            state.history.pop_front();
        }
        state.decisions += 1;

        if state.history.len() >= self.config.min_samples {
            let (long_share, immediate_share) = shares(&state.history);
            let next = self.adjust(state.snapshot, long_share, immediate_share);
            if next != state.snapshot {
                tracing::debug!(
                    long_term = next.long_term,
                    short_term = next.short_term,
                    long_share,
                    immediate_share,
                    "Threshold snapshot adjusted"
                );
                state.snapshot = next;
            }
        }
        state.snapshot
    }

    pub fn stats(&self) -> ThresholdStats {
        let state = self.lock();
        let (long_term_share, immediate_share) = shares(&state.history);
        let mean_score = if state.history.is_empty() {
            0.0
        } else {
            state.history.iter().map(|(_, s)| s).sum::<f64>() / state.history.len() as f64
        };
        ThresholdStats {
            decisions: state.decisions,
            window: state.history.len(),
            long_term_share,
            immediate_share,
            mean_score,
            snapshot: state.snapshot,
        }
    }

    fn adjust(&self, current: ThresholdSnapshot, long_share: f64, immediate_share: f64) -> ThresholdSnapshot {
        let cfg = &self.config;
        let mut long_term = current.long_term;
        let mut short_term = current.short_term;

        // Too many long-term decisions: raise the bar.
        let long_error = long_share - cfg.target_long_share;
        if long_error.abs() > cfg.tolerance {
            long_term += long_error.signum() * self.step(long_error);
        }

        // Too many discards: lower the short-term cutoff.
        let immediate_error = immediate_share - cfg.target_immediate_share;
        if immediate_error.abs() > cfg.tolerance {
            short_term -= immediate_error.signum() * self.step(immediate_error);
        }

        long_term = long_term.clamp(cfg.long_term_min, cfg.long_term_max.max(cfg.long_term_min));
        short_term = short_term.clamp(cfg.short_term_min, cfg.short_term_max.max(cfg.short_term_min));

        if long_term < short_term + ThresholdSnapshot::MIN_GAP {
            long_term = (short_term + ThresholdSnapshot::MIN_GAP).min(cfg.long_term_max);
            short_term = short_term.min(long_term - ThresholdSnapshot::MIN_GAP);
        }

        ThresholdSnapshot::new(long_term, short_term)
    }

    /// `max_step * (1 - e^(-gain * |error|))`
    fn step(&self, error: f64) -> f64 {
        self.config.max_step * (1.0 - (-self.config.gain * error.abs()).exp())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn shares(history: &VecDeque<(RetentionTier, f64)>) -> (f64, f64) {
    if history.is_empty() {
        return (0.0, 0.0);
    }
    let total = history.len() as f64;
    let long = history
        .iter()
        .filter(|(tier, _)| *tier == RetentionTier::LongTerm)
        .count() as f64;
    let immediate = history
        .iter()
        .filter(|(tier, _)| *tier == RetentionTier::Immediate)
        .count() as f64;
    (long / total, immediate / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ThresholdController {
        ThresholdController::new(ThresholdConfig::default())
    }

    #[test]
    fn test_no_adaptation_before_min_samples() {
        let controller = controller();
        for _ in 0..19 {
            controller.record_decision(RetentionTier::LongTerm, 20.0);
        }
        assert_eq!(controller.snapshot(), ThresholdSnapshot::default());
    }

    #[test]
    fn test_long_term_flood_raises_cutoff_within_band() {
        let controller = controller();
        let mut previous = controller.snapshot().long_term;
        for _ in 0..200 {
            let snapshot = controller.record_decision(RetentionTier::LongTerm, 20.0);
            assert!(snapshot.long_term >= previous);
            assert!(snapshot.long_term - previous <= 0.5 + f64::EPSILON);
            previous = snapshot.long_term;
        }
        let snapshot = controller.snapshot();
        assert!(snapshot.long_term > 12.0);
        assert!(snapshot.long_term <= 20.0);
        assert!(snapshot.long_term > snapshot.short_term);
    }

    #[test]
    fn test_immediate_flood_lowers_short_cutoff_to_floor() {
        let controller = controller();
        for _ in 0..200 {
            controller.record_decision(RetentionTier::Immediate, 0.0);
        }
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.short_term, 2.0);
        assert!(snapshot.long_term >= 8.0);
    }

    #[test]
    fn test_balanced_history_holds_steady() {
        let controller = controller();
        // 4 long, 9 immediate and 7 short out of 20 sits inside the tolerance band
        for i in 0..20 {
            let tier = match i {
                0..=3 => RetentionTier::LongTerm,
                4..=12 => RetentionTier::Immediate,
                _ => RetentionTier::ShortTerm,
            };
            controller.record_decision(tier, 5.0);
        }
        assert_eq!(controller.snapshot(), ThresholdSnapshot::default());
    }

    #[test]
    fn test_stats_reflect_window() {
        let controller = controller();
        controller.record_decision(RetentionTier::LongTerm, 14.0);
        controller.record_decision(RetentionTier::Immediate, 0.0);
        let stats = controller.stats();
        assert_eq!(stats.decisions, 2);
        assert_eq!(stats.long_term_share, 0.5);
        assert_eq!(stats.mean_score, 7.0);
    }
}
