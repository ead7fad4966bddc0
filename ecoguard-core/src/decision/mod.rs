//! Decision engine: thresholding, escalation, and alert debouncing.
//!
//! `decide` is a pure function of the classifier output and the tuning values
//! passed in for that cycle — no ambient mutable state. The stateful part
//! (spacing out repeated alerts) lives in [`AlertDebouncer`], owned by the
//! pipeline loop.

use serde::{Deserialize, Serialize};

use crate::classify::ClassSet;

/// Runtime-tunable knobs, snapshotted once per cycle by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tuning {
    /// Confidence threshold in [0, 1] below which a cycle is Uncertain.
    pub threshold: f32,
    /// Input gain multiplier applied to raw samples before windowing.
    pub gain: f32,
    /// Secondary confidence bound a Danger cycle must reach to request an
    /// audible/visual alert.
    pub alert_confidence: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            gain: 1.0,
            alert_confidence: 0.85,
        }
    }
}

/// Urgency classification of one processed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTier {
    /// Confidence below threshold — treat as background by default.
    Uncertain,
    /// Confident detection of a non-concerning class.
    Safe,
    /// Confident detection of a concerning class.
    Danger,
}

/// The per-cycle output handed to presentation/alerting collaborators.
///
/// Consumed and discarded by the caller; the engine retains no history
/// beyond the rolling window itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Label of the argmax class.
    pub label: String,
    /// Index of the argmax class in the configured class list.
    pub class_index: usize,
    /// Probability of the argmax class.
    pub confidence: f32,
    pub tier: AlertTier,
    /// Whether this cycle should trigger an audible/visual alert
    /// (debounced — a sustained detection does not refire every cycle).
    pub alert: bool,
    /// Raw RMS level of the analysis window, reported regardless of tier.
    pub rms: f32,
    /// Full probability vector in class-list order.
    pub probabilities: Vec<f32>,
}

/// Map one classifier output onto a `Decision`.
///
/// The alert flag is left `false`; the pipeline sets it through the
/// debouncer so the escalation policy stays in one place.
pub fn decide(probabilities: &[f32], rms: f32, classes: &ClassSet, tuning: &Tuning) -> Decision {
    let (class_index, confidence) = argmax(probabilities);
    let tier = if confidence < tuning.threshold {
        AlertTier::Uncertain
    } else if classes.is_concerning(class_index) {
        AlertTier::Danger
    } else {
        AlertTier::Safe
    };

    Decision {
        label: classes.label(class_index).to_string(),
        class_index,
        confidence,
        tier,
        alert: false,
        rms,
        probabilities: probabilities.to_vec(),
    }
}

fn argmax(probabilities: &[f32]) -> (usize, f32) {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((0, 0.0))
}

/// Cycle-based cooldown that spaces out repeated alerts.
///
/// A sustained high-confidence detection refires at most once per cooldown
/// window instead of every cycle; the danger tier itself is still reported
/// each cycle.
#[derive(Debug, Clone)]
pub struct AlertDebouncer {
    cooldown_cycles: u32,
    remaining: u32,
}

impl AlertDebouncer {
    /// `cooldown_cycles` cycles must elapse after a fired alert before the
    /// next one. Zero disables debouncing entirely.
    pub fn new(cooldown_cycles: u32) -> Self {
        Self {
            cooldown_cycles,
            remaining: 0,
        }
    }

    /// Feed one cycle's alert eligibility; returns whether to fire now.
    pub fn observe(&mut self, eligible: bool) -> bool {
        if eligible && self.remaining == 0 {
            self.remaining = self.cooldown_cycles;
            true
        } else {
            self.remaining = self.remaining.saturating_sub(1);
            false
        }
    }

    /// Clear the cooldown (e.g. when monitoring restarts).
    pub fn reset(&mut self) {
        self.remaining = 0;
    }
}
