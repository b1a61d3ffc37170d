//! Turn-End Detector (§4.5): given a stream of partial-transcript revisions,
//! emits a smoothed "wait before committing" duration. The Pipeline Manager
//! commits the turn once elapsed-since-last-change exceeds that wait and the
//! transcript clears the minimum-content rule.
//!
//! The source collapses two silence/worker threads whose interaction under
//! rapid partial updates wasn't clearly specified into the single logical
//! updater implemented here — the second thread's role was a periodic timer
//! wake-up, not independent state, so one struct advanced by one method call
//! per revision is equivalent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use voxd_core::config::TurnDetectorConfig;

use crate::similarity::{normalize_text, tail_key};

/// Pluggable end-of-utterance probability classifier (§4.7: "a capability
/// set `{predict(text) -> p ∈ [0,1]}`"). A classifier error is logged once
/// per distinct error message and treated as `factor = 1.0` — the detector
/// itself never raises.
pub trait EouClassifier: Send + Sync {
    fn predict(&self, text: &str) -> Result<f64, String>;
}

const EOU_CACHE_CAP: usize = 256;

struct EouCache {
    values: HashMap<String, f64>,
    order: VecDeque<String>,
}

impl EouCache {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get_or_insert(&mut self, key: &str, value: f64) -> f64 {
        if let Some(existing) = self.values.get(key) {
            return *existing;
        }
        if self.order.len() >= EOU_CACHE_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.values.remove(&evicted);
            }
        }
        self.order.push_back(key.to_string());
        self.values.insert(key.to_string(), value);
        value
    }
}

/// Per-connection detector state: the tail ring, last emitted wait, and the
/// EOU result cache (§4.5 "State").
pub struct TurnDetector {
    config: TurnDetectorConfig,
    classifier: Option<Box<dyn EouClassifier>>,
    tail_ring: Mutex<VecDeque<String>>,
    eou_cache: Mutex<EouCache>,
    last_wait_s: Mutex<Option<f64>>,
    logged_classifier_errors: Mutex<HashSet<String>>,
}

impl TurnDetector {
    #[must_use]
    pub fn new(config: TurnDetectorConfig) -> Self {
        Self {
            config,
            classifier: None,
            tail_ring: Mutex::new(VecDeque::with_capacity(config.n_tail)),
            eou_cache: Mutex::new(EouCache::new()),
            last_wait_s: Mutex::new(None),
            logged_classifier_errors: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Box<dyn EouClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Process one partial-transcript revision and return the wait, in
    /// seconds, that the caller should require to elapse (since the last
    /// change) before committing.
    pub fn process(&self, text: &str) -> f64 {
        let normalized = normalize_text(text);
        let word_count = normalized.split_whitespace().count();

        let mut wait = self.config.w_base_s;

        if word_count < self.config.short_words {
            wait += self.config.w_short_s;
        }

        wait *= ending_punctuation_factor(&normalized, self.config.f_strong, self.config.f_weak);
        wait *= self.repeated_tail_factor(&normalized);
        wait *= self.eou_factor(&normalized);

        wait = wait.clamp(self.config.w_min_s, self.config.w_max_s);
        wait = self.smooth(wait);
        wait.clamp(self.config.w_min_s, self.config.w_max_s)
    }

    fn repeated_tail_factor(&self, normalized: &str) -> f64 {
        let key = tail_key(normalized, self.config.k_chars);
        let mut ring = self.tail_ring.lock().expect("tail ring lock poisoned");
        let repeated = ring.contains(&key);
        if ring.len() >= self.config.n_tail {
            ring.pop_front();
        }
        ring.push_back(key);
        if repeated {
            self.config.f_repeat
        } else {
            1.0
        }
    }

    fn eou_factor(&self, normalized: &str) -> f64 {
        let Some(classifier) = &self.classifier else {
            return 1.0;
        };
        match classifier.predict(normalized) {
            Ok(p_eou) => {
                let cached = self
                    .eou_cache
                    .lock()
                    .expect("eou cache lock poisoned")
                    .get_or_insert(normalized, p_eou);
                (1.0 - cached).clamp(self.config.f_eou_min, 1.0)
            }
            Err(kind) => {
                let mut seen = self
                    .logged_classifier_errors
                    .lock()
                    .expect("classifier error log lock poisoned");
                if seen.insert(kind.clone()) {
                    tracing::warn!(error = %kind, "eou classifier failed; treating as neutral");
                }
                1.0
            }
        }
    }

    fn smooth(&self, computed: f64) -> f64 {
        let mut last = self.last_wait_s.lock().expect("last wait lock poisoned");
        let emitted = match *last {
            Some(prev) => prev + self.config.speed_factor * (computed - prev),
            None => computed,
        };
        *last = Some(emitted);
        emitted
    }

    /// Minimum committed-text length, in chars, for the commit condition
    /// in §4.6.1 step 3.
    #[must_use]
    pub fn min_commit_chars(&self) -> usize {
        self.config.min_commit_chars
    }

    /// Return the detector to its new-turn baseline. Invoked by the
    /// Pipeline Manager whenever a turn commits.
    pub fn reset(&self) {
        self.tail_ring
            .lock()
            .expect("tail ring lock poisoned")
            .clear();
        *self.last_wait_s.lock().expect("last wait lock poisoned") = None;
    }
}

/// Ending-punctuation discount (§4.5): `.!?` -> `f_strong`, `,;:` -> `f_weak`,
/// otherwise no adjustment.
fn ending_punctuation_factor(normalized: &str, f_strong: f64, f_weak: f64) -> f64 {
    match normalized.trim_end().chars().next_back() {
        Some('.' | '!' | '?') => f_strong,
        Some(',' | ';' | ':') => f_weak,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> TurnDetector {
        TurnDetector::new(TurnDetectorConfig::default())
    }

    #[test]
    fn short_utterance_gets_a_bonus_over_base() {
        let d = detector();
        // First revision: no smoothing history yet, so emitted == computed.
        let wait = d.process("yes");
        assert!(wait > TurnDetectorConfig::default().w_base_s);
    }

    #[test]
    fn strong_ending_punctuation_shortens_the_wait() {
        let d = detector();
        let with_period = d.process("I am finished now with this thought.");
        let d2 = detector();
        let without = d2.process("I am finished now with this thought");
        assert!(with_period < without);
    }

    #[test]
    fn repeated_tail_is_dampened() {
        let d = detector();
        let _first = d.process("so I was thinking maybe we should go");
        let second = d.process("so I was thinking maybe we should go");
        let d2 = detector();
        let _baseline_first = d2.process("completely different text here now");
        let baseline_second = d2.process("and something else entirely unrelated");
        assert!(second < baseline_second);
    }

    #[test]
    fn wait_is_clamped_to_configured_bounds() {
        let cfg = TurnDetectorConfig {
            w_min_s: 0.3,
            w_max_s: 0.4,
            ..TurnDetectorConfig::default()
        };
        let d = TurnDetector::new(cfg);
        let wait = d.process("hi");
        assert!(wait >= 0.3 && wait <= 0.4);
    }

    #[test]
    fn reset_clears_tail_ring_and_smoothing_history() {
        let d = detector();
        let _ = d.process("so I was thinking maybe we should go");
        d.reset();
        assert!(d.tail_ring.lock().unwrap().is_empty());
        assert!(d.last_wait_s.lock().unwrap().is_none());
    }

    struct FailingClassifier;
    impl EouClassifier for FailingClassifier {
        fn predict(&self, _text: &str) -> Result<f64, String> {
            Err("model unavailable".to_string())
        }
    }

    #[test]
    fn classifier_failure_does_not_change_the_wait() {
        let with_classifier =
            TurnDetector::new(TurnDetectorConfig::default()).with_classifier(Box::new(FailingClassifier));
        let without_classifier = TurnDetector::new(TurnDetectorConfig::default());
        assert_eq!(
            with_classifier.process("hello there"),
            without_classifier.process("hello there")
        );
    }

    struct FixedClassifier(f64);
    impl EouClassifier for FixedClassifier {
        fn predict(&self, _text: &str) -> Result<f64, String> {
            Ok(self.0)
        }
    }

    #[test]
    fn high_eou_probability_shortens_the_wait() {
        let confident =
            TurnDetector::new(TurnDetectorConfig::default()).with_classifier(Box::new(FixedClassifier(0.9)));
        let unsure =
            TurnDetector::new(TurnDetectorConfig::default()).with_classifier(Box::new(FixedClassifier(0.0)));
        assert!(confident.process("some utterance here") < unsure.process("some utterance here"));
    }
}
