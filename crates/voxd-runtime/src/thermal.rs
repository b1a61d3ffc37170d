//! Thermal protection controller (§4.2): samples a temperature probe on a
//! fixed interval, applies a Schmitt-trigger hysteresis update, and fires
//! registered callbacks synchronously whenever the state transitions. The
//! polling shape emits only on change; the hysteresis state machine decides
//! when a change has happened.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use voxd_core::config::ThermalConfig;
use voxd_core::ports::TemperatureProbe;
use voxd_core::trace::PipelineEvent;

use crate::worker::{ShouldStop, WorkerHandle};

/// Current thermal reading plus hysteresis bookkeeping, published at the
/// end of every poll that results in a change and readable at any time via
/// `ThermalController::snapshot`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ThermalState {
    /// -1.0 when the probe is unavailable.
    pub current_temp_c: f64,
    pub protection_active: bool,
    pub trigger_count: u64,
    pub max_observed: f64,
    pub last_checked: DateTime<Utc>,
    pub platform_supported: bool,
}

impl Default for ThermalState {
    fn default() -> Self {
        Self {
            current_temp_c: -1.0,
            protection_active: false,
            trigger_count: 0,
            max_observed: -1.0,
            last_checked: Utc::now(),
            platform_supported: false,
        }
    }
}

type TransitionCallback = Box<dyn Fn(bool) + Send + Sync>;

pub struct ThermalController {
    config: ThermalConfig,
    probe: Arc<dyn TemperatureProbe>,
    state: RwLock<ThermalState>,
    callbacks: Mutex<Vec<TransitionCallback>>,
    worker: WorkerHandle,
}

impl ThermalController {
    /// `TRIGGER_C <= RESUME_C` is rejected at construction, mirroring the
    /// startup validation in `ThermalConfig::validate`.
    pub fn new(config: ThermalConfig, probe: Arc<dyn TemperatureProbe>) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            state: RwLock::new(ThermalState::default()),
            callbacks: Mutex::new(Vec::new()),
            worker: WorkerHandle::new("thermal-controller"),
        })
    }

    /// Register a callback invoked with the new `protection_active` value
    /// whenever the state transitions. A panicking callback is caught,
    /// logged, and discarded — it cannot wedge the controller or prevent
    /// later callbacks from running.
    pub fn on_transition(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .expect("thermal callback lock poisoned")
            .push(Box::new(callback));
    }

    #[must_use]
    pub fn snapshot(&self) -> ThermalState {
        *self.state.read().expect("thermal state lock poisoned")
    }

    /// Start the poll worker. A no-op (state stays `NORMAL` forever) when
    /// `config.enabled` is false.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            tracing::info!("thermal controller disabled; protection will never activate");
            return;
        }
        let controller = self.clone();
        let period = Duration::from_secs_f64(self.config.poll_interval_s.max(0.01));
        let _ = self.worker.start(move |should_stop: ShouldStop| async move {
            // Capped to 100ms so shutdown latency is bounded even when
            // poll_interval_s is configured much longer than that.
            let check_period = period.min(Duration::from_millis(100));
            let mut ticker = tokio::time::interval(check_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut elapsed = Duration::ZERO;
            while !should_stop.is_set() {
                ticker.tick().await;
                elapsed += check_period;
                if elapsed >= period {
                    elapsed = Duration::ZERO;
                    controller.sample();
                }
            }
        });
    }

    pub async fn stop(&self) {
        self.worker
            .stop_and_join(Duration::from_secs_f64(self.config.poll_interval_s.max(1.0) + 1.0))
            .await;
    }

    /// One sampling cycle: read the probe, apply the Schmitt update, and
    /// fire callbacks if the state changed. Exposed for tests and for
    /// `SIMULATION_MODE` drivers that want to step the controller
    /// manually.
    pub fn sample(&self) {
        let reading = std::panic::catch_unwind(AssertUnwindSafe(|| self.probe.read()))
            .unwrap_or_else(|_| {
                tracing::warn!("temperature probe panicked; treating sample as unavailable");
                None
            });

        let transition = {
            let mut state = self.state.write().expect("thermal state lock poisoned");
            state.last_checked = Utc::now();

            let Some(temp) = reading else {
                // Probe unavailable for this sample: no transition, and if
                // we have never seen a reading, platform support stays
                // unknown/false (§4.2 edge case).
                return;
            };

            state.platform_supported = true;
            state.current_temp_c = temp;
            state.max_observed = state.max_observed.max(temp);

            let was_active = state.protection_active;
            let now_active = if was_active {
                !(temp < self.config.resume_c)
            } else {
                temp >= self.config.trigger_c
            };

            if now_active == was_active {
                None
            } else {
                state.protection_active = now_active;
                if now_active {
                    state.trigger_count += 1;
                }
                Some((now_active, temp))
            }
        };

        if let Some((now_active, temp)) = transition {
            tracing::info!(protection_active = now_active, temp_c = temp, "thermal state transition");
            PipelineEvent::ThermalTransition {
                protection_active: now_active,
                temp_c: temp,
            }
            .emit();
            self.fire_callbacks(now_active);
        }
    }

    fn fire_callbacks(&self, protection_active: bool) {
        let callbacks = self.callbacks.lock().expect("thermal callback lock poisoned");
        for callback in callbacks.iter() {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(protection_active))).is_err() {
                tracing::error!("thermal transition callback panicked; discarding");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FixedProbe(Mutex<Vec<Option<f64>>>);

    impl TemperatureProbe for FixedProbe {
        fn read(&self) -> Option<f64> {
            let mut samples = self.0.lock().unwrap();
            if samples.is_empty() {
                None
            } else {
                samples.remove(0)
            }
        }
    }

    fn controller_with(samples: Vec<Option<f64>>) -> ThermalController {
        let probe = Arc::new(FixedProbe(Mutex::new(samples)));
        ThermalController::new(ThermalConfig::default(), probe).unwrap()
    }

    #[test]
    fn rejects_trigger_at_or_below_resume() {
        let probe = Arc::new(FixedProbe(Mutex::new(vec![])));
        let bad = ThermalConfig {
            trigger_c: 80.0,
            resume_c: 85.0,
            ..ThermalConfig::default()
        };
        assert!(ThermalController::new(bad, probe).is_err());
    }

    #[test]
    fn unavailable_probe_stays_normal_forever() {
        let controller = controller_with(vec![None, None, None]);
        for _ in 0..3 {
            controller.sample();
        }
        let snap = controller.snapshot();
        assert!(!snap.protection_active);
        assert!(!snap.platform_supported);
    }

    #[test]
    fn schmitt_trajectory_matches_scenario_5() {
        // 70, 80, 84, 85, 88, 86, 79, 75 -> F F F T T T F F
        let controller = controller_with(
            vec![70.0, 80.0, 84.0, 85.0, 88.0, 86.0, 79.0, 75.0]
                .into_iter()
                .map(Some)
                .collect(),
        );
        let expected = [false, false, false, true, true, true, false, false];
        for expect in expected {
            controller.sample();
            assert_eq!(controller.snapshot().protection_active, expect);
        }
        assert_eq!(controller.snapshot().trigger_count, 1);
    }

    #[test]
    fn no_transition_without_crossing_threshold() {
        let controller = controller_with(vec![Some(50.0), Some(60.0), Some(70.0)]);
        for _ in 0..3 {
            controller.sample();
        }
        assert!(!controller.snapshot().protection_active);
    }

    #[test]
    fn callbacks_fire_on_transition_and_survive_a_panicking_listener() {
        let controller = controller_with(vec![Some(70.0), Some(90.0)]);
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        controller.on_transition(move |_active| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        controller.on_transition(|_active| panic!("bad listener"));
        let fired_after_bad = Arc::new(AtomicBool::new(false));
        let fired_after_bad_clone = fired_after_bad.clone();
        controller.on_transition(move |_active| {
            fired_after_bad_clone.store(true, Ordering::SeqCst);
        });

        controller.sample(); // 70, no transition yet
        controller.sample(); // 90, crosses TRIGGER_C

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(fired_after_bad.load(Ordering::SeqCst));
    }

    #[test]
    fn probe_panic_is_treated_as_unavailable_for_that_sample() {
        struct PanickingProbe;
        impl TemperatureProbe for PanickingProbe {
            fn read(&self) -> Option<f64> {
                panic!("sensor exploded");
            }
        }
        let controller =
            ThermalController::new(ThermalConfig::default(), Arc::new(PanickingProbe)).unwrap();
        controller.sample();
        assert!(!controller.snapshot().protection_active);
    }
}
