//! Concrete `TemperatureProbe` implementations. The core only depends on
//! the trait (§4.7); these are the two real implementations a deployment
//! picks between via `THERMAL_SIMULATION_MODE`.

use std::sync::Mutex;

use voxd_core::ports::TemperatureProbe;

/// Reads `/sys/class/thermal/thermal_zone{N}/temp` on Linux (millidegrees
/// Celsius). Returns `None` — not an error — when the zone doesn't exist,
/// matching the "probe unavailable" edge case rather than raising.
#[derive(Debug, Clone)]
pub struct SysfsTemperatureProbe {
    zone_path: std::path::PathBuf,
}

impl SysfsTemperatureProbe {
    #[must_use]
    pub fn new(zone: u32) -> Self {
        Self {
            zone_path: format!("/sys/class/thermal/thermal_zone{zone}/temp").into(),
        }
    }
}

impl Default for SysfsTemperatureProbe {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TemperatureProbe for SysfsTemperatureProbe {
    fn read(&self) -> Option<f64> {
        let raw = std::fs::read_to_string(&self.zone_path).ok()?;
        let millidegrees: f64 = raw.trim().parse().ok()?;
        Some(millidegrees / 1000.0)
    }
}

/// Feeds a pre-programmed sequence of synthetic temperatures, one per
/// `read()` call; repeats the last value once exhausted. Used when
/// `THERMAL_SIMULATION_MODE` is set, and in tests.
#[derive(Debug)]
pub struct SimulatedProbe {
    samples: Mutex<Vec<f64>>,
    cursor: Mutex<usize>,
}

impl SimulatedProbe {
    #[must_use]
    pub fn new(samples: Vec<f64>) -> Self {
        Self {
            samples: Mutex::new(samples),
            cursor: Mutex::new(0),
        }
    }
}

impl TemperatureProbe for SimulatedProbe {
    fn read(&self) -> Option<f64> {
        let samples = self.samples.lock().expect("simulated probe lock poisoned");
        if samples.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock().expect("simulated probe lock poisoned");
        let idx = (*cursor).min(samples.len() - 1);
        *cursor = (*cursor + 1).min(samples.len() - 1);
        Some(samples[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_probe_advances_then_holds_last() {
        let probe = SimulatedProbe::new(vec![70.0, 90.0]);
        assert_eq!(probe.read(), Some(70.0));
        assert_eq!(probe.read(), Some(90.0));
        assert_eq!(probe.read(), Some(90.0));
    }

    #[test]
    fn missing_sysfs_zone_is_unavailable_not_an_error() {
        let probe = SysfsTemperatureProbe::new(9999);
        assert_eq!(probe.read(), None);
    }
}
