//! Environment-driven configuration for every tunable named in §6.3, plus
//! the component defaults scattered through §4. Each struct is
//! `serde(default)` so partial JSON/TOML overrides work, and carries a
//! `from_env()` constructor that reads the corresponding `VOXD_*`
//! variable and falls back to `Default` on absence or parse failure
//! (logging a warning, never panicking).

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "failed to parse env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// §4.2 Thermal Controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub enabled: bool,
    pub trigger_c: f64,
    pub resume_c: f64,
    pub poll_interval_s: f64,
    pub simulation_mode: bool,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_c: 85.0,
            resume_c: 80.0,
            poll_interval_s: 1.0,
            simulation_mode: false,
        }
    }
}

impl ThermalConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            enabled: env_or("THERMAL_ENABLED", d.enabled),
            trigger_c: env_or("THERMAL_TRIGGER_C", d.trigger_c),
            resume_c: env_or("THERMAL_RESUME_C", d.resume_c),
            poll_interval_s: env_or("THERMAL_POLL_INTERVAL_S", d.poll_interval_s),
            simulation_mode: env_or("THERMAL_SIMULATION_MODE", d.simulation_mode),
        }
    }

    /// `TRIGGER_C <= RESUME_C` is rejected at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.trigger_c <= self.resume_c {
            return Err(format!(
                "THERMAL_TRIGGER_C ({}) must be greater than THERMAL_RESUME_C ({})",
                self.trigger_c, self.resume_c
            ));
        }
        Ok(())
    }
}

/// §4.3 Session Store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_s: u64,
    pub sweep_interval_s: u64,
    pub max_context_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_s: 300,
            sweep_interval_s: 60,
            max_context_turns: 100,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ttl_s: env_or("SESSION_TTL_S", d.ttl_s),
            sweep_interval_s: env_or("SESSION_SWEEP_INTERVAL_S", d.sweep_interval_s),
            max_context_turns: env_or("MAX_CONTEXT_TURNS", d.max_context_turns),
        }
    }
}

/// §4.5 Turn-End Detector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectorConfig {
    pub w_base_s: f64,
    pub w_min_s: f64,
    pub w_max_s: f64,
    pub short_words: usize,
    pub w_short_s: f64,
    pub f_strong: f64,
    pub f_weak: f64,
    pub n_tail: usize,
    pub k_chars: usize,
    pub f_repeat: f64,
    pub f_eou_min: f64,
    pub speed_factor: f64,
    pub min_commit_chars: usize,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            w_base_s: 0.6,
            w_min_s: 0.1,
            w_max_s: 2.0,
            short_words: 4,
            w_short_s: 0.5,
            f_strong: 0.6,
            f_weak: 0.85,
            n_tail: 4,
            k_chars: 40,
            f_repeat: 0.7,
            f_eou_min: 0.2,
            speed_factor: 0.5,
            min_commit_chars: 2,
        }
    }
}

impl TurnDetectorConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            w_base_s: env_or("TURN_W_BASE_S", d.w_base_s),
            w_min_s: env_or("TURN_W_MIN_S", d.w_min_s),
            w_max_s: env_or("TURN_W_MAX_S", d.w_max_s),
            speed_factor: env_or("TURN_SPEED_FACTOR", d.speed_factor),
            ..d
        }
    }
}

/// §4.6 Pipeline Manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio_queue_max: usize,
    pub llm_tts_queue_max: usize,
    pub tts_egress_queue_max: usize,
    pub tts_chunk_max_chars: usize,
    pub tts_first_chunk_timeout_s: f64,
    pub barge_in_ms: u64,
    pub stable_ms: u64,
    pub sim_threshold: f64,
    pub tail_words: usize,
    pub speculative_enabled: bool,
    pub llm_first_token_timeout_s: f64,
    pub llm_total_timeout_s: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_queue_max: 50,
            llm_tts_queue_max: 8,
            tts_egress_queue_max: 64,
            tts_chunk_max_chars: 160,
            tts_first_chunk_timeout_s: 2.0,
            barge_in_ms: 150,
            stable_ms: 250,
            sim_threshold: 0.90,
            tail_words: 8,
            speculative_enabled: false,
            llm_first_token_timeout_s: 5.0,
            llm_total_timeout_s: 30.0,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            audio_queue_max: env_or("AUDIO_QUEUE_MAX", d.audio_queue_max),
            tts_chunk_max_chars: env_or("TTS_CHUNK_MAX_CHARS", d.tts_chunk_max_chars),
            tts_first_chunk_timeout_s: env_or(
                "TTS_FIRST_CHUNK_TIMEOUT_S",
                d.tts_first_chunk_timeout_s,
            ),
            ..d
        }
    }
}

/// §4.1 Worker Lifecycle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub join_timeout_s: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { join_timeout_s: 5.0 }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            join_timeout_s: env_or("WORKER_JOIN_TIMEOUT_S", Self::default().join_timeout_s),
        }
    }
}

/// Aggregate of every component config, read once at startup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub thermal: ThermalConfig,
    pub session: SessionConfig,
    pub turn_detector: TurnDetectorConfig,
    pub pipeline: PipelineConfig,
    pub worker: WorkerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let thermal = ThermalConfig::from_env();
        thermal.validate()?;
        Ok(Self {
            thermal,
            session: SessionConfig::from_env(),
            turn_detector: TurnDetectorConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            worker: WorkerConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_rejects_trigger_at_or_below_resume() {
        let cfg = ThermalConfig {
            trigger_c: 80.0,
            resume_c: 80.0,
            ..ThermalConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn thermal_accepts_default() {
        assert!(ThermalConfig::default().validate().is_ok());
    }
}
