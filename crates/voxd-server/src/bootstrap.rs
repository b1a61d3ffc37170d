//! Composition root. This module is the only place where concrete
//! STT/LLM/TTS engines, the session store, and the thermal controller are
//! instantiated and wired together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use voxd_core::cancel::CancelToken;
use voxd_core::config::AppConfig;
use voxd_core::domain::SessionId;
use voxd_core::metrics::PipelineMetrics;
use voxd_core::ports::UnavailableProbe;
use voxd_core::session_store::SessionStore;
use voxd_pipeline::{ConversationPipeline, OutboundEvent, TurnDetector};
use voxd_runtime::probe::{SimulatedProbe, SysfsTemperatureProbe};
use voxd_runtime::thermal::ThermalController;
use voxd_runtime::worker::WorkerHandle;

use crate::engines::{EchoLlm, SilentStt, SilentTts};
use crate::session_context::SessionTurnContext;

/// CORS posture for the plain-HTTP surface (`/health`). The `/ws` upgrade
/// itself is exempt from CORS — browsers don't apply it to WebSocket
/// handshakes — so this only shapes what `/health` exposes to script
/// callers on another origin.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    #[default]
    AllowAll,
    AllowOrigins(Vec<String>),
}

/// Everything `main` needs to start listening.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub app: AppConfig,
    pub cors: CorsConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let app = AppConfig::from_env().map_err(anyhow::Error::msg)?;
        let port = std::env::var("VOXD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        Ok(Self {
            port,
            app,
            cors: CorsConfig::default(),
        })
    }
}

/// Live application context shared by every handler, built once at startup.
pub struct AppContext {
    pub config: AppConfig,
    pub session_store: Arc<SessionStore>,
    pub thermal: Arc<ThermalController>,
    pub metrics: Arc<PipelineMetrics>,
    sweep_worker: WorkerHandle,
    /// One live-connection token per session id, enforcing I1 (§4.4): a
    /// session is bound to at most one live WebSocket at a time.
    bindings: Mutex<HashMap<SessionId, CancelToken>>,
}

impl AppContext {
    /// Bind `session_id` to a new connection. If a connection is already
    /// bound, its token is cancelled (last-writer-wins, §4.4) so that
    /// connection's watcher closes it with `session_superseded` before this
    /// call returns.
    #[must_use]
    pub fn bind_connection(&self, session_id: SessionId) -> CancelToken {
        let mut bindings = self.bindings.lock().expect("connection bindings lock poisoned");
        if let Some(previous) = bindings.remove(&session_id) {
            previous.cancel();
        }
        let token = CancelToken::new();
        bindings.insert(session_id, token.clone());
        token
    }

    /// Release the binding iff it still belongs to `token` — a connection
    /// that was superseded must not clobber the binding of the connection
    /// that superseded it.
    pub fn unbind_connection(&self, session_id: SessionId, token: &CancelToken) {
        let mut bindings = self.bindings.lock().expect("connection bindings lock poisoned");
        if bindings.get(&session_id).is_some_and(|current| current.ptr_eq(token)) {
            bindings.remove(&session_id);
        }
    }

    /// One live WebSocket connection's worth of pipeline, bound to
    /// `session_id`'s conversational context. The STT/LLM/TTS engines are
    /// fresh per connection; the session store, thermal controller, and
    /// metrics reservoir are shared.
    #[must_use]
    pub fn new_pipeline(
        self: &Arc<Self>,
        session_id: SessionId,
    ) -> (Arc<ConversationPipeline>, tokio::sync::mpsc::UnboundedReceiver<OutboundEvent>) {
        let turn_detector = TurnDetector::new(self.config.turn_detector);
        let context = Arc::new(SessionTurnContext::new(self.session_store.clone(), session_id));

        ConversationPipeline::new(
            session_id.to_string(),
            self.config.pipeline,
            turn_detector,
            Arc::new(SilentStt::default()),
            Arc::new(EchoLlm::default()),
            Arc::new(SilentTts::default()),
            Some(self.thermal.clone()),
            context,
            self.metrics.clone(),
        )
    }

    /// `[{name, alive, last_started_at}]` for the §6.4 observable-state
    /// snapshot. Only process-wide workers are listed here — per-connection
    /// pipeline workers come and go with each WebSocket and aren't part of
    /// this steady-state view.
    #[must_use]
    pub fn worker_records(&self) -> Vec<voxd_core::metrics::WorkerRecord> {
        vec![voxd_core::metrics::WorkerRecord {
            name: self.sweep_worker.name().to_string(),
            alive: self.sweep_worker.is_alive(),
            last_started_at: self.sweep_worker.last_started_at().unwrap_or_default(),
        }]
    }

    pub async fn shutdown(&self) {
        self.thermal.stop().await;
        self.sweep_worker
            .stop_and_join(std::time::Duration::from_secs_f64(self.config.worker.join_timeout_s))
            .await;
    }
}

/// Build the shared application state: session store, thermal controller
/// with the probe implied by `config.thermal.simulation_mode`, and the
/// session TTL sweep worker.
pub async fn bootstrap(config: AppConfig) -> Result<Arc<AppContext>> {
    let session_store = Arc::new(SessionStore::with_capacity(
        config.session.ttl_s,
        config.session.max_context_turns,
    ));

    let probe: Arc<dyn voxd_core::ports::TemperatureProbe> = if !config.thermal.enabled {
        Arc::new(UnavailableProbe)
    } else if config.thermal.simulation_mode {
        // No real sensor to read in simulation mode: oscillate around the
        // configured trigger/resume band so the hysteresis state machine
        // has something to exercise.
        let below = config.thermal.resume_c - 5.0;
        let above = config.thermal.trigger_c + 5.0;
        let cycle = vec![below, config.thermal.trigger_c, above, config.thermal.resume_c];
        Arc::new(SimulatedProbe::new(cycle.repeat(64)))
    } else {
        Arc::new(SysfsTemperatureProbe::default())
    };
    let thermal = Arc::new(ThermalController::new(config.thermal, probe).map_err(anyhow::Error::msg)?);
    thermal.start();

    let sweep_worker = WorkerHandle::new("session-sweep");
    let sweep_interval = std::time::Duration::from_secs(config.session.sweep_interval_s.max(1));
    let sweep_store = session_store.clone();
    sweep_worker
        .start_periodic(sweep_interval, move || {
            let removed = sweep_store.sweep();
            if removed > 0 {
                tracing::debug!(removed, "session sweep removed expired sessions");
            }
        })
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    Ok(Arc::new(AppContext {
        config,
        session_store,
        thermal,
        metrics: Arc::new(PipelineMetrics::new()),
        sweep_worker,
        bindings: Mutex::new(HashMap::new()),
    }))
}

/// Bootstrap and serve on `config.port` until the process is killed.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;

    let ctx = bootstrap(config.app).await?;
    let app = crate::routes::create_router(ctx.clone(), &config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("voxd-server listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
