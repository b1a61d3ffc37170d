//! Route definitions and router construction: the `/ws` upgrade and the
//! `/health` observable-state snapshot (§6.4).

use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::{AppContext, CorsConfig};
use crate::ws;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(allowed).allow_methods(Any).allow_headers(Any)
        }
    }
}

pub fn create_router(ctx: Arc<AppContext>, cors_config: &CorsConfig) -> Router {
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/health", get(health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

mod health {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::Json;
    use serde::Serialize;

    use voxd_core::metrics::{PipelineSnapshot, WorkerRecord};
    use voxd_core::session_store::SessionsSnapshot;

    use crate::bootstrap::AppContext;

    /// §6.4's thermal field names, mapped from [`voxd_runtime::thermal::ThermalState`]'s
    /// internal naming — the controller's own field names don't match the
    /// wire shape this section needs.
    #[derive(Debug, Serialize)]
    struct ThermalSnapshot {
        current_c: f64,
        protection_active: bool,
        trigger_count: u64,
        max_observed_c: f64,
        supported: bool,
    }

    #[derive(Debug, Serialize)]
    pub(crate) struct HealthSnapshot {
        thermal: ThermalSnapshot,
        sessions: SessionsSnapshot,
        pipeline: PipelineSnapshot,
        workers: Vec<WorkerRecord>,
    }

    pub(crate) async fn health_check(State(ctx): State<Arc<AppContext>>) -> Json<HealthSnapshot> {
        let thermal = ctx.thermal.snapshot();
        Json(HealthSnapshot {
            thermal: ThermalSnapshot {
                current_c: thermal.current_temp_c,
                protection_active: thermal.protection_active,
                trigger_count: thermal.trigger_count,
                max_observed_c: thermal.max_observed,
                supported: thermal.platform_supported,
            },
            sessions: ctx.session_store.snapshot(),
            pipeline: ctx.metrics.snapshot(),
            workers: ctx.worker_records(),
        })
    }
}
