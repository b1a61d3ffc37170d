//! Axum web server adapter: WebSocket transport, composition root, and
//! health endpoint. This crate is the only one that knows about HTTP or
//! WebSockets; `voxd-pipeline` and `voxd-core` stay transport-agnostic.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use hyper as _;
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tokio_test as _;
#[cfg(test)]
use tokio_tungstenite as _;
#[cfg(test)]
use tower as _;
use tracing_subscriber as _;

pub mod bootstrap;
pub mod engines;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod session_context;
pub mod state;
pub mod ws;

pub use bootstrap::{bootstrap, start_server, AppContext, CorsConfig, ServerConfig};
pub use error::HttpError;
pub use routes::create_router;
pub use state::AppState;
