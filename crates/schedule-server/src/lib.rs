//! # schedule-server
//!
//! JSON-over-HTTP surface for the scheduling engine:
//!
//! - `POST /book` books a session or series through the
//!   [`BookingCoordinator`](schedule_engine::BookingCoordinator)
//! - `POST /conflicts` lists the conflicts of a candidate slot
//! - `POST /alternatives` lists conflicts plus ranked alternative slots
//! - `GET /health`
//!
//! Configuration comes from `SCHEDULE_*` environment variables, see
//! [`ServerConfig::from_env`].

pub mod config;
pub mod http;
pub mod state;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
pub use http::{app, router};
pub use state::{AppState, Seed};
pub use telemetry::{init_tracing, TracingConfig, TracingOutputFormat};
