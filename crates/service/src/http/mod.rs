//! HTTP layer — `axum`-based SCEP transport shim.
//!
//! Provides:
//! - `config`: environment-driven `Config`
//! - `state`: `AppState` wiring the CA handle, storage collaborator, and dispatcher policy
//! - `router`: the route table (`/`, `/scep`, `/cgi-bin/pkiclient.exe`, all equivalent)
//! - `handlers`: request extraction and the single SCEP entry point

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;

pub use config::Config;
pub use router::create_router;
pub use state::AppState;
