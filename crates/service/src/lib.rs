//! `scepd-service`: composes `scepd-core`'s SCEP pipeline into an `axum` HTTP application.
//! Route table, request extraction (query `operation`, `message` param, body/chunked
//! reassembly), `AppState`, and environment-based `Config` all live here.

pub mod http;

pub use http::{create_router, AppState, Config};
