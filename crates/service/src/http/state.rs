//! `AppState` — shared state for the SCEP HTTP layer.

use std::sync::Arc;

use scepd_core::dispatcher::DispatcherConfig;
use scepd_core::keystore::{CaHandle, CaStore};

#[derive(Clone)]
pub struct AppState {
    pub ca: Arc<CaHandle>,
    pub store: Arc<dyn CaStore>,
    pub dispatcher_config: Arc<DispatcherConfig>,
}
