use std::sync::Arc;

use casestats_core::Config;
use casestats_loader::CaseLoader;

/// Shared by every handler. The loader is the only source of case data.
pub struct AppState {
    pub loader: Arc<CaseLoader>,
    pub config: Config,
}
