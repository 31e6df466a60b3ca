use std::sync::Arc;

use crate::config::Config;
use crate::conversation::{SessionRegistry, TurnController};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    #[allow(dead_code)]
    pub config: Config,
    /// Orchestrates the full turn flow; handlers never touch matching or
    /// extraction directly.
    pub controller: Arc<TurnController>,
    /// In-process session map; the persisted snapshot in Postgres is the
    /// durable copy.
    pub sessions: Arc<SessionRegistry>,
}
