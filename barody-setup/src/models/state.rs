// Application state (in-memory)
//
// NOTE: Nothing here is persisted. Durable installation state lives in the state files and the
// account store behind `InstallationService`; this only wires shared handles into handlers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::session::SessionStore;
use crate::config::Settings;
use crate::installation::InstallationService;

/// Setup state machine. Transitions happen only through `InstallationService`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    /// No installation record and no live token.
    #[default]
    Setup,
    /// A live one-time token is waiting to be exchanged through the web flow.
    SetupTokenIssued,
    /// Installation record written; the gate lets every request through.
    Operational,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InstallationService>,
    pub sessions: SessionStore,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(service: Arc<InstallationService>, settings: Settings) -> Self {
        Self {
            service,
            sessions: SessionStore::default(),
            settings: Arc::new(settings),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.settings.session_cookie
    }
}
