//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the decision layer, the panelist voice backend, the
//! snapshot store and the loaded curriculum.

use crate::config::Config;
use crate::panelist::PanelistVoice;
use crate::store::InterviewStore;
use roundtable_core::{curriculum::Curriculum, decision::DecisionLayer};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. Each WebSocket session builds its own tracker from the shared
/// curriculum.
#[derive(Clone)]
pub struct AppState {
    pub decisions: Arc<dyn DecisionLayer>,
    pub voice: Arc<dyn PanelistVoice>,
    pub store: Arc<dyn InterviewStore>,
    pub curriculum: Curriculum,
    pub config: Arc<Config>,
}
