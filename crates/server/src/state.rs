use std::sync::Arc;

use ao_domain::config::Config;
use ao_engine::{EventBus, TaskService};

/// Shared application state passed to every API handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tasks: Arc<TaskService>,
    pub events: Arc<EventBus>,
}
