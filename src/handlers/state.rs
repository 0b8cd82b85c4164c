//! Application state shared by all handlers.

use anyhow::Result;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::models::{Task, User};
use crate::store::Collection;

/// Shared application state: the two collections plus the consistency
/// engine that mediates every mutation of them.
pub struct AppState {
    pub config: ServerConfig,
    pub tasks: Collection<Task>,
    pub users: Collection<User>,
    pub engine: Engine,
}

/// State handle as seen by handlers.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let tasks = Collection::<Task>::open(&config.storage_path)?;
        let users = Collection::<User>::open(&config.storage_path)?;
        let engine = Engine::new(tasks.clone(), users.clone());
        Ok(Self {
            config,
            tasks,
            users,
            engine,
        })
    }
}
