// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::{Config, NOTIFICATION_BUFFER},
    utils::{
        notify::Notifier,
        storage::{LocalStore, ObjectStore},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub storage: Arc<dyn ObjectStore>,
    pub notifier: Notifier,
}

impl AppState {
    /// Wires the local-disk object store and a fresh notifier around `pool`.
    pub fn new(pool: PgPool, config: Config) -> Self {
        let storage = Arc::new(LocalStore::new(config.upload_dir.clone(), "/uploads"));
        Self {
            pool,
            config,
            storage,
            notifier: Notifier::new(NOTIFICATION_BUFFER),
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn ObjectStore> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.storage)
    }
}

impl FromRef<AppState> for Notifier {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}
