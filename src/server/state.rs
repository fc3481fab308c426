use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::connection::Manager;
use crate::postgres::{PgProvider, PoolProvider};

pub struct AppState<P: PoolProvider = PgProvider> {
    pub settings: Arc<Settings>,
    pub manager: Arc<Manager<P>>,
    pub start_time: Instant,
}

impl<P: PoolProvider> AppState<P> {
    pub fn new(settings: Settings, manager: Arc<Manager<P>>) -> Self {
        Self {
            settings: Arc::new(settings),
            manager,
            start_time: Instant::now(),
        }
    }
}

// Derive would require `P: Clone`
impl<P: PoolProvider> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            manager: Arc::clone(&self.manager),
            start_time: self.start_time,
        }
    }
}
