use std::sync::Arc;

use crate::alerts::AlertService;
use crate::config::Config;
use crate::ml::SlaPredictor;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub predictor: Arc<SlaPredictor>,
    pub alerts: Arc<AlertService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Pool, predictor: Arc<SlaPredictor>, alerts: AlertService, config: Config) -> Self {
        Self {
            pool,
            predictor,
            alerts: Arc::new(alerts),
            config: Arc::new(config),
        }
    }
}
