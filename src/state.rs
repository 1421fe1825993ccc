use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::s3::StorageService;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: RabbitMqService,
    pub storage: StorageService,
}

impl AppState {
    pub fn new(config: AppConfig, queue: RabbitMqService, storage: StorageService) -> Self {
        Self {
            config,
            queue,
            storage,
        }
    }
}
