use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::ingest::Ingestor;
use crate::policy::{PermissionCheck, RolePermissions};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub ingestor: Ingestor,
    pub permissions: Arc<dyn PermissionCheck>,
}

impl AppState {
    pub fn new(config: Arc<Config>, db: DbPool, ingestor: Ingestor) -> Self {
        let permissions = Arc::new(RolePermissions::new(config.quota.clone()));
        Self {
            config,
            db,
            ingestor,
            permissions,
        }
    }
}
