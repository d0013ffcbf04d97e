use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use tsbs_load::{BoxError, DbCreator};

use super::storage::PromStorage;

/// Prometheus has no notion of databases; creating one only waits for the server to be ready
#[derive(Debug)]
pub struct PromCreator {
    storage: Arc<PromStorage>,
    skip_ready_check: bool,
}

impl PromCreator {
    pub fn new(storage: Arc<PromStorage>, skip_ready_check: bool) -> Self {
        Self {
            storage,
            skip_ready_check,
        }
    }
}

#[async_trait]
impl DbCreator for PromCreator {
    async fn init(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn db_exists(&self, _db_name: &str) -> Result<bool, BoxError> {
        Ok(false)
    }

    async fn remove_old_db(&self, _db_name: &str) -> Result<(), BoxError> {
        Ok(())
    }

    async fn create_db(&self, _db_name: &str) -> Result<(), BoxError> {
        if self.skip_ready_check {
            return Ok(());
        }
        self.storage.ready().await?;
        info!(url = %self.storage.write_url(), "storage is ready");
        Ok(())
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.storage.close();
        Ok(())
    }
}
