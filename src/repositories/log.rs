//! Write-only placed-order sink that emits each snapshot as a structured
//! log line. Useful as a stand-in durable sink in demos and tests; real
//! deployments point [`PlacedOrderRepository`] at their archival store.

use crate::errors::RepositoryError;
use crate::models::PlacedOrder;
use crate::repositories::{PlacedOrderRepository, RepoResult};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAdapter;

impl LogAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlacedOrderRepository for LogAdapter {
    async fn place_order(&self, order: PlacedOrder) -> RepoResult<()> {
        let snapshot = serde_json::to_string(&order).map_err(|e| {
            RepositoryError::Storage(anyhow::anyhow!("failed to serialize placed order: {e}"))
        })?;
        info!(user_id = %order.user_id, total = order.total, %snapshot, "placed order");
        Ok(())
    }
}
