//! Durable FIFO of mutations the backend has not confirmed yet.
//!
//! Operations are appended by the inspection controller and removed only by
//! the sync engine after the backend accepted that exact operation.

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{InspectionId, OperationPayload, QueuedOperation};

fn mint_operation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("op-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[derive(Clone)]
pub struct OperationQueue {
    db: Database,
}

impl OperationQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        target: &InspectionId,
        payload: OperationPayload,
    ) -> Result<QueuedOperation> {
        let operation = self
            .db
            .insert_operation(&mint_operation_id(), target, &payload, Utc::now())
            .await?;
        info!(
            "Queued {} {} for {}",
            operation.kind().as_str(),
            operation.operation_id,
            operation.target
        );
        Ok(operation)
    }

    /// Snapshot of the queue in drain order.
    pub async fn list(&self) -> Result<Vec<QueuedOperation>> {
        self.db.list_operations().await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.db.count_operations().await
    }

    pub async fn pending_for(&self, target: &InspectionId) -> Result<u64> {
        self.db.count_operations_for(target).await
    }

    pub(crate) async fn remove(&self, operation: &QueuedOperation) -> Result<()> {
        if !self.db.delete_operation(&operation.operation_id).await? {
            warn!(
                "Queued operation {} was already gone when removing",
                operation.operation_id
            );
        }
        Ok(())
    }

    /// Drops a confirmed create and re-points the rest of that inspection's
    /// operations at `remote_id`.
    pub(crate) async fn resolve_create(
        &self,
        operation: &QueuedOperation,
        local_token: &str,
        remote_id: &str,
    ) -> Result<usize> {
        self.db
            .resolve_create_operation(&operation.operation_id, local_token, remote_id)
            .await
    }

    pub(crate) async fn replace_payload(
        &self,
        operation: &QueuedOperation,
        payload: OperationPayload,
    ) -> Result<QueuedOperation> {
        self.db
            .replace_operation_payload(&operation.operation_id, &payload)
            .await?;
        Ok(QueuedOperation {
            payload,
            ..operation.clone()
        })
    }
}
