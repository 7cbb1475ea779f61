use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{parse_datetime, parse_inspection_id},
    Database,
};
use crate::models::{InspectionId, OperationPayload, QueuedOperation};

fn row_to_operation(row: &Row) -> Result<QueuedOperation> {
    let origin: String = row.get("target_origin")?;
    let token: String = row.get("target_token")?;
    let payload_json: String = row.get("payload_json")?;
    let enqueued_at: String = row.get("enqueued_at")?;

    Ok(QueuedOperation {
        operation_id: row.get("operation_id")?,
        seq: row.get("seq")?,
        target: parse_inspection_id(&origin, token)?,
        payload: serde_json::from_str(&payload_json)
            .context("failed to deserialize operation payload")?,
        enqueued_at: parse_datetime(&enqueued_at, "enqueued_at")?,
    })
}

impl Database {
    /// Appends an operation. A local target that already has a server id is
    /// stored against the server id, so the returned operation may differ
    /// from `target`.
    pub async fn insert_operation(
        &self,
        operation_id: &str,
        target: &InspectionId,
        payload: &OperationPayload,
        enqueued_at: DateTime<Utc>,
    ) -> Result<QueuedOperation> {
        let operation_id = operation_id.to_string();
        let target = target.clone();
        let payload = payload.clone();
        self.execute(move |conn| {
            let target = match target {
                InspectionId::Local(token) => {
                    let mapped: Option<String> = conn
                        .query_row(
                            "SELECT remote_token FROM id_mappings WHERE local_token = ?1",
                            params![token],
                            |row| row.get(0),
                        )
                        .optional()
                        .context("failed to look up id mapping")?;
                    match mapped {
                        Some(remote) => InspectionId::Remote(remote),
                        None => InspectionId::Local(token),
                    }
                }
                remote => remote,
            };
            let payload_json =
                serde_json::to_string(&payload).context("failed to serialize payload")?;
            conn.execute(
                "INSERT INTO queued_operations (operation_id, kind, target_origin, target_token, payload_json, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    operation_id,
                    payload.kind().as_str(),
                    target.origin_str(),
                    target.token(),
                    payload_json,
                    enqueued_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert queued operation")?;

            Ok(QueuedOperation {
                operation_id,
                seq: conn.last_insert_rowid(),
                target,
                payload,
                enqueued_at,
            })
        })
        .await
    }

    pub async fn list_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, operation_id, target_origin, target_token, payload_json, enqueued_at
                 FROM queued_operations
                 ORDER BY seq ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut operations = Vec::new();
            while let Some(row) = rows.next()? {
                operations.push(row_to_operation(row)?);
            }

            Ok(operations)
        })
        .await
    }

    pub async fn count_operations(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM queued_operations", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub async fn count_operations_for(&self, target: &InspectionId) -> Result<u64> {
        let target = target.clone();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queued_operations
                 WHERE target_origin = ?1 AND target_token = ?2",
                params![target.origin_str(), target.token()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    pub async fn delete_operation(&self, operation_id: &str) -> Result<bool> {
        let operation_id = operation_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM queued_operations WHERE operation_id = ?1",
                params![operation_id],
            )?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn replace_operation_payload(
        &self,
        operation_id: &str,
        payload: &OperationPayload,
    ) -> Result<()> {
        let operation_id = operation_id.to_string();
        let payload = payload.clone();
        self.execute(move |conn| {
            let payload_json =
                serde_json::to_string(&payload).context("failed to serialize payload")?;
            let rows_affected = conn.execute(
                "UPDATE queued_operations
                 SET payload_json = ?1,
                     kind = ?2
                 WHERE operation_id = ?3",
                params![payload_json, payload.kind().as_str(), operation_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow::anyhow!("Queued operation not found"));
            }

            Ok(())
        })
        .await
    }

    /// Removes a confirmed create operation, records the id mapping and
    /// re-points every queued operation of the same local inspection at the
    /// server id, atomically. Returns the number of re-pointed operations.
    pub async fn resolve_create_operation(
        &self,
        operation_id: &str,
        local_token: &str,
        remote_token: &str,
    ) -> Result<usize> {
        let operation_id = operation_id.to_string();
        let local_token = local_token.to_string();
        let remote_token = remote_token.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "DELETE FROM queued_operations WHERE operation_id = ?1",
                params![operation_id],
            )?;

            tx.execute(
                "INSERT OR REPLACE INTO id_mappings (local_token, remote_token, resolved_at)
                 VALUES (?1, ?2, ?3)",
                params![local_token, remote_token, Utc::now().to_rfc3339()],
            )?;

            let retargeted = tx.execute(
                "UPDATE queued_operations
                 SET target_origin = 'remote',
                     target_token = ?1
                 WHERE target_origin = 'local' AND target_token = ?2",
                params![remote_token, local_token],
            )?;

            tx.commit()?;
            Ok(retargeted)
        })
        .await
    }

    /// Every recorded `(local_token, remote_token)` pair.
    pub async fn list_id_mappings(&self) -> Result<Vec<(String, String)>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT local_token, remote_token FROM id_mappings")?;
            let mappings = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(mappings)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(frame: &str) -> OperationPayload {
        OperationPayload::UploadSnapshot {
            frame_data_url: frame.to_string(),
        }
    }

    #[tokio::test]
    async fn operations_come_back_in_insert_order() {
        let db = Database::in_memory().unwrap();
        let target = InspectionId::Local("l1".into());

        for (idx, frame) in ["a", "b", "c"].iter().enumerate() {
            db.insert_operation(&format!("op-{idx}"), &target, &upload(frame), Utc::now())
                .await
                .unwrap();
        }

        let ops = db.list_operations().await.unwrap();
        let ids: Vec<_> = ops.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, vec!["op-0", "op-1", "op-2"]);
        assert!(ops.windows(2).all(|pair| pair[0].seq < pair[1].seq));
        assert_eq!(db.count_operations().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn resolving_create_retargets_only_matching_local_ops() {
        let db = Database::in_memory().unwrap();
        let mine = InspectionId::Local("mine".into());
        let other = InspectionId::Local("other".into());
        let create = OperationPayload::CreateInspection {
            technician_id: "t1".into(),
            site_id: "s1".into(),
        };

        db.insert_operation("create", &mine, &create, Utc::now()).await.unwrap();
        db.insert_operation("up-1", &mine, &upload("x"), Utc::now()).await.unwrap();
        db.insert_operation("up-2", &other, &upload("y"), Utc::now()).await.unwrap();

        let retargeted = db
            .resolve_create_operation("create", "mine", "insp-99")
            .await
            .unwrap();
        assert_eq!(retargeted, 1);

        let ops = db.list_operations().await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].target, InspectionId::Remote("insp-99".into()));
        assert_eq!(ops[1].target, other);
    }

    #[tokio::test]
    async fn insert_after_resolve_targets_the_server_id() {
        let db = Database::in_memory().unwrap();
        let local = InspectionId::Local("mine".into());
        let create = OperationPayload::CreateInspection {
            technician_id: "t1".into(),
            site_id: "s1".into(),
        };

        db.insert_operation("create", &local, &create, Utc::now()).await.unwrap();
        db.resolve_create_operation("create", "mine", "insp-99")
            .await
            .unwrap();

        let late = db
            .insert_operation("up-late", &local, &upload("z"), Utc::now())
            .await
            .unwrap();
        assert_eq!(late.target, InspectionId::Remote("insp-99".into()));

        let ops = db.list_operations().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target, InspectionId::Remote("insp-99".into()));
        assert_eq!(db.count_operations_for(&local).await.unwrap(), 0);
        assert_eq!(
            db.list_id_mappings().await.unwrap(),
            vec![("mine".to_string(), "insp-99".to_string())]
        );
    }

    #[tokio::test]
    async fn replace_payload_requires_existing_operation() {
        let db = Database::in_memory().unwrap();
        let err = db
            .replace_operation_payload("missing", &upload("z"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
