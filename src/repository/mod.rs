//! Data access layer
//!
//! ## Responsibilities
//!
//! - The collaborator interface the core consumes (recording targets,
//!   heartbeat/status/telemetry upserts)
//! - MySQL implementation over the clients/cameras/motor_telemetry tables
//!
//! The CRUD surface for clients/cameras/users lives elsewhere; only the
//! operations the edge subsystem needs are exposed here.

use crate::error::{Error, Result};
use crate::models::{CameraRef, ClientRef, MotorTelemetrySample, RecordingTarget, StreamEndpoints};
use async_trait::async_trait;
use sqlx::{MySqlPool, Row};
use std::path::PathBuf;

/// Collaborator interface consumed by the router and the recorder
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Cameras that should currently be recording: active, flagged
    /// recording-only, owned by a client with cloud storage enabled and a
    /// gateway id. Rows missing a camera or gateway identifier are
    /// excluded, not retried.
    async fn list_recording_targets(&self) -> Result<Vec<RecordingTarget>>;

    async fn find_client_by_gateway(&self, gateway_id: &str) -> Result<Option<ClientRef>>;

    async fn find_camera_by_key(&self, camera_key: &str) -> Result<Option<CameraRef>>;

    /// Mark the owning client as seen. Unknown gateways are ignored.
    async fn touch_gateway_heartbeat(&self, gateway_id: &str) -> Result<()>;

    /// Update last-seen and, when present, the reported status string.
    async fn update_camera_status(&self, camera_key: &str, status: Option<&str>) -> Result<()>;

    /// Store normalized stream endpoints and update last-seen.
    async fn update_camera_streams(
        &self,
        camera_key: &str,
        endpoints: &StreamEndpoints,
    ) -> Result<()>;

    /// Append one telemetry sample (server-side timestamp).
    async fn append_telemetry(&self, sample: &MotorTelemetrySample) -> Result<()>;
}

/// Recorder-related configuration merged into each [`RecordingTarget`]
#[derive(Debug, Clone)]
pub struct RecorderDefaults {
    /// Relay host:port the continuous recorder pulls from
    pub source_address: String,
    /// Root of the on-disk recording tree
    pub storage_root: PathBuf,
}

/// MySQL-backed implementation
pub struct MySqlDataAccess {
    pool: MySqlPool,
    recorder: RecorderDefaults,
}

impl MySqlDataAccess {
    pub fn new(pool: MySqlPool, recorder: RecorderDefaults) -> Self {
        Self { pool, recorder }
    }
}

#[async_trait]
impl DataAccess for MySqlDataAccess {
    async fn list_recording_targets(&self) -> Result<Vec<RecordingTarget>> {
        let rows = sqlx::query(
            r#"
            SELECT cl.gateway_id, c.camera_id
            FROM cameras c
            JOIN clients cl ON c.client_id = cl.id
            WHERE c.status = 'active'
              AND c.is_recording_only = 1
              AND cl.cloud_storage_active = 1
              AND c.camera_id IS NOT NULL
              AND cl.gateway_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let targets = rows
            .into_iter()
            .map(|row| RecordingTarget {
                gateway_id: row.get("gateway_id"),
                camera_id: row.get("camera_id"),
                source_address: self.recorder.source_address.clone(),
                storage_root: self.recorder.storage_root.clone(),
            })
            .collect();

        Ok(targets)
    }

    async fn find_client_by_gateway(&self, gateway_id: &str) -> Result<Option<ClientRef>> {
        let client = sqlx::query_as::<_, ClientRef>(
            "SELECT id, gateway_id, cloud_storage_active FROM clients WHERE gateway_id = ?",
        )
        .bind(gateway_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(client)
    }

    async fn find_camera_by_key(&self, camera_key: &str) -> Result<Option<CameraRef>> {
        let camera = sqlx::query_as::<_, CameraRef>(
            "SELECT id, camera_key, camera_id, status FROM cameras WHERE camera_key = ?",
        )
        .bind(camera_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(camera)
    }

    async fn touch_gateway_heartbeat(&self, gateway_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE clients SET updated_at = NOW(3) WHERE gateway_id = ?")
            .bind(gateway_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::debug!(gateway_id = %gateway_id, "Heartbeat for unknown gateway, ignoring");
        } else {
            tracing::debug!(gateway_id = %gateway_id, "Gateway heartbeat recorded");
        }

        Ok(())
    }

    async fn update_camera_status(&self, camera_key: &str, status: Option<&str>) -> Result<()> {
        // statusが読めなくてもlast_seenは必ず更新する
        sqlx::query(
            r#"
            UPDATE cameras
            SET last_seen = NOW(3), status = COALESCE(?, status)
            WHERE camera_key = ?
            "#,
        )
        .bind(status)
        .bind(camera_key)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn update_camera_streams(
        &self,
        camera_key: &str,
        endpoints: &StreamEndpoints,
    ) -> Result<()> {
        let streams_json = serde_json::to_string(endpoints)?;

        sqlx::query(
            r#"
            UPDATE cameras
            SET streams = ?, last_seen = NOW(3)
            WHERE camera_key = ?
            "#,
        )
        .bind(&streams_json)
        .bind(camera_key)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::info!(camera_key = %camera_key, "Camera stream endpoints updated");
        Ok(())
    }

    async fn append_telemetry(&self, sample: &MotorTelemetrySample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO motor_telemetry (device_id, speed, `current`, voltage, state, timestamp)
            VALUES (?, ?, ?, ?, ?, NOW(3))
            "#,
        )
        .bind(&sample.device_id)
        .bind(sample.speed)
        .bind(sample.current)
        .bind(sample.voltage)
        .bind(&sample.state)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(device_id = %sample.device_id, "Telemetry sample stored");
        Ok(())
    }
}
