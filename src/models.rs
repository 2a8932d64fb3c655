//! Shared data model types
//!
//! Wire payloads for the edge protocol and read-only snapshots pulled
//! from the data-access layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command payload published to `cmd/{gatewayId}/{channel}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRequest {
    /// Correlation token echoed back on the response topic
    pub request_id: String,
    /// Action opcode interpreted by the edge agent (e.g. "move", "list", "play")
    pub action: String,
    /// Opaque action parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Response payload received on `response/{gatewayId}/{requestId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeResponse {
    pub request_id: String,
    /// Opaque response body (or error indicator), interpreted by the caller
    pub payload: serde_json::Value,
}

/// Canonical stream endpoint shape stored for a camera
///
/// エッジ側registerペイロードを正規化した形で保存する
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEndpoints {
    pub rtsp: Option<String>,
    pub hls: Option<String>,
    pub webrtc: Option<String>,
}

/// One motor telemetry sample from `motor/{deviceId}/telemetry`
///
/// Missing fields stay None / "unknown"; the timestamp is assigned
/// server-side at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorTelemetrySample {
    pub device_id: String,
    pub speed: Option<i32>,
    pub current: Option<f32>,
    pub voltage: Option<f32>,
    pub state: String,
}

/// Subset of camera/client configuration relevant to continuous recording
///
/// Read-only snapshot pulled each reconciliation cycle; the recorder does
/// not own this data, only consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingTarget {
    pub gateway_id: String,
    pub camera_id: String,
    /// Relay host:port the recorder pulls the low-res stream from
    pub source_address: String,
    /// Root of the on-disk recording tree
    pub storage_root: PathBuf,
}

impl RecordingTarget {
    /// Registry key: `{gatewayId}/{cameraId}`
    pub fn key(&self) -> String {
        format!("{}/{}", self.gateway_id, self.camera_id)
    }
}

/// Client row subset (gateway owner)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientRef {
    pub id: i64,
    pub gateway_id: Option<String>,
    pub cloud_storage_active: bool,
}

/// Camera row subset
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CameraRef {
    pub id: i64,
    pub camera_key: String,
    pub camera_id: Option<String>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_request_wire_shape() {
        let req = EdgeRequest {
            request_id: "abc123".to_string(),
            action: "move".to_string(),
            parameters: Some(serde_json::json!({"pan": 10})),
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["requestId"], "abc123");
        assert_eq!(json["action"], "move");
        assert_eq!(json["parameters"]["pan"], 10);
    }

    #[test]
    fn test_edge_request_omits_empty_parameters() {
        let req = EdgeRequest {
            request_id: "abc123".to_string(),
            action: "list".to_string(),
            parameters: None,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("parameters"));
    }

    #[test]
    fn test_edge_response_wire_shape() {
        let resp: EdgeResponse = serde_json::from_str(
            r#"{"requestId": "abc123", "payload": {"files": ["a.mp4"]}}"#,
        )
        .unwrap();
        assert_eq!(resp.request_id, "abc123");
        assert_eq!(resp.payload["files"][0], "a.mp4");
    }

    #[test]
    fn test_recording_target_key() {
        let target = RecordingTarget {
            gateway_id: "gw1".to_string(),
            camera_id: "cam-001".to_string(),
            source_address: "relay:8554".to_string(),
            storage_root: PathBuf::from("/mnt/nas/recordings"),
        };
        assert_eq!(target.key(), "gw1/cam-001");
    }
}
