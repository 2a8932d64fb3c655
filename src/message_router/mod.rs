//! MessageRouter - inbound topic dispatch
//!
//! ## Responsibilities
//!
//! - Demultiplex every inbound broker message by topic shape
//! - Edge responses → CameraEdgeService (highest priority, early return)
//! - Heartbeat / status / registration / telemetry → data access layer
//!
//! Every arm is best-effort: a malformed payload is logged and dropped,
//! a data-access failure is logged and swallowed. `dispatch` never
//! returns an error and never blocks the next message.

use crate::edge_service::CameraEdgeService;
use crate::models::{MotorTelemetrySample, StreamEndpoints};
use crate::repository::DataAccess;
use std::sync::Arc;

/// Inbound message router
pub struct MessageRouter {
    edge: Arc<CameraEdgeService>,
    data: Arc<dyn DataAccess>,
}

impl MessageRouter {
    pub fn new(edge: Arc<CameraEdgeService>, data: Arc<dyn DataAccess>) -> Self {
        Self { edge, data }
    }

    /// Dispatch one inbound message by topic shape
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let parts: Vec<&str> = topic.split('/').collect();

        match parts.as_slice() {
            // response/{gatewayId}/{requestId}
            ["response", _gateway_id, request_id] => {
                let payload = String::from_utf8_lossy(payload).into_owned();
                self.edge.handle_response(request_id, payload);
            }

            // gateway/{gatewayId}/heartbeat
            ["gateway", gateway_id, "heartbeat"] => {
                if let Err(e) = self.data.touch_gateway_heartbeat(gateway_id).await {
                    tracing::warn!(gateway_id = %gateway_id, error = %e, "Heartbeat update failed");
                }
            }

            // camera/{gatewayId}/{cameraKey}/status
            ["camera", _gateway_id, camera_key, "status"] => {
                self.handle_camera_status(camera_key, payload).await;
            }

            // camera/{gatewayId}/{cameraKey}/register
            ["camera", _gateway_id, camera_key, "register"] => {
                self.handle_camera_register(camera_key, payload).await;
            }

            // motor/{deviceId}/telemetry
            ["motor", device_id, "telemetry"] => {
                self.handle_motor_telemetry(device_id, payload).await;
            }

            _ => {
                tracing::debug!(topic = %topic, "Unroutable topic, ignoring");
            }
        }
    }

    /// Camera status update
    ///
    /// ペイロードは bool `online` または文字列 `status` を運ぶ。
    /// bool優先。JSONでなくてもlast_seenだけは更新する。
    async fn handle_camera_status(&self, camera_key: &str, payload: &[u8]) {
        let status = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(value) => {
                if let Some(online) = value.get("online").and_then(|v| v.as_bool()) {
                    Some(if online { "online" } else { "offline" }.to_string())
                } else {
                    value
                        .get("status")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                }
            }
            Err(_) => {
                tracing::debug!(camera_key = %camera_key, "Non-JSON status payload, updating last-seen only");
                None
            }
        };

        if let Err(e) = self
            .data
            .update_camera_status(camera_key, status.as_deref())
            .await
        {
            tracing::warn!(camera_key = %camera_key, error = %e, "Camera status update failed");
        }
    }

    /// Camera self-registration
    ///
    /// Normalizes the edge agent's raw endpoint fields into the canonical
    /// `{rtsp, hls, webrtc}` shape before storage.
    async fn handle_camera_register(&self, camera_key: &str, payload: &[u8]) {
        let value = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    camera_key = %camera_key,
                    error = %e,
                    "Malformed register payload, dropping"
                );
                return;
            }
        };

        let pick = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string)
        };

        let endpoints = StreamEndpoints {
            rtsp: pick(&["rtsp", "raw", "stream"]),
            hls: pick(&["hls"]),
            webrtc: pick(&["webrtc"]),
        };

        if let Err(e) = self.data.update_camera_streams(camera_key, &endpoints).await {
            tracing::warn!(camera_key = %camera_key, error = %e, "Camera registration failed");
        }
    }

    /// Motor telemetry sample
    ///
    /// Missing fields default to null/"unknown"; a JSON-parse failure
    /// drops the message without side effects.
    async fn handle_motor_telemetry(&self, device_id: &str, payload: &[u8]) {
        let value = match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(device_id = %device_id, "Invalid telemetry JSON, dropping");
                return;
            }
        };

        let sample = MotorTelemetrySample {
            device_id: device_id.to_string(),
            speed: value.get("speed").and_then(|v| v.as_i64()).map(|s| s as i32),
            current: value
                .get("current")
                .and_then(|v| v.as_f64())
                .map(|c| c as f32),
            voltage: value
                .get("voltage")
                .and_then(|v| v.as_f64())
                .map(|c| c as f32),
            state: value
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        };

        if let Err(e) = self.data.append_telemetry(&sample).await {
            tracing::warn!(device_id = %device_id, error = %e, "Telemetry insert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::CommandPublisher;
    use crate::error::Result;
    use crate::models::{CameraRef, ClientRef, RecordingTarget};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum DataCall {
        Heartbeat(String),
        Status(String, Option<String>),
        Streams(String, StreamEndpoints),
        Telemetry(MotorTelemetrySampleSnapshot),
    }

    #[derive(Debug, Clone, PartialEq)]
    struct MotorTelemetrySampleSnapshot {
        device_id: String,
        speed: Option<i32>,
        current: Option<f32>,
        voltage: Option<f32>,
        state: String,
    }

    #[derive(Default)]
    struct MockDataAccess {
        calls: Mutex<Vec<DataCall>>,
    }

    impl MockDataAccess {
        fn calls(&self) -> Vec<DataCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataAccess for MockDataAccess {
        async fn list_recording_targets(&self) -> Result<Vec<RecordingTarget>> {
            Ok(vec![])
        }

        async fn find_client_by_gateway(&self, _gateway_id: &str) -> Result<Option<ClientRef>> {
            Ok(None)
        }

        async fn find_camera_by_key(&self, _camera_key: &str) -> Result<Option<CameraRef>> {
            Ok(None)
        }

        async fn touch_gateway_heartbeat(&self, gateway_id: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(DataCall::Heartbeat(gateway_id.to_string()));
            Ok(())
        }

        async fn update_camera_status(
            &self,
            camera_key: &str,
            status: Option<&str>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(DataCall::Status(
                camera_key.to_string(),
                status.map(str::to_string),
            ));
            Ok(())
        }

        async fn update_camera_streams(
            &self,
            camera_key: &str,
            endpoints: &StreamEndpoints,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(DataCall::Streams(
                camera_key.to_string(),
                endpoints.clone(),
            ));
            Ok(())
        }

        async fn append_telemetry(&self, sample: &MotorTelemetrySample) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(DataCall::Telemetry(MotorTelemetrySampleSnapshot {
                    device_id: sample.device_id.clone(),
                    speed: sample.speed,
                    current: sample.current,
                    voltage: sample.voltage,
                    state: sample.state.clone(),
                }));
            Ok(())
        }
    }

    struct NullPublisher;

    #[async_trait]
    impl CommandPublisher for NullPublisher {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> bool {
            true
        }
    }

    fn make_router() -> (MessageRouter, Arc<MockDataAccess>, Arc<CameraEdgeService>) {
        let data = Arc::new(MockDataAccess::default());
        let edge = Arc::new(CameraEdgeService::new(Arc::new(NullPublisher)));
        let router = MessageRouter::new(edge.clone(), data.clone());
        (router, data, edge)
    }

    #[tokio::test]
    async fn test_heartbeat_dispatch() {
        let (router, data, _) = make_router();

        router.dispatch("gateway/gw1/heartbeat", b"{}").await;

        assert_eq!(data.calls(), vec![DataCall::Heartbeat("gw1".to_string())]);
    }

    #[tokio::test]
    async fn test_status_online_bool_takes_precedence() {
        let (router, data, _) = make_router();

        router
            .dispatch(
                "camera/gw1/cam-001/status",
                br#"{"online": true, "status": "degraded"}"#,
            )
            .await;

        assert_eq!(
            data.calls(),
            vec![DataCall::Status(
                "cam-001".to_string(),
                Some("online".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_status_string_fallback() {
        let (router, data, _) = make_router();

        router
            .dispatch("camera/gw1/cam-001/status", br#"{"status": "active"}"#)
            .await;

        assert_eq!(
            data.calls(),
            vec![DataCall::Status(
                "cam-001".to_string(),
                Some("active".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_status_non_json_still_touches_last_seen() {
        let (router, data, _) = make_router();

        router
            .dispatch("camera/gw1/cam-001/status", b"not json at all")
            .await;

        assert_eq!(
            data.calls(),
            vec![DataCall::Status("cam-001".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_register_normalizes_endpoints() {
        let (router, data, _) = make_router();

        router
            .dispatch(
                "camera/gw1/cam-001/register",
                br#"{"raw": "rtsp://edge/cam-001", "hls": "http://edge/hls/cam-001.m3u8", "webrtc": "http://edge/webrtc/cam-001"}"#,
            )
            .await;

        assert_eq!(
            data.calls(),
            vec![DataCall::Streams(
                "cam-001".to_string(),
                StreamEndpoints {
                    rtsp: Some("rtsp://edge/cam-001".to_string()),
                    hls: Some("http://edge/hls/cam-001.m3u8".to_string()),
                    webrtc: Some("http://edge/webrtc/cam-001".to_string()),
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_register_malformed_payload_dropped() {
        let (router, data, _) = make_router();

        router
            .dispatch("camera/gw1/cam-001/register", b"\xff\xfe broken")
            .await;

        assert!(data.calls().is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_defaults_missing_fields() {
        let (router, data, _) = make_router();

        router
            .dispatch("motor/dev42/telemetry", br#"{"speed": 1200}"#)
            .await;

        assert_eq!(
            data.calls(),
            vec![DataCall::Telemetry(MotorTelemetrySampleSnapshot {
                device_id: "dev42".to_string(),
                speed: Some(1200),
                current: None,
                voltage: None,
                state: "unknown".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_telemetry_invalid_json_dropped() {
        let (router, data, _) = make_router();

        router.dispatch("motor/dev42/telemetry", b"{{{{").await;

        assert!(data.calls().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_response_is_harmless() {
        let (router, data, edge) = make_router();

        // No pending request for this id: forwarded, logged, no side effect
        router
            .dispatch("response/gw1/deadbeef", br#"{"ok": true}"#)
            .await;

        assert!(data.calls().is_empty());
        assert_eq!(edge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unroutable_topic_ignored() {
        let (router, data, _) = make_router();

        router.dispatch("something/else/entirely", b"{}").await;
        router.dispatch("gateway/gw1", b"{}").await;

        assert!(data.calls().is_empty());
    }
}
