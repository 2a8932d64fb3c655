//! CameraEdgeService - request/response correlation over MQTT
//!
//! ## Responsibilities
//!
//! - Convert a fire-and-forget publish into an awaitable call
//! - コマンドは `cmd/{gatewayId}/{channel}`、応答は `response/{gatewayId}/{requestId}`
//! - Timeout / cancellation cleanup so no pending entry is ever left dangling
//!
//! The pending registry is a `DashMap` keyed by request id: inserts from
//! concurrent callers and removes from the response/timeout paths never
//! serialize unrelated requests, and `DashMap::remove` gives the
//! remove-exactly-once guarantee both paths rely on.

use crate::broker::CommandPublisher;
use crate::error::{Error, Result};
use crate::models::EdgeRequest;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Request/response correlator for edge gateway calls
///
/// The sole entry point the API layer uses to reach an edge gateway
/// synchronously; nothing else publishes on command topics.
pub struct CameraEdgeService {
    publisher: Arc<dyn CommandPublisher>,
    /// requestId → waiter for the matching response payload
    pending: DashMap<String, oneshot::Sender<String>>,
}

impl CameraEdgeService {
    /// Create a new service on top of a publisher
    pub fn new(publisher: Arc<dyn CommandPublisher>) -> Self {
        Self {
            publisher,
            pending: DashMap::new(),
        }
    }

    /// Send a command to an edge gateway and await its response
    ///
    /// Fails with [`Error::BrokerUnavailable`] when the publish is not
    /// delivered locally, and with [`Error::EdgeTimeout`] when the gateway
    /// does not answer before the deadline or the caller cancels the wait.
    /// The already-sent command is never "un-published": a late response
    /// is discarded as orphaned by [`handle_response`](Self::handle_response).
    pub async fn request_edge(
        &self,
        gateway_id: &str,
        channel: &str,
        action: &str,
        parameters: Option<serde_json::Value>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<String> {
        let request_id = Uuid::new_v4().simple().to_string();
        let topic = format!("cmd/{}/{}", gateway_id, channel);

        let payload = serde_json::to_vec(&EdgeRequest {
            request_id: request_id.clone(),
            action: action.to_string(),
            parameters,
        })?;

        // 応答が publish より先に届いても取りこぼさないよう、登録を先に行う
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if !self.publisher.publish(&topic, payload).await {
            self.pending.remove(&request_id);
            tracing::warn!(
                gateway_id = %gateway_id,
                channel = %channel,
                action = %action,
                "Edge request not delivered - broker unavailable"
            );
            return Err(Error::BrokerUnavailable);
        }

        let timeout_ms = timeout.as_millis() as u64;

        tokio::select! {
            resp = rx => match resp {
                Ok(payload) => {
                    tracing::debug!(
                        gateway_id = %gateway_id,
                        request_id = %request_id,
                        "Edge response received"
                    );
                    Ok(payload)
                }
                // Sender dropped without resolving; treat as no response
                Err(_) => {
                    self.pending.remove(&request_id);
                    Err(Error::EdgeTimeout {
                        gateway_id: gateway_id.to_string(),
                        timeout_ms,
                    })
                }
            },
            _ = cancel.cancelled() => {
                self.pending.remove(&request_id);
                tracing::debug!(
                    gateway_id = %gateway_id,
                    request_id = %request_id,
                    "Edge request cancelled by caller"
                );
                Err(Error::EdgeTimeout {
                    gateway_id: gateway_id.to_string(),
                    timeout_ms,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                self.pending.remove(&request_id);
                tracing::warn!(
                    gateway_id = %gateway_id,
                    request_id = %request_id,
                    timeout_ms = timeout_ms,
                    "Edge request timed out - gateway likely offline"
                );
                Err(Error::EdgeTimeout {
                    gateway_id: gateway_id.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Resolve a pending request with a response payload
    ///
    /// Called by the message router for every `response/{gw}/{requestId}`
    /// message. An unknown id (already timed out, already resolved, or a
    /// stray response from an expired request) is logged and discarded -
    /// an expected occurrence, not an error.
    pub fn handle_response(&self, request_id: &str, payload: String) {
        match self.pending.remove(request_id) {
            Some((_, tx)) => {
                if tx.send(payload).is_err() {
                    // Waiter already gave up between remove and send
                    tracing::debug!(request_id = %request_id, "Response waiter already gone");
                } else {
                    tracing::debug!(request_id = %request_id, "Response delivered to waiter");
                }
            }
            None => {
                tracing::warn!(
                    request_id = %request_id,
                    "Orphaned response (expired or unknown request id), discarding"
                );
            }
        }
    }

    /// Number of requests currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
