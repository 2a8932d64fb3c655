//! MCE Server Library
//!
//! Motor Control Enterprise central server
//!
//! ## Architecture (7 Components)
//!
//! 1. BrokerClient - MQTT connection lifecycle and publish gate
//! 2. CameraEdgeService - Edge command request/response correlation
//! 3. MessageRouter - Topic-shape dispatch for inbound MQTT traffic
//! 4. StreamRecorderService - ffmpeg recording supervision
//! 5. StorageCleanerService - NAS recording retention
//! 6. Repository - MySQL data access behind a trait seam
//! 7. WebAPI - Operational HTTP surface
//!
//! ## Design Principles
//!
//! - Single responsibility per module
//! - Trait seams at process/broker/database boundaries for testability
//! - Best-effort inbound handling: one bad message never stops the router

pub mod broker;
pub mod edge_service;
pub mod message_router;
pub mod models;
pub mod repository;
pub mod storage_cleaner;
pub mod stream_recorder;
pub mod web_api;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
