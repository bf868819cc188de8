//! HTTP gateway module.
//!
//! This module accepts chat requests, resolves the provider adapter and
//! re-emits its output as NDJSON frames with heartbeats and an inactivity
//! watchdog.

pub mod frame;
pub mod gateway;
mod handlers;
mod server;
pub mod sse;
pub mod types;

pub use frame::StreamChunk;
pub use gateway::{StreamOutcome, StreamReport, StreamTimings};
pub use handlers::NDJSON_CONTENT_TYPE;
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use types::{ChatMessage, GatewayRequest, GenerationConfig, ReasoningEffort, Role};
