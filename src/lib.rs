//! chatgate - Streaming chat gateway for OpenAI-compatible LLM providers
//!
//! This library provides the core functionality for the chatgate server,
//! including configuration, credential rotation, provider adapters, the
//! NDJSON streaming gateway, and a consumer for its wire protocol.

pub mod client;
pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
