//! Local inference backend for Harbor.
//!
//! This crate launches and supervises an OpenAI-compatible inference server
//! (llama.cpp), talks to it over loopback HTTP, and fetches the GGUF model
//! it serves.

mod client;
pub mod config;
mod error;
mod model;
mod process;
pub mod ready;

pub use client::{BackendClient, ChatMessage, HealthReport, ModelEntry};
pub use config::{BackendConfig, BackendConfigBuilder};
pub use error::BackendError;
pub use model::{
    format_size, Downloaded, ModelManager, ModelSource, DEFAULT_MODEL_FILE, DEFAULT_MODEL_REPO,
};
pub use process::{start_backend, BackendProcess, BackendState};
pub use ready::{wait_until_ready, Backoff, Probe, ReadyPolicy};
