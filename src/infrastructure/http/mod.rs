//! HTTP client for the worker backend.

mod client;
mod config;

pub use client::HttpWorkerApi;
pub use config::BackendConfig;
