//! HTTP access to the per-user preference API.

pub mod api_client;
pub mod config;

pub use api_client::ApiClient;
pub use config::ApiConfig;
