//! HTTP middleware layers.

pub mod auth;
pub mod http_metrics;

pub use auth::{require_room_credential, AuthState};
pub(crate) use auth::bearer_token;
pub use http_metrics::http_metrics_middleware;
