//! # REST API Components
//!
//! HTTP routing, handlers, error mapping and the streaming adapter used by
//! the internal live feeds.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod stream;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
