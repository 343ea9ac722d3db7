//! # Warden
//!
//! Issues API tokens for user accounts and pushes every change of a user's
//! token or roles to the services watching that user.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API → Request Gate → Account Service → Token Manager → live feeds
//!                 ↓                ↓                ↓
//!            Sessions        SQLite storage    Subscriber registries
//! ```
//!
//! ## Core Components
//!
//! - **Token Manager** ([`auth::token_manager`]): issuance, invalidation and
//!   fan-out of auth updates to subscribers keyed by username
//! - **Request Gate** ([`auth::gate`]): resolves callers from a session cookie
//!   or bearer token and refreshes their token on the way
//! - **Streaming adapter** ([`api::stream`]): `<json>\r\n` frames with a
//!   `\r\n` keepalive every second
//! - **Persistence** ([`storage`]): SQLx on SQLite with embedded migrations

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod startup;
pub mod storage;

pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
