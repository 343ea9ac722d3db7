//! Authentication module entry point.
//!
//! Token issuance and the live update feeds live in [`token_manager`]; the
//! rest of the module resolves callers and applies account mutations that
//! feed it.

pub mod account_service;
pub mod cleanup_service;
pub mod gate;
pub mod hashing;
pub mod models;
pub mod registry;
pub mod session;
pub mod token_format;
pub mod token_manager;

pub use account_service::AccountService;
pub use cleanup_service::TokenCleanupService;
pub use gate::RequestGate;
pub use models::{ApiToken, AuthContext, AuthUpdateMessage, Role, User, UserDirectoryEvent};
pub use registry::{Delivery, ScopedSubscription, Subscription};
pub use session::SessionStore;
pub use token_manager::TokenManager;
