//! Domain layer
//!
//! Identifier types shared by the storage, auth and API layers.

pub mod id;

pub use id::{RoleId, UserId};
