//! # Error Handling
//!
//! Crate-wide error type. Every fallible operation in the service returns
//! [`Result`], and the HTTP layer converts [`Error`] into a status code and a
//! JSON body (see `api::error`).

mod types;

pub use types::{Error, Result};
