//! Typed identifiers for accounts and roles.
//!
//! Both are UUID strings at rest. Wrapping them keeps a role id from being
//! passed where a user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap a stored value as is.
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Accepts only UUID strings.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(|_| Self(s.to_string()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

domain_id!(
    /// Identifier of an account
    UserId
);

domain_id!(
    /// Identifier of a role
    RoleId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_uuids() {
        let id = UserId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(id, UserId::new());
    }

    #[test]
    fn parse_rejects_non_uuid() {
        assert!(RoleId::parse("admin").is_err());
        assert!("also-not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_transparently() {
        let id = UserId::from_string("0b6c1f5e-2d7a-4c61-9f0e-5d3f2a1b9c00".to_string());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0b6c1f5e-2d7a-4c61-9f0e-5d3f2a1b9c00\"");
        assert_eq!(id.to_string(), id.as_str());
    }
}
