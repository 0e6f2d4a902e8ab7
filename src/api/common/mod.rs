//
//  bitbucket-cli
//  api/common/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Common API Types
//!
//! Shared types used by the executor, the paginator and every feature
//! service built on the client:
//!
//! - [`BitbucketError`] / [`ErrorKind`] - the error taxonomy
//! - [`PaginatedResponse`], [`PageOptions`], [`Page`] - pagination types
//! - [`User`] - the identity returned by `GET /user`

use serde::{Deserialize, Serialize};

mod error;
mod pagination;

pub use error::*;
pub use pagination::*;

/// The authenticated account, as returned by `GET /user`.
///
/// Only `username` (or, failing that, `nickname`) is required; Bitbucket
/// omits some fields for accounts that have not completed their profile.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::api::User;
///
/// let user: User = serde_json::from_str(r#"{"username": "alice"}"#).unwrap();
/// assert_eq!(user.username, "alice");
/// assert_eq!(user.label(), "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UserWire")]
pub struct User {
    /// Account name used in URLs.
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub account_id: Option<String>,

    /// UUID including curly braces.
    #[serde(default)]
    pub uuid: Option<String>,
}

impl User {
    /// Display name when set, otherwise the username.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// `GET /user` body as sent. Newer accounts carry `nickname` next to (or
/// instead of) `username`.
#[derive(Deserialize)]
struct UserWire {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
}

impl TryFrom<UserWire> for User {
    type Error = String;

    fn try_from(wire: UserWire) -> Result<Self, Self::Error> {
        let username = wire
            .username
            .filter(|u| !u.is_empty())
            .or_else(|| wire.nickname.clone())
            .ok_or_else(|| "user has neither username nor nickname".to_string())?;
        Ok(Self {
            username,
            nickname: wire.nickname,
            display_name: wire.display_name,
            account_id: wire.account_id,
            uuid: wire.uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_with_username_and_nickname() {
        let json = r#"{
            "username": "alice",
            "nickname": "ally",
            "display_name": "Alice",
            "account_id": "557058:1",
            "uuid": "{a1}"
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.nickname.as_deref(), Some("ally"));
        assert_eq!(user.label(), "Alice");
    }

    #[test]
    fn test_user_nickname_only() {
        let user: User = serde_json::from_str(r#"{"nickname": "ally"}"#).unwrap();
        assert_eq!(user.username, "ally");
        assert_eq!(user.label(), "ally");
    }

    #[test]
    fn test_user_without_name_is_rejected() {
        assert!(serde_json::from_str::<User>(r#"{"display_name": "Nobody"}"#).is_err());
    }
}
