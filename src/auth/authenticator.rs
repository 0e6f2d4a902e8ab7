//
//  bitbucket-cli
//  auth/authenticator.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Authenticators
//!
//! An [`Authenticator`] wraps one [`Credential`] and implements the
//! capability set every scheme shares: authenticate, is-authenticated,
//! authenticated user, refresh and logout. Dispatch is a `match` over the
//! closed [`Credential`] union, so adding a scheme is a compile error
//! everywhere it has to be handled.
//!
//! | Scheme | Header | Refresh |
//! |--------|--------|---------|
//! | API token | `Basic` | no-op |
//! | App password | `Basic` | no-op |
//! | Access token | `Bearer` | no-op |
//! | OAuth 2.0 | `Bearer` | refresh-token exchange, persisted |

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use crate::api::{RequestContext, Result, User};

use super::{
    fetch_current_user, refresh_oauth_token, AuthMethod, Credential, CredentialStore,
    OAuthClientConfig,
};

/// Collaborators an authenticator needs for network and storage work.
#[derive(Debug, Clone)]
pub struct AuthServices {
    /// Client used for the identity check and token requests.
    pub http: Client,

    /// API base URL, e.g. `https://api.bitbucket.org/2.0`.
    pub base_url: String,

    pub oauth: OAuthClientConfig,

    pub store: Arc<dyn CredentialStore>,
}

/// The active credential plus what has been learned about it this session.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credential: Credential,
    user: Option<User>,
}

impl Authenticator {
    /// Wraps `credential` after checking its shape.
    pub fn new(credential: Credential) -> Result<Self> {
        credential.validate()?;
        Ok(Self {
            credential,
            user: None,
        })
    }

    pub fn method(&self) -> AuthMethod {
        self.credential.method()
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn authorization_header(&self) -> String {
        self.credential.authorization_header()
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.credential.needs_refresh(now, skew)
    }

    /// Identity confirmed by a check this session, if any.
    pub fn cached_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Whether the credential can be used as is.
    ///
    /// Only an OAuth 2.0 token past its expiry is unusable; it needs a
    /// refresh first.
    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        match self.credential.expires_at() {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Validates the credential and confirms it with `GET /user`.
    pub async fn authenticate(
        &mut self,
        ctx: &RequestContext,
        services: &AuthServices,
    ) -> Result<User> {
        self.credential.validate()?;

        let user = fetch_current_user(
            &services.http,
            &services.base_url,
            &self.authorization_header(),
            ctx,
        )
        .await?;

        tracing::debug!(method = %self.method(), username = %user.username, "Authenticated");
        self.user = Some(user.clone());
        Ok(user)
    }

    /// Cached identity, probing when this session has not confirmed one.
    pub async fn authenticated_user(
        &mut self,
        ctx: &RequestContext,
        services: &AuthServices,
    ) -> Result<User> {
        match &self.user {
            Some(user) => Ok(user.clone()),
            None => self.authenticate(ctx, services).await,
        }
    }

    /// Renews the credential where the scheme supports it.
    ///
    /// Returns `true` when a new credential was obtained. Static schemes
    /// succeed without doing anything. For OAuth 2.0 the new token pair
    /// replaces the stored one; a failed save only costs persistence.
    pub async fn refresh(&mut self, ctx: &RequestContext, services: &AuthServices) -> Result<bool> {
        let Credential::OAuth2 { refresh_token, .. } = &self.credential else {
            return Ok(false);
        };

        let refreshed =
            refresh_oauth_token(&services.http, &services.oauth, refresh_token, ctx).await?;
        self.credential = refreshed;
        if let Err(e) = services.store.save(&self.credential) {
            tracing::warn!(error = %e, "Refreshed token could not be saved; it is kept for this session only");
        }
        Ok(true)
    }

    /// Clears the stored credential and forgets the cached identity.
    pub fn logout(&mut self, services: &AuthServices) -> Result<()> {
        self.user = None;
        services.store.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ErrorKind;
    use crate::auth::FileCredentialStore;

    fn services(server: &mockito::Server, dir: &tempfile::TempDir) -> AuthServices {
        AuthServices {
            http: Client::new(),
            base_url: server.url(),
            oauth: OAuthClientConfig {
                token_url: format!("{}/site/oauth2/access_token", server.url()),
                ..OAuthClientConfig::default()
            },
            store: Arc::new(FileCredentialStore::new(dir.path().join("credentials.json"))),
        }
    }

    #[test]
    fn test_new_rejects_malformed_credential() {
        let err = Authenticator::new(Credential::access_token("two words")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_expired_oauth_is_not_authenticated() {
        let now = Utc::now();
        let expired = Authenticator::new(Credential::oauth2("a", "r", now - Duration::seconds(1)))
            .unwrap();
        assert!(!expired.is_authenticated(now));

        let static_token = Authenticator::new(Credential::access_token("t")).unwrap();
        assert!(static_token.is_authenticated(now));
    }

    #[tokio::test]
    async fn test_authenticate_caches_user() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"username":"alice","display_name":"Alice"}"#)
            .expect(1)
            .create_async()
            .await;

        let services = services(&server, &dir);
        let ctx = RequestContext::background();
        let mut auth = Authenticator::new(Credential::access_token("tok")).unwrap();

        assert_eq!(auth.authenticate(&ctx, &services).await.unwrap().username, "alice");
        assert_eq!(auth.authenticated_user(&ctx, &services).await.unwrap().label(), "Alice");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticate_rejected_credential() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        server
            .mock("GET", "/user")
            .with_status(401)
            .create_async()
            .await;

        let mut auth = Authenticator::new(Credential::app_password("bob", "wrong")).unwrap();
        let err = auth
            .authenticate(&RequestContext::background(), &services(&server, &dir))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert!(auth.cached_user().is_none());
    }

    #[tokio::test]
    async fn test_refresh_is_noop_for_static_schemes() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let mut auth = Authenticator::new(Credential::api_token("a@b.co", "tok")).unwrap();

        let refreshed = auth
            .refresh(&RequestContext::background(), &services(&server, &dir))
            .await
            .unwrap();
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn test_oauth_refresh_updates_store() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        server
            .mock("POST", "/site/oauth2/access_token")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","refresh_token":"r2","expires_in":7200}"#)
            .create_async()
            .await;

        let services = services(&server, &dir);
        let mut auth =
            Authenticator::new(Credential::oauth2("stale", "r1", Utc::now())).unwrap();

        assert!(auth
            .refresh(&RequestContext::background(), &services)
            .await
            .unwrap());
        assert_eq!(auth.authorization_header(), "Bearer fresh");
        assert_eq!(services.store.load().unwrap(), *auth.credential());

        auth.logout(&services).unwrap();
        assert_eq!(services.store.load().unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_refresh_survives_store_write_failure() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        server
            .mock("POST", "/site/oauth2/access_token")
            .with_status(200)
            .with_body(r#"{"access_token":"fresh","refresh_token":"r2","expires_in":7200}"#)
            .create_async()
            .await;

        // A regular file where the store expects a directory.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let services = AuthServices {
            store: Arc::new(FileCredentialStore::new(blocker.join("credentials.json"))),
            ..services(&server, &dir)
        };

        let mut auth =
            Authenticator::new(Credential::oauth2("stale", "r1", Utc::now())).unwrap();
        assert!(auth
            .refresh(&RequestContext::background(), &services)
            .await
            .unwrap());
        assert_eq!(auth.authorization_header(), "Bearer fresh");
        assert!(services.store.load().is_err());
    }
}
