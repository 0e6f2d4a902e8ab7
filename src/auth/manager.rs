//
//  bitbucket-cli
//  auth/manager.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Authentication Manager
//!
//! [`AuthManager`] owns the session's single [`Authenticator`] and is the
//! only thing the HTTP layer talks to about credentials.
//!
//! ## Credential Selection
//!
//! The active credential is chosen once, at construction, by
//! [`select_credential`] (highest wins):
//!
//! 1. Credential supplied explicitly by the caller
//! 2. `BITBUCKET_EMAIL` + `BITBUCKET_API_TOKEN`
//! 3. `BITBUCKET_USERNAME` + `BITBUCKET_PASSWORD`
//! 4. `BITBUCKET_TOKEN`
//! 5. The credential saved in the [`CredentialStore`]
//!
//! With none of these the session starts unauthenticated.
//!
//! ## Refresh Coordination
//!
//! Before each request [`AuthManager::prepare_request`] checks whether an
//! OAuth 2.0 token is within the refresh skew of its expiry. Concurrent
//! callers queue on one refresh lock; the first performs the refresh and
//! the rest re-check the session after acquiring the lock, so one round
//! trip serves all of them. A failed refresh leaves the session
//! unauthenticated and every later request fails fast with
//! [`ErrorKind::Authentication`] until [`AuthManager::login`] succeeds.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use tokio::sync::{Mutex, RwLock};

use crate::api::{BitbucketError, ErrorKind, RequestContext, Result, User};
use crate::config::{Config, EnvCredentials};

use super::{mask, open_store, AuthMethod, AuthServices, Authenticator, Credential, CredentialStore};

/// Where the active credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Passed in by the embedding program.
    Explicit,
    /// `BITBUCKET_EMAIL` + `BITBUCKET_API_TOKEN`.
    EnvApiToken,
    /// `BITBUCKET_USERNAME` + `BITBUCKET_PASSWORD`.
    EnvAppPassword,
    /// `BITBUCKET_TOKEN`.
    EnvAccessToken,
    /// The credential store.
    Stored,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Explicit => "explicit",
            Self::EnvApiToken => "BITBUCKET_EMAIL/BITBUCKET_API_TOKEN",
            Self::EnvAppPassword => "BITBUCKET_USERNAME/BITBUCKET_PASSWORD",
            Self::EnvAccessToken => "BITBUCKET_TOKEN",
            Self::Stored => "credential store",
        };
        f.write_str(label)
    }
}

/// Picks the active credential by precedence.
///
/// An environment pair only counts when both halves are set.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::auth::{select_credential, Credential, CredentialSource};
/// use bitbucket_client::config::EnvCredentials;
///
/// let env = EnvCredentials {
///     token: Some("env-token".into()),
///     ..Default::default()
/// };
/// let stored = Some(Credential::access_token("stored-token"));
///
/// let (credential, source) = select_credential(None, &env, stored).unwrap();
/// assert_eq!(credential, Credential::access_token("env-token"));
/// assert_eq!(source, CredentialSource::EnvAccessToken);
/// ```
pub fn select_credential(
    explicit: Option<Credential>,
    env: &EnvCredentials,
    stored: Option<Credential>,
) -> Option<(Credential, CredentialSource)> {
    if let Some(credential) = explicit {
        return Some((credential, CredentialSource::Explicit));
    }
    if let (Some(email), Some(token)) = (&env.email, &env.api_token) {
        return Some((
            Credential::api_token(email.as_str(), token.as_str()),
            CredentialSource::EnvApiToken,
        ));
    }
    if let (Some(username), Some(password)) = (&env.username, &env.password) {
        return Some((
            Credential::app_password(username.as_str(), password.as_str()),
            CredentialSource::EnvAppPassword,
        ));
    }
    if let Some(token) = &env.token {
        return Some((
            Credential::access_token(token.as_str()),
            CredentialSource::EnvAccessToken,
        ));
    }
    stored.map(|credential| (credential, CredentialSource::Stored))
}

enum Session {
    Active {
        authenticator: Authenticator,
        source: CredentialSource,
    },
    Unauthenticated {
        reason: String,
    },
}

impl Session {
    fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }
}

/// Snapshot of the session for `bb auth status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub method: Option<AuthMethod>,
    pub source: Option<CredentialSource>,
    /// Identity confirmed this session, if an identity check has run.
    pub user: Option<User>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Secret with all but its last characters hidden.
    pub masked_secret: Option<String>,
    /// Why the session is unauthenticated.
    pub reason: Option<String>,
}

/// Owns the active authenticator and coordinates refreshes.
pub struct AuthManager {
    session: RwLock<Session>,
    refresh_lock: Mutex<()>,
    services: AuthServices,
    skew: chrono::Duration,
    refreshes: AtomicU64,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("base_url", &self.services.base_url)
            .field("skew", &self.skew)
            .field("refreshes", &self.refresh_count())
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Starts a session from an already selected credential.
    ///
    /// A malformed credential leaves the session unauthenticated instead of
    /// failing construction.
    pub fn new(
        services: AuthServices,
        selected: Option<(Credential, CredentialSource)>,
        skew: chrono::Duration,
    ) -> Self {
        let session = match selected {
            Some((credential, source)) => match Authenticator::new(credential) {
                Ok(authenticator) => {
                    tracing::debug!(method = %authenticator.method(), %source, "Selected credential");
                    Session::Active {
                        authenticator,
                        source,
                    }
                }
                Err(e) => {
                    tracing::warn!(%source, error = %e, "Ignoring malformed credential");
                    Session::unauthenticated(format!("credential from {source} is invalid: {}", e.message))
                }
            },
            None => Session::unauthenticated("not logged in"),
        };

        Self {
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
            services,
            skew,
            refreshes: AtomicU64::new(0),
        }
    }

    /// Builds a manager from configuration, the environment and the store.
    pub fn from_sources(
        services: AuthServices,
        explicit: Option<Credential>,
        env: &EnvCredentials,
        skew: chrono::Duration,
    ) -> Self {
        let stored = match services.store.load() {
            Ok(credential) => Some(credential),
            Err(e) if e.kind == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read stored credential");
                None
            }
        };

        let selected = select_credential(explicit, env, stored);
        Self::new(services, selected, skew)
    }

    /// Builds a manager from `config` and the process environment.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self> {
        let services = AuthServices {
            http,
            base_url: config.api.base_url.clone(),
            oauth: config.auth.oauth_client(),
            store: open_store(config)?,
        };
        Ok(Self::from_sources(
            services,
            None,
            &EnvCredentials::from_env(),
            config.auth.refresh_skew(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.services.store
    }

    /// Number of refreshes performed by this manager.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Attaches the `Authorization` header, refreshing first when needed.
    pub async fn prepare_request(
        &self,
        ctx: &RequestContext,
        request: RequestBuilder,
    ) -> Result<RequestBuilder> {
        let header = self.authorization(ctx).await?;
        Ok(request.header(AUTHORIZATION, header))
    }

    /// The current `Authorization` header value.
    pub async fn authorization(&self, ctx: &RequestContext) -> Result<String> {
        if let Some(header) = self.current_header().await? {
            return Ok(header);
        }

        let _guard = tokio::select! {
            cause = ctx.done() => return Err(cause.into_error(0)),
            guard = self.refresh_lock.lock() => guard,
        };

        // Another caller may have refreshed while this one waited.
        if let Some(header) = self.current_header().await? {
            return Ok(header);
        }

        self.refresh_locked(ctx).await?;
        self.current_header()
            .await?
            .ok_or_else(|| BitbucketError::authentication("refreshed token is already expiring"))
    }

    /// Header if the session is active and needs no refresh, `None` if a
    /// refresh is due.
    async fn current_header(&self) -> Result<Option<String>> {
        let session = self.session.read().await;
        match &*session {
            Session::Unauthenticated { reason } => Err(BitbucketError::authentication(reason.clone())),
            Session::Active { authenticator, .. } => {
                if authenticator.needs_refresh(Utc::now(), self.skew) {
                    Ok(None)
                } else {
                    Ok(Some(authenticator.authorization_header()))
                }
            }
        }
    }

    /// Refreshes the active credential. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self, ctx: &RequestContext) -> Result<bool> {
        let mut authenticator = {
            let session = self.session.read().await;
            match &*session {
                Session::Active { authenticator, .. } => authenticator.clone(),
                Session::Unauthenticated { reason } => {
                    return Err(BitbucketError::authentication(reason.clone()));
                }
            }
        };

        tracing::debug!(method = %authenticator.method(), "Refreshing credential");
        match authenticator.refresh(ctx, &self.services).await {
            Ok(refreshed) => {
                if refreshed {
                    self.refreshes.fetch_add(1, Ordering::Relaxed);
                }
                let mut session = self.session.write().await;
                if let Session::Active {
                    authenticator: active,
                    ..
                } = &mut *session
                {
                    *active = authenticator;
                }
                Ok(refreshed)
            }
            // The caller gave up; the next one in line tries again.
            Err(e) if ctx.cause().is_some() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed; session is now unauthenticated");
                let reason = format!("token refresh failed: {}", e.message);
                *self.session.write().await = Session::unauthenticated(reason.clone());

                Err(BitbucketError::authentication(reason).with_source(e))
            }
        }
    }

    /// Forces a refresh of the active credential.
    ///
    /// Returns `false` for schemes that cannot be refreshed.
    pub async fn refresh(&self, ctx: &RequestContext) -> Result<bool> {
        let _guard = tokio::select! {
            cause = ctx.done() => return Err(cause.into_error(0)),
            guard = self.refresh_lock.lock() => guard,
        };
        self.refresh_locked(ctx).await
    }

    /// Confirms `credential`, persists it and makes it the active one.
    pub async fn login(&self, ctx: &RequestContext, credential: Credential) -> Result<User> {
        let mut authenticator = Authenticator::new(credential)?;
        let user = authenticator.authenticate(ctx, &self.services).await?;
        self.services.store.save(authenticator.credential())?;

        tracing::debug!(method = %authenticator.method(), username = %user.username, "Logged in");
        *self.session.write().await = Session::Active {
            authenticator,
            source: CredentialSource::Stored,
        };
        Ok(user)
    }

    /// Removes the stored credential and ends the session.
    pub async fn logout(&self) -> Result<()> {
        let mut session = self.session.write().await;
        match &mut *session {
            Session::Active { authenticator, .. } => authenticator.logout(&self.services)?,
            Session::Unauthenticated { .. } => self.services.store.delete()?,
        }
        *session = Session::unauthenticated("logged out");
        Ok(())
    }

    /// Ends the session after the server rejected its credential.
    pub async fn mark_unauthenticated(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut session = self.session.write().await;
        if matches!(&*session, Session::Active { .. }) {
            tracing::warn!(%reason, "Credential rejected; session is now unauthenticated");
            *session = Session::unauthenticated(reason);
        }
    }

    /// Ends the session after the server rejected `header`.
    ///
    /// Does nothing when the active credential no longer produces `header`,
    /// as happens when a login or refresh replaced it while the rejected
    /// request was in flight. Returns whether the session was ended.
    pub async fn reject_credential(&self, header: &str, reason: impl Into<String>) -> bool {
        let mut session = self.session.write().await;
        match &*session {
            Session::Active { authenticator, .. }
                if authenticator.authorization_header() == header =>
            {
                let reason = reason.into();
                tracing::warn!(%reason, "Credential rejected; session is now unauthenticated");
                *session = Session::unauthenticated(reason);
                true
            }
            _ => {
                tracing::debug!("Ignoring rejection of a credential that is no longer active");
                false
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        match &*self.session.read().await {
            Session::Active { authenticator, .. } => authenticator.is_authenticated(Utc::now()),
            Session::Unauthenticated { .. } => false,
        }
    }

    /// The account behind the active credential, probing once per session.
    pub async fn authenticated_user(&self, ctx: &RequestContext) -> Result<User> {
        // Refresh first so the identity check does not run with an expiring token.
        self.authorization(ctx).await?;

        let mut authenticator = {
            let session = self.session.read().await;
            match &*session {
                Session::Active { authenticator, .. } => authenticator.clone(),
                Session::Unauthenticated { reason } => {
                    return Err(BitbucketError::authentication(reason.clone()));
                }
            }
        };

        if let Some(user) = authenticator.cached_user() {
            return Ok(user.clone());
        }

        let user = match authenticator.authenticated_user(ctx, &self.services).await {
            Ok(user) => user,
            Err(e) if e.kind == ErrorKind::Authentication => {
                self.reject_credential(&authenticator.authorization_header(), e.message.clone())
                    .await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut session = self.session.write().await;
        if let Session::Active {
            authenticator: active,
            ..
        } = &mut *session
        {
            if active.credential() == authenticator.credential() {
                *active = authenticator;
            }
        }
        Ok(user)
    }

    /// Describes the session without contacting Bitbucket.
    pub async fn status(&self) -> AuthStatus {
        let session = self.session.read().await;
        match &*session {
            Session::Active {
                authenticator,
                source,
            } => {
                let credential = authenticator.credential();
                AuthStatus {
                    authenticated: authenticator.is_authenticated(Utc::now()),
                    method: Some(authenticator.method()),
                    source: Some(*source),
                    user: authenticator.cached_user().cloned(),
                    expires_at: credential.expires_at(),
                    masked_secret: Some(credential.masked_secret()),
                    reason: None,
                }
            }
            Session::Unauthenticated { reason } => AuthStatus {
                authenticated: false,
                method: None,
                source: None,
                user: None,
                expires_at: None,
                masked_secret: None,
                reason: Some(reason.clone()),
            },
        }
    }
}

/// Hides all but the last four characters of `token`.
pub fn masked_token(token: &str) -> String {
    mask(token)
}
