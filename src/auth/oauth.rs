//
//  bitbucket-cli
//  auth/oauth.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # OAuth 2.0 Module
//!
//! Token refresh and the interactive authorization code flow with PKCE for
//! Bitbucket Cloud.
//!
//! ## OAuth Flow Overview
//!
//! 1. **Generate PKCE**: Create code verifier, code challenge and `state`
//! 2. **Bind Listener**: Open a [`CallbackListener`] on localhost
//! 3. **Authorization Request**: Hand the authorize URL to the caller and
//!    try to open it in the browser
//! 4. **Authorization Code**: Bitbucket redirects to the listener with
//!    `code` and `state`; the listener is released right after
//! 5. **Token Exchange**: Exchange the code for an access/refresh token pair
//! 6. **Token Refresh**: Later, trade the refresh token for a new pair
//!
//! Every token endpoint response becomes a [`Credential::OAuth2`] with an
//! absolute expiry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use bitbucket_client::api::RequestContext;
//! use bitbucket_client::auth::{oauth_login, OAuthClientConfig};
//!
//! async fn login() -> bitbucket_client::api::Result<()> {
//!     let http = reqwest::Client::new();
//!     let ctx = RequestContext::background();
//!     let credential = oauth_login(
//!         &http,
//!         &OAuthClientConfig::default(),
//!         8085,
//!         Duration::from_secs(300),
//!         &ctx,
//!         |url| eprintln!("Open {url} to continue"),
//!     )
//!     .await?;
//!     assert!(credential.expires_at().is_some());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::RngCore;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::api::{classify_response, BitbucketError, ErrorKind, RequestContext, Result};

use super::Credential;

/// The default OAuth client ID for the Bitbucket CLI.
/// Users can override this with their own OAuth consumer.
pub const DEFAULT_CLIENT_ID: &str = "Pyydmsf5kLpEqs24kw";

/// Bitbucket Cloud OAuth authorization endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://bitbucket.org/site/oauth2/authorize";

/// Bitbucket Cloud OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

/// OAuth consumer settings.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,

    /// `None` for public clients; PKCE covers the code exchange.
    pub client_secret: Option<String>,

    pub token_url: String,

    pub authorize_url: String,
}

impl Default for OAuthClientConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("token_url", &self.token_url)
            .field("authorize_url", &self.authorize_url)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Converts into a credential, keeping `previous_refresh` when the
    /// endpoint did not rotate the refresh token.
    fn into_credential(self, previous_refresh: Option<&str>) -> Result<Credential> {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(String::from))
            .ok_or_else(|| BitbucketError::authentication("token endpoint returned no refresh token"))?;

        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in);

        Ok(Credential::oauth2(self.access_token, refresh_token, expires_at))
    }
}

/// Exchanges `refresh_token` for a new token pair.
///
/// A 400 or 401 from the token endpoint means the refresh token itself was
/// rejected and is reported as [`ErrorKind::Authentication`]; the user has
/// to log in again.
pub async fn refresh_oauth_token(
    http: &Client,
    config: &OAuthClientConfig,
    refresh_token: &str,
    ctx: &RequestContext,
) -> Result<Credential> {
    let params = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.to_string()),
    ];

    let response = token_request(http, config, params, ctx).await?;
    let credential = response.into_credential(Some(refresh_token))?;

    tracing::debug!(expires_at = ?credential.expires_at(), "Refreshed OAuth token");
    Ok(credential)
}

/// Exchanges an authorization code for a token pair.
pub async fn exchange_code(
    http: &Client,
    config: &OAuthClientConfig,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
    ctx: &RequestContext,
) -> Result<Credential> {
    let params = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
        ("code_verifier", verifier.to_string()),
    ];

    token_request(http, config, params, ctx)
        .await?
        .into_credential(None)
}

async fn token_request(
    http: &Client,
    config: &OAuthClientConfig,
    mut params: Vec<(&'static str, String)>,
    ctx: &RequestContext,
) -> Result<TokenResponse> {
    ctx.check(0)?;

    let mut request = http.post(&config.token_url);

    // Confidential clients authenticate with Basic auth; public ones send
    // their id in the form body.
    match &config.client_secret {
        Some(secret) => request = request.basic_auth(&config.client_id, Some(secret)),
        None => params.push(("client_id", config.client_id.clone())),
    }

    let exchange = async {
        let response = request
            .form(&params)
            .send()
            .await
            .map_err(BitbucketError::network)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(BitbucketError::network)?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let mut rejected = classify_response(status, &headers, &body);
            tracing::warn!(status = status.as_u16(), message = %rejected.message, "OAuth token request rejected");
            rejected.kind = ErrorKind::Authentication;
            return Err(rejected);
        }
        if !status.is_success() {
            return Err(classify_response(status, &headers, &body));
        }

        serde_json::from_str::<TokenResponse>(&body).map_err(|e| {
            BitbucketError::new(ErrorKind::Unknown, "failed to parse token response").with_source(e)
        })
    };

    tokio::select! {
        cause = ctx.done() => Err(cause.into_error(1)),
        result = exchange => result,
    }
}

/// PKCE (Proof Key for Code Exchange) challenge data.
///
/// The verifier is 32 random bytes, base64url encoded; the challenge is the
/// base64url encoded SHA-256 of the verifier (method `S256`).
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn new() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Random value for the `state` parameter.
pub fn generate_state() -> String {
    random_urlsafe(16)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the authorization URL the user has to visit.
pub fn authorize_url(
    config: &OAuthClientConfig,
    redirect_uri: &str,
    pkce: &PkceChallenge,
    state: &str,
) -> Result<Url> {
    let mut url = Url::parse(&config.authorize_url).map_err(|e| {
        BitbucketError::validation(format!("invalid authorize URL {}", config.authorize_url))
            .with_source(e)
    })?;

    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);

    Ok(url)
}

const SUCCESS_PAGE: &str = "<!DOCTYPE html>\
    <html><head><title>Authentication Successful</title></head>\
    <body style=\"font-family: system-ui, sans-serif; text-align: center; padding: 50px;\">\
    <h1>Authentication Successful!</h1>\
    <p>You can close this window and return to the terminal.</p>\
    </body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html>\
    <html><head><title>Authentication Failed</title></head>\
    <body style=\"font-family: system-ui, sans-serif; text-align: center; padding: 50px;\">\
    <h1>Authentication Failed</h1>\
    <p>The authorization was denied or an error occurred.</p>\
    <p>You can close this window and try again.</p>\
    </body></html>";

/// Local listener receiving the OAuth redirect.
///
/// Lives for exactly one login attempt: [`CallbackListener::wait_for_code`]
/// consumes it, so the port is released on success, failure and timeout
/// alike.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

/// What the browser delivered to the callback.
enum Callback {
    Code { code: String, state: Option<String> },
    Denied(String),
    Ignored,
}

impl CallbackListener {
    /// Binds `127.0.0.1:port`. Port `0` picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            BitbucketError::new(
                ErrorKind::Unknown,
                format!("failed to bind to port {port}. Is another process using it?"),
            )
            .with_source(e)
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| BitbucketError::new(ErrorKind::Unknown, "listener has no address").with_source(e))?
            .port();

        tracing::debug!(port, "OAuth callback listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.port)
    }

    /// Waits for the redirect carrying the authorization code.
    ///
    /// Requests without `code` or `error` (e.g. `/favicon.ico`) are answered
    /// and skipped. Fails with [`ErrorKind::Authentication`] when the user
    /// denies access, the `state` does not match, or `timeout` passes.
    pub async fn wait_for_code(self, timeout: Duration, expected_state: &str) -> Result<String> {
        let wait = async {
            loop {
                let (stream, _) = self.listener.accept().await.map_err(|e| {
                    BitbucketError::new(ErrorKind::Network, "callback listener failed").with_source(e)
                })?;

                match handle_callback(stream).await {
                    Callback::Code { code, state } => {
                        if state.as_deref() != Some(expected_state) {
                            return Err(BitbucketError::authentication(
                                "OAuth state mismatch; the redirect did not come from this login",
                            ));
                        }
                        return Ok(code);
                    }
                    Callback::Denied(reason) => {
                        return Err(BitbucketError::authentication(format!(
                            "authorization was denied: {reason}"
                        )));
                    }
                    Callback::Ignored => continue,
                }
            }
        };

        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(BitbucketError::authentication(
                "authorization timed out. Please try again.",
            )),
        };

        tracing::debug!(port = self.port, ok = result.is_ok(), "OAuth callback listener released");
        result
    }
}

async fn handle_callback(mut stream: TcpStream) -> Callback {
    let mut request_line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        if reader.read_line(&mut request_line).await.is_err() {
            return Callback::Ignored;
        }
    }

    let callback = parse_callback(&request_line);
    let (status, page) = match &callback {
        Callback::Code { .. } => ("200 OK", SUCCESS_PAGE),
        Callback::Denied(_) => ("400 Bad Request", FAILURE_PAGE),
        Callback::Ignored => ("404 Not Found", ""),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
        page.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    callback
}

/// Parses a request line such as `GET /callback?code=xxx&state=yyy HTTP/1.1`.
fn parse_callback(request_line: &str) -> Callback {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Callback::Ignored;
    };
    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return Callback::Ignored;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Callback::Denied(error),
        (Some(code), None) => Callback::Code { code, state },
        (None, None) => Callback::Ignored,
    }
}

/// Runs the interactive authorization code flow with PKCE.
///
/// `on_url` receives the authorize URL before the browser is opened so the
/// caller can show it; this module never prints. The callback listener is
/// held only for the duration of this call.
pub async fn oauth_login<F>(
    http: &Client,
    config: &OAuthClientConfig,
    port: u16,
    timeout: Duration,
    ctx: &RequestContext,
    on_url: F,
) -> Result<Credential>
where
    F: FnOnce(&Url),
{
    ctx.check(0)?;

    let pkce = PkceChallenge::new();
    let state = generate_state();
    let listener = CallbackListener::bind(port).await?;
    let redirect_uri = listener.redirect_uri();
    let url = authorize_url(config, &redirect_uri, &pkce, &state)?;

    on_url(&url);
    if let Err(e) = webbrowser::open(url.as_str()) {
        tracing::warn!(error = %e, "Could not open browser");
    }

    let code = tokio::select! {
        cause = ctx.done() => return Err(cause.into_error(0)),
        code = listener.wait_for_code(timeout, &state) => code?,
    };

    tracing::debug!("Authorization received; exchanging code for tokens");
    exchange_code(http, config, &code, &pkce.verifier, &redirect_uri, ctx).await
}
