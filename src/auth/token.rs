//
//  bitbucket-cli
//  auth/token.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Token Helpers
//!
//! Format checks for secrets and the lightweight identity check used to
//! confirm a credential: `GET /user` with the credential's `Authorization`
//! header. The check is a single attempt; a 401 means the credential was
//! rejected.

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;

use crate::api::{classify_response, BitbucketError, ErrorKind, RequestContext, Result, User};

/// Reads a token from standard input.
///
/// Only the first line is read; surrounding whitespace is trimmed. Works
/// with piped input: `echo "$TOKEN" | bb auth login --with-token`.
pub fn read_token_from_stdin() -> std::io::Result<String> {
    use std::io::{self, BufRead};

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;

    Ok(line.trim().to_string())
}

/// Validates the format of a token string.
///
/// Tokens must be non-empty and contain no whitespace. This does not
/// contact Bitbucket.
///
/// # Example
///
/// ```rust
/// use bitbucket_client::auth::validate_token;
///
/// assert!(validate_token("ATBBxyz123"));
/// assert!(!validate_token(""));
/// assert!(!validate_token("has space"));
/// assert!(!validate_token("has\nnewline"));
/// ```
pub fn validate_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_whitespace)
}

/// Fetches the account behind `authorization` from `{base_url}/user`.
///
/// Fails with [`ErrorKind::Authentication`] when the credential is
/// rejected and with the usual classification for other statuses.
pub async fn fetch_current_user(
    http: &Client,
    base_url: &str,
    authorization: &str,
    ctx: &RequestContext,
) -> Result<User> {
    ctx.check(0)?;

    let url = format!("{}/user", base_url.trim_end_matches('/'));
    let header = HeaderValue::from_str(authorization)
        .map_err(|_| BitbucketError::validation("credential contains invalid header characters"))?;

    let check = async {
        let response = http
            .get(&url)
            .header(AUTHORIZATION, header)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(BitbucketError::network)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(BitbucketError::network)?;

        if !status.is_success() {
            return Err(classify_response(status, &headers, &body));
        }

        serde_json::from_str::<User>(&body).map_err(|e| {
            BitbucketError::new(ErrorKind::Unknown, "unexpected /user response").with_source(e)
        })
    };

    let result = tokio::select! {
        cause = ctx.done() => Err(cause.into_error(1)),
        result = check => result,
    };

    match &result {
        Ok(user) => tracing::debug!(username = %user.username, "Identity check succeeded"),
        Err(e) => tracing::debug!(error = %e, "Identity check failed"),
    }

    result.map_err(|e| e.with_attempts(1))
}
