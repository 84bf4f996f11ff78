//! Obtaining a bearer token with the OAuth2 password grant.

use std::{fmt, time::Duration};

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Method, Request, StatusCode,
    header::{self, HeaderValue},
};
use serde::Deserialize;

use crate::{
    config::HttpUrl,
    prelude::*,
    util::{self, HttpClient},
};


#[derive(Debug, confique::Config)]
pub struct AuthConfig {
    /// The OAuth2 token endpoint of the identity provider.
    #[config(default = "http://localhost/auth/realms/paye-ton-kawa/protocol/openid-connect/token")]
    pub token_url: HttpUrl,

    /// Client ID sent with the password grant.
    #[config(default = "gateway")]
    pub client_id: String,

    /// Username of the account all simulated users log in as.
    #[config(default = "admin")]
    pub username: String,

    /// Password of that account.
    #[config(default = "admin")]
    pub password: String,

    /// What a simulated user does if it could not obtain a token. With
    /// `false`, it continues sending requests without `Authorization` header,
    /// which is useful to load test the gateway's rejection path. With
    /// `true`, the user stops right away.
    #[config(default = false)]
    pub require_token: bool,

    /// How long to wait for the token endpoint to respond. "0" waits forever.
    #[config(default = "0", deserialize_with = crate::config::deserialize_duration)]
    pub timeout: Duration,
}

/// An opaque bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> HeaderValue {
        let mut value = HeaderValue::try_from(format!("Bearer {}", self.0))
            .expect("token was checked to be a valid header value");
        value.set_sensitive(true);
        value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Result of a single token exchange.
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated(Credential),
    Unauthenticated(AuthFailure),
}

/// Reasons a token exchange did not produce a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The request could not be sent or no response arrived.
    Transport(String),

    /// The endpoint did not respond within `auth.timeout`.
    Timeout,

    /// The endpoint responded with a non-2xx status. Carries the start of the
    /// response body.
    Status(StatusCode, String),

    /// The body was not a JSON object.
    InvalidBody,

    /// The body did not contain a usable `access_token`.
    MissingToken,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Timeout => f.write_str("timed out"),
            Self::Status(status, body) => write!(f, "token endpoint replied {status}: {body}"),
            Self::InvalidBody => f.write_str("response body is not valid JSON"),
            Self::MissingToken => f.write_str("no access_token in response"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// How much of a token ends up in debug logs.
const LOG_PREVIEW_LEN: usize = 50;

/// How much of a response body ends up in logs and failure reasons.
const LOG_BODY_LEN: usize = 500;

/// Performs the password grant against `auth.token_url`.
///
/// This never fails hard: every problem is logged and turned into
/// [`AuthOutcome::Unauthenticated`], leaving it to the caller to decide
/// whether to continue.
pub async fn authenticate(client: &HttpClient, config: &AuthConfig) -> AuthOutcome {
    info!("Requesting access token");
    match exchange(client, config).await {
        Ok(credential) => {
            info!("Access token obtained");
            debug!("token={}...", util::truncate(credential.as_str(), LOG_PREVIEW_LEN));
            AuthOutcome::Authenticated(credential)
        }
        Err(failure) => {
            error!(token_url = %config.token_url, "Could not obtain access token: {failure}");
            AuthOutcome::Unauthenticated(failure)
        }
    }
}

async fn exchange(client: &HttpClient, config: &AuthConfig) -> Result<Credential, AuthFailure> {
    let body = form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &config.client_id)
        .append_pair("grant_type", "password")
        .append_pair("username", &config.username)
        .append_pair("password", &config.password)
        .finish();
    debug!(
        client_id = %config.client_id,
        username = %config.username,
        "POST {}", config.token_url,
    );

    let req = Request::builder()
        .method(Method::POST)
        .uri(config.token_url.0.clone())
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::ACCEPT, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("token request parts are all valid");

    let response = util::with_timeout(config.timeout, async {
        let response = client.request(req).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok::<_, Error>((parts.status, body))
    }).await;

    let (status, body) = match response {
        None => return Err(AuthFailure::Timeout),
        Some(Err(e)) => return Err(AuthFailure::Transport(format!("{e:#}"))),
        Some(Ok(v)) => v,
    };

    let text = String::from_utf8_lossy(&body);
    debug!(%status, "token endpoint replied: {}", util::truncate(&text, LOG_BODY_LEN));
    if !status.is_success() {
        let body = util::truncate(&text, LOG_BODY_LEN).to_owned();
        return Err(AuthFailure::Status(status, body));
    }

    let response: TokenResponse = serde_json::from_slice(&body)
        .map_err(|_| AuthFailure::InvalidBody)?;
    match response.access_token {
        Some(token) if !token.is_empty() && HeaderValue::try_from(format!("Bearer {token}")).is_ok()
            => Ok(Credential::new(token)),
        _ => Err(AuthFailure::MissingToken),
    }
}
