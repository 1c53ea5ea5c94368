//! Authenticated session and the credential-refresh seam.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_getters::Getters;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Getters)]
pub struct AccessClaims {
    /// Subject: the user id.
    sub: String,
    /// Expiry, seconds since the epoch.
    #[serde(default)]
    exp: Option<i64>,
    /// Account email.
    #[serde(default)]
    email: Option<String>,
    /// Given name.
    #[serde(default)]
    first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    last_name: Option<String>,
}

impl AccessClaims {
    /// Decodes the payload segment of a JWT without verifying the signature.
    #[instrument(skip(token))]
    pub fn decode(token: &str) -> Result<Self, AuthError> {
        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::MalformedToken("missing payload segment".to_string()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| AuthError::MalformedToken(e.to_string()))
    }
}

/// The explicit authenticated session handed to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Getters)]
pub struct AuthSession {
    /// Authenticated user.
    user_id: String,
    /// Bearer credential, absent until issued or refreshed.
    token: Option<String>,
}

impl AuthSession {
    /// Creates a session for `user_id` with an optional credential.
    pub fn new(user_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }

    /// Creates a session from an access token, taking the user id from its
    /// `sub` claim.
    pub fn from_token(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        let claims = AccessClaims::decode(&token)?;
        Ok(Self {
            user_id: claims.sub,
            token: Some(token),
        })
    }

    /// Bearer credential, if present.
    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Installs a fresh credential.
    ///
    /// The user id is re-derived from the token's `sub` claim; a token that
    /// does not decode keeps the current id.
    pub fn set_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        match AccessClaims::decode(&token) {
            Ok(claims) => {
                if claims.sub != self.user_id {
                    debug!(user_id = %claims.sub, "Credential names a different user");
                }
                self.user_id = claims.sub;
            }
            Err(e) => warn!(error = %e, "Credential is not a decodable access token"),
        }
        self.token = Some(token);
    }

    /// Drops the credential, keeping the user id for a later refresh.
    pub fn clear(&mut self) {
        self.token = None;
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum AuthError {
    /// No user to refresh a credential for.
    #[display("No authenticated user")]
    Missing,
    /// The refresh collaborator failed.
    #[display("Credential refresh failed: {_0}")]
    RefreshFailed(#[error(not(source))] String),
    /// A token that is not a well-formed JWT.
    #[display("Malformed access token: {_0}")]
    MalformedToken(#[error(not(source))] String),
}

/// Out-of-band collaborator that issues a fresh credential.
#[async_trait]
pub trait CredentialRefresher: Send + Sync + 'static {
    /// Obtains a new access token for `session`.
    async fn refresh(&self, session: &AuthSession) -> Result<String, AuthError>;
}
