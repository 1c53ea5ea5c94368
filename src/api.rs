//! HTTP collaborators: credential refresh, logout, game creation and history.

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::channel::{AuthError, AuthSession, CredentialRefresher, LiveGame};
use crate::clock::TimeFormat;
use crate::history::{CompletedGame, GameStats};

/// REST client for the game server.
///
/// Keeps a cookie store so the refresh cookie issued at login travels with
/// refresh requests.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`.
    pub fn new(base_url: Url) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url,
            client,
            token: None,
        })
    }

    /// Attaches a bearer credential to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Replaces the bearer credential.
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// API root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Exchanges the refresh cookie for a new access token.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self, user_id: &str) -> Result<String, ApiError> {
        let url = self.endpoint(&["auth", "refresh-token"])?;
        let request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "user_id": user_id }));
        let response: RefreshResponse = self.send(request).await?;
        let token = response
            .access_token
            .ok_or_else(|| ApiError::new("refresh response carried no access token"))?;
        info!("Access token refreshed");
        Ok(token)
    }

    /// Ends the server-side session of `user_id`.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["auth", "logout"])?;
        let request = self
            .authorized(self.client.post(url))
            .json(&serde_json::json!({ "user_id": user_id }));
        let response = request.send().await?;
        check_status(response).await?;
        info!("Logged out");
        Ok(())
    }

    /// Creates a live game with the given time control.
    #[instrument(skip(self), fields(time_format = %time_format))]
    pub async fn create_live_game(&self, time_format: TimeFormat) -> Result<LiveGame, ApiError> {
        let url = self.endpoint(&["game", "live"])?;
        let request = self
            .client
            .post(url)
            .json(&serde_json::json!({ "time_format": time_format.to_string() }));
        let game: LiveGame = self.send(request).await?;
        info!(game_id = %game.id, "Live game created");
        Ok(game)
    }

    /// Fetches a completed game.
    #[instrument(skip(self))]
    pub async fn fetch_game(&self, game_id: &str) -> Result<CompletedGame, ApiError> {
        let url = self.endpoint(&["game", game_id])?;
        self.send(self.client.get(url)).await
    }

    /// Fetches every completed game of `user_id`.
    #[instrument(skip(self))]
    pub async fn fetch_user_games(&self, user_id: &str) -> Result<Vec<CompletedGame>, ApiError> {
        let url = self.endpoint(&["user", user_id, "games"])?;
        let games: Vec<CompletedGame> = self.send(self.client.get(url)).await?;
        debug!(count = games.len(), "Fetched games");
        Ok(games)
    }

    /// Fetches win/loss/draw totals of `user_id`.
    #[instrument(skip(self))]
    pub async fn fetch_game_stats(&self, user_id: &str) -> Result<GameStats, ApiError> {
        let url = self.endpoint(&["user", user_id, "game-stats"])?;
        self.send(self.client.get(url)).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::new(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.authorized(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "Request rejected");
    Err(ApiError::with_status(status.as_u16(), format!("{status}: {body}")))
}

/// Refreshes credentials over HTTP, logging the user out when that fails.
#[derive(Debug, Clone)]
pub struct HttpCredentialRefresher {
    api: ApiClient,
}

impl HttpCredentialRefresher {
    /// Creates a refresher backed by `api`.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CredentialRefresher for HttpCredentialRefresher {
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    async fn refresh(&self, session: &AuthSession) -> Result<String, AuthError> {
        let user_id = session.user_id();
        if user_id.is_empty() {
            return Err(AuthError::Missing);
        }
        match self.api.refresh_token(user_id).await {
            Ok(token) => Ok(token),
            Err(e) => {
                warn!(error = %e, "Refresh failed; logging out");
                if let Err(logout) = self.api.logout(user_id).await {
                    warn!(error = %logout, "Logout after failed refresh also failed");
                }
                Err(AuthError::RefreshFailed(e.message))
            }
        }
    }
}

/// HTTP collaborator failure.
#[derive(Debug, Clone, Display, Error)]
#[display("API error: {} at {}:{}", message, file, line)]
pub struct ApiError {
    /// Error message.
    pub message: String,
    /// HTTP status, when the server answered.
    pub status: Option<u16>,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ApiError {
    /// Creates a new error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            status: None,
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// Creates an error for a rejected request.
    #[track_caller]
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }
}

impl From<reqwest::Error> for ApiError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        Self {
            status: err.status().map(|s| s.as_u16()),
            ..Self::new(err.to_string())
        }
    }
}
