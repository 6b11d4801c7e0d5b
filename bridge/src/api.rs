//! REST calls that sit outside the socket session: joining a game by code
//! and looking a game up by id.

use crate::error::JoinError;
use log::{debug, error, info};
use reqwest::StatusCode;
use shared::{ErrorResponse, GameInfo, GameInfoResponse, JoinRequest, JoinResponse};
use std::future::Future;

/// Registers players with a game before they open a session.
pub trait GameDirectory: Send + Sync {
    fn join(
        &self,
        game_code: &str,
        player_name: &str,
    ) -> impl Future<Output = Result<JoinResponse, JoinError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpGameApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGameApi {
    pub fn new(server_url: &str) -> Result<Self, JoinError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetches the current game record; `None` when the server has no such game.
    pub async fn game_info(&self, game_id: &str) -> Result<Option<GameInfo>, JoinError> {
        let response = self
            .http
            .get(self.url(&format!("/api/games/{}", game_id)))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            debug!("Game {} lookup returned {}", game_id, response.status());
            return Ok(None);
        }

        let body: GameInfoResponse = response
            .json()
            .await
            .map_err(|e| JoinError::InvalidResponse(e.to_string()))?;
        Ok(Some(body.game))
    }
}

impl GameDirectory for HttpGameApi {
    async fn join(&self, game_code: &str, player_name: &str) -> Result<JoinResponse, JoinError> {
        info!("Joining game {} as {}", game_code, player_name);

        let response = self
            .http
            .post(self.url("/api/games/join"))
            .json(&JoinRequest {
                game_code: game_code.to_string(),
                player_name: player_name.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        debug!("Join response status: {}", status);

        if status == StatusCode::OK {
            return response
                .json::<JoinResponse>()
                .await
                .map_err(|e| JoinError::InvalidResponse(e.to_string()));
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| "Unknown error".to_string());
        error!("Join request failed for {}: {}", player_name, message);
        Err(JoinError::Rejected(message))
    }
}
