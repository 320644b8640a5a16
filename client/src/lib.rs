//! HTTP client for the rating service.

use anyhow::{bail, Context};
use hyper::{body::Bytes, client::connect::HttpConnector, Body, Method, Request, StatusCode};
use rallyrank_core::{
    message::{
        ErrorReport, HistoryEntry, MatchRatingEffect, MatchResult, PlayerRating, RatingChange,
        Recompute, RegisterMatch, Scored,
    },
    outcome::{MatchId, PlayerId, Submission},
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

#[derive(Clone, Debug)]
pub struct Client {
    client: hyper::Client<HttpConnector>,
    url: Url,
}

impl Client {
    pub fn new(url: Url) -> Self {
        Self {
            client: hyper::Client::new(),
            url,
        }
    }

    pub async fn register_match(
        &self,
        match_id: MatchId,
        participants: Vec<PlayerId>,
    ) -> anyhow::Result<()> {
        self.send(
            Method::POST,
            "matches",
            Some(&RegisterMatch {
                match_id,
                participants,
            }),
        )
        .await?;
        Ok(())
    }

    /// Submit or correct a result, returning the submitting player's change.
    pub async fn submit(&self, submission: &Submission) -> anyhow::Result<RatingChange> {
        self.post("results", submission).await
    }

    pub async fn recompute(&self, match_id: MatchId) -> anyhow::Result<Scored> {
        self.post("recompute", &Recompute { match_id }).await
    }

    pub async fn player(&self, id: &PlayerId) -> anyhow::Result<PlayerRating> {
        self.get(&format!("players/{id}")).await
    }

    /// A player's rating changes, newest first.
    pub async fn history(&self, id: &PlayerId) -> anyhow::Result<Vec<HistoryEntry>> {
        self.get(&format!("players/{id}/history")).await
    }

    pub async fn leaderboard(&self, limit: u32) -> anyhow::Result<Vec<PlayerRating>> {
        self.get(&format!("leaderboard?limit={limit}")).await
    }

    pub async fn match_result(&self, id: MatchId) -> anyhow::Result<MatchResult> {
        self.get(&format!("matches/{id}/result")).await
    }

    pub async fn match_effects(&self, id: MatchId) -> anyhow::Result<Vec<MatchRatingEffect>> {
        self.get(&format!("matches/{id}/effects")).await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> anyhow::Result<T> {
        let body = self.send(Method::GET, endpoint, None::<&()>).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &impl Serialize,
    ) -> anyhow::Result<T> {
        let body = self.send(Method::POST, endpoint, Some(payload)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&impl Serialize>,
    ) -> anyhow::Result<Bytes> {
        let url = self.url.join(endpoint)?;
        let body = match payload {
            Some(payload) => Body::from(serde_json::to_string(payload)?),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .uri(url.as_str())
            .body(body)?;
        let response = self
            .client
            .request(request)
            .await
            .with_context(|| format!("{url}: unable to reach rating service"))?;

        let status = response.status();
        let body = hyper::body::to_bytes(response).await?;
        if !status.is_success() {
            bail!("{url}: {}", rejection(status, &body));
        }
        Ok(body)
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorReport>(body) {
        Ok(ErrorReport {
            error,
            retryable: true,
        }) => format!("{error} ({status}, retryable)"),
        Ok(ErrorReport { error, .. }) => format!("{error} ({status})"),
        Err(_) => status.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejection_messages() {
        let body = br#"{"error":"match 3 is already being scored, try again","retryable":true}"#;
        assert_eq!(
            rejection(StatusCode::CONFLICT, body),
            "match 3 is already being scored, try again (409 Conflict, retryable)"
        );

        let body = br#"{"error":"match 3 not found","retryable":false}"#;
        assert_eq!(
            rejection(StatusCode::NOT_FOUND, body),
            "match 3 not found (404 Not Found)"
        );

        assert_eq!(rejection(StatusCode::BAD_GATEWAY, b"<html>"), "502 Bad Gateway");
    }
}
