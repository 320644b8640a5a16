use anyhow::ensure;
use hyper::{client::connect::HttpConnector, Body, Client, Method, Request};
use rallyrank_core::{
    message::{BadgeEvaluation, ResultRecorded},
    notify::{LogNotifier, Notifier},
};
use serde::Serialize;
use url::Url;

/// Delivers signals to collaborators over HTTP, or logs them when no endpoint is configured.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    client: Client<HttpConnector>,
    badge_url: Option<Url>,
    notify_url: Option<Url>,
}

impl HttpNotifier {
    pub fn new(badge_url: Option<Url>, notify_url: Option<Url>) -> Self {
        Self {
            client: Client::new(),
            badge_url,
            notify_url,
        }
    }

    async fn post(&self, url: &Url, body: &impl Serialize) -> anyhow::Result<()> {
        let request = Request::builder()
            .method(Method::POST)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .uri(url.as_str())
            .body(Body::from(serde_json::to_string(body)?))?;
        let response = self.client.request(request).await?;
        ensure!(
            response.status().is_success(),
            "{url}: collaborator responded {}",
            response.status()
        );
        Ok(())
    }
}

impl Notifier for HttpNotifier {
    async fn evaluate_badges(&self, request: &BadgeEvaluation) -> anyhow::Result<()> {
        match &self.badge_url {
            Some(url) => self.post(url, request).await,
            None => LogNotifier.evaluate_badges(request).await,
        }
    }

    async fn result_recorded(&self, event: &ResultRecorded) -> anyhow::Result<()> {
        match &self.notify_url {
            Some(url) => self.post(url, event).await,
            None => LogNotifier.result_recorded(event).await,
        }
    }
}
