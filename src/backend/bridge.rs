//! JSON-over-HTTP client shared by the chat-client bridges.

use crate::config::BridgeConfig;
use crate::error::{RelayError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Thin client for a local bridge process
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl BridgeClient {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Configuration(format!("building bridge client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.resolve_token().map(SecretString::from),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// GET a JSON document
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .authorize(self.http.get(self.url(path)))
            .send()
            .await
            .map_err(|e| bridge_error(path, e))?;
        let response = check_status(path, response).await?;
        response.json::<T>().await.map_err(|e| bridge_error(path, e))
    }

    /// POST a JSON body, ignoring the response payload
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .authorize(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| bridge_error(path, e))?;
        check_status(path, response).await?;
        Ok(())
    }
}

async fn check_status(path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::TransmissionFailed(format!(
        "bridge {} returned {}: {}",
        path,
        status,
        body.trim()
    )))
}

fn bridge_error(path: &str, e: reqwest::Error) -> RelayError {
    RelayError::TransmissionFailed(format!("bridge {}: {}", path, e))
}
