use anyhow::{bail, Context};
use serde::Serialize;
use serde_json::Value;

/// Thin HTTP client over `gantry-server`'s API. Holds no state beyond the
/// base URL and bearer token — every call is a single request/response,
/// matching the CLI's "delegate to the HTTP API" contract.
pub struct GantryClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl GantryClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self
            .authed(self.http.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("GET {path} failed to reach the daemon"))?;
        Self::decode(response).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<Value> {
        let response = self
            .authed(self.http.post(self.url(path)))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed to reach the daemon"))?;
        Self::decode(response).await
    }

    pub async fn post_empty(&self, path: &str) -> anyhow::Result<Value> {
        self.post(path, &serde_json::json!({})).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        let response = self
            .authed(self.http.delete(self.url(path)))
            .send()
            .await
            .with_context(|| format!("DELETE {path} failed to reach the daemon"))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body.get("error").and_then(Value::as_str).unwrap_or("request failed");
            let kind = body.get("kind").and_then(Value::as_str).unwrap_or("unknown");
            bail!("{status} [{kind}]: {message}");
        }
        Ok(body)
    }
}
