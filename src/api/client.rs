//! Core HTTP client: address handling, auth, datacenter scoping, response checks.

use std::time::Duration;

use reqwest::{Client as HttpClient, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::error::{ApiError, Result};

pub(crate) const TOKEN_HEADER: &str = "X-Consul-Token";
pub(crate) const INDEX_HEADER: &str = "X-Consul-Index";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for the agent HTTP API.
///
/// Requests other than `/v1/agent/*` are scoped to the configured datacenter,
/// matching how the agent forwards them to that datacenter's servers.
#[derive(Debug, Clone)]
pub struct Client {
    base: Url,
    http: HttpClient,
    token: Option<String>,
    datacenter: Option<String>,
}

impl Client {
    /// Create a client for `addr`. A bare `host:port` is treated as `http://host:port`.
    pub fn new(addr: &str) -> Result<Self> {
        let base = parse_address(addr)?;
        // Blocking queries set their own per-request timeout.
        let http = HttpClient::builder().build()?;
        Ok(Self {
            base,
            http,
            token: None,
            datacenter: None,
        })
    }

    /// Send `X-Consul-Token` on every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Scope every non-agent request to `dc`.
    #[must_use]
    pub fn with_datacenter(mut self, dc: impl Into<String>) -> Self {
        let dc = dc.into();
        self.datacenter = (!dc.is_empty()).then_some(dc);
        self
    }

    #[cfg(test)]
    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }

    pub fn address(&self) -> &Url {
        &self.base
    }

    /// Build `<base>/<path>`, percent-encoding each segment. Adds `dc=` when
    /// `scoped` and a datacenter is configured.
    pub(crate) fn url(&self, path: &str, scoped: bool) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidAddress(self.base.to_string()))?;
            segments.pop_if_empty();
            for seg in path.split('/') {
                segments.push(seg);
            }
        }
        if scoped && let Some(dc) = &self.datacenter {
            url.query_pairs_mut().append_pair("dc", dc);
        }
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url).timeout(DEFAULT_TIMEOUT);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    /// Fail on non-2xx, returning the response otherwise.
    pub(crate) async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ApiError::Status {
            status: status.as_u16(),
            message: body.trim().to_string(),
        })
    }

    pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn parse_address(addr: &str) -> Result<Url> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidAddress("address is empty".into()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| ApiError::InvalidAddress(format!("{trimmed}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::InvalidAddress(format!(
            "unsupported scheme '{other}' in {trimmed}"
        ))),
    }
}

/// Go-style duration text for the `wait` query parameter.
pub(crate) fn wait_param(wait: Duration) -> String {
    format!("{}ms", wait.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_gets_http_scheme() {
        let c = Client::new("127.0.0.1:8500").unwrap();
        assert_eq!(c.address().as_str(), "http://127.0.0.1:8500/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = Client::new("ftp://example.com").unwrap_err();
        assert!(matches!(err, ApiError::InvalidAddress(_)));
    }

    #[test]
    fn url_keeps_trailing_slash_and_adds_dc() {
        let c = Client::new("http://localhost:8500")
            .unwrap()
            .with_datacenter("dc2");
        let url = c.url("v1/kv/_rexec/abc/", true).unwrap();
        assert_eq!(url.path(), "/v1/kv/_rexec/abc/");
        assert_eq!(url.query(), Some("dc=dc2"));

        let local = c.url("v1/agent/self", false).unwrap();
        assert_eq!(local.query(), None);
    }

    #[test]
    fn empty_token_is_ignored() {
        let c = Client::new("localhost:8500").unwrap().with_token("");
        assert!(c.token.is_none());
    }

    #[test]
    fn wait_param_is_milliseconds() {
        assert_eq!(wait_param(Duration::from_secs(2)), "2000ms");
    }
}
