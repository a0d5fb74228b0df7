//! KV endpoints: `/v1/kv/<key>`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use super::Kv;
use super::client::{Client, INDEX_HEADER, wait_param};
use super::error::{ApiError, Result};
use super::types::{BlockingQuery, Consistency, KvPair, QueryMeta, RawKvPair};

/// Slack added on top of the server-side wait; the agent adds up to wait/16 jitter.
const BLOCKING_SLACK: Duration = Duration::from_secs(10);

#[async_trait]
impl Kv for Client {
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<KvPair>> {
        let mut url = self.url(&format!("v1/kv/{key}"), true)?;
        match consistency {
            Consistency::Default => {}
            Consistency::Stale => {
                url.query_pairs_mut().append_key_only("stale");
            }
            Consistency::Consistent => {
                url.query_pairs_mut().append_key_only("consistent");
            }
        }

        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let entries: Vec<RawKvPair> = Client::decode(response).await?;
        match entries.into_iter().next() {
            Some(raw) => Ok(Some(KvPair::try_from(raw)?)),
            None => Ok(None),
        }
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        let mut url = self.url(&format!("v1/kv/{key}"), true)?;
        url.query_pairs_mut().append_pair("acquire", session);

        let response = self
            .request(Method::PUT, url)
            .body(value.to_vec())
            .send()
            .await?;
        Client::decode::<bool>(response).await
    }

    async fn keys(
        &self,
        prefix: &str,
        separator: &str,
        query: BlockingQuery,
    ) -> Result<(Vec<String>, QueryMeta)> {
        let mut url = self.url(&format!("v1/kv/{prefix}"), true)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_key_only("keys");
            if !separator.is_empty() {
                pairs.append_pair("separator", separator);
            }
            if query.index > 0 {
                pairs.append_pair("index", &query.index.to_string());
            }
            if let Some(wait) = query.wait {
                pairs.append_pair("wait", &wait_param(wait));
            }
        }

        let mut request = self.request(Method::GET, url);
        if let Some(wait) = query.wait {
            request = request.timeout(wait + wait / 16 + BLOCKING_SLACK);
        }
        let response = request.send().await?;
        // An empty prefix answers 404 but still carries the index.
        let empty = response.status() == StatusCode::NOT_FOUND;
        let response = if empty {
            response
        } else {
            Client::check(response).await?
        };

        let last_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(ApiError::MissingIndex)?;
        let meta = QueryMeta { last_index };

        if empty {
            return Ok((Vec::new(), meta));
        }
        let keys: Vec<String> = Client::decode(response).await?;
        Ok((keys, meta))
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let mut url = self.url(&format!("v1/kv/{prefix}"), true)?;
        url.query_pairs_mut().append_key_only("recurse");

        let response = self.request(Method::DELETE, url).send().await?;
        Client::check(response).await?;
        Ok(())
    }
}
