//! Agent and health endpoints used to locate the local node and remote servers.

use async_trait::async_trait;
use reqwest::Method;

use super::Agent;
use super::client::Client;
use super::error::Result;
use super::types::{AgentSelf, RawAgentSelf, RawServiceEntry};

#[async_trait]
impl Agent for Client {
    async fn self_info(&self) -> Result<AgentSelf> {
        // Always the local agent, never forwarded.
        let url = self.url("v1/agent/self", false)?;
        let response = self.request(Method::GET, url).send().await?;
        let raw: RawAgentSelf = Client::decode(response).await?;
        Ok(AgentSelf {
            datacenter: raw.config.datacenter,
            node_name: raw.config.node_name,
        })
    }

    async fn server_nodes(&self) -> Result<Vec<String>> {
        let mut url = self.url("v1/health/service/consul", true)?;
        url.query_pairs_mut().append_key_only("passing");
        let response = self.request(Method::GET, url).send().await?;
        let entries: Vec<RawServiceEntry> = Client::decode(response).await?;
        Ok(entries.into_iter().map(|e| e.node.node).collect())
    }
}
