//! User event endpoint: `/v1/event/fire/<name>`.

use async_trait::async_trait;
use reqwest::Method;

use super::Events;
use super::client::Client;
use super::error::Result;
use super::types::{IdResponse, UserEvent};

#[async_trait]
impl Events for Client {
    async fn fire(&self, event: &UserEvent) -> Result<String> {
        let mut url = self.url(&format!("v1/event/fire/{}", event.name), true)?;
        {
            let mut pairs = url.query_pairs_mut();
            if !event.node_filter.is_empty() {
                pairs.append_pair("node", &event.node_filter);
            }
            if !event.service_filter.is_empty() {
                pairs.append_pair("service", &event.service_filter);
            }
            if !event.tag_filter.is_empty() {
                pairs.append_pair("tag", &event.tag_filter);
            }
        }

        let response = self
            .request(Method::PUT, url)
            .body(event.payload.clone())
            .send()
            .await?;
        let fired: IdResponse = Client::decode(response).await?;
        Ok(fired.id)
    }
}
