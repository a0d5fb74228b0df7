//! Session endpoints: `/v1/session/{create,destroy,renew}`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use super::Sessions;
use super::client::Client;
use super::error::{ApiError, Result};
use super::types::{IdResponse, SessionEntry};

#[async_trait]
impl Sessions for Client {
    async fn create(&self, entry: &SessionEntry) -> Result<String> {
        let url = self.url("v1/session/create", true)?;
        let response = self.request(Method::PUT, url).json(entry).send().await?;
        let created: IdResponse = Client::decode(response).await?;
        Ok(created.id)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("v1/session/destroy/{id}"), true)?;
        let response = self.request(Method::PUT, url).send().await?;
        Client::check(response).await?;
        Ok(())
    }

    async fn renew(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("v1/session/renew/{id}"), true)?;
        let response = self.request(Method::PUT, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::Status {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("session {id} not found"),
            });
        }
        Client::check(response).await?;
        Ok(())
    }
}
