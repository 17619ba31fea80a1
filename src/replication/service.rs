use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ReplicationError;
use crate::models::ChangeSet;

/// Replica-side acknowledgement of a pushed change set.
#[derive(Debug, Clone, Deserialize)]
pub struct PushReceipt {
    pub accepted: usize,
}

#[derive(Debug, Serialize)]
struct SetupRequest {
    schema_version: u32,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    change_sets: Vec<ChangeSet>,
}

/// The cloud replication service, as far as the core needs it. Every
/// call maps onto one operation type for the request coordinator.
#[async_trait]
pub trait ReplicationService: Send + Sync + 'static {
    async fn setup(&self, schema_version: u32) -> Result<(), ReplicationError>;
    async fn push(&self, changes: ChangeSet) -> Result<PushReceipt, ReplicationError>;
    async fn pull(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChangeSet>, ReplicationError>;
}

pub struct HttpReplicationClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl HttpReplicationClient {
    pub fn new(base_url: String, access_token: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url,
            access_token,
        }
    }

    fn classify_status(status: StatusCode, body: String) -> ReplicationError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ReplicationError::Auth(body),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                ReplicationError::Incompatible(body)
            }
            s if s.is_server_error() => ReplicationError::Transient(body),
            _ => ReplicationError::Transient(format!("HTTP {}: {}", status, body)),
        }
    }

    fn classify_transport(err: reqwest::Error) -> ReplicationError {
        if err.is_timeout() {
            ReplicationError::Timeout
        } else {
            ReplicationError::Http(err)
        }
    }
}

#[async_trait]
impl ReplicationService for HttpReplicationClient {
    async fn setup(&self, schema_version: u32) -> Result<(), ReplicationError> {
        let response = self
            .client
            .post(format!("{}/setup", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&SetupRequest { schema_version })
            .send()
            .await
            .map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }
        Ok(())
    }

    async fn push(&self, changes: ChangeSet) -> Result<PushReceipt, ReplicationError> {
        let response = self
            .client
            .post(format!("{}/changes", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&changes)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let receipt = response
            .json::<PushReceipt>()
            .await
            .map_err(Self::classify_transport)?;
        Ok(receipt)
    }

    async fn pull(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChangeSet>, ReplicationError> {
        let mut request = self
            .client
            .get(format!("{}/changes", self.base_url))
            .bearer_auth(&self.access_token);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await.map_err(Self::classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let pulled = response
            .json::<PullResponse>()
            .await
            .map_err(Self::classify_transport)?;
        Ok(pulled.change_sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_schema_failures_are_terminal() {
        let auth = HttpReplicationClient::classify_status(
            StatusCode::UNAUTHORIZED,
            "bad token".to_string(),
        );
        assert!(auth.is_terminal());

        let schema = HttpReplicationClient::classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            "schema v9".to_string(),
        );
        assert!(schema.is_terminal());

        let transient = HttpReplicationClient::classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "oops".to_string(),
        );
        assert!(!transient.is_terminal());
    }
}
