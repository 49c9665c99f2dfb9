use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tessera_common::env::{ClusterStatus, Command, SubmitReply};
use tessera_common::ErrorCode;

use crate::error::ClientError;

/// One request to one node. Implementations enforce their own per-call
/// timeout.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn submit(&self, endpoint: &str, command: &Command) -> Result<SubmitReply, ClientError>;

    async fn status(&self, endpoint: &str) -> Result<ClusterStatus, ClientError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
}

/// `NodeClient` over the node's HTTP/JSON API.
#[derive(Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Connect {
                endpoint: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { http })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), path)
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| ClientError::Decode {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            });
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::Node {
                endpoint: endpoint.to_string(),
                code: body.code,
                message: body.message,
            }),
            Err(_) => Err(ClientError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

fn send_error(endpoint: &str, e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(endpoint.to_string())
    } else {
        ClientError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn submit(&self, endpoint: &str, command: &Command) -> Result<SubmitReply, ClientError> {
        let response = self
            .http
            .post(Self::url(endpoint, "/v1/submit"))
            .json(command)
            .send()
            .await
            .map_err(|e| send_error(endpoint, e))?;
        Self::decode(endpoint, response).await
    }

    async fn status(&self, endpoint: &str) -> Result<ClusterStatus, ClientError> {
        let response = self
            .http
            .get(Self::url(endpoint, "/v1/status"))
            .send()
            .await
            .map_err(|e| send_error(endpoint, e))?;
        Self::decode(endpoint, response).await
    }
}

#[async_trait]
impl<C: NodeClient + ?Sized> NodeClient for Arc<C> {
    async fn submit(&self, endpoint: &str, command: &Command) -> Result<SubmitReply, ClientError> {
        (**self).submit(endpoint, command).await
    }

    async fn status(&self, endpoint: &str) -> Result<ClusterStatus, ClientError> {
        (**self).status(endpoint).await
    }
}
