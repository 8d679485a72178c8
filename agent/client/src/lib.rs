// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! Client for the privileged root agent daemon.
//!
//! One call is one connection: connect, frame the request, read the single
//! response, done. An `ok: false` reply surfaces as [`ClientError::Agent`],
//! so callers only handle the success shape.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use blockhost_api::framing::{read_frame, write_frame, FrameError};
use blockhost_api::{AddressBookEntry, Params, Request, Response, SOCKET_PATH};
use tokio::net::UnixStream;

/// Default call timeout; provisioning backends can be slow.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to root agent: {0}")]
    Connect(#[source] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("malformed agent response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("agent call timed out")]
    Timeout,
    /// The agent processed the request and reported a failure.
    #[error("{0}")]
    Agent(String),
}

#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            socket_path: PathBuf::from(SOCKET_PATH),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one action to the agent and return its response.
    pub async fn call(&self, action: &str, params: Params) -> Result<Response, ClientError> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(ClientError::Connect)?;

            let body = serde_json::to_vec(&Request::new(action, params))?;
            write_frame(&mut stream, &body).await?;

            let payload = read_frame(&mut stream).await?;
            let response: Response = serde_json::from_slice(&payload)?;
            if response.ok {
                Ok(response)
            } else {
                Err(ClientError::Agent(
                    response
                        .error
                        .unwrap_or_else(|| "Unknown error".to_string()),
                ))
            }
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    pub async fn ip6_route_add(&self, address: &str, dev: &str) -> Result<Response, ClientError> {
        self.call("ip6-route-add", route_params(address, dev)).await
    }

    pub async fn ip6_route_del(&self, address: &str, dev: &str) -> Result<Response, ClientError> {
        self.call("ip6-route-del", route_params(address, dev)).await
    }

    /// Generate a new wallet; only the public address comes back.
    pub async fn generate_wallet(&self, name: &str) -> Result<String, ClientError> {
        let mut params = Params::new();
        params.insert("name".to_string(), name.into());
        let response = self.call("generate-wallet", params).await?;
        response
            .address
            .ok_or_else(|| ClientError::Agent("agent returned no address".to_string()))
    }

    pub async fn addressbook_save(
        &self,
        entries: &BTreeMap<String, AddressBookEntry>,
    ) -> Result<(), ClientError> {
        let mut params = Params::new();
        params.insert("entries".to_string(), serde_json::to_value(entries)?);
        self.call("addressbook-save", params).await?;
        Ok(())
    }
}

fn route_params(address: &str, dev: &str) -> Params {
    let mut params = Params::new();
    params.insert("address".to_string(), address.into());
    params.insert("dev".to_string(), dev.into());
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let client = AgentClient::new().with_socket_path(dir.path().join("absent.sock"));
        let err = client.call("qm-start", Params::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)));
    }
}
