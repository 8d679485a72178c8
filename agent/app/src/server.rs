// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The socket server: accepts connections, frames one request and one
//! response per connection, and routes actions to their handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use blockhost_actions::ActionRegistry;
use blockhost_api::framing::{read_frame, write_frame};
use blockhost_api::{Request, Response};
use tokio::net::{UnixListener, UnixStream};

pub struct Server {
    registry: Arc<ActionRegistry>,
    read_timeout: Duration,
}

impl Server {
    pub fn new(registry: ActionRegistry, read_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            read_timeout,
        }
    }

    /// Bind the socket (removing a stale one), restrict its access, and
    /// serve until the task is cancelled.
    pub async fn listen(self, socket_path: &Path, service_group: &str) -> anyhow::Result<()> {
        if let Some(run_dir) = socket_path.parent() {
            std::fs::create_dir_all(run_dir)
                .with_context(|| format!("cannot create {}", run_dir.display()))?;
        }
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("cannot remove stale socket {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("cannot bind {}", socket_path.display()))?;
        restrict_socket(socket_path, service_group)?;
        tracing::info!(path = %socket_path.display(), "root agent listening");

        loop {
            let (stream, _) = listener.accept().await.context("accept failed")?;
            let registry = self.registry.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(handle_connection(stream, registry, read_timeout));
        }
    }
}

/// The socket's group ownership and `0660` mode are the authentication
/// boundary. An unresolvable group degrades to owner-only access with a
/// warning, as on hosts where the service group is not installed yet.
fn restrict_socket(path: &Path, group: &str) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match blockhost_actions::fsutil::group_gid(group) {
        Ok(gid) => {
            if let Err(e) = std::os::unix::fs::chown(path, Some(0), Some(gid)) {
                tracing::warn!(error = %e, group, "could not set socket group");
            }
        }
        Err(e) => tracing::warn!(error = %e, group, "could not resolve service group"),
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
        .with_context(|| format!("cannot set mode on {}", path.display()))?;
    Ok(())
}

/// One request, one response, close. Protocol errors (framing, oversize,
/// malformed JSON, deadline) drop the connection without a reply.
async fn handle_connection(
    stream: UnixStream,
    registry: Arc<ActionRegistry>,
    read_timeout: Duration,
) {
    let (mut reader, mut writer) = stream.into_split();

    let payload = match tokio::time::timeout(read_timeout, read_frame(&mut reader)).await {
        Err(_) => {
            tracing::warn!("client read timeout");
            return;
        }
        Ok(Err(e)) if e.is_disconnect() => {
            tracing::warn!("client disconnected mid-message");
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "bad request frame");
            return;
        }
        Ok(Ok(payload)) => payload,
    };

    let request: Request = match serde_json::from_slice(&payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "malformed request");
            return;
        }
    };

    tracing::info!(action = %request.action, "request");
    let response = dispatch(&registry, &request).await;

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "cannot serialize response");
            return;
        }
    };
    if let Err(e) = write_frame(&mut writer, &body).await {
        tracing::warn!(error = %e, "cannot write response");
    }
}

/// Route to the handler; errors escaping a handler become `{ok:false}`
/// replies, never daemon failures.
pub async fn dispatch(registry: &ActionRegistry, request: &Request) -> Response {
    match registry.get(&request.action) {
        None => Response::error(format!("Unknown action: {}", request.action)),
        Some(handler) => match handler.handle(&request.params).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(action = %request.action, error = %e, "handler error");
                Response::error(e)
            }
        },
    }
}
