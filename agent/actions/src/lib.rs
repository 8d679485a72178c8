// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Action plugins for the BlockHost root agent.
//!
//! Every action the daemon recognizes is implemented here as an
//! [`ActionHandler`]. Handlers validate each parameter they consume (see
//! [`validate`]), build an argv vector of literal program plus validated
//! arguments, and hand it to the runner in [`exec`]. Modules register their
//! actions through the compile-time table in [`registry`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use blockhost_api::{Params, Response};

use crate::exec::ExecOutput;

pub mod exec;
pub mod fsutil;
mod hypervisor;
mod networking;
pub mod params;
pub mod registry;
mod system;
pub mod validate;

pub use registry::ActionRegistry;

/// Shared environment handed to every handler. Production uses
/// [`ActionEnv::default`]; tests point the directories somewhere writable.
#[derive(Debug, Clone)]
pub struct ActionEnv {
    /// Configuration and key material, `/etc/blockhost`.
    pub config_dir: PathBuf,
    /// Disk images and the VM ledger, `/var/lib/blockhost`.
    pub state_dir: PathBuf,
    /// Group granted read access to key material and the socket.
    pub service_group: String,
    pub exec_timeout: Duration,
    /// For disk customization and VM import.
    pub long_exec_timeout: Duration,
}

impl Default for ActionEnv {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/blockhost"),
            state_dir: PathBuf::from("/var/lib/blockhost"),
            service_group: "blockhost".to_string(),
            exec_timeout: exec::DEFAULT_TIMEOUT,
            long_exec_timeout: exec::MAX_TIMEOUT,
        }
    }
}

/// One action. Implementations must validate every field they use before any
/// of it reaches an argv vector; a returned error is mapped by the daemon to
/// `{ok: false, error}` without killing the connection loop.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response>;
}

/// Map a finished subprocess to the response envelope.
pub(crate) fn subprocess_response(out: ExecOutput) -> Response {
    if out.success() {
        Response::with_output(out.stdout)
    } else {
        Response::error(out.error_message())
    }
}
