// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! Wire protocol shared between the BlockHost root agent and its clients.
//!
//! Both directions carry a single frame: a 4-byte big-endian length prefix
//! followed by a JSON body. Requests are `{action, params}`, responses are
//! `{ok, ...}`. See [`framing`] for the frame codec.

use serde::{Deserialize, Serialize};

pub mod framing;

/// Well-known socket path of the root agent daemon.
pub const SOCKET_PATH: &str = "/run/blockhost/root-agent.sock";

/// Maximum serialized size of a single message, either direction.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Action parameters: a JSON object keyed by parameter name.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// The request envelope sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

impl Request {
    pub fn new(action: impl Into<String>, params: Params) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }
}

/// The response envelope written by the daemon. `ok` is always present;
/// the other fields are omitted from the JSON when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// A bare success with no output.
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    /// Success carrying the captured stdout of the underlying command.
    pub fn with_output(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// Success carrying a public address, e.g. from wallet generation.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            ok: true,
            address: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// One entry of the address book persisted under `/etc/blockhost/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<String>,
}
