// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};

/// Name of the agent socket inside the run directory.
pub const SOCKET_NAME: &str = "root-agent.sock";

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ExecSettings {
    /// Default timeout for external commands.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Ceiling for long operations (disk customization, VM import).
    #[serde_as(as = "DurationSeconds<u64>")]
    pub long_timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Where the agent socket lives, `/run/blockhost`.
    run_dir: PathBuf,
    /// Key material and the address book, `/etc/blockhost`.
    pub config_dir: PathBuf,
    /// Disk images and the VM ledger, `/var/lib/blockhost`.
    pub state_dir: PathBuf,
    /// Group allowed to connect to the socket and read key material.
    pub service_group: String,
    /// Deadline for a client to deliver one request frame.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read_timeout: Duration,
    pub exec: ExecSettings,
}

impl Settings {
    /// Load the default configuration from a directory, then optional local
    /// overrides, then overrides from the environment.
    pub fn new(config_dir: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(config_dir.join("default")))
            // Optional local overrides, not checked into git.
            .add_source(File::from(config_dir.join("local")).required(false))
            // Add in settings from the environment (with a prefix of BH)
            // e.g. `BH_EXEC__TIMEOUT=300 blockhost-agent run`.
            .add_source(
                Environment::with_prefix("bh")
                    .prefix_separator("_")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn socket_path(&self) -> PathBuf {
        self.run_dir.join(SOCKET_NAME)
    }
}
