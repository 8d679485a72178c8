// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod server;

/// Exit codes of the agent process.
#[derive(Debug, Clone, Copy)]
#[repr(i32)]
pub enum AgentExitCode {
    Ok = 0,
    /// Not started as root.
    NotRoot = 1,
    /// Fatal bind or setup error.
    Fatal = 2,
}
