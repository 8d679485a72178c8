// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use tracing_subscriber::EnvFilter;

/// A standard log level, or a full filter directive we can hand to
/// [`EnvFilter`].
#[derive(Debug, Clone)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Filter(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Filter(s) => s.as_str(),
        }
    }

    pub fn to_filter(&self) -> anyhow::Result<EnvFilter> {
        // Parsed already when it came from the CLI, but a level constructed
        // directly can still fail here.
        Ok(EnvFilter::try_new(self.as_str())?)
    }
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    let level = match s.to_lowercase().as_str() {
        "off" => LogLevel::Off,
        "error" => LogLevel::Error,
        "warn" => LogLevel::Warn,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        _ => {
            // `EnvFilter` is not `Clone`, so validate early and keep the string.
            if let Err(e) = EnvFilter::try_new(s) {
                return Err(e.to_string());
            }
            LogLevel::Filter(s.to_string())
        }
    };
    Ok(level)
}
