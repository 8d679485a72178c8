// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod log;

use log::{parse_log_level, LogLevel};

pub fn parse() -> Options {
    Options::parse()
}

#[derive(Parser, Debug)]
#[command(version)]
pub struct Options {
    /// Set a custom directory for the agent's configuration files.
    #[arg(
        short = 'c',
        long,
        default_value = "/etc/blockhost",
        env = "BH_CONFIG_DIR"
    )]
    pub config_dir: PathBuf,

    /// Set a custom directory for rolling JSON log files.
    #[arg(long, env = "BH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Set the logging level of the console.
    #[arg(
        short = 'l',
        long,
        default_value = "info",
        env = "BH_LOG_LEVEL",
        help = "Standard log levels, or a comma separated list of filters, e.g. 'debug,blockhost_actions=warn'",
        value_parser = parse_log_level,
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

impl Options {
    /// Tracing filter shared by the console and file layers.
    pub fn log_filter(&self) -> anyhow::Result<EnvFilter> {
        self.log_level.to_filter()
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse the configuration file and print it to the console.
    Config(ConfigArgs),
    /// Run the root agent daemon.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {}

#[derive(Args, Debug)]
pub struct RunArgs {}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn options_handle_help() {
        // On a misconfiguration `try_parse_from` panics instead of exiting,
        // so this doubles as a sanity check of the clap derive.
        let e = Options::try_parse_from(["blockhost-agent", "--help"])
            .expect_err("--help is not Options");
        assert!(e.to_string().contains("Usage:"), "unexpected help: {e}");
    }

    #[test]
    fn parse_log_levels() {
        let parse = |cmd: &str| {
            let opts = Options::parse_from(cmd.split_ascii_whitespace());
            opts.log_filter().expect("filter should parse")
        };
        assert_eq!(
            parse("blockhost-agent --log-level debug run").max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            parse("blockhost-agent --log-level off run").max_level_hint(),
            Some(LevelFilter::OFF)
        );
        assert_eq!(
            parse("blockhost-agent -l blockhost_actions=warn,error run").max_level_hint(),
            Some(LevelFilter::WARN)
        );
    }

    #[test]
    fn invalid_log_filter_is_rejected() {
        Options::try_parse_from(["blockhost-agent", "--log-level", "nonsense/123", "run"])
            .expect_err("should not parse");
    }

    #[test]
    fn config_dir_default() {
        let opts = Options::parse_from(["blockhost-agent", "run"]);
        assert_eq!(opts.config_dir, std::path::PathBuf::from("/etc/blockhost"));
    }
}
