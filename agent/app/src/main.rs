// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use blockhost_agent::AgentExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, Layer};

mod cmd;
mod options;

fn init_tracing(opts: &options::Options) -> Option<WorkerGuard> {
    let console_filter = opts.log_filter().expect("invalid filter");

    // Log all traces to stderr, reserving stdout for actual command output.
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    // Add a JSON file layer if a log dir is set.
    let (file_layer, file_guard) = match &opts.log_dir {
        Some(log_dir) => {
            let appender = RollingFileAppender::builder()
                .filename_prefix("blockhost-agent")
                .filename_suffix("log")
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .build(log_dir)
                .expect("failed to initialize rolling file appender");

            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

            let file_filter = opts.log_filter().expect("invalid filter");
            let file_layer = fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(false)
                .with_filter(file_filter);

            (Some(file_layer), Some(file_guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(registry).expect("Unable to set a global collector");

    file_guard
}

#[tokio::main]
async fn main() {
    let opts = options::parse();

    let _guard = init_tracing(&opts);

    if let Err(e) = cmd::exec(&opts).await {
        tracing::error!("failed to execute {:?}: {e:?}", opts);
        let code = if e.is::<cmd::run::NotRoot>() {
            AgentExitCode::NotRoot
        } else {
            AgentExitCode::Fatal
        };
        std::process::exit(code as i32);
    }
}
