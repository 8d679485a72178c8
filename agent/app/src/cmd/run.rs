// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use blockhost_actions::{ActionEnv, ActionRegistry};
use blockhost_agent::server::Server;
use blockhost_agent_settings::Settings;

use crate::cmd;
use crate::options::RunArgs;

/// The agent refuses to start without root: every action it brokers needs it.
#[derive(Debug, thiserror::Error)]
#[error("the root agent must run as root")]
pub struct NotRoot;

cmd! {
  RunArgs(self, settings) {
    run(settings).await
  }
}

/// Run the root agent daemon.
async fn run(settings: Settings) -> anyhow::Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(NotRoot.into());
    }

    let env = ActionEnv {
        config_dir: settings.config_dir.clone(),
        state_dir: settings.state_dir.clone(),
        service_group: settings.service_group.clone(),
        exec_timeout: settings.exec.timeout,
        long_exec_timeout: settings.exec.long_timeout,
    };
    let registry = ActionRegistry::load(env);
    tracing::info!(count = registry.len(), "loaded total actions");

    let server = Server::new(registry, settings.read_timeout);
    server
        .listen(&settings.socket_path(), &settings.service_group)
        .await
}
