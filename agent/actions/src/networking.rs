// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Networking actions: IPv6 host routes and bridge port isolation.

use std::sync::Arc;

use async_trait::async_trait;
use blockhost_api::{Params, Response};

use crate::params::require_str;
use crate::validate::{validate_dev, validate_ipv6_128};
use crate::{exec, subprocess_response, ActionEnv, ActionHandler};

pub(crate) fn actions(env: &Arc<ActionEnv>) -> Vec<(&'static str, Arc<dyn ActionHandler>)> {
    vec![
        (
            "ip6-route-add",
            Arc::new(Ip6Route {
                env: env.clone(),
                // `replace` collapses duplicates, making the action idempotent.
                verb: "replace",
            }),
        ),
        (
            "ip6-route-del",
            Arc::new(Ip6Route {
                env: env.clone(),
                verb: "del",
            }),
        ),
        (
            "bridge-port-isolate",
            Arc::new(BridgePortIsolate { env: env.clone() }),
        ),
    ]
}

/// `ip -6 route <verb> <addr>/128 dev <dev>`.
struct Ip6Route {
    env: Arc<ActionEnv>,
    verb: &'static str,
}

#[async_trait]
impl ActionHandler for Ip6Route {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let address = validate_ipv6_128(require_str(params, "address")?)?;
        let dev = validate_dev(require_str(params, "dev")?)?;

        let args = vec![
            "-6".to_string(),
            "route".to_string(),
            self.verb.to_string(),
            address.to_string(),
            "dev".to_string(),
            dev.to_string(),
        ];
        let out = exec::run("ip", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

/// Isolated bridge ports cannot exchange frames with each other, only with
/// non-isolated ports (the host uplink). Requires kernel 5.2+.
struct BridgePortIsolate {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for BridgePortIsolate {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let dev = validate_dev(require_str(params, "dev")?)?;

        let args = vec![
            "link".to_string(),
            "set".to_string(),
            "dev".to_string(),
            dev.to_string(),
            "isolated".to_string(),
            "on".to_string(),
        ];
        let out = exec::run("bridge", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn handler(name: &str) -> Arc<dyn ActionHandler> {
        let env = Arc::new(ActionEnv::default());
        actions(&env)
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, h)| h)
            .unwrap()
    }

    #[tokio::test]
    async fn route_add_rejects_unlisted_device() {
        let err = handler("ip6-route-add")
            .handle(&params(json!({"address": "2a01:db8::1/128", "dev": "eth0"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Device not allowed: eth0");
    }

    #[tokio::test]
    async fn route_del_rejects_non_host_route() {
        let err = handler("ip6-route-del")
            .handle(&params(json!({"address": "2a01:db8::/64", "dev": "vmbr0"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid IPv6/128: 2a01:db8::/64");
    }

    #[tokio::test]
    async fn isolate_requires_a_device() {
        let err = handler("bridge-port-isolate")
            .handle(&params(json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "dev must be a string");
    }
}
