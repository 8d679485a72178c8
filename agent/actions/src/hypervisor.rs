// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! VM lifecycle actions on the hypervisor CLI (`qm`).

use std::sync::Arc;

use async_trait::async_trait;
use blockhost_api::{Params, Response};

use crate::params::{get_int, require_map, require_str, scalar_to_arg};
use crate::validate::{
    validate_image_path, validate_qm_option, validate_storage, validate_vm_name, validate_vmid,
    ValidationError,
};
use crate::{exec, subprocess_response, ActionEnv, ActionHandler};

pub(crate) fn actions(env: &Arc<ActionEnv>) -> Vec<(&'static str, Arc<dyn ActionHandler>)> {
    vec![
        ("qm-start", lifecycle(env, "start")),
        ("qm-stop", lifecycle(env, "stop")),
        ("qm-shutdown", lifecycle(env, "shutdown")),
        ("qm-destroy", lifecycle(env, "destroy")),
        ("qm-create", Arc::new(QmCreate { env: env.clone() })),
        ("qm-importdisk", Arc::new(QmImportDisk { env: env.clone() })),
        ("qm-set", Arc::new(QmSet { env: env.clone() })),
        ("qm-template", lifecycle(env, "template")),
    ]
}

fn lifecycle(env: &Arc<ActionEnv>, verb: &'static str) -> Arc<dyn ActionHandler> {
    Arc::new(QmLifecycle {
        env: env.clone(),
        verb,
    })
}

/// `qm <verb> <vmid>` for the plain lifecycle verbs.
struct QmLifecycle {
    env: Arc<ActionEnv>,
    verb: &'static str,
}

#[async_trait]
impl ActionHandler for QmLifecycle {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let vmid = validate_vmid(get_int(params, "vmid"))?;
        let args = vec![self.verb.to_string(), vmid.to_string()];
        let out = exec::run("qm", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

struct QmCreate {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for QmCreate {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let vmid = validate_vmid(get_int(params, "vmid"))?;
        let name = validate_vm_name(require_str(params, "name")?)?;

        let mut args = vec![
            "create".to_string(),
            vmid.to_string(),
            "--name".to_string(),
            name.to_string(),
        ];

        // Extra options ride as a flat `[--key, value, ...]` list; every key
        // must be on the allow-list, values are pass-through.
        if let Some(extra) = params.get("args") {
            let items = extra
                .as_array()
                .ok_or(ValidationError::NotAList("args"))?;
            for pair in items.chunks(2) {
                let [flag, value] = pair else {
                    return Err(ValidationError::ArgPairs.into());
                };
                let flag = flag.as_str().ok_or(ValidationError::ArgPairs)?;
                let key = flag
                    .strip_prefix("--")
                    .ok_or_else(|| ValidationError::QmOption(flag.to_string()))?;
                validate_qm_option(key)?;
                let value = scalar_to_arg(value)
                    .ok_or_else(|| ValidationError::OptionValue(key.to_string()))?;
                args.push(flag.to_string());
                args.push(value);
            }
        }

        let out = exec::run("qm", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

struct QmSet {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for QmSet {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let vmid = validate_vmid(get_int(params, "vmid"))?;
        let options = require_map(params, "options")?;

        let mut args = vec!["set".to_string(), vmid.to_string()];
        for (key, value) in options {
            validate_qm_option(key)?;
            let value = scalar_to_arg(value)
                .ok_or_else(|| ValidationError::OptionValue(key.to_string()))?;
            args.push(format!("--{key}"));
            args.push(value);
        }

        let out = exec::run("qm", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

/// Imports a disk image into a storage; can take minutes on large images.
struct QmImportDisk {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for QmImportDisk {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let vmid = validate_vmid(get_int(params, "vmid"))?;
        let disk_path =
            validate_image_path("disk_path", require_str(params, "disk_path")?, &self.env.state_dir)?;
        let storage = validate_storage(require_str(params, "storage")?)?;

        let args = vec![
            "importdisk".to_string(),
            vmid.to_string(),
            disk_path.display().to_string(),
            storage.to_string(),
        ];
        let out = exec::run("qm", &args, self.env.long_exec_timeout).await?;
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
    async fn lifecycle_rejects_bad_vmid() {
        for action in ["qm-start", "qm-stop", "qm-shutdown", "qm-destroy", "qm-template"] {
            let err = handler(action)
                .handle(&params(json!({"vmid": 50})))
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "vmid must be int 100-999999");
        }
    }

    #[tokio::test]
    async fn set_rejects_disallowed_option() {
        let err = handler("qm-set")
            .handle(&params(
                json!({"vmid": 150, "options": {"memory": "2048", "foo": "bar"}}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Disallowed option: foo");
    }

    #[tokio::test]
    async fn set_requires_an_options_map() {
        let err = handler("qm-set")
            .handle(&params(json!({"vmid": 150, "options": [1, 2]})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "options must be a map");
    }

    #[tokio::test]
    async fn create_rejects_bad_name() {
        let err = handler("qm-create")
            .handle(&params(json!({"vmid": 150, "name": "Bad_Name"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid VM name: Bad_Name");
    }

    #[tokio::test]
    async fn create_filters_arg_keys() {
        let err = handler("qm-create")
            .handle(&params(
                json!({"vmid": 150, "name": "web-1", "args": ["--hookscript", "x"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Disallowed option: hookscript");

        let err = handler("qm-create")
            .handle(&params(
                json!({"vmid": 150, "name": "web-1", "args": ["--memory"]}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "args must alternate --option and value");
    }

    #[tokio::test]
    async fn importdisk_checks_path_prefix() {
        let err = handler("qm-importdisk")
            .handle(&params(
                json!({"vmid": 150, "disk_path": "/etc/shadow", "storage": "local-lvm"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "disk_path must be under /var/lib/blockhost/ or /tmp/"
        );
    }
}
