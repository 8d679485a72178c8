// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! System actions: firewall rules, disk image customization, wallet
//! generation, address-book persistence and broker renewal.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use blockhost_api::{AddressBookEntry, Params, Response};
use serde_json::Value;

use crate::params::{get_int, require_str, scalar_to_arg, str_or};
use crate::validate::{
    is_valid_address, validate_comment, validate_entry_name, validate_image_path, validate_port,
    validate_proto, validate_virt_op, validate_wallet_name, ValidationError,
};
use crate::{exec, fsutil, subprocess_response, ActionEnv, ActionHandler};

const ADDRESSBOOK_FILE: &str = "addressbook.json";
const WALLET_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn actions(env: &Arc<ActionEnv>) -> Vec<(&'static str, Arc<dyn ActionHandler>)> {
    vec![
        (
            "iptables-open",
            Arc::new(IptablesRule {
                env: env.clone(),
                flag: "-A",
            }),
        ),
        (
            "iptables-close",
            Arc::new(IptablesRule {
                env: env.clone(),
                flag: "-D",
            }),
        ),
        ("virt-customize", Arc::new(VirtCustomize { env: env.clone() })),
        ("generate-wallet", Arc::new(GenerateWallet { env: env.clone() })),
        (
            "addressbook-save",
            Arc::new(AddressbookSave { env: env.clone() }),
        ),
        ("broker-renew", Arc::new(BrokerRenew { env: env.clone() })),
    ]
}

/// Append (`-A`) or delete (`-D`) a single `INPUT ACCEPT` rule for
/// `(proto, dport, comment)`.
struct IptablesRule {
    env: Arc<ActionEnv>,
    flag: &'static str,
}

#[async_trait]
impl ActionHandler for IptablesRule {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let port = validate_port(get_int(params, "port"))?;
        let proto = validate_proto(str_or(params, "proto", "tcp")?)?;
        let comment = validate_comment(str_or(params, "comment", "")?)?;

        let args = vec![
            self.flag.to_string(),
            "INPUT".to_string(),
            "-p".to_string(),
            proto.to_string(),
            "--dport".to_string(),
            port.to_string(),
            "-j".to_string(),
            "ACCEPT".to_string(),
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            comment.to_string(),
        ];
        let out = exec::run("iptables", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

struct VirtCustomize {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for VirtCustomize {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let image = validate_image_path(
            "image_path",
            str_or(params, "image_path", "")?,
            &self.env.state_dir,
        )?;

        let commands = match params.get("commands") {
            Some(Value::Array(commands)) if !commands.is_empty() => commands,
            _ => return Err(ValidationError::CommandsEmpty.into()),
        };

        let mut args = vec!["-a".to_string(), image.display().to_string()];
        for entry in commands {
            let sub = entry
                .as_array()
                .filter(|sub| sub.len() >= 2)
                .ok_or_else(|| ValidationError::SubCommandShape(entry.to_string()))?;
            let op = sub[0]
                .as_str()
                .ok_or_else(|| ValidationError::SubCommandShape(entry.to_string()))?;
            validate_virt_op(op)?;
            for item in sub {
                args.push(
                    scalar_to_arg(item)
                        .ok_or_else(|| ValidationError::SubCommandShape(entry.to_string()))?,
                );
            }
        }

        let out = exec::run("virt-customize", &args, self.env.long_exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

/// Invokes the wallet CLI, stores the private key under the config dir with
/// strict permissions, and records the address in the address book. Only the
/// address ever leaves the daemon.
struct GenerateWallet {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for GenerateWallet {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let name = validate_wallet_name(require_str(params, "name")?)?;

        let keyfile = self.env.config_dir.join(format!("{name}.key"));
        if keyfile.exists() {
            return Ok(Response::error(format!(
                "Key file already exists: {}",
                keyfile.display()
            )));
        }

        let args = vec!["wallet".to_string(), "new".to_string()];
        let out = exec::run("cast", &args, WALLET_TIMEOUT).await?;
        if !out.success() {
            return Ok(Response::error(format!(
                "cast wallet new failed: {}",
                out.stderr
            )));
        }

        // The key never goes into the error path or any log line.
        let (address, private_key) = parse_wallet_output(&out.stdout)
            .ok_or_else(|| anyhow!("Failed to parse cast wallet output"))?;
        let raw_key = private_key.strip_prefix("0x").unwrap_or(&private_key);

        std::fs::create_dir_all(&self.env.config_dir)
            .with_context(|| format!("cannot create {}", self.env.config_dir.display()))?;
        write_key_file(&keyfile, raw_key)?;
        fsutil::restrict_to_group(&keyfile, &self.env.service_group, 0o640)?;

        let mut book = read_addressbook(&self.env);
        book.insert(
            name.to_string(),
            serde_json::to_value(AddressBookEntry {
                address: address.clone(),
                keyfile: Some(keyfile.display().to_string()),
            })?,
        );
        write_addressbook(&self.env, &Value::Object(book))?;

        tracing::info!(wallet = name, address = %address, "generated wallet");
        Ok(Response::with_address(address))
    }
}

struct AddressbookSave {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for AddressbookSave {
    async fn handle(&self, params: &Params) -> anyhow::Result<Response> {
        let entries = match params.get("entries") {
            Some(Value::Object(entries)) => entries,
            _ => return Err(ValidationError::NotAMap("entries").into()),
        };

        for (name, entry) in entries {
            validate_entry_name(name)?;
            let entry = entry
                .as_object()
                .ok_or_else(|| ValidationError::EntryShape(name.clone()))?;
            let address = entry.get("address").and_then(Value::as_str).unwrap_or("");
            if !is_valid_address(address) {
                return Err(ValidationError::AddressFor {
                    name: name.clone(),
                    address: address.to_string(),
                }
                .into());
            }
            if let Some(keyfile) = entry.get("keyfile").and_then(Value::as_str) {
                let prefix = format!("{}/", self.env.config_dir.display());
                if !keyfile.is_empty() && !keyfile.starts_with(&prefix) {
                    return Err(ValidationError::KeyfilePrefix {
                        name: name.clone(),
                        dir: self.env.config_dir.display().to_string(),
                    }
                    .into());
                }
            }
        }

        write_addressbook(&self.env, &Value::Object(entries.clone()))?;
        tracing::info!(entries = entries.len(), "saved addressbook");
        Ok(Response::ok())
    }
}

/// Renew the IPv6 tunnel-broker lease recorded in the existing allocation.
struct BrokerRenew {
    env: Arc<ActionEnv>,
}

#[async_trait]
impl ActionHandler for BrokerRenew {
    async fn handle(&self, _params: &Params) -> anyhow::Result<Response> {
        let alloc_file = self.env.config_dir.join("broker-allocation.json");
        let raw = match std::fs::read_to_string(&alloc_file) {
            Ok(raw) => raw,
            Err(_) => return Ok(Response::error("no existing broker allocation found")),
        };
        let alloc: Value = match serde_json::from_str(&raw) {
            Ok(alloc) => alloc,
            Err(e) => {
                return Ok(Response::error(format!(
                    "failed to read broker allocation: {e}"
                )))
            }
        };
        let nft_contract = alloc
            .get("nft_contract")
            .and_then(Value::as_str)
            .unwrap_or("");
        if nft_contract.is_empty() {
            return Ok(Response::error("no existing broker allocation found"));
        }

        let wallet_key = self.env.config_dir.join("deployer.key");
        let args = vec![
            "renew".to_string(),
            "--nft-contract".to_string(),
            nft_contract.to_string(),
            "--wallet-key".to_string(),
            wallet_key.display().to_string(),
            "--configure-wg".to_string(),
        ];
        let out = exec::run("broker-client", &args, self.env.exec_timeout).await?;
        Ok(subprocess_response(out))
    }
}

/// Pull the `Address:` and `Private key:` lines out of `cast wallet new`.
fn parse_wallet_output(stdout: &str) -> Option<(String, String)> {
    let mut address = None;
    let mut private_key = None;
    for line in stdout.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Address:") {
            address = Some(rest.trim().to_string());
        } else if line.to_lowercase().starts_with("private key:") {
            private_key = line.splitn(2, ':').nth(1).map(|s| s.trim().to_string());
        }
    }
    Some((address?, private_key?))
}

/// Key material is created `0600` and only widened to the service group
/// after the content is on disk.
fn write_key_file(path: &Path, key: &str) -> anyhow::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("cannot create key file {}", path.display()))?;
    file.write_all(key.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn addressbook_path(env: &ActionEnv) -> PathBuf {
    env.config_dir.join(ADDRESSBOOK_FILE)
}

/// Current address book, treating a missing or unreadable file as empty.
fn read_addressbook(env: &ActionEnv) -> serde_json::Map<String, Value> {
    std::fs::read_to_string(addressbook_path(env))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Atomically replace the address book: temp file, fsync, rename-over, then
/// tighten ownership and mode.
fn write_addressbook(env: &ActionEnv, book: &Value) -> anyhow::Result<()> {
    std::fs::create_dir_all(&env.config_dir)
        .with_context(|| format!("cannot create {}", env.config_dir.display()))?;
    let path = addressbook_path(env);

    let mut tmp = tempfile::NamedTempFile::new_in(&env.config_dir)
        .context("cannot create addressbook temp file")?;
    serde_json::to_writer_pretty(&mut tmp, book)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path)
        .with_context(|| format!("cannot replace {}", path.display()))?;

    fsutil::restrict_to_group(&path, &env.service_group, 0o640)?;
    Ok(())
}
