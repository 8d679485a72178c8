// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! Ledger configuration (`/etc/blockhost/db.yaml`).
//!
//! The loader is tolerant of the two spellings deployed configs use:
//! `vmid_range`/`vmid_pool`, and pool bounds given either as bare last-octet
//! integers or as full dotted-quad strings.

use std::fmt::Formatter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_DB_FILE: &str = "/var/lib/blockhost/vms.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default, alias = "vmid_pool")]
    pub vmid_range: Option<VmidRange>,
    #[serde(default)]
    pub ip_pool: IpPool,
    #[serde(default)]
    pub ipv6_pool: Ipv6Pool,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            vmid_range: None,
            ip_pool: IpPool::default(),
            ipv6_pool: Ipv6Pool::default(),
            fields: FieldMap::default(),
            db_file: default_db_file(),
        }
    }
}

impl LedgerConfig {
    pub fn from_yaml_str(s: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(s).context("failed to parse ledger config YAML")?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "failed to read ledger config from {}",
                path.as_ref().display()
            )
        })?;
        Self::from_yaml_str(&contents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmidRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpPool {
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_pool_start", deserialize_with = "deserialize_last_octet")]
    pub start: u32,
    #[serde(default = "default_pool_end", deserialize_with = "deserialize_last_octet")]
    pub end: u32,
    #[serde(default = "default_gateway")]
    pub gateway: Option<String>,
}

impl Default for IpPool {
    fn default() -> Self {
        Self {
            network: default_network(),
            start: default_pool_start(),
            end: default_pool_end(),
            gateway: default_gateway(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Pool {
    #[serde(default = "default_ipv6_start")]
    pub start: u32,
    #[serde(default = "default_ipv6_end")]
    pub end: u32,
}

impl Default for Ipv6Pool {
    fn default() -> Self {
        Self {
            start: default_ipv6_start(),
            end: default_ipv6_end(),
        }
    }
}

/// Mapping from the semantic names of the seven core VM record fields to the
/// keys used on disk. Defaults to the identity mapping; deployments that
/// interop with an external schema can rename individual keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub vm_name: String,
    pub vmid: String,
    pub ip_address: String,
    pub expires_at: String,
    pub owner: String,
    pub status: String,
    pub created_at: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            vm_name: "vm_name".to_string(),
            vmid: "vmid".to_string(),
            ip_address: "ip_address".to_string(),
            expires_at: "expires_at".to_string(),
            owner: "owner".to_string(),
            status: "status".to_string(),
            created_at: "created_at".to_string(),
        }
    }
}

impl FieldMap {
    /// `(semantic, on-disk)` pairs.
    pub(crate) fn pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("vm_name", &self.vm_name),
            ("vmid", &self.vmid),
            ("ip_address", &self.ip_address),
            ("expires_at", &self.expires_at),
            ("owner", &self.owner),
            ("status", &self.status),
            ("created_at", &self.created_at),
        ]
    }

    pub fn is_identity(&self) -> bool {
        self.pairs().iter().all(|(semantic, stored)| semantic == stored)
    }
}

/// The IPv6 prefix delegated by the tunnel broker, recorded next to the rest
/// of the host config. No allocation ⇒ no IPv6 addresses are handed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerAllocation {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub nft_contract: Option<String>,
}

impl BrokerAllocation {
    /// Load the allocation, treating a missing or unreadable file as absent.
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

fn default_db_file() -> PathBuf {
    PathBuf::from(DEFAULT_DB_FILE)
}

fn default_network() -> String {
    "192.168.122.0/24".to_string()
}

fn default_pool_start() -> u32 {
    200
}

fn default_pool_end() -> u32 {
    250
}

fn default_gateway() -> Option<String> {
    Some("192.168.122.1".to_string())
}

fn default_ipv6_start() -> u32 {
    2
}

fn default_ipv6_end() -> u32 {
    254
}

/// Accept a pool bound as a bare integer or as a full IPv4 string, of which
/// only the last octet is kept.
fn deserialize_last_octet<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("an integer or a dotted-quad string")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            let octet = v.rsplit('.').next().unwrap_or(v);
            octet
                .parse::<u32>()
                .map_err(|_| E::custom(format!("invalid pool bound: {v}")))
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LedgerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.ip_pool.network, "192.168.122.0/24");
        assert_eq!(config.ip_pool.start, 200);
        assert_eq!(config.ip_pool.end, 250);
        assert_eq!(config.ipv6_pool.start, 2);
        assert_eq!(config.ipv6_pool.end, 254);
        assert!(config.fields.is_identity());
        assert_eq!(config.db_file, PathBuf::from(DEFAULT_DB_FILE));
        assert!(config.vmid_range.is_none());
    }

    #[test]
    fn vmid_pool_spelling_is_accepted() {
        let config = LedgerConfig::from_yaml_str(
            "vmid_pool:\n  start: 100\n  end: 199\n",
        )
        .unwrap();
        assert_eq!(
            config.vmid_range,
            Some(VmidRange {
                start: 100,
                end: 199
            })
        );
    }

    #[test]
    fn pool_bounds_accept_full_addresses() {
        let config = LedgerConfig::from_yaml_str(
            "ip_pool:\n  network: 10.0.0.0/24\n  start: \"10.0.0.50\"\n  end: 60\n",
        )
        .unwrap();
        assert_eq!(config.ip_pool.start, 50);
        assert_eq!(config.ip_pool.end, 60);
        assert_eq!(config.ip_pool.network, "10.0.0.0/24");
    }

    #[test]
    fn partial_field_map_keeps_identity_elsewhere() {
        let config =
            LedgerConfig::from_yaml_str("fields:\n  status: state\n").unwrap();
        assert!(!config.fields.is_identity());
        assert_eq!(config.fields.status, "state");
        assert_eq!(config.fields.vm_name, "vm_name");
    }

    #[test]
    fn broker_allocation_is_optional() {
        assert!(BrokerAllocation::load("/no/such/file.json").is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker-allocation.json");
        std::fs::write(&path, r#"{"prefix": "2a01:db8::/64"}"#).unwrap();
        let alloc = BrokerAllocation::load(&path).unwrap();
        assert_eq!(alloc.prefix.as_deref(), Some("2a01:db8::/64"));
        assert!(alloc.nft_contract.is_none());
    }
}
