// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! The on-disk document model of the ledger.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// VM lifecycle. `active → suspended → destroyed`, `active → destroyed`,
/// and `suspended → active` (reactivation); `destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Active,
    Suspended,
    Destroyed,
}

impl Display for VmStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmStatus::Active => "active",
            VmStatus::Suspended => "suspended",
            VmStatus::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

/// Token lifecycle. `reserved → minted`, `reserved → failed`; a `failed` id
/// may be re-reserved, which is the sole legal overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Reserved,
    Minted,
    Failed,
}

impl Display for TokenStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenStatus::Reserved => "reserved",
            TokenStatus::Minted => "minted",
            TokenStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub vm_name: String,
    pub vmid: u32,
    pub ip_address: String,
    pub ipv6_address: Option<String>,
    #[serde(with = "timestamp")]
    pub expires_at: DateTime<Utc>,
    pub owner: String,
    pub status: VmStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_opt")]
    pub suspended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_opt")]
    pub destroyed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub vm_name: String,
    pub status: TokenStatus,
    #[serde(with = "timestamp")]
    pub reserved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_opt")]
    pub minted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "timestamp_opt")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_wallet: Option<String>,
}

/// The whole ledger file. NFT tokens are keyed by the textualized token id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub vms: BTreeMap<String, VmRecord>,
    #[serde(default)]
    pub next_vmid: u32,
    #[serde(default)]
    pub allocated_ips: Vec<String>,
    #[serde(default)]
    pub allocated_ipv6: Vec<String>,
    #[serde(default)]
    pub reserved_nft_tokens: BTreeMap<String, TokenRecord>,
}

impl Document {
    /// The content a fresh ledger file is seeded with.
    pub fn seed(next_vmid: u32) -> Self {
        Self {
            next_vmid,
            ..Default::default()
        }
    }
}

/// RFC 3339 with an explicit `+00:00` offset on output; `Z` accepted on
/// input for interop with older writers.
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

pub(crate) mod timestamp_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        ts: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => super::timestamp::serialize(ts, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> VmRecord {
        VmRecord {
            vm_name: "web-1".to_string(),
            vmid: 150,
            ip_address: "192.168.122.200".to_string(),
            ipv6_address: None,
            expires_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            owner: "alice".to_string(),
            status: VmStatus::Active,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            purpose: String::new(),
            wallet_address: None,
            suspended_at: None,
            destroyed_at: None,
        }
    }

    #[test]
    fn timestamps_carry_explicit_offset() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["created_at"], "2026-01-01T00:00:00+00:00");
        // Absent transition timestamps are omitted entirely.
        assert!(json.get("suspended_at").is_none());
    }

    #[test]
    fn zulu_timestamps_are_accepted() {
        let mut json = serde_json::to_value(record()).unwrap();
        json["created_at"] = "2026-01-01T00:00:00Z".into();
        let parsed: VmRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.created_at, record().created_at);
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&VmStatus::Suspended).unwrap(),
            r#""suspended""#
        );
        assert_eq!(TokenStatus::Minted.to_string(), "minted");
    }

    #[test]
    fn empty_document_deserializes() {
        let doc: Document = serde_json::from_str("{}").unwrap();
        assert_eq!(doc, Document::default());
    }
}
