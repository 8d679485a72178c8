// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! Transactional ledger of VM records, IP/IPv6 pools and NFT token
//! reservations.
//!
//! Business logic lives in [`VmLedger`]; storage and locking are behind the
//! [`Backend`] trait with two implementations: [`persistent::FileBackend`]
//! (advisory sidecar lock, temp-and-rename writes) for production and
//! [`memory::MemoryBackend`] for tests. Every mutation is a single
//! read-modify-write transaction; a mutator error leaves the stored
//! document untouched.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Duration, Utc};

pub mod config;
pub mod document;
pub mod memory;
pub mod persistent;

pub use config::{BrokerAllocation, FieldMap, IpPool, Ipv6Pool, LedgerConfig, VmidRange};
pub use document::{Document, TokenRecord, TokenStatus, VmRecord, VmStatus};
pub use memory::MemoryBackend;
pub use persistent::FileBackend;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("VM '{0}' already exists")]
    VmExists(String),
    #[error("VM '{0}' not found")]
    VmNotFound(String),
    #[error("vmid_range not configured; set vmid_range.start and vmid_range.end, or let the provisioner configure it")]
    VmidRangeNotConfigured,
    #[error("VMID range exhausted")]
    VmidRangeExhausted,
    #[error("invalid pool network: {0}")]
    InvalidNetwork(String),
    #[error("NFT token {token_id} already reserved (status: {status})")]
    TokenReserved {
        token_id: i64,
        status: TokenStatus,
    },
    #[error("NFT token {0} not found")]
    TokenNotFound(i64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("ledger codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Storage behind the ledger: a point-in-time read, and a transactional
/// read-modify-write. When the mutator fails, nothing may be written.
pub trait Backend {
    fn read(&self) -> LedgerResult<Document>;

    fn update<T, F>(&self, mutate: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Document) -> LedgerResult<T>;
}

/// Parameters for [`VmLedger::register_vm`].
#[derive(Debug, Clone)]
pub struct NewVm {
    pub name: String,
    pub vmid: u32,
    pub ip: String,
    pub ipv6: Option<String>,
    pub owner: String,
    pub expiry_days: i64,
    pub purpose: String,
    pub wallet_address: Option<String>,
}

impl NewVm {
    pub fn new(name: impl Into<String>, vmid: u32, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vmid,
            ip: ip.into(),
            ipv6: None,
            owner: String::new(),
            expiry_days: 30,
            purpose: String::new(),
            wallet_address: None,
        }
    }
}

pub struct VmLedger<B> {
    backend: B,
    ip_pool: IpPool,
    ipv6_pool: Ipv6Pool,
    vmid_range: Option<VmidRange>,
    ipv6_prefix: Option<String>,
}

impl VmLedger<FileBackend> {
    /// Open (seeding on first use) the production, file-backed ledger.
    pub fn open(config: LedgerConfig, ipv6_prefix: Option<String>) -> LedgerResult<Self> {
        let backend = FileBackend::open(&config)?;
        Ok(Self::with_backend(backend, config, ipv6_prefix))
    }
}

impl VmLedger<MemoryBackend> {
    /// An in-memory ledger for tests; no locking, nothing touches disk.
    pub fn in_memory(config: LedgerConfig, ipv6_prefix: Option<String>) -> Self {
        let seed = Document::seed(config.vmid_range.map_or(0, |r| r.start));
        Self::with_backend(MemoryBackend::new(seed), config, ipv6_prefix)
    }
}

impl<B: Backend> VmLedger<B> {
    pub fn with_backend(backend: B, config: LedgerConfig, ipv6_prefix: Option<String>) -> Self {
        Self {
            backend,
            ip_pool: config.ip_pool,
            ipv6_pool: config.ipv6_pool,
            vmid_range: config.vmid_range,
            ipv6_prefix,
        }
    }

    pub fn get_vm(&self, name: &str) -> LedgerResult<Option<VmRecord>> {
        Ok(self.backend.read()?.vms.get(name).cloned())
    }

    pub fn list_vms(&self, status: Option<VmStatus>) -> LedgerResult<Vec<VmRecord>> {
        let doc = self.backend.read()?;
        Ok(doc
            .vms
            .into_values()
            .filter(|vm| status.map_or(true, |s| vm.status == s))
            .collect())
    }

    pub fn register_vm(&self, new: NewVm) -> LedgerResult<VmRecord> {
        self.backend.update(|doc| {
            if doc.vms.contains_key(&new.name) {
                return Err(LedgerError::VmExists(new.name.clone()));
            }

            let now = Utc::now();
            let record = VmRecord {
                vm_name: new.name.clone(),
                vmid: new.vmid,
                ip_address: new.ip.clone(),
                ipv6_address: new.ipv6.clone(),
                expires_at: now + Duration::days(new.expiry_days),
                owner: new.owner.clone(),
                status: VmStatus::Active,
                created_at: now,
                purpose: new.purpose.clone(),
                wallet_address: new.wallet_address.clone(),
                suspended_at: None,
                destroyed_at: None,
            };

            if !doc.allocated_ips.contains(&new.ip) {
                doc.allocated_ips.push(new.ip.clone());
            }
            if let Some(ipv6) = &new.ipv6 {
                if !doc.allocated_ipv6.contains(ipv6) {
                    doc.allocated_ipv6.push(ipv6.clone());
                }
            }
            if new.vmid >= doc.next_vmid {
                doc.next_vmid = new.vmid + 1;
            }

            doc.vms.insert(new.name.clone(), record.clone());
            Ok(record)
        })
    }

    /// Phase 1 of garbage collection.
    pub fn mark_suspended(&self, name: &str) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let vm = doc
                .vms
                .get_mut(name)
                .ok_or_else(|| LedgerError::VmNotFound(name.to_string()))?;
            vm.status = VmStatus::Suspended;
            vm.suspended_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Reactivate a suspended VM, optionally with a fresh expiry.
    pub fn mark_active(&self, name: &str, new_expiry: Option<DateTime<Utc>>) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let vm = doc
                .vms
                .get_mut(name)
                .ok_or_else(|| LedgerError::VmNotFound(name.to_string()))?;
            vm.status = VmStatus::Active;
            vm.suspended_at = None;
            if let Some(expiry) = new_expiry {
                vm.expires_at = expiry;
            }
            Ok(())
        })
    }

    /// Phase 2 of garbage collection; releases the VM's addresses. The
    /// record itself stays behind as a tombstone.
    pub fn mark_destroyed(&self, name: &str) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let vm = doc
                .vms
                .get_mut(name)
                .ok_or_else(|| LedgerError::VmNotFound(name.to_string()))?;
            vm.status = VmStatus::Destroyed;
            vm.destroyed_at = Some(Utc::now());

            let ip = vm.ip_address.clone();
            let ipv6 = vm.ipv6_address.clone();
            doc.allocated_ips.retain(|a| *a != ip);
            if let Some(ipv6) = ipv6 {
                doc.allocated_ipv6.retain(|a| *a != ipv6);
            }
            Ok(())
        })
    }

    pub fn extend_expiry(&self, name: &str, days: i64) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let vm = doc
                .vms
                .get_mut(name)
                .ok_or_else(|| LedgerError::VmNotFound(name.to_string()))?;
            vm.expires_at = vm.expires_at + Duration::days(days);
            Ok(())
        })
    }

    /// Active VMs whose expiry (plus grace) has passed. Legacy one-phase API.
    pub fn get_expired_vms(&self, grace_days: i64) -> LedgerResult<Vec<VmRecord>> {
        let now = Utc::now();
        let doc = self.backend.read()?;
        Ok(doc
            .vms
            .into_values()
            .filter(|vm| {
                vm.status == VmStatus::Active
                    && now > vm.expires_at + Duration::days(grace_days)
            })
            .collect())
    }

    /// Active VMs past their expiry, ready for suspension.
    pub fn get_vms_to_suspend(&self) -> LedgerResult<Vec<VmRecord>> {
        let now = Utc::now();
        let doc = self.backend.read()?;
        Ok(doc
            .vms
            .into_values()
            .filter(|vm| vm.status == VmStatus::Active && now > vm.expires_at)
            .collect())
    }

    /// Suspended VMs past the grace period, ready for destruction.
    pub fn get_vms_to_destroy(&self, grace_days: i64) -> LedgerResult<Vec<VmRecord>> {
        let now = Utc::now();
        let doc = self.backend.read()?;
        Ok(doc
            .vms
            .into_values()
            .filter(|vm| {
                vm.status == VmStatus::Suspended
                    && vm
                        .suspended_at
                        .map_or(false, |s| now > s + Duration::days(grace_days))
            })
            .collect())
    }

    /// First free address in the configured pool, or `None` on exhaustion.
    pub fn allocate_ip(&self) -> LedgerResult<Option<String>> {
        let pool = self.ip_pool.clone();
        self.backend.update(move |doc| {
            let prefix = ipv4_prefix(&pool.network)?;
            for i in pool.start..=pool.end {
                let ip = format!("{prefix}.{i}");
                if !doc.allocated_ips.contains(&ip) {
                    doc.allocated_ips.push(ip.clone());
                    return Ok(Some(ip));
                }
            }
            Ok(None)
        })
    }

    /// First free address under the broker-delegated prefix, or `None` when
    /// the pool is exhausted or no prefix is configured.
    pub fn allocate_ipv6(&self) -> LedgerResult<Option<String>> {
        let Some(prefix) = self.ipv6_prefix.clone() else {
            return Ok(None);
        };
        let pool = self.ipv6_pool;
        self.backend.update(move |doc| {
            let base = ipv6_network_base(&prefix)?;
            for i in pool.start..=pool.end {
                let ipv6 = Ipv6Addr::from(base + i as u128).to_string();
                if !doc.allocated_ipv6.contains(&ipv6) {
                    doc.allocated_ipv6.push(ipv6.clone());
                    return Ok(Some(ipv6));
                }
            }
            Ok(None)
        })
    }

    pub fn release_ip(&self, ip: &str) -> LedgerResult<()> {
        self.backend.update(|doc| {
            doc.allocated_ips.retain(|a| a != ip);
            Ok(())
        })
    }

    pub fn release_ipv6(&self, ipv6: &str) -> LedgerResult<()> {
        self.backend.update(|doc| {
            doc.allocated_ipv6.retain(|a| a != ipv6);
            Ok(())
        })
    }

    pub fn allocate_vmid(&self) -> LedgerResult<u32> {
        let range = self.vmid_range.ok_or(LedgerError::VmidRangeNotConfigured)?;
        self.backend.update(move |doc| {
            let vmid = doc.next_vmid;
            if vmid > range.end {
                return Err(LedgerError::VmidRangeExhausted);
            }
            doc.next_vmid = vmid + 1;
            Ok(vmid)
        })
    }

    /// Reserve a token id for a VM. With an explicit id the reservation
    /// fails unless the id is unknown or previously `failed`; without one,
    /// the next sequential id is taken.
    pub fn reserve_nft_token_id(
        &self,
        vm_name: &str,
        token_id: Option<i64>,
    ) -> LedgerResult<i64> {
        let vm_name = vm_name.to_string();
        self.backend.update(move |doc| {
            let tid = token_id.unwrap_or_else(|| {
                doc.reserved_nft_tokens
                    .keys()
                    .filter_map(|k| k.parse::<i64>().ok())
                    .max()
                    .map_or(0, |m| m + 1)
            });

            let key = tid.to_string();
            if let Some(existing) = doc.reserved_nft_tokens.get(&key) {
                if existing.status != TokenStatus::Failed {
                    return Err(LedgerError::TokenReserved {
                        token_id: tid,
                        status: existing.status,
                    });
                }
            }

            doc.reserved_nft_tokens.insert(
                key,
                TokenRecord {
                    vm_name: vm_name.clone(),
                    status: TokenStatus::Reserved,
                    reserved_at: Utc::now(),
                    minted_at: None,
                    failed_at: None,
                    owner_wallet: None,
                },
            );
            Ok(tid)
        })
    }

    pub fn mark_nft_minted(&self, token_id: i64, owner_wallet: &str) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let token = doc
                .reserved_nft_tokens
                .get_mut(&token_id.to_string())
                .ok_or(LedgerError::TokenNotFound(token_id))?;
            token.status = TokenStatus::Minted;
            token.owner_wallet = Some(owner_wallet.to_string());
            token.minted_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn mark_nft_failed(&self, token_id: i64) -> LedgerResult<()> {
        self.backend.update(|doc| {
            let token = doc
                .reserved_nft_tokens
                .get_mut(&token_id.to_string())
                .ok_or(LedgerError::TokenNotFound(token_id))?;
            token.status = TokenStatus::Failed;
            token.failed_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn get_nft_token(&self, token_id: i64) -> LedgerResult<Option<TokenRecord>> {
        Ok(self
            .backend
            .read()?
            .reserved_nft_tokens
            .get(&token_id.to_string())
            .cloned())
    }
}

/// First three octets of the pool's `/24`, e.g. `"192.168.122"`.
fn ipv4_prefix(network: &str) -> LedgerResult<String> {
    let addr = network.split('/').next().unwrap_or(network);
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| LedgerError::InvalidNetwork(network.to_string()))?;
    let [a, b, c, _] = addr.octets();
    Ok(format!("{a}.{b}.{c}"))
}

/// Numeric network address of an IPv6 prefix like `"2a01:db8::/64"`.
fn ipv6_network_base(prefix: &str) -> LedgerResult<u128> {
    let invalid = || LedgerError::InvalidNetwork(prefix.to_string());
    let (addr, plen) = match prefix.split_once('/') {
        Some((addr, plen)) => (addr, plen.parse::<u32>().map_err(|_| invalid())?),
        None => (prefix, 128),
    };
    if plen > 128 {
        return Err(invalid());
    }
    let addr: Ipv6Addr = addr.parse().map_err(|_| invalid())?;
    let mask = if plen == 0 {
        0
    } else {
        u128::MAX << (128 - plen)
    };
    Ok(u128::from(addr) & mask)
}
