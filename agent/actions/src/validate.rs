// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Structural validators for every field a handler consumes.
//!
//! These are the security boundary of the agent: no value received over the
//! socket may reach a subprocess argv without passing through one of them.
//! They are pure, never log, and never embed secret material in errors.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

pub const VMID_MIN: i64 = 100;
pub const VMID_MAX: i64 = 999_999;

/// Interfaces a host route may be bound to, besides per-VM tap devices.
pub const ALLOWED_ROUTE_DEVS: &[&str] = &["vmbr0", "virbr0", "br0", "br-ext", "docker0"];

/// Wallet names reserved for the platform itself.
pub const WALLET_DENY_NAMES: &[&str] = &["admin", "server", "dev", "broker"];

/// Operators `virt-customize` sub-commands may start with.
pub const VIRT_CUSTOMIZE_ALLOWED_OPS: &[&str] = &[
    "--install",
    "--run-command",
    "--copy-in",
    "--upload",
    "--chmod",
    "--mkdir",
    "--write",
    "--append-line",
    "--firstboot-command",
    "--run",
    "--delete",
];

/// Option keys (without the `--`) accepted by `qm create` / `qm set`.
pub const QM_ALLOWED_OPTIONS: &[&str] = &[
    "scsi0", "boot", "ide2", "agent", "serial0", "vga", "net0", "memory", "cores", "name",
    "ostype", "scsihw", "sockets", "cpu", "numa", "machine", "bios",
];

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[a-z0-9-]{1,64}$").unwrap();
    static ref SHORT_NAME_RE: Regex = Regex::new(r"^[a-z0-9-]{1,32}$").unwrap();
    static ref STORAGE_RE: Regex = Regex::new(r"^[a-z0-9-]+$").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"^[a-zA-Z0-9-]+$").unwrap();
    static ref HEX_ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40,128}$").unwrap();
    static ref BECH32_ADDRESS_RE: Regex =
        Regex::new(r"^[a-z][a-z0-9]{0,9}1[02-9ac-hj-np-z]{39,90}$").unwrap();
    static ref IPV6_CIDR128_RE: Regex = Regex::new(r"^[0-9a-fA-F:]+/128$").unwrap();
    static ref TAP_DEV_RE: Regex = Regex::new(r"^tap\d+i\d+$").unwrap();
}

/// A rejected request field. The display string is what the client sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("vmid must be int 100-999999")]
    Vmid,
    #[error("Invalid VM name: {0}")]
    VmName(String),
    #[error("Invalid entry name: {0}")]
    EntryName(String),
    #[error("Invalid wallet name: {0}")]
    WalletName(String),
    #[error("Reserved name: {0}")]
    ReservedName(String),
    #[error("Invalid storage: {0}")]
    Storage(String),
    #[error("Invalid comment (alphanumeric/dash only)")]
    Comment,
    #[error("Invalid IPv6/128: {0}")]
    Ipv6Cidr(String),
    #[error("Device not allowed: {0}")]
    Device(String),
    #[error("port must be 1-65535")]
    Port,
    #[error("proto must be tcp or udp")]
    Proto,
    #[error("{field} must be under {dir}/ or /tmp/")]
    PathPrefix { field: &'static str, dir: String },
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Invalid address for {name}: {address}")]
    AddressFor { name: String, address: String },
    #[error("keyfile for {name} must be under {dir}/")]
    KeyfilePrefix { name: String, dir: String },
    #[error("Disallowed option: {0}")]
    QmOption(String),
    #[error("Disallowed virt-customize op: {0}")]
    VirtOp(String),
    #[error("{0} must be a string")]
    NotAString(&'static str),
    #[error("{0} must be a list")]
    NotAList(&'static str),
    #[error("{0} must be a map")]
    NotAMap(&'static str),
    #[error("Entry {0} must be a map")]
    EntryShape(String),
    #[error("commands must be a non-empty list")]
    CommandsEmpty,
    #[error("Each command must be [op, arg, ...]: {0}")]
    SubCommandShape(String),
    #[error("args must alternate --option and value")]
    ArgPairs,
    #[error("option {0} value must be a scalar")]
    OptionValue(String),
}

pub fn validate_vmid(vmid: Option<i64>) -> Result<u32, ValidationError> {
    match vmid {
        Some(v) if (VMID_MIN..=VMID_MAX).contains(&v) => Ok(v as u32),
        _ => Err(ValidationError::Vmid),
    }
}

pub fn validate_vm_name(name: &str) -> Result<&str, ValidationError> {
    if NAME_RE.is_match(name) {
        Ok(name)
    } else {
        Err(ValidationError::VmName(name.to_string()))
    }
}

pub fn validate_entry_name(name: &str) -> Result<&str, ValidationError> {
    if NAME_RE.is_match(name) {
        Ok(name)
    } else {
        Err(ValidationError::EntryName(name.to_string()))
    }
}

/// Short name plus the reserve set check, for wallet generation.
pub fn validate_wallet_name(name: &str) -> Result<&str, ValidationError> {
    if !SHORT_NAME_RE.is_match(name) {
        return Err(ValidationError::WalletName(name.to_string()));
    }
    if WALLET_DENY_NAMES.contains(&name) {
        return Err(ValidationError::ReservedName(name.to_string()));
    }
    Ok(name)
}

pub fn validate_storage(storage: &str) -> Result<&str, ValidationError> {
    if STORAGE_RE.is_match(storage) {
        Ok(storage)
    } else {
        Err(ValidationError::Storage(storage.to_string()))
    }
}

pub fn validate_comment(comment: &str) -> Result<&str, ValidationError> {
    if COMMENT_RE.is_match(comment) {
        Ok(comment)
    } else {
        Err(ValidationError::Comment)
    }
}

pub fn validate_ipv6_128(address: &str) -> Result<&str, ValidationError> {
    if IPV6_CIDR128_RE.is_match(address) {
        Ok(address)
    } else {
        Err(ValidationError::Ipv6Cidr(address.to_string()))
    }
}

pub fn validate_dev(dev: &str) -> Result<&str, ValidationError> {
    if ALLOWED_ROUTE_DEVS.contains(&dev) || TAP_DEV_RE.is_match(dev) {
        Ok(dev)
    } else {
        Err(ValidationError::Device(dev.to_string()))
    }
}

pub fn validate_port(port: Option<i64>) -> Result<u16, ValidationError> {
    match port {
        Some(p) if (1..=65535).contains(&p) => Ok(p as u16),
        _ => Err(ValidationError::Port),
    }
}

pub fn validate_proto(proto: &str) -> Result<&str, ValidationError> {
    match proto {
        "tcp" | "udp" => Ok(proto),
        _ => Err(ValidationError::Proto),
    }
}

/// Structural address validation, chain-agnostic: hex or bech32.
pub fn is_valid_address(address: &str) -> bool {
    HEX_ADDRESS_RE.is_match(address) || BECH32_ADDRESS_RE.is_match(address)
}

/// A disk image path must live under the state directory or `/tmp/` and
/// resolve to an existing regular file.
pub fn validate_image_path(
    field: &'static str,
    path: &str,
    state_dir: &Path,
) -> Result<PathBuf, ValidationError> {
    let state_prefix = format!("{}/", state_dir.display());
    if !path.starts_with(&state_prefix) && !path.starts_with("/tmp/") {
        return Err(ValidationError::PathPrefix {
            field,
            dir: state_dir.display().to_string(),
        });
    }
    let path = PathBuf::from(path);
    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => Err(ValidationError::ImageNotFound(path.display().to_string())),
    }
}

/// Validate a `qm create`/`qm set` option key, given without the `--`.
pub fn validate_qm_option(key: &str) -> Result<&str, ValidationError> {
    if QM_ALLOWED_OPTIONS.contains(&key) {
        Ok(key)
    } else {
        Err(ValidationError::QmOption(key.to_string()))
    }
}

pub fn validate_virt_op(op: &str) -> Result<&str, ValidationError> {
    if VIRT_CUSTOMIZE_ALLOWED_OPS.contains(&op) {
        Ok(op)
    } else {
        Err(ValidationError::VirtOp(op.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vmid_bounds() {
        assert!(validate_vmid(Some(99)).is_err());
        assert_eq!(validate_vmid(Some(100)).unwrap(), 100);
        assert_eq!(validate_vmid(Some(999_999)).unwrap(), 999_999);
        assert!(validate_vmid(Some(1_000_000)).is_err());
        assert!(validate_vmid(None).is_err());
    }

    #[test]
    fn port_bounds() {
        assert!(validate_port(Some(0)).is_err());
        assert_eq!(validate_port(Some(1)).unwrap(), 1);
        assert_eq!(validate_port(Some(65535)).unwrap(), 65535);
        assert!(validate_port(Some(65536)).is_err());
    }

    #[test]
    fn name_length_bounds() {
        let ok = "a".repeat(64);
        assert!(validate_vm_name(&ok).is_ok());
        let too_long = "a".repeat(65);
        assert!(validate_vm_name(&too_long).is_err());
        assert!(validate_vm_name("Has-Caps").is_err());
        assert!(validate_vm_name("").is_err());
    }

    #[test]
    fn wallet_names() {
        assert!(validate_wallet_name("hot").is_ok());
        assert_eq!(
            validate_wallet_name("admin").unwrap_err().to_string(),
            "Reserved name: admin"
        );
        // Too long for a short name even though it is a valid VM name.
        assert!(validate_wallet_name(&"a".repeat(33)).is_err());
    }

    #[test]
    fn route_devices() {
        assert!(validate_dev("vmbr0").is_ok());
        assert!(validate_dev("tap105i0").is_ok());
        assert_eq!(
            validate_dev("eth0").unwrap_err().to_string(),
            "Device not allowed: eth0"
        );
        assert!(validate_dev("tap1x0").is_err());
    }

    #[test]
    fn address_union() {
        // Hex
        assert!(is_valid_address(&format!("0x{}", "ab".repeat(20))));
        assert!(is_valid_address(&format!("0x{}", "ab".repeat(64))));
        assert!(!is_valid_address(&format!("0x{}", "ab".repeat(19))));
        // Bech32
        assert!(is_valid_address(
            "cosmos1qqqsyqcyq5rqwzqfpg9scrgwpugpzysnz9dc9ld"
        ));
        assert!(!is_valid_address("1qqqsyqcyq5rqwzqfpg9scrgwpugpzysn"));
        assert!(!is_valid_address(""));
    }

    #[test]
    fn ipv6_host_routes() {
        assert!(validate_ipv6_128("2a01:db8::1/128").is_ok());
        assert!(validate_ipv6_128("2a01:db8::1/64").is_err());
        assert!(validate_ipv6_128("2a01:db8::1").is_err());
    }

    #[test]
    fn qm_option_allow_list() {
        assert!(validate_qm_option("memory").is_ok());
        assert_eq!(
            validate_qm_option("foo").unwrap_err().to_string(),
            "Disallowed option: foo"
        );
    }

    #[test]
    fn virt_ops() {
        assert!(validate_virt_op("--install").is_ok());
        assert!(validate_virt_op("--delete").is_ok());
        assert!(validate_virt_op("install").is_err());
        assert!(validate_virt_op("--exec").is_err());
    }

    #[test]
    fn image_paths() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.qcow2");
        std::fs::write(&image, b"img").unwrap();

        let ok = validate_image_path("image_path", image.to_str().unwrap(), dir.path());
        assert_eq!(ok.unwrap(), image);

        let err = validate_image_path("image_path", "/etc/passwd", dir.path()).unwrap_err();
        assert!(matches!(err, ValidationError::PathPrefix { .. }));

        let missing = dir.path().join("nope.qcow2");
        let err =
            validate_image_path("image_path", missing.to_str().unwrap(), dir.path()).unwrap_err();
        assert!(matches!(err, ValidationError::ImageNotFound(_)));
    }
}
