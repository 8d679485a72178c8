// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Filesystem permission helpers for files owned by root but readable by
//! the service group (key material, the address book, the agent socket).

use std::ffi::CString;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{anyhow, Context};

/// Resolve a group name to its gid.
pub fn group_gid(name: &str) -> anyhow::Result<u32> {
    let cname = CString::new(name).context("group name contains a NUL byte")?;
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0i8; 1024];
    loop {
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(anyhow!("getgrnam_r({name}) failed: errno {rc}"));
        }
        if result.is_null() {
            return Err(anyhow!("no such group: {name}"));
        }
        return Ok(grp.gr_gid);
    }
}

/// `chown root:<group>` and `chmod <mode>` on `path`.
pub fn restrict_to_group(path: &Path, group: &str, mode: u32) -> anyhow::Result<()> {
    let gid = group_gid(group)?;
    std::os::unix::fs::chown(path, Some(0), Some(gid))
        .with_context(|| format!("cannot chown {} to root:{}", path.display(), group))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("cannot chmod {} to {mode:o}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root_group() {
        // Group 0 exists on every Linux system, as "root".
        assert_eq!(group_gid("root").unwrap(), 0);
    }

    #[test]
    fn unknown_group_is_an_error() {
        assert!(group_gid("no-such-group-xyz").is_err());
    }
}
