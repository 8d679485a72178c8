// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! File-backed ledger with advisory locking.
//!
//! Writers serialize on an exclusive lock of a sidecar `.lock` file rather
//! than the data file, so point readers can take a shared lock on the data
//! file itself. Writes go temp-file, fsync, rename-over, so readers never
//! observe a partial document; a failed write removes the temp file.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::config::{FieldMap, LedgerConfig};
use crate::{Backend, Document, LedgerError, LedgerResult};

pub struct FileBackend {
    db_file: PathBuf,
    lock_file: PathBuf,
    fields: FieldMap,
}

impl FileBackend {
    /// Open the backend, seeding an empty document on first use.
    pub fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        let db_file = config.db_file.clone();
        let lock_file = PathBuf::from(format!("{}.lock", db_file.display()));
        let backend = Self {
            db_file,
            lock_file,
            fields: config.fields.clone(),
        };

        if let Some(parent) = backend.db_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !backend.db_file.exists() {
            let seed = Document::seed(config.vmid_range.map_or(0, |r| r.start));
            backend.write_unlocked(&seed)?;
        }
        Ok(backend)
    }

    fn parse(&self, raw: &str) -> LedgerResult<Document> {
        let mut value: Value = serde_json::from_str(raw)?;
        rename_vm_fields(&mut value, &self.fields, false);
        Ok(serde_json::from_value(value)?)
    }

    fn read_unlocked(&self) -> LedgerResult<Document> {
        let raw = std::fs::read_to_string(&self.db_file)?;
        self.parse(&raw)
    }

    fn write_unlocked(&self, doc: &Document) -> LedgerResult<()> {
        let mut value = serde_json::to_value(doc)?;
        rename_vm_fields(&mut value, &self.fields, true);

        let parent = self.db_file.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, &value)?;
        tmp.as_file().sync_all()?;
        // On error the temp file is unlinked when `tmp` drops.
        tmp.persist(&self.db_file)
            .map_err(|e| LedgerError::Io(e.error))?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn read(&self) -> LedgerResult<Document> {
        let mut file = File::open(&self.db_file)?;
        file.lock_shared()?;
        let mut raw = String::new();
        let result = file.read_to_string(&mut raw);
        let _ = file.unlock();
        result?;
        self.parse(&raw)
    }

    fn update<T, F>(&self, mutate: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Document) -> LedgerResult<T>,
    {
        let lock = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.lock_file)?;
        lock.lock_exclusive()?;

        // Held for the whole read-modify-write; released on every path.
        let result = (|| {
            let mut doc = self.read_unlocked()?;
            let out = mutate(&mut doc)?;
            self.write_unlocked(&doc)?;
            Ok(out)
        })();

        let _ = lock.unlock();
        result
    }
}

/// Apply the configured field mapping to each VM record: semantic → stored
/// names when writing (`to_disk`), the reverse when reading.
fn rename_vm_fields(value: &mut Value, fields: &FieldMap, to_disk: bool) {
    if fields.is_identity() {
        return;
    }
    let Some(vms) = value.get_mut("vms").and_then(Value::as_object_mut) else {
        return;
    };
    for vm in vms.values_mut() {
        let Some(record) = vm.as_object_mut() else {
            continue;
        };
        for (semantic, stored) in fields.pairs() {
            let (from, to) = if to_disk {
                (semantic, stored)
            } else {
                (stored, semantic)
            };
            if from == to {
                continue;
            }
            if let Some(v) = record.remove(from) {
                record.insert(to.to_string(), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::config::{IpPool, VmidRange};
    use crate::{NewVm, VmLedger};

    fn test_config(dir: &Path) -> LedgerConfig {
        LedgerConfig {
            vmid_range: Some(VmidRange {
                start: 100,
                end: 999,
            }),
            ip_pool: IpPool {
                network: "192.168.122.0/24".to_string(),
                start: 200,
                end: 231,
                gateway: None,
            },
            db_file: dir.join("vms.json"),
            ..Default::default()
        }
    }

    #[test]
    fn first_open_seeds_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = FileBackend::open(&config).unwrap();

        let doc = backend.read().unwrap();
        assert_eq!(doc.next_vmid, 100);
        assert!(doc.vms.is_empty());

        // Reopening does not reseed.
        backend
            .update(|doc| {
                doc.next_vmid = 123;
                Ok(())
            })
            .unwrap();
        let backend = FileBackend::open(&config).unwrap();
        assert_eq!(backend.read().unwrap().next_vmid, 123);
    }

    #[test]
    fn survives_a_full_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let db = VmLedger::open(config.clone(), None).unwrap();
        db.register_vm(NewVm::new("web-1", 150, "192.168.122.200"))
            .unwrap();
        drop(db);

        let db = VmLedger::open(config, None).unwrap();
        let vm = db.get_vm("web-1").unwrap().unwrap();
        assert_eq!(vm.vmid, 150);
    }

    #[test]
    fn failed_transactions_leave_the_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = FileBackend::open(&config).unwrap();

        let before = std::fs::read_to_string(&config.db_file).unwrap();
        let result: LedgerResult<()> = backend.update(|doc| {
            doc.next_vmid = 999;
            Err(LedgerError::VmidRangeExhausted)
        });
        assert!(result.is_err());
        let after = std::fs::read_to_string(&config.db_file).unwrap();
        assert_eq!(before, after);

        // No temp droppings either.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| !n.starts_with("vms.json"))
            .collect();
        assert!(entries.is_empty(), "leftover files: {entries:?}");
    }

    #[test]
    fn field_map_renames_on_disk_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.fields.status = "state".to_string();
        config.fields.vm_name = "hostname".to_string();

        let db = VmLedger::open(config.clone(), None).unwrap();
        db.register_vm(NewVm::new("web-1", 150, "192.168.122.200"))
            .unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(&config.db_file).unwrap()).unwrap();
        let record = &raw["vms"]["web-1"];
        assert_eq!(record["state"], "active");
        assert_eq!(record["hostname"], "web-1");
        assert!(record.get("status").is_none());

        // And the mapping is undone on read.
        let vm = db.get_vm("web-1").unwrap().unwrap();
        assert_eq!(vm.vm_name, "web-1");
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let db = Arc::new(VmLedger::open(config, None).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(std::thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..4 {
                    if let Some(ip) = db.allocate_ip().unwrap() {
                        got.push(ip);
                    }
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        // 8 threads x 4 requests over a 32-address pool: every address is
        // handed out exactly once.
        let distinct: BTreeSet<_> = all.iter().cloned().collect();
        assert_eq!(distinct.len(), all.len());
        assert_eq!(all.len(), 32);
    }

    #[test]
    fn sidecar_lock_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = FileBackend::open(&config).unwrap();
        backend.update(|_| Ok(())).unwrap();
        assert!(dir.path().join("vms.json.lock").exists());
    }
}
