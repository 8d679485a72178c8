// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! In-memory ledger backend for tests and local development.

use std::sync::Mutex;

use crate::{Backend, Document, LedgerResult};

/// No locking, nothing touches disk. Transactions still commit only on
/// success: the mutator works on a copy which replaces the document at the
/// end.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<Document>,
}

impl MemoryBackend {
    pub fn new(doc: Document) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }
}

impl Backend for MemoryBackend {
    fn read(&self) -> LedgerResult<Document> {
        Ok(self.doc.lock().expect("ledger mutex poisoned").clone())
    }

    fn update<T, F>(&self, mutate: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Document) -> LedgerResult<T>,
    {
        let mut doc = self.doc.lock().expect("ledger mutex poisoned");
        let mut working = doc.clone();
        let out = mutate(&mut working)?;
        *doc = working;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerError;

    #[test]
    fn failed_transactions_change_nothing() {
        let backend = MemoryBackend::new(Document::seed(100));

        let err = backend
            .update(|doc| -> LedgerResult<()> {
                doc.next_vmid = 999;
                Err(LedgerError::VmidRangeExhausted)
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::VmidRangeExhausted));

        assert_eq!(backend.read().unwrap().next_vmid, 100);
    }
}
