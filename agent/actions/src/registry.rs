// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The action registry.
//!
//! The original deployment discovered plugins by scanning a directory at
//! startup; here each module contributes its actions through a static table,
//! visited in sorted-by-module-name order so registration stays
//! deterministic. On a name collision the first registration wins and the
//! duplicate is skipped with a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{hypervisor, networking, system, ActionEnv, ActionHandler};

type ModuleFn = fn(&Arc<ActionEnv>) -> Vec<(&'static str, Arc<dyn ActionHandler>)>;

/// Modules contributing actions, sorted by name.
const MODULES: &[(&str, ModuleFn)] = &[
    ("hypervisor", hypervisor::actions),
    ("networking", networking::actions),
    ("system", system::actions),
];

pub struct ActionRegistry {
    actions: BTreeMap<&'static str, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn load(env: ActionEnv) -> Self {
        let env = Arc::new(env);
        let mut actions: BTreeMap<&'static str, Arc<dyn ActionHandler>> = BTreeMap::new();

        for (module, provide) in MODULES {
            let mut loaded = 0;
            for (name, handler) in provide(&env) {
                if actions.contains_key(name) {
                    tracing::warn!(
                        action = name,
                        module,
                        "action conflicts with an existing one, skipping"
                    );
                    continue;
                }
                actions.insert(name, handler);
                loaded += 1;
            }
            tracing::info!(module, count = loaded, "loaded actions");
        }

        Self { actions }
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.actions.get(action)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.actions.keys().copied()
    }
}
