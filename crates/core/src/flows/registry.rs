use std::collections::BTreeSet;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("interaction flow `{name}` declared twice")]
pub struct DuplicateFlowError {
    pub name: String,
}

/// Flow names declared on one application instance.
///
/// Each `App` owns its own registry, so two apps may declare the same flow
/// name and the entries are released together with the app.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    names: Mutex<BTreeSet<String>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) -> Result<(), DuplicateFlowError> {
        let mut names = match self.names.lock() {
            Ok(names) => names,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !names.insert(name.to_owned()) {
            return Err(DuplicateFlowError { name: name.to_owned() });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        match self.names.lock() {
            Ok(names) => names.contains(name),
            Err(poisoned) => poisoned.into_inner().contains(name),
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self.names.lock() {
            Ok(names) => names.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.names.lock() {
            Ok(names) => names.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
