use super::{Db, DbCreator};
use crate::config::Properties;
use crate::error::DatastoreError;
use crate::Result;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Database factories by name, owned by the harness.
#[derive(Default)]
pub struct Registry {
    creators: BTreeMap<String, Box<dyn DbCreator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `creator` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, creator: Box<dyn DbCreator>) {
        let name = name.into();
        if self.creators.insert(name.clone(), creator).is_some() {
            warn!(name = %name, "replaced registered database");
        } else {
            info!(name = %name, "registered database");
        }
    }

    pub fn create(&self, name: &str, props: &Properties) -> Result<Box<dyn Db>> {
        let creator = self
            .creators
            .get(name)
            .ok_or_else(|| DatastoreError::UnknownDb(name.to_string()))?;
        creator.create(props)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }
}
