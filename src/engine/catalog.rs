//! Named tables visible to queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::QueryError;

use super::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Physically laid out table, possibly bucketed.
    Physical,
    /// Lightweight view over a small reference file.
    View,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub kind: TableKind,
    pub frame: Arc<Frame>,
}

impl Table {
    pub fn new(name: &str, kind: TableKind, frame: Frame) -> Self {
        Self {
            name: name.to_string(),
            kind,
            frame: Arc::new(frame),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Arc<Table>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `table`, replacing any table with the same name.
    pub fn register(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Table>, QueryError> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
