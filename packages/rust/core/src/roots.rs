//! Root registry: compact index-to-storage-root table.
//!
//! Index 0 is reserved for the destination pyramid root and never stored
//! here; source roots referenced by `link` instructions are allocated
//! indices from 1 upward, in first-encounter order. The registry serializes
//! as `<index>=<root>` lines and travels between planner and finisher as
//! `todo.finisher.list`.

use std::collections::HashMap;

use pyramerge_shared::{PyramergeError, Result};

/// Mutable registry used during planning, read back by the finisher.
#[derive(Debug, Default)]
pub struct RootRegistry {
    by_root: HashMap<String, u32>,
    ordered: Vec<String>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `root`, allocating the next index on first encounter.
    pub fn index_of(&mut self, root: &str) -> u32 {
        if let Some(&index) = self.by_root.get(root) {
            return index;
        }
        self.ordered.push(root.to_string());
        let index = self.ordered.len() as u32;
        self.by_root.insert(root.to_string(), index);
        index
    }

    /// Root registered at `index` (1-based), if any.
    pub fn root_of(&self, index: u32) -> Option<&str> {
        self.ordered.get(index.checked_sub(1)? as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// `(index, root)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.ordered
            .iter()
            .enumerate()
            .map(|(i, root)| (i as u32 + 1, root.as_str()))
    }

    /// Serialize as `<index>=<root>` lines.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (index, root) in self.iter() {
            out.push_str(&format!("{index}={root}\n"));
        }
        out
    }

    /// Parse a serialized registry. An empty document is a valid empty
    /// registry (a plan that emitted no links).
    pub fn parse(text: &str) -> Result<Self> {
        let mut registry = Self::new();
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (index, root) = line.split_once('=').ok_or_else(|| {
                PyramergeError::protocol(format!("invalid root registry line: {line}"))
            })?;
            let index: u32 = index.parse().map_err(|_| {
                PyramergeError::protocol(format!("invalid root registry index: {line}"))
            })?;
            let allocated = registry.index_of(root);
            if allocated != index {
                return Err(PyramergeError::protocol(format!(
                    "root registry indices are not contiguous from 1: {line}"
                )));
            }
        }
        Ok(registry)
    }
}
