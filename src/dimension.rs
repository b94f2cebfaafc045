//! Per-dimension index management.
//!
//! Every dimension a table declares is materialized as its own ordered index
//! named `idx<id>`, all ordered by the [`VersionComparator`]. A record written
//! with N dimensions lands once in each of the N indexes.

use crate::comparator::VERSION_COMPARATOR;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::store::{IndexDescriptor, OrderedIndex, Store};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Dimension id that holds the primary key.
pub const DEFAULT_INDEX_ID: u32 = 0;

/// Dimension name used when a table declares no mapping at all.
pub const DEFAULT_DIMENSION: &str = "idx0";

/// Dimension name to index id.
pub type DimensionMapping = BTreeMap<String, u32>;

/// Returns the mapping a table actually uses for `mapping`.
///
/// An empty mapping stands for a single primary dimension.
pub fn effective_mapping(mapping: &DimensionMapping) -> DimensionMapping {
    if mapping.is_empty() {
        BTreeMap::from([(DEFAULT_DIMENSION.to_string(), DEFAULT_INDEX_ID)])
    } else {
        mapping.clone()
    }
}

/// Checks that `mapping` is injective, has non-empty names, and declares the
/// primary dimension.
pub fn validate_mapping(mapping: &DimensionMapping) -> Result<()> {
    let mut seen = HashSet::with_capacity(mapping.len());
    for (name, &id) in mapping {
        if name.is_empty() {
            return Err(Error::invalid_argument("dimension name must not be empty"));
        }
        if !seen.insert(id) {
            return Err(Error::invalid_argument(format!(
                "index id {} is assigned to more than one dimension",
                id
            )));
        }
    }
    if !seen.contains(&DEFAULT_INDEX_ID) {
        return Err(Error::invalid_argument(format!(
            "mapping must declare index id {}",
            DEFAULT_INDEX_ID
        )));
    }
    Ok(())
}

fn index_name(id: u32) -> String {
    format!("idx{}", id)
}

/// The open indexes of one table, keyed by dimension.
pub struct DimensionIndexSet {
    store: Store,
    mapping: DimensionMapping,
    by_id: BTreeMap<u32, Arc<OrderedIndex>>,
}

impl DimensionIndexSet {
    /// Opens (or creates) one index per dimension of `mapping` under `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the mapping is malformed or any index cannot be opened. No
    /// partially opened set is ever returned.
    pub fn create_or_open<P: AsRef<Path>>(
        dir: P,
        mapping: &DimensionMapping,
        options: &Options,
    ) -> Result<Self> {
        let mapping = effective_mapping(mapping);
        validate_mapping(&mapping)?;

        let descriptors = mapping
            .values()
            .map(|&id| IndexDescriptor::new(index_name(id), &VERSION_COMPARATOR))
            .collect();
        let store = Store::open(dir, options, descriptors)?;

        let mut by_id = BTreeMap::new();
        for &id in mapping.values() {
            let index = store
                .index(&index_name(id))
                .ok_or_else(|| Error::internal(format!("index {} missing after open", id)))?;
            by_id.insert(id, Arc::clone(index));
        }

        Ok(Self { store, mapping, by_id })
    }

    /// Index of dimension `id`.
    pub fn index_for_id(&self, id: u32) -> Result<&Arc<OrderedIndex>> {
        self.by_id
            .get(&id)
            .ok_or_else(|| Error::unknown_dimension(format!("index id {}", id)))
    }

    /// Index of the dimension called `name`.
    pub fn index_for_name(&self, name: &str) -> Result<&Arc<OrderedIndex>> {
        let id = self.id_for_name(name)?;
        self.index_for_id(id)
    }

    /// Index id of the dimension called `name`.
    pub fn id_for_name(&self, name: &str) -> Result<u32> {
        self.mapping
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown_dimension(name.to_string()))
    }

    /// Index holding the primary dimension.
    pub fn default_index(&self) -> Result<&Arc<OrderedIndex>> {
        self.index_for_id(DEFAULT_INDEX_ID)
    }

    /// Number of declared dimensions.
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// Dimension mapping in effect.
    pub fn mapping(&self) -> &DimensionMapping {
        &self.mapping
    }

    /// `(id, index)` pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Arc<OrderedIndex>)> {
        self.by_id.iter().map(|(&id, index)| (id, index))
    }

    /// Syncs every index log.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Directory holding the indexes.
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

impl Drop for DimensionIndexSet {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            log::warn!("Failed to sync indexes at {:?} on close: {}", self.path(), e);
        }
    }
}
