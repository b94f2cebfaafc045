//! The table façade.
//!
//! A [`Table`] owns one [`DimensionIndexSet`] and its manifest, and turns
//! logical records `(key, timestamp, value)` into composite-key writes against
//! the right indexes.
//!
//! # Thread Safety
//!
//! `Table` is `Send + Sync` and is meant to be shared through `Arc<Table>`.
//! Data calls take a shared lock on the index set, so any number of readers and
//! writers run in parallel; only `init` and `destroy` take it exclusively.

use crate::codec;
use crate::comparator::{KeyComparator, VERSION_COMPARATOR};
use crate::config::{TableOptions, TtlType};
use crate::dimension::{effective_mapping, DimensionIndexSet, DimensionMapping, DEFAULT_INDEX_ID};
use crate::error::{Error, Result};
use crate::iterator::{Expiry, PointIterator, TraverseIterator};
use crate::manifest::TableManifest;
use crate::store::{OrderedIndex, Store, WriteBatch};
use bytes::Bytes;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One `(dimension name, key)` pair of a multi-dimension write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    /// Dimension name as declared in the table mapping
    pub name: String,
    /// Key of the record in that dimension
    pub key: Vec<u8>,
}

impl Dimension {
    /// Creates a dimension entry.
    pub fn new(name: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), key: key.into() }
    }
}

/// A disk-backed, multi-dimension, TTL-governed table.
pub struct Table {
    name: String,
    id: u32,
    pid: u32,
    mapping: DimensionMapping,
    ttl: AtomicU64,
    ttl_type: TtlType,
    options: TableOptions,
    path: PathBuf,
    schema: RwLock<Vec<u8>>,
    indexes: RwLock<Option<DimensionIndexSet>>,
    destroyed: AtomicBool,
}

impl Table {
    /// Creates a table handle. Nothing touches the disk until [`Table::init`].
    ///
    /// An empty `mapping` declares a single primary dimension `"idx0"`.
    pub fn new(
        name: impl Into<String>,
        id: u32,
        pid: u32,
        mapping: DimensionMapping,
        ttl: u64,
        ttl_type: TtlType,
        options: TableOptions,
    ) -> Self {
        let name = name.into();
        let path = options.root.join(format!("{}_{}_{}", id, pid, name));
        Self {
            name,
            id,
            pid,
            mapping: effective_mapping(&mapping),
            ttl: AtomicU64::new(ttl),
            ttl_type,
            options,
            path,
            schema: RwLock::new(Vec::new()),
            indexes: RwLock::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Opens or creates the on-disk index set.
    ///
    /// Calling `init` on an initialised table is a no-op. If a manifest is
    /// already on disk it must describe this table.
    ///
    /// # Errors
    ///
    /// Fails on a malformed mapping, a foreign manifest, or any index that
    /// cannot be opened. The table stays un-opened on failure.
    pub fn init(&self) -> Result<()> {
        let mut guard = self.indexes.write();
        self.check_not_destroyed()?;
        if guard.is_some() {
            return Ok(());
        }
        self.options.validate()?;

        let set = DimensionIndexSet::create_or_open(&self.path, &self.mapping, &self.options.store)?;
        match TableManifest::load(&self.path) {
            Ok(manifest) => manifest.verify(&self.name, self.id, self.pid, &self.mapping)?,
            Err(Error::NotFound(_)) => self.manifest().store(&self.path)?,
            Err(e) => return Err(e),
        }

        log::info!(
            "Table {} ({}/{}) initialised at {:?} with {} dimension(s)",
            self.name,
            self.id,
            self.pid,
            self.path,
            set.count()
        );
        *guard = Some(set);
        Ok(())
    }

    /// Reconciles in-memory bookkeeping with what is on disk after a restart.
    ///
    /// Verifies the manifest against the constructor arguments and restores
    /// the schema blob when none has been set yet.
    pub fn read_table_from_disk(&self) -> Result<()> {
        let guard = self.indexes.read();
        let set = self.opened(&guard)?;

        let manifest = TableManifest::load(&self.path)?;
        manifest.verify(&self.name, self.id, self.pid, &self.mapping)?;
        if manifest.ttl_type != self.ttl_type {
            log::warn!(
                "Table {} was written with ttl type {:?}, reopened with {:?}",
                self.name,
                manifest.ttl_type,
                self.ttl_type
            );
        }
        {
            let mut schema = self.schema.write();
            if schema.is_empty() {
                *schema = manifest.schema;
            }
        }

        let records = set.default_index()?.approximate_num_keys();
        log::info!(
            "Loaded table {} ({}/{}): {} dimension(s), ~{} record(s), ttl {} {:?}",
            self.name,
            self.id,
            self.pid,
            set.count(),
            records,
            self.ttl(),
            self.ttl_type
        );
        Ok(())
    }

    /// Closes every index and removes the table directory.
    ///
    /// The table accepts no further calls afterwards, even if removal fails
    /// half-way.
    pub fn destroy(&self) -> Result<()> {
        let mut guard = self.indexes.write();
        self.destroyed.store(true, Ordering::Release);
        // drop closes the index logs before their files go away
        drop(guard.take());

        Store::destroy(&self.path).map_err(|e| {
            log::error!("Failed to destroy table {} at {:?}: {}", self.name, self.path, e);
            e
        })?;
        log::info!("Destroyed table {} ({}/{})", self.name, self.id, self.pid);
        Ok(())
    }

    /// Best-effort maintenance: compacts every index that holds more than one
    /// table file, unflushed writes next to table files, or tombstones.
    /// Failures are only logged.
    pub fn self_tune(&self) {
        let guard = self.indexes.read();
        let Ok(set) = self.opened(&guard) else {
            log::debug!("Skipping self-tune of table {}: not open", self.name);
            return;
        };

        for (id, index) in set.iter() {
            if !index.needs_compaction() {
                continue;
            }
            match index.compact() {
                Ok(reclaimed) => {
                    log::info!("Compacted index {} of table {}, reclaimed {} bytes", id, self.name, reclaimed)
                }
                Err(e) => log::warn!("Compaction of index {} of table {} failed: {}", id, self.name, e),
            }
        }
    }

    /// Writes `value` under `(pk, ts)` in the primary index.
    pub fn put(&self, pk: &[u8], ts: u64, value: &[u8]) -> Result<()> {
        check_key(pk)?;
        let guard = self.indexes.read();
        let index = self.opened(&guard)?.default_index()?;
        index.put(&codec::encode(pk, ts), value)
    }

    /// Writes `value` at `ts` into the index of every dimension in `dimensions`.
    ///
    /// Every dimension name is resolved before anything is written, so an
    /// unknown name leaves all indexes untouched. The individual index writes
    /// are not atomic as a group.
    pub fn put_dimensions(&self, ts: u64, value: &[u8], dimensions: &[Dimension]) -> Result<()> {
        if dimensions.is_empty() {
            return Err(Error::invalid_argument("no dimensions given"));
        }
        let guard = self.indexes.read();
        let set = self.opened(&guard)?;

        let mut targets = Vec::with_capacity(dimensions.len());
        for dim in dimensions {
            check_key(&dim.key)?;
            targets.push((set.index_for_name(&dim.name)?, dim.key.as_slice()));
        }

        for (index, key) in targets {
            index.put(&codec::encode(key, ts), value)?;
        }
        Ok(())
    }

    /// Looks up the version of `pk` at exactly `ts` in index `idx`.
    ///
    /// The lookup is raw: expired versions are still returned.
    pub fn get_from(&self, idx: u32, pk: &[u8], ts: u64) -> Result<Option<Bytes>> {
        check_key(pk)?;
        let guard = self.indexes.read();
        let index = self.opened(&guard)?.index_for_id(idx)?;
        index.get(&codec::encode(pk, ts))
    }

    /// Looks up the version of `pk` at exactly `ts` in the primary index.
    pub fn get(&self, pk: &[u8], ts: u64) -> Result<Option<Bytes>> {
        self.get_from(DEFAULT_INDEX_ID, pk, ts)
    }

    /// Removes every version of `pk` from index `idx` in one batch.
    ///
    /// Returns `false` if `pk` had no versions. Other indexes are not touched.
    pub fn delete(&self, pk: &[u8], idx: u32) -> Result<bool> {
        check_key(pk)?;
        let guard = self.indexes.read();
        let index = self.opened(&guard)?.index_for_id(idx)?;

        let batch = versions_of(index, pk)?;
        if batch.is_empty() {
            return Ok(false);
        }
        log::debug!("Deleting {} version(s) from index {} of table {}", batch.len(), idx, self.name);
        index.write(batch)?;
        Ok(true)
    }

    /// Iterator over the versions of `pk` in the primary index.
    pub fn new_iterator(&self, pk: &[u8]) -> Result<PointIterator> {
        self.new_iterator_from(DEFAULT_INDEX_ID, pk)
    }

    /// Iterator over the versions of `pk` in index `idx`.
    pub fn new_iterator_from(&self, idx: u32, pk: &[u8]) -> Result<PointIterator> {
        check_key(pk)?;
        let guard = self.indexes.read();
        let index = self.opened(&guard)?.index_for_id(idx)?;
        Ok(PointIterator::new(index.cursor(), pk))
    }

    /// TTL-filtering iterator over all of index `idx`, using the current time.
    pub fn new_traverse_iterator(&self, idx: u32) -> Result<TraverseIterator> {
        self.new_traverse_iterator_at(idx, now_ms())
    }

    /// TTL-filtering iterator over all of index `idx` as seen at `now_ms`.
    pub fn new_traverse_iterator_at(&self, idx: u32, now_ms: u64) -> Result<TraverseIterator> {
        let guard = self.indexes.read();
        let index = self.opened(&guard)?.index_for_id(idx)?;
        let expiry = Expiry::new(self.ttl_type, self.ttl(), now_ms, self.options.ttl_unit_ms);
        Ok(TraverseIterator::new(index.cursor(), expiry))
    }

    /// Opaque schema blob.
    pub fn schema(&self) -> Vec<u8> {
        self.schema.read().clone()
    }

    /// Replaces the schema blob; persisted to the manifest once initialised.
    pub fn set_schema(&self, schema: impl Into<Vec<u8>>) -> Result<()> {
        let guard = self.indexes.read();
        *self.schema.write() = schema.into();
        if guard.is_some() {
            self.manifest().store(&self.path)?;
        }
        Ok(())
    }

    /// Number of declared dimensions.
    pub fn idx_cnt(&self) -> usize {
        self.mapping.len()
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Partition id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Dimension mapping in effect.
    pub fn mapping(&self) -> &DimensionMapping {
        &self.mapping
    }

    /// Current TTL value.
    pub fn ttl(&self) -> u64 {
        self.ttl.load(Ordering::Relaxed)
    }

    /// Changes the TTL value. Iterators already created keep the old rule.
    pub fn set_ttl(&self, ttl: u64) {
        self.ttl.store(ttl, Ordering::Relaxed);
    }

    /// Retention policy.
    pub fn ttl_type(&self) -> TtlType {
        self.ttl_type
    }

    /// Approximate number of versions in the primary index; 0 when not open.
    pub fn record_cnt(&self) -> u64 {
        let guard = self.indexes.read();
        self.opened(&guard)
            .and_then(|set| set.default_index().map(|index| index.approximate_num_keys()))
            .unwrap_or(0)
    }

    /// Table directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn opened<'a>(&self, guard: &'a Option<DimensionIndexSet>) -> Result<&'a DimensionIndexSet> {
        self.check_not_destroyed()?;
        guard
            .as_ref()
            .ok_or_else(|| Error::invalid_state(format!("table {} is not initialised", self.name)))
    }

    fn check_not_destroyed(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Error::invalid_state(format!("table {} has been destroyed", self.name)));
        }
        Ok(())
    }

    fn manifest(&self) -> TableManifest {
        TableManifest {
            name: self.name.clone(),
            id: self.id,
            pid: self.pid,
            mapping: self.mapping.clone(),
            ttl_type: self.ttl_type,
            comparator: VERSION_COMPARATOR.name().to_string(),
            schema: self.schema.read().clone(),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("mapping", &self.mapping)
            .field("ttl", &self.ttl())
            .field("ttl_type", &self.ttl_type)
            .field("path", &self.path)
            .finish()
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument("key must not be empty"));
    }
    Ok(())
}

/// Collects a delete for every version of `pk` in `index`.
fn versions_of(index: &Arc<OrderedIndex>, pk: &[u8]) -> Result<WriteBatch> {
    let mut batch = WriteBatch::new();
    let mut cursor = index.cursor();
    cursor.seek(&codec::seek_key(pk));
    while cursor.valid() {
        if codec::value_of(cursor.key())? != pk {
            break;
        }
        batch.delete(cursor.key());
        cursor.next();
    }
    Ok(batch)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
