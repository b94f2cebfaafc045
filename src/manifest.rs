//! Table manifest.
//!
//! A small JSON file written next to the dimension indexes. It records who the
//! table is and how it was declared, so that a restart can verify it is
//! reopening the same table and recover the schema blob.
//!
//! The manifest is replaced atomically: written to a temporary file, synced,
//! then renamed over the old one.

use crate::comparator::{KeyComparator, VERSION_COMPARATOR};
use crate::config::TtlType;
use crate::dimension::DimensionMapping;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File name of the manifest inside a table directory.
pub const MANIFEST_FILE: &str = "TABLE_MANIFEST";

/// Persisted description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    /// Table name
    pub name: String,
    /// Table id
    pub id: u32,
    /// Partition id
    pub pid: u32,
    /// Dimension mapping in effect
    pub mapping: DimensionMapping,
    /// Retention policy
    pub ttl_type: TtlType,
    /// Comparator of every dimension index
    pub comparator: String,
    /// Opaque schema blob
    #[serde(default)]
    pub schema: Vec<u8>,
}

impl TableManifest {
    /// Loads the manifest from `dir`.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        if !path.exists() {
            return Err(Error::not_found(format!("table manifest missing: {:?}", path)));
        }
        let data = std::fs::read(&path)?;
        let manifest = serde_json::from_slice(&data)
            .map_err(|e| Error::corruption(format!("unreadable manifest {:?}: {}", path, e)))?;
        Ok(manifest)
    }

    /// Writes the manifest into `dir`, replacing any previous one.
    pub fn store<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let tmp_path = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_vec_pretty(self)?;

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, dir.join(MANIFEST_FILE))?;

        log::debug!("Wrote manifest for table {} ({}/{})", self.name, self.id, self.pid);
        Ok(())
    }

    /// Checks that the manifest describes the table `(name, id, pid)` with
    /// `mapping`, ordered by the version comparator.
    pub fn verify(&self, name: &str, id: u32, pid: u32, mapping: &DimensionMapping) -> Result<()> {
        if self.name != name || self.id != id || self.pid != pid {
            return Err(Error::corruption(format!(
                "manifest belongs to table {} ({}/{}), expected {} ({}/{})",
                self.name, self.id, self.pid, name, id, pid
            )));
        }
        if &self.mapping != mapping {
            return Err(Error::corruption(format!(
                "dimension mapping changed for table {}: on disk {:?}, declared {:?}",
                name, self.mapping, mapping
            )));
        }
        if self.comparator != VERSION_COMPARATOR.name() {
            return Err(Error::corruption(format!(
                "table {} was written with comparator {}",
                name, self.comparator
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn manifest() -> TableManifest {
        TableManifest {
            name: "t1".to_string(),
            id: 1,
            pid: 2,
            mapping: BTreeMap::from([("card".to_string(), 0), ("mcc".to_string(), 1)]),
            ttl_type: TtlType::LatestTime,
            comparator: VERSION_COMPARATOR.name().to_string(),
            schema: b"schema".to_vec(),
        }
    }

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        manifest().store(dir.path()).unwrap();

        let loaded = TableManifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest());
        assert!(!dir.path().join(format!("{}.tmp", MANIFEST_FILE)).exists());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(TableManifest::load(dir.path()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_garbage_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        assert!(matches!(TableManifest::load(dir.path()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_verify() {
        let m = manifest();
        assert!(m.verify("t1", 1, 2, &m.mapping).is_ok());
        assert!(m.verify("t1", 1, 3, &m.mapping).is_err());

        let other = BTreeMap::from([("card".to_string(), 0)]);
        assert!(matches!(m.verify("t1", 1, 2, &other), Err(Error::Corruption(_))));

        let foreign = TableManifest { comparator: "other.Comparator".to_string(), ..manifest() };
        assert!(matches!(foreign.verify("t1", 1, 2, &m.mapping), Err(Error::Corruption(_))));
    }
}
