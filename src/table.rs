//! The uid-labelled view of a cache, in either of its two phases.

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::persist::{DynamicContents, StaticFile};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug)]
pub enum CacheTable {
    Static(StaticTable),
    Dynamic(DynamicTable),
}

impl CacheTable {
    /// Number of populated rows.
    pub fn len(&self) -> usize {
        match self {
            CacheTable::Static(table) => table.len(),
            CacheTable::Dynamic(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn columns(&self) -> &[String] {
        match self {
            CacheTable::Static(table) => &table.columns,
            CacheTable::Dynamic(table) => &table.columns,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, CacheTable::Static(_))
    }

    pub fn contains(&self, uid: u64) -> bool {
        match self {
            CacheTable::Static(table) => uid < table.rows as u64,
            CacheTable::Dynamic(table) => table.rows.contains_key(&uid),
        }
    }

    /// Copy of the row labelled `uid`, if populated.
    pub fn row(&self, uid: u64) -> Option<Vec<f32>> {
        match self {
            CacheTable::Static(table) => table.row(uid),
            CacheTable::Dynamic(table) => table.rows.get(&uid).cloned(),
        }
    }

    /// Single cell by uid and column name.
    pub fn value(&self, uid: u64, column: &str) -> Option<f32> {
        let index = self.columns().iter().position(|c| c == column)?;
        match self {
            CacheTable::Static(table) => table.row(uid).map(|row| row[index]),
            CacheTable::Dynamic(table) => table.rows.get(&uid).map(|row| row[index]),
        }
    }

    /// All populated rows in ascending uid order.
    pub fn rows(&self) -> Box<dyn Iterator<Item = (u64, Vec<f32>)> + '_> {
        match self {
            CacheTable::Static(table) => Box::new(
                (0..table.rows as u64).filter_map(move |uid| table.row(uid).map(|row| (uid, row))),
            ),
            CacheTable::Dynamic(table) => {
                Box::new(table.rows.iter().map(|(uid, row)| (*uid, row.clone())))
            }
        }
    }
}

#[derive(Debug)]
enum StaticStorage {
    Mapped(StaticFile),
    Shared(Arc<SharedBuffer>),
}

/// Fully populated, immutable table. Row `i` has uid `i`.
#[derive(Debug)]
pub struct StaticTable {
    columns: Vec<String>,
    rows: usize,
    storage: StaticStorage,
}

impl StaticTable {
    pub fn mapped(file: StaticFile, columns: Vec<String>, rows: usize) -> Result<Self> {
        Self::check_len(file.len(), &columns, rows)?;
        Ok(Self {
            columns,
            rows,
            storage: StaticStorage::Mapped(file),
        })
    }

    pub fn shared(buffer: Arc<SharedBuffer>, columns: Vec<String>, rows: usize) -> Result<Self> {
        Self::check_len(buffer.len(), &columns, rows)?;
        Ok(Self {
            columns,
            rows,
            storage: StaticStorage::Shared(buffer),
        })
    }

    fn check_len(actual: usize, columns: &[String], rows: usize) -> Result<()> {
        let expected = rows * columns.len();
        if actual != expected {
            return Err(Error::SizeMismatch { expected, actual });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.storage, StaticStorage::Shared(_))
    }

    fn row(&self, uid: u64) -> Option<Vec<f32>> {
        let uid = usize::try_from(uid).ok().filter(|uid| *uid < self.rows)?;
        let width = self.columns.len();
        let offset = uid * width;
        match &self.storage {
            StaticStorage::Mapped(file) => Some(file.values()[offset..offset + width].to_vec()),
            StaticStorage::Shared(buffer) => {
                let mut row = vec![0.0; width];
                buffer.read(offset, &mut row).ok()?;
                Some(row)
            }
        }
    }
}

/// Partially populated table that only grows.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    columns: Vec<String>,
    rows: BTreeMap<u64, Vec<f32>>,
    limit: u64,
}

impl DynamicTable {
    /// An empty table over the key space `[0, limit)`.
    pub fn new(columns: Vec<String>, limit: u64) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
            limit,
        }
    }

    /// Rebuild a table from a dynamic cache file. Columns must match the
    /// configured sets and every uid must be inside the key space.
    pub fn from_contents(contents: DynamicContents, columns: &[String], limit: u64) -> Result<Self> {
        if contents.columns != columns {
            return Err(Error::CorruptedCache(format!(
                "cached columns {:?} do not match configured sets {:?}",
                contents.columns, columns
            )));
        }

        let mut rows = BTreeMap::new();
        for (uid, row) in contents.rows {
            if uid >= limit {
                return Err(Error::CorruptedCache(format!(
                    "uid {} outside the key space [0, {})",
                    uid, limit
                )));
            }
            if rows.insert(uid, row).is_some() {
                return Err(Error::CorruptedCache(format!("duplicate uid {}", uid)));
            }
        }

        Ok(Self {
            columns: contents.columns,
            rows,
            limit,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &BTreeMap<u64, Vec<f32>> {
        &self.rows
    }

    /// Every uid in the key space is present.
    pub fn is_complete(&self) -> bool {
        self.rows.len() as u64 == self.limit
    }

    /// Appends `new_rows`. The whole batch is validated before anything is
    /// inserted, so a rejected batch leaves the table untouched.
    pub fn extend(&mut self, new_rows: Vec<(u64, Vec<f32>)>) -> Result<usize> {
        if new_rows.is_empty() {
            return Err(Error::EmptyExtend);
        }

        let mut batch = HashSet::with_capacity(new_rows.len());
        for (uid, row) in &new_rows {
            if *uid >= self.limit {
                return Err(Error::UidOutOfRange {
                    uid: *uid,
                    limit: self.limit,
                });
            }
            if row.len() != self.columns.len() {
                return Err(Error::RowWidth {
                    expected: self.columns.len(),
                    actual: row.len(),
                });
            }
            if self.rows.contains_key(uid) || !batch.insert(*uid) {
                return Err(Error::DuplicateUid(*uid));
            }
        }

        let added = new_rows.len();
        self.rows.extend(new_rows);
        Ok(added)
    }

    /// Flattens a complete table into static buffer order, checking that row
    /// `i` carries uid `i`.
    pub fn to_static_values(&self) -> Result<Vec<f32>> {
        if !self.is_complete() {
            return Err(Error::SizeMismatch {
                expected: self.limit as usize,
                actual: self.rows.len(),
            });
        }

        let mut values = Vec::with_capacity(self.rows.len() * self.columns.len());
        for (index, (uid, row)) in self.rows.iter().enumerate() {
            if *uid != index as u64 {
                return Err(Error::CorruptedCache(format!(
                    "row {} carries uid {}",
                    index, uid
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(values)
    }
}
