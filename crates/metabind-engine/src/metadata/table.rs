//! Hash-bucketed global tables
//!
//! A global table is `Array<OffsetPtr<Array<OffsetPtr<Record>>>>`: a list
//! of buckets, each a list of records. The bucket for a name is
//! `hash(name) % bucket_count`; the hash function is whatever the catalog
//! generator used, supplied as a [`NameHasher`].

use std::fmt;

use super::error::FormatError;
use super::heap::{HeapArray, MetaHeap, OffsetPtr};
use super::record::Record;

// ============================================================================
// Hash strategies
// ============================================================================

/// Deterministic 32-bit hash over identifier bytes.
///
/// Must match the strategy used when the blob was generated.
pub trait NameHasher: Send + Sync + fmt::Debug {
    /// Hash an identifier
    fn hash(&self, name: &[u8]) -> u32;
}

/// CRC-32 (IEEE) over the identifier bytes. The default strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Hasher;

impl NameHasher for Crc32Hasher {
    fn hash(&self, name: &[u8]) -> u32 {
        crc32fast::hash(name)
    }
}

/// 32-bit FNV-1a over the identifier bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aHasher;

impl NameHasher for Fnv1aHasher {
    fn hash(&self, name: &[u8]) -> u32 {
        const OFFSET_BASIS: u32 = 0x811c_9dc5;
        const PRIME: u32 = 0x0100_0193;
        name.iter()
            .fold(OFFSET_BASIS, |h, &b| (h ^ b as u32).wrapping_mul(PRIME))
    }
}

// ============================================================================
// Global table
// ============================================================================

/// Which name a table is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Keyed by the scripting-facing name
    ByJsName,
    /// Keyed by the native name
    ByNativeName,
}

type Bucket<'h> = HeapArray<'h, OffsetPtr<Record<'h>>>;

/// View over one global table.
#[derive(Clone, Copy)]
pub struct GlobalTable<'h> {
    heap: &'h MetaHeap,
    start: usize,
    kind: TableKind,
}

impl<'h> GlobalTable<'h> {
    pub(crate) fn new(heap: &'h MetaHeap, start: usize, kind: TableKind) -> Self {
        Self { heap, start, kind }
    }

    /// Which name this table is keyed by
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> Result<usize, FormatError> {
        let count = self.heap.table_i32(self.start)?;
        usize::try_from(count).map_err(|_| FormatError::InconsistentTable {
            section: "global",
            reason: format!("negative bucket count {}", count),
        })
    }

    /// Serialized size; the next section starts right after
    pub fn size_in_bytes(&self) -> Result<usize, FormatError> {
        Ok(4 + self.bucket_count()? * 4)
    }

    /// Records in bucket `index` (`None` for an empty bucket)
    fn bucket(&self, index: usize) -> Result<Option<Bucket<'h>>, FormatError> {
        let raw = self.heap.table_i32(self.start + 4 + index * 4)?;
        OffsetPtr::<Bucket<'h>>::from_raw(raw, self.heap.heap_len())?.resolve(self.heap)
    }

    /// Find a record by name.
    ///
    /// With `only_if_available`, records unavailable on the target
    /// platform are skipped.
    pub fn find(&self, name: &str, only_if_available: bool) -> Result<Option<Record<'h>>, FormatError> {
        let buckets = self.bucket_count()?;
        if buckets == 0 {
            return Ok(None);
        }
        let index = self.heap.hasher().hash(name.as_bytes()) as usize % buckets;
        let bucket = match self.bucket(index)? {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        for record in bucket.targets() {
            let record = record?;
            if !self.matches(&record, name)? {
                continue;
            }
            if only_if_available && !record.is_available() {
                log::trace!("skipping unavailable record '{}'", name);
                continue;
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn matches(&self, record: &Record<'h>, name: &str) -> Result<bool, FormatError> {
        let key = match self.kind {
            TableKind::ByJsName => record.js_name()?,
            TableKind::ByNativeName => record.name()?,
        };
        Ok(key.map_or(false, |key| key.as_bytes() == name.as_bytes()))
    }

    /// Forward cursor over available records
    pub fn iter(&self) -> TableIter<'h> {
        TableIter {
            table: *self,
            bucket_index: 0,
            slot_index: 0,
            current: None,
            only_if_available: true,
        }
    }

    /// Forward cursor over all records, available or not
    pub fn iter_all(&self) -> TableIter<'h> {
        TableIter {
            only_if_available: false,
            ..self.iter()
        }
    }
}

impl fmt::Debug for GlobalTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalTable")
            .field("start", &self.start)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Cursor over `(bucket_index, slot_index)`.
///
/// Skips empty buckets and (optionally) unavailable records. A malformed
/// bucket is reported once and then skipped.
pub struct TableIter<'h> {
    table: GlobalTable<'h>,
    bucket_index: usize,
    slot_index: usize,
    current: Option<Bucket<'h>>,
    only_if_available: bool,
}

impl<'h> TableIter<'h> {
    /// Current `(bucket_index, slot_index)` position
    pub fn position(&self) -> (usize, usize) {
        (self.bucket_index, self.slot_index)
    }
}

impl<'h> Iterator for TableIter<'h> {
    type Item = Result<Record<'h>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        let buckets = match self.table.bucket_count() {
            Ok(count) => count,
            Err(err) => {
                self.bucket_index = usize::MAX;
                return Some(Err(err));
            }
        };
        loop {
            if self.bucket_index >= buckets {
                return None;
            }
            let bucket = match self.current {
                Some(bucket) => bucket,
                None => match self.table.bucket(self.bucket_index) {
                    Ok(Some(bucket)) => {
                        self.current = Some(bucket);
                        bucket
                    }
                    Ok(None) => {
                        self.bucket_index += 1;
                        continue;
                    }
                    Err(err) => {
                        self.bucket_index += 1;
                        return Some(Err(err));
                    }
                },
            };
            if self.slot_index >= bucket.len() {
                self.bucket_index += 1;
                self.slot_index = 0;
                self.current = None;
                continue;
            }
            let slot = self.slot_index;
            self.slot_index += 1;
            let record = match bucket.get(slot).and_then(|ptr| ptr.resolve(self.table.heap)) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            };
            if self.only_if_available && !record.is_available() {
                continue;
            }
            return Some(Ok(record));
        }
    }
}

// ============================================================================
// Module table
// ============================================================================

/// View over the top-level module table (`Array<OffsetPtr<Record>>`).
#[derive(Clone, Copy)]
pub struct ModuleTable<'h> {
    heap: &'h MetaHeap,
    start: usize,
}

impl<'h> ModuleTable<'h> {
    pub(crate) fn new(heap: &'h MetaHeap, start: usize) -> Self {
        Self { heap, start }
    }

    /// Number of modules
    pub fn len(&self) -> Result<usize, FormatError> {
        let count = self.heap.table_i32(self.start)?;
        usize::try_from(count).map_err(|_| FormatError::InconsistentTable {
            section: "module",
            reason: format!("negative module count {}", count),
        })
    }

    /// Check for an empty table
    pub fn is_empty(&self) -> Result<bool, FormatError> {
        Ok(self.len()? == 0)
    }

    /// Serialized size
    pub fn size_in_bytes(&self) -> Result<usize, FormatError> {
        Ok(4 + self.len()? * 4)
    }

    /// Module record at `index`
    pub fn get(&self, index: usize) -> Result<Option<Record<'h>>, FormatError> {
        let raw = self.heap.table_i32(self.start + 4 + index * 4)?;
        OffsetPtr::<Record<'h>>::from_raw(raw, self.heap.heap_len())?.resolve(self.heap)
    }

    /// Iterate over module records
    pub fn iter(&self) -> impl Iterator<Item = Result<Record<'h>, FormatError>> + 'h {
        let table = *self;
        let len = table.len().unwrap_or(0);
        (0..len).filter_map(move |i| table.get(i).transpose())
    }

    /// Find a module by name
    pub fn find(&self, name: &str) -> Result<Option<Record<'h>>, FormatError> {
        for module in self.iter() {
            let module = module?;
            if module.name()? == Some(name) {
                return Ok(Some(module));
            }
        }
        Ok(None)
    }
}
