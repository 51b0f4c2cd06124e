//! Memory-mapped slab file holding all mutable database state.
//!
//! A gyre database directory contains a schema description (`meta.json`) and
//! one slab file (`data.slab`) with every piece of numeric state: per-source
//! accumulator scratch, per-archive consolidation scratch, ring cursors, and
//! the consolidated rows themselves. The slab has a fixed size computed from
//! the schema, so updates never allocate or grow the file.
//!
//! # File Format
//!
//! ```text
//! [0..64)     Header (SlabHeader)
//! [64..)      PDP block: per source {last_update u64, last_value f64,
//!             accum f64, unknown_secs u64}
//! then, per archive:
//!             cursors:  per source {current_row u64}
//!             scratch:  per source {cdp_value f64, unknown_steps u64,
//!                       elapsed_steps u64}
//!             ring:     per source, rows * f64 (one column per source)
//! ```
//!
//! All fields are 8 bytes and naturally aligned, stored native-endian (the
//! legacy import codec, not the slab, deals with foreign byte orders).
//!
//! # Safety
//!
//! This module uses unsafe operations for direct memory access to the mmap'd
//! region. All offsets derive from a layout validated at create/open time;
//! the hot path accessors assume in-bounds indices for performance.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::MmapMut;

use crate::error::{Result, StorageError};

/// Magic bytes identifying a gyre slab file.
const SLAB_MAGIC: [u8; 4] = *b"GYRE";

/// Current slab format version.
const SLAB_VERSION: u32 = 1;

/// Size of the slab header in bytes.
const HEADER_SIZE: usize = 64;

/// Size of every state field in bytes (u64 or f64).
const FIELD_SIZE: usize = 8;

/// Per-source PDP state fields: last_update, last_value, accum, unknown_secs.
const PDP_FIELDS: usize = 4;

/// Per-source CDP scratch fields: cdp_value, unknown_steps, elapsed_steps.
const CDP_FIELDS: usize = 3;

/// Header structure for slab files.
///
/// Written at the beginning of each slab file. The repr(C) layout ensures a
/// consistent binary format across platforms of the same architecture.
#[repr(C)]
#[derive(Debug, Clone)]
struct SlabHeader {
    /// Magic bytes for file type identification.
    magic: [u8; 4],
    /// Slab format version number.
    version: u32,
    /// Hash of the schema the slab was created from.
    schema_hash: u64,
    /// Base step in seconds.
    step: u64,
    /// Most recent update timestamp across all sources (seconds).
    last_update: u64,
    /// Total number of samples ever ingested.
    sample_count: u64,
    /// Number of datasources.
    source_count: u32,
    /// Number of archives.
    archive_count: u32,
    /// Reserved space for future use (padding to 64 bytes).
    _reserved: [u8; 16],
}

impl SlabHeader {
    fn new(schema_hash: u64, step: u64, source_count: u32, archive_count: u32) -> Self {
        Self {
            magic: SLAB_MAGIC,
            version: SLAB_VERSION,
            schema_hash,
            step,
            last_update: 0,
            sample_count: 0,
            source_count,
            archive_count,
            _reserved: [0; 16],
        }
    }

    /// Validates the header magic and version.
    fn validate(&self, path: &str) -> Result<()> {
        if self.magic != SLAB_MAGIC {
            return Err(StorageError::CorruptedSlab {
                path: path.to_string(),
                reason: format!(
                    "invalid magic bytes: expected {:?}, found {:?}",
                    SLAB_MAGIC, self.magic
                ),
            }
            .into());
        }

        if self.version != SLAB_VERSION {
            return Err(StorageError::CorruptedSlab {
                path: path.to_string(),
                reason: format!(
                    "unsupported version: expected {}, found {}",
                    SLAB_VERSION, self.version
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// Offsets of one archive's state within the slab.
#[derive(Debug, Clone, Copy)]
struct ArchiveRegion {
    /// Offset of the per-source cursor block.
    cursor_offset: usize,
    /// Offset of the per-source CDP scratch block.
    cdp_offset: usize,
    /// Offset of the ring data (source-major columns).
    ring_offset: usize,
    /// Ring capacity in rows.
    rows: usize,
}

/// Helper for computing slab layout sizes and offsets.
#[derive(Debug, Clone)]
struct SlabLayout {
    /// Total file size in bytes.
    file_size: usize,
    /// Offset of the PDP block.
    pdp_offset: usize,
    /// Per-archive regions, in archive declaration order.
    archives: Vec<ArchiveRegion>,
    /// Number of sources (column count).
    sources: usize,
}

impl SlabLayout {
    /// Computes the layout for the given schema dimensions.
    #[allow(clippy::cast_possible_truncation)] // row counts are capped at schema validation
    fn new(sources: usize, archive_rows: &[u64]) -> Self {
        let pdp_offset = HEADER_SIZE;
        let mut cursor = pdp_offset + sources * PDP_FIELDS * FIELD_SIZE;

        let mut archives = Vec::with_capacity(archive_rows.len());
        for &rows in archive_rows {
            let rows = rows as usize;
            let cursor_offset = cursor;
            let cdp_offset = cursor_offset + sources * FIELD_SIZE;
            let ring_offset = cdp_offset + sources * CDP_FIELDS * FIELD_SIZE;
            cursor = ring_offset + sources * rows * FIELD_SIZE;
            archives.push(ArchiveRegion {
                cursor_offset,
                cdp_offset,
                ring_offset,
                rows,
            });
        }

        Self {
            file_size: cursor,
            pdp_offset,
            archives,
            sources,
        }
    }

    /// Byte offset of a PDP state field for one source.
    fn pdp_field(&self, source: usize, field: usize) -> usize {
        self.pdp_offset + (source * PDP_FIELDS + field) * FIELD_SIZE
    }

    /// Byte offset of an archive's cursor for one source.
    fn cursor(&self, archive: usize, source: usize) -> usize {
        self.archives[archive].cursor_offset + source * FIELD_SIZE
    }

    /// Byte offset of an archive's CDP scratch field for one source.
    fn cdp_field(&self, archive: usize, source: usize, field: usize) -> usize {
        self.archives[archive].cdp_offset + (source * CDP_FIELDS + field) * FIELD_SIZE
    }

    /// Byte offset of a ring slot.
    fn ring_slot(&self, archive: usize, source: usize, row: usize) -> usize {
        let region = &self.archives[archive];
        region.ring_offset + (source * region.rows + row) * FIELD_SIZE
    }
}

/// Memory-mapped slab file for a single database.
///
/// # Thread Safety
///
/// Slab is designed for single-writer, multiple-reader access patterns.
/// The memory mapping is `Send + Sync` safe as long as writes are properly
/// coordinated by the caller (the pool wraps databases in a read-write lock).
#[derive(Debug)]
pub struct Slab {
    /// Memory mapping of the slab file.
    mmap: MmapMut,
    /// Pre-computed layout information for fast offset calculations.
    layout: SlabLayout,
    /// Path to the slab file (for error reporting).
    path: String,
}

impl Slab {
    /// Creates a new slab file for the given schema dimensions.
    ///
    /// The file is pre-allocated to the exact size needed and initialized
    /// with appropriate defaults: NaN for last values, CDP accumulators, and
    /// ring slots; zero for counters and cursors.
    ///
    /// # Arguments
    ///
    /// * `path` - Path where the slab file should be created
    /// * `schema_hash` - Stable hash of the owning schema
    /// * `step` - Base step in seconds
    /// * `sources` - Number of datasources
    /// * `archive_rows` - Ring capacity of each archive, in declaration order
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if file creation or memory mapping fails.
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema_hash: u64,
        step: u64,
        sources: usize,
        archive_rows: &[u64],
    ) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let layout = SlabLayout::new(sources, archive_rows);

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?;

        file.set_len(layout.file_size as u64)
            .map_err(|e| StorageError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was just created and has the correct size. We have
        // exclusive access to the file descriptor.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| StorageError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        #[allow(clippy::cast_possible_truncation)] // counts validated by the schema
        let header = SlabHeader::new(schema_hash, step, sources as u32, archive_rows.len() as u32);
        // SAFETY: The mmap is valid and large enough for SlabHeader. The
        // pointer is properly aligned because mappings are page-aligned.
        unsafe {
            ptr::write(mmap.as_mut_ptr().cast::<SlabHeader>(), header);
        }

        let mut slab = Self {
            mmap,
            layout,
            path: path_str,
        };
        slab.initialize_state(sources, archive_rows);

        Ok(slab)
    }

    /// Opens an existing slab file.
    ///
    /// The expected dimensions come from the database metadata; the header
    /// and the file size are validated against them.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file cannot be opened, is corrupted,
    /// has mismatched dimensions, or memory mapping fails.
    #[allow(clippy::cast_possible_truncation)] // counts validated by the schema
    pub fn open<P: AsRef<Path>>(path: P, sources: usize, archive_rows: &[u64]) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was successfully opened with read/write access.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| StorageError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        if mmap.len() < HEADER_SIZE {
            return Err(StorageError::CorruptedSlab {
                path: path_str,
                reason: format!(
                    "file too small: {} bytes, expected at least {HEADER_SIZE}",
                    mmap.len()
                ),
            }
            .into());
        }

        // SAFETY: We verified the file is at least HEADER_SIZE bytes and the
        // mapping start is page-aligned, satisfying SlabHeader's alignment.
        let header = unsafe { ptr::read(mmap.as_ptr().cast::<SlabHeader>()) };
        header.validate(&path_str)?;

        if header.source_count != sources as u32 || header.archive_count != archive_rows.len() as u32
        {
            return Err(StorageError::CorruptedSlab {
                path: path_str,
                reason: format!(
                    "dimension mismatch: slab has {} sources / {} archives, schema has {} / {}",
                    header.source_count,
                    header.archive_count,
                    sources,
                    archive_rows.len()
                ),
            }
            .into());
        }

        let layout = SlabLayout::new(sources, archive_rows);
        if mmap.len() != layout.file_size {
            return Err(StorageError::CorruptedSlab {
                path: path_str,
                reason: format!(
                    "file size mismatch: {} bytes, expected {}",
                    mmap.len(),
                    layout.file_size
                ),
            }
            .into());
        }

        Ok(Self {
            mmap,
            layout,
            path: path_str,
        })
    }

    /// Seeds the state blocks with their empty-database defaults.
    fn initialize_state(&mut self, sources: usize, archive_rows: &[u64]) {
        for s in 0..sources {
            self.set_pdp_last_update(s, 0);
            self.set_pdp_last_value(s, f64::NAN);
            self.set_pdp_accum(s, 0.0);
            self.set_pdp_unknown_secs(s, 0);
        }
        for (a, &rows) in archive_rows.iter().enumerate() {
            for s in 0..sources {
                self.set_current_row(a, s, 0);
                self.set_cdp_value(a, s, f64::NAN);
                self.set_cdp_unknown_steps(a, s, 0);
                self.set_cdp_elapsed(a, s, 0);
                for row in 0..rows {
                    self.set_ring_value(a, s, row, f64::NAN);
                }
            }
        }
    }

    /// Reads a u64 at a layout-computed offset.
    fn u64_at(&self, offset: usize) -> u64 {
        debug_assert!(offset + FIELD_SIZE <= self.mmap.len());
        // SAFETY: The offset was computed by the validated layout, lies within
        // the mapping, and is 8-byte aligned (all regions are 8-byte strided).
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<u64>()) }
    }

    /// Writes a u64 at a layout-computed offset.
    fn set_u64_at(&mut self, offset: usize, value: u64) {
        debug_assert!(offset + FIELD_SIZE <= self.mmap.len());
        // SAFETY: The offset was computed by the validated layout, lies within
        // the mapping, and is 8-byte aligned (all regions are 8-byte strided).
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<u64>(), value);
        }
    }

    /// Reads an f64 at a layout-computed offset.
    fn f64_at(&self, offset: usize) -> f64 {
        debug_assert!(offset + FIELD_SIZE <= self.mmap.len());
        // SAFETY: The offset was computed by the validated layout, lies within
        // the mapping, and is 8-byte aligned (all regions are 8-byte strided).
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<f64>()) }
    }

    /// Writes an f64 at a layout-computed offset.
    fn set_f64_at(&mut self, offset: usize, value: f64) {
        debug_assert!(offset + FIELD_SIZE <= self.mmap.len());
        // SAFETY: The offset was computed by the validated layout, lies within
        // the mapping, and is 8-byte aligned (all regions are 8-byte strided).
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<f64>(), value);
        }
    }

    /// Returns the schema hash from the header.
    pub fn schema_hash(&self) -> u64 {
        // SAFETY: The slab was validated during open/create.
        let header = unsafe { ptr::read(self.mmap.as_ptr().cast::<SlabHeader>()) };
        header.schema_hash
    }

    /// Returns the base step in seconds from the header.
    pub fn step(&self) -> u64 {
        // SAFETY: The slab was validated during open/create.
        let header = unsafe { ptr::read(self.mmap.as_ptr().cast::<SlabHeader>()) };
        header.step
    }

    /// Returns the database-level last-update timestamp.
    pub fn last_update(&self) -> u64 {
        // SAFETY: The slab was validated during open/create.
        let header = unsafe { ptr::read(self.mmap.as_ptr().cast::<SlabHeader>()) };
        header.last_update
    }

    /// Sets the database-level last-update timestamp.
    pub fn set_last_update(&mut self, timestamp: u64) {
        let header_ptr = self.mmap.as_mut_ptr().cast::<SlabHeader>();
        // SAFETY: We're modifying only the last_update field of a properly
        // initialized SlabHeader at the start of our memory mapping.
        unsafe {
            ptr::write(&mut (*header_ptr).last_update, timestamp);
        }
    }

    /// Returns the total number of samples ever ingested.
    pub fn sample_count(&self) -> u64 {
        // SAFETY: The slab was validated during open/create.
        let header = unsafe { ptr::read(self.mmap.as_ptr().cast::<SlabHeader>()) };
        header.sample_count
    }

    /// Sets the total sample count.
    pub fn set_sample_count(&mut self, count: u64) {
        let header_ptr = self.mmap.as_mut_ptr().cast::<SlabHeader>();
        // SAFETY: We're modifying only the sample_count field of a properly
        // initialized SlabHeader at the start of our memory mapping.
        unsafe {
            ptr::write(&mut (*header_ptr).sample_count, count);
        }
    }

    /// Returns a source's last-update timestamp.
    pub fn pdp_last_update(&self, source: usize) -> u64 {
        self.u64_at(self.layout.pdp_field(source, 0))
    }

    /// Sets a source's last-update timestamp.
    pub fn set_pdp_last_update(&mut self, source: usize, timestamp: u64) {
        self.set_u64_at(self.layout.pdp_field(source, 0), timestamp);
    }

    /// Returns a source's last raw reading (NaN before the first sample).
    pub fn pdp_last_value(&self, source: usize) -> f64 {
        self.f64_at(self.layout.pdp_field(source, 1))
    }

    /// Sets a source's last raw reading.
    pub fn set_pdp_last_value(&mut self, source: usize, value: f64) {
        self.set_f64_at(self.layout.pdp_field(source, 1), value);
    }

    /// Returns a source's rate-seconds accumulated in the open step.
    pub fn pdp_accum(&self, source: usize) -> f64 {
        self.f64_at(self.layout.pdp_field(source, 2))
    }

    /// Sets a source's rate-seconds accumulator.
    pub fn set_pdp_accum(&mut self, source: usize, value: f64) {
        self.set_f64_at(self.layout.pdp_field(source, 2), value);
    }

    /// Returns a source's unknown seconds in the open step.
    pub fn pdp_unknown_secs(&self, source: usize) -> u64 {
        self.u64_at(self.layout.pdp_field(source, 3))
    }

    /// Sets a source's unknown seconds in the open step.
    pub fn set_pdp_unknown_secs(&mut self, source: usize, secs: u64) {
        self.set_u64_at(self.layout.pdp_field(source, 3), secs);
    }

    /// Returns the most recently written ring slot of (archive, source).
    pub fn current_row(&self, archive: usize, source: usize) -> u64 {
        self.u64_at(self.layout.cursor(archive, source))
    }

    /// Sets the ring cursor of (archive, source).
    pub fn set_current_row(&mut self, archive: usize, source: usize, row: u64) {
        self.set_u64_at(self.layout.cursor(archive, source), row);
    }

    /// Returns the CDP fold accumulator of (archive, source).
    pub fn cdp_value(&self, archive: usize, source: usize) -> f64 {
        self.f64_at(self.layout.cdp_field(archive, source, 0))
    }

    /// Sets the CDP fold accumulator of (archive, source).
    pub fn set_cdp_value(&mut self, archive: usize, source: usize, value: f64) {
        self.set_f64_at(self.layout.cdp_field(archive, source, 0), value);
    }

    /// Returns the unknown-step count of the open CDP of (archive, source).
    pub fn cdp_unknown_steps(&self, archive: usize, source: usize) -> u64 {
        self.u64_at(self.layout.cdp_field(archive, source, 1))
    }

    /// Sets the unknown-step count of the open CDP of (archive, source).
    pub fn set_cdp_unknown_steps(&mut self, archive: usize, source: usize, steps: u64) {
        self.set_u64_at(self.layout.cdp_field(archive, source, 1), steps);
    }

    /// Returns the PDPs consumed toward the open CDP of (archive, source).
    pub fn cdp_elapsed(&self, archive: usize, source: usize) -> u64 {
        self.u64_at(self.layout.cdp_field(archive, source, 2))
    }

    /// Sets the PDPs consumed toward the open CDP of (archive, source).
    pub fn set_cdp_elapsed(&mut self, archive: usize, source: usize, steps: u64) {
        self.set_u64_at(self.layout.cdp_field(archive, source, 2), steps);
    }

    /// Reads one ring slot.
    ///
    /// # Arguments
    ///
    /// * `archive` - Archive index (< archive count)
    /// * `source` - Source index (< source count)
    /// * `row` - Raw slot index (< the archive's rows)
    ///
    /// # Returns
    ///
    /// The consolidated value, or NaN if the slot was never written.
    #[allow(clippy::cast_possible_truncation)] // rows fit usize on 64-bit targets
    pub fn ring_value(&self, archive: usize, source: usize, row: u64) -> f64 {
        self.f64_at(self.layout.ring_slot(archive, source, row as usize))
    }

    /// Writes one ring slot.
    #[allow(clippy::cast_possible_truncation)] // rows fit usize on 64-bit targets
    pub fn set_ring_value(&mut self, archive: usize, source: usize, row: u64, value: f64) {
        self.set_f64_at(self.layout.ring_slot(archive, source, row as usize), value);
    }

    /// Returns the ring capacity of an archive.
    pub fn archive_rows(&self, archive: usize) -> u64 {
        self.layout.archives[archive].rows as u64
    }

    /// Returns the slab file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.layout.file_size as u64
    }

    /// Syncs the memory mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SyncFailed`] if the sync operation fails.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            StorageError::SyncFailed {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }

    /// Returns the path to this slab file.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_slab_layout() {
        let layout = SlabLayout::new(2, &[10, 4]);

        // Header: 64 bytes
        // PDP block: 2 sources * 4 fields * 8 = 64 bytes, ends at 128
        // Archive 0: cursors 2*8=16, scratch 2*3*8=48, ring 2*10*8=160
        // Archive 1: cursors 16, scratch 48, ring 2*4*8=64
        assert_eq!(layout.pdp_offset, 64);
        assert_eq!(layout.archives[0].cursor_offset, 128);
        assert_eq!(layout.archives[0].cdp_offset, 144);
        assert_eq!(layout.archives[0].ring_offset, 192);
        assert_eq!(layout.archives[1].cursor_offset, 352);
        assert_eq!(layout.archives[1].cdp_offset, 368);
        assert_eq!(layout.archives[1].ring_offset, 416);
        assert_eq!(layout.file_size, 480);

        assert_eq!(layout.pdp_field(1, 0), 96);
        assert_eq!(layout.cursor(1, 1), 360);
        assert_eq!(layout.cdp_field(0, 1, 2), 184);
        assert_eq!(layout.ring_slot(0, 1, 3), 192 + (10 + 3) * 8);
    }

    #[test]
    fn test_slab_create_and_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("data.slab");

        let slab = Slab::create(&slab_path, 0xfeed_beef_cafe, 300, 2, &[10, 4]).unwrap();
        assert_eq!(slab.schema_hash(), 0xfeed_beef_cafe);
        assert_eq!(slab.step(), 300);
        assert_eq!(slab.last_update(), 0);
        assert_eq!(slab.sample_count(), 0);
        assert_eq!(slab.archive_rows(0), 10);
        assert_eq!(slab.archive_rows(1), 4);
        drop(slab);

        let slab = Slab::open(&slab_path, 2, &[10, 4]).unwrap();
        assert_eq!(slab.schema_hash(), 0xfeed_beef_cafe);
        assert_eq!(slab.step(), 300);
    }

    #[test]
    fn test_initial_state_seeding() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("data.slab");

        let slab = Slab::create(&slab_path, 1, 300, 2, &[5]).unwrap();

        for s in 0..2 {
            assert_eq!(slab.pdp_last_update(s), 0);
            assert!(slab.pdp_last_value(s).is_nan());
            assert_eq!(slab.pdp_accum(s), 0.0);
            assert_eq!(slab.pdp_unknown_secs(s), 0);
            assert_eq!(slab.current_row(0, s), 0);
            assert!(slab.cdp_value(0, s).is_nan());
            assert_eq!(slab.cdp_unknown_steps(0, s), 0);
            assert_eq!(slab.cdp_elapsed(0, s), 0);
            for row in 0..5 {
                assert!(slab.ring_value(0, s, row).is_nan());
            }
        }
    }

    #[test]
    fn test_state_round_trip_and_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("data.slab");

        {
            let mut slab = Slab::create(&slab_path, 7, 60, 1, &[8]).unwrap();
            slab.set_last_update(1_700_000_120);
            slab.set_sample_count(2);
            slab.set_pdp_last_update(0, 1_700_000_120);
            slab.set_pdp_last_value(0, 42.5);
            slab.set_pdp_accum(0, 85.0);
            slab.set_pdp_unknown_secs(0, 3);
            slab.set_current_row(0, 0, 5);
            slab.set_cdp_value(0, 0, 12.25);
            slab.set_cdp_unknown_steps(0, 0, 1);
            slab.set_cdp_elapsed(0, 0, 4);
            slab.set_ring_value(0, 0, 5, -17.25);
            slab.sync().unwrap();
        }

        {
            let slab = Slab::open(&slab_path, 1, &[8]).unwrap();
            assert_eq!(slab.last_update(), 1_700_000_120);
            assert_eq!(slab.sample_count(), 2);
            assert_eq!(slab.pdp_last_update(0), 1_700_000_120);
            assert_eq!(slab.pdp_last_value(0), 42.5);
            assert_eq!(slab.pdp_accum(0), 85.0);
            assert_eq!(slab.pdp_unknown_secs(0), 3);
            assert_eq!(slab.current_row(0, 0), 5);
            assert_eq!(slab.cdp_value(0, 0), 12.25);
            assert_eq!(slab.cdp_unknown_steps(0, 0), 1);
            assert_eq!(slab.cdp_elapsed(0, 0), 4);
            assert_eq!(slab.ring_value(0, 0, 5), -17.25);
            assert!(slab.ring_value(0, 0, 4).is_nan());
        }
    }

    #[test]
    fn test_invalid_magic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("invalid.slab");

        let layout = SlabLayout::new(1, &[4]);
        let mut bytes = vec![0u8; layout.file_size];
        bytes[0..4].copy_from_slice(b"BAD\0");
        fs::write(&slab_path, bytes).unwrap();

        let result = Slab::open(&slab_path, 1, &[4]);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid magic bytes")
        );
    }

    #[test]
    fn test_file_too_small() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("small.slab");
        fs::write(&slab_path, b"tiny").unwrap();

        let result = Slab::open(&slab_path, 1, &[4]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("file too small"));
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("data.slab");

        Slab::create(&slab_path, 1, 300, 2, &[10]).unwrap();

        // Same file reopened with a different shape
        let result = Slab::open(&slab_path, 3, &[10]);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("dimension mismatch")
        );
    }

    #[test]
    fn test_size_mismatch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slab_path = temp_dir.path().join("data.slab");

        Slab::create(&slab_path, 1, 300, 2, &[10]).unwrap();

        // Counts match the header but the ring capacity differs
        let result = Slab::open(&slab_path, 2, &[12]);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("file size mismatch")
        );
    }
}
