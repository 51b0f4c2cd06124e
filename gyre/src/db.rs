//! Database lifecycle and the update/fetch surface.
//!
//! This module provides the top-level API that ties all components together.
//! A [`Database`] owns one schema, one memory-mapped slab, and the per-source
//! accumulators and per-archive consolidators that move samples from raw
//! updates into the rings.
//!
//! # Design
//!
//! The Database acts as the central coordinator:
//! - Manages the database directory with meta.json and the slab file
//! - Routes each sample to its datasource's rate accumulator
//! - Fans completed primary data points out to every archive
//! - Freezes the schema once the first sample has been accepted
//! - Converts to and from portable legacy images for import/export
//!
//! # File Layout
//!
//! ```text
//! db_dir/
//! ├── meta.json    <- Schema definition, format version, stable hash
//! └── data.slab    <- Memory-mapped state: header, PDP/CDP scratch, rings
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gyre::{ArchiveDef, ConsolidationFn, Database, FetchRequest, Schema, SourceDef, SourceKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut schema = Schema::new(300)?;
//! schema.add_source(SourceDef::new("load", SourceKind::Gauge, 600)?)?;
//! schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 600)?)?;
//!
//! let mut db = Database::create("./load.gyre", schema, 1_700_000_000)?;
//! db.update("load", 1_700_000_300, 0.42)?;
//!
//! let chunk = db.fetch(&FetchRequest::new(
//!     ConsolidationFn::Average,
//!     1_700_000_000,
//!     1_700_000_300,
//! ))?;
//! for (ts, value) in chunk.timestamps().zip(&chunk.columns()[0]) {
//!     println!("{ts}: {value}");
//! }
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::codec::Format;
use crate::error::{Result, SchemaError, StorageError, UpdateError};
use crate::fetch::{self, DataChunk, FetchRequest};
use crate::legacy::{self, LegacyArchiveState, LegacyImage, LegacySourceState};
use crate::pdp::{normalize, PdpAccumulator};
use crate::schema::{ArchiveDef, Schema, SourceDef};
use crate::slab::Slab;

/// Metadata file format version.
const METADATA_VERSION: u32 = 1;

/// Name of the metadata file in the database directory.
pub const METADATA_FILE: &str = "meta.json";

/// Name of the slab file in the database directory.
pub const SLAB_FILE: &str = "data.slab";

/// A round-robin time-series database rooted in one directory.
///
/// # Thread Safety
///
/// The Database is designed for single-threaded access patterns. External
/// synchronization must be provided if used across multiple threads; the
/// [`crate::pool`] module wraps databases in a read-write lock for exactly
/// that purpose.
#[derive(Debug)]
pub struct Database {
    /// Path to the database directory.
    path: PathBuf,
    /// The schema, frozen once the first sample is accepted.
    schema: Schema,
    /// Memory-mapped state file holding all mutable numeric state.
    slab: Slab,
    /// Per-datasource rate accumulators, in declaration order.
    pdps: Vec<PdpAccumulator>,
    /// Per-archive consolidators, in declaration order.
    archives: Vec<Archive>,
}

/// Metadata stored in the database's meta.json file.
#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    /// Metadata format version.
    version: u32,
    /// Pre-computed stable hash for validation against the slab.
    schema_hash: u64,
    /// The schema definition.
    schema: Schema,
}

impl Database {
    /// Creates a new database directory with initial files.
    ///
    /// Existing files at `path` are overwritten. `start` is the moment
    /// observation begins: the first accepted sample must be newer, and the
    /// fraction of the first step and first consolidation rows that predate
    /// `start` count as unknown.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory path for the database
    /// * `schema` - The step, datasources and archives to store
    /// * `start` - Epoch seconds at which observation begins
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the schema is invalid and
    /// [`StorageError`] if the directory or slab cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, schema: Schema, start: u64) -> Result<Self> {
        schema.validate()?;

        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| StorageError::DirectoryAccess {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::write_metadata(&path, &schema)?;

        let rows = Self::archive_rows(&schema);
        let mut slab = Slab::create(
            path.join(SLAB_FILE),
            schema.stable_hash(),
            schema.step,
            schema.sources.len(),
            &rows,
        )?;
        Self::seed_clocks(&mut slab, &schema, start);

        let (pdps, archives) = Self::build_engines(&schema);
        Ok(Self {
            path,
            schema,
            slab,
            pdps,
            archives,
        })
    }

    /// Opens an existing database directory.
    ///
    /// The schema comes from meta.json; its stable hash must match both the
    /// recorded hash and the one embedded in the slab header.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the directory cannot be read, the
    /// metadata is corrupted, or the schema hash does not match the slab.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let metadata_path = path.join(METADATA_FILE);
        let metadata_json =
            fs::read_to_string(&metadata_path).map_err(|e| StorageError::DirectoryAccess {
                path: metadata_path.display().to_string(),
                source: e,
            })?;
        let metadata: Metadata =
            serde_json::from_str(&metadata_json).map_err(StorageError::MetadataSerialize)?;

        if metadata.version != METADATA_VERSION {
            return Err(StorageError::CorruptedMetadata {
                reason: format!("unsupported metadata version {}", metadata.version),
            }
            .into());
        }
        metadata.schema.validate()?;

        let expected = metadata.schema.stable_hash();
        if metadata.schema_hash != expected {
            return Err(StorageError::SchemaMismatch {
                existing: metadata.schema_hash,
                expected,
            }
            .into());
        }

        let rows = Self::archive_rows(&metadata.schema);
        let slab = Slab::open(path.join(SLAB_FILE), metadata.schema.sources.len(), &rows)?;
        if slab.schema_hash() != expected {
            return Err(StorageError::SchemaMismatch {
                existing: slab.schema_hash(),
                expected,
            }
            .into());
        }

        let (pdps, archives) = Self::build_engines(&metadata.schema);
        Ok(Self {
            path,
            schema: metadata.schema,
            slab,
            pdps,
            archives,
        })
    }

    /// Creates a database at `path` from a legacy binary file.
    ///
    /// The legacy schema, scratch state and ring contents carry over, so
    /// fetches and further updates continue exactly where the old file
    /// stopped. Rings are rewritten in chronological slot order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ImportError`] if `bytes` is not a readable
    /// legacy file and [`StorageError`] if the database cannot be created.
    pub fn import_legacy<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<Self> {
        let image = legacy::read_image(bytes)?;
        Self::from_image(path, &image)
    }

    /// Feeds one sample into a datasource.
    ///
    /// This is the hot path: it allocates nothing and writes only to the
    /// memory mapping. A NaN `value` is valid and marks the covered seconds
    /// as unknown.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::UnknownSource`] for an unrecognized name and
    /// [`UpdateError::NonMonotonic`] if `timestamp` does not advance this
    /// datasource's clock.
    pub fn update(&mut self, name: &str, timestamp: u64, value: f64) -> Result<()> {
        let source = self
            .schema
            .source_index(name)
            .ok_or_else(|| UpdateError::UnknownSource {
                name: name.to_string(),
            })?;

        if let Some(run) = self.pdps[source].update(&mut self.slab, timestamp, value)? {
            for archive in &self.archives {
                archive.consolidate(&mut self.slab, source, run.value, run.steps);
            }
        }

        if timestamp > self.slab.last_update() {
            self.slab.set_last_update(timestamp);
        }
        self.slab.set_sample_count(self.slab.sample_count() + 1);
        Ok(())
    }

    /// Runs one fetch and returns a dense, aligned result matrix.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FetchError`] if the window is empty, a name
    /// is unknown, or no archive overlaps the window.
    pub fn fetch(&self, request: &FetchRequest) -> Result<DataChunk> {
        fetch::execute(&self.schema, &self.slab, &self.archives, request)
    }

    /// Adds a datasource to a database that has not yet accepted a sample.
    ///
    /// The slab is rebuilt for the new dimensions; clocks keep the original
    /// observation start.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SchemaFrozen`] once any sample has been
    /// accepted, or [`SchemaError`] if the definition is invalid.
    pub fn add_source(&mut self, def: SourceDef) -> Result<()> {
        self.ensure_mutable()?;
        self.schema.add_source(def)?;
        self.rebuild()
    }

    /// Adds an archive to a database that has not yet accepted a sample.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SchemaFrozen`] once any sample has been
    /// accepted, or [`SchemaError`] if the definition is invalid.
    pub fn add_archive(&mut self, def: ArchiveDef) -> Result<()> {
        self.ensure_mutable()?;
        self.schema.add_archive(def)?;
        self.rebuild()
    }

    /// Flushes the memory-mapped state to disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SyncFailed`] if msync fails.
    pub fn sync(&self) -> Result<()> {
        self.slab.sync()
    }

    /// Captures the full database state as a portable legacy image.
    ///
    /// Rings are canonicalized: slots run oldest to newest and the cursor
    /// points at the last slot, regardless of the in-slab cursor phase.
    pub fn to_image(&self) -> LegacyImage {
        let source_count = self.schema.sources.len();

        let sources = (0..source_count)
            .map(|s| LegacySourceState {
                last_value: self.slab.pdp_last_value(s),
                unknown_secs: self.slab.pdp_unknown_secs(s),
                accum: self.slab.pdp_accum(s),
            })
            .collect();

        let archives = self
            .archives
            .iter()
            .enumerate()
            .map(|(a, archive)| {
                let def = &self.schema.archives[a];
                let resolution = self.schema.resolution(def);
                let newest = normalize(self.slab.last_update(), resolution);
                #[allow(clippy::cast_possible_truncation)] // row counts fit usize on 64-bit targets
                let count = def.rows as usize;

                let columns: Vec<Vec<f64>> = (0..source_count)
                    .map(|s| archive.snapshot(&self.slab, s, newest, count, resolution))
                    .collect();
                let rows = (0..count)
                    .map(|r| columns.iter().map(|col| col[r]).collect())
                    .collect();

                LegacyArchiveState {
                    cdp_values: (0..source_count)
                        .map(|s| self.slab.cdp_value(a, s))
                        .collect(),
                    cdp_unknown_steps: (0..source_count)
                        .map(|s| self.slab.cdp_unknown_steps(a, s))
                        .collect(),
                    current_row: def.rows - 1,
                    rows,
                }
            })
            .collect();

        LegacyImage {
            schema: self.schema.clone(),
            last_update: self.slab.last_update(),
            sources,
            archives,
        }
    }

    /// Serializes the database as a legacy binary file.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::InconsistentImage`](crate::error::ImportError::InconsistentImage)
    /// if the captured image fails the encoder's dimension checks; images
    /// built by [`Database::to_image`] always pass them.
    pub fn export_legacy(&self, format: Format) -> Result<Vec<u8>> {
        legacy::write_image(&self.to_image(), format)
    }

    /// The schema this database stores.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp of the newest accepted sample across all datasources, or
    /// the observation start if none has been accepted yet.
    pub fn last_update(&self) -> u64 {
        self.slab.last_update()
    }

    /// Number of samples accepted since creation.
    pub fn sample_count(&self) -> u64 {
        self.slab.sample_count()
    }

    /// Size of the slab file in bytes.
    pub fn slab_size(&self) -> u64 {
        self.slab.file_size()
    }

    /// Builds a database from a parsed legacy image.
    #[allow(clippy::cast_possible_truncation)] // row counts fit usize on 64-bit targets
    fn from_image<P: AsRef<Path>>(path: P, image: &LegacyImage) -> Result<Self> {
        let mut db = Self::create(path, image.schema.clone(), image.last_update)?;

        // Primary data point scratch carries over verbatim
        for (source, state) in image.sources.iter().enumerate() {
            db.slab.set_pdp_last_value(source, state.last_value);
            db.slab.set_pdp_unknown_secs(source, state.unknown_secs);
            db.slab.set_pdp_accum(source, state.accum);
        }

        // Rings rotate into chronological slot order, newest in the last slot
        for (archive, state) in image.archives.iter().enumerate() {
            let rows = db.schema.archives[archive].rows;
            for source in 0..db.schema.sources.len() {
                db.slab
                    .set_cdp_value(archive, source, state.cdp_values[source]);
                db.slab
                    .set_cdp_unknown_steps(archive, source, state.cdp_unknown_steps[source]);
                for slot in 0..rows {
                    let raw_row = ((state.current_row + 1 + slot) % rows) as usize;
                    db.slab
                        .set_ring_value(archive, source, slot, state.rows[raw_row][source]);
                }
                db.slab.set_current_row(archive, source, rows - 1);
            }
        }

        // Imported history freezes the schema like a first sample would
        db.slab.set_sample_count(1);
        db.sync()?;
        Ok(db)
    }

    /// Rejects schema changes once any sample has been accepted.
    fn ensure_mutable(&self) -> Result<()> {
        let samples = self.slab.sample_count();
        if samples > 0 {
            return Err(SchemaError::SchemaFrozen { samples }.into());
        }
        Ok(())
    }

    /// Rewrites metadata and recreates the slab after a schema change.
    fn rebuild(&mut self) -> Result<()> {
        // Pre-freeze the header clock still equals the observation start
        let start = self.slab.last_update();

        Self::write_metadata(&self.path, &self.schema)?;

        let rows = Self::archive_rows(&self.schema);
        let mut slab = Slab::create(
            self.path.join(SLAB_FILE),
            self.schema.stable_hash(),
            self.schema.step,
            self.schema.sources.len(),
            &rows,
        )?;
        Self::seed_clocks(&mut slab, &self.schema, start);
        self.slab = slab;

        let (pdps, archives) = Self::build_engines(&self.schema);
        self.pdps = pdps;
        self.archives = archives;
        Ok(())
    }

    /// Writes meta.json for the given schema.
    fn write_metadata(path: &Path, schema: &Schema) -> Result<()> {
        let metadata = Metadata {
            version: METADATA_VERSION,
            schema_hash: schema.stable_hash(),
            schema: schema.clone(),
        };
        let metadata_json =
            serde_json::to_string_pretty(&metadata).map_err(StorageError::MetadataSerialize)?;

        let metadata_path = path.join(METADATA_FILE);
        fs::write(&metadata_path, metadata_json).map_err(|e| StorageError::DirectoryAccess {
            path: metadata_path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Ring capacities in declaration order.
    fn archive_rows(schema: &Schema) -> Vec<u64> {
        schema.archives.iter().map(|a| a.rows).collect()
    }

    /// Seeds all clocks for observation beginning at `start`.
    fn seed_clocks(slab: &mut Slab, schema: &Schema, start: u64) {
        slab.set_last_update(start);

        // Seconds of the open step that predate `start` are unknown
        let lead_in = start % schema.step;
        for source in 0..schema.sources.len() {
            slab.set_pdp_last_update(source, start);
            slab.set_pdp_unknown_secs(source, lead_in);
        }

        // Pre-count the PDP slots of the open row that predate `start`, so
        // rows keep finalizing on multiples of the archive resolution
        let aligned_steps = normalize(start, schema.step) / schema.step;
        for (archive, def) in schema.archives.iter().enumerate() {
            let elapsed = aligned_steps % def.steps;
            for source in 0..schema.sources.len() {
                slab.set_cdp_elapsed(archive, source, elapsed);
                slab.set_cdp_unknown_steps(archive, source, elapsed);
            }
        }
    }

    /// Builds the per-source and per-archive engines for a schema.
    fn build_engines(schema: &Schema) -> (Vec<PdpAccumulator>, Vec<Archive>) {
        let pdps = schema
            .sources
            .iter()
            .enumerate()
            .map(|(i, def)| PdpAccumulator::new(i, schema.step, def.clone()))
            .collect();
        let archives = schema
            .archives
            .iter()
            .enumerate()
            .map(|(i, def)| Archive::new(i, *def))
            .collect();
        (pdps, archives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::schema::{ConsolidationFn, SourceKind};
    use crate::GyreError;
    use tempfile::TempDir;

    const BASE: u64 = 1_700_000_100; // multiple of 300

    fn small_schema() -> Schema {
        let mut schema = Schema::new(300).unwrap();
        schema
            .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
            .unwrap();
        schema
            .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 10).unwrap())
            .unwrap();
        schema
    }

    fn temp_db(schema: Schema) -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create(dir.path().join("db"), schema, BASE).unwrap();
        (db, dir)
    }

    #[test]
    fn test_create_writes_both_files() {
        let (db, dir) = temp_db(small_schema());
        assert!(dir.path().join("db").join(METADATA_FILE).exists());
        assert!(dir.path().join("db").join(SLAB_FILE).exists());
        assert_eq!(db.last_update(), BASE);
        assert_eq!(db.sample_count(), 0);
    }

    #[test]
    fn test_update_and_fetch_round_trip() {
        let (mut db, _dir) = temp_db(small_schema());

        for k in 1..=5u32 {
            db.update("load", BASE + 300 * u64::from(k), f64::from(k))
                .unwrap();
        }
        assert_eq!(db.sample_count(), 5);
        assert_eq!(db.last_update(), BASE + 1500);

        let chunk = db
            .fetch(&FetchRequest::new(
                ConsolidationFn::Average,
                BASE,
                BASE + 1500,
            ))
            .unwrap();
        let col = chunk.column("load").unwrap();
        assert!(col[0].is_nan());
        assert_eq!(col[1..], [1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_reopen_continues_where_it_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let mut db = Database::create(path.clone(), small_schema(), BASE).unwrap();
            db.update("load", BASE + 300, 7.0).unwrap();
            db.sync().unwrap();
        }

        let mut db = Database::open(&path).unwrap();
        assert_eq!(db.last_update(), BASE + 300);
        assert_eq!(db.sample_count(), 1);

        // The per-source clock persisted: an older sample is rejected
        assert!(db.update("load", BASE + 200, 1.0).is_err());
        db.update("load", BASE + 600, 9.0).unwrap();

        let chunk = db
            .fetch(&FetchRequest::new(
                ConsolidationFn::Average,
                BASE,
                BASE + 600,
            ))
            .unwrap();
        let col = chunk.column("load").unwrap();
        assert_eq!(col[1..], [7.0, 9.0]);
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = Database::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Storage(StorageError::DirectoryAccess { .. })
        ));
    }

    #[test]
    fn test_open_rejects_corrupted_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        Database::create(path.clone(), small_schema(), BASE).unwrap();

        fs::write(path.join(METADATA_FILE), b"{ not json").unwrap();
        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, GyreError::Storage(_)));
    }

    #[test]
    fn test_open_rejects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        Database::create(path.clone(), small_schema(), BASE).unwrap();

        // Rewrite metadata with a same-shaped schema whose hash differs
        let mut other = Schema::new(300).unwrap();
        other
            .add_source(SourceDef::new("load", SourceKind::Gauge, 900).unwrap())
            .unwrap();
        other
            .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 10).unwrap())
            .unwrap();
        Database::write_metadata(&path, &other).unwrap();

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Storage(StorageError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_schema_frozen_after_first_sample() {
        let (mut db, _dir) = temp_db(small_schema());

        // Still mutable before any sample
        db.add_source(SourceDef::new("mem", SourceKind::Gauge, 600).unwrap())
            .unwrap();
        assert_eq!(db.schema().sources.len(), 2);

        db.update("load", BASE + 300, 1.0).unwrap();
        let err = db
            .add_source(SourceDef::new("disk", SourceKind::Gauge, 600).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            GyreError::Schema(SchemaError::SchemaFrozen { samples: 1 })
        ));
        let err = db
            .add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.5, 6, 10).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            GyreError::Schema(SchemaError::SchemaFrozen { samples: 1 })
        ));
    }

    #[test]
    fn test_add_source_rebuilds_slab() {
        let (mut db, _dir) = temp_db(small_schema());
        let before = db.slab_size();

        db.add_source(SourceDef::new("mem", SourceKind::Gauge, 600).unwrap())
            .unwrap();
        assert!(db.slab_size() > before);

        // Both sources are live after the rebuild
        db.update("load", BASE + 300, 1.0).unwrap();
        db.update("mem", BASE + 300, 2.0).unwrap();
        let chunk = db
            .fetch(&FetchRequest::new(
                ConsolidationFn::Average,
                BASE,
                BASE + 300,
            ))
            .unwrap();
        assert_eq!(chunk.names(), ["load", "mem"]);
    }

    #[test]
    fn test_update_unknown_source() {
        let (mut db, _dir) = temp_db(small_schema());
        let err = db.update("bogus", BASE + 300, 1.0).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Update(UpdateError::UnknownSource { name }) if name == "bogus"
        ));
    }

    #[test]
    fn test_sources_advance_independently() {
        let mut schema = small_schema();
        schema
            .add_source(SourceDef::new("mem", SourceKind::Gauge, 600).unwrap())
            .unwrap();
        let (mut db, _dir) = temp_db(schema);

        db.update("load", BASE + 900, 1.0).unwrap();
        // An older timestamp is fine on a different source
        db.update("mem", BASE + 300, 2.0).unwrap();
        assert_eq!(db.last_update(), BASE + 900);

        // But not on the same source
        assert!(db.update("load", BASE + 900, 1.0).is_err());
        assert!(db.update("mem", BASE + 600, 3.0).is_ok());
    }

    #[test]
    fn test_fetch_empty_window_fails() {
        let (db, _dir) = temp_db(small_schema());
        let err = db
            .fetch(&FetchRequest::new(ConsolidationFn::Average, BASE, BASE))
            .unwrap_err();
        assert!(matches!(
            err,
            GyreError::Fetch(FetchError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn test_to_image_is_chronological() {
        let (mut db, _dir) = temp_db(small_schema());
        for k in 1..=5u32 {
            db.update("load", BASE + 300 * u64::from(k), f64::from(k))
                .unwrap();
        }

        let image = db.to_image();
        assert_eq!(image.last_update, BASE + 1500);
        assert_eq!(image.archives[0].current_row, 9);
        // Slots run oldest to newest; the first five predate the data
        assert!(image.archives[0].rows[4][0].is_nan());
        assert_eq!(image.archives[0].rows[5][0], 1.0);
        assert_eq!(image.archives[0].rows[9][0], 5.0);
    }

    #[test]
    fn test_unaligned_start_keeps_rows_on_grid() {
        let mut schema = Schema::new(300).unwrap();
        schema
            .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
            .unwrap();
        schema
            .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.9, 2, 10).unwrap())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        // BASE sits mid-way through a 600 s consolidation row: the absolute
        // grid runs ..., BASE - 300, BASE + 300, BASE + 900, ...
        let mut db = Database::create(dir.path().join("db"), schema, BASE).unwrap();
        db.update("load", BASE + 300, 4.0).unwrap();
        db.update("load", BASE + 600, 6.0).unwrap();
        db.update("load", BASE + 900, 8.0).unwrap();

        let chunk = db
            .fetch(&FetchRequest::new(
                ConsolidationFn::Average,
                BASE,
                BASE + 900,
            ))
            .unwrap();
        assert_eq!(
            chunk.timestamps().collect::<Vec<_>>(),
            vec![BASE - 300, BASE + 300, BASE + 900]
        );

        let col = chunk.column("load").unwrap();
        // The first row has one pre-start PDP slot; xff 0.9 tolerates it and
        // the average runs over the single observed slot
        assert!(col[0].is_nan());
        assert_eq!(col[1], 4.0);
        assert_eq!(col[2], 7.0);
    }
}
