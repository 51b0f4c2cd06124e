//! Error types for the gyre time-series database.

use thiserror::Error;

/// The main error type for all gyre operations.
///
/// This enum covers all possible error conditions that can occur during
/// database operations, from schema construction to ingestion, query, and
/// legacy import.
#[derive(Error, Debug)]
pub enum GyreError {
    /// Error during schema validation or processing.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error during an update operation (write path).
    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    /// Error during a fetch operation (read path).
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Error during database file I/O.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error while decoding or encoding a legacy binary dump.
    #[error("import error: {0}")]
    Import(#[from] ImportError),

    /// Error from the database pool.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Errors that can occur during schema validation or processing.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The base step is invalid.
    #[error("invalid step {step}: must be at least 1 second")]
    InvalidStep {
        /// The rejected step, in seconds.
        step: u64,
    },

    /// No datasources are configured.
    #[error("at least one datasource must be defined")]
    NoSources,

    /// No archives are configured.
    #[error("at least one archive must be defined")]
    NoArchives,

    /// A datasource name is empty, too long, or contains invalid characters.
    #[error("invalid datasource name '{name}': {reason}")]
    InvalidSourceName {
        /// The rejected name.
        name: String,
        /// Description of what makes the name invalid.
        reason: String,
    },

    /// Two datasources share the same name.
    #[error("duplicate datasource name '{name}'")]
    DuplicateSource {
        /// The conflicting name.
        name: String,
    },

    /// A datasource heartbeat is invalid.
    #[error("invalid heartbeat {heartbeat} for datasource '{name}': must be at least 1 second")]
    InvalidHeartbeat {
        /// The datasource name.
        name: String,
        /// The rejected heartbeat, in seconds.
        heartbeat: u64,
    },

    /// A datasource min/max pair does not form a valid range.
    #[error("invalid bounds for datasource '{name}': min {min} must be below max {max}")]
    InvalidBounds {
        /// The datasource name.
        name: String,
        /// The configured minimum.
        min: f64,
        /// The configured maximum.
        max: f64,
    },

    /// An archive xff is outside the half-open interval `[0, 1)`.
    #[error("invalid xff {xff}: must be within [0, 1)")]
    InvalidXff {
        /// The rejected xff.
        xff: f64,
    },

    /// An archive has a zero steps-per-consolidation count.
    #[error("archive steps must be at least 1")]
    ZeroSteps,

    /// An archive has a zero row count.
    #[error("archive rows must be at least 1")]
    ZeroRows,

    /// An archive row count would produce an unreasonably large file.
    #[error("archive would have {rows} rows (max {max_rows})")]
    TooManyRows {
        /// The requested row count.
        rows: u64,
        /// The maximum allowed rows.
        max_rows: u64,
    },

    /// An archive's time span (step x steps x rows) does not fit in the
    /// timestamp domain.
    #[error("archive span overflows: step {step} x {steps} steps x {rows} rows")]
    ArchiveSpanOverflow {
        /// The schema base step, in seconds.
        step: u64,
        /// The archive's steps-per-consolidation count.
        steps: u64,
        /// The archive's row count.
        rows: u64,
    },

    /// The schema can no longer be changed because samples have been ingested.
    #[error("schema is frozen: the database has already received {samples} sample(s)")]
    SchemaFrozen {
        /// Number of samples the database has ingested.
        samples: u64,
    },

    /// A datasource kind name did not match any known kind.
    #[error("unknown datasource kind '{name}'")]
    UnknownSourceKind {
        /// The unrecognized kind name.
        name: String,
    },

    /// A consolidation function name did not match any known function.
    #[error("unknown consolidation function '{name}'")]
    UnknownConsolidationFn {
        /// The unrecognized function name.
        name: String,
    },
}

/// Errors that can occur during update operations (write path).
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The named datasource does not exist in the schema.
    #[error("unknown datasource '{name}'")]
    UnknownSource {
        /// The name that did not match any datasource.
        name: String,
    },

    /// The sample timestamp does not advance the datasource's clock.
    #[error("non-monotonic update: timestamp {timestamp} is not after last update {last}")]
    NonMonotonic {
        /// The datasource's current last-update time.
        last: u64,
        /// The rejected timestamp.
        timestamp: u64,
    },
}

/// Errors that can occur during fetch operations (read path).
#[derive(Error, Debug)]
pub enum FetchError {
    /// The named datasource does not exist in the schema.
    #[error("unknown datasource '{name}'")]
    UnknownSource {
        /// The name that did not match any datasource.
        name: String,
    },

    /// No archive stores the requested consolidation function, or none
    /// overlaps the requested range.
    #[error("no archive matches consolidation function {cf} over range {start}..{end}")]
    NoMatchingArchive {
        /// The requested consolidation function name.
        cf: String,
        /// The requested range start.
        start: u64,
        /// The requested range end.
        end: u64,
    },

    /// The time range is empty, or so wide that no archive could cover it.
    #[error("invalid time range {start}..{end}")]
    InvalidTimeRange {
        /// The start time.
        start: u64,
        /// The end time.
        end: u64,
    },
}

/// Errors that can occur during database file I/O.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database directory could not be created or accessed.
    #[error("failed to access database directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The metadata file (meta.json) is corrupted or invalid.
    #[error("corrupted metadata file: {reason}")]
    CorruptedMetadata {
        /// Description of what was invalid about the metadata.
        reason: String,
    },

    /// The slab on disk was created from a different schema.
    #[error("schema validation failed: existing schema hash {existing:x} does not match expected {expected:x}")]
    SchemaMismatch {
        /// Hash of the schema found in the existing slab.
        existing: u64,
        /// Hash of the schema in the metadata file.
        expected: u64,
    },

    /// Failed to serialize metadata to JSON.
    #[error("failed to serialize metadata: {0}")]
    MetadataSerialize(#[from] serde_json::Error),

    /// Memory mapping failed.
    #[error("memory mapping failed for file '{path}': {source}")]
    MemoryMap {
        /// The file path that failed to map.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Slab file is corrupted or has an invalid format.
    #[error("slab '{path}' is corrupted: {reason}")]
    CorruptedSlab {
        /// The slab file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// Failed to sync the slab file to disk.
    #[error("failed to sync slab '{path}' to disk: {source}")]
    SyncFailed {
        /// The slab file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while decoding or encoding a legacy binary dump.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The byte stream ended before a required field.
    #[error("truncated file: needed {needed} bytes at offset {offset}, only {available} available")]
    TruncatedFile {
        /// Bytes required by the pending read.
        needed: usize,
        /// The read position.
        offset: usize,
        /// Bytes remaining in the stream.
        available: usize,
    },

    /// The byte stream is not a legacy round-robin database dump.
    #[error("invalid format: {reason}")]
    InvalidFormat {
        /// Description of the mismatch.
        reason: String,
    },

    /// The float cookie was found at an offset matching no known word size.
    #[error("unsupported architecture: float cookie at offset {offset} (expected 12 or 16)")]
    UnsupportedArchitecture {
        /// The offset at which the cookie pattern was found.
        offset: usize,
    },

    /// The dump declares a version this reader does not understand.
    #[error("unsupported version '{version}'")]
    UnsupportedVersion {
        /// The version string from the header.
        version: String,
    },

    /// An image's state vectors do not line up with its schema geometry.
    #[error("inconsistent image: {reason}")]
    InconsistentImage {
        /// Description of the mismatched dimension.
        reason: String,
    },
}

/// Errors that can occur in the database pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Every pool slot is held by an in-use database.
    #[error("pool capacity ({capacity}) exceeded: all pooled databases are in use")]
    CapacityExceeded {
        /// The configured capacity.
        capacity: usize,
    },

    /// A release was attempted for a database the pool does not hold.
    #[error("database '{path}' is not held by this pool")]
    NotPooled {
        /// The offending path.
        path: String,
    },
}

/// Type alias for `Result<T, GyreError>`.
pub type Result<T> = std::result::Result<T, GyreError>;
