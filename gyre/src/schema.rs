//! Schema types for the gyre round-robin database.
//!
//! A schema fixes the shape of a database at creation time: the base sampling
//! step, the datasources that feed it, and the archives that age the data.
//! Every archive stores a fixed number of consolidated rows, so the on-disk
//! footprint of a database is known the moment its schema is complete.

use std::fmt;
use std::hash::{DefaultHasher, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Maximum length of a datasource name in bytes.
///
/// Names are limited to 19 bytes so they fit the fixed-width name fields of
/// the legacy binary dump format.
pub const MAX_SOURCE_NAME: usize = 19;

/// Maximum number of rows allowed in a single archive.
///
/// This prevents excessive file sizes from misconfigured archives. With
/// 8 bytes per slot (f64), this allows up to ~8GB per archive column.
pub(crate) const MAX_ROWS_PER_ARCHIVE: u64 = 1_000_000_000;

/// Definition of a database: base step, datasources, and archives.
///
/// A `Schema` determines the storage layout of a database. Datasources and
/// archives keep their declaration order; that order is also the tie-breaking
/// order during archive selection at fetch time.
///
/// # Example
///
/// ```rust
/// use gyre::schema::{Schema, SourceDef, SourceKind, ArchiveDef, ConsolidationFn};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut schema = Schema::new(300)?;
/// schema.add_source(SourceDef::new("traffic", SourceKind::Counter, 600)?)?;
/// // 1 step per row for a day, 24 steps per row for two years
/// schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 288)?)?;
/// schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 24, 730)?)?;
/// schema.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Base sampling step in seconds.
    ///
    /// Raw samples are normalized to per-second rates on this grid; one
    /// primary data point is produced per step and fed to every archive.
    pub step: u64,

    /// Datasources in declaration order.
    pub sources: Vec<SourceDef>,

    /// Archives in declaration order.
    pub archives: Vec<ArchiveDef>,
}

impl Schema {
    /// Creates an empty schema with the given base step.
    ///
    /// Datasources and archives are added afterwards with [`Schema::add_source`]
    /// and [`Schema::add_archive`].
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidStep`] if `step` is zero.
    pub fn new(step: u64) -> Result<Self> {
        if step == 0 {
            return Err(SchemaError::InvalidStep { step }.into());
        }
        Ok(Self {
            step,
            sources: Vec::new(),
            archives: Vec::new(),
        })
    }

    /// Adds a datasource definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::DuplicateSource`] if a datasource with the same
    /// name already exists, or the definition's own validation error.
    pub fn add_source(&mut self, def: SourceDef) -> Result<()> {
        def.validate()?;
        if self.sources.iter().any(|s| s.name == def.name) {
            return Err(SchemaError::DuplicateSource { name: def.name }.into());
        }
        self.sources.push(def);
        Ok(())
    }

    /// Adds an archive definition.
    ///
    /// # Errors
    ///
    /// Returns the definition's validation error if it is invalid.
    pub fn add_archive(&mut self, def: ArchiveDef) -> Result<()> {
        def.validate()?;
        self.archives.push(def);
        Ok(())
    }

    /// Validates the complete schema.
    ///
    /// A complete schema needs a nonzero step, at least one datasource, and
    /// at least one archive. Individual definitions are re-validated so a
    /// schema assembled through struct literals gets the same checks as one
    /// built through the add methods. Each archive's total span
    /// (step x steps x rows seconds) must fit the timestamp domain.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(SchemaError::InvalidStep { step: self.step }.into());
        }
        if self.sources.is_empty() {
            return Err(SchemaError::NoSources.into());
        }
        if self.archives.is_empty() {
            return Err(SchemaError::NoArchives.into());
        }

        for (i, source) in self.sources.iter().enumerate() {
            source.validate()?;
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(SchemaError::DuplicateSource {
                    name: source.name.clone(),
                }
                .into());
            }
        }

        for archive in &self.archives {
            archive.validate()?;
            // Timestamp math downstream treats archive spans as i64 offsets
            // from the newest row; a span past i64::MAX can never be addressed.
            if self
                .step
                .checked_mul(archive.steps)
                .and_then(|resolution| resolution.checked_mul(archive.rows))
                .is_none_or(|span| span > i64::MAX as u64)
            {
                return Err(SchemaError::ArchiveSpanOverflow {
                    step: self.step,
                    steps: archive.steps,
                    rows: archive.rows,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Looks up a datasource index by name.
    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Returns the consolidation period of an archive in seconds.
    ///
    /// This is `step * archive.steps`, the wall-clock time covered by one
    /// archive row. [`Schema::validate`] bounds the full archive span, so
    /// the product cannot overflow for a validated schema.
    pub fn resolution(&self, archive: &ArchiveDef) -> u64 {
        self.step * archive.steps
    }

    /// Computes a stable hash of this schema.
    ///
    /// The hash is stored in the slab header and checked when reopening a
    /// database, so a slab can never be interpreted through a schema other
    /// than the one that created it. All definition fields participate,
    /// including datasource names (they identify columns).
    ///
    /// # Returns
    ///
    /// A 64-bit hash that should remain stable across gyre versions.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        hasher.write_u64(self.step);
        hasher.write_usize(self.sources.len());
        for source in &self.sources {
            hasher.write(source.name.as_bytes());
            hasher.write_u8(source.kind as u8);
            hasher.write_u64(source.heartbeat);
            hasher.write_u64(source.min.to_bits());
            hasher.write_u64(source.max.to_bits());
        }
        hasher.write_usize(self.archives.len());
        for archive in &self.archives {
            hasher.write_u8(archive.cf as u8);
            hasher.write_u64(archive.xff.to_bits());
            hasher.write_u64(archive.steps);
            hasher.write_u64(archive.rows);
        }

        hasher.finish()
    }
}

/// How raw sample values of a datasource are turned into per-second rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceKind {
    /// The raw value already is a rate; stored as-is.
    Gauge,

    /// A monotonically increasing counter; the rate is the delta to the
    /// previous reading divided by elapsed time, with 32-bit and 64-bit
    /// wrap correction.
    Counter,

    /// Like [`SourceKind::Counter`] but without wrap correction, so the
    /// rate may be negative.
    Derive,

    /// The counter resets on every read; the rate is the raw value divided
    /// by elapsed time.
    Absolute,
}

impl SourceKind {
    /// Returns the canonical upper-case name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            n if n.eq_ignore_ascii_case("GAUGE") => Ok(Self::Gauge),
            n if n.eq_ignore_ascii_case("COUNTER") => Ok(Self::Counter),
            n if n.eq_ignore_ascii_case("DERIVE") => Ok(Self::Derive),
            n if n.eq_ignore_ascii_case("ABSOLUTE") => Ok(Self::Absolute),
            other => Err(SchemaError::UnknownSourceKind {
                name: other.to_string(),
            }),
        }
    }
}

/// Definition of a single datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    /// Datasource name; unique within a schema, `[A-Za-z0-9_]`, at most
    /// [`MAX_SOURCE_NAME`] bytes.
    pub name: String,

    /// How raw values become rates.
    pub kind: SourceKind,

    /// Maximum tolerated gap between samples, in seconds.
    ///
    /// When two samples are further apart than this, the whole gap counts
    /// as unknown regardless of the values.
    pub heartbeat: u64,

    /// Lower bound on accepted rates; NaN means unbounded.
    #[serde(with = "nan_as_null")]
    pub min: f64,

    /// Upper bound on accepted rates; NaN means unbounded.
    #[serde(with = "nan_as_null")]
    pub max: f64,
}

impl SourceDef {
    /// Creates an unbounded datasource definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the name or heartbeat is invalid.
    pub fn new(name: impl Into<String>, kind: SourceKind, heartbeat: u64) -> Result<Self> {
        let def = Self {
            name: name.into(),
            kind,
            heartbeat,
            min: f64::NAN,
            max: f64::NAN,
        };
        def.validate()?;
        Ok(def)
    }

    /// Creates a datasource definition with rate bounds.
    ///
    /// Either bound may be NaN for "unbounded on that side". Rates outside
    /// the bounds are treated as unknown, not clamped.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the name, heartbeat, or bounds are invalid.
    pub fn bounded(
        name: impl Into<String>,
        kind: SourceKind,
        heartbeat: u64,
        min: f64,
        max: f64,
    ) -> Result<Self> {
        let def = Self {
            name: name.into(),
            kind,
            heartbeat,
            min,
            max,
        };
        def.validate()?;
        Ok(def)
    }

    /// Validates this definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SchemaError::InvalidSourceName {
                name: self.name.clone(),
                reason: "name is empty".to_string(),
            }
            .into());
        }
        if self.name.len() > MAX_SOURCE_NAME {
            return Err(SchemaError::InvalidSourceName {
                name: self.name.clone(),
                reason: format!("name exceeds {MAX_SOURCE_NAME} bytes"),
            }
            .into());
        }
        if !self
            .name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(SchemaError::InvalidSourceName {
                name: self.name.clone(),
                reason: "only ASCII letters, digits, and '_' are allowed".to_string(),
            }
            .into());
        }
        if self.heartbeat == 0 {
            return Err(SchemaError::InvalidHeartbeat {
                name: self.name.clone(),
                heartbeat: self.heartbeat,
            }
            .into());
        }
        // NaN bounds compare false, so this only fires when both are set.
        if self.min >= self.max {
            return Err(SchemaError::InvalidBounds {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            }
            .into());
        }
        Ok(())
    }
}

/// Definition of a single archive (one consolidated ring buffer per
/// datasource).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDef {
    /// Consolidation function applied to each group of `steps` primary
    /// data points.
    pub cf: ConsolidationFn,

    /// Xfiles factor: the fraction of a consolidation window that may be
    /// unknown while the consolidated value still counts as known.
    /// Within `[0, 1)`.
    pub xff: f64,

    /// Primary data points per consolidated row.
    pub steps: u64,

    /// Ring capacity in rows. Fixed for the lifetime of the database.
    pub rows: u64,
}

impl ArchiveDef {
    /// Creates an archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the configuration is invalid.
    pub fn new(cf: ConsolidationFn, xff: f64, steps: u64, rows: u64) -> Result<Self> {
        let def = Self {
            cf,
            xff,
            steps,
            rows,
        };
        def.validate()?;
        Ok(def)
    }

    /// Validates this definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if !(self.xff >= 0.0 && self.xff < 1.0) {
            return Err(SchemaError::InvalidXff { xff: self.xff }.into());
        }
        if self.steps == 0 {
            return Err(SchemaError::ZeroSteps.into());
        }
        if self.rows == 0 {
            return Err(SchemaError::ZeroRows.into());
        }
        if self.rows > MAX_ROWS_PER_ARCHIVE {
            return Err(SchemaError::TooManyRows {
                rows: self.rows,
                max_rows: MAX_ROWS_PER_ARCHIVE,
            }
            .into());
        }
        Ok(())
    }
}

/// Aggregation function for consolidating primary data points into archive
/// rows.
///
/// Consolidation runs incrementally: each primary data point is folded into
/// a running accumulator with [`ConsolidationFn::accumulate`], and the row
/// value is produced by [`ConsolidationFn::finalize`] once the window closes.
/// NaN inputs never participate in the fold; the caller counts them toward
/// the unknown-step total instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Arithmetic mean of the known values in the window.
    Average,

    /// Minimum of the known values in the window.
    Min,

    /// Maximum of the known values in the window.
    Max,

    /// The last known value in the window.
    Last,
}

impl ConsolidationFn {
    /// Folds one known value into the running accumulator.
    ///
    /// The accumulator starts each window as NaN; the first known value
    /// replaces it unconditionally.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gyre::schema::ConsolidationFn;
    ///
    /// let mut acc = f64::NAN;
    /// for v in [3.0, 1.0, 2.0] {
    ///     acc = ConsolidationFn::Min.accumulate(acc, v);
    /// }
    /// assert_eq!(acc, 1.0);
    /// ```
    pub fn accumulate(self, acc: f64, value: f64) -> f64 {
        if acc.is_nan() {
            return value;
        }
        match self {
            Self::Average => acc + value,
            Self::Min => acc.min(value),
            Self::Max => acc.max(value),
            Self::Last => value,
        }
    }

    /// Produces the row value from a finished accumulator.
    ///
    /// `valid_steps` is the number of known values that were folded in;
    /// only [`ConsolidationFn::Average`] uses it.
    #[allow(clippy::cast_precision_loss)] // step counts are far below 2^52
    pub fn finalize(self, acc: f64, valid_steps: u64) -> f64 {
        match self {
            Self::Average => {
                if valid_steps == 0 {
                    f64::NAN
                } else {
                    acc / valid_steps as f64
                }
            }
            Self::Min | Self::Max | Self::Last => acc,
        }
    }

    /// Returns the canonical upper-case name of this function.
    pub fn name(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConsolidationFn {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            n if n.eq_ignore_ascii_case("AVERAGE") => Ok(Self::Average),
            n if n.eq_ignore_ascii_case("MIN") => Ok(Self::Min),
            n if n.eq_ignore_ascii_case("MAX") => Ok(Self::Max),
            n if n.eq_ignore_ascii_case("LAST") => Ok(Self::Last),
            other => Err(SchemaError::UnknownConsolidationFn {
                name: other.to_string(),
            }),
        }
    }
}

/// Serde support for NaN-as-unbounded f64 fields.
///
/// JSON has no NaN literal, so unbounded min/max values are serialized as
/// `null` and read back as NaN.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_nan() {
            None
        } else {
            Some(*value)
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(value.unwrap_or(f64::NAN))
    }
}
