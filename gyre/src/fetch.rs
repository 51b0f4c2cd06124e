//! Archive selection and data retrieval.
//!
//! A fetch names a consolidation function and a half-open-at-the-left time
//! window `(start, end]`; the engine picks the single best archive for it and
//! reads one aligned column per requested datasource. Selection prefers
//! archives that cover the whole window and, among those, the one whose
//! resolution is closest to the requested hint. When no archive covers the
//! window fully, the one overlapping it the most is used instead, and rows
//! outside its retention come back as NaN. A window no candidate overlaps at
//! all is an error, not an empty result.
//!
//! The returned [`DataChunk`] is a dense matrix on the archive's own time
//! axis: row timestamps are consecutive multiples of the archive resolution,
//! and every timestamp marks the end of the interval its row covers.

use serde::Serialize;

use crate::archive::Archive;
use crate::error::{FetchError, Result};
use crate::pdp::normalize;
use crate::schema::{ConsolidationFn, MAX_ROWS_PER_ARCHIVE, Schema};
use crate::slab::Slab;

/// Upper bound on rows in one fetch result.
///
/// Twice `MAX_ROWS_PER_ARCHIVE`, so a full-retention fetch of the largest
/// legal archive is always in bounds. Windows wider than this are rejected
/// before any allocation.
const MAX_FETCH_ROWS: u64 = 2 * MAX_ROWS_PER_ARCHIVE;

/// Parameters of one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Consolidation function the archive must use.
    pub cf: ConsolidationFn,
    /// Exclusive lower bound of the window, in epoch seconds.
    pub start: u64,
    /// Inclusive upper bound of the window, in epoch seconds.
    pub end: u64,
    /// Preferred resolution in seconds; `None` prefers the finest.
    pub resolution: Option<u64>,
    /// Datasources to read, in request order; empty means all of them.
    pub names: Vec<String>,
}

impl FetchRequest {
    /// Creates a request for all datasources at the finest resolution.
    pub fn new(cf: ConsolidationFn, start: u64, end: u64) -> Self {
        Self {
            cf,
            start,
            end,
            resolution: None,
            names: Vec::new(),
        }
    }

    /// Sets the preferred resolution in seconds.
    #[must_use]
    pub fn resolution(mut self, resolution: u64) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Restricts the fetch to the named datasources.
    #[must_use]
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }
}

/// A dense result matrix on one archive's time axis.
#[derive(Debug, Clone, Serialize)]
pub struct DataChunk {
    /// Timestamp of the first row.
    start: u64,
    /// Seconds between consecutive rows.
    resolution: u64,
    /// Number of rows.
    rows: usize,
    /// Column labels, matching `columns` by position.
    names: Vec<String>,
    /// One value column per datasource; NaN marks unknown cells.
    columns: Vec<Vec<f64>>,
}

impl DataChunk {
    /// Timestamp of the first row.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Seconds between consecutive rows.
    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column labels, matching [`DataChunk::columns`] by position.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// All value columns, one per datasource.
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// The column for one datasource, if it was part of the fetch.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(&self.columns[idx])
    }

    /// Row timestamps, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.rows as u64).map(move |i| self.start + i * self.resolution)
    }
}

/// Runs one fetch against the slab.
///
/// # Errors
///
/// Returns [`FetchError::InvalidTimeRange`] for an empty window or one whose
/// row axis would overflow the timestamp domain or exceed `MAX_FETCH_ROWS`,
/// [`FetchError::UnknownSource`] for an unrecognized name and
/// [`FetchError::NoMatchingArchive`] when no archive with the requested
/// consolidation function overlaps the window.
#[allow(clippy::cast_possible_truncation)] // row counts fit usize on 64-bit targets
pub(crate) fn execute(
    schema: &Schema,
    slab: &Slab,
    archives: &[Archive],
    req: &FetchRequest,
) -> Result<DataChunk> {
    if req.start >= req.end {
        return Err(FetchError::InvalidTimeRange {
            start: req.start,
            end: req.end,
        }
        .into());
    }

    let sources = resolve_names(schema, &req.names)?;
    let selected = select_archive(schema, slab.last_update(), req)?;
    let archive = &archives[selected];
    let resolution = archive.resolution(schema.step);

    let first = normalize(req.start, resolution);
    let mut last = normalize(req.end, resolution);
    if last < req.end {
        last = last
            .checked_add(resolution)
            .ok_or(FetchError::InvalidTimeRange {
                start: req.start,
                end: req.end,
            })?;
    }
    let span_rows = (last - first) / resolution;
    if span_rows >= MAX_FETCH_ROWS {
        return Err(FetchError::InvalidTimeRange {
            start: req.start,
            end: req.end,
        }
        .into());
    }
    let rows = (span_rows + 1) as usize;

    let mut names = Vec::with_capacity(sources.len());
    let mut columns = Vec::with_capacity(sources.len());
    for &source in &sources {
        names.push(schema.sources[source].name.clone());
        columns.push(archive.series(slab, source, first, rows, resolution));
    }

    Ok(DataChunk {
        start: first,
        resolution,
        rows,
        names,
        columns,
    })
}

/// Maps requested names to datasource indices; empty means all.
fn resolve_names(schema: &Schema, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        return Ok((0..schema.sources.len()).collect());
    }
    names
        .iter()
        .map(|name| {
            schema
                .source_index(name)
                .ok_or_else(|| FetchError::UnknownSource { name: name.clone() }.into())
        })
        .collect()
}

/// Picks the archive for a window.
///
/// Full matches win over partial ones. Among full matches the resolution
/// closest to the hint wins; among partial matches the largest overlap wins.
/// Strict comparisons keep the earliest declared archive on ties.
#[allow(clippy::cast_possible_wrap)] // timestamps stay far below i64::MAX
fn select_archive(schema: &Schema, last_update: u64, req: &FetchRequest) -> Result<usize> {
    let hint = req.resolution.unwrap_or(1);

    let mut best_full: Option<(usize, u64)> = None;
    let mut best_partial: Option<(usize, i64)> = None;

    for (idx, def) in schema.archives.iter().enumerate() {
        if def.cf != req.cf {
            continue;
        }
        let resolution = schema.resolution(def);
        let newest = normalize(last_update, resolution);
        let oldest = newest as i64 - (resolution * def.rows) as i64;

        if newest >= req.end && oldest < req.start as i64 {
            let distance = resolution.abs_diff(hint);
            if best_full.is_none_or(|(_, d)| distance < d) {
                best_full = Some((idx, distance));
            }
        } else if best_full.is_none() {
            let overlap = newest.min(req.end) as i64 - oldest.max(req.start as i64);
            if overlap > 0 && best_partial.is_none_or(|(_, o)| overlap > o) {
                best_partial = Some((idx, overlap));
            }
        }
    }

    if let Some((idx, _)) = best_full {
        return Ok(idx);
    }
    if let Some((idx, _)) = best_partial {
        return Ok(idx);
    }
    Err(FetchError::NoMatchingArchive {
        cf: req.cf.to_string(),
        start: req.start,
        end: req.end,
    }
    .into())
}
