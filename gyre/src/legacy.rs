//! Legacy binary file import and export.
//!
//! Round-robin databases predating this crate are single binary files laid
//! out as consecutive C struct dumps. The sections appear in a fixed order:
//!
//! ```text
//! ┌────────────┬─────────┬──────────┬───────────┬──────────┬──────────┬─────────┐
//! │ stat_head  │ ds_def  │ rra_def  │ live_head │ pdp_prep │ cdp_prep │ data    │
//! │ magic,     │ per     │ per      │ last      │ per      │ per      │ rings,  │
//! │ cookie,    │ source  │ archive  │ update    │ source   │ arc x src│ row-    │
//! │ counts     │         │          │           │ scratch  │ scratch  │ major   │
//! └────────────┴─────────┴──────────┴───────────┴──────────┴──────────┴─────────┘
//! ```
//!
//! (plus one ring cursor per archive between the scratch sections and the
//! data). All integers, doubles and padding follow the producer's
//! architecture as identified by [`Format::detect`].
//!
//! The functions here translate between that byte layout and a
//! [`LegacyImage`], an architecture-neutral value the database can absorb or
//! produce. Decoding validates everything it touches; a malformed stream
//! fails with a precise [`ImportError`](crate::error::ImportError) instead
//! of producing a half-built image. Encoding checks the image's state
//! vectors against its schema up front, so an inconsistent image is
//! rejected rather than written out.

use crate::codec::{FLOAT_COOKIE, Format, Reader, Writer};
use crate::error::{ImportError, Result};
use crate::schema::{ArchiveDef, ConsolidationFn, Schema, SourceDef, SourceKind};

/// File magic, the first bytes of every legacy file.
const MAGIC: &str = "RRD";

/// Base format version, no sub-second precision.
const VERSION_BASE: &str = "0001";

/// Later format version whose live head carries a microseconds field.
const VERSION_USEC: &str = "0003";

/// Width of the magic field.
const MAGIC_FIELD: usize = 4;

/// Width of the version field.
const VERSION_FIELD: usize = 5;

/// Width of datasource name and kind fields.
const NAME_FIELD: usize = 20;

/// Width of the consolidation function name field.
const CF_FIELD: usize = 20;

/// Width of the textual last-reading field.
const LAST_READING_FIELD: usize = 30;

/// Reserved tail of the file header.
const HEAD_RESERVED: usize = 80;

/// Reserved tail of each datasource definition.
const SOURCE_RESERVED: usize = 56;

/// Reserved tail of each archive definition.
const ARCHIVE_RESERVED: usize = 72;

/// Reserved tail of each datasource's scratch block.
const PDP_RESERVED: usize = 64;

/// Reserved tail of each consolidation scratch block.
const CDP_RESERVED: usize = 64;

/// Upper bound on counts read from the header, to reject corrupt streams
/// before any allocation sized by them.
const MAX_DIMENSION: u64 = 65_536;

/// Architecture-neutral snapshot of one legacy database.
///
/// State vectors index by schema position: one [`LegacySourceState`] per
/// datasource, and per archive one scratch slot and one row value per
/// datasource. [`write_image`] rejects an image whose vectors disagree with
/// its schema.
#[derive(Debug, Clone)]
pub struct LegacyImage {
    /// Step, datasources and archives.
    pub schema: Schema,
    /// Timestamp of the newest accepted sample.
    pub last_update: u64,
    /// Per-datasource scratch, in declaration order.
    pub sources: Vec<LegacySourceState>,
    /// Per-archive scratch and ring contents, in declaration order.
    pub archives: Vec<LegacyArchiveState>,
}

/// Rate accumulation scratch for one datasource.
#[derive(Debug, Clone)]
pub struct LegacySourceState {
    /// The raw last reading; NaN when the file recorded it as unknown.
    pub last_value: f64,
    /// Unknown seconds accumulated in the open step.
    pub unknown_secs: u64,
    /// Rate-seconds accumulated in the open step.
    pub accum: f64,
}

/// Consolidation scratch and ring contents for one archive.
#[derive(Debug, Clone)]
pub struct LegacyArchiveState {
    /// Open CDP accumulator per datasource.
    pub cdp_values: Vec<f64>,
    /// Unknown steps in the open CDP per datasource.
    pub cdp_unknown_steps: Vec<u64>,
    /// Ring slot holding the newest finalized row.
    pub current_row: u64,
    /// Ring contents in raw slot order, one row per slot, one value per
    /// datasource.
    pub rows: Vec<Vec<f64>>,
}

/// Decodes a legacy byte stream into an image.
///
/// # Errors
///
/// Returns [`ImportError`](crate::error::ImportError) when the stream is
/// truncated, carries no cookie, names an unknown datasource kind or
/// consolidation function, or declares inconsistent dimensions; definitions
/// that decode but fail validation surface as
/// [`SchemaError`](crate::error::SchemaError).
#[allow(clippy::cast_possible_truncation)] // counts are capped well below usize::MAX
pub fn read_image(bytes: &[u8]) -> Result<LegacyImage> {
    let format = Format::detect(bytes)?;
    let mut r = Reader::new(bytes, format);

    // stat_head
    let magic = r.read_string(MAGIC_FIELD)?;
    if magic != MAGIC {
        return Err(ImportError::InvalidFormat {
            reason: format!("bad magic '{magic}'"),
        }
        .into());
    }
    let version = r.read_string(VERSION_FIELD)?;
    let has_usec = match version.as_str() {
        VERSION_BASE => false,
        VERSION_USEC => true,
        _ => return Err(ImportError::UnsupportedVersion { version }.into()),
    };
    r.align(format.alignment())?;
    let cookie = r.read_f64()?;
    if cookie != FLOAT_COOKIE {
        return Err(ImportError::InvalidFormat {
            reason: "float cookie does not decode under detected format".to_string(),
        }
        .into());
    }
    let source_count = r.read_uint()?;
    let archive_count = r.read_uint()?;
    let step = r.read_uint()?;
    r.skip(HEAD_RESERVED)?;

    for (label, count) in [("datasource", source_count), ("archive", archive_count)] {
        if count == 0 || count > MAX_DIMENSION {
            return Err(ImportError::InvalidFormat {
                reason: format!("implausible {label} count {count}"),
            }
            .into());
        }
    }

    // ds_def
    let mut schema = Schema::new(step)?;
    for _ in 0..source_count {
        let name = r.read_string(NAME_FIELD)?;
        let kind_name = r.read_string(NAME_FIELD)?;
        let kind = kind_name
            .parse::<SourceKind>()
            .map_err(|_| ImportError::InvalidFormat {
                reason: format!("unknown datasource kind '{kind_name}'"),
            })?;
        let heartbeat = r.read_uint()?;
        r.align(8)?;
        let min = r.read_f64()?;
        let max = r.read_f64()?;
        r.skip(SOURCE_RESERVED)?;
        schema.add_source(SourceDef::bounded(name, kind, heartbeat, min, max)?)?;
    }

    // rra_def
    for _ in 0..archive_count {
        let cf_name = r.read_string(CF_FIELD)?;
        let cf = cf_name
            .parse::<ConsolidationFn>()
            .map_err(|_| ImportError::InvalidFormat {
                reason: format!("unknown consolidation function '{cf_name}'"),
            })?;
        r.align(format.alignment())?;
        let rows = r.read_uint()?;
        let steps = r.read_uint()?;
        r.align(8)?;
        let xff = r.read_f64()?;
        r.skip(ARCHIVE_RESERVED)?;
        schema.add_archive(ArchiveDef::new(cf, xff, steps, rows)?)?;
    }

    // live_head
    r.align(format.alignment())?;
    let last_update = r.read_uint()?;
    if has_usec {
        // Sub-second precision is not retained
        r.read_uint()?;
    }

    // pdp_prep
    let mut sources = Vec::with_capacity(source_count as usize);
    for _ in 0..source_count {
        let last_reading = r.read_string(LAST_READING_FIELD)?;
        r.align(format.alignment())?;
        let unknown_secs = r.read_uint()?;
        r.align(8)?;
        let accum = r.read_f64()?;
        r.skip(PDP_RESERVED)?;
        sources.push(LegacySourceState {
            last_value: parse_last_reading(&last_reading),
            unknown_secs,
            accum,
        });
    }

    // cdp_prep, one block per archive x source
    let mut scratch = Vec::with_capacity(archive_count as usize);
    for _ in 0..archive_count {
        let mut values = Vec::with_capacity(source_count as usize);
        let mut unknowns = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            values.push(r.read_f64()?);
            unknowns.push(r.read_uint()?);
            r.align(8)?;
            r.skip(CDP_RESERVED)?;
        }
        scratch.push((values, unknowns));
    }

    // rra_ptr
    let mut cursors = Vec::with_capacity(archive_count as usize);
    for def in &schema.archives {
        let cursor = r.read_uint()?;
        if cursor >= def.rows {
            return Err(ImportError::InvalidFormat {
                reason: format!("cursor {cursor} out of range for {}-row archive", def.rows),
            }
            .into());
        }
        cursors.push(cursor);
    }

    r.align(8)?;

    // Ring data; check the full extent up front so a short stream cannot
    // trigger a huge allocation first
    let total_rows: u64 = schema.archives.iter().map(|a| a.rows).sum();
    let needed = total_rows
        .checked_mul(source_count)
        .and_then(|cells| cells.checked_mul(8))
        .ok_or_else(|| ImportError::InvalidFormat {
            reason: "ring dimensions overflow".to_string(),
        })?;
    if (r.remaining() as u64) < needed {
        return Err(ImportError::TruncatedFile {
            needed: needed as usize,
            offset: r.position(),
            available: r.remaining(),
        }
        .into());
    }

    let mut archives = Vec::with_capacity(archive_count as usize);
    let defs_and_cursors = schema.archives.iter().zip(cursors).collect::<Vec<_>>();
    for ((values, unknowns), (def, cursor)) in scratch.into_iter().zip(defs_and_cursors) {
        let row_count = def.rows as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(source_count as usize);
            for _ in 0..source_count {
                row.push(r.read_f64()?);
            }
            rows.push(row);
        }
        archives.push(LegacyArchiveState {
            cdp_values: values,
            cdp_unknown_steps: unknowns,
            current_row: cursor,
            rows,
        });
    }

    Ok(LegacyImage {
        schema,
        last_update,
        sources,
        archives,
    })
}

/// Encodes an image as a legacy byte stream under the given convention.
///
/// # Errors
///
/// Returns [`ImportError::InconsistentImage`](crate::error::ImportError::InconsistentImage)
/// when a state vector disagrees with the schema's dimensions, or the ring
/// cursor falls outside its archive.
pub fn write_image(image: &LegacyImage, format: Format) -> Result<Vec<u8>> {
    validate_image(image)?;
    Ok(encode(image, format, VERSION_BASE, false))
}

/// Checks that an image's state vectors line up with its schema.
fn validate_image(image: &LegacyImage) -> Result<()> {
    let schema = &image.schema;
    let sources = schema.sources.len();

    for (label, len, expected) in [
        ("source state", image.sources.len(), sources),
        ("archive state", image.archives.len(), schema.archives.len()),
    ] {
        if len != expected {
            return Err(ImportError::InconsistentImage {
                reason: format!("{len} {label} entries for {expected} definitions"),
            }
            .into());
        }
    }

    for (idx, (state, def)) in image.archives.iter().zip(&schema.archives).enumerate() {
        for (label, len) in [
            ("scratch values", state.cdp_values.len()),
            ("unknown counts", state.cdp_unknown_steps.len()),
        ] {
            if len != sources {
                return Err(ImportError::InconsistentImage {
                    reason: format!("archive {idx} has {len} {label} for {sources} datasources"),
                }
                .into());
            }
        }
        if state.rows.len() as u64 != def.rows {
            return Err(ImportError::InconsistentImage {
                reason: format!(
                    "archive {idx} has {} rows for a {}-row definition",
                    state.rows.len(),
                    def.rows
                ),
            }
            .into());
        }
        if let Some(row) = state.rows.iter().find(|row| row.len() != sources) {
            return Err(ImportError::InconsistentImage {
                reason: format!(
                    "archive {idx} has a {}-value row for {sources} datasources",
                    row.len()
                ),
            }
            .into());
        }
        if state.current_row >= def.rows {
            return Err(ImportError::InconsistentImage {
                reason: format!(
                    "cursor {} out of range for {}-row archive",
                    state.current_row, def.rows
                ),
            }
            .into());
        }
    }

    Ok(())
}

/// Encodes an image under an explicit version.
///
/// Callers check the image with [`validate_image`] first; the indexing here
/// assumes the dimensions line up.
fn encode(image: &LegacyImage, format: Format, version: &str, usec: bool) -> Vec<u8> {
    let mut w = Writer::new(format);
    let schema = &image.schema;

    // stat_head
    w.write_string(MAGIC, MAGIC_FIELD);
    w.write_string(version, VERSION_FIELD);
    w.align(format.alignment());
    w.write_f64(FLOAT_COOKIE);
    w.write_uint(schema.sources.len() as u64);
    w.write_uint(schema.archives.len() as u64);
    w.write_uint(schema.step);
    w.pad(HEAD_RESERVED);

    // ds_def
    for def in &schema.sources {
        w.write_string(&def.name, NAME_FIELD);
        w.write_string(def.kind.name(), NAME_FIELD);
        w.write_uint(def.heartbeat);
        w.align(8);
        w.write_f64(def.min);
        w.write_f64(def.max);
        w.pad(SOURCE_RESERVED);
    }

    // rra_def
    for def in &schema.archives {
        w.write_string(def.cf.name(), CF_FIELD);
        w.align(format.alignment());
        w.write_uint(def.rows);
        w.write_uint(def.steps);
        w.align(8);
        w.write_f64(def.xff);
        w.pad(ARCHIVE_RESERVED);
    }

    // live_head
    w.align(format.alignment());
    w.write_uint(image.last_update);
    if usec {
        w.write_uint(0);
    }

    // pdp_prep
    for state in &image.sources {
        w.write_string(&format_last_reading(state.last_value), LAST_READING_FIELD);
        w.align(format.alignment());
        w.write_uint(state.unknown_secs);
        w.align(8);
        w.write_f64(state.accum);
        w.pad(PDP_RESERVED);
    }

    // cdp_prep
    for state in &image.archives {
        for source in 0..schema.sources.len() {
            w.write_f64(state.cdp_values[source]);
            w.write_uint(state.cdp_unknown_steps[source]);
            w.align(8);
            w.pad(CDP_RESERVED);
        }
    }

    // rra_ptr
    for state in &image.archives {
        w.write_uint(state.current_row);
    }

    w.align(8);

    // Ring data
    for state in &image.archives {
        for row in &state.rows {
            for &value in row {
                w.write_f64(value);
            }
        }
    }

    w.into_bytes()
}

/// Parses the textual last-reading field; "U" and garbage mean unknown.
fn parse_last_reading(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "U" {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Formats a last reading the way legacy producers spell it.
fn format_last_reading(value: f64) -> String {
    if value.is_nan() {
        "U".to_string()
    } else {
        format!("{value:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GyreError;
    use crate::codec::{Endianness, WordWidth};

    const ALL_FORMATS: [Format; 4] = [
        Format {
            endian: Endianness::Big,
            word: WordWidth::W64,
        },
        Format {
            endian: Endianness::Big,
            word: WordWidth::W32,
        },
        Format {
            endian: Endianness::Little,
            word: WordWidth::W64,
        },
        Format {
            endian: Endianness::Little,
            word: WordWidth::W32,
        },
    ];

    fn assert_f64_eq(a: f64, b: f64) {
        assert!(a == b || (a.is_nan() && b.is_nan()), "{a} != {b}");
    }

    fn sample_image() -> LegacyImage {
        let mut schema = Schema::new(300).unwrap();
        schema
            .add_source(SourceDef::bounded("in", SourceKind::Counter, 600, 0.0, 1e9).unwrap())
            .unwrap();
        schema
            .add_source(SourceDef::new("temp", SourceKind::Gauge, 900).unwrap())
            .unwrap();
        schema
            .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 4).unwrap())
            .unwrap();
        schema
            .add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.25, 6, 3).unwrap())
            .unwrap();

        LegacyImage {
            schema,
            last_update: 1_700_000_423,
            sources: vec![
                LegacySourceState {
                    last_value: 1234.0,
                    unknown_secs: 23,
                    accum: 370.2,
                },
                LegacySourceState {
                    last_value: f64::NAN,
                    unknown_secs: 0,
                    accum: 0.0,
                },
            ],
            archives: vec![
                LegacyArchiveState {
                    cdp_values: vec![4.25, f64::NAN],
                    cdp_unknown_steps: vec![0, 1],
                    current_row: 2,
                    rows: vec![
                        vec![1.0, 10.0],
                        vec![2.0, f64::NAN],
                        vec![3.0, 30.0],
                        vec![4.0, 40.0],
                    ],
                },
                LegacyArchiveState {
                    cdp_values: vec![f64::NAN, 7.5],
                    cdp_unknown_steps: vec![2, 0],
                    current_row: 0,
                    rows: vec![
                        vec![5.0, 50.0],
                        vec![f64::NAN, 60.0],
                        vec![7.0, 70.0],
                    ],
                },
            ],
        }
    }

    fn assert_images_match(a: &LegacyImage, b: &LegacyImage) {
        assert_eq!(a.schema.step, b.schema.step);
        assert_eq!(a.schema.archives, b.schema.archives);
        assert_eq!(a.last_update, b.last_update);

        for (sa, sb) in a.schema.sources.iter().zip(&b.schema.sources) {
            assert_eq!(sa.name, sb.name);
            assert_eq!(sa.kind, sb.kind);
            assert_eq!(sa.heartbeat, sb.heartbeat);
            assert_f64_eq(sa.min, sb.min);
            assert_f64_eq(sa.max, sb.max);
        }
        for (sa, sb) in a.sources.iter().zip(&b.sources) {
            assert_f64_eq(sa.last_value, sb.last_value);
            assert_eq!(sa.unknown_secs, sb.unknown_secs);
            assert_f64_eq(sa.accum, sb.accum);
        }
        for (aa, ab) in a.archives.iter().zip(&b.archives) {
            assert_eq!(aa.current_row, ab.current_row);
            assert_eq!(aa.cdp_unknown_steps, ab.cdp_unknown_steps);
            for (va, vb) in aa.cdp_values.iter().zip(&ab.cdp_values) {
                assert_f64_eq(*va, *vb);
            }
            for (ra, rb) in aa.rows.iter().zip(&ab.rows) {
                for (va, vb) in ra.iter().zip(rb) {
                    assert_f64_eq(*va, *vb);
                }
            }
        }
    }

    #[test]
    fn test_round_trip_every_architecture() {
        let image = sample_image();
        for format in ALL_FORMATS {
            let bytes = write_image(&image, format).unwrap();
            let back = read_image(&bytes).unwrap();
            assert_images_match(&image, &back);
        }
    }

    #[test]
    fn test_written_stream_detects_as_its_format() {
        let image = sample_image();
        for format in ALL_FORMATS {
            let bytes = write_image(&image, format).unwrap();
            assert_eq!(Format::detect(&bytes).unwrap(), format);
        }
        // The 64-bit layout puts the cookie at byte 16
        let bytes = write_image(
            &image,
            Format {
                endian: Endianness::Little,
                word: WordWidth::W64,
            },
        )
        .unwrap();
        assert_eq!(bytes[16..24], FLOAT_COOKIE.to_le_bytes());
    }

    #[test]
    fn test_version_0003_reads_and_drops_usec() {
        let image = sample_image();
        let format = Format {
            endian: Endianness::Little,
            word: WordWidth::W64,
        };
        let bytes = encode(&image, format, VERSION_USEC, true);
        let back = read_image(&bytes).unwrap();
        assert_eq!(back.last_update, image.last_update);
        assert_images_match(&image, &back);
    }

    #[test]
    fn test_bad_magic_is_invalid_format() {
        let mut bytes = write_image(
            &sample_image(),
            Format {
                endian: Endianness::Big,
                word: WordWidth::W64,
            },
        )
        .unwrap();
        bytes[0] = b'X';
        let err = read_image(&bytes).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let image = sample_image();
        let format = Format {
            endian: Endianness::Big,
            word: WordWidth::W64,
        };
        let bytes = encode(&image, format, "0002", false);
        let err = read_image(&bytes).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::UnsupportedVersion { version }) if version == "0002"
        ));
    }

    #[test]
    fn test_unknown_datasource_kind() {
        let format = Format {
            endian: Endianness::Big,
            word: WordWidth::W64,
        };
        let mut bytes = write_image(&sample_image(), format).unwrap();
        // First ds_def starts at 128; its kind field starts 20 bytes in
        bytes[148..154].copy_from_slice(b"BOGUS\0");
        let err = read_image(&bytes).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::InvalidFormat { reason }) if reason.contains("BOGUS")
        ));
    }

    #[test]
    fn test_truncated_ring_data() {
        let format = Format {
            endian: Endianness::Little,
            word: WordWidth::W64,
        };
        let bytes = write_image(&sample_image(), format).unwrap();
        let err = read_image(&bytes[..bytes.len() - 9]).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::TruncatedFile { .. })
        ));
    }

    #[test]
    fn test_cursor_out_of_range() {
        let mut image = sample_image();
        image.archives[0].current_row = 99;
        let format = Format {
            endian: Endianness::Little,
            word: WordWidth::W64,
        };
        // Encode directly, bypassing write_image's check, to exercise the
        // decoder's own cursor validation
        let bytes = encode(&image, format, VERSION_BASE, false);
        let err = read_image(&bytes).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::InvalidFormat { reason }) if reason.contains("cursor")
        ));
    }

    #[test]
    fn test_write_image_rejects_mismatched_dimensions() {
        let format = Format {
            endian: Endianness::Little,
            word: WordWidth::W64,
        };

        let mut image = sample_image();
        image.archives[0].cdp_values.pop();
        let err = write_image(&image, format).unwrap_err();
        assert!(matches!(
            err,
            GyreError::Import(ImportError::InconsistentImage { .. })
        ));

        let mut image = sample_image();
        image.sources.pop();
        assert!(write_image(&image, format).is_err());

        let mut image = sample_image();
        image.archives[1].rows.pop();
        assert!(write_image(&image, format).is_err());

        let mut image = sample_image();
        image.archives[0].rows[2].pop();
        assert!(write_image(&image, format).is_err());

        let mut image = sample_image();
        image.archives[0].current_row = 4;
        assert!(write_image(&image, format).is_err());
    }

    #[test]
    fn test_last_reading_parsing() {
        assert!(parse_last_reading("U").is_nan());
        assert!(parse_last_reading("").is_nan());
        assert!(parse_last_reading("not-a-number").is_nan());
        assert_eq!(parse_last_reading("3.25"), 3.25);
        assert_eq!(parse_last_reading(" 42 "), 42.0);

        assert_eq!(format_last_reading(f64::NAN), "U");
        assert_eq!(format_last_reading(3.25), "3.25");
    }
}
