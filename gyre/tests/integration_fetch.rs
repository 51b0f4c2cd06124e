//! Integration tests for archive selection and fetch shaping.
//!
//! One database with a fine and a coarse AVERAGE tier plus a MAX tier is
//! queried under different windows, hints and name lists to verify which
//! archive answers, how the axis is aligned, and how rows outside retention
//! or past the data edge are padded.

use gyre::error::FetchError;
use gyre::{
    ArchiveDef, ConsolidationFn, DataChunk, Database, FetchRequest, GyreError, Schema, SourceDef,
    SourceKind,
};
use tempfile::{tempdir, TempDir};

/// Sample epoch origin, a multiple of the 1800 s coarse window span.
const ALIGNED: u64 = 1_700_001_000;

/// Helper: asserts one column cell by cell, treating NaN cells as equal.
fn assert_column(chunk: &DataChunk, name: &str, expected: &[f64]) {
    let col = chunk.column(name).unwrap();
    assert_eq!(col.len(), expected.len(), "row count for '{name}'");
    for (i, (got, want)) in col.iter().zip(expected).enumerate() {
        assert!(
            (got.is_nan() && want.is_nan()) || got == want,
            "{name}[{i}]: expected {want}, got {got}"
        );
    }
}

/// Helper: two gauges over three archives (fine AVERAGE, coarse AVERAGE,
/// coarse MAX), loaded with two hours of data: load k, mem 100 + k for
/// k = 1..=24 at 300 s intervals.
fn loaded_stack() -> (TempDir, Database) {
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_source(SourceDef::new("mem", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 12).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 6, 12).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.5, 6, 12).unwrap())
        .unwrap();

    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("stack"), schema, ALIGNED).unwrap();
    for k in 1..=24u32 {
        let t = ALIGNED + u64::from(k) * 300;
        db.update("load", t, f64::from(k)).unwrap();
        db.update("mem", t, f64::from(100 + k)).unwrap();
    }
    (dir, db)
}

#[test]
fn test_full_coverage_prefers_finest() {
    let (_dir, db) = loaded_stack();

    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED + 4000, ALIGNED + 7000);
    let chunk = db.fetch(&req).unwrap();

    // Both AVERAGE tiers cover the window; without a hint the 300 s one wins
    assert_eq!(chunk.resolution(), 300);
    assert_eq!(chunk.start(), ALIGNED + 3900);
    assert_eq!(chunk.rows(), 12);
    let expected: Vec<f64> = (13..=24).map(f64::from).collect();
    assert_column(&chunk, "load", &expected);
}

#[test]
fn test_resolution_hint_selects_coarser_tier() {
    let (_dir, db) = loaded_stack();

    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED + 4000, ALIGNED + 7000)
        .resolution(1800);
    let chunk = db.fetch(&req).unwrap();

    assert_eq!(chunk.resolution(), 1800);
    assert_eq!(
        chunk.timestamps().collect::<Vec<_>>(),
        vec![ALIGNED + 3600, ALIGNED + 5400, ALIGNED + 7200]
    );
    assert_column(&chunk, "load", &[9.5, 15.5, 21.5]);
    assert_column(&chunk, "mem", &[109.5, 115.5, 121.5]);
}

#[test]
fn test_partial_coverage_falls_back_to_full_archive() {
    let (_dir, db) = loaded_stack();

    // The fine tier only retains one hour; a window reaching further back
    // is answered by the coarse tier even though the hint prefers fine
    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED + 1000, ALIGNED + 7000);
    let chunk = db.fetch(&req).unwrap();

    assert_eq!(chunk.resolution(), 1800);
    assert_column(&chunk, "load", &[f64::NAN, 3.5, 9.5, 15.5, 21.5]);
}

#[test]
fn test_declaration_order_breaks_overlap_ties() {
    let (_dir, db) = loaded_stack();

    // A window reaching past the data edge has no full match and both
    // AVERAGE tiers overlap it equally; the first declared archive answers
    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED + 6000, ALIGNED + 9000);
    let chunk = db.fetch(&req).unwrap();

    assert_eq!(chunk.resolution(), 300);
    assert_column(
        &chunk,
        "load",
        &[
            20.0,
            21.0,
            22.0,
            23.0,
            24.0,
            f64::NAN,
            f64::NAN,
            f64::NAN,
            f64::NAN,
            f64::NAN,
            f64::NAN,
        ],
    );
}

#[test]
fn test_no_archive_for_requested_cf() {
    let (_dir, db) = loaded_stack();

    let req = FetchRequest::new(ConsolidationFn::Last, ALIGNED + 4000, ALIGNED + 7000);
    let err = db.fetch(&req).unwrap_err();
    assert!(matches!(
        err,
        GyreError::Fetch(FetchError::NoMatchingArchive { cf, .. }) if cf == "LAST"
    ));
}

#[test]
fn test_window_outside_all_retention_is_an_error() {
    let dir = tempdir().unwrap();
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 12).unwrap())
        .unwrap();
    let mut db = Database::create(dir.path().join("short"), schema, ALIGNED).unwrap();
    for k in 1..=24u32 {
        db.update("load", ALIGNED + u64::from(k) * 300, f64::from(k))
            .unwrap();
    }

    // The single archive retains one hour; a window entirely before that
    // horizon overlaps nothing
    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED - 100_000, ALIGNED - 90_000);
    let err = db.fetch(&req).unwrap_err();
    assert!(matches!(
        err,
        GyreError::Fetch(FetchError::NoMatchingArchive { .. })
    ));
}

#[test]
fn test_name_selection_and_order() {
    let (_dir, db) = loaded_stack();

    let all = db
        .fetch(&FetchRequest::new(
            ConsolidationFn::Average,
            ALIGNED + 6900,
            ALIGNED + 7200,
        ))
        .unwrap();
    assert_eq!(all.names(), ["load", "mem"]);
    assert_eq!(all.columns().len(), 2);

    // Explicit names come back in request order, not declaration order
    let picked = db
        .fetch(
            &FetchRequest::new(ConsolidationFn::Average, ALIGNED + 6900, ALIGNED + 7200)
                .names(["mem", "load"]),
        )
        .unwrap();
    assert_eq!(picked.names(), ["mem", "load"]);
    assert_column(&picked, "mem", &[123.0, 124.0]);
    assert_column(&picked, "load", &[23.0, 24.0]);

    let err = db
        .fetch(
            &FetchRequest::new(ConsolidationFn::Average, ALIGNED + 6900, ALIGNED + 7200)
                .names(["bogus"]),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GyreError::Fetch(FetchError::UnknownSource { name }) if name == "bogus"
    ));
}

#[test]
fn test_empty_window_is_rejected() {
    let (_dir, db) = loaded_stack();

    for (start, end) in [(ALIGNED + 600, ALIGNED + 600), (ALIGNED + 900, ALIGNED + 600)] {
        let err = db
            .fetch(&FetchRequest::new(ConsolidationFn::Average, start, end))
            .unwrap_err();
        assert!(matches!(
            err,
            GyreError::Fetch(FetchError::InvalidTimeRange { .. })
        ));
    }
}

#[test]
fn test_window_past_time_domain_is_rejected() {
    let (_dir, db) = loaded_stack();

    // An end this close to u64::MAX cannot be bumped onto the next grid line
    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED + 300, u64::MAX - 10);
    let err = db.fetch(&req).unwrap_err();
    assert!(matches!(
        err,
        GyreError::Fetch(FetchError::InvalidTimeRange { .. })
    ));
}
