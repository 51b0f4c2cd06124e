//! Integration tests for multi-step consolidation.
//!
//! These tests feed one sample stream through archives with different
//! consolidation functions and window widths, then verify the finished rows
//! through `Database::fetch`: window alignment to the absolute epoch grid,
//! xff handling, ring eviction, bulk runs from a single update, and
//! persistence of half-built windows across reopen.

use gyre::{
    ArchiveDef, ConsolidationFn, DataChunk, Database, FetchRequest, Schema, SourceDef, SourceKind,
};
use tempfile::tempdir;

/// Sample epoch origin, an odd multiple of the 300 s step. Deliberately not
/// on any coarse window boundary.
const BASE: u64 = 1_700_000_100;

/// Alternative origin that is a multiple of every window span used here
/// (1800 s and 3000 s), so consolidation windows open exactly at creation.
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

/// Helper: one gauge datasource plus one archive per consolidation function,
/// each consolidating 6 steps into 10 rows.
fn four_tier_schema() -> Schema {
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    for cf in [
        ConsolidationFn::Average,
        ConsolidationFn::Min,
        ConsolidationFn::Max,
        ConsolidationFn::Last,
    ] {
        schema
            .add_archive(ArchiveDef::new(cf, 0.5, 6, 10).unwrap())
            .unwrap();
    }
    schema
}

#[test]
fn test_one_stream_feeds_every_tier() {
    let dir = tempdir().unwrap();
    let mut db = Database::create(dir.path().join("tiers"), four_tier_schema(), BASE).unwrap();

    for k in 1..=12u32 {
        db.update("load", BASE + u64::from(k) * 300, f64::from(k))
            .unwrap();
    }

    // The database began mid-window: the first 1800 s window ends at
    // BASE + 900 and its three pre-creation steps count as unknown. With
    // xff = 0.5 that is exactly tolerable, so the first row consolidates
    // the three observed steps (1, 2, 3) alone. The second window covers
    // steps 4 through 9 in full.
    for (cf, first, second) in [
        (ConsolidationFn::Average, 2.0, 6.5),
        (ConsolidationFn::Min, 1.0, 4.0),
        (ConsolidationFn::Max, 3.0, 9.0),
        (ConsolidationFn::Last, 3.0, 9.0),
    ] {
        let req = FetchRequest::new(cf, BASE, BASE + 2700);
        let chunk = db.fetch(&req).unwrap();
        assert_eq!(chunk.resolution(), 1800, "{cf:?}");
        assert_eq!(
            chunk.timestamps().collect::<Vec<_>>(),
            vec![BASE - 900, BASE + 900, BASE + 2700],
            "{cf:?}"
        );
        assert_column(&chunk, "load", &[f64::NAN, first, second]);
    }
}

#[test]
fn test_ring_eviction_through_fetch() {
    let dir = tempdir().unwrap();
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 4).unwrap())
        .unwrap();
    let mut db = Database::create(dir.path().join("ring"), schema, BASE).unwrap();

    // Seven rows into a four-row ring evict the oldest three
    for k in 1..=7u32 {
        db.update("load", BASE + u64::from(k) * 300, f64::from(k))
            .unwrap();
    }

    let req = FetchRequest::new(ConsolidationFn::Average, BASE, BASE + 2100);
    let chunk = db.fetch(&req).unwrap();
    assert_column(
        &chunk,
        "load",
        &[f64::NAN, f64::NAN, f64::NAN, f64::NAN, 4.0, 5.0, 6.0, 7.0],
    );
}

#[test]
fn test_single_update_fills_ring_in_bulk() {
    let dir = tempdir().unwrap();
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 18_000).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 2, 4).unwrap())
        .unwrap();
    let mut db = Database::create(dir.path().join("bulk"), schema, BASE).unwrap();

    db.update("load", BASE + 300, 4.0).unwrap();
    // One update spanning 3000 s within the heartbeat closes ten steps at
    // once; the five whole windows they form overrun the four-row ring
    db.update("load", BASE + 3300, 8.0).unwrap();
    assert_eq!(db.sample_count(), 2);

    let req = FetchRequest::new(ConsolidationFn::Average, BASE + 300, BASE + 3300);
    let chunk = db.fetch(&req).unwrap();
    assert_column(
        &chunk,
        "load",
        &[f64::NAN, f64::NAN, 8.0, 8.0, 8.0, 8.0],
    );
}

#[test]
fn test_xff_discards_sparse_windows() {
    let dir = tempdir().unwrap();
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 10, 5).unwrap())
        .unwrap();
    let mut db = Database::create(dir.path().join("xff"), schema, ALIGNED).unwrap();

    // First window: 5 unknown steps out of 10 sits exactly at the xff limit
    for k in 1..=10u32 {
        let value = if k <= 5 { f64::NAN } else { 2.0 };
        db.update("load", ALIGNED + u64::from(k) * 300, value).unwrap();
    }
    // Second window: 6 unknown steps out of 10 crosses it
    for k in 11..=20u32 {
        let value = if k <= 16 { f64::NAN } else { 4.0 };
        db.update("load", ALIGNED + u64::from(k) * 300, value).unwrap();
    }

    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED, ALIGNED + 6000);
    let chunk = db.fetch(&req).unwrap();
    assert_column(&chunk, "load", &[f64::NAN, 2.0, f64::NAN]);
}

#[test]
fn test_half_built_window_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("resume");
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 6, 10).unwrap())
        .unwrap();

    {
        let mut db = Database::create(&path, schema, ALIGNED).unwrap();
        for k in 1..=3u32 {
            db.update("load", ALIGNED + u64::from(k) * 300, f64::from(k))
                .unwrap();
        }
        db.sync().unwrap();
    }

    // The window is half built at close; its running state must persist
    let mut db = Database::open(&path).unwrap();
    for k in 4..=6u32 {
        db.update("load", ALIGNED + u64::from(k) * 300, f64::from(k))
            .unwrap();
    }

    let req = FetchRequest::new(ConsolidationFn::Average, ALIGNED, ALIGNED + 1800);
    let chunk = db.fetch(&req).unwrap();
    assert_column(&chunk, "load", &[f64::NAN, 3.5]);
}

#[test]
fn test_unaligned_creation_stays_on_absolute_grid() {
    let dir = tempdir().unwrap();
    let mut schema = Schema::new(300).unwrap();
    schema
        .add_source(SourceDef::new("load", SourceKind::Gauge, 600).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 12).unwrap())
        .unwrap();
    schema
        .add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 2, 12).unwrap())
        .unwrap();
    // BASE is 300 past a 600 s boundary, so the first coarse window is
    // already half spent when the database comes up
    let mut db = Database::create(dir.path().join("grid"), schema, BASE).unwrap();

    for k in 1..=6u32 {
        db.update("load", BASE + u64::from(k) * 300, f64::from(k))
            .unwrap();
    }

    let req =
        FetchRequest::new(ConsolidationFn::Average, BASE, BASE + 1500).resolution(600);
    let chunk = db.fetch(&req).unwrap();

    assert_eq!(chunk.resolution(), 600);
    // Rows land on absolute multiples of the window span, not on offsets
    // from the creation time
    assert!(chunk.timestamps().all(|t| t.is_multiple_of(600)));
    assert_column(&chunk, "load", &[f64::NAN, 1.0, 2.5, 4.5]);
}
