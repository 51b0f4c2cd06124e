//! Round trip through the legacy binary dump format.
//!
//! Builds a database, exports it under a foreign byte convention, detects
//! the convention from the bytes alone, imports it into a fresh directory,
//! and keeps updating the imported copy.

use gyre::codec::{Endianness, Format, WordWidth};
use gyre::{ArchiveDef, ConsolidationFn, Database, FetchRequest, Schema, SourceDef, SourceKind};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let original_path = "./bridge_original_db";
    let imported_path = "./bridge_imported_db";

    let mut schema = Schema::new(300)?;
    schema.add_source(SourceDef::new("load", SourceKind::Gauge, 600)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 12)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.5, 6, 4)?)?;

    let start = 1_700_001_000u64;
    let mut db = Database::create(original_path, schema, start)?;
    for k in 1..=12u32 {
        db.update("load", start + u64::from(k) * 300, f64::from(k) * 0.25)?;
    }

    // Export as a big-endian 32-bit dump, the layout an old SPARC or ARM
    // build would have produced
    let bytes = db.export_legacy(Format {
        endian: Endianness::Big,
        word: WordWidth::W32,
    })?;
    println!("Exported {} bytes", bytes.len());

    // Nothing but the bytes identifies the convention
    let detected = Format::detect(&bytes)?;
    println!(
        "Detected {:?} byte order, {}-bit words",
        detected.endian,
        detected.word.bytes() * 8
    );

    let mut imported = Database::import_legacy(imported_path, &bytes)?;
    println!(
        "Imported into {} (last update {})",
        imported_path,
        imported.last_update()
    );

    // Both databases answer fetches identically
    let req = FetchRequest::new(ConsolidationFn::Average, start, start + 3600);
    let a = db.fetch(&req)?;
    let b = imported.fetch(&req)?;
    println!("\nOriginal vs imported, fine tier:");
    let col_a = a.column("load").ok_or("missing column")?;
    let col_b = b.column("load").ok_or("missing column")?;
    for (t, (va, vb)) in a.timestamps().zip(col_a.iter().zip(col_b)) {
        println!("  t+{:>4}s: {:>6.2} | {:>6.2}", t - start, va, vb);
    }

    // The imported copy is a full database; the stream can continue
    for k in 13..=15u32 {
        imported.update("load", start + u64::from(k) * 300, f64::from(k) * 0.25)?;
    }
    println!(
        "\nContinued the imported copy to {} samples",
        imported.sample_count()
    );

    for path in [original_path, imported_path] {
        if std::path::Path::new(path).exists() {
            std::fs::remove_dir_all(path)?;
        }
    }
    println!("Cleaned up demo directories");

    Ok(())
}
