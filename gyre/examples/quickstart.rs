//! Walkthrough of the core gyre workflow.
//!
//! Creates a small database, feeds it an hour of gauge and counter samples,
//! and reads the data back at two resolutions.

use gyre::{ArchiveDef, ConsolidationFn, Database, FetchRequest, Schema, SourceDef, SourceKind};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = "./quickstart_db";

    // 300 s base step: one primary data point every five minutes
    let mut schema = Schema::new(300)?;

    // A gauge stores the sampled value itself; a counter is turned into a
    // per-second rate from consecutive raw readings
    schema.add_source(SourceDef::new("temp_c", SourceKind::Gauge, 600)?)?;
    schema.add_source(SourceDef::bounded(
        "octets_in",
        SourceKind::Counter,
        600,
        0.0,
        1.0e9,
    )?)?;

    // Five-minute detail for a day, plus half-hour averages and peaks kept
    // for a week
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 288)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 6, 336)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.5, 6, 336)?)?;

    let start = 1_700_000_000u64;
    let mut db = Database::create(db_path, schema, start)?;
    println!(
        "Created {} ({} bytes on disk, schema hash {:016x})",
        db_path,
        db.slab_size(),
        db.schema().stable_hash()
    );

    // One hour of samples at the base step
    let mut octets = 0.0f64;
    for k in 1..=12u32 {
        let t = start + u64::from(k) * 300;
        let temp = 20.0 + (f64::from(k) * 0.7).sin() * 5.0;
        octets += 40_000.0 + f64::from(k) * 1_500.0;
        db.update("temp_c", t, temp)?;
        db.update("octets_in", t, octets)?;
    }
    db.sync()?;
    println!(
        "Ingested {} samples, last update at {}",
        db.sample_count(),
        db.last_update()
    );

    // Read back the fine tier: one row per 300 s step
    let fine = db.fetch(&FetchRequest::new(
        ConsolidationFn::Average,
        start,
        start + 3600,
    ))?;
    println!(
        "\nFine tier: {} rows at {} s resolution",
        fine.rows(),
        fine.resolution()
    );
    let temps = fine.column("temp_c").ok_or("missing column")?;
    let rates = fine.column("octets_in").ok_or("missing column")?;
    for (t, (temp, rate)) in fine.timestamps().zip(temps.iter().zip(rates)) {
        if temp.is_nan() && rate.is_nan() {
            println!("  t+{:>4}s: no data", t - start);
        } else {
            println!("  t+{:>4}s: temp={:.1} C, in={:.0} B/s", t - start, temp, rate);
        }
    }

    // The same window at half-hour resolution, averages next to peaks
    let avg = db.fetch(
        &FetchRequest::new(ConsolidationFn::Average, start, start + 3600).resolution(1800),
    )?;
    let max = db.fetch(
        &FetchRequest::new(ConsolidationFn::Max, start, start + 3600).resolution(1800),
    )?;
    println!("\nCoarse tier ({} s windows):", avg.resolution());
    let avg_temps = avg.column("temp_c").ok_or("missing column")?;
    let max_temps = max.column("temp_c").ok_or("missing column")?;
    for (t, (a, m)) in avg.timestamps().zip(avg_temps.iter().zip(max_temps)) {
        println!("  t+{:>4}s: avg={:.1} C, peak={:.1} C", t - start, a, m);
    }

    // Clean up the demo directory
    if std::path::Path::new(db_path).exists() {
        std::fs::remove_dir_all(db_path)?;
        println!("\nCleaned up {db_path}");
    }

    Ok(())
}
