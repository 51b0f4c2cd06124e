//! CLI for the gyre round-robin time-series database.
//!
//! Provides commands for creating, feeding, querying, and converting gyre
//! databases, including import from and export to legacy binary dumps.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use gyre::codec::{Endianness, Format, WordWidth};
use gyre::{ArchiveDef, ConsolidationFn, Database, FetchRequest, Schema, SourceDef, SourceKind};

/// gyre: round-robin time-series database CLI.
#[derive(Parser)]
#[command(name = "gyre", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a new database from inline schema definitions.
    Create {
        /// Path of the database directory to create.
        db_path: PathBuf,

        /// Base sampling step in seconds.
        #[arg(long, default_value = "300")]
        step: u64,

        /// Creation time as a Unix timestamp (defaults to now).
        #[arg(long)]
        start: Option<u64>,

        /// Datasource as "name:KIND:heartbeat" or
        /// "name:KIND:heartbeat:min:max" ("U" for an open bound). Repeatable.
        #[arg(long = "source", required = true)]
        sources: Vec<String>,

        /// Archive as "CF:xff:steps:rows". Repeatable.
        #[arg(long = "archive", required = true)]
        archives: Vec<String>,
    },

    /// Display database metadata, datasources, and archive tiers.
    Info {
        /// Path to the database directory.
        db_path: PathBuf,
    },

    /// Feed samples into one datasource.
    Update {
        /// Path to the database directory.
        db_path: PathBuf,

        /// Datasource name to update.
        source: String,

        /// Samples as "timestamp:value" ("U" for an unknown reading).
        #[arg(required = true)]
        samples: Vec<String>,
    },

    /// Query consolidated data from a database.
    Fetch {
        /// Path to the database directory.
        db_path: PathBuf,

        /// Consolidation function (AVERAGE, MIN, MAX, LAST).
        cf: String,

        /// Range start as a Unix timestamp (defaults to end - range).
        #[arg(long)]
        start: Option<u64>,

        /// Range end as a Unix timestamp (defaults to now).
        #[arg(long)]
        end: Option<u64>,

        /// Time range to query when no explicit start is given
        /// (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Preferred resolution in seconds (defaults to the finest archive).
        #[arg(long)]
        resolution: Option<u64>,

        /// Datasource to include (defaults to all). Repeatable.
        #[arg(long = "name")]
        names: Vec<String>,

        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Build a native database from a legacy binary dump.
    Import {
        /// Path to the legacy binary file.
        file: PathBuf,

        /// Path of the database directory to create.
        db_path: PathBuf,
    },

    /// Write a database as a legacy binary dump.
    Export {
        /// Path to the database directory.
        db_path: PathBuf,

        /// Path of the dump file to write.
        file: PathBuf,

        /// Byte order of the dump.
        #[arg(long, default_value = "little")]
        endian: EndianArg,

        /// Word size of the dump in bits.
        #[arg(long, default_value = "64")]
        word: WordArg,
    },

    /// Run a write-path microbenchmark.
    Bench {
        /// Number of samples to write.
        #[arg(long, default_value = "1000000")]
        updates: u64,

        /// Number of datasources to feed.
        #[arg(long, default_value = "8")]
        sources: u32,
    },
}

/// Output format for fetch results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Aligned plain-text table.
    Table,
    /// Comma-separated values.
    Csv,
    /// JSON object with one entry per row.
    Json,
}

/// Byte order flag for export.
#[derive(Clone, Copy, ValueEnum)]
enum EndianArg {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Word size flag for export.
#[derive(Clone, Copy, ValueEnum)]
enum WordArg {
    /// 32-bit counters, 4-byte alignment.
    #[value(name = "32")]
    W32,
    /// 64-bit counters, 8-byte alignment.
    #[value(name = "64")]
    W64,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create {
            db_path,
            step,
            start,
            sources,
            archives,
        } => cmd_create(&db_path, step, start, &sources, &archives),
        Commands::Info { db_path } => cmd_info(&db_path),
        Commands::Update {
            db_path,
            source,
            samples,
        } => cmd_update(&db_path, &source, &samples),
        Commands::Fetch {
            db_path,
            cf,
            start,
            end,
            range,
            resolution,
            names,
            format,
        } => cmd_fetch(&db_path, &cf, start, end, &range, resolution, names, &format),
        Commands::Import { file, db_path } => cmd_import(&file, &db_path),
        Commands::Export {
            db_path,
            file,
            endian,
            word,
        } => cmd_export(&db_path, &file, endian, word),
        Commands::Bench { updates, sources } => cmd_bench(updates, sources),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `gyre create <db_path>`.
fn cmd_create(
    db_path: &PathBuf,
    step: u64,
    start: Option<u64>,
    sources: &[String],
    archives: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut schema = Schema::new(step)?;
    for spec in sources {
        schema.add_source(parse_source(spec)?)?;
    }
    for spec in archives {
        schema.add_archive(parse_archive(spec)?)?;
    }

    let start = match start {
        Some(t) => t,
        None => now_secs()?,
    };
    let db = Database::create(db_path, schema, start)?;

    println!("Created database: {}", db_path.display());
    println!("  Step: {}", format_duration_secs(step));
    println!("  Datasources: {}", db.schema().sources.len());
    println!("  Archives: {}", db.schema().archives.len());
    println!("  Slab: {}", format_bytes(db.slab_size()));
    Ok(())
}

/// Implements `gyre info <db_path>`.
fn cmd_info(db_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(db_path)?;
    let schema = db.schema();

    println!("Database: {}", db_path.display());
    println!("  Step: {}", format_duration_secs(schema.step));
    println!("  Last update: {}", db.last_update());
    println!("  Samples ingested: {}", db.sample_count());
    println!("  Slab: {}", format_bytes(db.slab_size()));
    println!("  Schema hash: {:016x}", schema.stable_hash());
    println!();

    println!("Datasources: {}", schema.sources.len());
    for def in &schema.sources {
        println!(
            "  - {}: {}, heartbeat {}, bounds {}..{}",
            def.name,
            def.kind,
            format_duration_secs(def.heartbeat),
            format_value(def.min),
            format_value(def.max),
        );
    }
    println!();

    println!("Archives: {}", schema.archives.len());
    for def in &schema.archives {
        let resolution = schema.resolution(def);
        println!(
            "  - {} xff={:.2}: {} step(s) per row, {} rows ({} for {})",
            def.cf,
            def.xff,
            def.steps,
            def.rows,
            format_duration_secs(resolution),
            format_duration_secs(resolution * def.rows),
        );
    }
    Ok(())
}

/// Implements `gyre update <db_path> <source> <samples>...`.
fn cmd_update(
    db_path: &PathBuf,
    source: &str,
    samples: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut db = Database::open(db_path)?;
    for sample in samples {
        let (timestamp, value) = parse_sample(sample)?;
        db.update(source, timestamp, value)?;
    }
    db.sync()?;
    println!("Accepted {} sample(s) for '{source}'", samples.len());
    Ok(())
}

/// Implements `gyre fetch <db_path> <cf>`.
#[allow(clippy::too_many_arguments)] // One parameter per subcommand flag
fn cmd_fetch(
    db_path: &PathBuf,
    cf: &str,
    start: Option<u64>,
    end: Option<u64>,
    range: &str,
    resolution: Option<u64>,
    names: Vec<String>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(db_path)?;
    let cf: ConsolidationFn = cf.parse()?;

    let end = match end {
        Some(t) => t,
        None => now_secs()?,
    };
    let start = match start {
        Some(t) => t,
        None => end.saturating_sub(parse_duration_secs(range)?),
    };

    let mut request = FetchRequest::new(cf, start, end).names(names);
    if let Some(res) = resolution {
        request = request.resolution(res);
    }
    let chunk = db.fetch(&request)?;

    match format {
        OutputFormat::Table => {
            print!("{:>12}", "timestamp");
            for name in chunk.names() {
                print!(" {name:>14}");
            }
            println!();
            for (row, t) in chunk.timestamps().enumerate() {
                print!("{t:>12}");
                for column in chunk.columns() {
                    print!(" {:>14}", format_value(column[row]));
                }
                println!();
            }
        }
        OutputFormat::Csv => {
            println!(
                "# cf={cf}, resolution={}, rows={}",
                chunk.resolution(),
                chunk.rows()
            );
            println!("timestamp,{}", chunk.names().join(","));
            for (row, t) in chunk.timestamps().enumerate() {
                let cells: Vec<String> = chunk
                    .columns()
                    .iter()
                    .map(|column| format_value(column[row]))
                    .collect();
                println!("{t},{}", cells.join(","));
            }
        }
        OutputFormat::Json => {
            let data: Vec<serde_json::Value> = chunk
                .timestamps()
                .enumerate()
                .map(|(row, t)| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("timestamp".to_string(), serde_json::json!(t));
                    for (name, column) in chunk.names().iter().zip(chunk.columns()) {
                        // Non-finite values have no JSON spelling; they come
                        // out as null
                        entry.insert(name.clone(), serde_json::json!(column[row]));
                    }
                    serde_json::Value::Object(entry)
                })
                .collect();

            let output = serde_json::json!({
                "cf": cf.to_string(),
                "start": chunk.start(),
                "resolution": chunk.resolution(),
                "count": chunk.rows(),
                "data": data,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Implements `gyre import <file> <db_path>`.
fn cmd_import(file: &PathBuf, db_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(file)?;
    let detected = Format::detect(&bytes)?;
    let db = Database::import_legacy(db_path, &bytes)?;

    println!(
        "Imported {} ({} bytes, {:?} endian, {}-bit words)",
        file.display(),
        bytes.len(),
        detected.endian,
        detected.word.bytes() * 8,
    );
    println!("  Database: {}", db_path.display());
    println!("  Datasources: {}", db.schema().sources.len());
    println!("  Archives: {}", db.schema().archives.len());
    println!("  Last update: {}", db.last_update());
    Ok(())
}

/// Implements `gyre export <db_path> <file>`.
fn cmd_export(
    db_path: &PathBuf,
    file: &PathBuf,
    endian: EndianArg,
    word: WordArg,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(db_path)?;
    let format = Format {
        endian: match endian {
            EndianArg::Big => Endianness::Big,
            EndianArg::Little => Endianness::Little,
        },
        word: match word {
            WordArg::W32 => WordWidth::W32,
            WordArg::W64 => WordWidth::W64,
        },
    };

    let bytes = db.export_legacy(format)?;
    std::fs::write(file, &bytes)?;

    println!(
        "Wrote {} ({})",
        file.display(),
        format_bytes(bytes.len() as u64)
    );
    Ok(())
}

/// Implements `gyre bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(updates: u64, source_count: u32) -> Result<(), Box<dyn std::error::Error>> {
    println!("gyre write-path benchmark");
    println!("  Updates: {updates}");
    println!("  Datasources: {source_count}");
    println!();

    let temp_dir = std::env::temp_dir().join("gyre_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let mut schema = Schema::new(1)?;
    for i in 0..source_count {
        schema.add_source(SourceDef::new(format!("metric_{i}"), SourceKind::Gauge, 10)?)?;
    }
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 3600)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 60, 1440)?)?;

    let base_time = 1_700_000_000u64;
    let mut db = Database::create(&temp_dir, schema, base_time)?;

    println!("Writing {updates} samples across {source_count} datasources...");

    let names: Vec<String> = (0..source_count).map(|i| format!("metric_{i}")).collect();
    let rounds = updates / u64::from(source_count);

    let start = Instant::now();
    for round in 1..=rounds {
        let ts = base_time + round;
        for (i, name) in names.iter().enumerate() {
            db.update(name, ts, i as f64)?;
        }
    }
    let elapsed = start.elapsed();

    let total_writes = rounds * u64::from(source_count);
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Total writes: {total_writes}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");
    println!();

    // Clean up
    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

/// Parses a "name:KIND:heartbeat[:min:max]" datasource definition.
fn parse_source(spec: &str) -> Result<SourceDef, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [name, kind, heartbeat] => {
            Ok(SourceDef::new(*name, kind.parse::<SourceKind>()?, heartbeat.parse()?)?)
        }
        [name, kind, heartbeat, min, max] => Ok(SourceDef::bounded(
            *name,
            kind.parse::<SourceKind>()?,
            heartbeat.parse()?,
            parse_bound(min)?,
            parse_bound(max)?,
        )?),
        _ => Err(format!(
            "Invalid datasource '{spec}'. Use name:KIND:heartbeat or name:KIND:heartbeat:min:max."
        )
        .into()),
    }
}

/// Parses a "CF:xff:steps:rows" archive definition.
fn parse_archive(spec: &str) -> Result<ArchiveDef, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = spec.split(':').collect();
    let [cf, xff, steps, rows] = parts.as_slice() else {
        return Err(format!("Invalid archive '{spec}'. Use CF:xff:steps:rows.").into());
    };
    Ok(ArchiveDef::new(
        cf.parse::<ConsolidationFn>()?,
        xff.parse()?,
        steps.parse()?,
        rows.parse()?,
    )?)
}

/// Parses a "timestamp:value" sample; the value may be "U" for unknown.
fn parse_sample(sample: &str) -> Result<(u64, f64), Box<dyn std::error::Error>> {
    let Some((timestamp, value)) = sample.split_once(':') else {
        return Err(format!("Invalid sample '{sample}'. Use timestamp:value.").into());
    };
    Ok((timestamp.parse()?, parse_bound(value)?))
}

/// Parses a float that may be "U" for unknown/unbounded.
fn parse_bound(s: &str) -> Result<f64, Box<dyn std::error::Error>> {
    if s.eq_ignore_ascii_case("U") {
        Ok(f64::NAN)
    } else {
        Ok(s.parse()?)
    }
}

/// Formats a value for tables and CSV; unknown prints as "U".
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "U".to_string()
    } else {
        format!("{value}")
    }
}

/// Current time in seconds since the Unix epoch.
fn now_secs() -> Result<u64, Box<dyn std::error::Error>> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs())
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d") to seconds.
fn parse_duration_secs(s: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse()?;

    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    Ok(secs)
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
