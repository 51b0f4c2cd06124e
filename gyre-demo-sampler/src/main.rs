//! Demo load-average sampler with an embedded gyre database.
//!
//! This binary reads the host's `/proc/loadavg` on a fixed cadence and
//! records the 1-, 5-, and 15-minute averages into a three-source gyre
//! database, creating it on first run and resuming it afterwards.
//!
//! **Requires Linux.** On other platforms, build succeeds but the sampler
//! cannot be started.

use std::path::PathBuf;

use clap::Parser;

/// gyre-demo-sampler: record /proc/loadavg into a gyre database.
#[derive(Parser)]
#[command(name = "gyre-demo-sampler", version, about)]
struct Cli {
    /// Path to the database directory.
    #[arg(long, default_value = "./loadavg_db")]
    db: PathBuf,

    /// Sampling step in seconds; also the base step of a new database.
    #[arg(long, default_value = "60")]
    step: u64,

    /// Number of samples to record before exiting (default: run forever).
    #[arg(long)]
    count: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    #[cfg(target_os = "linux")]
    {
        if let Err(e) = run_sampler(cli) {
            tracing::error!("sampler failed: {e}");
            std::process::exit(1);
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = cli;
        eprintln!("gyre-demo-sampler reads /proc/loadavg and requires Linux.");
        eprintln!("This binary was built on a non-Linux platform and cannot sample.");
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
fn run_sampler(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    use gyre::GyreError;
    use gyre::error::UpdateError;

    let mut db = open_or_create(&cli.db, cli.step)?;
    tracing::info!(
        "sampling into {} every {}s ({} samples so far)",
        cli.db.display(),
        cli.step,
        db.sample_count(),
    );

    let mut recorded = 0u64;
    loop {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs();
        let (load1, load5, load15) = read_loadavg()?;

        let samples = [("load1", load1), ("load5", load5), ("load15", load15)];
        for (name, value) in samples {
            match db.update(name, now, value) {
                Ok(()) => {}
                // A restart within the last recorded second lands here;
                // the next tick is past it
                Err(GyreError::Update(UpdateError::NonMonotonic { last, .. })) => {
                    tracing::warn!("skipping {name}@{now}: clock not past {last}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        db.sync()?;
        tracing::info!("recorded load {load1} / {load5} / {load15} at {now}");

        recorded += 1;
        if cli.count.is_some_and(|count| recorded >= count) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_secs(cli.step));
    }

    tracing::info!("sampler exited after {recorded} sample(s)");
    Ok(())
}

/// Opens the database at `path`, creating it with a load-average schema on
/// first run.
#[cfg(target_os = "linux")]
fn open_or_create(
    path: &PathBuf,
    step: u64,
) -> Result<gyre::Database, Box<dyn std::error::Error>> {
    use gyre::{ArchiveDef, ConsolidationFn, Database, Schema, SourceDef, SourceKind};

    if path.join(gyre::db::METADATA_FILE).exists() {
        return Ok(Database::open(path)?);
    }

    // Minute-grained for a day, hour-grained averages and peaks for a month
    let mut schema = Schema::new(step)?;
    for name in ["load1", "load5", "load15"] {
        schema.add_source(SourceDef::new(name, SourceKind::Gauge, step * 2)?)?;
    }
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 1440)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 60, 720)?)?;
    schema.add_archive(ArchiveDef::new(ConsolidationFn::Max, 0.5, 60, 720)?)?;

    let start = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    tracing::info!("creating {} with step {step}s", path.display());
    Ok(Database::create(path, schema, start)?)
}

/// Reads the three load averages from `/proc/loadavg`.
#[cfg(target_os = "linux")]
fn read_loadavg() -> Result<(f64, f64, f64), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string("/proc/loadavg")?;
    let mut fields = raw.split_whitespace();
    let mut next = || -> Result<f64, Box<dyn std::error::Error>> {
        Ok(fields
            .next()
            .ok_or("malformed /proc/loadavg")?
            .parse::<f64>()?)
    };
    Ok((next()?, next()?, next()?))
}
