//! # gyre
//!
//! Embedded round-robin time-series database with legacy binary import.
//!
//! gyre stores metrics the round-robin way: raw samples become per-second
//! rates on a fixed step, rates are consolidated into tiered archives at
//! write time, and every archive is a ring buffer that overwrites its oldest
//! row once full. The size of a database is fixed the moment its schema is
//! complete, no matter how long it runs. gyre also decodes and encodes the
//! classic `RRD` binary dump format, including files produced on machines
//! with a different byte order or word size.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - All mutable state lives in one memory-mapped slab; updates allocate nothing
//! - Write-time consolidation (AVERAGE, MIN, MAX, LAST) into fixed rings
//! - Bounded, predictable storage: size is determined by the schema, not data volume
//! - Counter rate semantics with wrap correction, heartbeat gaps, and rate bounds
//! - Legacy binary dumps import from and export to any producer architecture
//! - No background threads; cross-thread sharing goes through an explicit pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gyre::{ArchiveDef, ConsolidationFn, Database, FetchRequest, Schema, SourceDef, SourceKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Sample every 5 minutes; keep a day of raw rates and two years of
//! // 2-hour averages
//! let mut schema = Schema::new(300)?;
//! schema.add_source(SourceDef::new("octets_in", SourceKind::Counter, 600)?)?;
//! schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 1, 288)?)?;
//! schema.add_archive(ArchiveDef::new(ConsolidationFn::Average, 0.5, 24, 8760)?)?;
//!
//! let mut db = Database::create("./router1", schema, 1_700_000_000)?;
//!
//! // Feed raw counter readings; rate conversion and consolidation happen
//! // on the way in
//! db.update("octets_in", 1_700_000_300, 1_234_567.0)?;
//! db.update("octets_in", 1_700_000_600, 2_345_678.0)?;
//! db.sync()?;
//!
//! // Read the averaged rates back
//! let request = FetchRequest::new(ConsolidationFn::Average, 1_700_000_000, 1_700_000_600);
//! let chunk = db.fetch(&request)?;
//! for (t, v) in chunk.timestamps().zip(chunk.column("octets_in").unwrap()) {
//!     println!("{t}: {v}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Database`] — Top-level handle; owns one directory, ingests and fetches
//! - [`Schema`] — Step, datasources, and archive tiers of a database
//! - [`FetchRequest`] / [`DataChunk`] — Query parameters and the aligned result grid
//! - [`DbPool`] — Bounded registry of open databases for concurrent callers
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`db`] — Database lifecycle, update, fetch, legacy import/export
//! - [`schema`] — Schema, datasource, and archive configuration
//! - [`pdp`] — Rate normalization and primary data point accumulation
//! - [`archive`] — Consolidation into ring-buffered archive rows
//! - [`fetch`] — Archive selection and data extraction
//! - [`slab`] — Raw memory-mapped state file
//! - [`codec`] — Endian- and word-width-aware binary primitives
//! - [`legacy`] — Legacy binary dump decoding and encoding
//! - [`pool`] — Shared registry of open databases
//! - [`error`] — Error types

pub mod archive;
pub mod codec;
pub mod db;
pub mod error;
pub mod fetch;
pub mod legacy;
pub mod pdp;
pub mod pool;
pub mod schema;
pub mod slab;

// Re-export primary API types at crate root for convenience.
pub use db::Database;
pub use error::{GyreError, Result};
pub use fetch::{DataChunk, FetchRequest};
pub use pool::{DbPool, PooledDb};
pub use schema::{ArchiveDef, ConsolidationFn, Schema, SourceDef, SourceKind};
