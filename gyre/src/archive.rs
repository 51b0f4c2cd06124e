//! Archive consolidation and ring storage.
//!
//! An archive condenses every `steps` primary data points into one
//! consolidated data point (CDP) and stores it in a fixed ring of `rows`
//! slots, so retention is bounded by construction. Each datasource keeps its
//! own partial CDP scratch and its own ring cursor in the slab, because
//! sources advance their clocks independently.
//!
//! Consolidation is counted in steps, not wall time: the per-source elapsed
//! counter is seeded at creation so rows always finalize on timestamps that
//! are multiples of the archive resolution, regardless of when the database
//! was created. Runs that span many steps take a bulk path that fills whole
//! rows without a per-step loop, which is what makes a months-long gap cheap
//! to absorb.

use crate::pdp::normalize;
use crate::schema::ArchiveDef;
use crate::slab::Slab;

/// One consolidation archive bound to its slab region.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Index of the archive in the slab, in declaration order.
    index: usize,
    /// The archive definition (consolidation function, xff, steps, rows).
    def: ArchiveDef,
}

impl Archive {
    /// Creates an archive handle for one slab region.
    pub fn new(index: usize, def: ArchiveDef) -> Self {
        Self { index, def }
    }

    /// The archive definition.
    pub fn def(&self) -> &ArchiveDef {
        &self.def
    }

    /// Seconds covered by one ring row, given the base step.
    pub fn resolution(&self, step: u64) -> u64 {
        step * self.def.steps
    }

    /// Folds a run of identical primary data points into the ring.
    ///
    /// The run first tops up the partially filled CDP, then whole rows are
    /// written in bulk, and the remainder starts the next CDP. A NaN value
    /// marks every covered step as unknown.
    pub fn consolidate(&self, slab: &mut Slab, source: usize, value: f64, mut steps: u64) {
        // Top up the open CDP until a row boundary lines up with the run
        while steps > 0 {
            if slab.cdp_elapsed(self.index, source) == 0 && steps >= self.def.steps {
                break;
            }
            self.feed_one(slab, source, value);
            steps -= 1;
        }

        // Whole rows share the run's value under every consolidation
        // function, so they can be stored without feeding step by step
        if steps >= self.def.steps {
            let whole = steps / self.def.steps;
            self.store_bulk(slab, source, value, whole);
            steps -= whole * self.def.steps;
        }

        for _ in 0..steps {
            self.feed_one(slab, source, value);
        }
    }

    /// Reads the consolidated series for one source at `count` consecutive
    /// timestamps starting at `first`, spaced `resolution` apart.
    ///
    /// Timestamps newer than the source's last consolidated row, or older
    /// than the ring's retention, read as NaN.
    pub fn series(
        &self,
        slab: &Slab,
        source: usize,
        first: u64,
        count: usize,
        resolution: u64,
    ) -> Vec<f64> {
        let rows = self.def.rows;
        let cursor = slab.current_row(self.index, source);
        let newest = normalize(slab.pdp_last_update(source), resolution);

        let mut out = Vec::with_capacity(count);
        for i in 0..count as u64 {
            let t = first + i * resolution;
            if t > newest {
                out.push(f64::NAN);
                continue;
            }
            let offset = (newest - t) / resolution;
            if offset >= rows {
                out.push(f64::NAN);
                continue;
            }
            let row = (cursor + rows - offset) % rows;
            out.push(slab.ring_value(self.index, source, row));
        }
        out
    }

    /// Reads the last `count` consolidated values for one source, oldest
    /// first, ending at the row whose timestamp is `newest`.
    ///
    /// Rows before the epoch or outside the retention come back as NaN, so
    /// a young database exports a mostly empty ring rather than failing.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // timestamps stay far below i64::MAX
    pub fn snapshot(
        &self,
        slab: &Slab,
        source: usize,
        newest: u64,
        count: usize,
        resolution: u64,
    ) -> Vec<f64> {
        let rows = self.def.rows;
        let cursor = slab.current_row(self.index, source);
        let own_newest = normalize(slab.pdp_last_update(source), resolution) as i64;
        let newest = newest as i64;
        let resolution = resolution as i64;

        let mut out = Vec::with_capacity(count);
        for i in 0..count as i64 {
            let t = newest - (count as i64 - 1 - i) * resolution;
            if t <= 0 || t > own_newest {
                out.push(f64::NAN);
                continue;
            }
            let offset = ((own_newest - t) / resolution) as u64;
            if offset >= rows {
                out.push(f64::NAN);
                continue;
            }
            let row = (cursor + rows - offset) % rows;
            out.push(slab.ring_value(self.index, source, row));
        }
        out
    }

    /// Advances the open CDP by one step.
    fn feed_one(&self, slab: &mut Slab, source: usize, value: f64) {
        let elapsed = slab.cdp_elapsed(self.index, source) + 1;
        if value.is_nan() {
            let unknown = slab.cdp_unknown_steps(self.index, source);
            slab.set_cdp_unknown_steps(self.index, source, unknown + 1);
        } else {
            let acc = slab.cdp_value(self.index, source);
            slab.set_cdp_value(self.index, source, self.def.cf.accumulate(acc, value));
        }

        if elapsed == self.def.steps {
            self.finalize_row(slab, source);
            slab.set_cdp_elapsed(self.index, source, 0);
        } else {
            slab.set_cdp_elapsed(self.index, source, elapsed);
        }
    }

    /// Closes the open CDP into a ring row and resets the scratch.
    #[allow(clippy::cast_precision_loss)] // step counts are far below 2^52
    fn finalize_row(&self, slab: &mut Slab, source: usize) {
        let unknown = slab.cdp_unknown_steps(self.index, source);
        let acc = slab.cdp_value(self.index, source);

        let row = if unknown as f64 <= self.def.xff * self.def.steps as f64 {
            self.def.cf.finalize(acc, self.def.steps - unknown)
        } else {
            f64::NAN
        };
        self.store_row(slab, source, row);

        slab.set_cdp_value(self.index, source, f64::NAN);
        slab.set_cdp_unknown_steps(self.index, source, 0);
    }

    /// Writes one finalized value into the next ring slot.
    fn store_row(&self, slab: &mut Slab, source: usize, value: f64) {
        let rows = self.def.rows;
        let next = (slab.current_row(self.index, source) + 1) % rows;
        slab.set_ring_value(self.index, source, next, value);
        slab.set_current_row(self.index, source, next);
    }

    /// Writes `count` rows of the same value.
    ///
    /// When the run is longer than the ring, every slot ends up holding the
    /// value and only the cursor phase matters, so the ring is filled once
    /// and the cursor jumps by the full count.
    fn store_bulk(&self, slab: &mut Slab, source: usize, value: f64, count: u64) {
        let rows = self.def.rows;
        if count >= rows {
            for row in 0..rows {
                slab.set_ring_value(self.index, source, row, value);
            }
            let cursor = slab.current_row(self.index, source);
            slab.set_current_row(self.index, source, (cursor + count) % rows);
        } else {
            for _ in 0..count {
                self.store_row(slab, source, value);
            }
        }
    }
}
