//! Primary data point accumulation.
//!
//! Raw samples arrive at arbitrary timestamps; archives consume one value per
//! step. This module closes that gap: each datasource has a [`PdpAccumulator`]
//! that turns a raw sample into a per-second rate, weights the rate by the
//! seconds it covers, and emits one [`PdpRun`] whenever the sample crosses one
//! or more step boundaries. A run spanning several steps carries the same
//! value for each of them, which is what keeps archive cursors advancing
//! through gaps.
//!
//! The accumulator owns no storage. Its scratch state (last update, last raw
//! reading, rate-seconds accumulator, unknown seconds) lives in the slab and
//! is borrowed per call, so accumulators stay cheap to construct and the
//! slab remains the single durability point.

use crate::error::{Result, UpdateError};
use crate::schema::{SourceDef, SourceKind};
use crate::slab::Slab;

/// 2^32, the wrap modulus of 32-bit counters.
const COUNTER_WRAP_32: f64 = 4_294_967_296.0;

/// 2^64, the wrap modulus of 64-bit counters.
const COUNTER_WRAP_64: f64 = 18_446_744_073_709_551_616.0;

/// Floors a timestamp to the previous multiple of `step`.
pub(crate) fn normalize(time: u64, step: u64) -> u64 {
    time - time % step
}

/// A completed span of primary data points.
///
/// All `steps` consecutive PDPs in the run share the same `value`; a NaN
/// value means the whole span is unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdpRun {
    /// The per-second rate for every step in the run (NaN = unknown).
    pub value: f64,
    /// Number of consecutive steps covered.
    pub steps: u64,
}

/// Per-datasource rate normalization state machine.
#[derive(Debug, Clone)]
pub struct PdpAccumulator {
    /// Column index of the datasource in the slab.
    index: usize,
    /// Base step in seconds.
    step: u64,
    /// The datasource definition (kind, heartbeat, bounds).
    def: SourceDef,
}

impl PdpAccumulator {
    /// Creates an accumulator for one datasource column.
    pub fn new(index: usize, step: u64, def: SourceDef) -> Self {
        Self { index, step, def }
    }

    /// Feeds one raw sample and returns the completed run, if any.
    ///
    /// Most samples land inside the open step and return `Ok(None)`. When
    /// `timestamp` reaches or passes the open step's end, the span up to the
    /// last crossed boundary is closed into a single [`PdpRun`] and the
    /// remainder re-seeds the open step.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NonMonotonic`] if `timestamp` does not advance
    /// this datasource's clock. NaN values are data ("unknown"), not errors.
    pub fn update(&self, slab: &mut Slab, timestamp: u64, raw: f64) -> Result<Option<PdpRun>> {
        let last = slab.pdp_last_update(self.index);
        if timestamp <= last {
            return Err(UpdateError::NonMonotonic { last, timestamp }.into());
        }

        let elapsed = timestamp - last;
        let rate = self.rate(slab.pdp_last_value(self.index), raw, elapsed);

        let step_start = normalize(last, self.step);
        let step_end = step_start + self.step;

        let run = if timestamp < step_end {
            self.accumulate(slab, elapsed, rate);
            None
        } else {
            let boundary = normalize(timestamp, self.step);
            self.accumulate(slab, boundary - last, rate);
            let value = self.close_span(slab, boundary - step_start);
            let steps = (boundary - step_end) / self.step + 1;

            slab.set_pdp_accum(self.index, 0.0);
            slab.set_pdp_unknown_secs(self.index, 0);
            self.accumulate(slab, timestamp - boundary, rate);

            Some(PdpRun { value, steps })
        };

        slab.set_pdp_last_update(self.index, timestamp);
        slab.set_pdp_last_value(self.index, raw);
        Ok(run)
    }

    /// Converts a raw reading into a per-second rate.
    ///
    /// Returns NaN when the gap exceeds the heartbeat, when a delta kind has
    /// no usable previous reading, or when the rate falls outside the
    /// configured bounds. Bounds reject, they never clamp.
    #[allow(clippy::cast_precision_loss)] // elapsed seconds are far below 2^52
    fn rate(&self, last_value: f64, raw: f64, elapsed: u64) -> f64 {
        if elapsed > self.def.heartbeat {
            return f64::NAN;
        }

        let elapsed = elapsed as f64;
        let rate = match self.def.kind {
            SourceKind::Gauge => raw,
            SourceKind::Absolute => raw / elapsed,
            SourceKind::Derive => (raw - last_value) / elapsed,
            SourceKind::Counter => {
                let mut delta = raw - last_value;
                if delta < 0.0 {
                    delta += COUNTER_WRAP_32;
                }
                if delta < 0.0 {
                    delta += COUNTER_WRAP_64 - COUNTER_WRAP_32;
                }
                if delta < 0.0 {
                    // Decrease too large for any wrap: a reset or bad reading.
                    return f64::NAN;
                }
                delta / elapsed
            }
        };

        // NaN bounds compare false, so unbounded sides never reject.
        if rate < self.def.min || rate > self.def.max {
            return f64::NAN;
        }
        rate
    }

    /// Adds `seconds` of the given rate to the open step's scratch.
    #[allow(clippy::cast_precision_loss)] // span seconds are far below 2^52
    fn accumulate(&self, slab: &mut Slab, seconds: u64, rate: f64) {
        if seconds == 0 {
            return;
        }
        if rate.is_nan() {
            let unknown = slab.pdp_unknown_secs(self.index);
            slab.set_pdp_unknown_secs(self.index, unknown + seconds);
        } else {
            let accum = slab.pdp_accum(self.index);
            slab.set_pdp_accum(self.index, accum + rate * seconds as f64);
        }
    }

    /// Produces the value for a closed span of `span_secs` seconds.
    ///
    /// The span is unknown when more than a heartbeat's worth of it was
    /// unknown, or when no valid seconds remain at all.
    #[allow(clippy::cast_precision_loss)] // span seconds are far below 2^52
    fn close_span(&self, slab: &Slab, span_secs: u64) -> f64 {
        let unknown = slab.pdp_unknown_secs(self.index);
        let valid = span_secs.saturating_sub(unknown);
        if unknown > self.def.heartbeat || valid == 0 {
            return f64::NAN;
        }
        slab.pdp_accum(self.index) / valid as f64
    }
}
