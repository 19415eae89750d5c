//! Block builder: accumulates `(series, ts_ms, value)` samples in
//! insertion order into Fixed16-quantized blocks (spec.md §4.2).
//!
//! Structurally this plays the role the teacher's `backend/dictionary.rs`
//! write-accumulation path plays for key/value writes: stage into RAM,
//! apply a fit test before each append, and hand a finished record to the
//! layer that actually touches flash (there: `PddbOs::patch_data`; here:
//! the ring manager's `publish_block`).

use crate::codec::{encode_payload, BlockHeader, DeltaWidth};
use crate::geometry::{MAX_STAGED_SAMPLES, PAYLOAD_LEN};

/// A single accepted sample, captured before quantization.
struct Staged {
    delta_from_prev: u32,
    value: f64,
}

/// A block under construction in RAM. Samples are appended in insertion
/// order; `close()` finalizes the header/payload pair ready for
/// publishing.
pub struct BlockBuilder {
    series: Option<u16>,
    t0_ms: u32,
    last_ts: u32,
    min_value: f64,
    max_value: f64,
    staged: Vec<Staged>,
    dt_bits: DeltaWidth,
    /// Count of samples whose quantized value saturated against
    /// `[-32768, 32767]` in the most recently closed block. See spec.md
    /// §4.2 and the Open Questions note on `quant_saturations`.
    pub quant_saturations: u64,
}

/// A fully encoded block, ready for the ring manager to publish.
pub struct ClosedBlock {
    pub header: BlockHeader,
    pub payload: [u8; PAYLOAD_LEN],
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            series: None,
            t0_ms: 0,
            last_ts: 0,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
            staged: Vec::with_capacity(MAX_STAGED_SAMPLES),
            dt_bits: DeltaWidth::U8,
            quant_saturations: 0,
        }
    }

    pub fn is_empty(&self) -> bool { self.staged.is_empty() }

    /// Computed payload bytes if a sample were appended to a block holding
    /// `count` existing samples at delta width `dt_bits`.
    fn payload_bytes_after(dt_bits: DeltaWidth, count: usize) -> usize {
        let delta_width = match dt_bits {
            DeltaWidth::U8 => 1,
            DeltaWidth::U16 => 2,
        };
        (count + 1) * delta_width + (count + 1) * 2
    }

    /// Append one sample. Returns a block to publish if the fit test
    /// forced the current (now former) block closed before accepting this
    /// sample.
    pub fn append(&mut self, series: u16, ts_ms: u32, value: f64) -> Option<ClosedBlock> {
        let mut closed = None;

        if let Some(cur_series) = self.series {
            let new_delta = ts_ms.wrapping_sub(self.last_ts);
            let candidate_dt_bits = if self.dt_bits == DeltaWidth::U16 || new_delta > 255 {
                DeltaWidth::U16
            } else {
                self.dt_bits
            };
            let projected = Self::payload_bytes_after(candidate_dt_bits, self.staged.len());
            let series_changed = cur_series != series;
            let delta_overflows = new_delta > 0xFFFF;
            if series_changed || projected > PAYLOAD_LEN || delta_overflows {
                closed = Some(self.close());
            } else {
                self.dt_bits = candidate_dt_bits;
            }
        }

        if self.series.is_none() {
            self.series = Some(series);
            self.t0_ms = ts_ms;
            self.last_ts = ts_ms;
            self.staged.push(Staged { delta_from_prev: 0, value });
        } else {
            let delta = ts_ms.wrapping_sub(self.last_ts);
            self.last_ts = ts_ms;
            self.staged.push(Staged { delta_from_prev: delta, value });
        }
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);

        closed
    }

    /// Force-close the open block (used by `append`'s fit test and by
    /// `Db::flush`). Panics if called on an empty builder; callers must
    /// check `is_empty()` first.
    pub fn close(&mut self) -> ClosedBlock {
        assert!(!self.staged.is_empty(), "close() called on an empty block builder");

        let bias = ((self.min_value + self.max_value) / 2.0) as f32;
        let mut scale = ((self.max_value - self.min_value) / 65535.0) as f32;
        if scale == 0.0 {
            scale = 1e-9;
        }

        let mut qvals = Vec::with_capacity(self.staged.len());
        for s in &self.staged {
            let q = ((s.value - bias as f64) / scale as f64).round();
            let saturated = q < i16::MIN as f64 || q > i16::MAX as f64;
            if saturated {
                self.quant_saturations += 1;
            }
            let clamped = q.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            qvals.push(clamped);
        }

        let max_delta = self.staged.iter().map(|s| s.delta_from_prev).max().unwrap_or(0);
        let dt_bits = if max_delta <= 255 { DeltaWidth::U8 } else { DeltaWidth::U16 };
        let deltas: Vec<u32> = self.staged.iter().map(|s| s.delta_from_prev).collect();

        let payload = encode_payload(dt_bits, &deltas, &qvals);
        let payload_crc = crate::crc::crc32c(&payload);

        let header = BlockHeader {
            series: self.series.expect("series set before first append"),
            count: self.staged.len() as u16,
            t0_ms: self.t0_ms,
            dt_bits,
            bias,
            scale,
            payload_crc,
        };

        self.series = None;
        self.staged.clear();
        self.min_value = f64::INFINITY;
        self.max_value = f64::NEG_INFINITY;
        self.dt_bits = DeltaWidth::U8;

        ClosedBlock { header, payload }
    }
}

impl Default for BlockBuilder {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_payload;

    fn reconstruct(block: &ClosedBlock) -> Vec<(u32, f64)> {
        let (deltas, qvals) = decode_payload(&block.payload, block.header.dt_bits, block.header.count as usize);
        let mut t = block.header.t0_ms;
        let mut out = Vec::new();
        for (i, (&d, &q)) in deltas.iter().zip(qvals.iter()).enumerate() {
            if i > 0 {
                t = t.wrapping_add(d);
            }
            out.push((t, block.header.bias as f64 + block.header.scale as f64 * q as f64));
        }
        out
    }

    #[test]
    fn single_sample_closes_with_dt8_and_zero_delta() {
        let mut b = BlockBuilder::new();
        assert!(b.append(1, 1000, 3.0).is_none());
        let closed = b.close();
        assert_eq!(closed.header.count, 1);
        assert_eq!(closed.header.dt_bits, DeltaWidth::U8);
        let (deltas, _) = decode_payload(&closed.payload, DeltaWidth::U8, 1);
        assert_eq!(deltas[0], 0);
    }

    #[test]
    fn series_change_closes_block() {
        let mut b = BlockBuilder::new();
        assert!(b.append(1, 0, 1.0).is_none());
        assert!(b.append(1, 10, 2.0).is_none());
        let closed = b.append(2, 20, 3.0).expect("series change forces close");
        assert_eq!(closed.header.series, 1);
        assert_eq!(closed.header.count, 2);
    }

    #[test]
    fn scale_zero_clamps() {
        let mut b = BlockBuilder::new();
        b.append(1, 0, 5.0);
        b.append(1, 1, 5.0);
        let closed = b.close();
        assert_eq!(closed.header.scale, 1e-9);
        let rows = reconstruct(&closed);
        for (_, v) in rows {
            assert!((v - 5.0).abs() < 1e-3);
        }
    }

    #[test]
    fn roundtrip_error_bound_away_from_saturation() {
        let mut b = BlockBuilder::new();
        let values = [1.0, 2.0, 1.5, 1.8, 1.2];
        for (i, &v) in values.iter().enumerate() {
            b.append(1, (i * 10) as u32, v);
        }
        let closed = b.close();
        let scale = closed.header.scale as f64;
        for (i, (_, v)) in reconstruct(&closed).into_iter().enumerate() {
            assert!((v - values[i]).abs() <= scale / 2.0 + 1e-9);
        }
    }

    #[test]
    fn fills_up_to_payload_budget_before_overflow() {
        let mut b = BlockBuilder::new();
        let mut closed_blocks = Vec::new();
        for i in 0..500u32 {
            if let Some(c) = b.append(7, i * 300, i as f64) {
                closed_blocks.push(c);
            }
        }
        closed_blocks.push(b.close());
        for block in &closed_blocks {
            let delta_width = match block.header.dt_bits {
                DeltaWidth::U8 => 1,
                DeltaWidth::U16 => 2,
            };
            let used = block.header.count as usize * delta_width + block.header.count as usize * 2;
            assert!(used <= PAYLOAD_LEN, "block exceeded payload budget: {used}");
        }
    }
}
