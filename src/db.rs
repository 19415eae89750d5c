//! The facade wiring codec + builder + ring + recovery + iterator + meta
//! together (spec.md §6 "Public operations"). Plays the role the teacher's
//! `backend/hw.rs::PddbOs` + `src/main.rs`'s IPC dispatch loop play
//! together, minus the IPC: this crate is a plain library, called directly
//! in insertion-time order by a single caller (spec.md §1, §5).

use crate::builder::BlockBuilder;
use crate::error;
use crate::flash::{Clock, FlashDriver};
use crate::geometry::{MAX_SERIES, METADATA_RESERVED_BYTES, SEGMENT_SIZE};
use crate::iter::{query_latest, RangeIter};
use crate::meta::{HeadHint, MetaStore, Snapshot};
use crate::ring::{GcMode, RingManager, RingStats};

/// Snapshot format tag (spec.md §4.6, §6 "Recommended snapshot record").
const SNAPSHOT_VERSION: u32 = 1;
/// `2^31`, half the millisecond epoch range, per spec.md §4.2 "Epoch
/// tracking".
const EPOCH_HALF_RANGE: u32 = 0x8000_0000;

/// Counters surfaced by `Db::info` (spec.md §6).
#[derive(Clone, Copy, Debug, Default)]
pub struct DbInfo {
    pub head_seq: u32,
    pub tail_seq: u32,
    pub blocks_written: u64,
    pub crc_errors: u64,
    pub gc_warn: u64,
    pub gc_busy: u64,
    pub recovery_truncations: u64,
}

/// Advisory knobs from spec.md §6's `open` signature. The reference
/// implementation treats both as advisory (spec.md §9 Open Questions);
/// this crate documents that choice rather than silently ignoring the
/// caller's intent.
#[derive(Clone, Copy, Debug)]
pub struct OpenConfig {
    /// Advisory iterator batching hint; not currently consulted by
    /// `RangeIter`, which yields one row per `next()` call regardless.
    pub read_batch_rows: u32,
    /// Advisory; this crate does not time-based auto-flush. Callers
    /// wanting periodic durability should call `flush()` on their own
    /// cadence using this value.
    pub commit_interval_ms: u32,
}

impl Default for OpenConfig {
    fn default() -> Self { Self { read_batch_rows: 64, commit_interval_ms: 1000 } }
}

pub struct Db<F: FlashDriver, C: Clock> {
    ring: RingManager<F, C>,
    meta: MetaStore,
    builder: BlockBuilder,
    epoch_id: u32,
    last_ts_observed: Option<u32>,
    gc_mode: GcMode,
    quant_saturations: u64,
}

impl<F: FlashDriver, C: Clock> Db<F, C> {
    /// Open (or format, if blank) the database: run recovery, seed the
    /// zone map and ring head. Fails if the flash device is too small to
    /// hold the metadata region plus at least one segment.
    pub fn open(flash: F, clock: C, _config: OpenConfig) -> std::io::Result<Self> {
        Self::open_with_gc_mode(flash, clock, _config, GcMode::Blocking)
    }

    /// As `open`, but GC reports `Busy` instead of spinning when its quota
    /// is exhausted (spec.md §6 `write`'s non-blocking mode).
    pub fn open_non_blocking(flash: F, clock: C, config: OpenConfig) -> std::io::Result<Self> {
        Self::open_with_gc_mode(flash, clock, config, GcMode::NonBlocking)
    }

    fn open_with_gc_mode(flash: F, clock: C, _config: OpenConfig, gc_mode: GcMode) -> std::io::Result<Self> {
        let size = flash.size_bytes();
        if size < METADATA_RESERVED_BYTES as u32 + SEGMENT_SIZE as u32 {
            return Err(error::no_space("flash device too small for metadata region + one segment"));
        }
        if size % SEGMENT_SIZE as u32 != 0 {
            return Err(error::invalid_argument("flash size must be a multiple of the segment size"));
        }

        let data_base = METADATA_RESERVED_BYTES as u32;
        let seg_count = (size - data_base) / SEGMENT_SIZE as u32;
        if seg_count == 0 {
            return Err(error::no_space("no usable segments after reserving the metadata region"));
        }

        let meta = MetaStore::new(0);
        let mut ring = RingManager::new(flash, clock, data_base, seg_count);
        ring.recover(&meta)?;

        let epoch_id = meta.load_snapshot(&ring.flash).map(|s| s.epoch_id).unwrap_or(0);

        log::info!(
            "opened: seg_count={} head_seq={} head_addr={:#x} recovery_truncations={}",
            seg_count,
            ring.head.seg_seqno,
            ring.head.addr,
            ring.stats.recovery_truncations
        );

        Ok(Self {
            ring,
            meta,
            builder: BlockBuilder::new(),
            epoch_id,
            last_ts_observed: None,
            gc_mode,
            quant_saturations: 0,
        })
    }

    /// Force-close any open block and publish it (spec.md §6 `close`: no
    /// flush-on-drop semantics are specified, so `close` here is simply
    /// dropping the handle; callers that want durability call `flush`
    /// first).
    pub fn close(self) {}

    /// Consume the handle and hand back the underlying flash driver,
    /// without flushing any open block. Not part of spec.md §6's public
    /// operation table; exists for embedders and tests that need to
    /// inspect or relocate the backing medium across a simulated power
    /// loss (see `tests/scenarios.rs`).
    pub fn into_flash(self) -> F { self.ring.flash }

    /// Accept one `(series, ts_ms, value)` sample. Closing and publishing
    /// any block the fit test forces out (spec.md §4.2, §6 `write`).
    pub fn write(&mut self, series: u16, ts_ms: u32, value: f64) -> std::io::Result<()> {
        if series > MAX_SERIES {
            return Err(error::invalid_argument("series out of range"));
        }

        if let Some(last) = self.last_ts_observed {
            if ts_ms < last && last - ts_ms > EPOCH_HALF_RANGE {
                self.epoch_id = self.epoch_id.wrapping_add(1);
            }
        }
        self.last_ts_observed = Some(ts_ms);

        if let Some(closed) = self.builder.append(series, ts_ms, value) {
            self.ring.publish_block(&closed.header, &closed.payload, self.gc_mode)?;
            self.take_quant_saturations();
            self.maybe_save_hint()?;
        }
        Ok(())
    }

    /// Force-close any open block and publish it.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if !self.builder.is_empty() {
            let closed = self.builder.close();
            self.ring.publish_block(&closed.header, &closed.payload, self.gc_mode)?;
            self.take_quant_saturations();
            self.maybe_save_hint()?;
        }
        Ok(())
    }

    /// Fold the builder's cumulative saturation count into the public
    /// running total, then zero the builder's counter so it only ever
    /// reports the delta since the last closed block.
    fn take_quant_saturations(&mut self) {
        self.quant_saturations += self.builder.quant_saturations;
        self.builder.quant_saturations = 0;
    }

    fn maybe_save_hint(&mut self) -> std::io::Result<()> {
        if self.ring.hint_due() {
            let hint = HeadHint { addr: self.ring.head.addr, seq: self.ring.head.seg_seqno };
            self.meta.save_head_hint(&mut self.ring.flash, &hint)?;
            self.ring.mark_hint_saved();
        }
        Ok(())
    }

    /// Open a range iterator over `[t0_ms, t1_ms]` for `series`
    /// (wrap-aware, spec.md §4.5).
    pub fn query_begin(&self, series: u16, t0_ms: u32, t1_ms: u32) -> std::io::Result<RangeIter> {
        if series > MAX_SERIES {
            return Err(error::invalid_argument("series out of range"));
        }
        Ok(RangeIter::new(&self.ring, series, t0_ms, t1_ms))
    }

    pub fn query_next(&mut self, iter: &mut RangeIter) -> Option<(u32, f64)> { iter.next(&mut self.ring) }

    pub fn query_end(&self, iter: RangeIter) { iter.end() }

    /// Return the most recent `(ts_ms, value)` for `series`, or `None` if
    /// there is no data.
    pub fn query_latest(&self, series: u16) -> Option<(u32, f64)> {
        if series > MAX_SERIES {
            return None;
        }
        query_latest(&self.ring, series)
    }

    /// Persist a snapshot record so reopen can seed the head directly
    /// instead of scanning footers (spec.md §4.6, §8 property 6).
    pub fn snapshot_save(&mut self) -> std::io::Result<()> {
        let tail_seqno = self
            .ring
            .summaries
            .iter()
            .filter(|s| s.valid && s.block_count > 0)
            .map(|s| s.seg_seqno)
            .min()
            .unwrap_or(self.ring.head.seg_seqno);

        let snap = Snapshot {
            version: SNAPSHOT_VERSION,
            epoch_id: self.epoch_id,
            seg_seq_head: self.ring.head.seg_seqno,
            seg_seq_tail: tail_seqno,
            head_addr: self.ring.head.addr,
        };
        self.meta.save_snapshot(&mut self.ring.flash, &snap)?;

        match self.meta.load_snapshot(&self.ring.flash) {
            Some(readback) if readback == snap => Ok(()),
            _ => Err(crate::meta::verify_write_err()),
        }
    }

    /// Current counters (spec.md §6 `info`).
    pub fn info(&self) -> DbInfo {
        let tail_seqno = self
            .ring
            .summaries
            .iter()
            .filter(|s| s.valid && s.block_count > 0)
            .map(|s| s.seg_seqno)
            .min()
            .unwrap_or(self.ring.head.seg_seqno);
        let RingStats { blocks_written, crc_errors, gc_warn, gc_busy, recovery_truncations } = self.ring.stats;
        DbInfo {
            head_seq: self.ring.head.seg_seqno,
            tail_seq: tail_seqno,
            blocks_written,
            crc_errors,
            gc_warn,
            gc_busy,
            recovery_truncations,
        }
    }

    /// Count of quantized values that saturated against `[-32768, 32767]`
    /// since open (spec.md §9 Open Questions: `quant_saturations`).
    pub fn quant_saturations(&self) -> u64 { self.quant_saturations }
}
