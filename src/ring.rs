//! Segment ring manager (spec.md §4.3): owns the ring head, the in-RAM
//! zone map (segment summaries), and the two flash primitives it
//! exercises. Plays the role the teacher's `backend/hw.rs::PddbOs` plays
//! for page-table/FastSpace bookkeeping, but for a circular append log
//! instead of a random-access page table.

use crate::codec::{decode_deltas, BlockHeader};
use crate::error;
use crate::flash::{Clock, FlashDriver};
use crate::footer::Footer;
use crate::geometry::{
    DATA_PAGES_PER_SEGMENT, FOOTER_PAGE_INDEX, HEADER_LEN, PAGE_SIZE, PAYLOAD_LEN, SEGMENT_SIZE,
};

/// GC free-space low watermark, as a percentage of total segments.
const GC_WARN_PCT: u32 = 10;
/// GC free-space critical watermark, as a percentage of total segments.
const GC_BUSY_PCT: u32 = 5;
/// Max 4 KiB erases GC may issue per window.
const GC_ERASE_QUOTA: u32 = 2;
/// GC quota window, matching spec.md §4.3 / §8 property 7.
const GC_WINDOW_MS: u64 = 1000;
/// Head-hint save cadence, by block count.
const HEAD_HINT_BLOCK_INTERVAL: u32 = 64;
/// Head-hint save cadence, by wall-clock time.
const HEAD_HINT_MS_INTERVAL: u64 = 2000;

/// In-RAM zone-map entry: one per physical segment slot.
#[derive(Clone, Debug)]
pub struct SegmentSummary {
    pub addr_first: u32,
    pub seg_seqno: u32,
    pub t_min: u32,
    pub t_max: u32,
    pub block_count: u32,
    pub series_bitmap: [u8; crate::geometry::SERIES_BITMAP_BYTES],
    pub valid: bool,
}

impl SegmentSummary {
    pub(crate) fn empty(addr_first: u32) -> Self {
        Self {
            addr_first,
            seg_seqno: 0,
            t_min: u32::MAX,
            t_max: 0,
            block_count: 0,
            series_bitmap: [0u8; crate::geometry::SERIES_BITMAP_BYTES],
            valid: false,
        }
    }

    pub(crate) fn from_footer(addr_first: u32, footer: &Footer) -> Self {
        Self {
            addr_first,
            seg_seqno: footer.seg_seqno,
            t_min: footer.t_min,
            t_max: footer.t_max,
            block_count: footer.block_count,
            series_bitmap: footer.series_bitmap,
            valid: true,
        }
    }

    pub fn has_series(&self, series: u16) -> bool {
        let byte = series as usize / 8;
        let bit = series as usize % 8;
        (self.series_bitmap[byte] >> bit) & 1 == 1
    }
}

/// The writer's position: next free page to program.
#[derive(Clone, Copy, Debug)]
pub struct RingHead {
    pub addr: u32,
    pub page_index: usize,
    pub seg_seqno: u32,
}

/// Non-blocking vs. blocking GC quota behavior (spec.md §4.3, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcMode {
    Blocking,
    NonBlocking,
}

/// Accumulated counters surfaced via `Db::info` (spec.md §6).
#[derive(Clone, Copy, Debug, Default)]
pub struct RingStats {
    pub blocks_written: u64,
    pub crc_errors: u64,
    pub gc_warn: u64,
    pub gc_busy: u64,
    pub recovery_truncations: u64,
}

pub struct RingManager<F: FlashDriver, C: Clock> {
    pub flash: F,
    pub clock: C,
    pub seg_count: u32,
    pub data_base: u32,
    pub summaries: Vec<SegmentSummary>,
    pub head: RingHead,
    pub stats: RingStats,
    gc_window_start_ms: u64,
    gc_erases_this_window: u32,
    blocks_since_hint: u32,
    last_hint_ms: u64,
}

impl<F: FlashDriver, C: Clock> RingManager<F, C> {
    pub fn new(flash: F, clock: C, data_base: u32, seg_count: u32) -> Self {
        let summaries =
            (0..seg_count).map(|i| SegmentSummary::empty(data_base + i * SEGMENT_SIZE as u32)).collect();
        Self {
            flash,
            clock,
            seg_count,
            data_base,
            summaries,
            head: RingHead { addr: data_base, page_index: 0, seg_seqno: 1 },
            stats: RingStats::default(),
            gc_window_start_ms: 0,
            gc_erases_this_window: 0,
            blocks_since_hint: 0,
            last_hint_ms: 0,
        }
    }

    pub fn slot_index_for_addr(&self, addr: u32) -> usize {
        ((addr - self.data_base) / SEGMENT_SIZE as u32) as usize
    }

    fn current_slot(&self) -> usize { self.slot_index_for_addr(self.head.addr) }

    /// Read the footer page of segment slot `idx`, if any footer validates.
    pub fn read_footer(&self, idx: usize) -> Option<Footer> {
        let addr = self.summaries[idx].addr_first + (FOOTER_PAGE_INDEX * PAGE_SIZE) as u32;
        let mut buf = [0u8; PAGE_SIZE];
        self.flash.read(addr, &mut buf).ok()?;
        Footer::unpack(&buf).ok()
    }

    /// Read and decode the data page at segment slot `idx`, page `page_idx`.
    /// Returns `None` if the header fails to validate.
    pub fn read_block_header(&self, idx: usize, page_idx: usize) -> Option<BlockHeader> {
        let addr = self.summaries[idx].addr_first + (page_idx * PAGE_SIZE) as u32;
        let mut buf = [0u8; PAGE_SIZE];
        self.flash.read(addr, &mut buf).ok()?;
        let mut header_buf = [0u8; HEADER_LEN];
        header_buf.copy_from_slice(&buf[PAYLOAD_LEN..PAGE_SIZE]);
        BlockHeader::unpack(&header_buf).ok()
    }

    pub fn read_page_raw(&self, idx: usize, page_idx: usize) -> std::io::Result<[u8; PAGE_SIZE]> {
        let addr = self.summaries[idx].addr_first + (page_idx * PAGE_SIZE) as u32;
        let mut buf = [0u8; PAGE_SIZE];
        self.flash.read(addr, &mut buf)?;
        Ok(buf)
    }

    /// GC reclaim-if-needed, invoked before every write (spec.md §4.3).
    fn reclaim_if_needed(&mut self, mode: GcMode) -> std::io::Result<()> {
        let live = self.summaries.iter().filter(|s| s.block_count > 0).count() as u32;
        let free = self.seg_count - live;
        if free * 100 >= GC_WARN_PCT * self.seg_count {
            return Ok(());
        }
        self.stats.gc_warn += 1;
        if free * 100 < GC_BUSY_PCT * self.seg_count {
            self.stats.gc_busy += 1;
        }

        loop {
            let now = self.clock.millis();
            if now.wrapping_sub(self.gc_window_start_ms) >= GC_WINDOW_MS {
                self.gc_window_start_ms = now;
                self.gc_erases_this_window = 0;
            }
            if self.gc_erases_this_window < GC_ERASE_QUOTA {
                break;
            }
            match mode {
                GcMode::NonBlocking => return Err(error::busy("gc quota exhausted")),
                GcMode::Blocking => continue,
            }
        }

        // pick the oldest live segment by seg_seqno
        let oldest = self
            .summaries
            .iter()
            .enumerate()
            .filter(|(_, s)| s.block_count > 0)
            .min_by_key(|(_, s)| s.seg_seqno)
            .map(|(i, _)| i);

        if let Some(idx) = oldest {
            let addr = self.summaries[idx].addr_first;
            self.flash.erase_4k(addr)?;
            self.gc_erases_this_window += 1;
            self.summaries[idx] = SegmentSummary::empty(addr);
        }
        Ok(())
    }

    /// Publish one prepared block, GC'ing first if needed, rotating the
    /// segment if the current one is now full (spec.md §4.3 steps 1-5).
    pub fn publish_block(&mut self, header: &BlockHeader, payload: &[u8; PAYLOAD_LEN], mode: GcMode) -> std::io::Result<()> {
        self.reclaim_if_needed(mode)?;

        let addr = self.head.addr;
        let mut payload_page = [0xFFu8; PAGE_SIZE];
        payload_page[0..PAYLOAD_LEN].copy_from_slice(payload);
        self.flash.program_256(addr, &payload_page)?;

        let mut header_page = [0xFFu8; PAGE_SIZE];
        header_page[PAYLOAD_LEN..PAGE_SIZE].copy_from_slice(&header.pack());
        self.flash.program_256(addr, &header_page)?;

        let idx = self.current_slot();
        let deltas = decode_deltas(payload, header.dt_bits, header.count as usize);
        let times = reconstruct_times_from_deltas(header.t0_ms, &deltas);
        let summary = &mut self.summaries[idx];
        summary.valid = true;
        summary.seg_seqno = self.head.seg_seqno;
        if summary.block_count == 0 {
            summary.t_min = times[0];
            summary.t_max = *times.last().unwrap();
        }
        for &t in &times {
            if !crate::geometry::le(summary.t_min, t) {
                summary.t_min = t;
            }
            if crate::geometry::le(summary.t_max, t) {
                summary.t_max = t;
            }
        }
        summary.block_count += 1;
        let byte = header.series as usize / 8;
        let bit = header.series as usize % 8;
        summary.series_bitmap[byte] |= 1 << bit;

        self.head.addr += PAGE_SIZE as u32;
        self.head.page_index += 1;
        self.stats.blocks_written += 1;
        self.blocks_since_hint += 1;

        if self.head.page_index == DATA_PAGES_PER_SEGMENT {
            self.finalize_and_rotate()?;
        }

        Ok(())
    }

    /// Whether a head-hint save is due, per spec.md §4.3 step 5.
    pub fn hint_due(&self) -> bool {
        self.blocks_since_hint >= HEAD_HINT_BLOCK_INTERVAL
            || self.clock.millis().wrapping_sub(self.last_hint_ms) >= HEAD_HINT_MS_INTERVAL
    }

    pub fn mark_hint_saved(&mut self) {
        self.blocks_since_hint = 0;
        self.last_hint_ms = self.clock.millis();
    }

    /// Finalize the current segment (fold its CRC-clean pages into a
    /// footer, program it) and rotate to the next slot, erasing it.
    pub fn finalize_and_rotate(&mut self) -> std::io::Result<()> {
        let idx = self.current_slot();
        let addr_first = self.summaries[idx].addr_first;

        let mut footer = Footer::empty(self.head.seg_seqno);
        for page_idx in 0..DATA_PAGES_PER_SEGMENT {
            if let Some(header) = self.read_block_header(idx, page_idx) {
                let mut payload_buf = [0u8; PAGE_SIZE];
                let page_addr = addr_first + (page_idx * PAGE_SIZE) as u32;
                self.flash.read(page_addr, &mut payload_buf)?;
                let mut payload = [0u8; PAYLOAD_LEN];
                payload.copy_from_slice(&payload_buf[0..PAYLOAD_LEN]);
                if crate::crc::crc32c(&payload) == header.payload_crc {
                    let deltas = decode_deltas(&payload, header.dt_bits, header.count as usize);
                    let times = reconstruct_times_from_deltas(header.t0_ms, &deltas);
                    footer.observe_block(header.series, times.into_iter());
                }
            }
        }
        let footer_addr = addr_first + (FOOTER_PAGE_INDEX * PAGE_SIZE) as u32;
        self.flash.program_256(footer_addr, &footer.pack())?;
        self.summaries[idx] = SegmentSummary::from_footer(addr_first, &footer);

        let next_idx = (idx + 1) % self.seg_count as usize;
        let next_addr = self.summaries[next_idx].addr_first;
        self.flash.erase_4k(next_addr)?;
        self.head.seg_seqno += 1;
        self.head.page_index = 0;
        self.head.addr = next_addr;
        self.summaries[next_idx] = SegmentSummary::empty(next_addr);

        Ok(())
    }
}

/// Reconstruct absolute timestamps from a block's `t0_ms` and its decoded
/// delta lane (prefix sum), without needing the qval lane (spec.md §4.3
/// step 3, §4.5).
pub(crate) fn reconstruct_times_from_deltas(t0_ms: u32, deltas: &[u32]) -> Vec<u32> {
    let mut t = t0_ms;
    let mut out = Vec::with_capacity(deltas.len());
    for (i, &d) in deltas.iter().enumerate() {
        if i > 0 {
            t = t.wrapping_add(d);
        }
        out.push(t);
    }
    out
}
