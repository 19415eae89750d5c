//! Zone-map-guided range iterator and latest-query (spec.md §4.5).
//!
//! Plays the role the teacher's dictionary/basis cache traversal plays for
//! key iteration, but wrap-aware over time instead of lexicographic over
//! key names, and pruned by the segment summaries' `t_min`/`t_max`/series
//! bitmap instead of a page table.

use crate::codec::decode_payload;
use crate::flash::{Clock, FlashDriver};
use crate::geometry::{in_range, DATA_PAGES_PER_SEGMENT, PAGE_SIZE};
use crate::ring::{reconstruct_times_from_deltas, RingManager};

/// One decoded row pending emission from the current page.
struct PageRows {
    times: Vec<u32>,
    values: Vec<f64>,
    next_row: usize,
}

/// Handle returned by `Db::query_begin`. Holds only references/indices
/// into the ring's RAM summaries and flash addresses, per spec.md §3's
/// "iterator holds only immutable references" invariant.
pub struct RangeIter {
    series: u16,
    t0: u32,
    t1: u32,
    seg_order: Vec<usize>,
    seg_cursor: usize,
    page_in_seg: usize,
    page_cap_remaining: u64,
    current: Option<PageRows>,
    exhausted: bool,
}

impl RangeIter {
    pub(crate) fn new<F: FlashDriver, C: Clock>(ring: &RingManager<F, C>, series: u16, t0: u32, t1: u32) -> Self {
        // Order segments oldest-to-newest by seg_seqno so rows come out in
        // insertion order (spec.md §8 property 3), pruning ineligible ones
        // up front.
        let mut order: Vec<usize> = (0..ring.summaries.len())
            .filter(|&i| {
                let s = &ring.summaries[i];
                if !s.valid || s.block_count == 0 || !s.has_series(series) {
                    return false;
                }
                in_range(s.t_min, t0, t1) || in_range(s.t_max, t0, t1) || in_range(t0, s.t_min, s.t_max)
            })
            .collect();
        order.sort_by_key(|&i| ring.summaries[i].seg_seqno);

        let cap = ring.seg_count as u64 * DATA_PAGES_PER_SEGMENT as u64 + 1;
        Self {
            series,
            t0,
            t1,
            seg_order: order,
            seg_cursor: 0,
            page_in_seg: 0,
            page_cap_remaining: cap,
            current: None,
            exhausted: false,
        }
    }

    /// Load the next page with rows into `self.current`, skipping pages
    /// that don't match or don't validate, abandoning a segment on the
    /// first invalid header or failed payload CRC (spec.md §4.5).
    fn advance_page<F: FlashDriver, C: Clock>(&mut self, ring: &mut RingManager<F, C>) {
        'segments: while self.seg_cursor < self.seg_order.len() {
            let idx = self.seg_order[self.seg_cursor];
            while self.page_in_seg < DATA_PAGES_PER_SEGMENT {
                if self.page_cap_remaining == 0 {
                    self.exhausted = true;
                    return;
                }
                self.page_cap_remaining -= 1;

                let page = match ring.read_page_raw(idx, self.page_in_seg) {
                    Ok(p) => p,
                    Err(_) => {
                        self.seg_cursor += 1;
                        self.page_in_seg = 0;
                        continue 'segments;
                    }
                };
                let mut header_buf = [0u8; crate::geometry::HEADER_LEN];
                header_buf.copy_from_slice(&page[crate::geometry::PAYLOAD_LEN..PAGE_SIZE]);
                let header = match crate::codec::BlockHeader::unpack(&header_buf) {
                    Ok(h) => h,
                    Err(_) => {
                        // corrupt header: abandon this segment (rollover boundary)
                        self.seg_cursor += 1;
                        self.page_in_seg = 0;
                        continue 'segments;
                    }
                };
                if header.series != self.series {
                    self.page_in_seg += 1;
                    continue;
                }
                let mut payload = [0u8; crate::geometry::PAYLOAD_LEN];
                payload.copy_from_slice(&page[0..crate::geometry::PAYLOAD_LEN]);
                if crate::crc::crc32c(&payload) != header.payload_crc {
                    ring.stats.crc_errors += 1;
                    self.seg_cursor += 1;
                    self.page_in_seg = 0;
                    continue 'segments;
                }

                let (deltas, qvals) = decode_payload(&payload, header.dt_bits, header.count as usize);
                let times = reconstruct_times_from_deltas(header.t0_ms, &deltas);
                let values: Vec<f64> =
                    qvals.iter().map(|&q| header.bias as f64 + header.scale as f64 * q as f64).collect();
                self.page_in_seg += 1;
                self.current = Some(PageRows { times, values, next_row: 0 });
                return;
            }
            self.seg_cursor += 1;
            self.page_in_seg = 0;
        }
        self.exhausted = true;
    }

    /// Yield the next `(ts_ms, value)` in range, or `None` when exhausted.
    pub fn next<F: FlashDriver, C: Clock>(&mut self, ring: &mut RingManager<F, C>) -> Option<(u32, f64)> {
        loop {
            if self.exhausted {
                return None;
            }
            if self.current.is_none() {
                self.advance_page(ring);
                if self.exhausted {
                    return None;
                }
            }
            let rows = self.current.as_mut().unwrap();
            while rows.next_row < rows.times.len() {
                let i = rows.next_row;
                rows.next_row += 1;
                let t = rows.times[i];
                if in_range(t, self.t0, self.t1) {
                    return Some((t, rows.values[i]));
                }
            }
            self.current = None;
        }
    }

    pub fn end(self) {}
}

/// Scan summaries by descending `seg_seqno`; in the first whose series bit
/// is set, scan pages 14..0 for a header matching `series`; decode and
/// return only the last row (spec.md §4.5 "Latest query").
pub fn query_latest<F: FlashDriver, C: Clock>(ring: &RingManager<F, C>, series: u16) -> Option<(u32, f64)> {
    let mut order: Vec<usize> =
        (0..ring.summaries.len()).filter(|&i| ring.summaries[i].valid && ring.summaries[i].has_series(series)).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(ring.summaries[i].seg_seqno));

    for idx in order {
        for page_idx in (0..DATA_PAGES_PER_SEGMENT).rev() {
            let page = ring.read_page_raw(idx, page_idx).ok()?;
            let mut header_buf = [0u8; crate::geometry::HEADER_LEN];
            header_buf.copy_from_slice(&page[crate::geometry::PAYLOAD_LEN..PAGE_SIZE]);
            let Ok(header) = crate::codec::BlockHeader::unpack(&header_buf) else { continue };
            if header.series != series {
                continue;
            }
            let mut payload = [0u8; crate::geometry::PAYLOAD_LEN];
            payload.copy_from_slice(&page[0..crate::geometry::PAYLOAD_LEN]);
            if crate::crc::crc32c(&payload) != header.payload_crc {
                continue;
            }
            let (deltas, qvals) = decode_payload(&payload, header.dt_bits, header.count as usize);
            let times = reconstruct_times_from_deltas(header.t0_ms, &deltas);
            let last = times.len() - 1;
            let value = header.bias as f64 + header.scale as f64 * qvals[last] as f64;
            return Some((times[last], value));
        }
    }
    None
}
