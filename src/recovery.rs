//! Recovery scanner (spec.md §4.4): runs exactly once at open, before any
//! writes, to seed the zone map and the ring head.

use crate::codec::decode_deltas;
use crate::flash::{Clock, FlashDriver};
use crate::geometry::{DATA_PAGES_PER_SEGMENT, PAYLOAD_LEN};
use crate::meta::MetaStore;
use crate::ring::{reconstruct_times_from_deltas, RingManager};

impl<F: FlashDriver, C: Clock> RingManager<F, C> {
    /// Run the full recovery sweep: footer sweep, head seeding (snapshot,
    /// else highest footer, else blank device), head-hint probe, tail
    /// probe. Bounded by `seg_count * 15 + 1` page visits.
    pub fn recover(&mut self, meta: &MetaStore) -> std::io::Result<()> {
        // 1. Footer sweep.
        for idx in 0..self.seg_count as usize {
            if let Some(footer) = self.read_footer(idx) {
                let addr_first = self.summaries[idx].addr_first;
                self.summaries[idx] = crate::ring::SegmentSummary::from_footer(addr_first, &footer);
            }
        }

        // 2. Seed head.
        if let Some(snap) = meta.load_snapshot(&self.flash) {
            self.head = crate::ring::RingHead {
                addr: snap.head_addr,
                page_index: ((snap.head_addr - self.data_base) % crate::geometry::SEGMENT_SIZE as u32
                    / crate::geometry::PAGE_SIZE as u32) as usize,
                seg_seqno: snap.seg_seq_head,
            };
        } else if let Some((best_idx, best)) =
            self.summaries.iter().enumerate().filter(|(_, s)| s.valid).max_by_key(|(_, s)| s.seg_seqno)
        {
            // `best` is finalized (it has a footer); the true head sits in
            // the slot physically after it, at the seqno that slot will be
            // assigned once it, too, finalizes.
            let next_idx = (best_idx + 1) % self.seg_count as usize;
            self.head = crate::ring::RingHead {
                addr: self.summaries[next_idx].addr_first,
                page_index: 0,
                seg_seqno: best.seg_seqno + 1,
            };
        } else {
            // Blank device: synthesize summary[0] by scanning its pages.
            self.head = crate::ring::RingHead { addr: self.data_base, page_index: 0, seg_seqno: 1 };
            self.synthesize_summary(0, 1)?;
        }

        // 3. Head-hint probe.
        if let Some(hint) = meta.load_head_hint(&self.flash) {
            let usable = self.seg_count * crate::geometry::SEGMENT_SIZE as u32;
            if hint.addr < usable {
                self.head.addr = hint.addr;
                self.head.seg_seqno = hint.seq;
                let idx = self.slot_index_for_addr(hint.addr);
                self.head.page_index =
                    ((hint.addr - self.summaries[idx].addr_first) / crate::geometry::PAGE_SIZE as u32) as usize;
            }
        }

        // 4. Tail probe.
        self.tail_probe()?;

        Ok(())
    }

    /// Scan a segment's data pages page-by-page from scratch, accepting
    /// CRC-clean pages and folding them into a live summary tagged with
    /// `seqno`. Used both for a genuinely blank device and for a
    /// finalized segment whose own footer didn't survive but whose data
    /// pages did.
    fn synthesize_summary(&mut self, idx: usize, seqno: u32) -> std::io::Result<()> {
        let mut footer = crate::footer::Footer::empty(seqno);
        let mut any = false;
        for page_idx in 0..DATA_PAGES_PER_SEGMENT {
            let Some(header) = self.read_block_header(idx, page_idx) else { break };
            let addr = self.summaries[idx].addr_first + (page_idx * crate::geometry::PAGE_SIZE) as u32;
            let mut page = [0u8; crate::geometry::PAGE_SIZE];
            self.flash.read(addr, &mut page)?;
            let mut payload = [0u8; PAYLOAD_LEN];
            payload.copy_from_slice(&page[0..PAYLOAD_LEN]);
            if crate::crc::crc32c(&payload) != header.payload_crc {
                break;
            }
            let deltas = decode_deltas(&payload, header.dt_bits, header.count as usize);
            let times = reconstruct_times_from_deltas(header.t0_ms, &deltas);
            footer.observe_block(header.series, times.into_iter());
            any = true;
        }
        if any {
            let addr_first = self.summaries[idx].addr_first;
            self.summaries[idx] = crate::ring::SegmentSummary::from_footer(addr_first, &footer);
            self.summaries[idx].valid = true;
        }
        Ok(())
    }

    /// Starting at the head, validate data pages in order until the first
    /// failure. If an entire segment validates clean, it is already
    /// finalized (whether or not its footer survived) — hop to the next
    /// slot and keep probing there, rather than stopping at its last data
    /// page, so a head-hint or best-footer fallback that landed a whole
    /// segment behind the true head still converges on it. Bounded by
    /// spec.md §4.4 step 5's hard cap of `seg_count * 15 + 1` page visits.
    fn tail_probe(&mut self) -> std::io::Result<()> {
        let cap = self.seg_count as usize * DATA_PAGES_PER_SEGMENT + 1;
        let mut visited = 0usize;

        loop {
            let idx = self.slot_index_for_addr(self.head.addr);
            let addr_first = self.summaries[idx].addr_first;

            let mut valid_pages = 0usize;
            let mut page_idx = 0usize;
            while page_idx < DATA_PAGES_PER_SEGMENT {
                if visited >= cap {
                    self.head.page_index = page_idx;
                    self.head.addr = addr_first + (page_idx * crate::geometry::PAGE_SIZE) as u32;
                    return Ok(());
                }
                visited += 1;

                let addr = addr_first + (page_idx * crate::geometry::PAGE_SIZE) as u32;
                let mut page = [0u8; crate::geometry::PAGE_SIZE];
                self.flash.read(addr, &mut page)?;
                let mut header_buf = [0u8; crate::geometry::HEADER_LEN];
                header_buf.copy_from_slice(&page[PAYLOAD_LEN..crate::geometry::PAGE_SIZE]);
                let Ok(header) = crate::codec::BlockHeader::unpack(&header_buf) else { break };
                let mut payload = [0u8; PAYLOAD_LEN];
                payload.copy_from_slice(&page[0..PAYLOAD_LEN]);
                if crate::crc::crc32c(&payload) != header.payload_crc {
                    break;
                }
                valid_pages += 1;
                page_idx += 1;
            }

            if page_idx == DATA_PAGES_PER_SEGMENT {
                // Whole segment validated: it's finalized, whether or not
                // its footer is intact. If the footer sweep never
                // populated a summary for it (the footer itself was the
                // casualty), rebuild one from the pages we just validated
                // so the zone map still covers this segment's rows.
                if !self.summaries[idx].valid {
                    self.synthesize_summary(idx, self.head.seg_seqno)?;
                }
                let next_idx = (idx + 1) % self.seg_count as usize;
                self.head.seg_seqno = self.head.seg_seqno.wrapping_add(1);
                self.head.addr = self.summaries[next_idx].addr_first;
                self.head.page_index = 0;
                continue;
            }

            if valid_pages > 0 {
                self.stats.recovery_truncations += 1;
            }
            self.head.page_index = page_idx;
            self.head.addr = addr_first + (page_idx * crate::geometry::PAGE_SIZE) as u32;
            return Ok(());
        }
    }
}
