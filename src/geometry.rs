//! On-flash geometry constants. Normative per the storage format: changing
//! any of these invalidates every existing image.

/// Bytes in one flash erase unit.
pub const SEGMENT_SIZE: usize = 4096;
/// Bytes in one flash program unit.
pub const PAGE_SIZE: usize = 256;
/// Data + footer pages per segment.
pub const PAGES_PER_SEGMENT: usize = 16;
/// Data pages per segment (the last page of each segment is the footer).
pub const DATA_PAGES_PER_SEGMENT: usize = PAGES_PER_SEGMENT - 1;
/// Page index of the footer within a segment.
pub const FOOTER_PAGE_INDEX: usize = DATA_PAGES_PER_SEGMENT;

/// Block payload budget: bytes available for delta + qval lanes.
pub const PAYLOAD_LEN: usize = 224;
/// Block header size.
pub const HEADER_LEN: usize = 32;
/// Number of first header bytes covered by `header_crc`.
pub const HEADER_CRC_COVERED_LEN: usize = 28;

/// Highest valid series id (dense 8-bit space).
pub const MAX_SERIES: u16 = 255;
/// Bytes in the segment footer's series-presence bitmap (256 bits).
pub const SERIES_BITMAP_BYTES: usize = 32;

/// Bytes reserved at the top of the flash device for A/B snapshots and the
/// head-hint record.
pub const METADATA_RESERVED_BYTES: usize = 32768;

/// `BLK1` little-endian.
pub const BLOCK_MAGIC: u32 = 0x424C_4B31;
/// `SFG1` little-endian.
pub const FOOTER_MAGIC: u32 = 0x5346_4731;

/// Worst-case staging capacity for the block builder: enough rows that the
/// 224 B payload budget always forces a close before this many samples
/// accumulate, for either delta width.
pub const MAX_STAGED_SAMPLES: usize = 74;

/// `le(a, b) := ((b - a) mod 2^32) < 2^31` — half-range wrap-aware ordering
/// used by both the range iterator and the segment pruning test.
pub fn le(a: u32, b: u32) -> bool { b.wrapping_sub(a) < 0x8000_0000 }

/// `in_range(t, t0, t1)` per spec.md §9 "Wrap-aware time arithmetic".
pub fn in_range(t: u32, t0: u32, t1: u32) -> bool {
    if le(t0, t1) { le(t0, t) && le(t, t1) } else { le(t0, t) || le(t, t1) }
}
