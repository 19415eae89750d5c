//! Segment footer record (spec.md §3 item 3, §4.3 step 2): 256 B, written
//! to the last page of a segment exactly once, at rollover.

use crate::crc::crc32c;
use crate::error;
use crate::geometry::{FOOTER_MAGIC, PAGE_SIZE, SERIES_BITMAP_BYTES};

const SEQ_OFF: usize = 4;
const TMIN_OFF: usize = 8;
const TMAX_OFF: usize = 12;
const COUNT_OFF: usize = 16;
const BITMAP_OFF: usize = 20;
const CRC_OFF: usize = BITMAP_OFF + SERIES_BITMAP_BYTES;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Footer {
    pub seg_seqno: u32,
    pub t_min: u32,
    pub t_max: u32,
    pub block_count: u32,
    pub series_bitmap: [u8; SERIES_BITMAP_BYTES],
}

impl Footer {
    pub fn empty(seg_seqno: u32) -> Self {
        Self { seg_seqno, t_min: u32::MAX, t_max: 0, block_count: 0, series_bitmap: [0u8; SERIES_BITMAP_BYTES] }
    }

    pub fn set_series(&mut self, series: u16) {
        let byte = series as usize / 8;
        let bit = series as usize % 8;
        self.series_bitmap[byte] |= 1 << bit;
    }

    pub fn has_series(&self, series: u16) -> bool {
        let byte = series as usize / 8;
        let bit = series as usize % 8;
        (self.series_bitmap[byte] >> bit) & 1 == 1
    }

    pub fn observe_block(&mut self, series: u16, times: impl Iterator<Item = u32>) {
        self.set_series(series);
        let mut seeded = self.block_count > 0;
        for t in times {
            if !seeded {
                self.t_min = t;
                self.t_max = t;
                seeded = true;
            } else {
                if !crate::geometry::le(self.t_min, t) {
                    self.t_min = t;
                }
                if crate::geometry::le(self.t_max, t) {
                    self.t_max = t;
                }
            }
        }
        self.block_count += 1;
    }

    pub fn pack(&self) -> [u8; PAGE_SIZE] {
        let mut buf = [0xFFu8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&FOOTER_MAGIC.to_le_bytes());
        buf[SEQ_OFF..SEQ_OFF + 4].copy_from_slice(&self.seg_seqno.to_le_bytes());
        buf[TMIN_OFF..TMIN_OFF + 4].copy_from_slice(&self.t_min.to_le_bytes());
        buf[TMAX_OFF..TMAX_OFF + 4].copy_from_slice(&self.t_max.to_le_bytes());
        buf[COUNT_OFF..COUNT_OFF + 4].copy_from_slice(&self.block_count.to_le_bytes());
        buf[BITMAP_OFF..BITMAP_OFF + SERIES_BITMAP_BYTES].copy_from_slice(&self.series_bitmap);
        buf[CRC_OFF..CRC_OFF + 4].copy_from_slice(&[0, 0, 0, 0]);
        let crc = crc32c(&buf[0..CRC_OFF + 4]);
        buf[CRC_OFF..CRC_OFF + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn unpack(buf: &[u8; PAGE_SIZE]) -> std::io::Result<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != FOOTER_MAGIC {
            return Err(error::integrity("footer: bad magic"));
        }
        let mut check = *buf;
        check[CRC_OFF..CRC_OFF + 4].copy_from_slice(&[0, 0, 0, 0]);
        let expect_crc = u32::from_le_bytes(buf[CRC_OFF..CRC_OFF + 4].try_into().unwrap());
        if crc32c(&check[0..CRC_OFF + 4]) != expect_crc {
            return Err(error::integrity("footer: crc mismatch"));
        }
        let seg_seqno = u32::from_le_bytes(buf[SEQ_OFF..SEQ_OFF + 4].try_into().unwrap());
        let t_min = u32::from_le_bytes(buf[TMIN_OFF..TMIN_OFF + 4].try_into().unwrap());
        let t_max = u32::from_le_bytes(buf[TMAX_OFF..TMAX_OFF + 4].try_into().unwrap());
        let block_count = u32::from_le_bytes(buf[COUNT_OFF..COUNT_OFF + 4].try_into().unwrap());
        let mut series_bitmap = [0u8; SERIES_BITMAP_BYTES];
        series_bitmap.copy_from_slice(&buf[BITMAP_OFF..BITMAP_OFF + SERIES_BITMAP_BYTES]);
        Ok(Self { seg_seqno, t_min, t_max, block_count, series_bitmap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let mut f = Footer::empty(7);
        f.observe_block(3, [100, 110, 120].into_iter());
        f.observe_block(3, [130].into_iter());
        let packed = f.pack();
        let unpacked = Footer::unpack(&packed).unwrap();
        assert_eq!(f, unpacked);
        assert!(unpacked.has_series(3));
        assert!(!unpacked.has_series(4));
        assert_eq!(unpacked.t_min, 100);
        assert_eq!(unpacked.t_max, 130);
        assert_eq!(unpacked.block_count, 2);
    }

    #[test]
    fn bad_magic_rejected() {
        let buf = [0xFFu8; PAGE_SIZE];
        assert!(Footer::unpack(&buf).is_err());
    }
}
