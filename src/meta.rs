//! Metadata store: A/B snapshot sectors + head-hint sector (spec.md §4.6).
//!
//! Mirrors the teacher's `backend/hw.rs` FastSpace "rare update" discipline
//! (erase-then-program a whole structure, rely on CRC to detect a torn
//! write) but applied to the two much smaller records this format needs.

use crate::crc::crc32c;
use crate::error;
use crate::flash::FlashDriver;
use crate::geometry::SEGMENT_SIZE;

const SNAPSHOT_RECORD_LEN: usize = 24;
const HINT_RECORD_LEN: usize = 12;

/// `{version, epoch_id, seg_seq_head, seg_seq_tail, head_addr, crc}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u32,
    pub epoch_id: u32,
    pub seg_seq_head: u32,
    pub seg_seq_tail: u32,
    pub head_addr: u32,
}

impl Snapshot {
    fn pack(&self) -> [u8; SNAPSHOT_RECORD_LEN] {
        let mut buf = [0u8; SNAPSHOT_RECORD_LEN];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.epoch_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seg_seq_head.to_le_bytes());
        buf[12..16].copy_from_slice(&self.seg_seq_tail.to_le_bytes());
        buf[16..20].copy_from_slice(&self.head_addr.to_le_bytes());
        let crc = crc32c(&buf[0..20]);
        buf[20..24].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn unpack(buf: &[u8; SNAPSHOT_RECORD_LEN]) -> Option<Self> {
        let crc = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        if crc32c(&buf[0..20]) != crc {
            return None;
        }
        Some(Self {
            version: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            epoch_id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            seg_seq_head: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            seg_seq_tail: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            head_addr: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

/// `{addr, seq, crc}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeadHint {
    pub addr: u32,
    pub seq: u32,
}

impl HeadHint {
    fn pack(&self) -> [u8; HINT_RECORD_LEN] {
        let mut buf = [0u8; HINT_RECORD_LEN];
        buf[0..4].copy_from_slice(&self.addr.to_le_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_le_bytes());
        let crc = crc32c(&buf[0..8]);
        buf[8..12].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn unpack(buf: &[u8; HINT_RECORD_LEN]) -> Option<Self> {
        let crc = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if crc32c(&buf[0..8]) != crc {
            return None;
        }
        Some(Self {
            addr: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            seq: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        })
    }
}

/// Owns the three dedicated sectors at the top of the flash device: A, B,
/// and the head-hint sector, within `METADATA_RESERVED_BYTES`.
pub struct MetaStore {
    pub sector_a: u32,
    pub sector_b: u32,
    pub hint_sector: u32,
}

impl MetaStore {
    pub fn new(base: u32) -> Self {
        Self { sector_a: base, sector_b: base + SEGMENT_SIZE as u32, hint_sector: base + 2 * SEGMENT_SIZE as u32 }
    }

    fn read_candidate<F: FlashDriver, const N: usize>(flash: &F, sector: u32) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        flash.read(sector, &mut buf).ok()?;
        if buf.iter().all(|&b| b == 0xFF) {
            return None;
        }
        Some(buf)
    }

    /// Load the newest valid snapshot across sectors A and B, tie-breaking
    /// on the higher `seg_seq_head`.
    pub fn load_snapshot<F: FlashDriver>(&self, flash: &F) -> Option<Snapshot> {
        let a = Self::read_candidate::<F, SNAPSHOT_RECORD_LEN>(flash, self.sector_a).and_then(|b| Snapshot::unpack(&b));
        let b = Self::read_candidate::<F, SNAPSHOT_RECORD_LEN>(flash, self.sector_b).and_then(|b| Snapshot::unpack(&b));
        match (a, b) {
            (Some(a), Some(b)) => Some(if a.seg_seq_head >= b.seg_seq_head { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Save a snapshot, selecting the target sector by parity of
    /// `seg_seq_head` (odd -> A, even -> B), erase-before-program.
    pub fn save_snapshot<F: FlashDriver>(&self, flash: &mut F, snap: &Snapshot) -> std::io::Result<()> {
        let target = if snap.seg_seq_head % 2 == 1 { self.sector_a } else { self.sector_b };
        flash.erase_4k(target)?;
        let mut page = [0xFFu8; crate::geometry::PAGE_SIZE];
        page[0..SNAPSHOT_RECORD_LEN].copy_from_slice(&snap.pack());
        flash.program_256(target, &page)
    }

    pub fn load_head_hint<F: FlashDriver>(&self, flash: &F) -> Option<HeadHint> {
        Self::read_candidate::<F, HINT_RECORD_LEN>(flash, self.hint_sector).and_then(|b| HeadHint::unpack(&b))
    }

    pub fn save_head_hint<F: FlashDriver>(&self, flash: &mut F, hint: &HeadHint) -> std::io::Result<()> {
        flash.erase_4k(self.hint_sector)?;
        let mut page = [0xFFu8; crate::geometry::PAGE_SIZE];
        page[0..HINT_RECORD_LEN].copy_from_slice(&hint.pack());
        flash.program_256(self.hint_sector, &page)
    }
}

/// Error path used when `snapshot_save` is asked to verify a record it
/// just wrote and the readback doesn't match (flash write error).
pub(crate) fn verify_write_err() -> std::io::Error { error::io("snapshot readback mismatch") }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::sim::MemoryFlash;

    #[test]
    fn snapshot_roundtrip_and_ab_selection() {
        let mut flash = MemoryFlash::new(SEGMENT_SIZE * 3);
        let store = MetaStore::new(0);
        assert!(store.load_snapshot(&flash).is_none());

        let s1 = Snapshot { version: 1, epoch_id: 0, seg_seq_head: 1, seg_seq_tail: 1, head_addr: 100 };
        store.save_snapshot(&mut flash, &s1).unwrap();
        assert_eq!(store.load_snapshot(&flash), Some(s1));

        let s2 = Snapshot { version: 1, epoch_id: 0, seg_seq_head: 2, seg_seq_tail: 1, head_addr: 200 };
        store.save_snapshot(&mut flash, &s2).unwrap();
        // s1 went to sector A (odd), s2 to sector B (even); newest by seg_seq_head wins
        assert_eq!(store.load_snapshot(&flash), Some(s2));
    }

    #[test]
    fn torn_save_leaves_other_sector_intact() {
        let mut flash = MemoryFlash::new(SEGMENT_SIZE * 3);
        let store = MetaStore::new(0);
        let s1 = Snapshot { version: 1, epoch_id: 0, seg_seq_head: 1, seg_seq_tail: 1, head_addr: 100 };
        store.save_snapshot(&mut flash, &s1).unwrap();

        // simulate a torn write to sector B: erase happened but header program did not complete
        flash.erase_4k(store.sector_b).unwrap();
        flash.corrupt_byte(store.sector_b, 0x01); // partial garbage, not all-FF, CRC will fail

        assert_eq!(store.load_snapshot(&flash), Some(s1));
    }

    #[test]
    fn head_hint_roundtrip() {
        let mut flash = MemoryFlash::new(SEGMENT_SIZE);
        let store = MetaStore::new(0);
        assert!(store.load_head_hint(&flash).is_none());
        let hint = HeadHint { addr: 4096, seq: 3 };
        store.save_head_hint(&mut flash, &hint).unwrap();
        assert_eq!(store.load_head_hint(&flash), Some(hint));
    }
}
