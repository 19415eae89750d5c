//! Block payload and header codec (spec.md §4.1).
//!
//! The layout mirrors the teacher's compact fixed-layout on-flash records
//! (`backend/types.rs`'s `bitfield! { pub struct PhysPage(..) }`,
//! `backend/fastspace.rs`'s `#[repr(C, packed)] struct FastSpaceInFlash`):
//! every field has an explicit byte offset and width, little-endian
//! throughout, and decode never trusts the bytes until the CRC says so.

use crate::crc::crc32c;
use crate::error;
use crate::geometry::{BLOCK_MAGIC, HEADER_CRC_COVERED_LEN, HEADER_LEN, PAYLOAD_LEN};

/// Delta lane width, in bits, selected by the builder at close time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeltaWidth {
    U8,
    U16,
}

impl DeltaWidth {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            8 => Some(DeltaWidth::U8),
            16 => Some(DeltaWidth::U16),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        match self {
            DeltaWidth::U8 => 8,
            DeltaWidth::U16 => 16,
        }
    }

    fn bytes(self) -> usize {
        match self {
            DeltaWidth::U8 => 1,
            DeltaWidth::U16 => 2,
        }
    }
}

/// The 32 B block header, decoded and CRC-verified.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub series: u16,
    pub count: u16,
    pub t0_ms: u32,
    pub dt_bits: DeltaWidth,
    pub bias: f32,
    pub scale: f32,
    pub payload_crc: u32,
}

impl BlockHeader {
    /// Encode into a fresh 32 B buffer, computing `header_crc` over bytes
    /// 0..28.
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0xFFu8; HEADER_LEN];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.series.to_le_bytes());
        buf[6..8].copy_from_slice(&self.count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.t0_ms.to_le_bytes());
        buf[12] = self.dt_bits.tag();
        buf[13..16].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
        buf[16..20].copy_from_slice(&self.bias.to_bits().to_le_bytes());
        buf[20..24].copy_from_slice(&self.scale.to_bits().to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload_crc.to_le_bytes());
        let header_crc = crc32c(&buf[0..HEADER_CRC_COVERED_LEN]);
        buf[28..32].copy_from_slice(&header_crc.to_le_bytes());
        buf
    }

    /// Decode and verify magic + header CRC. Returns an integrity error on
    /// either mismatch, without inspecting any other field (spec.md
    /// §4.1).
    pub fn unpack(buf: &[u8; HEADER_LEN]) -> std::io::Result<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != BLOCK_MAGIC {
            return Err(error::integrity("block header: bad magic"));
        }
        let header_crc = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        if crc32c(&buf[0..HEADER_CRC_COVERED_LEN]) != header_crc {
            return Err(error::integrity("block header: crc mismatch"));
        }
        let series = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let count = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let t0_ms = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let dt_bits = DeltaWidth::from_tag(buf[12])
            .ok_or_else(|| error::integrity("block header: bad dt_bits tag"))?;
        let bias = f32::from_bits(u32::from_le_bytes(buf[16..20].try_into().unwrap()));
        let scale = f32::from_bits(u32::from_le_bytes(buf[20..24].try_into().unwrap()));
        let payload_crc = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        Ok(BlockHeader { series, count, t0_ms, dt_bits, bias, scale, payload_crc })
    }
}

/// Encode `count` deltas and quantized values into a fresh 224 B payload
/// buffer: delta lane first, then the qval lane, `0xFF`-padded beyond.
pub fn encode_payload(dt_bits: DeltaWidth, deltas: &[u32], qvals: &[i16]) -> [u8; PAYLOAD_LEN] {
    debug_assert_eq!(deltas.len(), qvals.len());
    let count = deltas.len();
    let mut buf = [0xFFu8; PAYLOAD_LEN];
    let delta_bytes = dt_bits.bytes();
    let mut off = 0;
    match dt_bits {
        DeltaWidth::U8 => {
            for (i, &d) in deltas.iter().enumerate() {
                buf[off + i] = d as u8;
            }
        }
        DeltaWidth::U16 => {
            for (i, &d) in deltas.iter().enumerate() {
                buf[off + i * 2..off + i * 2 + 2].copy_from_slice(&(d as u16).to_le_bytes());
            }
        }
    }
    off += count * delta_bytes;
    for (i, &q) in qvals.iter().enumerate() {
        buf[off + i * 2..off + i * 2 + 2].copy_from_slice(&q.to_le_bytes());
    }
    buf
}

/// Decode just the delta lane, skipping the qval lane entirely. Used by
/// the ring manager to update `t_min`/`t_max` bookkeeping on publish
/// without paying for a full qval decode (spec.md §4.3 step 3).
pub fn decode_deltas(payload: &[u8; PAYLOAD_LEN], dt_bits: DeltaWidth, count: usize) -> Vec<u32> {
    match dt_bits {
        DeltaWidth::U8 => (0..count).map(|i| payload[i] as u32).collect(),
        DeltaWidth::U16 => {
            (0..count).map(|i| u16::from_le_bytes(payload[i * 2..i * 2 + 2].try_into().unwrap()) as u32).collect()
        }
    }
}

/// Decode `count` deltas and quantized values out of a 224 B payload given
/// the header-supplied `dt_bits` and `count`.
pub fn decode_payload(payload: &[u8; PAYLOAD_LEN], dt_bits: DeltaWidth, count: usize) -> (Vec<u32>, Vec<i16>) {
    let delta_bytes = dt_bits.bytes();
    let mut deltas = Vec::with_capacity(count);
    match dt_bits {
        DeltaWidth::U8 => {
            for i in 0..count {
                deltas.push(payload[i] as u32);
            }
        }
        DeltaWidth::U16 => {
            for i in 0..count {
                deltas.push(u16::from_le_bytes(payload[i * 2..i * 2 + 2].try_into().unwrap()) as u32);
            }
        }
    }
    let off = count * delta_bytes;
    let mut qvals = Vec::with_capacity(count);
    for i in 0..count {
        qvals.push(i16::from_le_bytes(payload[off + i * 2..off + i * 2 + 2].try_into().unwrap()));
    }
    (deltas, qvals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = BlockHeader {
            series: 42,
            count: 7,
            t0_ms: 123_456,
            dt_bits: DeltaWidth::U16,
            bias: 1.5,
            scale: 0.25,
            payload_crc: 0xDEAD_BEEF,
        };
        let packed = h.pack();
        let unpacked = BlockHeader::unpack(&packed).unwrap();
        assert_eq!(h, unpacked);
        // pack(unpack(h)) == h
        assert_eq!(unpacked.pack(), packed);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut buf = [0xFFu8; HEADER_LEN];
        buf[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(BlockHeader::unpack(&buf).is_err());
    }

    #[test]
    fn bad_crc_rejected() {
        let h = BlockHeader {
            series: 1,
            count: 1,
            t0_ms: 0,
            dt_bits: DeltaWidth::U8,
            bias: 0.0,
            scale: 1e-9,
            payload_crc: 0,
        };
        let mut packed = h.pack();
        packed[4] ^= 0xFF; // flip a covered byte without fixing the crc
        assert!(BlockHeader::unpack(&packed).is_err());
    }

    #[test]
    fn payload_roundtrip_u8() {
        let deltas = vec![0u32, 10, 255];
        let qvals = vec![-100i16, 0, 32000];
        let encoded = encode_payload(DeltaWidth::U8, &deltas, &qvals);
        let (d, q) = decode_payload(&encoded, DeltaWidth::U8, 3);
        assert_eq!(d, deltas);
        assert_eq!(q, qvals);
        // bytes beyond what's used are 0xFF
        assert!(encoded[3 + 6..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn payload_roundtrip_u16() {
        let deltas = vec![0u32, 1000, 65535];
        let qvals = vec![-32768i16, 1, 32767];
        let encoded = encode_payload(DeltaWidth::U16, &deltas, &qvals);
        let (d, q) = decode_payload(&encoded, DeltaWidth::U16, 3);
        assert_eq!(d, deltas);
        assert_eq!(q, qvals);
        assert_eq!(encode_payload(DeltaWidth::U16, &d, &q), encoded);
    }
}
