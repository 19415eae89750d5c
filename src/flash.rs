//! The two external collaborators named in spec.md §6: the flash medium
//! driver and the monotonic clock. Both are out of scope for this crate to
//! *implement* against real hardware — the teacher's own `backend/hw.rs`
//! takes an analogous stance, treating the SPINOR server and the
//! ticktimer server as capabilities reached through a thin client (`spinor
//! = { path = "../spinor" }`, `ticktimer-server`). Here they are plain
//! traits so the core stays hardware-agnostic.
//!
//! `sim` provides an in-memory `FlashDriver`, the same role the teacher's
//! `backend/hosted.rs::HostedSpinor` plays for its own test/host builds,
//! except it actually enforces NOR 1→0 program semantics and 0xFF erase
//! fill, which the teacher's hosted stub does not need to because its
//! format has no header-last commit protocol to exercise.

use crate::error;

/// Aligned reads/erases/programs against the flash medium. Implementors
/// own the physical address space exclusively for the database's
/// lifetime (spec.md §5).
pub trait FlashDriver {
    /// Total addressable bytes. Must be a multiple of [`crate::geometry::SEGMENT_SIZE`]
    /// and at least `metadata_reserved + SEGMENT_SIZE`.
    fn size_bytes(&self) -> u32;

    /// Aligned read of arbitrary length. Must reflect all prior successful
    /// programs and erases.
    fn read(&self, addr: u32, dst: &mut [u8]) -> std::io::Result<()>;

    /// Erase a 4 KiB-aligned region, setting it to `0xFF`.
    fn erase_4k(&mut self, addr: u32) -> std::io::Result<()>;

    /// Bitwise-AND `src` into the 256 B-aligned page at `addr` (1→0 only).
    /// Calling this twice on the same page with different `src` values is
    /// legal provided each bit only ever goes 1→0.
    fn program_256(&mut self, addr: u32, src: &[u8]) -> std::io::Result<()>;
}

/// A monotonic millisecond clock, used only for GC quota windowing and
/// head-hint cadence. Never persisted.
pub trait Clock {
    fn millis(&self) -> u64;
}

pub mod sim {
    //! In-memory `FlashDriver` for tests and host-side development,
    //! mirroring the teacher's `EmuStorage`/`HostedSpinor` pairing in
    //! `backend/hosted.rs`, but with real AND-only programming so torn-write
    //! and bit-flip tests are meaningful.

    use super::{Clock, FlashDriver};
    use crate::geometry::{PAGE_SIZE, SEGMENT_SIZE};
    use std::cell::Cell;

    /// Flat byte-vector flash, initialized to all-`0xFF` (erased) state.
    pub struct MemoryFlash {
        mem: Vec<u8>,
    }

    impl MemoryFlash {
        pub fn new(size_bytes: usize) -> Self {
            assert!(size_bytes % SEGMENT_SIZE == 0, "flash size must be segment-aligned");
            Self { mem: vec![0xFFu8; size_bytes] }
        }

        /// Direct byte access for injecting corruption in tests (torn
        /// writes, bit flips) — not part of the `FlashDriver` contract.
        pub fn corrupt_byte(&mut self, addr: u32, value: u8) { self.mem[addr as usize] = value; }

        pub fn corrupt_range(&mut self, addr: u32, value: u8, len: usize) {
            for b in &mut self.mem[addr as usize..addr as usize + len] {
                *b = value;
            }
        }

        pub fn as_slice(&self) -> &[u8] { &self.mem }
    }

    impl FlashDriver for MemoryFlash {
        fn size_bytes(&self) -> u32 { self.mem.len() as u32 }

        fn read(&self, addr: u32, dst: &mut [u8]) -> std::io::Result<()> {
            let addr = addr as usize;
            if addr + dst.len() > self.mem.len() {
                return Err(super::error::io("read out of bounds"));
            }
            dst.copy_from_slice(&self.mem[addr..addr + dst.len()]);
            Ok(())
        }

        fn erase_4k(&mut self, addr: u32) -> std::io::Result<()> {
            if addr as usize % SEGMENT_SIZE != 0 {
                return Err(super::error::invalid_argument("erase address not 4K aligned"));
            }
            let addr = addr as usize;
            for b in &mut self.mem[addr..addr + SEGMENT_SIZE] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn program_256(&mut self, addr: u32, src: &[u8]) -> std::io::Result<()> {
            if addr as usize % PAGE_SIZE != 0 {
                return Err(super::error::invalid_argument("program address not 256B aligned"));
            }
            if src.len() != PAGE_SIZE {
                return Err(super::error::invalid_argument("program source must be exactly one page"));
            }
            let addr = addr as usize;
            for (dst, &s) in self.mem[addr..addr + PAGE_SIZE].iter_mut().zip(src.iter()) {
                *dst &= s;
            }
            Ok(())
        }
    }

    /// A software clock a test can advance explicitly, matching the
    /// granularity of the ticktimer server the teacher consumes
    /// (`tt.elapsed_ms()` in `backend/hw.rs`).
    pub struct SimClock {
        now: Cell<u64>,
    }

    impl SimClock {
        pub fn new() -> Self { Self { now: Cell::new(0) } }

        pub fn advance(&self, ms: u64) { self.now.set(self.now.get() + ms); }
    }

    impl Default for SimClock {
        fn default() -> Self { Self::new() }
    }

    impl Clock for SimClock {
        fn millis(&self) -> u64 { self.now.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::MemoryFlash;
    use super::*;
    use crate::geometry::{PAGE_SIZE, SEGMENT_SIZE};

    #[test]
    fn erase_then_program_and_semantics() {
        let mut f = MemoryFlash::new(SEGMENT_SIZE * 2);
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0b1010_1010;
        f.program_256(0, &page).unwrap();
        let mut second = vec![0xFFu8; PAGE_SIZE];
        second[0] = 0b0110_0110;
        f.program_256(0, &second).unwrap();
        let mut out = vec![0u8; PAGE_SIZE];
        f.read(0, &mut out).unwrap();
        // AND of the two patterns
        assert_eq!(out[0], 0b1010_1010 & 0b0110_0110);
    }

    #[test]
    fn erase_resets_to_ff() {
        let mut f = MemoryFlash::new(SEGMENT_SIZE);
        let page = vec![0u8; PAGE_SIZE];
        f.program_256(0, &page).unwrap();
        f.erase_4k(0).unwrap();
        let mut out = vec![0u8; PAGE_SIZE];
        f.read(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xFF));
    }
}
