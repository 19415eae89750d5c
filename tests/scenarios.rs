//! End-to-end scenarios, one per spec.md §8 "End-to-end scenarios" case.
//! Exercises the public `Db` facade against the in-memory `sim` flash, the
//! same harness the unit tests in `src/` use for smaller-grained checks.

use tsflashdb::sim::{MemoryFlash, SimClock};
use tsflashdb::{Db, OpenConfig, DATA_PAGES_PER_SEGMENT, PAGE_SIZE, SEGMENT_SIZE};

const METADATA_RESERVED_BYTES: u32 = 32768;

fn blank_flash(segments: u32) -> MemoryFlash {
    MemoryFlash::new((METADATA_RESERVED_BYTES + segments * SEGMENT_SIZE as u32) as usize)
}

/// Write monotonically increasing single-sample rows to `series`, starting
/// at timestamp `start`, until the ring has rotated at least `rotations`
/// times, i.e. `info().head_seq` reaches `1 + rotations`. With plenty of
/// free segments (no GC reclaim in between) segment slots fill in physical
/// order, so this deterministically finalizes `rotations` whole segments.
/// Returns the next unused timestamp, so callers can chain further fills.
fn fill_rotations(db: &mut Db<MemoryFlash, SimClock>, series: u16, rotations: u32, start: u32) -> u32 {
    let target = 1 + rotations;
    let mut i = start;
    while db.info().head_seq < target {
        db.write(series, i, i as f64).unwrap();
        i += 1;
    }
    i
}

#[test]
fn basic_round_trip() {
    let mut db = Db::open(blank_flash(16), SimClock::new(), OpenConfig::default()).unwrap();
    for i in 0u32..500 {
        db.write(1, i * 10, (0.01 * i as f64).sin()).unwrap();
    }
    db.flush().unwrap();

    let mut iter = db.query_begin(1, 100, 2200).unwrap();
    let mut rows = Vec::new();
    while let Some((t, v)) = db.query_next(&mut iter) {
        rows.push((t, v));
    }
    db.query_end(iter);

    assert!(!rows.is_empty());
    for (t, _) in &rows {
        assert!(*t >= 100 && *t <= 2200);
    }

    let (last_t, _) = db.query_latest(1).expect("series 1 has data");
    assert!(last_t >= 4990);
}

#[test]
fn torn_header_loses_only_the_last_block() {
    let mut db = Db::open(blank_flash(16), SimClock::new(), OpenConfig::default()).unwrap();
    // Stay comfortably under one segment's 15-block capacity so the data
    // lands in a single, never-rotated segment and `blocks_written` maps
    // directly to the page index of the most recently published block.
    for i in 0u32..800 {
        db.write(2, i * 5, i as f64).unwrap();
    }
    db.flush().unwrap();
    let blocks = db.info().blocks_written as u32;
    assert!((1..15).contains(&blocks), "test assumes a single, unrotated segment");

    let mut flash = db.into_flash();
    let last_page_addr = METADATA_RESERVED_BYTES + (blocks - 1) * PAGE_SIZE as u32;
    // Wipe the last-written page's header, as if the header program never
    // completed.
    flash.corrupt_range(last_page_addr + (PAGE_SIZE - 32) as u32, 0xFF, 32);

    let mut db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    let mut iter = db2.query_begin(2, 0, 5000).unwrap();
    let mut count = 0;
    while db2.query_next(&mut iter).is_some() {
        count += 1;
    }
    db2.query_end(iter);
    assert!(count > 0);
    assert!(db2.info().recovery_truncations >= 1);
}

#[test]
fn torn_payload_is_crc_isolated() {
    let mut db = Db::open(blank_flash(16), SimClock::new(), OpenConfig::default()).unwrap();
    for i in 0u32..700 {
        db.write(3, i * 10, i as f64).unwrap();
    }
    db.flush().unwrap();
    let blocks = db.info().blocks_written as u32;
    assert!((1..15).contains(&blocks), "test assumes a single, unrotated segment");

    let mut flash = db.into_flash();
    let last_page_addr = METADATA_RESERVED_BYTES + (blocks - 1) * PAGE_SIZE as u32;
    flash.corrupt_byte(last_page_addr, 0x00);

    let mut db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    let mut iter = db2.query_begin(3, 0, 10_000).unwrap();
    let mut count = 0;
    while db2.query_next(&mut iter).is_some() {
        count += 1;
    }
    db2.query_end(iter);
    assert!(count > 0);
    assert!(db2.info().crc_errors >= 1);
}

#[test]
fn torn_footer_preserves_earlier_segments() {
    let mut db = Db::open(blank_flash(12), SimClock::new(), OpenConfig::default()).unwrap();
    // Finalize 3 whole segments (slots 0, 1, 2) and leave a 4th (slot 3)
    // open, all without triggering GC (plenty of free segments).
    fill_rotations(&mut db, 5, 3, 0);
    db.flush().unwrap();

    let mut flash = db.into_flash();
    // Corrupt the footer of the most recently finalized segment (slot 2,
    // seg_seqno 3).
    let slot2_footer_addr =
        METADATA_RESERVED_BYTES + 2 * SEGMENT_SIZE as u32 + (DATA_PAGES_PER_SEGMENT * PAGE_SIZE) as u32;
    flash.corrupt_range(slot2_footer_addr, 0xFF, PAGE_SIZE);

    let mut db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    // Segments 0 and 1 (slots 0, 1) are still footer-valid and must remain
    // readable even though the scanner can no longer see slot 2 as the
    // most recent footer.
    let mut iter = db2.query_begin(5, 0, u32::MAX).unwrap();
    let mut count = 0;
    while db2.query_next(&mut iter).is_some() {
        count += 1;
    }
    db2.query_end(iter);
    assert!(count > 0);
}

#[test]
fn crc_isolation_early_blocks_survive_a_later_flip() {
    let mut db = Db::open(blank_flash(16), SimClock::new(), OpenConfig::default()).unwrap();
    for i in 0u32..900 {
        db.write(4, i, i as f64).unwrap();
    }
    db.flush().unwrap();
    let blocks = db.info().blocks_written as u32;
    assert!(blocks > 10 && blocks < 15, "test assumes page 10 exists in a single, unrotated segment");

    let mut flash = db.into_flash();
    let addr = METADATA_RESERVED_BYTES + 10 * PAGE_SIZE as u32;
    let current = flash.as_slice()[addr as usize];
    flash.corrupt_byte(addr, current ^ 0xFF);

    let mut db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    let mut iter = db2.query_begin(4, 0, 1000).unwrap();
    let mut count = 0;
    while db2.query_next(&mut iter).is_some() {
        count += 1;
    }
    db2.query_end(iter);
    assert!(count > 0, "earlier blocks in the segment must remain readable");
}

#[test]
fn reopen_after_snapshot_seeds_head_directly() {
    let mut db = Db::open(blank_flash(30), SimClock::new(), OpenConfig::default()).unwrap();
    let next = fill_rotations(&mut db, 6, 8, 0);
    db.flush().unwrap();
    db.snapshot_save().unwrap();
    fill_rotations(&mut db, 6, 14, next);
    db.flush().unwrap();

    let info_before = db.info();
    let flash = db.into_flash();

    let db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    let info_after = db2.info();
    assert_eq!(info_after.head_seq, info_before.head_seq);
    // The final segment is almost never a clean 15-block multiple, so the
    // tail probe legitimately finds the first unwritten page past the
    // data actually committed — that's an expected truncation signal, not
    // a sign of lost data (see DESIGN.md).

    let (ts, _) = db2.query_latest(6).expect("series 6 has data");
    assert!(ts > 0);
}

#[test]
fn random_interleaved_series_survive_a_reopen() {
    use rand::Rng;
    // Mirrors the teacher's own `gen_key`-style synthetic workload
    // (services/pddb/src/tests.rs): random but reproducible-enough sizes,
    // checked end to end rather than compared against a golden file.
    let mut rng = rand::thread_rng();
    let mut db = Db::open(blank_flash(24), SimClock::new(), OpenConfig::default()).unwrap();

    let series_count = 6u16;
    let mut last_ts = vec![0u32; series_count as usize];
    let mut expected_count = vec![0u32; series_count as usize];
    for _ in 0..6000 {
        let s = rng.gen_range(0..series_count);
        last_ts[s as usize] += rng.gen_range(1..50);
        let v = rng.gen_range(-1000..1000) as f64 * 0.125;
        db.write(s, last_ts[s as usize], v).unwrap();
        expected_count[s as usize] += 1;
    }
    db.flush().unwrap();

    for s in 0..series_count {
        let mut iter = db.query_begin(s, 0, u32::MAX).unwrap();
        let mut count = 0u32;
        let mut prev = None;
        while let Some((t, _)) = db.query_next(&mut iter) {
            if let Some(p) = prev {
                assert!(t >= p, "range iteration must yield non-decreasing timestamps");
            }
            prev = Some(t);
            count += 1;
        }
        db.query_end(iter);
        assert!(count > 0, "series {s} should have at least one row");
        assert!(count <= expected_count[s as usize], "series {s} got more rows back than written");
    }

    let flash = db.into_flash();
    let db2 = Db::open(flash, SimClock::new(), OpenConfig::default()).unwrap();
    for s in 0..series_count {
        assert!(db2.query_latest(s).is_some(), "series {s} must still be queryable after reopen");
    }
}

#[test]
fn gc_non_blocking_reports_busy_once_quota_is_exhausted() {
    // Small ring so free space tightens quickly: 10 segments total.
    let mut db = Db::open_non_blocking(blank_flash(10), SimClock::new(), OpenConfig::default()).unwrap();

    // Drive single-sample blocks through series 9 until the non-blocking
    // contract surfaces GC quota exhaustion as Busy (spec.md §6 `write`,
    // §8 property 7) instead of spinning past the window's 2-erase quota.
    let mut busy_seen = false;
    for i in 0u32..20_000 {
        match db.write(9, i, i as f64) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                busy_seen = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(busy_seen, "expected GC quota exhaustion to surface as Busy in non-blocking mode");
    assert!(db.info().gc_busy >= 1);
}
