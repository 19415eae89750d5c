//! `tsflashdb` — an embedded, append-only time-series log for QSPI NOR
//! flash.
//!
//! Accepts `(series, timestamp_ms, value)` tuples from a single producer,
//! packs them into compressed, CRC-guarded fixed-size pages organized as a
//! circular log of segments, and serves range and latest queries with
//! constant working memory. At most the last uncommitted block is lost on
//! abrupt power loss.
//!
//! The crate is single-threaded: one writer drives recovery, GC, writes,
//! and snapshot saves; range iteration and `query_latest` may be issued
//! between writes but never concurrently with one. Embedding environments
//! that split application logic from storage I/O across cores or tasks
//! must linearize calls into a single sequence before reaching this
//! crate (see `DESIGN.md` and spec §9).

mod builder;
mod codec;
mod crc;
mod db;
mod error;
mod flash;
mod footer;
mod geometry;
mod iter;
mod meta;
mod recovery;
mod ring;

pub use codec::{BlockHeader, DeltaWidth};
pub use db::{Db, DbInfo, OpenConfig};
pub use flash::{Clock, FlashDriver};
pub use geometry::{
    BLOCK_MAGIC, DATA_PAGES_PER_SEGMENT, FOOTER_MAGIC, MAX_SERIES, METADATA_RESERVED_BYTES, PAGE_SIZE,
    PAYLOAD_LEN, SEGMENT_SIZE,
};
pub use iter::RangeIter;

#[cfg(feature = "sim")]
pub use flash::sim;
