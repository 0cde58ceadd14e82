//! # engine — the emberkv storage engine
//!
//! A Bitcask-style embedded key-value store: every write appends one record
//! to a numbered log segment, an in-memory key directory maps each live key
//! to the position of its newest record, and reads are a single directory
//! probe plus one positioned disk read.
//!
//! ```text
//! Put / Delete
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                    DB                         │
//! │                                               │
//! │ encode record → append to active data file    │
//! │       |           (rotate at size threshold)  │
//! │       v                                       │
//! │ key directory (BTree / SkipList / BPlusTree)  │
//! │       ^                                       │
//! │       |                                       │
//! │ Get: directory probe → read (file_id, offset) │
//! │                                               │
//! │ Merge: rewrite live records → sibling dir     │
//! │        hint file + completion marker          │
//! │        adopted atomically at next open        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                               |
//! |----------------|-------------------------------------------------------|
//! | [`mod@db`]     | `Db` struct, open/recovery, append path, reads, stats |
//! | [`mod@batch`]  | atomic multi-record commits with sequence framing     |
//! | [`mod@merge`]  | compaction into a sibling directory + hint files      |
//! | [`iterator`]   | ordered engine iterator with prefix filtering         |
//! | [`options`]    | caller-supplied configuration                         |
//! | [`error`]      | the public error kinds                                |
//!
//! ## Crash Safety
//!
//! Records are written (and CRC-framed) before the directory is updated, so
//! a reader can never observe a torn record. A torn trailing write is
//! detected by CRC at the next startup scan and cleanly ends that file's
//! replay. Merge output only becomes visible once its completion marker is
//! durable; partial merge directories are discarded at open.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engine::{Db, Options};
//!
//! let mut options = Options::default();
//! options.dir_path = "/tmp/emberkv-demo".into();
//! let db = Db::open(options).unwrap();
//!
//! db.put(b"name", b"emberkv").unwrap();
//! assert_eq!(db.get(b"name").unwrap(), b"emberkv");
//! db.delete(b"name").unwrap();
//! db.close().unwrap();
//! ```

pub mod batch;
pub mod db;
pub mod error;
pub mod iterator;
pub mod merge;
pub mod options;

#[cfg(test)]
mod tests;

pub use batch::WriteBatch;
pub use db::{Db, Stat};
pub use error::{Error, Result};
pub use iterator::DbIterator;
pub use options::{IndexKind, IteratorOptions, Options, WriteBatchOptions};
