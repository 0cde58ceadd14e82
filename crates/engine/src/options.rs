//! Caller-supplied configuration, validated at [`Db::open`](crate::Db::open).

use std::path::PathBuf;

pub use index::IndexKind;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the data files. Created if absent.
    pub dir_path: PathBuf,

    /// Rotation threshold in bytes: once a record would push the active file
    /// past this size, the file is sealed and a new one begins. Must be > 0.
    pub data_file_size: u64,

    /// Fsync after every append.
    pub sync_writes: bool,

    /// Fsync once this many bytes have accumulated since the last sync.
    /// `0` disables size-based syncing.
    pub bytes_per_sync: u64,

    /// Which key directory implementation to use.
    pub index_kind: IndexKind,

    /// Open sealed files through read-only memory maps for the startup
    /// scan. All files run on standard IO once the scan completes.
    pub mmap_at_startup: bool,

    /// Minimum `reclaimable / total` ratio before `merge` will run.
    /// Must lie in `[0, 1]`.
    pub data_file_merge_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("emberkv-data"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_kind: IndexKind::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

/// Configuration for an engine iterator.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys beginning with this prefix. Empty matches everything.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

/// Configuration for a [`WriteBatch`](crate::WriteBatch).
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Largest number of staged records a single batch may commit.
    pub max_batch_num: usize,

    /// Fsync the active file once the whole batch is on disk.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
