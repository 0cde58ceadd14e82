use std::fs;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::options::Options;

/// A deterministic, ordered test key.
pub fn test_key(i: usize) -> Vec<u8> {
    format!("emberkv-key-{i:09}").into_bytes()
}

/// `n` random alphanumeric bytes behind a fixed prefix.
pub fn random_value(n: usize) -> Vec<u8> {
    let mut value = b"emberkv-value-".to_vec();
    value.extend(rand::thread_rng().sample_iter(&Alphanumeric).take(n));
    value
}

/// Default options rooted at `dir`.
pub fn options_at(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        ..Options::default()
    }
}

pub fn data_file_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "data")
                .unwrap_or(false)
        })
        .count()
}
