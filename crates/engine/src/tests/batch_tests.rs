use super::helpers::{options_at, random_value, test_key};
use crate::error::Error;
use crate::options::WriteBatchOptions;
use crate::Db;
use anyhow::Result;
use std::sync::atomic::Ordering;
use tempfile::tempdir;

// --------------------- Visibility ---------------------

#[test]
fn staged_records_are_invisible_until_commit() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.put(&test_key(1), &random_value(10))?;
    assert!(matches!(db.get(&test_key(1)), Err(Error::KeyNotFound)));

    batch.commit()?;
    assert!(db.get(&test_key(1)).is_ok());
    Ok(())
}

#[test]
fn committed_batch_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(options_at(dir.path()))?;
        let batch = db.new_write_batch(WriteBatchOptions::default());
        for i in 0..100 {
            batch.put(&test_key(i), &random_value(16))?;
        }
        batch.commit()?;
        db.close()?;
    }

    let db = Db::open(options_at(dir.path()))?;
    assert_eq!(db.list_keys()?.len(), 100);
    Ok(())
}

#[test]
fn uncommitted_batch_leaves_no_trace() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(options_at(dir.path()))?;
        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(&test_key(1), &random_value(16))?;
        batch.put(&test_key(2), &random_value(16))?;
        // never committed
        db.close()?;
    }

    let db = Db::open(options_at(dir.path()))?;
    assert!(db.list_keys()?.is_empty());
    Ok(())
}

#[test]
fn records_without_finish_marker_are_not_replayed() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(options_at(dir.path()))?;
        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"half-committed", b"v")?;
        batch.commit()?;
        db.close()?;
    }

    // chop the finish marker (the last record) off the log, simulating a
    // crash between the batch body and its marker
    let path = dir.path().join("000000000.data");
    let bytes = std::fs::read(&path)?;
    // marker: crc(4) + type(1) + key_size varint(1) + value_size varint(1) +
    // framed key (varint seq + "txn-fin")
    let marker_len = 7 + 1 + 7;
    std::fs::write(&path, &bytes[..bytes.len() - marker_len])?;
    std::fs::remove_file(dir.path().join("seq-no"))?;

    let db = Db::open(options_at(dir.path()))?;
    assert!(matches!(db.get(b"half-committed"), Err(Error::KeyNotFound)));
    Ok(())
}

// --------------------- Batch delete ---------------------

#[test]
fn batch_delete_applies_on_commit() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;
    db.put(b"doomed", b"v")?;

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.delete(b"doomed")?;
    assert!(db.get(b"doomed").is_ok());

    batch.commit()?;
    assert!(matches!(db.get(b"doomed"), Err(Error::KeyNotFound)));
    Ok(())
}

#[test]
fn batch_delete_of_unknown_key_discards_staged_put() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.put(b"ephemeral", b"v")?;
    batch.delete(b"ephemeral")?;
    batch.commit()?;

    assert!(matches!(db.get(b"ephemeral"), Err(Error::KeyNotFound)));
    Ok(())
}

// --------------------- Limits ---------------------

#[test]
fn oversized_batch_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;

    let opts = WriteBatchOptions {
        max_batch_num: 3,
        sync_writes: false,
    };
    let batch = db.new_write_batch(opts);
    for i in 0..3 {
        batch.put(&test_key(i), b"v")?;
    }
    assert!(matches!(
        batch.put(&test_key(3), b"v"),
        Err(Error::ExceedMaxBatchNum)
    ));
    Ok(())
}

#[test]
fn empty_key_is_rejected_in_batch() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;
    let batch = db.new_write_batch(WriteBatchOptions::default());

    assert!(matches!(batch.put(b"", b"v"), Err(Error::KeyIsEmpty)));
    assert!(matches!(batch.delete(b""), Err(Error::KeyIsEmpty)));
    Ok(())
}

#[test]
fn empty_commit_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;
    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.commit()?;
    assert!(batch.is_empty());
    Ok(())
}

// --------------------- Sequence numbers ---------------------

#[test]
fn commits_advance_the_sequence() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;

    assert_eq!(db.seq_no.load(Ordering::SeqCst), 0);

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.put(b"a", b"1")?;
    batch.commit()?;
    assert_eq!(db.seq_no.load(Ordering::SeqCst), 1);

    batch.put(b"b", b"2")?;
    batch.commit()?;
    assert_eq!(db.seq_no.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn sequence_is_monotone_across_restart() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(options_at(dir.path()))?;
        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"a", b"1")?;
        batch.commit()?;
        batch.put(b"b", b"2")?;
        batch.commit()?;
        assert_eq!(db.seq_no.load(Ordering::SeqCst), 2);
        db.close()?;
    }

    let db = Db::open(options_at(dir.path()))?;
    assert_eq!(db.seq_no.load(Ordering::SeqCst), 2);

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.put(b"c", b"3")?;
    batch.commit()?;
    assert_eq!(db.seq_no.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn batch_can_be_reused_after_commit() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(options_at(dir.path()))?;

    let batch = db.new_write_batch(WriteBatchOptions::default());
    batch.put(b"first", b"1")?;
    batch.commit()?;
    assert!(batch.is_empty());

    batch.put(b"second", b"2")?;
    batch.commit()?;

    assert_eq!(db.get(b"first")?, b"1");
    assert_eq!(db.get(b"second")?, b"2");
    Ok(())
}
