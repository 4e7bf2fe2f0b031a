//! Tests for the durable log
//!
//! These tests verify:
//! - Sequence assignment in the writer
//! - Append failure leaves the sequence counter untouched
//! - Torn tail at every byte offset of the final frame
//! - Zero-filled tails
//! - Mid-log corruption and out-of-order sequences are fatal
//! - Recovery truncation and read-only verification

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use keelkv::wal::{
    LogReader, LogRecovery, LogStore, LogWriter, Operation, Record, TailState, LOG_FILENAME,
    MAX_FRAME_SIZE,
};
use keelkv::KeelError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join(LOG_FILENAME);
    (temp_dir, log_path)
}

fn put(key: &str, value: &str, sequence: u64) -> Record {
    Record::put(key, Bytes::copy_from_slice(value.as_bytes())).with_sequence(sequence)
}

/// Three well-formed frames, returned separately
fn three_frames() -> Vec<Vec<u8>> {
    vec![
        put("a", "1", 1).encode(),
        put("b", "2", 2).encode(),
        put("c", "3", 3).encode(),
    ]
}

fn write_raw(path: &Path, chunks: &[&[u8]]) {
    let mut file = File::create(path).unwrap();
    for chunk in chunks {
        file.write_all(chunk).unwrap();
    }
    file.sync_all().unwrap();
}

fn read_all(path: &Path) -> (Vec<Record>, TailState) {
    let mut reader = LogReader::open(path).unwrap();
    let records: Vec<Record> = reader.by_ref().map(|r| r.unwrap()).collect();
    (records, reader.tail_state())
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_writer_assigns_sequences_from_one() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = LogWriter::open(&log_path, 1).unwrap();

    let s1 = writer.append(Record::put("a", Bytes::from_static(b"1"))).unwrap();
    let s2 = writer.append(Record::put("b", Bytes::from_static(b"2"))).unwrap();
    let s3 = writer.append(Record::delete("a")).unwrap();

    assert_eq!((s1, s2, s3), (1, 2, 3));
    assert_eq!(writer.next_sequence(), 4);
    assert_eq!(writer.last_sequence(), 3);
    assert_eq!(writer.offset(), fs::metadata(&log_path).unwrap().len());
}

#[test]
fn test_writer_overrides_caller_sequence() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = LogWriter::open(&log_path, 10).unwrap();

    let sequence = writer.append(put("a", "1", 999)).unwrap();

    assert_eq!(sequence, 10);
    let (records, _) = read_all(&log_path);
    assert_eq!(records[0].sequence, 10);
}

#[test]
fn test_writer_rejects_invalid_record_without_consuming_sequence() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = LogWriter::open(&log_path, 1).unwrap();

    let err = writer.append(Record::put("", Bytes::from_static(b"v"))).unwrap_err();

    assert!(matches!(err, KeelError::InvalidKey(_)));
    assert_eq!(writer.next_sequence(), 1);
    assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);
}

#[test]
fn test_writer_rejects_oversized_record_without_writing() {
    let (_temp, log_path) = setup_temp_log();
    let mut writer = LogWriter::open(&log_path, 1).unwrap();
    writer.append(Record::put("a", Bytes::from_static(b"1"))).unwrap();
    let len_before = fs::metadata(&log_path).unwrap().len();

    let oversized = Bytes::from(vec![7u8; MAX_FRAME_SIZE as usize]);
    let err = writer.append(Record::put("big", oversized)).unwrap_err();

    assert!(matches!(err, KeelError::RecordTooLarge { .. }));
    assert!(!err.is_fatal());
    assert_eq!(writer.next_sequence(), 2);
    assert_eq!(fs::metadata(&log_path).unwrap().len(), len_before);

    // The writer stays usable and the log stays readable.
    writer.append(Record::put("c", Bytes::from_static(b"3"))).unwrap();
    let (records, tail) = read_all(&log_path);
    assert_eq!(tail, TailState::Clean);
    let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "c"]);
    assert_eq!(records[1].sequence, 2);
}

#[cfg(target_os = "linux")]
#[test]
fn test_failed_append_does_not_advance_sequence() {
    // Writes to /dev/full fail with ENOSPC and the device cannot be truncated,
    // so the writer must report the failure and refuse further appends.
    let dev_full = Path::new("/dev/full");
    if !dev_full.exists() {
        return;
    }
    let mut writer = LogWriter::open(dev_full, 1).unwrap();

    let err = writer.append(Record::put("k", Bytes::from_static(b"v"))).unwrap_err();
    match err {
        KeelError::Append { key, sequence, .. } => {
            assert_eq!(key, "k");
            assert_eq!(sequence, 1);
        }
        other => panic!("expected Append error, got {:?}", other),
    }
    assert_eq!(writer.next_sequence(), 1);
    assert!(writer.is_poisoned());

    let err = writer.append(Record::put("k", Bytes::from_static(b"v"))).unwrap_err();
    assert!(matches!(err, KeelError::LogUnwritable { sequence: 1 }));
    assert!(err.is_fatal());
}

// =============================================================================
// Reader: Clean Log Tests
// =============================================================================

#[test]
fn test_read_empty_log() {
    let (_temp, log_path) = setup_temp_log();
    File::create(&log_path).unwrap();

    let (records, tail) = read_all(&log_path);

    assert!(records.is_empty());
    assert_eq!(tail, TailState::Clean);
}

#[test]
fn test_read_preserves_order_and_operations() {
    let (_temp, log_path) = setup_temp_log();
    {
        let mut writer = LogWriter::open(&log_path, 1).unwrap();
        writer.append(Record::put("k1", Bytes::from_static(b"v1"))).unwrap();
        writer.append(Record::delete("k1")).unwrap();
        writer.append(Record::put("k2", Bytes::from_static(b"v2"))).unwrap();
    }

    let (records, tail) = read_all(&log_path);

    assert_eq!(tail, TailState::Clean);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].operation, Operation::Put);
    assert_eq!(records[1].operation, Operation::Delete);
    assert_eq!(records[2].key, "k2");
    assert_eq!(records[2].value.as_deref(), Some(&b"v2"[..]));
}

// =============================================================================
// Reader: Torn Tail Tests
// =============================================================================

#[test]
fn test_torn_tail_at_every_offset_of_final_frame() {
    let (_temp, log_path) = setup_temp_log();
    let frames = three_frames();
    let good_len = (frames[0].len() + frames[1].len()) as u64;

    for cut in 1..frames[2].len() {
        write_raw(&log_path, &[&frames[0], &frames[1], &frames[2][..cut]]);

        let (records, tail) = read_all(&log_path);

        assert_eq!(records.len(), 2, "cut at {}", cut);
        assert_eq!(records[1].sequence, 2);
        assert_eq!(tail, TailState::Torn { offset: good_len }, "cut at {}", cut);
    }
}

#[test]
fn test_garbled_final_frame_is_torn_tail() {
    let (_temp, log_path) = setup_temp_log();
    let frames = three_frames();
    let mut last = frames[2].clone();
    let end = last.len() - 1;
    last[end] ^= 0xFF;

    write_raw(&log_path, &[&frames[0], &frames[1], &last]);
    let (records, tail) = read_all(&log_path);

    assert_eq!(records.len(), 2);
    assert!(matches!(tail, TailState::Torn { .. }));
}

#[test]
fn test_zero_filled_tail_is_torn() {
    let (_temp, log_path) = setup_temp_log();
    let frames = three_frames();

    write_raw(&log_path, &[&frames[0], &frames[1], &[0u8; 4096]]);
    let (records, tail) = read_all(&log_path);

    assert_eq!(records.len(), 2);
    assert_eq!(
        tail,
        TailState::Torn {
            offset: (frames[0].len() + frames[1].len()) as u64
        }
    );
}

// =============================================================================
// Reader: Corruption Tests
// =============================================================================

#[test]
fn test_mid_log_checksum_failure_is_fatal() {
    let (_temp, log_path) = setup_temp_log();
    let frames = three_frames();
    let mut middle = frames[1].clone();
    let end = middle.len() - 1;
    middle[end] ^= 0xFF;

    write_raw(&log_path, &[&frames[0], &middle, &frames[2]]);

    let mut reader = LogReader::open(&log_path).unwrap();
    assert_eq!(reader.next().unwrap().unwrap().sequence, 1);

    let err = reader.next().unwrap().unwrap_err();
    match err {
        KeelError::CorruptLog {
            offset,
            last_sequence,
            ..
        } => {
            assert_eq!(offset, frames[0].len() as u64);
            assert_eq!(last_sequence, 1);
        }
        other => panic!("expected CorruptLog, got {:?}", other),
    }

    // Nothing is yielded past the corruption.
    assert!(reader.next().is_none());
    assert!(matches!(reader.tail_state(), TailState::Corrupt { .. }));
}

#[test]
fn test_garbage_between_frames_is_fatal() {
    let (_temp, log_path) = setup_temp_log();
    let frames = three_frames();

    write_raw(&log_path, &[&frames[0], &[0xAB; 12], &frames[1]]);

    let results: Vec<_> = LogReader::open(&log_path).unwrap().collect();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(KeelError::CorruptLog { .. })));
}

#[test]
fn test_out_of_order_sequence_is_fatal() {
    let (_temp, log_path) = setup_temp_log();
    let first = put("a", "1", 1).encode();
    let third = put("c", "3", 3).encode();
    let second = put("b", "2", 2).encode();

    write_raw(&log_path, &[&first, &third, &second]);

    let results: Vec<_> = LogReader::open(&log_path).unwrap().collect();

    assert_eq!(results.len(), 3);
    assert!(matches!(results[2], Err(KeelError::CorruptLog { .. })));
}

#[test]
fn test_repeated_sequence_is_fatal() {
    let (_temp, log_path) = setup_temp_log();
    let a = put("a", "1", 5).encode();
    let b = put("b", "2", 5).encode();

    write_raw(&log_path, &[&a, &b]);

    let results: Vec<_> = LogReader::open(&log_path).unwrap().collect();
    assert!(matches!(results[1], Err(KeelError::CorruptLog { .. })));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_truncates_torn_tail() {
    let (temp, log_path) = setup_temp_log();
    let frames = three_frames();
    let good_len = (frames[0].len() + frames[1].len()) as u64;
    write_raw(&log_path, &[&frames[0], &frames[1], &frames[2][..5]]);

    let report = LogRecovery::recover(temp.path()).unwrap();

    assert_eq!(report.log_records, 2);
    assert_eq!(report.last_sequence, 2);
    assert_eq!(report.valid_bytes, good_len);
    assert_eq!(report.torn_bytes, 5);
    assert!(report.was_truncated());
    assert_eq!(fs::metadata(&log_path).unwrap().len(), good_len);
}

#[test]
fn test_verify_does_not_modify() {
    let (temp, log_path) = setup_temp_log();
    let frames = three_frames();
    write_raw(&log_path, &[&frames[0], &frames[1][..7]]);
    let before = fs::read(&log_path).unwrap();

    let report = LogRecovery::verify(temp.path()).unwrap();

    assert_eq!(report.log_records, 1);
    assert_eq!(report.torn_bytes, 7);
    assert_eq!(fs::read(&log_path).unwrap(), before);
}

#[test]
fn test_verify_missing_directory_contents() {
    let temp = TempDir::new().unwrap();

    let report = keelkv::wal::verify(temp.path()).unwrap();

    assert_eq!(report.log_records, 0);
    assert_eq!(report.last_sequence, 0);
    assert!(!report.was_truncated());
}

#[test]
fn test_recover_fails_on_mid_log_corruption() {
    let (temp, log_path) = setup_temp_log();
    let frames = three_frames();
    let mut middle = frames[1].clone();
    middle[HEADER_OFFSET_OF_OP] = 0x7F;

    write_raw(&log_path, &[&frames[0], &middle, &frames[2]]);

    let err = LogRecovery::recover(temp.path()).unwrap_err();
    assert!(matches!(err, KeelError::CorruptLog { .. }));
    assert!(err.is_fatal());
}

/// Offset of the op byte within a frame: header (8) + sequence (8)
const HEADER_OFFSET_OF_OP: usize = 16;

// =============================================================================
// LogStore Tests
// =============================================================================

#[test]
fn test_store_continues_sequence_after_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut store = LogStore::open(temp.path()).unwrap();
        store.append(Record::put("a", Bytes::from_static(b"1"))).unwrap();
        store.append(Record::put("b", Bytes::from_static(b"2"))).unwrap();
        store.close().unwrap();
    }

    let mut store = LogStore::open(temp.path()).unwrap();
    assert_eq!(store.last_sequence(), 2);
    assert_eq!(store.tail_records(), 2);

    let sequence = store.append(Record::delete("a")).unwrap();
    assert_eq!(sequence, 3);
}

#[test]
fn test_store_replay_is_restartable() {
    let temp = TempDir::new().unwrap();
    let mut store = LogStore::open(temp.path()).unwrap();
    store.append(Record::put("a", Bytes::from_static(b"1"))).unwrap();
    store.append(Record::put("b", Bytes::from_static(b"2"))).unwrap();

    let first: Vec<Record> = store.replay().unwrap().map(|r| r.unwrap()).collect();
    let second: Vec<Record> = store.replay().unwrap().map(|r| r.unwrap()).collect();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn test_store_open_after_torn_tail_appends_cleanly() {
    let temp = TempDir::new().unwrap();
    let log_path = temp.path().join(LOG_FILENAME);
    let frames = three_frames();
    write_raw(&log_path, &[&frames[0], &frames[1], &frames[2][..10]]);

    {
        let mut store = LogStore::open(temp.path()).unwrap();
        assert!(store.recovery_report().was_truncated());
        let sequence = store.append(Record::put("d", Bytes::from_static(b"4"))).unwrap();
        assert_eq!(sequence, 3);
    }

    let (records, tail) = read_all(&log_path);
    assert_eq!(tail, TailState::Clean);
    assert_eq!(
        records.iter().map(|r| r.key.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "d"]
    );
}
