// Fault Injection Tests for BlockTable
// Damaged table files must surface as errors, never as wrong records

use blocktable::{Error, Options, TableReader, TableSeeker, TableWriter};
use std::fs::OpenOptions;
use std::path::Path;
use tempfile::TempDir;

fn key(i: usize) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

fn value(i: usize) -> Vec<u8> {
    format!("value-{}-{}", i, "x".repeat(i % 13)).into_bytes()
}

fn write_table(dir: &Path, options: &Options, count: usize) {
    let mut writer = TableWriter::create(dir, "t", options.clone()).unwrap();
    for i in 0..count {
        writer.write(&key(i), &value(i)).unwrap();
    }
    writer.close().unwrap();
}

fn truncate_by(path: &Path, bytes: u64) {
    let len = std::fs::metadata(path).unwrap().len();
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len - bytes).unwrap();
}

fn flip_byte(path: &Path, offset: usize) {
    let mut data = std::fs::read(path).unwrap();
    data[offset] ^= 0xFF;
    std::fs::write(path, data).unwrap();
}

/// Scan everything the reader yields; every record it does yield must be
/// correct.
fn scan_checked(dir: &Path, options: &Options) -> Result<usize, Error> {
    let mut reader = TableReader::open(dir, "t", options)?;
    let mut i = 0;
    while let Some((k, v)) = reader.current() {
        assert_eq!(k, key(i).as_slice());
        assert_eq!(v, value(i).as_slice());
        i += 1;
        reader.advance()?;
    }
    Ok(i)
}

/// Test that the reader reports a data file cut short by one byte
#[test]
fn test_fault_reader_truncated_by_one_byte() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(8).read_buffer_size(256);
    write_table(dir.path(), &options, 1000);

    truncate_by(&dir.path().join("t"), 1);

    let err = scan_checked(dir.path(), &options).unwrap_err();
    assert!(err.is_data_error(), "unexpected error: {}", err);
}

/// Test that the seeker never returns wrong data from a shortened file
#[test]
fn test_fault_seeker_truncated_by_one_byte() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(8);
    write_table(dir.path(), &options, 1000);

    truncate_by(&dir.path().join("t"), 1);

    let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
    let mut failures = 0;
    for i in 0..1000 {
        match seeker.get(&key(i)) {
            Ok(found) => assert_eq!(found, Some(value(i))),
            Err(e) => {
                assert!(e.is_data_error(), "unexpected error: {}", e);
                failures += 1;
            }
        }
    }
    // only the last block is damaged
    assert_eq!(failures, 1000 - 124 * 8);
}

/// Test truncation by more than a block
#[test]
fn test_fault_truncated_heavily() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(4);
    write_table(dir.path(), &options, 400);

    let data = dir.path().join("t");
    let len = std::fs::metadata(&data).unwrap().len();
    truncate_by(&data, len / 2);

    assert!(scan_checked(dir.path(), &options).unwrap_err().is_data_error());

    let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
    assert!(matches!(seeker.get(&key(399)), Err(Error::Truncated(_))));
    assert!(seeker.verify().is_err());
}

/// Test a corrupted byte inside the compressed stream
#[test]
fn test_fault_flipped_data_byte() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(16);
    write_table(dir.path(), &options, 500);

    let data = dir.path().join("t");
    let len = std::fs::metadata(&data).unwrap().len() as usize;
    flip_byte(&data, len / 2);

    // a flipped bit either breaks the stream or changes bytes; both must be caught
    // by a frame or count mismatch before wrong data reaches the caller, or the
    // scan panics in scan_checked
    let result = std::panic::catch_unwind(|| scan_checked(dir.path(), &options));
    match result {
        Ok(Ok(count)) => panic!("corruption went unnoticed after {} records", count),
        Ok(Err(_)) | Err(_) => {}
    }
}

/// Test a damaged metadata file
#[test]
fn test_fault_metadata() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(4);
    write_table(dir.path(), &options, 50);
    let info = dir.path().join("t.info");
    let original = std::fs::read_to_string(&info).unwrap();

    // missing final newline
    std::fs::write(&info, original.trim_end()).unwrap();
    assert!(matches!(TableReader::open(dir.path(), "t", &options), Err(Error::Truncated(_))));

    // missing required key
    let without_fanout: String = original.lines().filter(|l| !l.starts_with("fanout")).map(|l| format!("{}\n", l)).collect();
    std::fs::write(&info, without_fanout).unwrap();
    assert!(matches!(TableSeeker::open(dir.path(), "t", &options), Err(Error::Corruption(_))));

    // unparsable value
    std::fs::write(&info, original.replace("entries: 50", "entries: fifty")).unwrap();
    assert!(matches!(TableSeeker::open(dir.path(), "t", &options), Err(Error::Corruption(_))));

    // unknown keys are ignored
    std::fs::write(&info, format!("{}comment: hello\n", original)).unwrap();
    let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
    assert_eq!(seeker.get(&key(7)).unwrap(), Some(value(7)));
}

/// Test a missing index level file
#[test]
fn test_fault_missing_index_level() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(2);
    write_table(dir.path(), &options, 64);

    std::fs::remove_file(dir.path().join("t.001i")).unwrap();
    assert!(matches!(TableSeeker::open(dir.path(), "t", &options), Err(Error::Io(_))));

    // the sequential reader does not need the index
    assert_eq!(scan_checked(dir.path(), &options).unwrap(), 64);
}

/// Test a truncated heap file
#[test]
fn test_fault_truncated_heap() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().fanout(2);
    write_table(dir.path(), &options, 64);

    truncate_by(&dir.path().join("t.000h"), 3);

    let mut seeker = TableSeeker::open(dir.path(), "t", &options).unwrap();
    assert!(seeker.verify().is_err());
    assert!(matches!(seeker.get(&key(63)), Err(Error::Truncated(_))));
}
