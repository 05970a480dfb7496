use std::cmp::Ordering;
use std::fs;
use std::io::{self, Read};

use proptest::prelude::*;

use crate::merge::{Merger, Scanner, buffer_scanners};

use super::codec::{self, ENTRY_SIZE, read_varint, write_varint};
use super::core::Buffer;
use super::matrix::BufferMatrix;
use super::spill::{common_prefix, write_record};

const TEST_BUFFER_SIZE: usize = 1 << 20; // 1mb

fn test_buffer(capacity: usize) -> (tempfile::TempDir, Buffer) {
    let dir = tempfile::tempdir().unwrap();
    let buffer = Buffer::new(capacity, dir.path().join("spill"));
    (dir, buffer)
}

/// All suffix combinations of 'a'/'b' of length 0..9 behind a fixed
/// prefix, exercising every record length around the inline threshold.
fn generate_records(prefix_size: usize) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    for i in 0..9 {
        let mut record = vec![b'x'; prefix_size];
        record.resize(prefix_size + i, b'a');
        loop {
            records.push(record.clone());
            let mut done = true;
            for j in prefix_size..record.len() {
                if record[j] == b'a' {
                    record[j] = b'b';
                    done = false;
                    break;
                }
                record[j] = b'a';
            }
            if done {
                break;
            }
        }
    }
    records
}

#[test]
fn test_compare() {
    let (_dir, mut b) = test_buffer(TEST_BUFFER_SIZE);
    let mut records = generate_records(0); // 0-8 bytes
    records.extend(generate_records(12)); // 12-20 bytes
    records.extend(generate_records(28)); // 28-36 bytes
    records.extend(generate_records(500)); // 500+ bytes
    for record in &records {
        b.append(record).unwrap();
    }
    for i in 0..records.len() {
        for j in 0..records.len() {
            let expected = records[i].cmp(&records[j]);
            let actual = codec::compare(b.arena(), i, j);
            assert_eq!(
                expected, actual,
                "compare of records {} and {} returned {:?}, want {:?}",
                i, j, actual, expected
            );
        }
    }
}

#[test]
fn test_swap_moves_index_entries_only() {
    let (_dir, mut b) = test_buffer(TEST_BUFFER_SIZE);
    b.append(b"a-record-longer-than-the-inline-prefix").unwrap();
    b.append(b"b-record-longer-than-the-inline-prefix").unwrap();

    codec::swap(b.arena_mut(), 0, 1);
    assert_eq!(read_all(&b), vec![
        b"b-record-longer-than-the-inline-prefix".to_vec(),
        b"a-record-longer-than-the-inline-prefix".to_vec(),
    ]);
}

#[test]
fn test_append_accounting() {
    let (_dir, mut b) = test_buffer(1024);

    let free = b.free();
    b.append(b"tiny").unwrap();
    assert_eq!(b.len(), 1);
    assert_eq!(b.free(), free - ENTRY_SIZE);

    let free = b.free();
    b.append(&[b'y'; 40]).unwrap();
    assert_eq!(b.len(), 2);
    assert_eq!(b.free(), free - ENTRY_SIZE - (40 - 16));
    assert_eq!(b.records(), 2);
}

#[test]
fn test_append_record_too_large() {
    let (_dir, mut b) = test_buffer(64);
    // claim = 32 + (64 - 16) = 80 > 64
    let err = b.append(&[b'z'; 64]).unwrap_err();
    assert!(matches!(
        err,
        crate::Error::RecordTooLarge {
            required: 80,
            capacity: 64
        }
    ));
    assert_eq!(b.len(), 0);
    assert_eq!(b.spills(), 0);
}

#[test]
fn test_append_exact_fit() {
    // A record whose claim is exactly the arena size fits in an empty
    // buffer.
    let (_dir, mut b) = test_buffer(ENTRY_SIZE + 16);
    b.append(&[b'z'; 32]).unwrap();
    assert_eq!(b.len(), 1);
    assert_eq!(b.free(), 0);
}

#[test]
fn test_append_spills_when_full() {
    // Room for exactly two short records.
    let (_dir, mut b) = test_buffer(2 * ENTRY_SIZE);
    b.append(b"bb").unwrap();
    b.append(b"aa").unwrap();
    b.append(b"cc").unwrap();

    assert_eq!(b.spills(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(b.records(), 3);

    let spilled = read_spill(&b, 0);
    assert_eq!(spilled, vec![b"aa".to_vec(), b"bb".to_vec()]);
}

#[test]
fn test_sort_orders_records() {
    let (_dir, mut b) = test_buffer(TEST_BUFFER_SIZE);
    let mut records = generate_records(12);
    records.reverse();
    for record in &records {
        b.append(record).unwrap();
    }

    b.sort();

    let mut expected = records.clone();
    expected.sort();
    assert_eq!(read_all(&b), expected);
}

#[test]
fn test_empty_record_roundtrip() {
    let (_dir, mut b) = test_buffer(1024);
    b.append(b"").unwrap();
    b.append(b"x").unwrap();
    b.sort();
    assert_eq!(read_all(&b), vec![b"".to_vec(), b"x".to_vec()]);

    b.spill().unwrap();
    assert_eq!(read_spill(&b, 0), vec![b"".to_vec(), b"x".to_vec()]);
}

#[test]
fn test_spill_resets_buffer() {
    let (_dir, mut b) = test_buffer(1024);
    b.append(b"some record").unwrap();
    b.spill().unwrap();

    assert_eq!(b.len(), 0);
    assert_eq!(b.free(), 1024);
    assert_eq!(b.spills(), 1);
    assert_eq!(b.records(), 1);
}

#[test]
fn test_spill_file_format() {
    let (_dir, mut b) = test_buffer(1024);
    b.append(b"abd").unwrap();
    b.append(b"abc").unwrap();
    b.spill().unwrap();

    let mut raw = Vec::new();
    fs::File::open(b.spill_path(0))
        .unwrap()
        .read_to_end(&mut raw)
        .unwrap();
    // "abc" against the empty record, then "abd" sharing the "ab" prefix.
    assert_eq!(raw, vec![0, 3, b'a', b'b', b'c', 2, 1, b'd']);
}

#[test]
fn test_external_merge_reduces_to_one_spill() {
    let (_dir, mut b) = test_buffer(2 * ENTRY_SIZE);
    let mut records: Vec<Vec<u8>> = (0..20).map(|i| format!("rec-{:02}", 19 - i).into_bytes()).collect();
    for record in &records {
        b.append(record).unwrap();
    }
    b.sort();
    assert!(b.need_external_merge());

    b.external_merge(3).unwrap();
    assert_eq!(b.spills(), 1);
    assert!(!b.need_external_merge());

    // No stray spill or merge files survive.
    let entries = fs::read_dir(b.spill_dir()).unwrap().count();
    assert_eq!(entries, 1);

    let mut all = read_spill(&b, 0);
    all.extend(read_all(&b));
    all.sort();
    records.sort();
    assert_eq!(all, records);
}

#[test]
fn test_matrix_transpose_moves_buffers_to_columns() {
    let dir = tempfile::tempdir().unwrap();
    let rows: Vec<Vec<Buffer>> = (0..2)
        .map(|i| {
            (0..3)
                .map(|j| {
                    let mut b = Buffer::new(1024, dir.path().join(format!("{}-{}", i, j)));
                    for _ in 0..i * 3 + j {
                        b.append(b"r").unwrap();
                    }
                    b
                })
                .collect()
        })
        .collect();

    let columns = BufferMatrix::from_rows(rows).into_columns();
    assert_eq!(columns.len(), 3);
    for (j, column) in columns.iter().enumerate() {
        assert_eq!(column.len(), 2);
        for (i, b) in column.iter().enumerate() {
            assert_eq!(b.records(), (i * 3 + j) as u64);
        }
    }
}

#[test]
fn test_varint_roundtrip() {
    for n in [0usize, 1, 127, 128, 129, 16383, 16384, 1 << 20, usize::MAX] {
        let mut encoded = Vec::new();
        write_varint(&mut encoded, n).unwrap();
        let decoded = read_varint(&mut io::Cursor::new(&encoded)).unwrap();
        assert_eq!(decoded, Some(n));
    }
}

#[test]
fn test_varint_clean_eof() {
    let decoded = read_varint(&mut io::Cursor::new(&[][..])).unwrap();
    assert_eq!(decoded, None);
}

#[test]
fn test_varint_eof_mid_integer() {
    let err = read_varint(&mut io::Cursor::new(&[0x80][..])).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
}

#[test]
fn test_common_prefix() {
    assert_eq!(common_prefix(b"", b""), 0);
    assert_eq!(common_prefix(b"abc", b"abd"), 2);
    assert_eq!(common_prefix(b"abc", b"abc"), 3);
    assert_eq!(common_prefix(b"abc", b"abcdef"), 3);
    assert_eq!(common_prefix(b"xyz", b"abc"), 0);
}

#[test]
fn test_write_record_against_previous() {
    let mut out = Vec::new();
    write_record(&mut out, b"", b"apple").unwrap();
    write_record(&mut out, b"apple", b"apricot").unwrap();
    assert_eq!(
        out,
        vec![
            0, 5, b'a', b'p', b'p', b'l', b'e', //
            2, 5, b'r', b'i', b'c', b'o', b't',
        ]
    );
}

/// Drain a sorted buffer's memory run.
fn read_all(b: &Buffer) -> Vec<Vec<u8>> {
    let mut s = crate::merge::MemoryScanner::new(b);
    let mut out = Vec::new();
    while s.advance() {
        out.push(s.current().to_vec());
    }
    out
}

/// Decode one spill file.
fn read_spill(b: &Buffer, n: usize) -> Vec<Vec<u8>> {
    let mut s = Scanner::file(b.spill_path(n));
    let mut out = Vec::new();
    while s.advance() {
        out.push(s.current().to_vec());
    }
    assert!(s.take_error().is_none());
    out
}

proptest! {
    /// Any multiset of records appended through spills and external
    /// merges comes back as exactly its sorted self.
    #[test]
    fn prop_shuffle_roundtrip(
        records in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64),
            0..200,
        )
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut b = Buffer::new(512, dir.path().join("spill"));
        for record in &records {
            b.append(record).unwrap();
        }
        b.sort();
        if b.need_external_merge() {
            b.external_merge(2).unwrap();
        }

        let mut m = Merger::new(buffer_scanners(&b)).unwrap();
        let mut out = Vec::new();
        while m.next() {
            out.push(m.current().to_vec());
        }
        prop_assert!(m.take_error().is_none());

        let mut expected = records.clone();
        expected.sort();
        prop_assert_eq!(out, expected);
    }

    /// The in-place comparator agrees with comparing the materialized
    /// records.
    #[test]
    fn prop_compare_matches_slice_ordering(
        a in proptest::collection::vec(any::<u8>(), 0..40),
        c in proptest::collection::vec(any::<u8>(), 0..40),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut b = Buffer::new(4096, dir.path().join("spill"));
        b.append(&a).unwrap();
        b.append(&c).unwrap();
        let expected = a.cmp(&c);
        prop_assert_eq!(codec::compare(b.arena(), 0, 1), expected);
        prop_assert_eq!(codec::compare(b.arena(), 1, 0), expected.reverse());
        prop_assert_eq!(codec::compare(b.arena(), 0, 0), Ordering::Equal);
    }
}
