use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::merge::{MemoryScanner, Merger, Scanner};

use super::codec::{self, ENTRY_SIZE, INLINE_PREFIX};
use super::spill::write_record;

/// A packed record buffer for one (mapper, reducer) pair.
///
/// The arena is double-ended: `head` grows upward holding 32-byte index
/// entries, `tail` grows downward holding the overflow bytes of records
/// longer than the inline prefix. `head <= tail` always; when an append
/// does not fit, the buffer sorts itself and spills to disk, and the arena
/// is reused.
pub struct Buffer {
    head: usize,
    tail: usize,
    buf: Vec<u8>,
    records: u64,
    spills: usize,
    spill_dir: PathBuf,
}

impl Buffer {
    pub fn new(capacity: usize, spill_dir: PathBuf) -> Buffer {
        Buffer {
            head: 0,
            tail: capacity,
            buf: vec![0; capacity],
            records: 0,
            spills: 0,
            spill_dir,
        }
    }

    /// Number of index entries currently in the arena.
    pub fn len(&self) -> usize {
        self.head / ENTRY_SIZE
    }

    /// Bytes still unclaimed between the index region and the tail region.
    pub fn free(&self) -> usize {
        self.tail - self.head
    }

    /// Total records appended over the buffer's lifetime, spilled or not.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Number of spill files written so far.
    pub fn spills(&self) -> usize {
        self.spills
    }

    pub fn spill_path(&self, n: usize) -> PathBuf {
        self.spill_dir.join(format!("spill-{}", n))
    }

    /// Append a record, spilling the buffer first if the record does not
    /// fit next to the existing ones. A record that cannot fit even in an
    /// empty arena fails with `RecordTooLarge`.
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        let claim = ENTRY_SIZE + record.len().saturating_sub(INLINE_PREFIX);

        if claim > self.buf.len() {
            return Err(Error::RecordTooLarge {
                required: claim,
                capacity: self.buf.len(),
            });
        }

        if self.free() < claim {
            self.spill()?;
        }

        self.push_record(record);
        self.records += 1;
        Ok(())
    }

    fn push_record(&mut self, record: &[u8]) {
        codec::write_u64(&mut self.buf, self.head, record.len());
        self.head += 8;

        let inline = record.len().min(INLINE_PREFIX);
        self.buf[self.head..self.head + inline].copy_from_slice(&record[..inline]);
        self.head += INLINE_PREFIX;

        if record.len() > INLINE_PREFIX {
            self.tail -= record.len() - INLINE_PREFIX;
            let tail = self.tail;
            self.buf[tail..tail + record.len() - INLINE_PREFIX]
                .copy_from_slice(&record[INLINE_PREFIX..]);
            codec::write_u64(&mut self.buf, self.head, tail);
        }
        self.head += 8;
    }

    /// Byte-lexicographic in-place heapsort over the index entries.
    /// Tails are never moved; equal records may be reordered.
    pub fn sort(&mut self) {
        let n = self.len();
        let buf = self.buf.as_mut_slice();
        for i in (0..n / 2).rev() {
            sift_down(buf, i, n);
        }
        for end in (1..n).rev() {
            codec::swap(buf, 0, end);
            sift_down(buf, 0, end);
        }
    }

    /// Sort the arena and write it to the next `spill-<n>` file as a
    /// front-compressed sorted run, then reset the arena for reuse.
    pub fn spill(&mut self) -> Result<()> {
        self.sort();

        fs::create_dir_all(&self.spill_dir)?;
        let file = File::create(self.spill_path(self.spills))?;
        let mut w = BufWriter::new(file);

        {
            let mut s = MemoryScanner::new(self);
            while s.advance() {
                write_record(&mut w, s.previous(), s.current())?;
            }
        }
        w.flush()?;

        self.head = 0;
        self.tail = self.buf.len();
        self.spills += 1;
        Ok(())
    }

    /// True when a reducer-side read would have to fan in more than one
    /// spill file.
    pub fn need_external_merge(&self) -> bool {
        self.spills > 1
    }

    /// Staged k-way merge of the spill files until at most one remains.
    ///
    /// Each pass partitions the current spills into groups of at most
    /// `ways` consecutively numbered files, merges every group into
    /// `spill-<g>-merge`, deletes the inputs and renames the result to
    /// `spill-<g>`. `ways` bounds the open-file fan-in of a single merge.
    pub fn external_merge(&mut self, ways: usize) -> Result<()> {
        let ways = ways.max(2);

        while self.spills > 1 {
            let mut new_spills = 0;
            let mut start = 0;

            while start < self.spills {
                let end = (start + ways).min(self.spills);
                self.merge_group(start, end, new_spills)?;
                new_spills += 1;
                start = end;
            }

            self.spills = new_spills;
        }
        Ok(())
    }

    /// Merge spill files [start, end) into a new `spill-<group>`.
    fn merge_group(&self, start: usize, end: usize, group: usize) -> Result<()> {
        let scanners: Vec<Scanner<'_>> = (start..end)
            .map(|k| Scanner::file(self.spill_path(k)))
            .collect();
        let mut m = Merger::new(scanners)?;

        let merge_path = self.spill_dir.join(format!("spill-{}-merge", group));
        let file = File::create(&merge_path)?;
        let mut w = BufWriter::new(file);

        while m.next() {
            write_record(&mut w, m.previous(), m.current())?;
        }
        if let Some(e) = m.take_error() {
            return Err(e);
        }
        w.flush()?;
        drop(w);

        for k in start..end {
            fs::remove_file(self.spill_path(k))?;
        }
        fs::rename(&merge_path, self.spill_path(group))?;
        Ok(())
    }

    pub(crate) fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Length of the record at index entry `i`.
    pub(crate) fn entry_len(&self, i: usize) -> usize {
        codec::read_u64(&self.buf, i * ENTRY_SIZE)
    }

    /// Copy the record at index entry `i` into `out`, which must already
    /// have the record's exact length.
    pub(crate) fn fill_record(&self, i: usize, out: &mut [u8]) {
        let n = out.len();
        let inline = n.min(INLINE_PREFIX);
        let entry = i * ENTRY_SIZE + 8;
        out[..inline].copy_from_slice(&self.buf[entry..entry + inline]);
        if n > INLINE_PREFIX {
            let p = codec::read_u64(&self.buf, i * ENTRY_SIZE + 24);
            out[INLINE_PREFIX..].copy_from_slice(&self.buf[p..p + n - INLINE_PREFIX]);
        }
    }

    #[cfg(test)]
    pub(crate) fn arena(&self) -> &[u8] {
        &self.buf
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

fn sift_down(buf: &mut [u8], mut root: usize, n: usize) {
    loop {
        let mut child = 2 * root + 1;
        if child >= n {
            break;
        }
        if child + 1 < n && codec::compare(buf, child, child + 1) == Ordering::Less {
            child += 1;
        }
        if codec::compare(buf, root, child) == Ordering::Less {
            codec::swap(buf, root, child);
            root = child;
        } else {
            break;
        }
    }
}
