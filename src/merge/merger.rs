use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::mem;

use crate::error::{Error, Result};

use super::scanner::Scanner;

/// Min-heap element ordered by the scanner's current record.
struct HeapEntry<'a>(Scanner<'a>);

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.current() == other.0.current()
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.current().cmp(other.0.current())
    }
}

/// Joins the ordered record streams of any number of scanners into one
/// non-decreasing stream. Equal records are all emitted; their order among
/// scanners is unspecified.
pub struct Merger<'a> {
    heap: BinaryHeap<Reverse<HeapEntry<'a>>>,
    /// Scanner that produced the record in `cur`; re-armed on the next call.
    last: Option<HeapEntry<'a>>,
    prev: Vec<u8>,
    cur: Vec<u8>,
    err: Option<Error>,
    done: bool,
}

impl<'a> Merger<'a> {
    /// Prime every scanner by one record. Scanners with nothing to produce
    /// are dropped; a scanner failing its first advance fails construction.
    pub fn new(scanners: Vec<Scanner<'a>>) -> Result<Merger<'a>> {
        let mut heap = BinaryHeap::with_capacity(scanners.len());
        for mut s in scanners {
            if s.advance() {
                heap.push(Reverse(HeapEntry(s)));
            } else if let Some(e) = s.take_error() {
                return Err(e);
            }
        }
        Ok(Merger {
            heap,
            last: None,
            prev: Vec::new(),
            cur: Vec::new(),
            err: None,
            done: false,
        })
    }

    /// Advance to the next record. Returns false on exhaustion or on the
    /// first scanner error (see `take_error`).
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        if let Some(mut entry) = self.last.take() {
            if entry.0.advance() {
                // While the same scanner keeps producing records equal to
                // the one just emitted, skip the heap round trip. Every
                // duplicate is still emitted.
                if entry.0.current() == self.cur.as_slice() {
                    self.emit(entry);
                    return true;
                }
                self.heap.push(Reverse(entry));
            } else if let Some(e) = entry.0.take_error() {
                self.err = Some(e);
                self.done = true;
                return false;
            }
        }

        match self.heap.pop() {
            Some(Reverse(entry)) => {
                self.emit(entry);
                true
            }
            None => {
                self.done = true;
                false
            }
        }
    }

    fn emit(&mut self, entry: HeapEntry<'a>) {
        mem::swap(&mut self.prev, &mut self.cur);
        self.cur.clear();
        self.cur.extend_from_slice(entry.0.current());
        self.last = Some(entry);
    }

    /// The record produced by the latest successful `next`.
    pub fn current(&self) -> &[u8] {
        &self.cur
    }

    /// The record produced by the `next` before that; empty before the
    /// second record. Feeds the front compression of merge outputs.
    pub fn previous(&self) -> &[u8] {
        &self.prev
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }
}
