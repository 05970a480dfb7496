use std::fs::File;
use std::io::{self, BufReader, Read};
use std::mem;
use std::path::PathBuf;

use crate::buffer::Buffer;
use crate::buffer::codec::read_varint;
use crate::error::Error;

/// Grow `v` to exactly `n` bytes, allocating in whole 4 KiB steps so that
/// a run of similarly sized records settles on one allocation.
fn grow(v: &mut Vec<u8>, n: usize) {
    if n > v.capacity() {
        *v = vec![0; (n / 4096 + 1) * 4096];
    }
    v.resize(n, 0);
}

/// Cursor over one sorted run, in memory or on disk.
///
/// A tagged enum rather than a trait object keeps the merge inner loop
/// monomorphized. Both variants expose the record produced by the latest
/// `advance` (`current`) and the one before it (`previous`), each valid
/// until the next `advance`.
pub enum Scanner<'a> {
    Memory(MemoryScanner<'a>),
    File(FileScanner),
}

impl<'a> Scanner<'a> {
    pub fn memory(buffer: &'a Buffer) -> Scanner<'a> {
        Scanner::Memory(MemoryScanner::new(buffer))
    }

    pub fn file(path: PathBuf) -> Scanner<'a> {
        Scanner::File(FileScanner::open(path))
    }

    pub fn advance(&mut self) -> bool {
        match self {
            Scanner::Memory(s) => s.advance(),
            Scanner::File(s) => s.advance(),
        }
    }

    pub fn current(&self) -> &[u8] {
        match self {
            Scanner::Memory(s) => s.current(),
            Scanner::File(s) => s.current(),
        }
    }

    pub fn previous(&self) -> &[u8] {
        match self {
            Scanner::Memory(s) => s.previous(),
            Scanner::File(s) => s.previous(),
        }
    }

    pub fn take_error(&mut self) -> Option<Error> {
        match self {
            Scanner::Memory(_) => None,
            Scanner::File(s) => s.err.take(),
        }
    }
}

/// Walks the index entries of a sorted buffer, materializing each record
/// (inline prefix plus tail bytes) into an owned double buffer.
pub struct MemoryScanner<'a> {
    index: usize,
    buffer: &'a Buffer,
    lst: Vec<u8>,
    nxt: Vec<u8>,
}

impl<'a> MemoryScanner<'a> {
    pub fn new(buffer: &'a Buffer) -> MemoryScanner<'a> {
        MemoryScanner {
            index: 0,
            buffer,
            lst: Vec::new(),
            nxt: Vec::new(),
        }
    }

    pub fn advance(&mut self) -> bool {
        mem::swap(&mut self.lst, &mut self.nxt);
        if self.index >= self.buffer.len() {
            return false;
        }
        let n = self.buffer.entry_len(self.index);
        grow(&mut self.nxt, n);
        self.buffer.fill_record(self.index, &mut self.nxt);
        self.index += 1;
        true
    }

    pub fn current(&self) -> &[u8] {
        &self.nxt
    }

    pub fn previous(&self) -> &[u8] {
        &self.lst
    }
}

/// Reads a spill file sequentially, undoing the front compression by
/// reusing the leading bytes of the previously decoded record.
pub struct FileScanner {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    err: Option<Error>,
    lst: Vec<u8>,
    nxt: Vec<u8>,
}

impl FileScanner {
    /// Open failures are deferred: the scanner reports them through
    /// `advance`/`take_error` like any mid-stream error.
    pub fn open(path: PathBuf) -> FileScanner {
        let (reader, err) = match File::open(&path) {
            Ok(f) => (Some(BufReader::new(f)), None),
            Err(e) => (None, Some(Error::Io(e))),
        };
        FileScanner {
            path,
            reader,
            err,
            lst: Vec::new(),
            nxt: Vec::new(),
        }
    }

    pub fn advance(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        mem::swap(&mut self.lst, &mut self.nxt);

        // End of input on the first byte of the prefix length is the
        // normal end of a spill file.
        let prefix = match read_varint(reader) {
            Ok(Some(n)) => n,
            Ok(None) => {
                self.reader = None;
                return false;
            }
            Err(e) => {
                self.err = Some(self.corrupt("prefix length", e));
                return false;
            }
        };

        let suffix = match read_varint(reader) {
            Ok(Some(n)) => n,
            Ok(None) => {
                let e = io::Error::new(io::ErrorKind::UnexpectedEof, "missing record length");
                self.err = Some(self.corrupt("record length", e));
                return false;
            }
            Err(e) => {
                self.err = Some(self.corrupt("record length", e));
                return false;
            }
        };

        if prefix > self.lst.len() {
            let e = io::Error::new(
                io::ErrorKind::InvalidData,
                "prefix longer than previous record",
            );
            self.err = Some(self.corrupt("prefix length", e));
            return false;
        }

        let n = prefix + suffix;
        grow(&mut self.nxt, n);
        self.nxt[..prefix].copy_from_slice(&self.lst[..prefix]);
        if let Err(e) = reader.read_exact(&mut self.nxt[prefix..n]) {
            self.err = Some(self.corrupt("record bytes", e));
            return false;
        }
        true
    }

    pub fn current(&self) -> &[u8] {
        &self.nxt
    }

    pub fn previous(&self) -> &[u8] {
        &self.lst
    }

    fn corrupt(&self, what: &str, e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Error::CorruptSpill {
                path: self.path.clone(),
                reason: format!("{} - {}", what, e),
            },
            _ => Error::Io(e),
        }
    }
}

/// Build the scanners for one buffer's runs: the in-memory run, plus the
/// surviving spill file when the buffer has spilled.
pub fn buffer_scanners(buffer: &Buffer) -> Vec<Scanner<'_>> {
    let mut scanners = vec![Scanner::memory(buffer)];
    if buffer.spills() > 0 {
        scanners.push(Scanner::file(buffer.spill_path(0)));
    }
    scanners
}
