use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use memchr::memchr;
use regex::Regex;

use crate::common::io::open_file_data;
use crate::error::{Error, Result};

use super::glob::{extract_root, walk_regex};

/// Default size of one input split. The last split of a file may be
/// shorter.
pub const SPLIT_SIZE: u64 = 16 << 20; // 16mb

/// One byte range of one input file, consumed by exactly one mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub filename: PathBuf,
    pub start: u64,
    pub end: u64,
}

/// Resolve the input pattern and start a walker thread that publishes
/// splits on a bounded channel shared by all mappers. The walker stops
/// early when every receiver is gone.
pub fn enumerate(input: &str, mappers: usize, split_size: u64) -> Result<Receiver<Result<Split>>> {
    let pattern = std::path::absolute(input)?;
    let pattern = pattern.to_string_lossy().into_owned();

    let regex = Regex::new(&walk_regex(&pattern))
        .map_err(|e| Error::Config(format!("bad input pattern '{}': {}", input, e)))?;

    let mut root = PathBuf::from(extract_root(&pattern));
    if root.as_os_str().is_empty() {
        root = std::env::current_dir()?;
    }

    let (tx, rx) = bounded(mappers.max(1));
    thread::spawn(move || {
        if let Err(e) = walk(&root, &regex, split_size, &tx) {
            let _ = tx.send(Err(e));
        }
    });

    Ok(rx)
}

/// Recursive tree walk. Regular files whose absolute path matches the
/// pattern are chopped into splits; directories are visited in name order.
fn walk(path: &Path, regex: &Regex, split_size: u64, tx: &Sender<Result<Split>>) -> Result<()> {
    let meta = fs::metadata(path)?;

    if meta.is_file() && regex.is_match(&path.to_string_lossy()) {
        let size = meta.len();
        let mut start = 0;
        while start + split_size < size {
            send(
                tx,
                Split {
                    filename: path.to_path_buf(),
                    start,
                    end: start + split_size,
                },
            )?;
            start += split_size;
        }
        send(
            tx,
            Split {
                filename: path.to_path_buf(),
                start,
                end: size,
            },
        )?;
        return Ok(());
    }

    if meta.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();
        for entry in entries {
            walk(&entry, regex, split_size, tx)?;
        }
    }

    Ok(())
}

fn send(tx: &Sender<Result<Split>>, split: Split) -> Result<()> {
    // A disconnected channel means the job stopped consuming; unwind the
    // walk without reporting anything.
    tx.send(Ok(split)).map_err(|_| Error::Interrupted)
}

/// Deliver the records of one split, aligned to record boundaries.
///
/// A split that starts inside the file first discards bytes through the
/// first newline at or after `start`; if the whole range is the interior
/// of one record it delivers nothing. A split that reaches its `end`
/// keeps reading past it through the next newline (or EOF) so a record
/// straddling the boundary is delivered whole by the split it started in,
/// and only by that split.
pub fn write_split<W: Write>(split: &Split, w: &mut W) -> Result<u64> {
    let data = open_file_data(&split.filename)?;
    let start = (split.start as usize).min(data.len());
    let end = (split.end as usize).min(data.len());

    let mut from = start;
    if start > 0 {
        match memchr(b'\n', &data[start..end]) {
            Some(p) => from = start + p + 1,
            None => return Ok(0),
        }
    }

    let until = match memchr(b'\n', &data[end..]) {
        Some(p) => end + p + 1,
        None => data.len(),
    };

    w.write_all(&data[from..until])?;
    Ok((until - from) as u64)
}
