use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crossbeam_channel::Receiver;
use memchr::memchr;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::input::{Split, write_split};
use crate::merge::{Merger, buffer_scanners};

use super::context::WorkerContext;

/// 256KB buffer for child pipes; reduces syscall frequency on the
/// shuffle hot paths.
const STREAM_BUF_SIZE: usize = 256 * 1024;

/// Feed input splits to a mapper's stdin, competing with the other
/// mappers on the shared splits channel. Dropping the pipe on return
/// closes the child's stdin.
pub fn stream_from_input<W: Write>(
    ctx: &WorkerContext,
    mut w: W,
    splits: &Receiver<Result<Split>>,
) -> Result<()> {
    for item in splits.iter() {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        let split = item?;
        ctx.log(&format!(
            "processing {} [{}:{}]",
            split.filename.display(),
            split.start,
            split.end
        ));
        write_split(&split, &mut w)?;
    }
    Ok(())
}

/// Parse one mapper output line into its partition key and record bytes.
/// The key is the decimal prefix before the first tab; without a tab the
/// whole line is the key and the record is empty.
pub fn parse_partition(line: &[u8], reducers: usize) -> Result<(usize, &[u8])> {
    let stop = memchr(b'\t', line).unwrap_or(line.len());
    let key = &line[..stop];

    let Some(partition) = parse_decimal(key) else {
        return Err(Error::BadPartitionKey(
            String::from_utf8_lossy(line).into_owned(),
        ));
    };
    if partition >= reducers as u64 {
        return Err(Error::PartitionOutOfRange {
            key: partition,
            reducers,
        });
    }

    let record = if stop < line.len() {
        &line[stop + 1..]
    } else {
        &[]
    };
    Ok((partition as usize, record))
}

fn parse_decimal(key: &[u8]) -> Option<u64> {
    if key.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in key {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(n)
}

/// Parse a mapper's stdout line stream and route every record into the
/// buffer of its partition.
pub fn stream_to_shuffle<R: Read>(ctx: &WorkerContext, r: R, row: &mut [Buffer]) -> Result<()> {
    let mut r = BufReader::with_capacity(STREAM_BUF_SIZE, r);
    let mut line = Vec::with_capacity(256);

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        line.clear();
        if r.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let (partition, record) = parse_partition(&line, row.len())?;
        row[partition].append(record)?;
    }
}

/// Assemble a reducer's stdin: the k-way merge of its column's in-memory
/// and on-disk runs, one record per line, globally sorted.
pub fn stream_from_shuffle<W: Write>(
    ctx: &WorkerContext,
    w: W,
    column: &[Buffer],
) -> Result<()> {
    let mut w = BufWriter::with_capacity(STREAM_BUF_SIZE, w);

    let mut scanners = Vec::new();
    for buffer in column {
        scanners.extend(buffer_scanners(buffer));
    }
    let mut m = Merger::new(scanners)?;

    while m.next() {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        w.write_all(m.current())?;
        w.write_all(b"\n")?;
    }
    if let Some(e) = m.take_error() {
        return Err(e);
    }
    w.flush()?;
    Ok(())
}

/// Copy a child's stdout into `part-<worker_id>` under the staged output
/// directory.
pub fn stream_to_output<R: Read>(ctx: &WorkerContext, mut r: R, output: &Path) -> Result<()> {
    let path = output.join(format!("part-{}", ctx.worker_id));
    let mut f = File::create(path)?;
    io::copy(&mut r, &mut f)?;
    Ok(())
}

/// Forward a child's stderr to the engine log, one tagged line per line.
pub fn stream_to_log<R: Read>(ctx: &WorkerContext, r: R) -> Result<()> {
    let mut r = BufReader::new(r);
    let mut line = Vec::new();

    loop {
        line.clear();
        if r.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        ctx.log(&String::from_utf8_lossy(&line));
    }
}
