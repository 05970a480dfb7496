//! Front-compressed spill record encoding.
//!
//! Each record is stored as `varint(lcp) varint(suffix_len) suffix_bytes`
//! where `lcp` is the length of the common byte prefix with the previous
//! record in the file. The first record of a file uses lcp = 0 (its
//! "previous" record is empty).

use std::io::{self, Write};

use super::codec::write_varint;

/// Length of the common byte prefix of `a` and `b`.
#[inline]
pub fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Append one record to a spill stream, front-compressed against the
/// record written immediately before it.
pub fn write_record<W: Write>(w: &mut W, previous: &[u8], current: &[u8]) -> io::Result<()> {
    let lcp = common_prefix(previous, current);
    write_varint(w, lcp)?;
    write_varint(w, current.len() - lcp)?;
    w.write_all(&current[lcp..])
}
