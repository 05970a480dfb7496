use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

/// Threshold above which we use mmap instead of buffered read.
/// mmap has overhead from page table setup; for small files buffered read wins.
const MMAP_THRESHOLD: u64 = 64 * 1024; // 64KB

/// File contents, either memory-mapped or heap-allocated.
pub enum FileData {
    Mmap(Mmap),
    Owned(Vec<u8>),
}

impl std::ops::Deref for FileData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            FileData::Mmap(m) => m,
            FileData::Owned(v) => v,
        }
    }
}

/// Open a file for sequential byte access, choosing mmap for large files
/// and a plain read for small or empty ones.
pub fn open_file_data(path: &Path) -> io::Result<FileData> {
    let metadata = std::fs::metadata(path)?;

    if metadata.len() >= MMAP_THRESHOLD {
        let file = File::open(path)?;
        // SAFETY: read-only mapping; the input file must not be truncated
        // while the mapping is alive.
        let mmap = unsafe { Mmap::map(&file)? };
        #[cfg(target_os = "linux")]
        {
            let _ = mmap.advise(memmap2::Advice::Sequential);
        }
        Ok(FileData::Mmap(mmap))
    } else {
        Ok(FileData::Owned(std::fs::read(path)?))
    }
}
