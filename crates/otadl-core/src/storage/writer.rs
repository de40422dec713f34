//! Sequential chunked writer for the in-progress `.part` file.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// Appends the response body to the temp file in fixed-size chunks.
///
/// Data is buffered until `chunk_size` bytes are pending, then written and
/// flushed; the caller persists the offset after each flush so that the
/// stored offset never exceeds what is on disk.
pub struct ChunkWriter {
    file: File,
    chunk_size: usize,
    buf: Vec<u8>,
    flushed: u64,
}

impl ChunkWriter {
    /// Open the temp file positioned at `offset`. Anything past `offset` is
    /// discarded; `offset == 0` starts a fresh file.
    pub fn open(temp_path: &Path, offset: u64, chunk_size: usize) -> io::Result<Self> {
        if let Some(parent) = temp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(offset == 0)
            .open(temp_path)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        let chunk_size = chunk_size.max(1);
        Ok(Self {
            file,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            flushed: offset,
        })
    }

    /// Buffer `data`. Returns the new on-disk length if one or more chunks
    /// were flushed by this call.
    pub fn push(&mut self, mut data: &[u8]) -> io::Result<Option<u64>> {
        let mut flushed_any = false;
        while !data.is_empty() {
            let room = self.chunk_size - self.buf.len();
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == self.chunk_size {
                self.flush_chunk()?;
                flushed_any = true;
            }
        }
        Ok(flushed_any.then_some(self.flushed))
    }

    /// Write out whatever is buffered. Returns the on-disk length.
    pub fn flush_chunk(&mut self) -> io::Result<u64> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.file.flush()?;
            self.flushed += self.buf.len() as u64;
            self.buf.clear();
        }
        Ok(self.flushed)
    }

    /// Drop everything written so far and start over at offset zero
    /// (server ignored the Range request and sent the whole body).
    pub fn restart(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.flushed = 0;
        Ok(())
    }

    /// Bytes on disk plus bytes still buffered.
    pub fn len(&self) -> u64 {
        self.flushed + self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush, fsync and close. Returns the final on-disk length.
    pub fn finish(mut self) -> io::Result<u64> {
        let len = self.flush_chunk()?;
        self.file.sync_all()?;
        Ok(len)
    }
}

/// Atomically rename the finished temp file to its public location.
/// Fails if `final_path` is on a different filesystem; the temp file is left
/// in place in that case.
pub fn finalize(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(temp_path, final_path)
}
