// src/bundle.rs
//! Bundle store (C4): owns the backing file handle, composes the byte codec,
//! entry directory and allocator, and implements open/read-header/
//! write-header/close plus the keyed read/write/delete operations.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::allocator::{self, AllocContext, HEADER_ENTRY_LEN};
use crate::byte_codec::{read_u32_be, read_u64_be, write_u32_be, write_u64_be};
use crate::entry::{Entry, EntryDirectory};
use crate::error::{Error, Result};
use crate::stream::OutStream;
use crate::texture::{self, SourceImage, TextureDescriptor};

pub const BUNDLE_UUID: [u8; 16] = [
    0x60, 0x70, 0xc8, 0x99, 0x82, 0xa1, 0x41, 0x84, 0x89, 0x51, 0x08, 0xc9, 0x1c, 0xc9, 0xb6, 0x20,
];
pub const BUNDLE_VERSION: u32 = 1;
pub const MAIN_HEADER_LEN: u64 = 28;

/// Default header-region reservation for a brand new bundle: enough for ten
/// directory entries at their loose padding.
fn default_headers_size() -> u64 {
    allocator::padded(HEADER_ENTRY_LEN * 10, false)
}

pub struct Bundle {
    file: File,
    dir: EntryDirectory,
    first_header_offset: u64,
    first_file_offset: u64,
    headers_byte_count: u64,
    read_only: bool,
    precise: bool,
}

impl Bundle {
    fn init_fresh(read_only: bool, precise: bool, headers_size: Option<u64>, file: File) -> Self {
        let first_header_offset = MAIN_HEADER_LEN;
        let allocated_header_bytes = headers_size.unwrap_or_else(default_headers_size);
        Bundle {
            file,
            dir: EntryDirectory::new(),
            first_header_offset,
            first_file_offset: first_header_offset + allocated_header_bytes,
            headers_byte_count: 0,
            read_only,
            precise,
        }
    }

    fn read_header(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::FileAccess(e.to_string()))?;

        let mut main_buf = [0u8; MAIN_HEADER_LEN as usize];
        let amt_read = read_up_to(&mut self.file, &mut main_buf)?;
        if amt_read == 0 {
            return Err(Error::EmptyFile);
        }
        if amt_read != main_buf.len() {
            return Err(Error::InvalidFormat("truncated main header".into()));
        }
        if main_buf[0..16] != BUNDLE_UUID {
            return Err(Error::InvalidFormat("bad bundle magic".into()));
        }
        let version = read_u32_be(&main_buf[16..20]);
        if version != BUNDLE_VERSION {
            return Err(Error::WrongVersion {
                found: version,
                expected: BUNDLE_VERSION,
            });
        }
        self.first_header_offset = read_u32_be(&main_buf[20..24]) as u64;
        let entry_count = read_u32_be(&main_buf[24..28]) as u64;

        self.headers_byte_count = 0;
        let mut header_offset = self.first_header_offset;
        for _ in 0..entry_count {
            self.file
                .seek(SeekFrom::Start(header_offset))
                .map_err(|e| Error::FileAccess(e.to_string()))?;
            let mut rec_buf = [0u8; HEADER_ENTRY_LEN as usize];
            self.file
                .read_exact(&mut rec_buf)
                .map_err(|_| Error::InvalidFormat("truncated directory record".into()))?;

            let record_size = read_u32_be(&rec_buf[0..4]) as u64;
            header_offset += record_size;

            let offset = read_u64_be(&rec_buf[4..12]);
            let size = read_u64_be(&rec_buf[12..20]);
            let allocated_size = read_u64_be(&rec_buf[20..28]);
            let mtime = read_u32_be(&rec_buf[28..32]);
            let key_size = read_u32_be(&rec_buf[32..36]) as usize;

            let mut key = vec![0u8; key_size];
            self.file
                .read_exact(&mut key)
                .map_err(|_| Error::InvalidFormat("truncated directory key".into()))?;

            self.headers_byte_count += HEADER_ENTRY_LEN + key_size as u64;

            let mut entry = Entry::new(key, offset, allocated_size, mtime);
            entry.size = size;
            self.dir.push(entry);

            if offset < self.first_file_offset || self.dir.len() == 1 {
                self.first_file_offset = offset;
            }
        }
        self.dir.recompute_endpoints();
        if let Some(first) = self.dir.first() {
            self.first_file_offset = first.offset;
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::FileAccess(e.to_string()))?;

        let mut main_buf = Vec::with_capacity(MAIN_HEADER_LEN as usize);
        main_buf.extend_from_slice(&BUNDLE_UUID);
        write_u32_be(&mut main_buf, BUNDLE_VERSION);
        write_u32_be(&mut main_buf, self.first_header_offset as u32);
        write_u32_be(&mut main_buf, self.dir.len() as u32);
        self.file
            .write_all(&main_buf)
            .map_err(|e| Error::FileAccess(e.to_string()))?;

        let allocated_header_bytes = self
            .first_file_offset
            .saturating_sub(self.first_header_offset);
        if self.headers_byte_count > allocated_header_bytes {
            let wanted_entry_bytes = allocator::padded(self.headers_byte_count, false);
            let wanted_offset_end = self.first_header_offset + wanted_entry_bytes;
            let mut i = 0;
            while i < self.dir.len() {
                if self.dir.get(i).offset < wanted_offset_end {
                    let new_size = allocator::padded(self.dir.get(i).size, false);
                    self.resize_entry(i, new_size)?;
                }
                i += 1;
            }
        }

        self.file
            .seek(SeekFrom::Start(self.first_header_offset))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        for e in self.dir.iter() {
            let mut rec = Vec::with_capacity(HEADER_ENTRY_LEN as usize + e.key.len());
            write_u32_be(&mut rec, HEADER_ENTRY_LEN as u32 + e.key.len() as u32);
            write_u64_be(&mut rec, e.offset);
            write_u64_be(&mut rec, e.size);
            write_u64_be(&mut rec, e.allocated_size);
            write_u32_be(&mut rec, e.mtime);
            write_u32_be(&mut rec, e.key.len() as u32);
            rec.extend_from_slice(&e.key);
            self.file
                .write_all(&rec)
                .map_err(|e| Error::FileAccess(e.to_string()))?;
        }
        Ok(())
    }

    fn open_internal(path: &Path, read_only: bool, headers_size: Option<u64>) -> Result<Self> {
        let mut open_for_writing = false;

        let existing = if read_only {
            OpenOptions::new().read(true).open(path)
        } else {
            OpenOptions::new().read(true).write(true).open(path)
        };

        let file = match existing {
            Ok(f) => f,
            Err(_) if read_only => return Err(Error::FileAccess(format!("{}", path.display()))),
            Err(_) => {
                open_for_writing = true;
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::FileAccess(e.to_string()))?
            }
        };

        let mut bundle = Bundle::init_fresh(read_only, headers_size.is_some(), headers_size, file);
        if !open_for_writing {
            match bundle.read_header() {
                Ok(()) => {}
                Err(Error::EmptyFile) => {
                    if read_only {
                        return Err(Error::EmptyFile);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(bundle)
    }

    /// Opens read-only; fails if the file is missing or empty.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(path.as_ref(), true, None)
    }

    /// Opens read-write, creating a fresh bundle if the file is missing or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(path.as_ref(), false, None)
    }

    /// Opens read-write with a caller-supplied initial directory reservation
    /// (used by `strip` to emit a minimum-size bundle).
    pub fn open_precise(path: impl AsRef<Path>, headers_size: u64) -> Result<Self> {
        Self::open_internal(path.as_ref(), false, Some(headers_size))
    }

    pub fn close(mut self) -> Result<()> {
        if !self.read_only {
            self.write_header()?;
        }
        Ok(())
    }

    pub fn headers_byte_count(&self) -> u64 {
        self.headers_byte_count
    }

    pub fn file_count(&self) -> usize {
        self.dir.len()
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.dir.iter().map(|e| e.key.clone()).collect()
    }

    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.dir.find_by_key(key)
    }

    pub fn file_size(&self, index: usize) -> u64 {
        self.dir.get(index).size
    }

    pub fn file_mtime(&self, index: usize) -> u32 {
        self.dir.get(index).mtime
    }

    pub fn file_key(&self, index: usize) -> &[u8] {
        &self.dir.get(index).key
    }

    pub fn entry_offset(&self, index: usize) -> u64 {
        self.dir.get(index).offset
    }

    pub fn file_read(&mut self, index: usize) -> Result<Vec<u8>> {
        let entry = self.dir.get(index);
        let offset = entry.offset;
        let size = entry.size as usize;
        let mut buf = vec![0u8; size];
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        Ok(buf)
    }

    pub fn read_at(&mut self, index: usize, rel_offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self.dir.get(index).offset + rel_offset;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        self.file
            .read_exact(buf)
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        Ok(())
    }

    pub fn is_texture(&mut self, index: usize) -> Result<bool> {
        let entry = self.dir.get(index);
        if entry.size < crate::texture::TEXTURE_UUID.len() as u64 {
            return Ok(false);
        }
        let mut magic = [0u8; 16];
        self.read_at(index, 0, &mut magic)?;
        Ok(magic == crate::texture::TEXTURE_UUID)
    }

    fn alloc_ctx(&mut self) -> AllocContext<'_> {
        AllocContext {
            dir: &mut self.dir,
            first_file_offset: &mut self.first_file_offset,
            first_header_offset: self.first_header_offset,
            headers_byte_count: self.headers_byte_count,
            precise: self.precise,
        }
    }

    fn resize_entry(&mut self, index: usize, size: u64) -> Result<()> {
        let mut ctx = self.alloc_ctx();
        allocator::resize(&mut ctx, &mut self.file, index, size)
    }

    /// Returns the index of an existing entry (resized up if needed) or
    /// allocates a fresh one.
    fn get_or_allocate_entry(&mut self, key: &[u8], size: u64) -> Result<usize> {
        if let Some(idx) = self.dir.find_by_key(key) {
            if self.dir.get(idx).allocated_size < size {
                self.resize_entry(idx, size)?;
            }
            return Ok(idx);
        }
        let idx = self.dir.push(Entry::new(key.to_vec(), 0, 0, 0));
        self.headers_byte_count += HEADER_ENTRY_LEN + key.len() as u64;
        let mut ctx = self.alloc_ctx();
        allocator::allocate(&mut ctx, idx, size);
        Ok(idx)
    }

    fn add_stream_internal(&mut self, key: &[u8], size_guess: u64, mtime: u32) -> Result<OutStream> {
        let stream_size = allocator::padded(size_guess, self.precise);
        let idx = self.get_or_allocate_entry(key, stream_size)?;
        {
            let e = self.dir.get_mut(idx);
            if e.is_open {
                return Err(Error::StreamOpen(String::from_utf8_lossy(key).into_owned()));
            }
            e.is_open = true;
            e.size = 0;
            e.mtime = mtime;
            e.touched = true;
        }
        Ok(OutStream {
            key: key.to_vec(),
        })
    }

    pub fn add_stream(&mut self, key: &[u8], size_guess: u64) -> Result<OutStream> {
        let mtime = now_unix();
        self.add_stream_internal(key, size_guess, mtime)
    }

    pub fn add_stream_precise(&mut self, key: &[u8], size: u64, mtime: u32) -> Result<OutStream> {
        self.add_stream_internal(key, size, mtime)
    }

    pub fn stream_write(&mut self, stream: &OutStream, data: &[u8]) -> Result<()> {
        let idx = self
            .dir
            .find_by_key(&stream.key)
            .ok_or_else(|| Error::NotFound(String::from_utf8_lossy(&stream.key).into_owned()))?;
        let pos = self.dir.get(idx).size;
        let end = pos + data.len() as u64;
        if end > self.dir.get(idx).allocated_size {
            let new_size = allocator::padded(end, false);
            self.resize_entry(idx, new_size)?;
        }
        let offset = self.dir.get(idx).offset;
        self.file
            .seek(SeekFrom::Start(offset + pos))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        self.file
            .write_all(data)
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        self.dir.get_mut(idx).size = pos + data.len() as u64;
        Ok(())
    }

    pub fn stream_close(&mut self, stream: OutStream) -> Result<()> {
        if let Some(idx) = self.dir.find_by_key(&stream.key) {
            self.dir.get_mut(idx).is_open = false;
        }
        Ok(())
    }

    pub fn add_file(&mut self, key: &[u8], path: impl AsRef<Path>) -> Result<()> {
        let mut src = File::open(path.as_ref()).map_err(|e| Error::FileAccess(e.to_string()))?;
        let size = src
            .metadata()
            .map_err(|e| Error::FileAccess(e.to_string()))?
            .len();
        let stream = self.add_stream(key, size)?;
        let mut buf = vec![0u8; 16384];
        loop {
            let n = src.read(&mut buf).map_err(|e| Error::FileAccess(e.to_string()))?;
            if n == 0 {
                break;
            }
            self.stream_write(&stream, &buf[..n])?;
        }
        self.stream_close(stream)?;
        Ok(())
    }

    pub fn touch(&mut self, index: usize) {
        self.dir.get_mut(index).touched = true;
    }

    /// Packs and composes `sources` into a texture, then writes the result
    /// as the entry keyed by `key`. Returns the descriptor so callers can
    /// record it for a later incremental-rebuild dirty check.
    pub fn add_texture(
        &mut self,
        key: &[u8],
        sources: &[SourceImage],
        max_width: u32,
        max_height: u32,
        pow2: bool,
        allow_r90: bool,
    ) -> Result<TextureDescriptor> {
        let (payload, descriptor) = texture::compose(sources, max_width, max_height, pow2, allow_r90)?;
        let stream = self.add_stream(key, payload.len() as u64)?;
        self.stream_write(&stream, &payload)?;
        self.stream_close(stream)?;
        Ok(descriptor)
    }

    /// Reads and decodes the texture entry at `index`, returning its
    /// descriptor and the full entry payload (the descriptor's
    /// `pixel_data_offset`/`pixel_data_size` index into it).
    pub fn open_texture(&mut self, index: usize) -> Result<(TextureDescriptor, Vec<u8>)> {
        let payload = self.file_read(index)?;
        let descriptor = texture::decode(&payload)?;
        Ok((descriptor, payload))
    }

    pub fn texture_touch(&mut self, index: usize) {
        self.touch(index);
    }

    fn delete_index(&mut self, index: usize) -> Result<()> {
        if self.dir.get(index).is_open {
            return Err(Error::StreamOpen(
                String::from_utf8_lossy(&self.dir.get(index).key).into_owned(),
            ));
        }
        let allocated_size = self.dir.get(index).allocated_size;
        let offset = self.dir.get(index).offset;
        let key_len = self.dir.get(index).key.len() as u64;
        self.headers_byte_count -= HEADER_ENTRY_LEN + key_len;

        let prev = self.dir.prev_of(offset);
        let next = self.dir.next_of(offset);

        self.dir.swap_remove(index);

        if let Some(prev_idx) = reindex_after_remove(prev, index, self.dir.len()) {
            self.dir.get_mut(prev_idx).allocated_size += allocated_size;
        } else if let Some(next_idx) = reindex_after_remove(next, index, self.dir.len()) {
            self.first_file_offset = self.dir.get(next_idx).offset;
        } else if self.dir.is_empty() {
            self.first_header_offset = MAIN_HEADER_LEN;
            self.first_file_offset = self.first_header_offset + default_headers_size();
        }
        self.dir.recompute_endpoints();
        Ok(())
    }

    pub fn delete_file(&mut self, key: &[u8]) -> Result<()> {
        let idx = self
            .dir
            .find_by_key(key)
            .ok_or_else(|| Error::NotFound(String::from_utf8_lossy(key).into_owned()))?;
        self.delete_index(idx)
    }

    /// Repeatedly removes one untouched entry until none remain.
    pub fn delete_untouched(&mut self) -> Result<()> {
        loop {
            match self.dir.first_untouched() {
                Some(idx) => self.delete_index(idx)?,
                None => return Ok(()),
            }
        }
    }

    pub fn clear_touched(&mut self) {
        self.dir.clear_touched();
    }
}

/// `swap_remove` moves the directory's true last slot into the hole at
/// `removed_index`. A cached index that pointed at that last slot now lives
/// at `removed_index`; any other index below the new length is unaffected;
/// an index that pointed at `removed_index` itself no longer refers to
/// anything (the entry was deleted).
fn reindex_after_remove(idx: Option<usize>, removed_index: usize, new_len: usize) -> Option<usize> {
    let idx = idx?;
    if idx == removed_index {
        return None;
    }
    if idx == new_len {
        return Some(removed_index);
    }
    Some(idx)
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file
            .read(&mut buf[total..])
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn now_unix() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "rucksack-bundle-test-{}-{}-{}",
            std::process::id(),
            name,
            now_unix()
        ));
        p
    }

    #[test]
    fn open_close_empty_then_reopen() {
        let path = temp_path("empty");
        let b = Bundle::open(&path).unwrap();
        assert_eq!(b.file_count(), 0);
        b.close().unwrap();

        let b2 = Bundle::open_read(&path).unwrap();
        assert_eq!(b2.file_count(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn add_file_round_trips_payload() {
        let path = temp_path("roundtrip");
        let src_path = temp_path("roundtrip-src");
        std::fs::write(&src_path, b"aoeu\n1234\n").unwrap();

        let mut b = Bundle::open(&path).unwrap();
        b.add_file(b"blah", &src_path).unwrap();
        b.close().unwrap();

        let mut b2 = Bundle::open_read(&path).unwrap();
        let idx = b2.find(b"blah").unwrap();
        let data = b2.file_read(idx).unwrap();
        assert_eq!(data, b"aoeu\n1234\n");

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&src_path);
    }

    #[test]
    fn delete_untouched_sweeps_stale_entries() {
        let path = temp_path("sweep");
        let mut b = Bundle::open(&path).unwrap();
        for key in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()] {
            let stream = b.add_stream(key, 10).unwrap();
            b.stream_write(&stream, b"0123456789").unwrap();
            b.stream_close(stream).unwrap();
        }
        b.close().unwrap();

        let mut b2 = Bundle::open(&path).unwrap();
        b2.clear_touched();
        let idx_a = b2.find(b"a").unwrap();
        b2.touch(idx_a);
        let idx_c = b2.find(b"c").unwrap();
        b2.touch(idx_c);
        b2.delete_untouched().unwrap();
        assert_eq!(b2.file_count(), 2);
        assert!(b2.find(b"a").is_some());
        assert!(b2.find(b"b").is_none());
        assert!(b2.find(b"c").is_some());
        b2.close().unwrap();

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn delete_with_open_stream_fails() {
        let path = temp_path("stream-open");
        let mut b = Bundle::open(&path).unwrap();
        let stream = b.add_stream(b"busy", 4).unwrap();
        b.stream_write(&stream, b"data").unwrap();
        let err = b.delete_file(b"busy").unwrap_err();
        assert_eq!(err.err_str(), "stream-open");
        b.stream_close(stream).unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
