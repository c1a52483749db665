// src/allocator.rs
//! Space allocator (C3): picks a file offset and allocation size for new or
//! resized entries, and relocates payloads when an entry must move.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::entry::EntryDirectory;
use crate::error::{Error, Result};

/// Directory-record header length in bytes, not counting the key.
pub const HEADER_ENTRY_LEN: u64 = 36;

/// `2n + 8192` in loose mode, `n` in precise mode (used by `strip` to emit a
/// minimum-size bundle).
pub fn padded(n: u64, precise: bool) -> u64 {
    if precise {
        n
    } else {
        2 * n + 8192
    }
}

/// Bookkeeping the allocator needs beyond the entry table itself.
pub struct AllocContext<'a> {
    pub dir: &'a mut EntryDirectory,
    pub first_file_offset: &'a mut u64,
    pub first_header_offset: u64,
    pub headers_byte_count: u64,
    pub precise: bool,
}

/// Places `entry_index` (already pushed into the directory with a
/// placeholder offset/size of 0) at a non-overlapping offset of at least
/// `size` allocated bytes, per the three-step placement policy: gap before
/// the first entry, shrink a slack entry, or append at the end.
pub fn allocate(ctx: &mut AllocContext, entry_index: usize, size: u64) {
    ctx.dir.get_mut(entry_index).allocated_size = size;

    let wanted_headers_alloc_bytes = padded(ctx.headers_byte_count, ctx.precise);
    let wanted_headers_alloc_end = if ctx.precise {
        *ctx.first_file_offset
    } else {
        ctx.first_header_offset + wanted_headers_alloc_bytes
    };

    // Step 1: gap before the first entry. `first_index_excluding` answers
    // "who's first among the others" directly, so this is correct whether
    // `entry_index` is a freshly pushed placeholder (offset 0, otherwise
    // always its own cached "first") or an entry being resized whose
    // cached endpoints haven't been recomputed yet.
    if let Some(first_idx) = ctx.dir.first_index_excluding(entry_index) {
        let first_offset = ctx.dir.get(first_idx).offset;
        let extra = first_offset.saturating_sub(wanted_headers_alloc_end);
        let needed = ctx.dir.get(entry_index).allocated_size;
        if extra >= needed {
            let new_offset = first_offset - needed;
            ctx.dir.get_mut(entry_index).offset = new_offset;
            *ctx.first_file_offset = new_offset;
            ctx.dir.recompute_endpoints();
            return;
        }
    }

    // Step 2: shrink a slack entry -- scan every closed entry that isn't the
    // one being placed, with enough spare allocation after its own minimum
    // requirement to host this entry's allocation.
    let needed = ctx.dir.get(entry_index).allocated_size;
    let mut found: Option<(usize, u64, u64, u64)> = None;
    for i in 0..ctx.dir.len() {
        if i == entry_index {
            continue;
        }
        let e = ctx.dir.get(i);
        if e.is_open {
            continue;
        }
        if e.offset < wanted_headers_alloc_end {
            continue;
        }
        let needed_alloc_size = padded(e.size, ctx.precise);
        let extra = e.allocated_size.saturating_sub(needed_alloc_size);
        if extra < needed {
            continue;
        }
        let new_offset = e.offset + needed_alloc_size;
        if new_offset < wanted_headers_alloc_end {
            continue;
        }
        found = Some((i, new_offset, extra, needed_alloc_size));
        break;
    }
    if let Some((donor_idx, new_offset, extra, donor_new_alloc)) = found {
        ctx.dir.get_mut(donor_idx).allocated_size = donor_new_alloc;
        let e = ctx.dir.get_mut(entry_index);
        e.offset = new_offset;
        e.allocated_size = extra;
        ctx.dir.recompute_endpoints();
        return;
    }

    // Step 3: append at the end.
    if let Some(last_idx) = ctx.dir.last_index().filter(|&i| i != entry_index) {
        let last = ctx.dir.get(last_idx);
        let last_end = if !last.is_open {
            let new_alloc = padded(last.size, ctx.precise);
            ctx.dir.get_mut(last_idx).allocated_size = new_alloc;
            ctx.dir.get(last_idx).offset + new_alloc
        } else {
            last.offset + last.allocated_size
        };
        let new_offset = last_end.max(wanted_headers_alloc_end);
        ctx.dir.get_mut(entry_index).offset = new_offset;
        ctx.dir.recompute_endpoints();
        return;
    }

    // This is the very first entry ever allocated in the bundle.
    let key_len = ctx.dir.get(entry_index).key.len() as u64;
    let this_entry_header_len = HEADER_ENTRY_LEN + key_len;
    let min_offset = ctx.first_header_offset
        + if ctx.precise {
            this_entry_header_len
        } else {
            padded(this_entry_header_len * 10, false)
        };
    if *ctx.first_file_offset < min_offset {
        *ctx.first_file_offset = min_offset;
    }
    ctx.dir.get_mut(entry_index).offset = *ctx.first_file_offset;
    ctx.dir.recompute_endpoints();
}

/// Grows or relocates `entry_index` to `size` allocated bytes in place,
/// donating its old reservation to a neighbour before calling `allocate`
/// again, then streaming the live payload bytes to the new offset.
pub fn resize(
    ctx: &mut AllocContext,
    file: &mut std::fs::File,
    entry_index: usize,
    size: u64,
) -> Result<()> {
    let is_last = ctx.dir.last_index() == Some(entry_index);
    if is_last {
        ctx.dir.get_mut(entry_index).allocated_size = size;
        return Ok(());
    }

    let is_first = ctx.dir.first_index() == Some(entry_index);
    if is_first {
        if let Some(next_idx) = ctx.dir.next_of(ctx.dir.get(entry_index).offset) {
            let next_offset = ctx.dir.get(next_idx).offset;
            *ctx.first_file_offset = next_offset;
        }
    } else if let Some(prev_idx) = ctx.dir.prev_of(ctx.dir.get(entry_index).offset) {
        let donated = ctx.dir.get(entry_index).allocated_size;
        ctx.dir.get_mut(prev_idx).allocated_size += donated;
    }

    let old_offset = ctx.dir.get(entry_index).offset;
    let payload_size = ctx.dir.get(entry_index).size;
    allocate(ctx, entry_index, size);
    let new_offset = ctx.dir.get(entry_index).offset;
    copy_data(file, old_offset, new_offset, payload_size)
}

/// Streams `size` bytes from `source` to `dest` through a bounded buffer, so
/// relocating a large entry never requires holding the whole payload in
/// memory at once.
pub fn copy_data(file: &mut std::fs::File, source: u64, dest: u64, size: u64) -> Result<()> {
    if source == dest || size == 0 {
        return Ok(());
    }
    const MAX_BUF_SIZE: u64 = 1024 * 1024;
    let buf_size = MAX_BUF_SIZE.min(size) as usize;
    let mut buffer = vec![0u8; buf_size];

    let mut remaining = size;
    let mut src = source;
    let mut dst = dest;
    while remaining > 0 {
        let amt = (buf_size as u64).min(remaining) as usize;
        file.seek(SeekFrom::Start(src))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        file.read_exact(&mut buffer[..amt])
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        file.seek(SeekFrom::Start(dst))
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        file.write_all(&buffer[..amt])
            .map_err(|e| Error::FileAccess(e.to_string()))?;
        remaining -= amt as u64;
        src += amt as u64;
        dst += amt as u64;
    }
    Ok(())
}
