// src/stream.rs
//! Out stream (C5): an append-only write cursor bound to one entry.
//!
//! Rather than holding a back-reference into the bundle (which would tie
//! this handle's lifetime to a single array slot that can move when other
//! entries are deleted), the stream only remembers its entry's key and
//! re-resolves it against the bundle on every write. All actual I/O lives on
//! `Bundle` (`add_stream`/`stream_write`/`stream_close` in `bundle.rs`).

#[derive(Debug)]
pub struct OutStream {
    pub(crate) key: Vec<u8>,
}

impl OutStream {
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}
