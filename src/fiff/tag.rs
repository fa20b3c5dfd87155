//! Tag I/O.
//!
//! A tag is the smallest structural unit of a container file.
//! On-disk layout (always big-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  kind : i32  │  type : u32  │  size : i32  │  next : i32 │  ← 16 bytes
//! ├──────────────────────────────────────────────────────────┤
//! │  <size bytes of payload data>                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! `next == 0` means the next tag follows immediately (pos + 16 + size).
//! `next  > 0` means seek to byte offset `next`.
//! `next == -1` means there is no next tag (end of file).
use std::io::{Read, Seek, SeekFrom};

use anyhow::{bail, Context, Result};

use super::constants::*;

// ── Tag header ────────────────────────────────────────────────────────────

/// Lightweight tag header — no payload loaded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub kind: i32,
    pub ftype: u32, // "type" is a Rust keyword
    pub size: i32,
    pub next: i32,
    /// Byte offset of the header in the file.
    pub pos: u64,
}

impl TagHeader {
    /// Byte position of the first payload byte.
    #[inline]
    pub fn data_pos(&self) -> u64 {
        self.pos + TAG_HEADER_BYTES
    }

    /// Position of the NEXT tag header (or `None` if this is the last tag).
    pub fn next_pos(&self) -> Option<u64> {
        if self.next == FIFFV_NEXT_SEQ {
            Some(self.pos + TAG_HEADER_BYTES + self.size as u64)
        } else if self.next > 0 {
            Some(self.next as u64)
        } else {
            None // FIFFV_NEXT_NONE (-1) or any other negative
        }
    }
}

/// Read only the 16-byte tag header at the given file position.
pub fn read_tag_header<R: Read + Seek>(reader: &mut R, pos: u64) -> Result<TagHeader> {
    reader
        .seek(SeekFrom::Start(pos))
        .with_context(|| format!("seek to tag header @ {pos:#x}"))?;
    let mut buf = [0u8; 16];
    reader
        .read_exact(&mut buf)
        .with_context(|| format!("read tag header @ {pos:#x}"))?;
    Ok(TagHeader {
        kind: i32::from_be_bytes(buf[0..4].try_into().unwrap()),
        ftype: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        size: i32::from_be_bytes(buf[8..12].try_into().unwrap()),
        next: i32::from_be_bytes(buf[12..16].try_into().unwrap()),
        pos,
    })
}

// ── Payload readers ───────────────────────────────────────────────────────

/// Read a single big-endian i32 payload.
pub fn read_i32<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<i32> {
    seek_data(reader, tag)?;
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Read a single big-endian f64 payload.
pub fn read_f64<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<f64> {
    seek_data(reader, tag)?;
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

/// Read a UTF-8 string payload.
pub fn read_string<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<String> {
    seek_data(reader, tag)?;
    let n = tag.size.max(0) as usize;
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).context("tag payload is not valid UTF-8")
}

/// Read a big-endian i32 array (one or more ints).
pub fn read_i32_array<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<i32>> {
    seek_data(reader, tag)?;
    let n = tag.size.max(0) as usize / 4;
    let mut out = vec![0i32; n];
    let mut buf = [0u8; 4];
    for v in &mut out {
        reader.read_exact(&mut buf)?;
        *v = i32::from_be_bytes(buf);
    }
    Ok(out)
}

/// Read a big-endian f64 array.
pub fn read_f64_array<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<f64>> {
    seek_data(reader, tag)?;
    let n = tag.size.max(0) as usize / 8;
    let mut out = vec![0f64; n];
    let mut buf = [0u8; 8];
    for v in &mut out {
        reader.read_exact(&mut buf)?;
        *v = f64::from_be_bytes(buf);
    }
    Ok(out)
}

/// Read the entire payload as raw bytes (used for ch_info struct parsing).
pub fn read_raw_bytes<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<Vec<u8>> {
    seek_data(reader, tag)?;
    let n = tag.size.max(0) as usize;
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

// ── Payload writers ───────────────────────────────────────────────────────
//
// Chunks are serialized into an in-memory buffer before anything touches the
// filesystem, so the writers append to a `Vec<u8>`. Every tag is written
// with `next == FIFFV_NEXT_SEQ` except the terminator.

fn put_tag(buf: &mut Vec<u8>, kind: i32, ftype: u32, payload: &[u8], next: i32) {
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&ftype.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(&next.to_be_bytes());
    buf.extend_from_slice(payload);
}

pub fn put_i32(buf: &mut Vec<u8>, kind: i32, v: i32) {
    put_tag(buf, kind, FIFFT_INT, &v.to_be_bytes(), FIFFV_NEXT_SEQ);
}

pub fn put_f64(buf: &mut Vec<u8>, kind: i32, v: f64) {
    put_tag(buf, kind, FIFFT_DOUBLE, &v.to_be_bytes(), FIFFV_NEXT_SEQ);
}

pub fn put_string(buf: &mut Vec<u8>, kind: i32, s: &str) {
    put_tag(buf, kind, FIFFT_STRING, s.as_bytes(), FIFFV_NEXT_SEQ);
}

pub fn put_i32_array(buf: &mut Vec<u8>, kind: i32, values: &[i32]) {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    put_tag(buf, kind, FIFFT_INT, &payload, FIFFV_NEXT_SEQ);
}

pub fn put_f64_array(buf: &mut Vec<u8>, kind: i32, values: &[f64]) {
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    put_tag(buf, kind, FIFFT_DOUBLE, &payload, FIFFV_NEXT_SEQ);
}

pub fn put_raw(buf: &mut Vec<u8>, kind: i32, ftype: u32, payload: &[u8]) {
    put_tag(buf, kind, ftype, payload, FIFFV_NEXT_SEQ);
}

/// Open a block: a `FIFF_BLOCK_START` tag whose payload is the block kind.
pub fn start_block(buf: &mut Vec<u8>, kind: i32) {
    put_i32(buf, FIFF_BLOCK_START, kind);
}

pub fn end_block(buf: &mut Vec<u8>, kind: i32) {
    put_i32(buf, FIFF_BLOCK_END, kind);
}

/// File prologue: the file-id struct plus a null directory pointer.
pub fn start_file(buf: &mut Vec<u8>) {
    // 20-byte id struct: format version + reserved machine/time words.
    let mut id = [0u8; 20];
    id[0..4].copy_from_slice(&0x0001_0003_i32.to_be_bytes());
    put_tag(buf, FIFF_FILE_ID, FIFFT_ID_STRUCT, &id, FIFFV_NEXT_SEQ);
    put_i32(buf, FIFF_DIR_POINTER, -1);
}

/// File terminator: a void tag whose `next` is the end sentinel.
pub fn end_file(buf: &mut Vec<u8>) {
    put_tag(buf, FIFF_NOP, FIFFT_VOID, &[], FIFFV_NEXT_NONE);
}

// ── Helpers ───────────────────────────────────────────────────────────────

#[inline]
fn seek_data<R: Read + Seek>(reader: &mut R, tag: &TagHeader) -> Result<()> {
    reader
        .seek(SeekFrom::Start(tag.data_pos()))
        .with_context(|| format!("seek to tag data @ {:#x}", tag.data_pos()))?;
    Ok(())
}

/// Header-level sanity check used by the reader entry point.
pub fn expect_kind(tag: &TagHeader, kind: i32, what: &str) -> Result<()> {
    if tag.kind != kind {
        bail!("expected {what} tag (kind {kind}), got kind {}", tag.kind);
    }
    Ok(())
}
