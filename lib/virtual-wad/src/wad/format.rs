//! On-disk layout of a WAD file.
//!
//! ```text
//! header (12 bytes, offset 0)
//!   [0..4)   magic        "IWAD" | "PWAD"
//!   [4..8)   num_lumps    u32 LE
//!   [8..12)  table_offset u32 LE
//! directory entry (16 bytes, repeated num_lumps times from table_offset)
//!   [0..4)   position     u32 LE
//!   [4..8)   size         u32 LE
//!   [8..16)  name         NUL-padded, not NUL-terminated if 8 chars long
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::{FsError, Result};

pub const HEADER_LEN: usize = 12;
pub const ENTRY_LEN: usize = 16;
pub const LUMP_NAME_LEN: usize = 8;

pub const IWAD_MAGIC: [u8; 4] = *b"IWAD";
pub const PWAD_MAGIC: [u8; 4] = *b"PWAD";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WadHeader {
    pub magic: [u8; 4],
    pub num_lumps: u32,
    pub table_offset: u32,
}

impl WadHeader {
    pub fn empty_pwad(table_offset: u32) -> Self {
        Self {
            magic: PWAD_MAGIC,
            num_lumps: 0,
            table_offset,
        }
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != IWAD_MAGIC && magic != PWAD_MAGIC {
            return Err(FsError::InvalidMagic(magic));
        }
        Ok(Self {
            magic,
            num_lumps: LittleEndian::read_u32(&buf[4..8]),
            table_offset: LittleEndian::read_u32(&buf[8..12]),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[4..8], self.num_lumps);
        LittleEndian::write_u32(&mut buf[8..12], self.table_offset);
        buf
    }

    pub fn is_iwad(&self) -> bool {
        self.magic == IWAD_MAGIC
    }

    /// Byte offset one past the end of the directory table.
    pub fn table_end(&self) -> u64 {
        u64::from(self.table_offset) + ENTRY_LEN as u64 * u64::from(self.num_lumps)
    }
}

/// An 8-byte lump name, stored upper-cased and NUL-padded.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct LumpName([u8; LUMP_NAME_LEN]);

impl LumpName {
    /// Upper-case `name` and cut it at the first NUL or after 8 bytes.
    pub fn new(name: &str) -> Self {
        let mut raw = [0u8; LUMP_NAME_LEN];
        for (dst, src) in raw
            .iter_mut()
            .zip(name.bytes().take_while(|&b| b != 0))
        {
            *dst = src.to_ascii_uppercase();
        }
        Self(raw)
    }

    /// Take a name as stored on disk, without normalising it.
    pub fn from_raw(raw: [u8; LUMP_NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; LUMP_NAME_LEN] {
        &self.0
    }

    /// The significant bytes of the name (up to the first NUL).
    pub fn trimmed(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(LUMP_NAME_LEN);
        &self.0[..len]
    }

    pub fn eq_ignore_case(&self, name: &str) -> bool {
        let other = LumpName::new(name);
        self.trimmed().eq_ignore_ascii_case(other.trimmed())
    }
}

impl fmt::Display for LumpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for LumpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

/// One row of the directory table as stored on disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub position: u32,
    pub size: u32,
    pub name: LumpName,
}

impl RawEntry {
    pub fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), ENTRY_LEN);
        let mut name = [0u8; LUMP_NAME_LEN];
        name.copy_from_slice(&buf[8..16]);
        Self {
            position: LittleEndian::read_u32(&buf[0..4]),
            size: LittleEndian::read_u32(&buf[4..8]),
            name: LumpName::from_raw(name),
        }
    }

    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), ENTRY_LEN);
        LittleEndian::write_u32(&mut buf[0..4], self.position);
        LittleEndian::write_u32(&mut buf[4..8], self.size);
        buf[8..16].copy_from_slice(self.name.as_bytes());
    }

    pub fn end(&self) -> u64 {
        u64::from(self.position) + u64::from(self.size)
    }
}

/// Serialise a whole directory table.
pub fn encode_table<'a>(entries: impl ExactSizeIterator<Item = &'a RawEntry>) -> Vec<u8> {
    let mut buf = vec![0u8; entries.len() * ENTRY_LEN];
    for (chunk, entry) in buf.chunks_exact_mut(ENTRY_LEN).zip(entries) {
        entry.encode_into(chunk);
    }
    buf
}
