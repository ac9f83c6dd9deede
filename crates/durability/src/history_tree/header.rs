//! History file header
//!
//! The first [`HEADER_SIZE`] bytes of a history file describe the tree:
//!
//! ```text
//! magic            u32   0x05FFA900
//! file version     u32
//! provider version u32
//! block size       u32
//! max children     u32
//! node count       u32
//! root sequence    u32
//! tree start       i64
//! tree end         i64
//! crc32            u32   (over every preceding field)
//! zero padding up to HEADER_SIZE
//! ```
//!
//! All fields are big endian.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracestate_core::{Error, Result, Timestamp};

/// Size of the header block
pub const HEADER_SIZE: u64 = 4096;

/// File magic number
pub const HISTORY_FILE_MAGIC: u32 = 0x05FF_A900;

/// Current file format version
pub const FILE_VERSION: u32 = 8;

/// Bytes used by the header fields including the checksum
const HEADER_FIELDS_SIZE: usize = 4 * 7 + 8 * 2 + 4;

/// Decoded history file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Version of the state provider that built the file
    pub provider_version: u32,
    /// Size of one node block in bytes
    pub block_size: u32,
    /// Maximum number of children of a core node
    pub max_children: u32,
    /// Number of node blocks following the header
    pub node_count: u32,
    /// Sequence number of the root node
    pub root_seq: u32,
    /// Earliest time covered by the tree
    pub start: Timestamp,
    /// Latest time covered by the tree
    pub end: Timestamp,
}

impl FileHeader {
    /// Encode into a full `HEADER_SIZE` block
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        // Writing into a Vec cannot fail
        let _ = self.write_fields(&mut buf);
        let crc = crc32fast::hash(&buf);
        let _ = buf.write_u32::<BigEndian>(crc);
        buf.resize(HEADER_SIZE as usize, 0);
        buf
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<BigEndian>(HISTORY_FILE_MAGIC)?;
        buf.write_u32::<BigEndian>(FILE_VERSION)?;
        buf.write_u32::<BigEndian>(self.provider_version)?;
        buf.write_u32::<BigEndian>(self.block_size)?;
        buf.write_u32::<BigEndian>(self.max_children)?;
        buf.write_u32::<BigEndian>(self.node_count)?;
        buf.write_u32::<BigEndian>(self.root_seq)?;
        buf.write_i64::<BigEndian>(self.start)?;
        buf.write_i64::<BigEndian>(self.end)?;
        Ok(())
    }

    /// Write the header block
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    /// Read and validate a header block
    ///
    /// # Errors
    ///
    /// `Corruption` on a bad magic, file version or checksum.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fields = [0u8; HEADER_FIELDS_SIZE];
        reader.read_exact(&mut fields)?;

        let body = &fields[..HEADER_FIELDS_SIZE - 4];
        let mut cursor = body;
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != HISTORY_FILE_MAGIC {
            return Err(Error::Corruption(format!(
                "not a history file (magic {:#010x})",
                magic
            )));
        }
        let version = cursor.read_u32::<BigEndian>()?;
        if version != FILE_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported history file version {} (expected {})",
                version, FILE_VERSION
            )));
        }
        let header = FileHeader {
            provider_version: cursor.read_u32::<BigEndian>()?,
            block_size: cursor.read_u32::<BigEndian>()?,
            max_children: cursor.read_u32::<BigEndian>()?,
            node_count: cursor.read_u32::<BigEndian>()?,
            root_seq: cursor.read_u32::<BigEndian>()?,
            start: cursor.read_i64::<BigEndian>()?,
            end: cursor.read_i64::<BigEndian>()?,
        };

        let mut crc_bytes = &fields[HEADER_FIELDS_SIZE - 4..];
        let stored_crc = crc_bytes.read_u32::<BigEndian>()?;
        if crc32fast::hash(body) != stored_crc {
            return Err(Error::Corruption("history file header checksum mismatch".to_string()));
        }
        Ok(header)
    }
}
