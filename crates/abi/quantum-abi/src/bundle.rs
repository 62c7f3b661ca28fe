//! INIT.BND on-disk layout.
//!
//! The init bundle is a flat container of named byte blobs. The bootloader
//! loads it to physical memory; the kernel maps it read-only and spawns user
//! tasks from entries of type [`entry_type::TASK`].

/// Magic bytes at the start of a bundle.
pub const MAGIC: [u8; 8] = *b"INITBND\0";

/// Current bundle format version.
pub const VERSION: u16 = 1;

/// Length of the NUL-padded entry name field.
pub const NAME_BYTES: usize = 32;

/// Entry types.
pub mod entry_type {
    /// A spawnable user task image.
    pub const TASK: u8 = 0;
    /// Opaque data/resource blob.
    pub const DATA: u8 = 1;
}

/// Bundle header, 24 bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version.
    pub version: u16,
    /// Number of entries in the table.
    pub entry_count: u16,
    /// Offset of the entry table from the bundle start.
    pub table_offset: u32,
}

impl Header {
    /// Byte length of the header on disk.
    pub const DISK_BYTES: usize = 24;

    /// Parses and validates a header from the start of `bytes`.
    ///
    /// Rejects a missing magic, an unknown version, and a table that does
    /// not fit inside `bytes`.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::DISK_BYTES || bytes[0..8] != MAGIC {
            return None;
        }
        let version = u16::from_le_bytes(bytes[8..10].try_into().ok()?);
        if version != VERSION {
            return None;
        }
        let entry_count = u16::from_le_bytes(bytes[10..12].try_into().ok()?);
        let table_offset = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        let table_end = (table_offset as usize)
            .checked_add(entry_count as usize * Entry::DISK_BYTES)?;
        if table_end > bytes.len() {
            return None;
        }
        Some(Self {
            version,
            entry_count,
            table_offset,
        })
    }

    /// Encodes the header into its disk layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::DISK_BYTES] {
        let mut out = [0u8; Self::DISK_BYTES];
        out[0..8].copy_from_slice(&MAGIC);
        out[8..10].copy_from_slice(&self.version.to_le_bytes());
        out[10..12].copy_from_slice(&self.entry_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.table_offset.to_le_bytes());
        out
    }
}

/// Bundle table entry, 48 bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// NUL-padded entry name.
    pub name: [u8; NAME_BYTES],
    /// Entry type (see [`entry_type`]).
    pub entry_type: u8,
    /// Entry flags (reserved).
    pub flags: u8,
    /// Offset of the entry bytes from the bundle start.
    pub offset: u32,
    /// Length of the entry bytes.
    pub size: u32,
    /// CRC-32 of the entry bytes.
    pub checksum: u32,
}

impl Entry {
    /// Byte length of one table entry on disk.
    pub const DISK_BYTES: usize = 48;

    /// Parses an entry from the start of `bytes`.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::DISK_BYTES {
            return None;
        }
        let mut name = [0u8; NAME_BYTES];
        name.copy_from_slice(&bytes[0..NAME_BYTES]);
        Some(Self {
            name,
            entry_type: bytes[32],
            flags: bytes[33],
            offset: u32::from_le_bytes(bytes[36..40].try_into().ok()?),
            size: u32::from_le_bytes(bytes[40..44].try_into().ok()?),
            checksum: u32::from_le_bytes(bytes[44..48].try_into().ok()?),
        })
    }

    /// Encodes the entry into its disk layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::DISK_BYTES] {
        let mut out = [0u8; Self::DISK_BYTES];
        out[0..NAME_BYTES].copy_from_slice(&self.name);
        out[32] = self.entry_type;
        out[33] = self.flags;
        out[36..40].copy_from_slice(&self.offset.to_le_bytes());
        out[40..44].copy_from_slice(&self.size.to_le_bytes());
        out[44..48].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// The entry name up to its first NUL byte.
    #[must_use]
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_BYTES);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// True when `name` matches the NUL-padded entry name exactly.
    #[must_use]
    pub fn name_matches(&self, name: &str) -> bool {
        self.name_str() == name
    }
}

/// Builds a NUL-padded name field; truncates to [`NAME_BYTES`] - 1.
#[must_use]
pub fn make_name(name: &str) -> [u8; NAME_BYTES] {
    let mut out = [0u8; NAME_BYTES];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_BYTES - 1);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            version: VERSION,
            entry_count: 0,
            table_offset: Header::DISK_BYTES as u32,
        };
        let bytes = header.to_bytes();
        assert_eq!(Header::parse(&bytes), Some(header));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = Header {
            version: VERSION,
            entry_count: 0,
            table_offset: Header::DISK_BYTES as u32,
        }
        .to_bytes();
        bytes[0] = b'X';
        assert_eq!(Header::parse(&bytes), None);
    }

    #[test]
    fn truncated_table_rejected() {
        // Claims one entry but provides no table bytes.
        let header = Header {
            version: VERSION,
            entry_count: 1,
            table_offset: Header::DISK_BYTES as u32,
        };
        assert_eq!(Header::parse(&header.to_bytes()), None);
    }

    #[test]
    fn entry_round_trips() {
        let entry = Entry {
            name: make_name("coordinator"),
            entry_type: entry_type::TASK,
            flags: 0,
            offset: 4096,
            size: 8192,
            checksum: 0xDEAD_BEEF,
        };
        let parsed = Entry::parse(&entry.to_bytes()).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.name_matches("coordinator"));
        assert!(!parsed.name_matches("coordinato"));
    }

    #[test]
    fn long_names_truncate() {
        let name = make_name(&"x".repeat(64));
        assert_eq!(name[NAME_BYTES - 1], 0);
    }
}
