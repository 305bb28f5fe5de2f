//! Sans-IO atom header codec.
//!
//! These types work on byte slices without any I/O traits; all positioning
//! is the caller's concern. An ISO base-media atom header is 8 bytes: a
//! big-endian u32 size (which includes the header itself) followed by a raw
//! 4-byte tag. Tags are not necessarily printable ASCII — the iTunes
//! metadata tags start with `0xA9` (`©`).

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::{Error, Result};

/// A 4-byte atom identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MOOV: FourCc = FourCc(*b"moov");
    pub const UDTA: FourCc = FourCc(*b"udta");
    pub const META: FourCc = FourCc(*b"meta");
    pub const ILST: FourCc = FourCc(*b"ilst");
    pub const DATA: FourCc = FourCc(*b"data");
    pub const TRAK: FourCc = FourCc(*b"trak");
    pub const TREF: FourCc = FourCc(*b"tref");
    pub const CHAP: FourCc = FourCc(*b"chap");
    pub const MDAT: FourCc = FourCc(*b"mdat");

    pub const TITLE: FourCc = FourCc(*b"\xa9nam");
    pub const ARTIST: FourCc = FourCc(*b"\xa9ART");
    pub const ALBUM: FourCc = FourCc(*b"\xa9alb");
    pub const DESCRIPTION: FourCc = FourCc(*b"desc");
    pub const COPYRIGHT: FourCc = FourCc(*b"\xa9cpy");
    pub const RELEASED: FourCc = FourCc(*b"\xa9day");

    #[inline(always)]
    pub const fn new(bytes: [u8; 4]) -> FourCc {
        FourCc(bytes)
    }

    #[inline(always)]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<&[u8; 4]> for FourCc {
    fn from(bytes: &[u8; 4]) -> FourCc {
        FourCc(*bytes)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// The decoded form of an 8-byte atom header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    /// Total size of the atom, header included.
    pub size: u32,
    pub tag: FourCc,
}

impl AtomHeader {
    pub const SIZE: usize = 8;

    #[inline(always)]
    pub const fn new(size: u32, tag: FourCc) -> AtomHeader {
        AtomHeader { size, tag }
    }

    /// Decode a header from the start of `data`.
    ///
    /// No validation is done on the declared size here; deciding whether a
    /// size is plausible needs the surrounding container, which is the
    /// caller's job.
    pub fn decode(data: &[u8]) -> Result<AtomHeader> {
        if data.len() < Self::SIZE {
            return Err(Error::TruncatedHeader {
                available: data.len(),
            });
        }

        let size = BigEndian::read_u32(&data[0..4]);
        let tag = FourCc([data[4], data[5], data[6], data[7]]);
        Ok(AtomHeader { size, tag })
    }

    /// Encode the header into its 8-byte wire form.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.size);
        buf[4..8].copy_from_slice(&self.tag.0);
        buf
    }
}
