//! Experimental chapter track references.
//!
//! **This module is incomplete scaffolding.** [`ChapterIndex::write_to`]
//! attaches a `tref/chap` atom referencing track index 2 and appends the
//! encoded chapter names as a trailing `mdat`-labelled region, but it does
//! not create the second track it references — players will ignore the
//! reference until a real chapter track exists. It is kept separate from
//! the metadata write contract on purpose.
//!
//! See: <https://developer.apple.com/standards/qtff-2001.pdf> pp. 143

use std::io::{Seek, SeekFrom, Write};

use crate::{AtomHeader, Error, FourCc, Mp4File, Result};

/// Trailer following each chapter name: an `encd` atom marking the text as
/// UTF-8, preceded by a stray `0x65` byte that real-world files carry.
const ENCD_TRAILER: [u8; 12] = *b"\x00\x00\x00\x0c\x65encd\x00\x00\x01";

/// Size of the `tref` atom written by [`ChapterIndex::write_to`]: its own
/// header, a nested `chap` header and one 4-byte track index.
const TREF_SIZE: u32 = 20;

/// The track index the `chap` reference points at. The referenced track is
/// currently never created.
const CHAPTER_TRACK: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub name: String,
}

impl Chapter {
    /// Encode the chapter as one frame of the chapter-name region: the name
    /// as a length-prefixed string followed by the fixed encoding trailer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(self.name.len()).map_err(|_| Error::OversizedValue {
            len: self.name.len(),
        })?;

        let mut buf = Vec::with_capacity(2 + self.name.len() + ENCD_TRAILER.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&ENCD_TRAILER);
        Ok(buf)
    }
}

/// An ordered sequence of chapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterIndex {
    pub chapters: Vec<Chapter>,
}

impl ChapterIndex {
    /// The concatenation of every chapter's encoding, in sequence order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for chapter in &self.chapters {
            buf.extend_from_slice(&chapter.encode()?);
        }
        Ok(buf)
    }

    /// Attach the chapter reference scaffolding to `file`.
    ///
    /// Inserts a `tref/chap` atom at the end of the first `trak`, patches
    /// the `moov` and `trak` sizes, and appends the encoded chapter names
    /// after `moov` as an `mdat`-labelled region. See the module docs for
    /// what this deliberately does not do yet.
    pub fn write_to(&self, file: &mut Mp4File) -> Result<()> {
        let data = self.encode()?;

        file.seek(SeekFrom::Start(0))?;
        let moov = file
            .seek_atom(FourCc::MOOV)?
            .ok_or(Error::RequiredBoxMissing(FourCc::MOOV))?;
        let trak = file
            .seek_atom(FourCc::TRAK)?
            .ok_or(Error::RequiredBoxMissing(FourCc::TRAK))?;

        // Assume no tref exists yet and create one at the end of the trak.
        let tref_offset = trak.end();
        file.allocate(tref_offset, u64::from(TREF_SIZE))?;

        file.seek(SeekFrom::Start(tref_offset))?;
        file.write_atom_header(AtomHeader::new(TREF_SIZE, FourCc::TREF))?;
        file.write_atom_header(AtomHeader::new(12, FourCc::CHAP))?;
        file.write_all(&CHAPTER_TRACK.to_be_bytes())?;

        let moov_size = moov.size + TREF_SIZE;
        let trak_size = trak.size + TREF_SIZE;
        file.write_atom_header_at(AtomHeader::new(moov_size, FourCc::MOOV), moov.offset)?;
        file.write_atom_header_at(AtomHeader::new(trak_size, FourCc::TRAK), trak.offset)?;

        tracing::debug!(
            tref_offset = format_args!("{:#x}", tref_offset),
            chapters = self.chapters.len(),
            "wrote chapter track reference"
        );

        // House the chapter names in an mdat region straight after moov.
        let mdat_size = u32::try_from(AtomHeader::SIZE + data.len())
            .map_err(|_| Error::OversizedValue { len: data.len() })?;
        let mdat_offset = moov.offset + u64::from(moov_size);
        file.allocate(mdat_offset, u64::from(mdat_size))?;

        file.seek(SeekFrom::Start(mdat_offset))?;
        file.write_atom_header(AtomHeader::new(mdat_size, FourCc::MDAT))?;
        file.write_all(&data)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn golden_chapter_frame() {
        let chapter = Chapter { name: "Foo".into() };
        assert_eq!(
            chapter.encode().unwrap(),
            b"\x00\x03Foo\x00\x00\x00\x0c\x65encd\x00\x00\x01"
        );
    }

    #[test]
    fn index_concatenates_in_order() {
        let index = ChapterIndex {
            chapters: vec![Chapter { name: "Foo".into() }, Chapter { name: "Bar".into() }],
        };
        assert_eq!(
            index.encode().unwrap(),
            b"\x00\x03Foo\x00\x00\x00\x0c\x65encd\x00\x00\x01\
              \x00\x03Bar\x00\x00\x00\x0c\x65encd\x00\x00\x01"
        );
    }

    #[test]
    fn oversized_name_is_rejected() {
        let chapter = Chapter {
            name: "x".repeat(usize::from(u16::MAX) + 1),
        };
        match chapter.encode() {
            Err(Error::OversizedValue { len }) => assert_eq!(len, usize::from(u16::MAX) + 1),
            other => panic!("expected OversizedValue, got {:?}", other),
        }
    }

    #[test]
    fn write_attaches_reference_and_names() {
        // moov containing a single trak with an opaque 16-byte child.
        let mut buf = Vec::new();
        buf.extend_from_slice(&AtomHeader::new(32, FourCc::MOOV).encode());
        buf.extend_from_slice(&AtomHeader::new(24, FourCc::TRAK).encode());
        buf.extend_from_slice(&AtomHeader::new(16, FourCc(*b"free")).encode());
        buf.extend_from_slice(&[0u8; 8]);

        let mut file = Mp4File::new(tempfile::tempfile().unwrap());
        file.write_all(&buf).unwrap();

        let index = ChapterIndex {
            chapters: vec![Chapter { name: "Foo".into() }],
        };
        index.write_to(&mut file).unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let moov = file.seek_atom(FourCc::MOOV).unwrap().unwrap();
        assert_eq!(moov.size, 32 + TREF_SIZE);

        let trak = file.seek_atom(FourCc::TRAK).unwrap().unwrap();
        assert_eq!(trak.size, 24 + TREF_SIZE);

        // The tref sits at the end of the trak, past the existing child.
        let tref = file.seek_atom(FourCc::TREF).unwrap().unwrap();
        assert_eq!(tref.offset, 32);
        assert_eq!(tref.size, TREF_SIZE);

        let chap = file.read_atom_header().unwrap().unwrap();
        assert_eq!(chap, AtomHeader::new(12, FourCc::CHAP));
        let mut track_ref = [0u8; 4];
        file.read_exact(&mut track_ref).unwrap();
        assert_eq!(track_ref, 2u32.to_be_bytes());

        // The chapter names follow moov as an mdat region.
        file.seek(SeekFrom::Start(moov.end())).unwrap();
        let mdat = file.read_atom_header().unwrap().unwrap();
        assert_eq!(mdat.tag, FourCc::MDAT);
        let mut names = vec![0u8; mdat.size as usize - 8];
        file.read_exact(&mut names).unwrap();
        assert_eq!(names, index.encode().unwrap());
        assert_eq!(file.len().unwrap(), moov.end() + u64::from(mdat.size));
    }
}
