//! Sync file frontend for MP4 atom surgery.
//!
//! [`Mp4File`] wraps an already opened read+write file handle and provides
//! the primitives the higher layers are built from: sibling-level atom
//! seeking, positioned header writes, and in-place growth. The wrapped
//! handle's cursor is the only persistent state; every operation documents
//! where it leaves it.
//!
//! This is not meant to be the most performant way of modifying MP4s. It
//! strikes a middle ground under the assumption that the underlying file
//! operations are cheap and the file is not huge.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{AtomHeader, Error, FourCc, Result};

/// Chunk size for the allocator's tail move.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// An atom discovered during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atom {
    pub tag: FourCc,
    /// Absolute offset of the atom's header.
    pub offset: u64,
    /// Declared size, header included.
    pub size: u32,
}

impl Atom {
    /// Absolute offset of the first payload byte.
    #[inline(always)]
    pub fn payload_offset(&self) -> u64 {
        self.offset + AtomHeader::SIZE as u64
    }

    /// Absolute offset one past the atom's last byte.
    #[inline(always)]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// A read+write MP4/M4A file.
///
/// Atoms are never materialized into a tree; they are discovered
/// transiently during forward scans over the handle.
#[derive(Debug)]
pub struct Mp4File {
    file: std::fs::File,
}

impl Mp4File {
    /// Wrap an already opened handle. The handle must be readable and
    /// writable; the cursor is taken as-is.
    pub fn new(file: std::fs::File) -> Mp4File {
        Mp4File { file }
    }

    /// Open the file at `path` for in-place editing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Mp4File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        Ok(Mp4File { file })
    }

    pub fn into_inner(self) -> std::fs::File {
        self.file
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncate or extend the file to `len` bytes. The cursor is not moved.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Read the atom header at the cursor, leaving the cursor just past it.
    ///
    /// Returns `Ok(None)` when the cursor sits exactly at the end of the
    /// file — the container is exhausted, a normal outcome. A partial
    /// header (1 to 7 bytes left) is `Error::TruncatedHeader`, and a header
    /// declaring a size below 8 is `Error::MalformedBox`, as such a size
    /// would make any scan loop forever or seek backwards.
    pub fn read_atom_header(&mut self) -> Result<Option<AtomHeader>> {
        let mut buf = [0u8; AtomHeader::SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        let header = AtomHeader::decode(&buf[..filled])?;
        if (header.size as usize) < AtomHeader::SIZE {
            return Err(Error::MalformedBox {
                tag: header.tag,
                size: header.size,
            });
        }
        Ok(Some(header))
    }

    /// Seek for `tag` among the sibling atoms starting at the cursor.
    ///
    /// Scans the current nesting level only: non-matching atoms are skipped
    /// over wholesale, never recursed into. On a match the cursor is left
    /// at the atom's payload start; running out of atoms returns
    /// `Ok(None)` with the cursor at the end of the container.
    pub fn seek_atom(&mut self, tag: FourCc) -> Result<Option<Atom>> {
        loop {
            let offset = self.file.stream_position()?;
            let header = match self.read_atom_header()? {
                Some(header) => header,
                None => {
                    tracing::debug!(tag = %tag, "container exhausted, atom not found");
                    return Ok(None);
                }
            };

            if header.tag == tag {
                tracing::debug!(
                    tag = %tag,
                    offset = format_args!("{:#x}", offset),
                    size = header.size,
                    "found atom"
                );
                return Ok(Some(Atom {
                    tag,
                    offset,
                    size: header.size,
                }));
            }

            // Skip the non-matching atom's payload to reach the next sibling.
            self.file
                .seek(SeekFrom::Current(i64::from(header.size) - AtomHeader::SIZE as i64))?;
        }
    }

    /// Write `header` at the cursor, leaving the cursor just past it.
    pub fn write_atom_header(&mut self, header: AtomHeader) -> Result<()> {
        self.file.write_all(&header.encode())?;
        Ok(())
    }

    /// Write `header` at an absolute offset, preserving the cursor.
    pub fn write_atom_header_at(&mut self, header: AtomHeader, offset: u64) -> Result<()> {
        self.write_at(&header.encode(), offset)
    }

    /// Write `buf` at an absolute offset, preserving the cursor.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let pos = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Insert `size` uninitialized bytes at `offset`, shifting everything
    /// from `offset` onwards towards the end of the file.
    ///
    /// Bytes before `offset` are untouched; the bytes previously at
    /// `[offset, len)` end up at `[offset + size, len + size)`; the opened
    /// gap holds unspecified filler the caller must overwrite. A cursor at
    /// or after `offset` is advanced by `size` so it keeps denoting the
    /// same logical byte; a cursor before `offset` is left alone.
    ///
    /// The tail is moved in bounded chunks walking backwards from the end
    /// of the region, so every chunk is fully read before any write could
    /// alias it even though source and destination ranges overlap.
    ///
    /// This is not atomic: a crash mid-move leaves the file at its grown
    /// length with a corrupted middle region.
    pub fn allocate(&mut self, offset: u64, size: u64) -> Result<()> {
        let cursor = self.file.stream_position()?;
        let old_len = self.len()?;

        if offset > old_len {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("allocate at {:#x} beyond end of file {:#x}", offset, old_len),
            )));
        }

        tracing::debug!(
            offset = format_args!("{:#x}", offset),
            size,
            old_len = format_args!("{:#x}", old_len),
            "allocating gap"
        );

        self.file.set_len(old_len + size)?;

        let mut buf = vec![0u8; COPY_CHUNK_SIZE.min((old_len - offset) as usize)];
        let mut remaining = old_len - offset;
        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            let src = offset + remaining - n as u64;

            self.file.seek(SeekFrom::Start(src))?;
            self.file.read_exact(&mut buf[..n])?;
            self.file.seek(SeekFrom::Start(src + size))?;
            self.file.write_all(&buf[..n])?;

            remaining -= n as u64;
        }

        let cursor = if cursor >= offset { cursor + size } else { cursor };
        self.file.seek(SeekFrom::Start(cursor))?;
        Ok(())
    }
}

impl Read for Mp4File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Mp4File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for Mp4File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(contents: &[u8]) -> Mp4File {
        let mut file = Mp4File::new(tempfile::tempfile().unwrap());
        file.write_all(contents).unwrap();
        file
    }

    fn read_all(file: &mut Mp4File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    /// Three sibling atoms of sizes 12, 16 and 8 (the last has no payload).
    fn siblings() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&AtomHeader::new(12, FourCc(*b"aaaa")).encode());
        buf.extend_from_slice(b"AAAA");
        buf.extend_from_slice(&AtomHeader::new(16, FourCc(*b"bbbb")).encode());
        buf.extend_from_slice(b"BBBBBBBB");
        buf.extend_from_slice(&AtomHeader::new(8, FourCc(*b"cccc")).encode());
        buf
    }

    #[test]
    fn seek_atom_finds_each_sibling() {
        let data = siblings();

        for (tag, offset, size) in [
            (FourCc(*b"aaaa"), 0, 12),
            (FourCc(*b"bbbb"), 12, 16),
            (FourCc(*b"cccc"), 28, 8),
        ] {
            let mut file = scratch(&data);
            file.seek(SeekFrom::Start(0)).unwrap();

            let atom = file.seek_atom(tag).unwrap().unwrap();
            assert_eq!(atom, Atom { tag, offset, size });
            // Cursor sits just past the header, at the payload start.
            assert_eq!(file.stream_position().unwrap(), offset + 8);
        }
    }

    #[test]
    fn seek_atom_absent_is_not_found() {
        let mut file = scratch(&siblings());
        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(file.seek_atom(FourCc(*b"zzzz")).unwrap().is_none());
    }

    #[test]
    fn seek_atom_rejects_undersized_atom() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&AtomHeader::new(12, FourCc(*b"aaaa")).encode());
        buf.extend_from_slice(b"AAAA");
        // Size 7 cannot even cover its own header.
        buf.extend_from_slice(b"\x00\x00\x00\x07bad!");

        let mut file = scratch(&buf);
        file.seek(SeekFrom::Start(0)).unwrap();
        match file.seek_atom(FourCc(*b"zzzz")) {
            Err(Error::MalformedBox { tag, size }) => {
                assert_eq!(tag, FourCc(*b"bad!"));
                assert_eq!(size, 7);
            }
            other => panic!("expected MalformedBox, got {:?}", other),
        }
    }

    #[test]
    fn seek_atom_partial_trailing_header_is_truncated() {
        let mut buf = siblings();
        buf.extend_from_slice(b"\x00\x00\x00");

        let mut file = scratch(&buf);
        file.seek(SeekFrom::Start(0)).unwrap();
        match file.seek_atom(FourCc(*b"zzzz")) {
            Err(Error::TruncatedHeader { available }) => assert_eq!(available, 3),
            other => panic!("expected TruncatedHeader, got {:?}", other),
        }
    }

    #[test]
    fn allocate_opens_gap_and_keeps_cursor() {
        let mut file = scratch(b"HelloWorld");

        // Allocate a gap between "Hello" and "World". The cursor was at 10
        // (after the write above), which is past the gap, so it moves to 12.
        file.allocate(5, 2).unwrap();
        assert_eq!(file.stream_position().unwrap(), 12);

        file.write_at(b", ", 5).unwrap();
        assert_eq!(read_all(&mut file), b"Hello, World");
    }

    #[test]
    fn allocate_cursor_before_gap_is_unchanged() {
        let mut file = scratch(b"HelloWorld");
        file.seek(SeekFrom::Start(3)).unwrap();

        file.allocate(5, 2).unwrap();
        assert_eq!(file.stream_position().unwrap(), 3);
    }

    #[test]
    fn allocate_isolation_across_chunks() {
        // Large enough that the tail move spans multiple chunks, with a
        // shift far smaller than the moved region so src and dst overlap.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let mut file = scratch(&data);

        let offset = 1_000;
        let size = 123;
        file.allocate(offset as u64, size as u64).unwrap();

        let actual = read_all(&mut file);
        assert_eq!(actual.len(), data.len() + size);
        assert_eq!(&actual[..offset], &data[..offset]);
        assert_eq!(&actual[offset + size..], &data[offset..]);
    }

    #[test]
    fn allocate_at_end_of_file_extends() {
        let mut file = scratch(b"abc");
        file.allocate(3, 4).unwrap();
        assert_eq!(file.len().unwrap(), 7);
    }

    #[test]
    fn allocate_beyond_end_is_invalid() {
        let mut file = scratch(b"abc");
        match file.allocate(4, 1) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }
}
