//! iTunes-style metadata records and the ilst write orchestrator.
//!
//! The metadata fields cover what the common players actually read from
//! podcast files (Kodi's video tagging list, Jellyfin's probe normalizer,
//! Audiobookshelf's audio metadata): title, artist, album, description,
//! copyright and release date.

use std::borrow::Cow;
use std::io::{Seek, SeekFrom};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Atom, AtomHeader, Error, FourCc, Mp4File, Result};

/// The `meta` atom carries a 4-byte version/flags field before its children.
const META_VERSION_FLAGS: i64 = 4;

/// Subheader of a `data` atom: type code 1 (UTF-8 text), locale 0. FFmpeg
/// never seems to set these to anything else.
///
/// See: <https://developer.apple.com/documentation/quicktime-file-format/metadata_item_list_atom>
const DATA_UTF8_SUBHEADER: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Common metadata fields for an MP4/M4A file.
///
/// Empty strings and an unset release date are omitted from the encoded
/// output entirely, never written as empty atoms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub description: String,
    pub copyright: String,
    pub released: Option<DateTime<Utc>>,
}

fn non_empty(value: &str) -> Option<Cow<'_, str>> {
    if value.is_empty() {
        None
    } else {
        Some(Cow::Borrowed(value))
    }
}

impl Metadata {
    /// The fields in their fixed output order, paired with their atom tags.
    /// `None` values are skipped by the encoder.
    fn tagged_values(&self) -> [(FourCc, Option<Cow<'_, str>>); 6] {
        [
            (FourCc::TITLE, non_empty(&self.title)),
            (FourCc::ARTIST, non_empty(&self.artist)),
            (FourCc::ALBUM, non_empty(&self.album)),
            (FourCc::DESCRIPTION, non_empty(&self.description)),
            (FourCc::COPYRIGHT, non_empty(&self.copyright)),
            (
                FourCc::RELEASED,
                self.released
                    .map(|t| Cow::Owned(t.to_rfc3339_opts(SecondsFormat::Secs, true))),
            ),
        ]
    }

    /// Encode the metadata as the full payload of an `ilst` atom.
    ///
    /// Each emitted field is a field atom wrapping a `data` atom wrapping
    /// the UTF-8 value. The result replaces an existing `ilst` payload
    /// wholesale; it is never appended to one.
    pub fn ilst_payload(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        for (tag, value) in self.tagged_values() {
            let value = match value {
                Some(value) => value,
                None => continue,
            };
            let value = value.as_bytes();

            let data_size = (AtomHeader::SIZE + DATA_UTF8_SUBHEADER.len() + value.len()) as u64;
            let field_size = AtomHeader::SIZE as u64 + data_size;
            let field_size = u32::try_from(field_size)
                .map_err(|_| Error::OversizedValue { len: value.len() })?;

            buf.extend_from_slice(&AtomHeader::new(field_size, tag).encode());
            buf.extend_from_slice(&AtomHeader::new(data_size as u32, FourCc::DATA).encode());
            buf.extend_from_slice(&DATA_UTF8_SUBHEADER);
            buf.extend_from_slice(value);
        }

        Ok(buf)
    }

    /// Replace the metadata of `file` in place.
    ///
    /// Walks `moov → udta → meta → ilst` from the start of the file, patches every
    /// ancestor's declared size by the payload's size delta, grows the file
    /// if needed, and overwrites the `ilst` payload. The skeleton must
    /// already exist — a missing atom on the path aborts the whole write
    /// with [`Error::RequiredBoxMissing`], there is no repair fallback.
    ///
    /// `ilst` must be the last content in the file; this is verified up
    /// front and violations fail with [`Error::TrailingData`] rather than
    /// silently corrupting whatever follows. Raw audio data (`mdat`) and
    /// track structure are never touched.
    pub fn write_to(&self, file: &mut Mp4File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let moov = require(file.seek_atom(FourCc::MOOV)?, FourCc::MOOV)?;
        let udta = require(file.seek_atom(FourCc::UDTA)?, FourCc::UDTA)?;
        let meta = require(file.seek_atom(FourCc::META)?, FourCc::META)?;
        file.seek(SeekFrom::Current(META_VERSION_FLAGS))?;
        let ilst = require(file.seek_atom(FourCc::ILST)?, FourCc::ILST)?;

        let file_len = file.len()?;
        if ilst.end() != file_len {
            return Err(Error::TrailingData {
                tag: FourCc::ILST,
                end: ilst.end(),
                file_len,
            });
        }

        let payload = self.ilst_payload()?;
        let new_ilst_size = u32::try_from(payload.len() + AtomHeader::SIZE)
            .map_err(|_| Error::OversizedValue { len: payload.len() })?;
        let delta = i64::from(new_ilst_size) - i64::from(ilst.size);

        tracing::debug!(
            ilst_offset = format_args!("{:#x}", ilst.offset),
            old_size = ilst.size,
            new_size = new_ilst_size,
            delta,
            "replacing ilst payload"
        );

        // All four ancestors share the delta: the edit replaces the ilst
        // payload, no intermediate atom grows on its own. Patches land at
        // disjoint offsets and all happen before the payload write.
        for atom in [&moov, &udta, &meta, &ilst] {
            let size = u32::try_from(i64::from(atom.size) + delta).map_err(|_| {
                Error::MalformedBox {
                    tag: atom.tag,
                    size: atom.size,
                }
            })?;
            file.write_atom_header_at(AtomHeader::new(size, atom.tag), atom.offset)?;
        }

        if delta > 0 {
            file.allocate(ilst.end(), delta as u64)?;
        } else if delta < 0 {
            // ilst was verified to be file-terminal, so the bytes past its
            // new end belong to nobody. Dropping them keeps the file free
            // of residue and the write repeatable.
            file.set_len((file_len as i64 + delta) as u64)?;
        }

        file.write_at(&payload, ilst.payload_offset())?;
        Ok(())
    }
}

fn require(atom: Option<Atom>, tag: FourCc) -> Result<Atom> {
    atom.ok_or(Error::RequiredBoxMissing(tag))
}
