//! Torrent metainfo (.torrent) files for image layers.
//!
//! Layer torrents are always single-file: `name` is the `<id>.layer` file
//! the piece hashes were computed from, and `announce` is the first tracker
//! configured on the engine.

use std::{fmt, path::Path};

use bendy::{
    decoding::{self, Decoder, FromBencode, Object, ResultExt},
    encoding::{self, AsString, SingleItemEncoder, ToBencode},
};
use sha1::{Digest as _, Sha1};
use tokio::{fs, io::AsyncReadExt};

use crate::error::{Error, Result};

/// SHA-1 of the bencoded info dictionary; the identity of a swarm.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    pub announce: String,
    pub info: Info,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// Name of the single file the torrent carries.
    pub name: String,

    /// Length of that file in bytes.
    pub length: u64,

    /// Length in bytes of each piece, the last piece may be smaller.
    pub piece_length: u32,

    /// Concatenation of the 20-byte SHA-1 hashes, one per piece.
    pub pieces: Vec<u8>,

    // computed from the raw info dict, not part of the encoding
    pub info_hash: InfoHash,
}

impl MetaInfo {
    /// Hash the file at `path` into a single-file metainfo.
    pub async fn build_from_file(
        path: &Path,
        announce: String,
        piece_length: u32,
    ) -> Result<Self> {
        let name = path
            .file_name()
            .ok_or_else(|| Error::InvalidReference(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let mut file = fs::File::open(path).await?;
        let mut pieces = Vec::new();
        let mut length: u64 = 0;

        let mut buf = vec![0u8; piece_length as usize];
        let mut filled = 0;
        loop {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            length += n as u64;
            filled += n;
            if filled == buf.len() {
                pieces.extend_from_slice(&Sha1::digest(&buf[..filled]));
                filled = 0;
            }
        }
        if filled > 0 {
            pieces.extend_from_slice(&Sha1::digest(&buf[..filled]));
        }

        let mut info =
            Info { name, length, piece_length, pieces, ..Default::default() };
        info.info_hash = info.compute_info_hash()?;

        Ok(Self { announce, info })
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::from_bencode(buf).map_err(|_| Error::MetainfoInvalid)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_bencode()?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let buf = fs::read(path).await?;
        Self::from_bytes(&buf)
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?).await?;
        Ok(())
    }
}

impl Info {
    /// Number of pieces in the torrent.
    #[inline]
    pub fn pieces(&self) -> usize {
        self.pieces.len().div_ceil(20)
    }

    /// Size in bytes of the given piece.
    pub fn piece_size(&self, piece_index: usize) -> u32 {
        if piece_index + 1 == self.pieces() {
            let remainder = (self.length % self.piece_length as u64) as u32;
            if remainder == 0 { self.piece_length } else { remainder }
        } else {
            self.piece_length
        }
    }

    /// SHA-1 of this info dict as it would appear on the wire.
    pub fn compute_info_hash(&self) -> Result<InfoHash> {
        Ok(Self::hash_raw(&self.to_bencode()?))
    }

    fn hash_raw(buf: &[u8]) -> InfoHash {
        let mut hasher = Sha1::new();
        hasher.update(buf);
        InfoHash(hasher.finalize().into())
    }
}

impl ToBencode for MetaInfo {
    const MAX_DEPTH: usize = 3;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> std::result::Result<(), encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"announce", &self.announce)?;
            e.emit_pair(b"info", &self.info)
        })?;
        Ok(())
    }
}

impl ToBencode for Info {
    const MAX_DEPTH: usize = 2;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> std::result::Result<(), encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"length", self.length)?;
            e.emit_pair(b"name", &self.name)?;
            e.emit_pair(b"piece length", self.piece_length)?;
            e.emit_pair(b"pieces", AsString(&self.pieces))
        })?;
        Ok(())
    }
}

impl FromBencode for MetaInfo {
    fn decode_bencode_object(
        object: Object,
    ) -> std::result::Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut announce = None;
        let mut info = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"announce", value) => {
                    announce = String::decode_bencode_object(value)
                        .context("announce")
                        .map(Some)?;
                }
                (b"info", value) => {
                    info = Info::decode_bencode_object(value)
                        .context("info")
                        .map(Some)?;
                }
                _ => {}
            }
        }

        let announce = announce
            .ok_or_else(|| decoding::Error::missing_field("announce"))?;
        let info =
            info.ok_or_else(|| decoding::Error::missing_field("info"))?;

        Ok(MetaInfo { announce, info })
    }
}

impl FromBencode for Info {
    fn decode_bencode_object(
        object: Object,
    ) -> std::result::Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut name = None;
        let mut length = None;
        let mut piece_length = None;
        let mut pieces = None;

        // hash the raw dict before walking it, that is the info_hash
        let bytes = object.try_into_dictionary()?;
        let bytes = bytes.into_raw()?;
        let info_hash = Info::hash_raw(bytes);

        let mut decoder = Decoder::new(bytes);
        let mut dict = decoder
            .next_object()?
            .ok_or_else(|| decoding::Error::missing_field("info"))?
            .try_into_dictionary()?;

        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"length", value) => {
                    length = u64::decode_bencode_object(value)
                        .context("length")
                        .map(Some)?;
                }
                (b"name", value) => {
                    name = String::decode_bencode_object(value)
                        .context("name")
                        .map(Some)?;
                }
                (b"piece length", value) => {
                    piece_length = u32::decode_bencode_object(value)
                        .context("piece length")
                        .map(Some)?;
                }
                (b"pieces", value) => {
                    pieces = AsString::decode_bencode_object(value)
                        .context("pieces")
                        .map(|bytes| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        let name =
            name.ok_or_else(|| decoding::Error::missing_field("name"))?;
        let length =
            length.ok_or_else(|| decoding::Error::missing_field("length"))?;
        let piece_length = piece_length
            .ok_or_else(|| decoding::Error::missing_field("piece length"))?;
        let pieces =
            pieces.ok_or_else(|| decoding::Error::missing_field("pieces"))?;

        Ok(Info { name, length, piece_length, pieces, info_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_and_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("abc.layer");
        // 2 full pieces and one partial one
        fs::write(&path, vec![7u8; 2500]).await?;

        let meta = MetaInfo::build_from_file(
            &path,
            "http://tracker.example:6969/announce".to_owned(),
            1024,
        )
        .await?;

        assert_eq!(meta.info.name, "abc.layer");
        assert_eq!(meta.info.length, 2500);
        assert_eq!(meta.info.pieces(), 3);
        assert_eq!(meta.info.piece_size(0), 1024);
        assert_eq!(meta.info.piece_size(2), 452);

        let bytes = meta.to_bytes()?;
        let decoded = MetaInfo::from_bytes(&bytes)?;
        assert_eq!(decoded, meta);
        assert_eq!(decoded.info.info_hash, meta.info.info_hash);

        Ok(())
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            MetaInfo::from_bytes(b"not a torrent"),
            Err(Error::MetainfoInvalid)
        ));
    }
}
