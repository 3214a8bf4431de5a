//! Content digests in `algo:hex` form. Only sha256 is supported.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// The only digest algorithm blobs may use.
pub const ALGORITHM: &str = "sha256";

const HEX_LEN: usize = 64;

/// A validated `sha256:<hex>` content digest.
///
/// The hex part doubles as the layer id: torrent and data files are named
/// `<hex>.torrent` and `<hex>.layer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(s: &str) -> Result<Self> {
        let Some((algo, hex)) = s.split_once(':') else {
            return Err(Error::InvalidDigest(s.to_owned()));
        };
        if algo != ALGORITHM {
            return Err(Error::InvalidDigest(s.to_owned()));
        }
        Self::from_hex(hex)
    }

    /// Build a digest from the bare hex part.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != HEX_LEN
            || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(Error::InvalidDigest(hex.to_owned()));
        }
        Ok(Self(format!("{ALGORITHM}:{hex}")))
    }

    /// Digest of a byte string held in memory.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(bytes);
        hasher.finish()
    }

    /// The hex part, which is the id used for torrent and data file names.
    pub fn id(&self) -> &str {
        &self.0[ALGORITHM.len() + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

/// Running SHA-256 used to digest blob streams as they are copied.
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.0.update(buf);
    }

    pub fn finish(self) -> Digest {
        Digest(format!("{ALGORITHM}:{}", hex::encode(self.0.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn empty_digest() {
        assert_eq!(Digest::of_bytes(b"").as_str(), EMPTY_SHA256);
    }

    #[test]
    fn parse_rejects_bad_forms() {
        assert!(Digest::parse("sha256").is_err());
        assert!(Digest::parse("md5:abcd").is_err());
        assert!(Digest::parse("sha256:abcd").is_err());
        // uppercase hex is not content-addressable on case-sensitive paths
        let upper = format!("sha256:{}", "A".repeat(64));
        assert!(Digest::parse(&upper).is_err());

        let d = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(
            d.id(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hasher_matches_of_bytes() {
        let mut h = Hasher::new();
        h.update(b"some ");
        h.update(b"blob");
        assert_eq!(h.finish(), Digest::of_bytes(b"some blob"));
    }
}
