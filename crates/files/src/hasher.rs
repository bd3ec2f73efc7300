//! Content hashing for incoming byte sources.

use crate::{FilesError, FilesResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// Hex-encoded SHA-256 digest (64 lowercase hexadecimal characters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Builds the hex form of a raw 32-byte digest.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Validates an externally supplied hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidDigest`] unless `input` is exactly 64 lowercase hex characters.
    pub fn parse(input: &str) -> FilesResult<Self> {
        let valid = input.len() == 64
            && input
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid {
            return Err(FilesError::InvalidDigest(input.to_owned()));
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First and second two-character shards of the hex digest.
    pub(crate) fn shards(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for Sha256Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Sha256Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Hashes the whole of `source` and leaves its read position back at the start.
///
/// The source is streamed through the hasher in fixed-size reads, so the payload is never
/// held in memory. The position is reset before hashing as well, so a partially consumed
/// source is still hashed in full.
///
/// # Errors
///
/// Any seek or read failure is returned as-is. On error the read position is unspecified.
pub fn digest_and_rewind<R: Read + Seek + ?Sized>(source: &mut R) -> io::Result<Sha256Hash> {
    source.seek(SeekFrom::Start(0))?;

    let mut hasher = Sha256::new();
    io::copy(source, &mut hasher)?;

    source.seek(SeekFrom::Start(0))?;

    let hash: [u8; 32] = hasher.finalize().into();
    Ok(Sha256Hash::from_bytes(&hash))
}

/// Digest of an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> Sha256Hash {
    let hash: [u8; 32] = Sha256::digest(bytes).into();
    Sha256Hash::from_bytes(&hash)
}
