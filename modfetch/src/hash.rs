//! xxHash64 content hashing for download verification.
//!
//! Hashes are compared against the values published by the modlist CDN,
//! which encodes the 64-bit digest as base64 of its little-endian bytes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{DownloadError, DownloadResult};
use crate::io::{copy_stream, StreamOrigin};

/// Seed used by the remote hashes.
const XXH64_SEED: u64 = 0;

/// A 64-bit xxHash digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashValue(u64);

impl HashValue {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Hash an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh64::xxh64(data, XXH64_SEED))
    }

    /// Parse the canonical base64 text form.
    pub fn from_base64(text: &str) -> Result<Self, ParseHashError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|_| ParseHashError(text.to_string()))?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ParseHashError(text.to_string()))?;
        Ok(Self(u64::from_le_bytes(bytes)))
    }

    /// Canonical base64 text form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_le_bytes())
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl FromStr for HashValue {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Serialize for HashValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for HashValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// Text that is not a base64-encoded 8-byte hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid xxHash64 value: {0:?}")]
pub struct ParseHashError(pub String);

/// Incremental xxHash64 state.
#[derive(Clone)]
pub struct StreamHasher {
    state: Xxh64,
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            state: Xxh64::new(XXH64_SEED),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    pub fn finish(&self) -> HashValue {
        HashValue(self.state.digest())
    }
}

/// Hash a stream to completion.
pub async fn hash_reader<R>(
    reader: &mut R,
    origin: StreamOrigin<'_>,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> DownloadResult<HashValue>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = StreamHasher::new();
    let mut sink = tokio::io::sink();
    copy_stream(
        reader,
        &mut sink,
        origin,
        Path::new("<sink>"),
        buffer_size,
        Some(&mut hasher),
        cancel,
    )
    .await?;
    Ok(hasher.finish())
}

/// Copy `reader` into `writer`, hashing the bytes in the same pass.
///
/// Returns the number of bytes copied and their hash.
pub async fn hash_copy<R, W>(
    reader: &mut R,
    writer: &mut W,
    origin: StreamOrigin<'_>,
    dest: &Path,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> DownloadResult<(u64, HashValue)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = StreamHasher::new();
    let copied = copy_stream(
        reader,
        writer,
        origin,
        dest,
        buffer_size,
        Some(&mut hasher),
        cancel,
    )
    .await?;
    Ok((copied, hasher.finish()))
}

/// Hash a file on disk.
pub async fn hash_file(
    path: &Path,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> DownloadResult<HashValue> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    hash_reader(&mut file, StreamOrigin::File(path), buffer_size, cancel).await
}

/// Fail with [`DownloadError::HashMismatch`] unless the hashes are equal.
pub fn ensure_match(computed: HashValue, expected: HashValue, name: &str) -> DownloadResult<()> {
    if computed == expected {
        return Ok(());
    }
    tracing::error!(
        name,
        expected = %expected,
        computed = %computed,
        "Hash does not match pre-computed value"
    );
    Err(DownloadError::HashMismatch {
        name: name.to_string(),
        expected,
        computed,
    })
}
