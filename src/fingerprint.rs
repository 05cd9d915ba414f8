//! Content identity for files.
//!
//! A [`Fingerprint`] is a BLAKE3 digest over the full byte content plus the number
//! of bytes hashed. Files are streamed through a fixed buffer so memory use does
//! not depend on file size.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Buffer size for reading files (8KB)
const BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The file could not be opened or read at fingerprinting time.
    #[error("Unreadable file {}: {source}", .path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Content hash plus the byte length it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub digest: blake3::Hash,
    pub len: u64,
}

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        self.digest.to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", &self.digest.to_hex()[..16], self.len)
    }
}

/// Hash a file's content in a single streaming pass.
pub fn fingerprint(path: &Path) -> Result<Fingerprint, FingerprintError> {
    let unreadable = |source| FingerprintError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut len = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(unreadable)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        len += bytes_read as u64;
    }

    Ok(Fingerprint {
        digest: hasher.finalize(),
        len,
    })
}

/// True when both files exist and have identical content.
///
/// Sizes are compared first so differently sized files are never hashed.
pub fn same_content(a: &Path, b: &Path) -> Result<bool, FingerprintError> {
    let size = |path: &Path| {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|source| FingerprintError::UnreadableFile {
                path: path.to_path_buf(),
                source,
            })
    };

    if size(a)? != size(b)? {
        return Ok(false);
    }
    Ok(fingerprint(a)? == fingerprint(b)?)
}
