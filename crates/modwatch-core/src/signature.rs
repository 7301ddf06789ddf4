//! Content signatures for change detection

use std::io;
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::model::Signature;

/// Signature of an in-memory buffer.
pub fn signature_of(content: &[u8]) -> Signature {
    Signature(xxh3_64(content))
}

/// Read a file and compute its signature.
///
/// Returns `Ok(None)` when nothing that can be tracked exists at `path`
/// (missing, or a directory). Other read failures are returned as errors.
pub fn probe_file(path: &Path) -> io::Result<Option<(Signature, Vec<u8>)>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some((signature_of(&bytes), bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) if path.is_dir() => {
            tracing::trace!("{} is a directory: {}", path.display(), e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// True when a regular file exists at `path`.
pub fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
