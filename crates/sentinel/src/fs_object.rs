use std::{fs::File, io, path::Path};

use thiserror::Error;

/// Metadata snapshot of a single filesystem entry, plus a content hash
/// for regular files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsObject {
    pub path: String,
    /// Lowercase hex BLAKE3-256 digest; empty unless the path referred
    /// to a regular file at stat time.
    pub hash: String,
    /// Unix seconds.
    pub created: i64,
    /// Unix seconds.
    pub modified: i64,
    pub uid: u32,
    pub gid: u32,
    /// The platform's raw mode word.
    pub mode: u32,
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("path not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("failed to stat path: {0}")]
    Stat(#[source] io::Error),
    #[error("failed to read file contents: {0}")]
    Read(#[source] io::Error),
}

impl FsObject {
    /// Stat `path` without following symlinks; regular files are
    /// additionally streamed through the content hash.
    pub fn materialize(path: &Path) -> Result<Self, MaterializeError> {
        let metadata = std::fs::symlink_metadata(path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => MaterializeError::NotFound,
            io::ErrorKind::PermissionDenied => MaterializeError::PermissionDenied,
            _ => MaterializeError::Stat(err),
        })?;

        let mut object = from_metadata(path, &metadata);
        if metadata.is_file() {
            object.hash = hash_file(path)?;
        }
        Ok(object)
    }

    /// A pure-delete record: the path alone, every other field zeroed.
    pub fn deleted(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            ..Self::default()
        }
    }
}

#[cfg(unix)]
fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> FsObject {
    use std::os::unix::fs::MetadataExt;

    FsObject {
        path: path.to_string_lossy().into_owned(),
        hash: String::new(),
        created: metadata.ctime(),
        modified: metadata.mtime(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        mode: metadata.mode(),
    }
}

#[cfg(windows)]
fn from_metadata(path: &Path, metadata: &std::fs::Metadata) -> FsObject {
    use std::os::windows::fs::MetadataExt;

    FsObject {
        path: path.to_string_lossy().into_owned(),
        hash: String::new(),
        created: filetime_to_unix(metadata.creation_time()),
        modified: filetime_to_unix(metadata.last_write_time()),
        uid: 0,
        gid: 0,
        mode: metadata.file_attributes(),
    }
}

/// Convert a Windows FILETIME (100 ns intervals since 1601-01-01) to
/// Unix seconds.
#[cfg(windows)]
fn filetime_to_unix(filetime: u64) -> i64 {
    const INTERVALS_PER_SEC: u64 = 10_000_000;
    const UNIX_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
    (filetime / INTERVALS_PER_SEC) as i64 - UNIX_EPOCH_OFFSET_SECS
}

fn hash_file(path: &Path) -> Result<String, MaterializeError> {
    let mut file = File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => MaterializeError::NotFound,
        io::ErrorKind::PermissionDenied => MaterializeError::PermissionDenied,
        _ => MaterializeError::Read(err),
    })?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(MaterializeError::Read)?;
    Ok(hasher.finalize().to_hex().to_string())
}
