//! Tarball unpacking.
//!
//! Compression is detected from magic bytes rather than the file name, so a
//! mirror that serves `.tar.xz` under a `.tgz` URL still unpacks.

use std::path::{Path, PathBuf};

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use tokio::fs;
use tokio::io::{AsyncRead, BufReader};
use tokio_tar::Archive;
use tracing::debug;

use super::types::{SourceError, SourceId};

/// Compression wrapping a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  Gzip,
  Bzip2,
  Xz,
  Tar,
}

impl ArchiveKind {
  /// Detect the archive kind from a file's leading bytes.
  pub fn sniff(path: &Path) -> Option<Self> {
    let kind = infer::get_from_path(path).ok().flatten()?;
    match kind.mime_type() {
      "application/gzip" => Some(ArchiveKind::Gzip),
      "application/x-bzip2" => Some(ArchiveKind::Bzip2),
      "application/x-xz" => Some(ArchiveKind::Xz),
      "application/x-tar" => Some(ArchiveKind::Tar),
      _ => None,
    }
  }
}

/// Unpack `archive` into `scratch` and return the root of the unpacked tree.
///
/// When the archive holds a single top-level directory, that directory is the
/// root; otherwise `scratch` itself is.
pub async fn unpack_archive(id: &SourceId, archive: &Path, scratch: &Path) -> Result<PathBuf, SourceError> {
  let kind = ArchiveKind::sniff(archive).ok_or_else(|| SourceError::Unpack {
    id: id.clone(),
    message: format!("unrecognized archive format: {}", archive.display()),
  })?;

  debug!(source = %id, ?kind, archive = %archive.display(), "unpacking");

  fs::create_dir_all(scratch).await.map_err(|e| SourceError::io(scratch, e))?;
  let file = fs::File::open(archive).await.map_err(|e| SourceError::io(archive, e))?;
  let reader = BufReader::new(file);

  let result = match kind {
    ArchiveKind::Gzip => unpack_stream(GzipDecoder::new(reader), scratch).await,
    ArchiveKind::Bzip2 => unpack_stream(BzDecoder::new(reader), scratch).await,
    ArchiveKind::Xz => unpack_stream(XzDecoder::new(reader), scratch).await,
    ArchiveKind::Tar => unpack_stream(reader, scratch).await,
  };
  result.map_err(|e| SourceError::Unpack {
    id: id.clone(),
    message: e.to_string(),
  })?;

  single_top_level_dir(scratch).await
}

async fn unpack_stream<R: AsyncRead + Unpin + Send>(reader: R, dest: &Path) -> std::io::Result<()> {
  let mut archive = Archive::new(reader);
  archive.unpack(dest).await
}

async fn single_top_level_dir(scratch: &Path) -> Result<PathBuf, SourceError> {
  let mut entries = fs::read_dir(scratch).await.map_err(|e| SourceError::io(scratch, e))?;
  let mut only = None;
  let mut count = 0;
  while let Some(entry) = entries.next_entry().await.map_err(|e| SourceError::io(scratch, e))? {
    count += 1;
    only = Some(entry);
  }

  match only {
    Some(entry) if count == 1 => {
      let file_type = entry.file_type().await.map_err(|e| SourceError::io(entry.path(), e))?;
      if file_type.is_dir() {
        Ok(entry.path())
      } else {
        Ok(scratch.to_path_buf())
      }
    }
    _ => Ok(scratch.to_path_buf()),
  }
}
